use super::{ArchiveStore, StoreError, StoreResult};
use crate::aggregates::DateWindow;
use crate::models::{Email, LastView, MailingList, NewEmail, Thread, TopPoster, User, Vote, VoteTally};
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};

const THREAD_COLUMNS: &str = "id, mailing_list, thread_id, date_active, starting_email_id";
const EMAIL_COLUMNS: &str = "id, mailing_list, thread_id, message_id, sender_address, sender_name, \
                             subject, content, date, in_reply_to, parent_id";

/// Entity store on the migrated archive schema.
pub struct PgArchiveStore {
    pool: PgPool,
}

impl PgArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl ArchiveStore for PgArchiveStore {
    async fn save_mailing_list(&self, list: &MailingList) -> StoreResult<MailingList> {
        let saved = sqlx::query_as::<_, MailingList>(
            r#"INSERT INTO mailing_lists
                   (name, list_id, display_name, description, subject_prefix, archive_policy, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (name) DO UPDATE SET
                   list_id = EXCLUDED.list_id,
                   display_name = EXCLUDED.display_name,
                   description = EXCLUDED.description,
                   subject_prefix = EXCLUDED.subject_prefix,
                   archive_policy = EXCLUDED.archive_policy
               RETURNING name, list_id, display_name, description, subject_prefix,
                         archive_policy, created_at"#,
        )
        .bind(&list.name)
        .bind(&list.list_id)
        .bind(&list.display_name)
        .bind(&list.description)
        .bind(&list.subject_prefix)
        .bind(list.archive_policy)
        .bind(list.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn get_mailing_list(&self, name: &str) -> StoreResult<Option<MailingList>> {
        let list = sqlx::query_as::<_, MailingList>(
            r#"SELECT name, list_id, display_name, description, subject_prefix,
                      archive_policy, created_at
               FROM mailing_lists WHERE name = $1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(list)
    }

    async fn list_mailing_lists(&self) -> StoreResult<Vec<MailingList>> {
        let lists = sqlx::query_as::<_, MailingList>(
            r#"SELECT name, list_id, display_name, description, subject_prefix,
                      archive_policy, created_at
               FROM mailing_lists ORDER BY name"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(lists)
    }

    async fn create_user(&self, username: &str) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username) VALUES ($1) RETURNING id, username",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_thread(
        &self,
        list: &str,
        thread_key: &str,
        date_active: DateTime<Utc>,
    ) -> StoreResult<Thread> {
        let thread = sqlx::query_as::<_, Thread>(&format!(
            "INSERT INTO threads (mailing_list, thread_id, date_active) VALUES ($1, $2, $3) \
             RETURNING {THREAD_COLUMNS}"
        ))
        .bind(list)
        .bind(thread_key)
        .bind(date_active)
        .fetch_one(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn find_thread(&self, list: &str, thread_key: &str) -> StoreResult<Option<Thread>> {
        let thread = sqlx::query_as::<_, Thread>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE mailing_list = $1 AND thread_id = $2"
        ))
        .bind(list)
        .bind(thread_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn get_thread(&self, id: i32) -> StoreResult<Option<Thread>> {
        let thread = sqlx::query_as::<_, Thread>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn get_threads(&self, ids: &[i32]) -> StoreResult<Vec<Thread>> {
        let threads = sqlx::query_as::<_, Thread>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(threads)
    }

    async fn delete_thread(&self, id: i32) -> StoreResult<Option<Thread>> {
        // emails, their votes and the last views go with the row
        let thread = sqlx::query_as::<_, Thread>(&format!(
            "DELETE FROM threads WHERE id = $1 RETURNING {THREAD_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(thread)
    }

    async fn threads_between(&self, list: &str, window: &DateWindow) -> StoreResult<Vec<Thread>> {
        let threads = sqlx::query_as::<_, Thread>(
            r#"SELECT t.id, t.mailing_list, t.thread_id, t.date_active, t.starting_email_id
               FROM threads t
               JOIN emails se ON se.id = t.starting_email_id
               WHERE t.mailing_list = $1
                 AND t.date_active >= $2
                 AND se.date < $3
               ORDER BY t.date_active DESC, t.id DESC"#,
        )
        .bind(list)
        .bind(window.begin)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(threads)
    }

    async fn thread_email_counts(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>> {
        let counts = sqlx::query_as::<_, (i32, i64)>(
            r#"SELECT t.id, COUNT(e.id)
               FROM threads t
               LEFT JOIN emails e ON e.thread_id = t.id
               WHERE t.id = ANY($1)
               GROUP BY t.id"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn thread_vote_sums(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>> {
        let sums = sqlx::query_as::<_, (i32, i64)>(
            r#"SELECT t.id, COALESCE(SUM(v.value), 0)::BIGINT
               FROM threads t
               LEFT JOIN emails e ON e.thread_id = t.id
               LEFT JOIN votes v ON v.email_id = e.id
               WHERE t.id = ANY($1)
               GROUP BY t.id"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(sums)
    }

    async fn thread_participants_count(&self, thread_id: i32) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT sender_address) FROM emails WHERE thread_id = $1",
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn thread_emails_count(&self, thread_id: i32) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE thread_id = $1")
            .bind(thread_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn thread_emails(&self, thread_id: i32) -> StoreResult<Vec<Email>> {
        let emails = sqlx::query_as::<_, Email>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE thread_id = $1 ORDER BY date, id"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(emails)
    }

    async fn thread_emails_after(&self, thread_id: i32, after: DateTime<Utc>) -> StoreResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE thread_id = $1 AND date > $2")
                .bind(thread_id)
                .bind(after)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn thread_votes(&self, thread_id: i32) -> StoreResult<VoteTally> {
        let tally = sqlx::query_as::<_, VoteTally>(
            r#"SELECT COUNT(*) FILTER (WHERE v.value = 1) AS likes,
                      COUNT(*) FILTER (WHERE v.value = -1) AS dislikes
               FROM votes v
               JOIN emails e ON e.id = v.email_id
               WHERE e.thread_id = $1"#,
        )
        .bind(thread_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(tally)
    }

    async fn insert_email(&self, thread_id: i32, email: &NewEmail) -> StoreResult<Email> {
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query_as::<_, Email>(&format!(
            "INSERT INTO emails (mailing_list, thread_id, message_id, sender_address, sender_name, \
                                 subject, content, date, in_reply_to, parent_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(&email.mailing_list)
        .bind(thread_id)
        .bind(&email.message_id)
        .bind(&email.sender_address)
        .bind(&email.sender_name)
        .bind(&email.subject)
        .bind(&email.content)
        .bind(email.date)
        .bind(&email.in_reply_to)
        .bind(email.parent_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match StoreError::from(e) {
            // the only foreign key on the insert path
            StoreError::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                StoreError::NotFound(format!("thread {}", thread_id))
            }
            other => other,
        })?;

        sqlx::query(
            r#"UPDATE threads
               SET date_active = GREATEST(date_active, $2),
                   starting_email_id = COALESCE(starting_email_id, $3)
               WHERE id = $1"#,
        )
        .bind(thread_id)
        .bind(stored.date)
        .bind(stored.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn get_email(&self, id: i32) -> StoreResult<Option<Email>> {
        let email = sqlx::query_as::<_, Email>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(email)
    }

    async fn delete_email(&self, id: i32) -> StoreResult<Option<Email>> {
        let email = sqlx::query_as::<_, Email>(&format!(
            "DELETE FROM emails WHERE id = $1 RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(email)
    }

    async fn orphans_of(&self, email: &Email) -> StoreResult<Vec<Email>> {
        let orphans = sqlx::query_as::<_, Email>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails \
             WHERE mailing_list = $1 AND in_reply_to = $2 AND parent_id IS NULL AND id <> $3 \
             ORDER BY id"
        ))
        .bind(&email.mailing_list)
        .bind(&email.message_id)
        .bind(email.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orphans)
    }

    async fn set_parent(&self, email_id: i32, parent_id: i32) -> StoreResult<()> {
        let result = sqlx::query("UPDATE emails SET parent_id = $2 WHERE id = $1")
            .bind(email_id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("email {}", email_id)));
        }
        Ok(())
    }

    async fn participants_count_between(&self, list: &str, window: &DateWindow) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(DISTINCT sender_address) FROM emails
               WHERE mailing_list = $1 AND date >= $2 AND date < $3"#,
        )
        .bind(list)
        .bind(window.begin)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn poster_counts_between(
        &self,
        list: &str,
        window: &DateWindow,
    ) -> StoreResult<Vec<TopPoster>> {
        let posters = sqlx::query_as::<_, TopPoster>(
            r#"SELECT sender_address AS address, sender_name AS name, COUNT(*) AS count
               FROM emails
               WHERE mailing_list = $1 AND date >= $2 AND date < $3
               GROUP BY sender_address, sender_name
               ORDER BY count DESC, address, name"#,
        )
        .bind(list)
        .bind(window.begin)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(posters)
    }

    async fn email_votes(&self, email_id: i32) -> StoreResult<VoteTally> {
        let tally = sqlx::query_as::<_, VoteTally>(
            r#"SELECT COUNT(*) FILTER (WHERE value = 1) AS likes,
                      COUNT(*) FILTER (WHERE value = -1) AS dislikes
               FROM votes WHERE email_id = $1"#,
        )
        .bind(email_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(tally)
    }

    async fn upsert_vote(&self, email_id: i32, user_id: i32, value: i16) -> StoreResult<Vote> {
        if value != 1 && value != -1 {
            return Err(StoreError::InvalidVote(value));
        }

        let vote = sqlx::query_as::<_, Vote>(
            r#"INSERT INTO votes (email_id, user_id, value) VALUES ($1, $2, $3)
               ON CONFLICT (email_id, user_id) DO UPDATE SET value = EXCLUDED.value
               RETURNING id, email_id, user_id, value"#,
        )
        .bind(email_id)
        .bind(user_id)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                StoreError::NotFound(format!("email {} or user {}", email_id, user_id))
            }
            other => other,
        })?;

        Ok(vote)
    }

    async fn find_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(
            "SELECT id, email_id, user_id, value FROM votes WHERE email_id = $1 AND user_id = $2",
        )
        .bind(email_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vote)
    }

    async fn delete_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>> {
        let vote = sqlx::query_as::<_, Vote>(
            r#"DELETE FROM votes WHERE email_id = $1 AND user_id = $2
               RETURNING id, email_id, user_id, value"#,
        )
        .bind(email_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(vote)
    }

    async fn last_views(&self, thread_id: i32, user_id: i32) -> StoreResult<Vec<LastView>> {
        let views = sqlx::query_as::<_, LastView>(
            r#"SELECT id, thread_id, user_id, view_date FROM last_views
               WHERE thread_id = $1 AND user_id = $2
               ORDER BY view_date, id"#,
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(views)
    }

    async fn delete_last_view(&self, id: i32) -> StoreResult<()> {
        sqlx::query("DELETE FROM last_views WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn touch_last_view(
        &self,
        thread_id: i32,
        user_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<LastView> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, LastView>(
            r#"UPDATE last_views SET view_date = $3
               WHERE id = (
                   SELECT id FROM last_views
                   WHERE thread_id = $1 AND user_id = $2
                   ORDER BY view_date DESC, id DESC
                   LIMIT 1
               )
               RETURNING id, thread_id, user_id, view_date"#,
        )
        .bind(thread_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let view = match updated {
            Some(view) => view,
            None => {
                sqlx::query_as::<_, LastView>(
                    r#"INSERT INTO last_views (thread_id, user_id, view_date) VALUES ($1, $2, $3)
                       RETURNING id, thread_id, user_id, view_date"#,
                )
                .bind(thread_id)
                .bind(user_id)
                .bind(at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match StoreError::from(e) {
                    StoreError::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                        StoreError::NotFound(format!("thread {} or user {}", thread_id, user_id))
                    }
                    other => other,
                })?
            }
        };

        tx.commit().await?;
        Ok(view)
    }
}
