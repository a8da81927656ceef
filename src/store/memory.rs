//! In-process entity store.
//!
//! Same semantics as the Postgres store, including cascades and unique
//! constraints, kept in ordered maps behind a single lock. The lock is
//! never held across an await.

use super::{ArchiveStore, StoreError, StoreResult};
use crate::aggregates::DateWindow;
use crate::models::{Email, LastView, MailingList, NewEmail, Thread, TopPoster, User, Vote, VoteTally};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Default)]
struct Tables {
    lists: BTreeMap<String, MailingList>,
    users: BTreeMap<i32, User>,
    threads: BTreeMap<i32, Thread>,
    emails: BTreeMap<i32, Email>,
    votes: BTreeMap<i32, Vote>,
    last_views: BTreeMap<i32, LastView>,
    next_id: i32,
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn thread_emails(&self, thread_id: i32) -> impl Iterator<Item = &Email> {
        self.emails.values().filter(move |e| e.thread_id == thread_id)
    }

    fn tally<'a>(votes: impl Iterator<Item = &'a Vote>) -> VoteTally {
        let mut tally = VoteTally::default();
        for vote in votes {
            match vote.value {
                1 => tally.likes += 1,
                -1 => tally.dislikes += 1,
                _ => {}
            }
        }
        tally
    }

    fn thread_vote_sum(&self, thread_id: i32) -> i64 {
        let email_ids: HashSet<i32> = self.thread_emails(thread_id).map(|e| e.id).collect();
        self.votes
            .values()
            .filter(|v| email_ids.contains(&v.email_id))
            .map(|v| i64::from(v.value))
            .sum()
    }

    fn remove_email(&mut self, id: i32) -> Option<Email> {
        let email = self.emails.remove(&id)?;
        self.votes.retain(|_, v| v.email_id != id);
        for other in self.emails.values_mut() {
            if other.parent_id == Some(id) {
                other.parent_id = None;
            }
        }
        for thread in self.threads.values_mut() {
            if thread.starting_email_id == Some(id) {
                thread.starting_email_id = None;
            }
        }
        Some(email)
    }
}

#[derive(Default)]
pub struct MemoryArchiveStore {
    tables: RwLock<Tables>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[rocket::async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn save_mailing_list(&self, list: &MailingList) -> StoreResult<MailingList> {
        let mut tables = self.tables.write();
        let saved = match tables.lists.get(&list.name) {
            // created_at is fixed at first insert
            Some(existing) => MailingList {
                created_at: existing.created_at,
                ..list.clone()
            },
            None => list.clone(),
        };
        tables.lists.insert(saved.name.clone(), saved.clone());
        Ok(saved)
    }

    async fn get_mailing_list(&self, name: &str) -> StoreResult<Option<MailingList>> {
        Ok(self.tables.read().lists.get(name).cloned())
    }

    async fn list_mailing_lists(&self) -> StoreResult<Vec<MailingList>> {
        Ok(self.tables.read().lists.values().cloned().collect())
    }

    async fn create_user(&self, username: &str) -> StoreResult<User> {
        let mut tables = self.tables.write();
        if tables.users.values().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!("user {}", username)));
        }
        let user = User {
            id: tables.next_id(),
            username: username.to_string(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn create_thread(
        &self,
        list: &str,
        thread_key: &str,
        date_active: DateTime<Utc>,
    ) -> StoreResult<Thread> {
        let mut tables = self.tables.write();
        if !tables.lists.contains_key(list) {
            return Err(StoreError::NotFound(format!("mailing list {}", list)));
        }
        if tables
            .threads
            .values()
            .any(|t| t.mailing_list == list && t.thread_id == thread_key)
        {
            return Err(StoreError::Conflict(format!("thread {} in {}", thread_key, list)));
        }
        let thread = Thread {
            id: tables.next_id(),
            mailing_list: list.to_string(),
            thread_id: thread_key.to_string(),
            date_active,
            starting_email_id: None,
        };
        tables.threads.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn find_thread(&self, list: &str, thread_key: &str) -> StoreResult<Option<Thread>> {
        Ok(self
            .tables
            .read()
            .threads
            .values()
            .find(|t| t.mailing_list == list && t.thread_id == thread_key)
            .cloned())
    }

    async fn get_thread(&self, id: i32) -> StoreResult<Option<Thread>> {
        Ok(self.tables.read().threads.get(&id).cloned())
    }

    async fn get_threads(&self, ids: &[i32]) -> StoreResult<Vec<Thread>> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.threads.get(id).cloned())
            .collect())
    }

    async fn delete_thread(&self, id: i32) -> StoreResult<Option<Thread>> {
        let mut tables = self.tables.write();
        let Some(thread) = tables.threads.remove(&id) else {
            return Ok(None);
        };
        let email_ids: Vec<i32> = tables.thread_emails(id).map(|e| e.id).collect();
        for email_id in email_ids {
            tables.remove_email(email_id);
        }
        tables.last_views.retain(|_, v| v.thread_id != id);
        Ok(Some(thread))
    }

    async fn threads_between(&self, list: &str, window: &DateWindow) -> StoreResult<Vec<Thread>> {
        let tables = self.tables.read();
        let mut threads: Vec<Thread> = tables
            .threads
            .values()
            .filter(|t| t.mailing_list == list && t.date_active >= window.begin)
            .filter(|t| {
                t.starting_email_id
                    .and_then(|id| tables.emails.get(&id))
                    .is_some_and(|start| start.date < window.end)
            })
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.date_active.cmp(&a.date_active).then(b.id.cmp(&a.id)));
        Ok(threads)
    }

    async fn thread_email_counts(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter(|id| tables.threads.contains_key(id))
            .map(|&id| (id, tables.thread_emails(id).count() as i64))
            .collect())
    }

    async fn thread_vote_sums(&self, ids: &[i32]) -> StoreResult<Vec<(i32, i64)>> {
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter(|id| tables.threads.contains_key(id))
            .map(|&id| (id, tables.thread_vote_sum(id)))
            .collect())
    }

    async fn thread_participants_count(&self, thread_id: i32) -> StoreResult<i64> {
        let tables = self.tables.read();
        let senders: HashSet<&str> = tables
            .thread_emails(thread_id)
            .map(|e| e.sender_address.as_str())
            .collect();
        Ok(senders.len() as i64)
    }

    async fn thread_emails_count(&self, thread_id: i32) -> StoreResult<i64> {
        Ok(self.tables.read().thread_emails(thread_id).count() as i64)
    }

    async fn thread_emails(&self, thread_id: i32) -> StoreResult<Vec<Email>> {
        let tables = self.tables.read();
        let mut emails: Vec<Email> = tables.thread_emails(thread_id).cloned().collect();
        emails.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(emails)
    }

    async fn thread_emails_after(&self, thread_id: i32, after: DateTime<Utc>) -> StoreResult<i64> {
        Ok(self
            .tables
            .read()
            .thread_emails(thread_id)
            .filter(|e| e.date > after)
            .count() as i64)
    }

    async fn thread_votes(&self, thread_id: i32) -> StoreResult<VoteTally> {
        let tables = self.tables.read();
        let email_ids: HashSet<i32> = tables.thread_emails(thread_id).map(|e| e.id).collect();
        Ok(Tables::tally(tables.votes.values().filter(|v| email_ids.contains(&v.email_id))))
    }

    async fn insert_email(&self, thread_id: i32, email: &NewEmail) -> StoreResult<Email> {
        let mut tables = self.tables.write();
        if !tables.threads.contains_key(&thread_id) {
            return Err(StoreError::NotFound(format!("thread {}", thread_id)));
        }
        if tables
            .emails
            .values()
            .any(|e| e.mailing_list == email.mailing_list && e.message_id == email.message_id)
        {
            return Err(StoreError::Conflict(format!(
                "email {} in {}",
                email.message_id, email.mailing_list
            )));
        }

        let stored = Email {
            id: tables.next_id(),
            mailing_list: email.mailing_list.clone(),
            thread_id,
            message_id: email.message_id.clone(),
            sender_address: email.sender_address.clone(),
            sender_name: email.sender_name.clone(),
            subject: email.subject.clone(),
            content: email.content.clone(),
            date: email.date,
            in_reply_to: email.in_reply_to.clone(),
            parent_id: email.parent_id,
        };
        tables.emails.insert(stored.id, stored.clone());

        if let Some(thread) = tables.threads.get_mut(&thread_id) {
            if stored.date > thread.date_active {
                thread.date_active = stored.date;
            }
            if thread.starting_email_id.is_none() {
                thread.starting_email_id = Some(stored.id);
            }
        }
        Ok(stored)
    }

    async fn get_email(&self, id: i32) -> StoreResult<Option<Email>> {
        Ok(self.tables.read().emails.get(&id).cloned())
    }

    async fn delete_email(&self, id: i32) -> StoreResult<Option<Email>> {
        Ok(self.tables.write().remove_email(id))
    }

    async fn orphans_of(&self, email: &Email) -> StoreResult<Vec<Email>> {
        let tables = self.tables.read();
        Ok(tables
            .emails
            .values()
            .filter(|e| {
                e.mailing_list == email.mailing_list
                    && e.parent_id.is_none()
                    && e.id != email.id
                    && e.in_reply_to.as_deref() == Some(email.message_id.as_str())
            })
            .cloned()
            .collect())
    }

    async fn set_parent(&self, email_id: i32, parent_id: i32) -> StoreResult<()> {
        let mut tables = self.tables.write();
        match tables.emails.get_mut(&email_id) {
            Some(email) => {
                email.parent_id = Some(parent_id);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("email {}", email_id))),
        }
    }

    async fn participants_count_between(&self, list: &str, window: &DateWindow) -> StoreResult<i64> {
        let tables = self.tables.read();
        let senders: HashSet<&str> = tables
            .emails
            .values()
            .filter(|e| e.mailing_list == list && window.contains(e.date))
            .map(|e| e.sender_address.as_str())
            .collect();
        Ok(senders.len() as i64)
    }

    async fn poster_counts_between(
        &self,
        list: &str,
        window: &DateWindow,
    ) -> StoreResult<Vec<TopPoster>> {
        let tables = self.tables.read();
        let mut counts: HashMap<(&str, &str), i64> = HashMap::new();
        for email in tables
            .emails
            .values()
            .filter(|e| e.mailing_list == list && window.contains(e.date))
        {
            *counts
                .entry((email.sender_address.as_str(), email.sender_name.as_str()))
                .or_default() += 1;
        }

        let mut posters: Vec<TopPoster> = counts
            .into_iter()
            .map(|((address, name), count)| TopPoster {
                address: address.to_string(),
                name: name.to_string(),
                count,
            })
            .collect();
        posters.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.address.cmp(&b.address))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(posters)
    }

    async fn email_votes(&self, email_id: i32) -> StoreResult<VoteTally> {
        let tables = self.tables.read();
        Ok(Tables::tally(tables.votes.values().filter(|v| v.email_id == email_id)))
    }

    async fn upsert_vote(&self, email_id: i32, user_id: i32, value: i16) -> StoreResult<Vote> {
        if value != 1 && value != -1 {
            return Err(StoreError::InvalidVote(value));
        }
        let mut tables = self.tables.write();
        if !tables.emails.contains_key(&email_id) {
            return Err(StoreError::NotFound(format!("email {}", email_id)));
        }
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }

        if let Some(vote) = tables
            .votes
            .values_mut()
            .find(|v| v.email_id == email_id && v.user_id == user_id)
        {
            vote.value = value;
            return Ok(vote.clone());
        }

        let vote = Vote {
            id: tables.next_id(),
            email_id,
            user_id,
            value,
        };
        tables.votes.insert(vote.id, vote.clone());
        Ok(vote)
    }

    async fn find_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>> {
        Ok(self
            .tables
            .read()
            .votes
            .values()
            .find(|v| v.email_id == email_id && v.user_id == user_id)
            .cloned())
    }

    async fn delete_vote(&self, email_id: i32, user_id: i32) -> StoreResult<Option<Vote>> {
        let mut tables = self.tables.write();
        let id = tables
            .votes
            .values()
            .find(|v| v.email_id == email_id && v.user_id == user_id)
            .map(|v| v.id);
        Ok(id.and_then(|id| tables.votes.remove(&id)))
    }

    async fn last_views(&self, thread_id: i32, user_id: i32) -> StoreResult<Vec<LastView>> {
        let tables = self.tables.read();
        let mut views: Vec<LastView> = tables
            .last_views
            .values()
            .filter(|v| v.thread_id == thread_id && v.user_id == user_id)
            .cloned()
            .collect();
        views.sort_by(|a, b| a.view_date.cmp(&b.view_date).then(a.id.cmp(&b.id)));
        Ok(views)
    }

    async fn delete_last_view(&self, id: i32) -> StoreResult<()> {
        self.tables.write().last_views.remove(&id);
        Ok(())
    }

    async fn touch_last_view(
        &self,
        thread_id: i32,
        user_id: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<LastView> {
        let mut tables = self.tables.write();
        if !tables.threads.contains_key(&thread_id) {
            return Err(StoreError::NotFound(format!("thread {}", thread_id)));
        }
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }

        let newest = tables
            .last_views
            .values()
            .filter(|v| v.thread_id == thread_id && v.user_id == user_id)
            .max_by(|a, b| a.view_date.cmp(&b.view_date).then(a.id.cmp(&b.id)))
            .map(|v| v.id);

        if let Some(view) = newest.and_then(|id| tables.last_views.get_mut(&id)) {
            view.view_date = at;
            return Ok(view.clone());
        }

        let view = LastView {
            id: tables.next_id(),
            thread_id,
            user_id,
            view_date: at,
        };
        tables.last_views.insert(view.id, view.clone());
        Ok(view)
    }
}

impl MemoryArchiveStore {
    /// Insert a view row unconditionally, including duplicates for the same
    /// `(thread, user)`. Used to reproduce legacy data in tests.
    pub fn insert_last_view(&self, thread_id: i32, user_id: i32, at: DateTime<Utc>) -> LastView {
        let mut tables = self.tables.write();
        let view = LastView {
            id: tables.next_id(),
            thread_id,
            user_id,
            view_date: at,
        };
        tables.last_views.insert(view.id, view.clone());
        view
    }
}
