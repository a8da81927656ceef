use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ===== Mailing List Models =====

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "archive_policy", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArchivePolicy {
    Never,
    Private,
    #[default]
    Public,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct MailingList {
    pub name: String,
    pub list_id: Option<String>,
    pub display_name: String,
    pub description: String,
    pub subject_prefix: String,
    pub archive_policy: ArchivePolicy,
    pub created_at: DateTime<Utc>,
}

impl MailingList {
    /// Bare list with default attributes, as created when the first email arrives.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            list_id: None,
            display_name: String::new(),
            description: String::new(),
            subject_prefix: String::new(),
            archive_policy: ArchivePolicy::default(),
            created_at: Utc::now(),
        }
    }

    /// Lists created during the last 30 days.
    pub fn is_new(&self) -> bool {
        Utc::now() - self.created_at <= Duration::days(30)
    }

    /// Lists with the `never` policy are not surfaced to readers.
    pub fn is_visible(&self) -> bool {
        self.archive_policy != ArchivePolicy::Never
    }

    /// Fill in the default `list_id` (the address with `@` replaced by `.`).
    pub fn with_default_list_id(mut self) -> Self {
        if self.list_id.is_none() {
            self.list_id = Some(self.name.replace('@', "."));
        }
        self
    }
}

// ===== Core Data Models =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq)]
pub struct Thread {
    pub id: i32,
    pub mailing_list: String,
    pub thread_id: String,
    pub date_active: DateTime<Utc>,
    pub starting_email_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq)]
pub struct Email {
    pub id: i32,
    pub mailing_list: String,
    pub thread_id: i32,
    pub message_id: String,
    pub sender_address: String,
    pub sender_name: String,
    pub subject: String,
    pub content: String,
    pub date: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub parent_id: Option<i32>,
}

/// Email as handed to the archive, before it gets an id.
///
/// `thread_key` is the list-scoped thread identifier; the thread row is
/// created on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmail {
    pub mailing_list: String,
    pub thread_key: String,
    pub message_id: String,
    pub sender_address: String,
    pub sender_name: String,
    pub subject: String,
    pub content: String,
    pub date: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    pub parent_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct User {
    pub id: i32,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq)]
pub struct Vote {
    pub id: i32,
    pub email_id: i32,
    pub user_id: i32,
    pub value: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq)]
pub struct LastView {
    pub id: i32,
    pub thread_id: i32,
    pub user_id: i32,
    pub view_date: DateTime<Utc>,
}

// ===== Aggregate Types =====

/// Sender ranked by message count over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema, PartialEq, Eq)]
pub struct TopPoster {
    pub address: String,
    pub name: String,
    pub count: i64,
}

/// Likes and dislikes on an email or a whole thread.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, FromRow, JsonSchema, PartialEq, Eq)]
pub struct VoteTally {
    pub likes: i64,
    pub dislikes: i64,
}

impl VoteTally {
    /// Sum of vote values.
    pub fn total(&self) -> i64 {
        self.likes - self.dislikes
    }
}

// ===== Extended Structs for API Responses =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ThreadSummary {
    pub id: i32,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "mailingList")]
    pub mailing_list: String,
    pub subject: String,
    #[serde(rename = "dateActive")]
    pub date_active: DateTime<Utc>,
    #[serde(rename = "emailsCount")]
    pub emails_count: i64,
    #[serde(rename = "participantsCount")]
    pub participants_count: i64,
    #[serde(rename = "votesTotal")]
    pub votes_total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListOverview {
    pub list: MailingList,
    #[serde(rename = "isNew")]
    pub is_new: bool,
    #[serde(rename = "recentParticipantsCount")]
    pub recent_participants_count: i64,
    #[serde(rename = "recentThreadsCount")]
    pub recent_threads_count: i64,
    #[serde(rename = "topPosters")]
    pub top_posters: Vec<TopPoster>,
    #[serde(rename = "topThreads")]
    pub top_threads: Vec<ThreadSummary>,
    #[serde(rename = "popularThreads")]
    pub popular_threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonthSummary {
    #[serde(rename = "mailingList")]
    pub mailing_list: String,
    pub year: i32,
    pub month: u32,
    #[serde(rename = "participantsCount")]
    pub participants_count: i64,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnreadStatus {
    #[serde(rename = "threadId")]
    pub thread_id: i32,
    #[serde(rename = "userId")]
    pub user_id: i32,
    pub unread: bool,
    #[serde(rename = "numUnread")]
    pub num_unread: i64,
}
