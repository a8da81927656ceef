//! Values stored in the cache.
//!
//! Each key namespace holds exactly one variant of [`CachedValue`]. Typed
//! readers go through [`CacheCodec`], which rejects a variant that does not
//! belong to the requested type so the caller treats it as a miss.

use crate::models::{TopPoster, VoteTally};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    Count(i64),
    ThreadIds(Vec<i32>),
    Posters(Vec<TopPoster>),
    Subject(String),
    Votes(VoteTally),
    JobId(i64),
}

/// Conversion between an aggregate's Rust type and its cached variant.
pub trait CacheCodec: Sized {
    fn encode(self) -> CachedValue;
    fn decode(value: CachedValue) -> Option<Self>;
}

impl CacheCodec for i64 {
    fn encode(self) -> CachedValue {
        CachedValue::Count(self)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Count(count) => Some(count),
            _ => None,
        }
    }
}

impl CacheCodec for Vec<i32> {
    fn encode(self) -> CachedValue {
        CachedValue::ThreadIds(self)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::ThreadIds(ids) => Some(ids),
            _ => None,
        }
    }
}

impl CacheCodec for Vec<TopPoster> {
    fn encode(self) -> CachedValue {
        CachedValue::Posters(self)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Posters(posters) => Some(posters),
            _ => None,
        }
    }
}

impl CacheCodec for String {
    fn encode(self) -> CachedValue {
        CachedValue::Subject(self)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Subject(subject) => Some(subject),
            _ => None,
        }
    }
}

impl CacheCodec for VoteTally {
    fn encode(self) -> CachedValue {
        CachedValue::Votes(self)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::Votes(tally) => Some(tally),
            _ => None,
        }
    }
}

/// Job id of a queued recompute task, held by its dedup lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingJob(pub i64);

impl CacheCodec for PendingJob {
    fn encode(self) -> CachedValue {
        CachedValue::JobId(self.0)
    }

    fn decode(value: CachedValue) -> Option<Self> {
        match value {
            CachedValue::JobId(id) => Some(PendingJob(id)),
            _ => None,
        }
    }
}
