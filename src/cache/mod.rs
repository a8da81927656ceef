//! Cache store for derived aggregates.
//!
//! Aggregates are projections of the entity graph kept under string keys.
//! Some carry a TTL, others stay until an invalidation trigger deletes them.
//!
//! ## Module Structure
//!
//! - `keys`: typed key namespace and its string rendering
//! - `value`: tagged union of cached values and per-type codecs
//! - `store`: backend trait and error type
//! - `memory`: process-local DashMap backend
//! - `postgres`: shared `cache_entries` table backend
//! - `layer`: soft-failing typed front with `get_or_set`

mod keys;
mod layer;
mod memory;
mod postgres;
mod store;
mod value;

pub use keys::CacheKey;
pub use layer::AggregateCache;
pub use memory::MemoryCache;
pub use postgres::PgCache;
pub use store::{CacheError, CacheStore};
pub use value::{CacheCodec, CachedValue, PendingJob};
