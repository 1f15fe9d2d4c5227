//! Client-side query cache.
//!
//! This module provides a resource-agnostic cache that:
//! - Addresses results by ordered, prefix-matchable query keys
//! - Deduplicates concurrent fetches of the same key
//! - Tracks staleness and invalidation per entry
//! - Applies mutation effects (write-through and invalidation)
//! - Optionally persists results to SQLite for warm restarts

mod client;
mod key;
mod mutation;
mod options;
mod storage;
mod traits;

pub use client::QueryClient;
pub use key::{KeyPart, QueryKey};
pub use mutation::{Effects, Mutation, MutationState};
pub use options::{CacheConfig, QueryOptions};
pub use storage::{CacheStorage, NoopStorage, PersistedQuery, SqliteStorage};
pub use traits::{CacheEvent, Cacheable, FetchStatus, QuerySnapshot};
