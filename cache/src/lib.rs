//! A shared, weight-bounded segmented-LRU cache index for local blob caches.
//!
//! # Features
//! - **Segmented LRU**: New keys start in probation and move to a protected
//!   segment when touched again, so one-off scans cannot flush hot entries.
//! - **Shared Bookkeeping**: Order, weights and segment membership live in a
//!   [`CoordinationStore`], in-process ([`MemoryStore`]) or in Redis, so many
//!   processes can bound one cache directory together.
//! - **Background Eviction**: Writes never block on eviction. A dedicated
//!   evictor thread trims the cache back under its weight bound and notifies
//!   eldest-removed listeners for every victim.
//! - **File Ownership**: [`LocalFileCache`] stores blobs on disk and deletes
//!   them when their bookkeeping is evicted.
//! - **Reconciliation**: `sync` drops bookkeeping for files that are not on
//!   this node.

// Public modules that form the API
pub mod builder;
#[cfg(feature = "serde")]
pub mod config;
pub mod error;
pub mod file_cache;
pub mod handles;
pub mod listener;
pub mod metrics;
pub mod policy;
pub mod reconcile;
pub mod store;

// Internal, crate-only modules
mod shared;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
#[cfg(feature = "serde")]
pub use config::CacheConfig;
pub use error::{BuildError, Error, Result};
pub use file_cache::LocalFileCache;
pub use handles::SlruCache;
pub use listener::{EldestRemovedListener, ListenerError, ListenerHandle};
pub use metrics::MetricsSnapshot;
pub use policy::Weigher;
pub use reconcile::ReconcileReport;
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{CoordinationStore, MemoryStore, Segment, StoredEntry};
