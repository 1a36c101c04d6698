//! Admission, promotion and eviction rules layered over a coordination store.

pub(crate) mod slru;

use std::sync::Arc;

/// Computes the capacity weight of an entry from its key and value.
///
/// Without a weigher an entry weighs exactly its value.
pub type Weigher = Arc<dyn Fn(&str, u64) -> u64 + Send + Sync>;
