use crate::error::BuildError;
use crate::handles::SlruCache;
use crate::listener::{EldestRemovedListener, ListenerRegistry};
use crate::metrics::Metrics;
use crate::policy::slru::SlruPolicy;
use crate::policy::Weigher;
use crate::shared::CacheShared;
use crate::store::{CoordinationStore, KeyLayout, MemoryStore};
use crate::task::evictor::{Evictor, EvictorContext};

use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// The default cap on keys evicted in one pass before the evictor logs and
/// starts a fresh pass.
pub const DEFAULT_MAX_EVICTIONS_PER_PASS: usize = 1000;

/// A builder for creating `SlruCache` instances.
pub struct CacheBuilder {
  pub(crate) name: String,
  pub(crate) cache_dir: Option<PathBuf>,
  pub(crate) capacity: u64,
  pub(crate) max_weight: u64,
  pub(crate) protected_share: Option<f64>,
  pub(crate) max_evictions_per_pass: usize,
  store: Option<Arc<dyn CoordinationStore>>,
  weigher: Option<Weigher>,
  listeners: Vec<Arc<dyn EldestRemovedListener>>,
}

// Manual Debug implementation for CacheBuilder.
impl fmt::Debug for CacheBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("cache_dir", &self.cache_dir)
      .field("capacity", &self.capacity)
      .field("max_weight", &self.max_weight)
      .field("protected_share", &self.protected_share)
      .field("max_evictions_per_pass", &self.max_evictions_per_pass)
      .field("has_store", &self.store.is_some())
      .field("has_weigher", &self.weigher.is_some())
      .field("listeners", &self.listeners.len())
      .finish()
  }
}

impl Default for CacheBuilder {
  fn default() -> Self {
    Self {
      name: String::new(),
      cache_dir: None,
      capacity: 0,
      max_weight: 0,
      protected_share: None,
      max_evictions_per_pass: DEFAULT_MAX_EVICTIONS_PER_PASS,
      store: None,
      weigher: None,
      listeners: Vec::new(),
    }
  }
}

impl CacheBuilder {
  /// Creates a builder for a cache whose bookkeeping keys are namespaced by `name`.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Sets the local directory that `sync` reconciles against.
  pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cache_dir = Some(dir.into());
    self
  }

  /// Sets the coordination store. Defaults to a fresh, process-local
  /// `MemoryStore`.
  pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Records the initial capacity parameter. It is informational; the
  /// eviction bound is `max_weight`.
  pub fn capacity(mut self, capacity: u64) -> Self {
    self.capacity = capacity;
    self
  }

  /// Sets the maximum total weight. `0` (the default) disables eviction.
  pub fn max_weight(mut self, max_weight: u64) -> Self {
    self.max_weight = max_weight;
    self
  }

  /// Sets how an entry's weight is derived from its key and value. By
  /// default the weight is the value.
  pub fn weigher(mut self, f: impl Fn(&str, u64) -> u64 + Send + Sync + 'static) -> Self {
    self.weigher = Some(Arc::new(f));
    self
  }

  /// Caps the protected segment at `share` of `max_weight`. Before each
  /// eviction the eldest protected entries above that share are demoted to
  /// probation. Unset by default.
  pub fn protected_share(mut self, share: f64) -> Self {
    self.protected_share = Some(share);
    self
  }

  /// Sets how many keys one eviction pass may evict before yielding.
  pub fn max_evictions_per_pass(mut self, limit: usize) -> Self {
    self.max_evictions_per_pass = limit;
    self
  }

  /// Registers an eldest-removed listener at build time.
  pub fn eldest_removed_listener<L>(mut self, listener: L) -> Self
  where
    L: EldestRemovedListener + 'static,
  {
    self.listeners.push(Arc::new(listener));
    self
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.name.trim().is_empty() {
      return Err(BuildError::EmptyName);
    }
    if let Some(share) = self.protected_share {
      if !(share > 0.0 && share < 1.0) {
        return Err(BuildError::InvalidProtectedShare(share));
      }
    }
    if self.max_evictions_per_pass == 0 {
      return Err(BuildError::ZeroEvictionBatch);
    }
    Ok(())
  }

  /// Builds the cache and starts its evictor thread.
  pub fn build(self) -> Result<SlruCache, BuildError> {
    self.validate()?;

    let metrics = Arc::new(Metrics::new());
    let store = self
      .store
      .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn CoordinationStore>);
    let policy = Arc::new(SlruPolicy::new(
      store,
      KeyLayout::new(&self.name),
      self.max_weight,
      self.protected_share,
      self.weigher,
      metrics.clone(),
    ));

    let listeners = Arc::new(ListenerRegistry::new());
    for listener in self.listeners {
      listeners.register(listener);
    }

    let evictor = Evictor::spawn(EvictorContext {
      policy: policy.clone(),
      listeners: listeners.clone(),
      max_evictions_per_pass: self.max_evictions_per_pass,
    });

    tracing::info!(
      cache = self.name.as_str(),
      max_weight = self.max_weight,
      capacity = self.capacity,
      "Built SLRU cache"
    );

    Ok(SlruCache {
      shared: Arc::new(CacheShared {
        policy,
        listeners,
        metrics,
        evictor: Some(evictor),
        cache_dir: self.cache_dir,
        capacity: self.capacity,
      }),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_name_is_rejected() {
    assert_eq!(CacheBuilder::default().build().unwrap_err(), BuildError::EmptyName);
    assert_eq!(CacheBuilder::new("  ").build().unwrap_err(), BuildError::EmptyName);
  }

  #[test]
  fn protected_share_must_be_a_fraction() {
    for share in [0.0, 1.0, 1.5, -0.2, f64::NAN] {
      let err = CacheBuilder::new("c").protected_share(share).build().unwrap_err();
      assert!(matches!(err, BuildError::InvalidProtectedShare(_)));
    }
  }

  #[test]
  fn zero_eviction_batch_is_rejected() {
    let err = CacheBuilder::new("c").max_evictions_per_pass(0).build().unwrap_err();
    assert_eq!(err, BuildError::ZeroEvictionBatch);
  }

  #[test]
  fn defaults_are_unbounded() {
    let cache = CacheBuilder::new("c").build().unwrap();
    assert_eq!(cache.max_weight(), 0);
    assert_eq!(cache.capacity(), 0);
    assert_eq!(cache.cache_dir(), None);
    assert_eq!(cache.listener_count(), 0);
  }
}
