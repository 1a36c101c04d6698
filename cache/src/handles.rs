use crate::error::{Error, Result};
use crate::listener::{EldestRemovedListener, ListenerHandle};
use crate::reconcile::{self, ReconcileReport};
use crate::shared::CacheShared;
use crate::store::Segment;
use crate::MetricsSnapshot;

use std::path::Path;
use std::sync::Arc;

/// A handle to a segmented-LRU bookkeeping cache.
///
/// Values are sizes (or any numeric payload) keyed by string; the bytes they
/// describe live elsewhere, typically in a [`LocalFileCache`](crate::LocalFileCache).
/// All reads and writes go straight to the coordination store. Capacity is
/// enforced by a background evictor, so right after a `put` the cache may be
/// over `max_weight` until eviction settles.
///
/// Cloning is cheap and every clone shares the same evictor and listeners.
#[derive(Debug, Clone)]
pub struct SlruCache {
  pub(crate) shared: Arc<CacheShared>,
}

impl SlruCache {
  /// The namespace of this cache's bookkeeping keys.
  pub fn name(&self) -> &str {
    self.shared.policy.layout().name()
  }

  /// Inserts or updates `key`, ordered by the current time.
  ///
  /// A new key goes to the probation tail. A key in probation is promoted to
  /// the protected tail. A protected key only has its value replaced.
  /// Returns the previous value.
  pub fn put(&self, key: &str, value: u64) -> Result<Option<u64>> {
    self.put_inner(key, value, None)
  }

  /// Like [`put`](Self::put), with an explicit ordering score. Lower scores
  /// are older and evicted first.
  pub fn put_with_score(&self, key: &str, value: u64, score: f64) -> Result<Option<u64>> {
    self.put_inner(key, value, Some(score))
  }

  fn put_inner(&self, key: &str, value: u64, score: Option<f64>) -> Result<Option<u64>> {
    let previous = self.shared.policy.put(key, value, score)?;
    self.shared.signal_if_over_capacity();
    Ok(previous)
  }

  /// Looks up `key`, promoting it if it is in probation.
  pub fn get(&self, key: &str) -> Result<Option<u64>> {
    self.shared.policy.get(key)
  }

  /// Checks for `key` without touching its order.
  pub fn contains_key(&self, key: &str) -> Result<bool> {
    self.shared.policy.contains_key(key)
  }

  /// The segment currently holding `key`.
  pub fn segment_of(&self, key: &str) -> Result<Option<Segment>> {
    self.shared.policy.segment_of(key)
  }

  /// Removes `key` and returns its value. Listeners are not called.
  pub fn remove(&self, key: &str) -> Result<Option<u64>> {
    self.shared.policy.remove(key)
  }

  /// The key the next eviction would take.
  pub fn eldest_key(&self) -> Result<Option<String>> {
    self.shared.policy.eldest_key()
  }

  /// Keys of one segment, eldest first.
  pub fn keys(&self, segment: Segment) -> Result<Vec<String>> {
    self.shared.policy.keys(segment)
  }

  pub fn count(&self) -> Result<u64> {
    self.shared.policy.count()
  }

  /// The summed weight of both segments.
  pub fn weight(&self) -> Result<u64> {
    self.shared.policy.weight()
  }

  pub fn segment_weight(&self, segment: Segment) -> Result<u64> {
    self.shared.policy.segment_weight(segment)
  }

  pub fn max_weight(&self) -> u64 {
    self.shared.policy.max_weight()
  }

  /// Changes the capacity. Takes effect on the next write; it does not
  /// trigger eviction by itself. `0` disables capacity eviction.
  pub fn set_max_weight(&self, max: u64) {
    self.shared.policy.set_max_weight(max);
  }

  /// The capacity parameter the cache was built with.
  pub fn capacity(&self) -> u64 {
    self.shared.capacity
  }

  /// The local directory reconciliation checks against, if any.
  pub fn cache_dir(&self) -> Option<&Path> {
    self.shared.cache_dir.as_deref()
  }

  /// Registers a listener called once for every key evicted for capacity.
  pub fn add_eldest_removed_listener<L>(&self, listener: L) -> ListenerHandle
  where
    L: EldestRemovedListener + 'static,
  {
    self.shared.listeners.register(Arc::new(listener))
  }

  /// Unregisters a listener. Returns `false` if it was already gone.
  pub fn remove_eldest_removed_listener(&self, handle: ListenerHandle) -> bool {
    self.shared.listeners.unregister(handle)
  }

  pub fn listener_count(&self) -> usize {
    self.shared.listeners.len()
  }

  /// Drops bookkeeping for every key whose file is missing from the cache
  /// directory. Per-key failures are logged and counted, not returned.
  pub fn sync(&self) -> Result<ReconcileReport> {
    let root = self
      .shared
      .cache_dir
      .as_deref()
      .ok_or_else(|| Error::MissingCacheDir(self.name().to_string()))?;
    Ok(reconcile::reconcile(&self.shared.policy, root, &self.shared.metrics))
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}
