use super::Weigher;
use crate::error::Result;
use crate::listener::ListenerRegistry;
use crate::metrics::Metrics;
use crate::store::{CoordinationStore, GetOutcome, KeyLayout, PutOutcome, Segment, StoredEntry};
use crate::time;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The outcome of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EvictionPass {
  pub(crate) evicted: usize,
  pub(crate) demoted: usize,
  /// The pass stopped at the per-pass limit while still over capacity.
  pub(crate) limit_reached: bool,
}

/// The segmented LRU policy over a coordination store.
///
/// New keys enter probation. A second `put` or a `get` of a probation key
/// promotes it to the protected tail; hits on protected keys do not reorder.
/// Eviction takes the eldest probation entry while probation is non-empty,
/// then the eldest protected entry.
///
/// The policy holds no lock of its own: each transition is a single atomic
/// store call, so several processes may run it against one namespace.
pub(crate) struct SlruPolicy {
  store: Arc<dyn CoordinationStore>,
  layout: KeyLayout,
  max_weight: AtomicU64,
  protected_share: Option<f64>,
  weigher: Option<Weigher>,
  metrics: Arc<Metrics>,
}

impl SlruPolicy {
  pub(crate) fn new(
    store: Arc<dyn CoordinationStore>,
    layout: KeyLayout,
    max_weight: u64,
    protected_share: Option<f64>,
    weigher: Option<Weigher>,
    metrics: Arc<Metrics>,
  ) -> Self {
    Self {
      store,
      layout,
      max_weight: AtomicU64::new(max_weight),
      protected_share,
      weigher,
      metrics,
    }
  }

  pub(crate) fn layout(&self) -> &KeyLayout {
    &self.layout
  }

  fn entry_for(&self, key: &str, value: u64) -> StoredEntry {
    match &self.weigher {
      Some(weigher) => StoredEntry::new(value, weigher(key, value)),
      None => StoredEntry::weighted_by_value(value),
    }
  }

  pub(crate) fn put(&self, key: &str, value: u64, score: Option<f64>) -> Result<Option<u64>> {
    let entry = self.entry_for(key, value);
    let score = score.unwrap_or_else(time::now_score);
    tracing::info!(cache = self.layout.name(), key = key, value = value, "Put key to cache");

    let outcome = self.store.put(&self.layout, key, entry, score)?;
    match outcome {
      PutOutcome::Inserted => Metrics::bump(&self.metrics.inserts),
      PutOutcome::Promoted(_) => {
        Metrics::bump(&self.metrics.promotions);
        tracing::debug!(cache = self.layout.name(), key = key, "Promoted key to protected");
      }
      PutOutcome::Updated(_) => Metrics::bump(&self.metrics.updates),
    }
    Ok(outcome.previous().map(|prev| prev.value))
  }

  pub(crate) fn get(&self, key: &str) -> Result<Option<u64>> {
    match self.store.get(&self.layout, key, time::now_score())? {
      Some(outcome) => {
        Metrics::bump(&self.metrics.hits);
        if let GetOutcome::Promoted(_) = outcome {
          Metrics::bump(&self.metrics.promotions);
          tracing::debug!(cache = self.layout.name(), key = key, "Promoted key to protected");
        }
        Ok(Some(outcome.entry().value))
      }
      None => {
        Metrics::bump(&self.metrics.misses);
        Ok(None)
      }
    }
  }

  pub(crate) fn contains_key(&self, key: &str) -> Result<bool> {
    Ok(self.store.segment_of(&self.layout, key)?.is_some())
  }

  pub(crate) fn segment_of(&self, key: &str) -> Result<Option<Segment>> {
    self.store.segment_of(&self.layout, key)
  }

  pub(crate) fn remove(&self, key: &str) -> Result<Option<u64>> {
    let removed = self.store.remove(&self.layout, key)?;
    if let Some((segment, entry)) = removed {
      Metrics::bump(&self.metrics.removals);
      tracing::info!(
        cache = self.layout.name(),
        key = key,
        segment = %segment,
        value = entry.value,
        "Removed key from cache"
      );
    }
    Ok(removed.map(|(_, entry)| entry.value))
  }

  /// Drops `key` from bookkeeping without counting it as a removal. Used by
  /// reconciliation, which keeps its own count.
  pub(crate) fn discard(&self, key: &str) -> Result<bool> {
    Ok(self.store.remove(&self.layout, key)?.is_some())
  }

  pub(crate) fn eldest_key(&self) -> Result<Option<String>> {
    if let Some(key) = self.store.eldest(&self.layout, Segment::Probation)? {
      return Ok(Some(key));
    }
    self.store.eldest(&self.layout, Segment::Protected)
  }

  pub(crate) fn keys(&self, segment: Segment) -> Result<Vec<String>> {
    self.store.keys(&self.layout, segment)
  }

  pub(crate) fn count(&self) -> Result<u64> {
    Ok(self.store.len(&self.layout, Segment::Probation)? + self.store.len(&self.layout, Segment::Protected)?)
  }

  pub(crate) fn weight(&self) -> Result<u64> {
    Ok(self.store.counter(self.layout.total_weight())?.max(0) as u64)
  }

  pub(crate) fn segment_weight(&self, segment: Segment) -> Result<u64> {
    Ok(self.store.counter(self.layout.weight(segment))?.max(0) as u64)
  }

  pub(crate) fn max_weight(&self) -> u64 {
    self.max_weight.load(Ordering::Relaxed)
  }

  pub(crate) fn set_max_weight(&self, max: u64) {
    self.max_weight.store(max, Ordering::Relaxed);
  }

  /// Whether the total weight currently exceeds a non-zero capacity.
  pub(crate) fn over_capacity(&self) -> Result<bool> {
    let max = self.max_weight();
    Ok(max > 0 && self.weight()? > max)
  }

  /// Demotes eldest protected entries while the protected segment is heavier
  /// than its share of the capacity.
  fn demote_protected_overflow(&self) -> Result<usize> {
    let Some(share) = self.protected_share else {
      return Ok(0);
    };
    let limit = (self.max_weight() as f64 * share) as u64;
    let mut demoted = 0;

    while self.segment_weight(Segment::Protected)? > limit {
      match self.store.demote_eldest(&self.layout, time::now_score())? {
        Some((key, entry)) => {
          demoted += 1;
          Metrics::bump(&self.metrics.demotions);
          tracing::debug!(
            cache = self.layout.name(),
            key = key.as_str(),
            weight = entry.weight,
            "Demoted key to probation"
          );
        }
        None => break,
      }
    }
    Ok(demoted)
  }

  /// Evicts until the cache is within capacity or `limit` keys were evicted,
  /// calling every listener once per evicted key.
  pub(crate) fn evict_pass(&self, limit: usize, listeners: &ListenerRegistry) -> Result<EvictionPass> {
    let mut pass = EvictionPass::default();

    while self.over_capacity()? {
      if pass.evicted >= limit {
        pass.limit_reached = true;
        break;
      }
      pass.demoted += self.demote_protected_overflow()?;

      let Some(evicted) = self.store.evict_eldest(&self.layout)? else {
        tracing::warn!(
          cache = self.layout.name(),
          weight = self.weight()?,
          max_weight = self.max_weight(),
          "Cache is over capacity but has nothing left to evict"
        );
        break;
      };

      pass.evicted += 1;
      Metrics::bump(&self.metrics.evictions);
      tracing::info!(
        cache = self.layout.name(),
        key = evicted.key.as_str(),
        segment = %evicted.segment,
        value = evicted.entry.value,
        "Evicted eldest key"
      );
      listeners.notify(&evicted.key, evicted.entry.value, &self.metrics);
    }

    Ok(pass)
  }
}
