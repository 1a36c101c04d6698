use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, process-local metrics collector for one cache handle.
/// All fields are atomic to allow for lock-free updates.
///
/// Bookkeeping itself is shared between processes; these counters only
/// describe what this process observed.
#[derive(Debug)]
pub struct Metrics {
  // --- Hit/Miss Ratios ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,

  // --- Writes ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) updates: CachePadded<AtomicU64>,
  pub(crate) promotions: CachePadded<AtomicU64>,
  pub(crate) removals: CachePadded<AtomicU64>,

  // --- Eviction Stats ---
  pub(crate) evictions: CachePadded<AtomicU64>,
  pub(crate) demotions: CachePadded<AtomicU64>,
  pub(crate) listener_failures: CachePadded<AtomicU64>,

  // --- Reconciliation ---
  pub(crate) reconciled: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      updates: CachePadded::new(AtomicU64::new(0)),
      promotions: CachePadded::new(AtomicU64::new(0)),
      removals: CachePadded::new(AtomicU64::new(0)),
      evictions: CachePadded::new(AtomicU64::new(0)),
      demotions: CachePadded::new(AtomicU64::new(0)),
      listener_failures: CachePadded::new(AtomicU64::new(0)),
      reconciled: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      inserts: self.inserts.load(Ordering::Relaxed),
      updates: self.updates.load(Ordering::Relaxed),
      promotions: self.promotions.load(Ordering::Relaxed),
      removals: self.removals.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      demotions: self.demotions.load(Ordering::Relaxed),
      listener_failures: self.listener_failures.load(Ordering::Relaxed),
      reconciled: self.reconciled.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups that found the key.
  pub hits: u64,
  /// Lookups that did not.
  pub misses: u64,
  /// The cache hit ratio (hits / (hits + misses)).
  pub hit_ratio: f64,
  /// Keys newly admitted to probation.
  pub inserts: u64,
  /// Value updates on protected keys.
  pub updates: u64,
  /// Probation keys promoted to protected by a `put` or `get`.
  pub promotions: u64,
  /// Explicit removals.
  pub removals: u64,
  /// Keys evicted for capacity by this process's evictor.
  pub evictions: u64,
  /// Protected keys demoted to probation to respect the protected share.
  pub demotions: u64,
  /// Listener invocations that returned an error or panicked.
  pub listener_failures: u64,
  /// Keys dropped by reconciliation because their file was missing.
  pub reconciled: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("inserts", &self.inserts)
      .field("updates", &self.updates)
      .field("promotions", &self.promotions)
      .field("removals", &self.removals)
      .field("evictions", &self.evictions)
      .field("demotions", &self.demotions)
      .field("listener_failures", &self.listener_failures)
      .field("reconciled", &self.reconciled)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
