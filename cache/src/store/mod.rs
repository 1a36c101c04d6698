//! The coordination store contract.
//!
//! Bookkeeping for a cache lives in a store that may be shared by many
//! processes. Every method on [`CoordinationStore`] is one atomic transition:
//! an implementation must apply all of its hash, sorted-set and counter
//! updates as a unit (a single lock for [`MemoryStore`], a single Lua script
//! for `RedisStore`). The policy layered on top never takes a lock of its own.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::error::{Error, Result};

use std::fmt;

/// One of the two ordered sub-collections of the segmented LRU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
  /// Newly admitted entries that have not been re-accessed.
  Probation,
  /// Entries that were accessed again after admission.
  Protected,
}

impl Segment {
  pub(crate) const ALL: [Segment; 2] = [Segment::Probation, Segment::Protected];

  pub fn as_str(&self) -> &'static str {
    match self {
      Segment::Probation => "probation",
      Segment::Protected => "protected",
    }
  }

  #[cfg(any(feature = "redis", test))]
  pub(crate) fn parse(raw: &str) -> Option<Self> {
    match raw {
      "probation" => Some(Segment::Probation),
      "protected" => Some(Segment::Protected),
      _ => None,
    }
  }
}

impl fmt::Display for Segment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The bookkept payload of an entry.
///
/// `value` is what callers stored; `weight` is what counts against the
/// capacity. They are equal unless a weigher was configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredEntry {
  pub value: u64,
  pub weight: u64,
}

impl StoredEntry {
  /// The heaviest weight a store can count.
  pub const MAX_WEIGHT: u64 = i64::MAX as u64;

  pub fn new(value: u64, weight: u64) -> Self {
    Self { value, weight }
  }

  /// An entry whose weight is its value.
  pub fn weighted_by_value(value: u64) -> Self {
    Self::new(value, value)
  }

  /// The weight as a signed counter delta, rejecting weights above `max`.
  pub(crate) fn checked_weight(&self, key: &str, max: u64) -> Result<i64> {
    i64::try_from(self.weight)
      .ok()
      .filter(|_| self.weight <= max)
      .ok_or_else(|| Error::WeightOverflow {
        key: key.to_string(),
        weight: self.weight,
        max,
      })
  }

  /// Encodes the entry as a hash field value. Entries weighted by value are
  /// stored as the bare number; others as `value|weight`.
  #[cfg(any(feature = "redis", test))]
  pub(crate) fn encode(&self) -> String {
    if self.value == self.weight {
      self.value.to_string()
    } else {
      format!("{}|{}", self.value, self.weight)
    }
  }

  #[cfg(any(feature = "redis", test))]
  pub(crate) fn decode(raw: &str) -> Option<Self> {
    match raw.split_once('|') {
      Some((value, weight)) => Some(Self::new(value.parse().ok()?, weight.parse().ok()?)),
      None => raw.parse().ok().map(Self::weighted_by_value),
    }
  }
}

/// What a `put` did to the bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
  /// A new key was appended to the probation tail.
  Inserted,
  /// The key was in probation; it now sits at the protected tail.
  Promoted(StoredEntry),
  /// The key was already protected; only its value changed.
  Updated(StoredEntry),
}

impl PutOutcome {
  /// The entry that was replaced, if any.
  pub fn previous(&self) -> Option<StoredEntry> {
    match self {
      PutOutcome::Inserted => None,
      PutOutcome::Promoted(prev) | PutOutcome::Updated(prev) => Some(*prev),
    }
  }
}

/// What a `get` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
  /// Found in protected; ordering untouched.
  Hit(StoredEntry),
  /// Found in probation and promoted to the protected tail.
  Promoted(StoredEntry),
}

impl GetOutcome {
  pub fn entry(&self) -> StoredEntry {
    match self {
      GetOutcome::Hit(entry) | GetOutcome::Promoted(entry) => *entry,
    }
  }
}

/// An entry removed from bookkeeping by eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
  pub key: String,
  pub entry: StoredEntry,
  pub segment: Segment,
}

/// Names of every store key a cache touches, all namespaced by the cache name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
  name: String,
  probation_values: String,
  protected_values: String,
  probation_lru: String,
  protected_lru: String,
  total_weight: String,
  probation_weight: String,
  protected_weight: String,
}

impl KeyLayout {
  pub fn new(cache_name: &str) -> Self {
    Self {
      name: cache_name.to_string(),
      probation_values: format!("{cache_name}:slru:probation_values"),
      protected_values: format!("{cache_name}:slru:protected_values"),
      probation_lru: format!("{cache_name}:slru:probation_lru"),
      protected_lru: format!("{cache_name}:slru:protected_lru"),
      total_weight: format!("{cache_name}:slru:total_weight"),
      probation_weight: format!("{cache_name}:slru:total_weight_probation"),
      protected_weight: format!("{cache_name}:slru:total_weight_protected"),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Hash of key -> encoded entry for a segment.
  pub fn values(&self, segment: Segment) -> &str {
    match segment {
      Segment::Probation => &self.probation_values,
      Segment::Protected => &self.protected_values,
    }
  }

  /// Sorted set of key -> score for a segment, lowest score is eldest.
  pub fn lru(&self, segment: Segment) -> &str {
    match segment {
      Segment::Probation => &self.probation_lru,
      Segment::Protected => &self.protected_lru,
    }
  }

  /// Counter holding the summed weight of a segment.
  pub fn weight(&self, segment: Segment) -> &str {
    match segment {
      Segment::Probation => &self.probation_weight,
      Segment::Protected => &self.protected_weight,
    }
  }

  /// Counter holding the summed weight of both segments.
  pub fn total_weight(&self) -> &str {
    &self.total_weight
  }
}

/// A shared, atomic bookkeeping store for a segmented LRU.
///
/// The store never holds cached bytes, only which keys exist, their value and
/// weight, their segment and their order.
pub trait CoordinationStore: Send + Sync + 'static {
  /// Inserts a new key into probation, promotes a probation key to the
  /// protected tail, or updates a protected key in place. Segment and total
  /// weights absorb the difference between the old and the new weight.
  ///
  /// Fails with [`Error::WeightOverflow`], leaving bookkeeping untouched,
  /// when the weight or the resulting total cannot be counted.
  fn put(&self, layout: &KeyLayout, key: &str, entry: StoredEntry, score: f64) -> Result<PutOutcome>;

  /// Looks a key up, promoting it to the protected tail on a probation hit.
  fn get(&self, layout: &KeyLayout, key: &str, score: f64) -> Result<Option<GetOutcome>>;

  /// Removes a key from whichever segment holds it.
  fn remove(&self, layout: &KeyLayout, key: &str) -> Result<Option<(Segment, StoredEntry)>>;

  /// Removes the eldest probation entry, or the eldest protected entry when
  /// probation is empty.
  fn evict_eldest(&self, layout: &KeyLayout) -> Result<Option<Evicted>>;

  /// Moves the eldest protected entry to the probation tail.
  fn demote_eldest(&self, layout: &KeyLayout, score: f64) -> Result<Option<(String, StoredEntry)>>;

  /// The segment currently holding `key`.
  fn segment_of(&self, layout: &KeyLayout, key: &str) -> Result<Option<Segment>>;

  /// The lowest-scored key of a segment.
  fn eldest(&self, layout: &KeyLayout, segment: Segment) -> Result<Option<String>>;

  /// Every key of a segment, eldest first.
  fn keys(&self, layout: &KeyLayout, segment: Segment) -> Result<Vec<String>>;

  /// Number of entries in a segment.
  fn len(&self, layout: &KeyLayout, segment: Segment) -> Result<u64>;

  /// Reads a weight counter. A missing counter reads as zero.
  fn counter(&self, counter: &str) -> Result<i64>;
}
