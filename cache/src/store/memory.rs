use super::{CoordinationStore, Evicted, GetOutcome, KeyLayout, PutOutcome, Segment, StoredEntry};
use crate::error::{Error, Result};

use std::cmp::Ordering;
use std::collections::BTreeSet;

use ahash::HashMap;
use parking_lot::Mutex;

/// A sort score with a total order, so it can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Score {}

impl PartialOrd for Score {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Score {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.total_cmp(&other.0)
  }
}

/// A sorted set with the same ordering as a Redis ZSET: by score, then by
/// member for equal scores.
#[derive(Debug, Default)]
struct SortedSet {
  scores: HashMap<String, Score>,
  ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
  fn add(&mut self, member: &str, score: f64) {
    let score = Score(score);
    if let Some(old) = self.scores.insert(member.to_string(), score) {
      self.ordered.remove(&(old, member.to_string()));
    }
    self.ordered.insert((score, member.to_string()));
  }

  fn remove(&mut self, member: &str) -> bool {
    match self.scores.remove(member) {
      Some(score) => self.ordered.remove(&(score, member.to_string())),
      None => false,
    }
  }

  fn first(&self) -> Option<&str> {
    self.ordered.iter().next().map(|(_, member)| member.as_str())
  }

  fn members(&self) -> Vec<String> {
    self.ordered.iter().map(|(_, member)| member.clone()).collect()
  }
}

/// The raw structures behind a `MemoryStore`: hashes, sorted sets and
/// counters, addressed by store key like their Redis counterparts.
#[derive(Debug, Default)]
struct Keyspace {
  hashes: HashMap<String, HashMap<String, StoredEntry>>,
  sorted: HashMap<String, SortedSet>,
  counters: HashMap<String, i64>,
}

impl Keyspace {
  fn hget(&self, hash: &str, field: &str) -> Option<StoredEntry> {
    self.hashes.get(hash).and_then(|h| h.get(field)).copied()
  }

  fn hset(&mut self, hash: &str, field: &str, entry: StoredEntry) {
    self
      .hashes
      .entry(hash.to_string())
      .or_default()
      .insert(field.to_string(), entry);
  }

  fn hdel(&mut self, hash: &str, field: &str) -> Option<StoredEntry> {
    self.hashes.get_mut(hash).and_then(|h| h.remove(field))
  }

  fn hlen(&self, hash: &str) -> u64 {
    self.hashes.get(hash).map_or(0, |h| h.len() as u64)
  }

  fn zadd(&mut self, set: &str, member: &str, score: f64) {
    self.sorted.entry(set.to_string()).or_default().add(member, score);
  }

  fn zrem(&mut self, set: &str, member: &str) {
    if let Some(set) = self.sorted.get_mut(set) {
      set.remove(member);
    }
  }

  fn zfirst(&self, set: &str) -> Option<String> {
    self.sorted.get(set).and_then(|s| s.first()).map(str::to_string)
  }

  fn counter(&self, counter: &str) -> i64 {
    self.counters.get(counter).copied().unwrap_or(0)
  }

  fn incr_by(&mut self, counter: &str, delta: i64) {
    *self.counters.entry(counter.to_string()).or_insert(0) += delta;
  }

  // Stored weights passed `StoredEntry::checked_weight` on put, so the casts
  // below cannot wrap.

  /// Drops `key` from a segment's hash, sorted set and weight counters.
  fn take(&mut self, layout: &KeyLayout, segment: Segment, key: &str) -> Option<StoredEntry> {
    let entry = self.hdel(layout.values(segment), key)?;
    self.zrem(layout.lru(segment), key);
    self.incr_by(layout.weight(segment), -(entry.weight as i64));
    self.incr_by(layout.total_weight(), -(entry.weight as i64));
    Some(entry)
  }

  /// Appends `key` to a segment and adds its weight to the counters.
  fn append(&mut self, layout: &KeyLayout, segment: Segment, key: &str, entry: StoredEntry, score: f64) {
    self.zadd(layout.lru(segment), key, score);
    self.hset(layout.values(segment), key, entry);
    self.incr_by(layout.weight(segment), entry.weight as i64);
    self.incr_by(layout.total_weight(), entry.weight as i64);
  }
}

/// A process-local coordination store.
///
/// Every transition runs under one mutex. Cloning the surrounding `Arc` and
/// handing it to several caches models several processes sharing one
/// bookkeeping namespace.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Keyspace>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CoordinationStore for MemoryStore {
  fn put(&self, layout: &KeyLayout, key: &str, entry: StoredEntry, score: f64) -> Result<PutOutcome> {
    let weight = entry.checked_weight(key, StoredEntry::MAX_WEIGHT)?;
    let mut space = self.inner.lock();

    let previous = space
      .hget(layout.values(Segment::Protected), key)
      .or_else(|| space.hget(layout.values(Segment::Probation), key));
    let others = space.counter(layout.total_weight()) - previous.map_or(0, |old| old.weight as i64);
    if others.checked_add(weight).is_none() {
      return Err(Error::WeightOverflow {
        key: key.to_string(),
        weight: entry.weight,
        max: StoredEntry::MAX_WEIGHT - others.max(0) as u64,
      });
    }

    if let Some(old) = space.hget(layout.values(Segment::Protected), key) {
      let delta = weight - old.weight as i64;
      space.hset(layout.values(Segment::Protected), key, entry);
      space.incr_by(layout.weight(Segment::Protected), delta);
      space.incr_by(layout.total_weight(), delta);
      return Ok(PutOutcome::Updated(old));
    }

    if let Some(old) = space.take(layout, Segment::Probation, key) {
      space.append(layout, Segment::Protected, key, entry, score);
      return Ok(PutOutcome::Promoted(old));
    }

    space.append(layout, Segment::Probation, key, entry, score);
    Ok(PutOutcome::Inserted)
  }

  fn get(&self, layout: &KeyLayout, key: &str, score: f64) -> Result<Option<GetOutcome>> {
    let mut space = self.inner.lock();

    if let Some(entry) = space.hget(layout.values(Segment::Protected), key) {
      return Ok(Some(GetOutcome::Hit(entry)));
    }

    match space.take(layout, Segment::Probation, key) {
      Some(entry) => {
        space.append(layout, Segment::Protected, key, entry, score);
        Ok(Some(GetOutcome::Promoted(entry)))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, layout: &KeyLayout, key: &str) -> Result<Option<(Segment, StoredEntry)>> {
    let mut space = self.inner.lock();
    for segment in [Segment::Protected, Segment::Probation] {
      if let Some(entry) = space.take(layout, segment, key) {
        return Ok(Some((segment, entry)));
      }
    }
    Ok(None)
  }

  fn evict_eldest(&self, layout: &KeyLayout) -> Result<Option<Evicted>> {
    let mut space = self.inner.lock();
    for segment in [Segment::Probation, Segment::Protected] {
      let Some(key) = space.zfirst(layout.lru(segment)) else {
        continue;
      };
      match space.take(layout, segment, &key) {
        Some(entry) => return Ok(Some(Evicted { key, entry, segment })),
        None => {
          // Ordered member without a value; drop it and report nothing.
          space.zrem(layout.lru(segment), &key);
          return Ok(None);
        }
      }
    }
    Ok(None)
  }

  fn demote_eldest(&self, layout: &KeyLayout, score: f64) -> Result<Option<(String, StoredEntry)>> {
    let mut space = self.inner.lock();
    let Some(key) = space.zfirst(layout.lru(Segment::Protected)) else {
      return Ok(None);
    };
    match space.take(layout, Segment::Protected, &key) {
      Some(entry) => {
        space.append(layout, Segment::Probation, &key, entry, score);
        Ok(Some((key, entry)))
      }
      None => {
        space.zrem(layout.lru(Segment::Protected), &key);
        Ok(None)
      }
    }
  }

  fn segment_of(&self, layout: &KeyLayout, key: &str) -> Result<Option<Segment>> {
    let space = self.inner.lock();
    Ok(
      [Segment::Protected, Segment::Probation]
        .into_iter()
        .find(|segment| space.hget(layout.values(*segment), key).is_some()),
    )
  }

  fn eldest(&self, layout: &KeyLayout, segment: Segment) -> Result<Option<String>> {
    Ok(self.inner.lock().zfirst(layout.lru(segment)))
  }

  fn keys(&self, layout: &KeyLayout, segment: Segment) -> Result<Vec<String>> {
    let space = self.inner.lock();
    Ok(
      space
        .sorted
        .get(layout.lru(segment))
        .map(SortedSet::members)
        .unwrap_or_default(),
    )
  }

  fn len(&self, layout: &KeyLayout, segment: Segment) -> Result<u64> {
    Ok(self.inner.lock().hlen(layout.values(segment)))
  }

  fn counter(&self, counter: &str) -> Result<i64> {
    Ok(self.inner.lock().counter(counter))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(value: u64) -> StoredEntry {
    StoredEntry::weighted_by_value(value)
  }

  #[test]
  fn new_key_lands_in_probation() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");

    let outcome = store.put(&layout, "a", entry(10), 1.0).unwrap();

    assert_eq!(outcome, PutOutcome::Inserted);
    assert_eq!(store.segment_of(&layout, "a").unwrap(), Some(Segment::Probation));
    assert_eq!(store.counter(layout.weight(Segment::Probation)).unwrap(), 10);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), 10);
  }

  #[test]
  fn second_put_promotes_and_moves_weight_delta() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    store.put(&layout, "a", entry(10), 1.0).unwrap();

    let outcome = store.put(&layout, "a", entry(25), 2.0).unwrap();

    assert_eq!(outcome, PutOutcome::Promoted(entry(10)));
    assert_eq!(store.segment_of(&layout, "a").unwrap(), Some(Segment::Protected));
    assert_eq!(store.counter(layout.weight(Segment::Probation)).unwrap(), 0);
    assert_eq!(store.counter(layout.weight(Segment::Protected)).unwrap(), 25);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), 25);
  }

  #[test]
  fn protected_update_keeps_order() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    for (key, score) in [("a", 1.0), ("b", 2.0)] {
      store.put(&layout, key, entry(1), score).unwrap();
      store.put(&layout, key, entry(1), score + 10.0).unwrap();
    }

    let outcome = store.put(&layout, "a", entry(3), 99.0).unwrap();

    assert_eq!(outcome, PutOutcome::Updated(entry(1)));
    assert_eq!(store.keys(&layout, Segment::Protected).unwrap(), vec!["a", "b"]);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), 4);
  }

  #[test]
  fn get_promotes_probation_hit_only_once() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    store.put(&layout, "a", entry(5), 1.0).unwrap();

    assert_eq!(store.get(&layout, "a", 2.0).unwrap(), Some(GetOutcome::Promoted(entry(5))));
    assert_eq!(store.get(&layout, "a", 3.0).unwrap(), Some(GetOutcome::Hit(entry(5))));
    assert_eq!(store.get(&layout, "missing", 4.0).unwrap(), None);
    assert_eq!(store.len(&layout, Segment::Probation).unwrap(), 0);
    assert_eq!(store.len(&layout, Segment::Protected).unwrap(), 1);
  }

  #[test]
  fn evict_prefers_probation_then_protected() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    store.put(&layout, "p", entry(1), 1.0).unwrap();
    store.put(&layout, "p", entry(1), 2.0).unwrap();
    store.put(&layout, "n", entry(2), 3.0).unwrap();

    let first = store.evict_eldest(&layout).unwrap().unwrap();
    assert_eq!((first.key.as_str(), first.segment), ("n", Segment::Probation));

    let second = store.evict_eldest(&layout).unwrap().unwrap();
    assert_eq!((second.key.as_str(), second.segment), ("p", Segment::Protected));

    assert_eq!(store.evict_eldest(&layout).unwrap(), None);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), 0);
  }

  #[test]
  fn demote_moves_eldest_protected_to_probation_tail() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    store.put(&layout, "old", entry(4), 1.0).unwrap();
    store.put(&layout, "old", entry(4), 2.0).unwrap();
    store.put(&layout, "new", entry(1), 3.0).unwrap();

    let demoted = store.demote_eldest(&layout, 4.0).unwrap();

    assert_eq!(demoted, Some(("old".to_string(), entry(4))));
    assert_eq!(store.keys(&layout, Segment::Probation).unwrap(), vec!["new", "old"]);
    assert_eq!(store.counter(layout.weight(Segment::Protected)).unwrap(), 0);
    assert_eq!(store.counter(layout.weight(Segment::Probation)).unwrap(), 5);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), 5);
  }

  #[test]
  fn overflowing_weights_leave_bookkeeping_untouched() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    store.put(&layout, "big", entry(i64::MAX as u64 - 10), 1.0).unwrap();

    assert!(matches!(
      store.put(&layout, "huge", entry(u64::MAX), 2.0),
      Err(Error::WeightOverflow { .. })
    ));
    assert!(matches!(
      store.put(&layout, "small", entry(11), 3.0),
      Err(Error::WeightOverflow { max: 10, .. })
    ));
    assert_eq!(store.segment_of(&layout, "small").unwrap(), None);
    assert_eq!(store.counter(layout.total_weight()).unwrap(), i64::MAX - 10);

    // Replacing the heavy entry only counts the difference.
    assert!(store.put(&layout, "big", entry(i64::MAX as u64), 4.0).is_ok());
    assert_eq!(store.counter(layout.total_weight()).unwrap(), i64::MAX);
  }

  #[test]
  fn equal_scores_order_by_member() {
    let store = MemoryStore::new();
    let layout = KeyLayout::new("t");
    for key in ["c", "a", "b"] {
      store.put(&layout, key, entry(1), 7.0).unwrap();
    }
    assert_eq!(store.keys(&layout, Segment::Probation).unwrap(), vec!["a", "b", "c"]);
    assert_eq!(store.eldest(&layout, Segment::Probation).unwrap(), Some("a".to_string()));
  }

  #[test]
  fn caches_with_different_names_do_not_collide() {
    let store = MemoryStore::new();
    let left = KeyLayout::new("left");
    let right = KeyLayout::new("right");
    store.put(&left, "k", entry(3), 1.0).unwrap();

    assert_eq!(store.segment_of(&right, "k").unwrap(), None);
    assert_eq!(store.remove(&right, "k").unwrap(), None);
    assert_eq!(
      store.remove(&left, "k").unwrap(),
      Some((Segment::Probation, entry(3)))
    );
  }
}
