mod common;

use common::{build_test_cache, settle, ChannelListener};

use std::time::Duration;

use blobcache::{CacheBuilder, Error, Segment};
use pretty_assertions::assert_eq;

fn keys(cache: &blobcache::SlruCache, segment: Segment) -> Vec<String> {
  cache.keys(segment).unwrap()
}

#[test]
fn test_reference_scenario() {
  let cache = build_test_cache("scenario", 500);
  let (listener, rx) = ChannelListener::new();
  cache.add_eldest_removed_listener(listener);

  for i in 0..5 {
    cache.put_with_score(&format!("a{i}"), 100, i as f64).unwrap();
  }
  assert_eq!(keys(&cache, Segment::Probation), vec!["a0", "a1", "a2", "a3", "a4"]);
  assert_eq!(cache.weight().unwrap(), 500);

  cache.put_with_score("a0", 100, 5.0).unwrap();
  assert_eq!(cache.get("a4").unwrap(), Some(100));
  assert_eq!(keys(&cache, Segment::Protected), vec!["a0", "a4"]);
  assert_eq!(keys(&cache, Segment::Probation), vec!["a1", "a2", "a3"]);

  // Scores stay far below wall-clock time, so the later gets and puts above
  // never interleave with these.
  for i in 5..10 {
    cache.put_with_score(&format!("a{i}"), 100, 10.0 + i as f64).unwrap();
    settle(&cache);
  }

  let evicted: Vec<String> = (0..5)
    .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap().0)
    .collect();
  assert_eq!(evicted, vec!["a1", "a2", "a3", "a5", "a6"]);
  assert_eq!(keys(&cache, Segment::Probation), vec!["a7", "a8", "a9"]);
  assert_eq!(keys(&cache, Segment::Protected), vec!["a0", "a4"]);
  assert_eq!(cache.weight().unwrap(), 500);
  assert_eq!(cache.count().unwrap(), 5);
}

#[test]
fn test_capacity_invariant_holds_after_settling() {
  let cache = build_test_cache("invariant", 1_000);
  for i in 0..200u64 {
    let key = format!("k{}", i % 37);
    cache.put(&key, 10 + i % 90).unwrap();
    if i % 3 == 0 {
      cache.get(&format!("k{}", i % 11)).unwrap();
    }
  }
  settle(&cache);

  let probation = cache.segment_weight(Segment::Probation).unwrap();
  let protected = cache.segment_weight(Segment::Protected).unwrap();
  assert!(cache.weight().unwrap() <= 1_000);
  assert_eq!(probation + protected, cache.weight().unwrap());
}

#[test]
fn test_probation_is_emptied_before_protected() {
  let cache = build_test_cache("probation-first", 300);
  for (i, key) in ["p1", "p2", "p3"].into_iter().enumerate() {
    cache.put_with_score(key, 100, i as f64).unwrap();
    cache.put_with_score(key, 100, 10.0 + i as f64).unwrap();
  }
  for (i, key) in ["n1", "n2"].into_iter().enumerate() {
    cache.put_with_score(key, 100, 20.0 + i as f64).unwrap();
  }
  settle(&cache);

  assert_eq!(keys(&cache, Segment::Protected), vec!["p1", "p2", "p3"]);
  assert!(keys(&cache, Segment::Probation).is_empty());
}

#[test]
fn test_eviction_is_fifo_within_a_segment() {
  let cache = build_test_cache("fifo", 0);
  let (listener, rx) = ChannelListener::new();
  cache.add_eldest_removed_listener(listener);
  for i in 0..10 {
    cache.put_with_score(&format!("k{i}"), 1, i as f64).unwrap();
  }

  cache.set_max_weight(6);
  cache.put_with_score("k10", 1, 10.0).unwrap();
  settle(&cache);

  let evicted: Vec<String> = common::drain(&rx, Duration::from_millis(200))
    .into_iter()
    .map(|(key, _)| key)
    .collect();
  assert_eq!(evicted, vec!["k0", "k1", "k2", "k3", "k4"]);
}

#[test]
fn test_eldest_key_predicts_the_next_victim() {
  let cache = build_test_cache("eldest", 15);
  let (listener, rx) = ChannelListener::new();
  cache.add_eldest_removed_listener(listener);
  assert_eq!(cache.eldest_key().unwrap(), None);

  cache.put_with_score("protected", 5, 0.0).unwrap();
  cache.put_with_score("protected", 5, 1.0).unwrap();
  assert_eq!(cache.eldest_key().unwrap(), Some("protected".to_string()));

  cache.put_with_score("young", 5, 2.0).unwrap();
  cache.put_with_score("younger", 5, 3.0).unwrap();
  assert_eq!(cache.eldest_key().unwrap(), Some("young".to_string()));

  for i in 0..4 {
    let expected = cache.eldest_key().unwrap().unwrap();
    cache.put_with_score(&format!("k{i}"), 5, 10.0 + i as f64).unwrap();
    let (victim, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(victim, expected);
  }
  assert!(cache.contains_key("protected").unwrap());
}

#[test]
fn test_promotion_happens_exactly_once() {
  let cache = build_test_cache("promotion", 0);
  cache.put("a", 10).unwrap();
  assert_eq!(cache.segment_of("a").unwrap(), Some(Segment::Probation));

  assert_eq!(cache.get("a").unwrap(), Some(10));
  assert_eq!(cache.segment_of("a").unwrap(), Some(Segment::Protected));
  assert_eq!(cache.get("a").unwrap(), Some(10));
  assert_eq!(cache.put("a", 12).unwrap(), Some(10));

  assert_eq!(keys(&cache, Segment::Protected), vec!["a"]);
  assert!(keys(&cache, Segment::Probation).is_empty());
  assert_eq!(cache.segment_weight(Segment::Protected).unwrap(), 12);
  assert_eq!(cache.segment_weight(Segment::Probation).unwrap(), 0);

  let metrics = cache.metrics();
  assert_eq!(metrics.promotions, 1);
  assert_eq!(metrics.hits, 2);
}

#[test]
fn test_absent_keys_are_not_errors() {
  let cache = build_test_cache("absent", 0);
  assert_eq!(cache.get("missing").unwrap(), None);
  assert_eq!(cache.remove("missing").unwrap(), None);
  assert!(!cache.contains_key("missing").unwrap());
  assert_eq!(cache.metrics().misses, 1);
}

#[test]
fn test_uncountable_weights_are_rejected() {
  let cache = build_test_cache("huge", 100);
  cache.put("small", 60).unwrap();

  let err = cache.put("huge", u64::MAX).unwrap_err();
  assert!(matches!(err, Error::WeightOverflow { ref key, weight: u64::MAX, .. } if key == "huge"));
  assert!(!cache.contains_key("huge").unwrap());
  assert_eq!(cache.weight().unwrap(), 60);
  assert_eq!(cache.count().unwrap(), 1);

  // Bookkeeping still works and still evicts after the rejection.
  cache.put("next", 60).unwrap();
  settle(&cache);
  assert_eq!(cache.keys(Segment::Probation).unwrap(), vec!["next"]);
}

#[test]
fn test_weigher_output_is_range_checked() {
  common::init_tracing();
  let cache = CacheBuilder::new("huge-weigher")
    .max_weight(100)
    .weigher(|key: &str, value: u64| if key == "bomb" { u64::MAX } else { value })
    .build()
    .unwrap();

  assert!(matches!(cache.put("bomb", 1), Err(Error::WeightOverflow { .. })));
  assert_eq!(cache.weight().unwrap(), 0);
  assert_eq!(cache.metrics().inserts, 0);
}
