mod common;

use common::init_tracing;

use std::fs;

use blobcache::{CacheBuilder, Error, ListenerError, Segment};
use pretty_assertions::assert_eq;

#[test]
fn test_sync_drops_keys_without_local_files() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  fs::write(dir.path().join("A"), b"present").unwrap();
  let cache = CacheBuilder::new("reconcile").cache_dir(dir.path()).build().unwrap();
  cache.add_eldest_removed_listener(|key: &str, _: u64| -> Result<(), ListenerError> {
    panic!("reconciliation must not notify listeners, got {key}")
  });

  cache.put("A", 7).unwrap();
  cache.put("B", 9).unwrap();
  let report = cache.sync().unwrap();

  assert_eq!(report.checked, 2);
  assert_eq!(report.removed, 1);
  assert_eq!(report.failed, 0);
  assert_eq!(cache.get("A").unwrap(), Some(7));
  assert_eq!(cache.get("B").unwrap(), None);
  assert_eq!(cache.weight().unwrap(), 7);
  assert_eq!(cache.metrics().reconciled, 1);
  assert_eq!(cache.metrics().removals, 0);
  assert_eq!(cache.metrics().listener_failures, 0);
}

#[test]
fn test_sync_checks_both_segments_and_nested_keys() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  fs::create_dir_all(dir.path().join("ab/cd")).unwrap();
  fs::write(dir.path().join("ab/cd/kept"), b"x").unwrap();
  fs::create_dir_all(dir.path().join("ab/gone")).unwrap();
  let cache = CacheBuilder::new("nested").cache_dir(dir.path()).build().unwrap();

  cache.put("ab/cd/kept", 1).unwrap();
  cache.put("ab/cd/kept", 1).unwrap();
  cache.put("ab/cd/lost", 1).unwrap();
  cache.put("ab/cd/lost", 1).unwrap();
  // A directory is not a cached file.
  cache.put("ab/gone", 1).unwrap();

  let report = cache.sync().unwrap();

  assert_eq!(report.removed, 2);
  assert_eq!(cache.keys(Segment::Protected).unwrap(), vec!["ab/cd/kept"]);
  assert!(cache.keys(Segment::Probation).unwrap().is_empty());
}

#[test]
fn test_sync_drops_keys_that_cannot_name_a_local_file() {
  init_tracing();
  let dir = tempfile::tempdir().unwrap();
  let cache = CacheBuilder::new("invalid").cache_dir(dir.path()).build().unwrap();

  cache.put("../escape", 1).unwrap();
  cache.put("missing", 1).unwrap();
  let report = cache.sync().unwrap();

  assert_eq!(report.checked, 2);
  assert_eq!(report.removed, 2);
  assert_eq!(report.failed, 0);
  assert!(!cache.contains_key("../escape").unwrap());
  assert_eq!(cache.count().unwrap(), 0);

  // Nothing is left to fail on the next run.
  assert_eq!(cache.sync().unwrap().checked, 0);
}

#[test]
fn test_sync_requires_a_cache_dir() {
  init_tracing();
  let cache = CacheBuilder::new("no-dir").build().unwrap();
  assert!(matches!(cache.sync(), Err(Error::MissingCacheDir(name)) if name == "no-dir"));
}
