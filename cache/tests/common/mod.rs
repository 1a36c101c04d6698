#![allow(dead_code)]

use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use blobcache::{CacheBuilder, EldestRemovedListener, ListenerError, SlruCache};

/// Routes crate logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// Polls `condition` until it holds or `timeout` elapses. Eviction runs on a
/// background thread, so tests wait for it to settle.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    thread::sleep(Duration::from_millis(5));
  }
}

/// Waits for the evictor to bring `cache` within its bound.
pub fn settle(cache: &SlruCache) {
  let max = cache.max_weight();
  assert!(
    wait_until(Duration::from_secs(5), || cache.weight().unwrap() <= max),
    "eviction did not settle: weight {} > {}",
    cache.weight().unwrap(),
    max
  );
}

pub fn build_test_cache(name: &str, max_weight: u64) -> SlruCache {
  init_tracing();
  CacheBuilder::new(name).max_weight(max_weight).build().unwrap()
}

/// Forwards every eviction to a channel.
pub struct ChannelListener {
  sender: Mutex<mpsc::Sender<(String, u64)>>,
}

impl ChannelListener {
  pub fn new() -> (Self, mpsc::Receiver<(String, u64)>) {
    let (tx, rx) = mpsc::channel();
    (Self { sender: Mutex::new(tx) }, rx)
  }
}

impl EldestRemovedListener for ChannelListener {
  fn on_eldest_removed(&self, key: &str, value: u64) -> Result<(), ListenerError> {
    self.sender.lock().unwrap().send((key.to_string(), value))?;
    Ok(())
  }
}

/// Collects every eviction currently queued on `rx`, waiting up to
/// `timeout` for each.
pub fn drain(rx: &mpsc::Receiver<(String, u64)>, timeout: Duration) -> Vec<(String, u64)> {
  let mut seen = Vec::new();
  while let Ok(item) = rx.recv_timeout(timeout) {
    seen.push(item);
  }
  seen
}
