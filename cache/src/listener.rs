use crate::metrics::Metrics;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// The error type eviction listeners report failures with.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A listener that can be registered with the cache to receive notifications
/// when the eldest entries are evicted for capacity.
///
/// `on_eldest_removed` is called with the evicted key and its stored value on
/// the cache's eviction thread. By the time it runs the key is already gone
/// from bookkeeping; a failure (or panic) is logged and does not bring it back.
/// Explicit removals and reconciliation never call listeners.
pub trait EldestRemovedListener: Send + Sync {
  fn on_eldest_removed(&self, key: &str, value: u64) -> Result<(), ListenerError>;
}

impl<F> EldestRemovedListener for F
where
  F: Fn(&str, u64) -> Result<(), ListenerError> + Send + Sync,
{
  fn on_eldest_removed(&self, key: &str, value: u64) -> Result<(), ListenerError> {
    self(key, value)
  }
}

/// An opaque handle returned on registration, used to unregister a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Registered = (ListenerHandle, Arc<dyn EldestRemovedListener>);

/// The set of registered listeners, shared between the cache handle and its
/// eviction thread.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
  next_id: AtomicU64,
  listeners: RwLock<Vec<Registered>>,
}

impl ListenerRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn register(&self, listener: Arc<dyn EldestRemovedListener>) -> ListenerHandle {
    let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.listeners.write().push((handle, listener));
    handle
  }

  pub(crate) fn unregister(&self, handle: ListenerHandle) -> bool {
    let mut listeners = self.listeners.write();
    let before = listeners.len();
    listeners.retain(|(registered, _)| *registered != handle);
    listeners.len() != before
  }

  pub(crate) fn len(&self) -> usize {
    self.listeners.read().len()
  }

  /// Invokes every listener for one evicted key, isolating failures per
  /// listener. Returns the number of listeners that failed.
  pub(crate) fn notify(&self, key: &str, value: u64, metrics: &Metrics) -> usize {
    // Snapshot so a listener may register or unregister without deadlocking.
    let snapshot: Vec<Registered> = self.listeners.read().clone();
    let mut failures = 0;

    for (handle, listener) in snapshot {
      let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_eldest_removed(key, value)));
      let failure = match outcome {
        Ok(Ok(())) => continue,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
      };
      failures += 1;
      metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
      tracing::warn!(
        key = key,
        value = value,
        listener = handle.0,
        error = %failure,
        "Eldest-removed listener failed"
      );
    }

    failures
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(msg) = payload.downcast_ref::<&str>() {
    format!("panicked: {msg}")
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    format!("panicked: {msg}")
  } else {
    "panicked".to_string()
  }
}
