use crate::listener::ListenerRegistry;
use crate::policy::slru::SlruPolicy;

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fibre::mpsc;

/// A context object holding the thread-safe parts of the cache that the
/// evictor needs to access.
pub(crate) struct EvictorContext {
  pub(crate) policy: Arc<SlruPolicy>,
  pub(crate) listeners: Arc<ListenerRegistry>,
  pub(crate) max_evictions_per_pass: usize,
}

/// The background task responsible for bringing the cache back under its
/// capacity after writes.
///
/// Writers never evict themselves; they send a "re-check capacity" signal.
/// The signal channel holds a single slot, so signals sent while one is
/// already pending coalesce into it.
pub(crate) struct Evictor {
  _handle: JoinHandle<()>,
  sender: mpsc::BoundedSender<()>,
}

impl Evictor {
  /// Spawns a new evictor thread.
  pub(crate) fn spawn(context: EvictorContext) -> Self {
    let (tx, rx): (mpsc::BoundedSender<()>, mpsc::BoundedReceiver<()>) = mpsc::bounded(1);

    let handle = thread::spawn(move || {
      // The loop ends when the cache handle drops its sender.
      while rx.recv().is_ok() {
        Self::run(&context);
      }
      tracing::debug!(cache = context.policy.layout().name(), "Evictor stopped");
    });

    Self {
      _handle: handle,
      sender: tx,
    }
  }

  /// Runs passes until the cache is within capacity. Store failures end the
  /// run; the next signal retries.
  fn run(context: &EvictorContext) {
    let cache = context.policy.layout().name();
    let mut evicted = 0;

    loop {
      match context
        .policy
        .evict_pass(context.max_evictions_per_pass, &context.listeners)
      {
        Ok(pass) => {
          evicted += pass.evicted;
          if !pass.limit_reached {
            break;
          }
          tracing::info!(
            cache = cache,
            limit = context.max_evictions_per_pass,
            "Eviction pass reached its limit, starting another"
          );
        }
        Err(err) => {
          tracing::error!(cache = cache, error = %err, "Eviction pass failed");
          break;
        }
      }
    }

    if evicted > 0 {
      tracing::info!(cache = cache, evicted = evicted, "Eviction finished");
    }
  }

  /// Asks the evictor to re-check capacity. Never blocks.
  pub(crate) fn signal(&self) {
    let _ = self.sender.try_send(());
  }

  /// Signals the evictor thread to stop once its current run is done.
  pub(crate) fn stop(self) {
    // Dropping the only sender disconnects the channel.
    drop(self.sender);
  }
}
