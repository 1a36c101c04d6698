use crate::listener::ListenerRegistry;
use crate::metrics::Metrics;
use crate::policy::slru::SlruPolicy;
use crate::task::evictor::Evictor;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared {
  pub(crate) policy: Arc<SlruPolicy>,
  pub(crate) listeners: Arc<ListenerRegistry>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) evictor: Option<Evictor>,
  pub(crate) cache_dir: Option<PathBuf>,
  pub(crate) capacity: u64,
}

impl fmt::Debug for CacheShared {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("name", &self.policy.layout().name())
      .field("cache_dir", &self.cache_dir)
      .field("capacity", &self.capacity)
      .field("max_weight", &self.policy.max_weight())
      .field("listeners", &self.listeners.len())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl Drop for CacheShared {
  fn drop(&mut self) {
    if let Some(evictor) = self.evictor.take() {
      evictor.stop();
    }
  }
}

impl CacheShared {
  /// Wakes the evictor if the last write pushed the cache over capacity.
  pub(crate) fn signal_if_over_capacity(&self) {
    let Some(evictor) = &self.evictor else {
      return;
    };
    match self.policy.over_capacity() {
      Ok(true) => evictor.signal(),
      Ok(false) => {}
      // Let the evictor find out for itself.
      Err(_) => evictor.signal(),
    }
  }
}
