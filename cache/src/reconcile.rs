//! Reconciliation of shared bookkeeping against this node's cache directory.
//!
//! Bookkeeping may outlive a process restart or describe files another
//! process downloaded. Keys whose backing file is missing here are dropped
//! from bookkeeping without calling eviction listeners.

use crate::error::{Error, Result};
use crate::file_cache::resolve_key;
use crate::metrics::Metrics;
use crate::policy::slru::SlruPolicy;
use crate::store::Segment;

use std::fs;
use std::io;
use std::path::Path;

/// The outcome of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  /// Bookkept keys that were examined.
  pub checked: u64,
  /// Keys dropped because their file is not present on this node.
  pub removed: u64,
  /// Keys (or whole segments) that could not be checked or removed.
  pub failed: u64,
}

/// Whether the regular file backing `key` exists under `root`.
pub(crate) fn is_resident(root: &Path, key: &str) -> Result<bool> {
  let path = resolve_key(root, key)?;
  match fs::metadata(&path) {
    Ok(meta) => Ok(meta.is_file()),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(err) => Err(err.into()),
  }
}

pub(crate) fn reconcile(policy: &SlruPolicy, root: &Path, metrics: &Metrics) -> ReconcileReport {
  let cache = policy.layout().name();
  let mut report = ReconcileReport::default();
  tracing::info!(cache = cache, root = %root.display(), "Reconciling cache bookkeeping");

  for segment in Segment::ALL {
    let keys = match policy.keys(segment) {
      Ok(keys) => keys,
      Err(err) => {
        report.failed += 1;
        tracing::warn!(cache = cache, segment = %segment, error = %err, "Failed to list bookkept keys");
        continue;
      }
    };

    for key in keys {
      report.checked += 1;
      match reconcile_key(policy, root, &key) {
        Ok(true) => {
          report.removed += 1;
          Metrics::bump(&metrics.reconciled);
          tracing::info!(cache = cache, key = key.as_str(), "Cache file does not exist, dropped from bookkeeping");
        }
        Ok(false) => {}
        Err(err) => {
          report.failed += 1;
          tracing::warn!(cache = cache, key = key.as_str(), error = %err, "Failed to reconcile key");
        }
      }
    }
  }

  tracing::info!(
    cache = cache,
    checked = report.checked,
    removed = report.removed,
    failed = report.failed,
    "Reconciliation finished"
  );
  report
}

/// Returns `true` if the key was dropped. A key that cannot name a file
/// under `root` is never resident here.
fn reconcile_key(policy: &SlruPolicy, root: &Path, key: &str) -> Result<bool> {
  match is_resident(root, key) {
    Ok(true) => return Ok(false),
    Ok(false) => {}
    Err(Error::InvalidKey(_)) => {
      tracing::debug!(cache = policy.layout().name(), key = key, "Bookkept key is not a valid cache path");
    }
    Err(err) => return Err(err),
  }
  policy.discard(key)
}
