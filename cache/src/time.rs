use std::time::{SystemTime, UNIX_EPOCH};

/// The default ordering score for a bookkeeping write: wall-clock
/// milliseconds since the Unix epoch, with microsecond fraction.
/// Scores from different processes sharing one store are compared directly.
#[inline]
pub(crate) fn now_score() -> f64 {
  let since_epoch = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default();
  since_epoch.as_micros() as f64 / 1000.0
}
