use std::fmt;

use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
  /// The cache was configured without a name. The name namespaces every
  /// bookkeeping key in the coordination store, so it cannot be empty.
  EmptyName,
  /// The protected share must lie strictly between 0 and 1.
  InvalidProtectedShare(f64),
  /// The per-pass eviction limit was set to zero, which would stall eviction.
  ZeroEvictionBatch,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::EmptyName => write!(f, "cache name cannot be empty"),
      BuildError::InvalidProtectedShare(share) => {
        write!(f, "protected share must be in (0, 1), got {}", share)
      }
      BuildError::ZeroEvictionBatch => write!(f, "max evictions per pass cannot be zero"),
    }
  }
}

impl std::error::Error for BuildError {}

/// The main error type for cache operations.
///
/// "Not found" is never an error: lookups return `Ok(None)` for absent keys.
#[derive(Debug, Error)]
pub enum Error {
  #[error("Coordination store failure: {0}")]
  Store(String),

  #[cfg(feature = "redis")]
  #[error("Redis command failed: {0}")]
  Redis(#[from] redis::RedisError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Invalid cache key '{0}'")]
  InvalidKey(String),

  #[error("Weight {weight} of '{key}' exceeds the limit of {max}")]
  WeightOverflow { key: String, weight: u64, max: u64 },

  #[error("Corrupt bookkeeping value for '{key}': {raw}")]
  Corrupt { key: String, raw: String },

  #[error("Cache '{0}' has no cache directory configured")]
  MissingCacheDir(String),

  #[error("Invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Build(#[from] BuildError),
}

/// A specialized `Result` type for cache operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
