//! Declarative cache configuration, loadable with any serde format.

use crate::builder::{CacheBuilder, DEFAULT_MAX_EVICTIONS_PER_PASS};
use crate::error::Result;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for one cache, mirroring the [`CacheBuilder`] options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  /// Namespace of the bookkeeping keys.
  pub name: String,
  /// Local directory holding the cached files; required for `sync`.
  pub cache_dir: Option<PathBuf>,
  pub capacity: u64,
  /// Maximum total weight, `0` for unbounded.
  pub max_weight: u64,
  pub protected_share: Option<f64>,
  pub max_evictions_per_pass: usize,
  /// Redis URL of the shared coordination store. Without it the cache keeps
  /// its bookkeeping in process memory.
  pub redis_url: Option<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: String::new(),
      cache_dir: None,
      capacity: 0,
      max_weight: 0,
      protected_share: None,
      max_evictions_per_pass: DEFAULT_MAX_EVICTIONS_PER_PASS,
      redis_url: None,
    }
  }
}

impl CacheBuilder {
  /// Creates a builder from a configuration, connecting to Redis when a
  /// `redis_url` is given.
  pub fn from_config(config: &CacheConfig) -> Result<Self> {
    let mut builder = CacheBuilder::new(config.name.clone())
      .capacity(config.capacity)
      .max_weight(config.max_weight)
      .max_evictions_per_pass(config.max_evictions_per_pass);

    if let Some(dir) = &config.cache_dir {
      builder = builder.cache_dir(dir.clone());
    }
    if let Some(share) = config.protected_share {
      builder = builder.protected_share(share);
    }
    if let Some(url) = &config.redis_url {
      builder = builder.store(connect_redis(url)?);
    }
    Ok(builder)
  }
}

#[cfg(feature = "redis")]
fn connect_redis(url: &str) -> Result<std::sync::Arc<dyn crate::store::CoordinationStore>> {
  Ok(std::sync::Arc::new(crate::store::RedisStore::open(url)?))
}

#[cfg(not(feature = "redis"))]
fn connect_redis(_url: &str) -> Result<std::sync::Arc<dyn crate::store::CoordinationStore>> {
  Err(crate::error::Error::Config(
    "redis_url is set but the 'redis' feature is disabled".to_string(),
  ))
}
