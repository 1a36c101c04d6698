//! The owner of cached bytes on local disk.
//!
//! Each key maps to one file under the cache directory. Writes land in a
//! temporary file first and are renamed into place, then bookkept with the
//! file size as value. Eviction deletes files through an eldest-removed
//! listener; this is the only place cached bytes are deleted.

use crate::error::{Error, Result};
use crate::handles::SlruCache;
use crate::listener::{EldestRemovedListener, ListenerError, ListenerHandle};
use crate::reconcile::{self, ReconcileReport};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

/// Directory under the cache root holding in-flight writes. Keys may not
/// start with it.
pub const TEMP_DIR: &str = "temp";

/// Maps a key to its path under `root`. Keys are relative paths made only of
/// normal components, so they cannot escape the root.
pub(crate) fn resolve_key(root: &Path, key: &str) -> Result<PathBuf> {
  let relative = Path::new(key);
  let valid = !key.is_empty()
    && relative
      .components()
      .all(|component| matches!(component, Component::Normal(_)));
  if !valid {
    return Err(Error::InvalidKey(key.to_string()));
  }
  Ok(root.join(relative))
}

/// Removes a file, treating "already gone" as success. Returns whether the
/// file existed.
fn remove_if_present(path: &Path) -> io::Result<bool> {
  match fs::remove_file(path) {
    Ok(()) => Ok(true),
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
    Err(err) => Err(err),
  }
}

/// Removes now-empty directories from `dir` up to, but excluding, `root`.
fn prune_empty_dirs(root: &Path, dir: Option<&Path>) {
  let mut current = dir;
  while let Some(dir) = current {
    if dir == root || !dir.starts_with(root) || fs::remove_dir(dir).is_err() {
      break;
    }
    current = dir.parent();
  }
}

/// Deletes the backing file of every evicted key.
struct FileEvictionListener {
  root: PathBuf,
}

impl EldestRemovedListener for FileEvictionListener {
  fn on_eldest_removed(&self, key: &str, value: u64) -> Result<(), ListenerError> {
    let path = resolve_key(&self.root, key)?;
    if remove_if_present(&path)? {
      tracing::info!(key = key, size = value, path = %path.display(), "Deleted evicted cache file");
      prune_empty_dirs(&self.root, path.parent());
    } else {
      // Bookkept by another node; nothing to free here.
      tracing::debug!(key = key, path = %path.display(), "Evicted cache file not present locally");
    }
    Ok(())
  }
}

/// A directory of cached blobs whose occupancy is bounded by an [`SlruCache`].
///
/// The index must have a cache directory; files are stored beneath it.
#[derive(Debug)]
pub struct LocalFileCache {
  root: PathBuf,
  temp: PathBuf,
  index: SlruCache,
  listener: ListenerHandle,
}

impl LocalFileCache {
  /// Opens the file cache rooted at the index's cache directory and wires
  /// eviction to file deletion.
  pub fn new(index: SlruCache) -> Result<Self> {
    let root = index
      .cache_dir()
      .ok_or_else(|| Error::MissingCacheDir(index.name().to_string()))?
      .to_path_buf();
    let temp = root.join(TEMP_DIR);
    fs::create_dir_all(&temp)?;

    let listener = index.add_eldest_removed_listener(FileEvictionListener { root: root.clone() });
    Ok(Self {
      root,
      temp,
      index,
      listener,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn index(&self) -> &SlruCache {
    &self.index
  }

  fn locate(&self, key: &str) -> Result<PathBuf> {
    let reserved = Path::new(key)
      .components()
      .next()
      .is_some_and(|first| first.as_os_str() == TEMP_DIR);
    if reserved {
      return Err(Error::InvalidKey(key.to_string()));
    }
    resolve_key(&self.root, key)
  }

  /// Writes `bytes` as the content of `key` and bookkeeps it.
  pub fn store(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
    let target = self.locate(key)?;
    let mut tmp = NamedTempFile::new_in(&self.temp)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    self.commit(key, tmp, &target, bytes.len() as u64)
  }

  /// Streams `reader` into the file for `key` and bookkeeps it.
  pub fn store_from<R: Read>(&self, key: &str, reader: &mut R) -> Result<PathBuf> {
    let target = self.locate(key)?;
    let mut tmp = NamedTempFile::new_in(&self.temp)?;
    let size = io::copy(reader, &mut tmp)?;
    tmp.as_file().sync_all()?;
    self.commit(key, tmp, &target, size)
  }

  /// Moves an existing file into the cache as `key`.
  pub fn store_file(&self, key: &str, source: &Path) -> Result<PathBuf> {
    let target = self.locate(key)?;
    let size = fs::metadata(source)?.len();
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    if fs::rename(source, &target).is_err() {
      // Likely a different filesystem; fall back to copy and delete.
      fs::copy(source, &target)?;
      remove_if_present(source)?;
    }
    self.admit(key, &target, size)?;
    Ok(target)
  }

  fn commit(&self, key: &str, tmp: NamedTempFile, target: &Path, size: u64) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    tmp.persist(target).map_err(|err| err.error)?;
    self.admit(key, target, size)?;
    Ok(target.to_path_buf())
  }

  /// Bookkeeps a file already in place. A file the index does not know about
  /// would never be evicted or reconciled, so it is deleted if bookkeeping
  /// fails.
  fn admit(&self, key: &str, target: &Path, size: u64) -> Result<()> {
    if let Err(err) = self.index.put(key, size) {
      match remove_if_present(target) {
        Ok(_) => prune_empty_dirs(&self.root, target.parent()),
        Err(cleanup) => {
          tracing::warn!(key = key, path = %target.display(), error = %cleanup, "Failed to delete unbookkept cache file");
        }
      }
      return Err(err);
    }
    Ok(())
  }

  /// Returns the path of the cached file for `key`, touching its
  /// bookkeeping. A file present on disk but unknown to the index is
  /// admitted again with its current size.
  pub fn load(&self, key: &str) -> Result<Option<PathBuf>> {
    let path = self.locate(key)?;
    let size = match fs::metadata(&path) {
      Ok(meta) if meta.is_file() => meta.len(),
      Ok(_) => return Ok(None),
      Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(err) => return Err(err.into()),
    };
    if self.index.get(key)?.is_none() {
      self.index.put(key, size)?;
    }
    Ok(Some(path))
  }

  /// Opens the cached file for `key`. A file evicted between lookup and open
  /// reads as absent.
  pub fn open(&self, key: &str) -> Result<Option<File>> {
    let Some(path) = self.load(key)? else {
      return Ok(None);
    };
    match File::open(path) {
      Ok(file) => Ok(Some(file)),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err.into()),
    }
  }

  /// Whether the file for `key` is present on this node.
  pub fn exist(&self, key: &str) -> Result<bool> {
    self.locate(key)?;
    reconcile::is_resident(&self.root, key)
  }

  /// Deletes the file for `key` and its bookkeeping. Returns the bookkept
  /// value, if there was one.
  pub fn remove(&self, key: &str) -> Result<Option<u64>> {
    let path = self.locate(key)?;
    let removed = self.index.remove(key)?;
    if remove_if_present(&path)? {
      prune_empty_dirs(&self.root, path.parent());
    }
    Ok(removed)
  }

  /// Drops bookkeeping for keys whose files are not on this node.
  pub fn sync(&self) -> Result<ReconcileReport> {
    self.index.sync()
  }
}

impl Drop for LocalFileCache {
  fn drop(&mut self) {
    self.index.remove_eldest_removed_listener(self.listener);
  }
}
