//! File-backed read-through cache rooted at `<dataset_source>/<model_identity>/`.
//!
//! Presence of a key is the only freshness signal: entries are never expired
//! or version-checked. Writes are last-writer-wins.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Key into the cache namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `meta/<map_name>.json`
    Meta(String),
    /// `knowledge/<map_name>.json`
    Knowledge(String),
    /// `component/<question_type | relations>.json`
    Component(String),
    /// `det/<map_name>/<crop>_<index>.png`
    Detection {
        map: String,
        crop: String,
        index: usize,
    },
}

impl CacheKey {
    pub fn relations() -> Self {
        CacheKey::Component("relations".to_string())
    }

    pub fn detection(map: &str, crop: &str, index: usize) -> Self {
        CacheKey::Detection {
            map: map.to_string(),
            crop: crop.to_string(),
            index,
        }
    }

    /// Path of the entry relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        match self {
            CacheKey::Meta(name) => Path::new("meta").join(format!("{}.json", segment(name))),
            CacheKey::Knowledge(name) => {
                Path::new("knowledge").join(format!("{}.json", segment(name)))
            }
            CacheKey::Component(name) => {
                Path::new("component").join(format!("{}.json", segment(name)))
            }
            CacheKey::Detection { map, crop, index } => Path::new("det")
                .join(segment(map))
                .join(format!("{}_{}.png", segment(crop), index)),
        }
    }
}

/// Keep key parts from escaping their namespace directory.
fn segment(part: &str) -> String {
    part.replace(['/', '\\'], "_").replace("..", "_")
}

/// Minimal key/value cache interface used by every pipeline stage
pub trait CacheStore: Send + Sync {
    /// Raw bytes for a key, `None` on miss
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;

    /// Store raw bytes under a key, replacing any previous entry
    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()>;

    fn exists(&self, key: &CacheKey) -> bool;
}

/// Typed JSON helpers over any [`CacheStore`]
pub trait CacheStoreExt: CacheStore {
    fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.put(key, &bytes)
    }
}

impl<S: CacheStore + ?Sized> CacheStoreExt for S {}

/// Cache stored as plain files under a root directory
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl CacheStore for FileCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(key);
        match std::fs::read(&path) {
            Ok(bytes) => {
                log::debug!("Cache hit: {}", path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Cache miss: {}", path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    fn exists(&self, key: &CacheKey) -> bool {
        self.path_of(key).is_file()
    }
}
