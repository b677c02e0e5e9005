//! Local model files and the process-wide loaded-model cache
//!
//! [`ModelStore`] maps a model key such as `YOLOv8_Small_RDD` to
//! `<models_dir>/YOLOv8_Small_RDD.pt`. [`ModelCache`] loads each model once and
//! shares it between sessions; a model is unloaded when its last
//! [`ModelLease`] is dropped.

use crate::adapter::Detector;
use crate::error::{MediaError, MediaResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// File extension of model weights
pub const MODEL_EXTENSION: &str = "pt";

/// Model used when a session does not name one
pub const DEFAULT_MODEL: &str = "YOLOv8_Small_RDD";

/// Directory of locally available model files
#[derive(Debug, Clone)]
pub struct ModelStore {
    models_dir: PathBuf,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Canonical key for `key`, with any `.pt` suffix removed.
    ///
    /// Keys must be a bare file stem; separators and `..` are rejected.
    pub fn normalize_key(key: &str) -> MediaResult<String> {
        let trimmed = key.trim();
        let stem = trimmed
            .strip_suffix(&format!(".{}", MODEL_EXTENSION))
            .unwrap_or(trimmed);

        if stem.is_empty()
            || stem.starts_with('.')
            || stem.contains(['/', '\\'])
            || stem.contains("..")
        {
            return Err(MediaError::InvalidConfiguration {
                message: format!("invalid model key {:?}", key),
            });
        }
        Ok(stem.to_string())
    }

    /// Where the file for `key` lives, whether or not it exists
    pub fn path_for(&self, key: &str) -> MediaResult<PathBuf> {
        let stem = Self::normalize_key(key)?;
        Ok(self
            .models_dir
            .join(format!("{}.{}", stem, MODEL_EXTENSION)))
    }

    /// Path of an existing model file
    pub fn resolve(&self, key: &str) -> MediaResult<PathBuf> {
        let path = self.path_for(key)?;
        if !path.is_file() {
            return Err(MediaError::ModelNotFound {
                model: key.to_string(),
                path,
            });
        }
        Ok(path)
    }

    /// Keys of all model files present, sorted.
    ///
    /// A missing models directory yields an empty list.
    pub fn list(&self) -> MediaResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(MODEL_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Turns a model file into a ready [`Detector`]
pub trait ModelLoader: Send + Sync {
    fn load(&self, key: &str, path: &Path) -> MediaResult<Arc<dyn Detector>>;
}

struct CacheEntry {
    detector: Arc<dyn Detector>,
    leases: usize,
}

type Entries = Mutex<HashMap<String, CacheEntry>>;

/// Reference-counted cache of loaded models
#[derive(Clone)]
pub struct ModelCache {
    store: ModelStore,
    loader: Arc<dyn ModelLoader>,
    entries: Arc<Entries>,
}

impl ModelCache {
    pub fn new(store: ModelStore, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            store,
            loader,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Lease the model for `key`, loading it on first use.
    ///
    /// Loading happens under the cache lock, so concurrent first requests for
    /// a model load it once.
    pub fn acquire(&self, key: &str) -> MediaResult<ModelLease> {
        let key = ModelStore::normalize_key(key)?;
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            entry.leases += 1;
            debug!("Reusing model {} ({} leases)", key, entry.leases);
            return Ok(ModelLease {
                key,
                detector: entry.detector.clone(),
                entries: Some(Arc::downgrade(&self.entries)),
            });
        }

        let path = self.store.resolve(&key)?;
        let detector = self.loader.load(&key, &path)?;
        info!("Loaded model {} from {}", key, path.display());

        entries.insert(
            key.clone(),
            CacheEntry {
                detector: detector.clone(),
                leases: 1,
            },
        );
        Ok(ModelLease {
            key,
            detector,
            entries: Some(Arc::downgrade(&self.entries)),
        })
    }

    /// Whether `key` is currently loaded
    pub fn is_loaded(&self, key: &str) -> bool {
        match ModelStore::normalize_key(key) {
            Ok(key) => self.entries.lock().contains_key(&key),
            Err(_) => false,
        }
    }

    /// Outstanding leases for `key`
    pub fn lease_count(&self, key: &str) -> usize {
        match ModelStore::normalize_key(key) {
            Ok(key) => self
                .entries
                .lock()
                .get(&key)
                .map(|entry| entry.leases)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Number of loaded models
    pub fn loaded_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("store", &self.store)
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

/// Shared handle to a loaded model; releases its cache slot on drop
pub struct ModelLease {
    key: String,
    detector: Arc<dyn Detector>,
    entries: Option<Weak<Entries>>,
}

impl ModelLease {
    /// Lease that is not tracked by any cache
    pub fn detached(key: impl Into<String>, detector: Arc<dyn Detector>) -> Self {
        Self {
            key: key.into(),
            detector,
            entries: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Deref for ModelLease {
    type Target = dyn Detector;

    fn deref(&self) -> &Self::Target {
        self.detector.as_ref()
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        let Some(entries) = self.entries.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let mut entries = entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases == 0 {
                entries.remove(&self.key);
                info!("Unloaded model {}", self.key);
            }
        }
    }
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease")
            .field("key", &self.key)
            .field("tracked", &self.entries.is_some())
            .finish()
    }
}
