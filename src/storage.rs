//! Pluggable persistence (spec.md 6). Grounded on the teacher's
//! `save_to_db`/`load_from_db` pair (`context.rs`), but expressed as a
//! narrow trait the core consumes rather than a capability the core
//! embeds: storage is "an interface the core consumes; provide
//! in-memory and file-based default implementations" (Design Note,
//! spec.md 9), so `sled` itself is not pulled into this crate.
//!
//! Reserved keys: `kontext:actions`, `kontext:tasks`, `kontext:anomalies`,
//! `kontext:chain`. A missing store is a cold start, not an error.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde_json::Value as Json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on key {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("stored value for key {0:?} is not valid JSON")]
    Corrupt(String),
}

pub trait StorageAdapter: Send + Sync {
    fn save(&mut self, key: &str, value: &Json) -> Result<(), StorageError>;
    fn load(&self, key: &str) -> Result<Option<Json>, StorageError>;
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Default adapter: nothing survives process exit. Useful for tests and
/// for callers that persist through some other mechanism entirely.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: BTreeMap<String, Json>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for InMemoryStorage {
    fn save(&mut self, key: &str, value: &Json) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Json>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under `root`, holding the value as canonical JSON.
/// Grounded on the teacher's trade_id-as-key convention, but the key is
/// slugified into a filename since it may contain the `:` from the
/// reserved `kontext:*` namespace.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", slugify(key)))
    }
}

/// Maps a storage key to a filesystem-safe filename stem. Applied to
/// both keys and key prefixes so `keys(prefix)` compares like with
/// like (`"kontext:"` and `"kontext:actions"` both slugify to
/// `"kontext_"`/`"kontext_actions"`).
fn slugify(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl StorageAdapter for FileStorage {
    fn save(&mut self, key: &str, value: &Json) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let canonical = crate::value::canonicalize_json(value);
        fs::write(&path, canonical).map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })
    }

    fn load(&self, key: &str) -> Result<Option<Json>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|_| StorageError::Corrupt(key.to_string())),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let slug_prefix = slugify(prefix);
        let mut found = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|source| StorageError::Io {
            key: self.root.display().to_string(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                key: self.root.display().to_string(),
                source,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                let key = name.trim_end_matches(".json");
                if key.starts_with(&slug_prefix) {
                    found.push(key.to_string());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Best-effort flush helper: logs and swallows storage errors rather
/// than rolling back in-memory state (spec.md 7: "storage-adapter errors
/// during best-effort flush are logged but do not roll back").
pub fn best_effort_save(storage: &mut dyn StorageAdapter, key: &str, value: &Json) {
    if let Err(err) = storage.save(key, value) {
        warn!(key, error = %err, "storage flush failed, continuing with in-memory state only");
    }
}
