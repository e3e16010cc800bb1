/*!
cache.rs - local transfer cache.

Persistent mapping of relative file path -> (mtime, size) used to skip
re-uploading unchanged files. Stored as a single JSON object in the working
directory; the store is a snapshot, not an incremental merge: each upload
pass builds a fresh cache from its outcomes and replaces the file wholesale.

Failure policy: a missing, unreadable, or structurally invalid store loads
as an empty cache; a failed save is logged. Neither is ever fatal to the
calling command. No other module touches the store file directly.
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{log_debug, log_warn};

/// Store file name, kept in the synchronized working directory itself
/// (and therefore excluded from the upload scan).
pub const CACHE_FILE_NAME: &str = ".docker_builder_upload_cache.json";

/// One previously-uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Filesystem modification time, seconds since the epoch.
    pub mtime: f64,
    /// File size in bytes.
    pub size: u64,
}

impl CacheEntry {
    /// Unchanged iff both fields exactly match the current filesystem values.
    pub fn matches(&self, mtime: f64, size: u64) -> bool {
        self.mtime == mtime && self.size == size
    }
}

/// In-memory view of the store. Single reader then single writer per pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl UploadCache {
    pub fn store_path(dir: &Path) -> PathBuf {
        dir.join(CACHE_FILE_NAME)
    }

    /// Load the cache from `dir`. Never fails: absent, unreadable, or
    /// malformed stores yield an empty cache (with a warning for the
    /// malformed case).
    pub fn load(dir: &Path) -> Self {
        let path = Self::store_path(dir);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log_debug!("Upload cache file not found: {}. Starting fresh.", path.display());
                return Self::default();
            }
            Err(e) => {
                log_warn!("Error loading upload cache from {}: {e}. Ignoring cache.", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<BTreeMap<String, CacheEntry>>(&raw) {
            Ok(entries) => {
                log_debug!("Loaded {} items from upload cache: {}", entries.len(), path.display());
                Self { entries }
            }
            Err(e) => {
                log_warn!("Invalid cache file format in {}: {e}. Ignoring cache.", path.display());
                Self::default()
            }
        }
    }

    /// Overwrite the store in `dir` with this cache. Failure is logged,
    /// never propagated.
    pub fn save(&self, dir: &Path) {
        let path = Self::store_path(dir);
        let serialized = match serde_json::to_string_pretty(&self.entries) {
            Ok(s) => s,
            Err(e) => {
                log_warn!("Error serializing upload cache: {e}");
                return;
            }
        };
        match std::fs::write(&path, serialized) {
            Ok(()) => {
                log_debug!("Saved {} items to upload cache: {}", self.entries.len(), path.display());
            }
            Err(e) => {
                log_warn!("Error saving upload cache to {}: {e}", path.display());
            }
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<&CacheEntry> {
        self.entries.get(relative_path)
    }

    pub fn insert(&mut self, relative_path: String, entry: CacheEntry) {
        self.entries.insert(relative_path, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
