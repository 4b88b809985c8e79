//! Durable storage for the permission cache.
//!
//! The cache is persisted as a single JSON document holding a versioned
//! envelope. A document written under a different schema version is treated
//! as absent so an upgrade starts from an empty cache instead of failing.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::PermissionMap;
use crate::error::{Error, Result};

/// Name of the persisted storage slot.
pub const STORE_NAME: &str = "google-permissions-storage";

/// Schema version of the persisted envelope.
pub const STORE_VERSION: u32 = 1;

/// Backend able to load and save the whole permission map.
pub trait PermissionStorage: Send + Sync {
    /// Load the persisted map. `Ok(None)` means nothing usable was stored.
    fn load(&self) -> Result<Option<PermissionMap>>;

    /// Replace the persisted map.
    fn save(&self, permissions: &PermissionMap) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    permissions: PermissionMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    state: PersistedState,
    version: u32,
}

#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    #[serde(default)]
    version: Option<u32>,
}

fn decode(data: &str) -> Result<Option<PermissionMap>> {
    let header: EnvelopeHeader = serde_json::from_str(data)
        .map_err(|e| Error::Storage(format!("Failed to parse {STORE_NAME}: {e}")))?;
    if header.version != Some(STORE_VERSION) {
        info!(
            found = ?header.version,
            expected = STORE_VERSION,
            "Discarding permission cache written under another schema version"
        );
        return Ok(None);
    }
    let envelope: Envelope = serde_json::from_str(data)
        .map_err(|e| Error::Storage(format!("Failed to parse {STORE_NAME}: {e}")))?;
    Ok(Some(envelope.state.permissions))
}

fn encode(permissions: &PermissionMap) -> Result<String> {
    let envelope = Envelope {
        state: PersistedState {
            permissions: permissions.clone(),
        },
        version: STORE_VERSION,
    };
    serde_json::to_string_pretty(&envelope)
        .map_err(|e| Error::Storage(format!("Failed to serialize {STORE_NAME}: {e}")))
}

/// JSON file backed storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Storage file inside `dir`, named after the store slot.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(format!("{STORE_NAME}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PermissionStorage for FileStorage {
    fn load(&self) -> Result<Option<PermissionMap>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        decode(&data)
    }

    fn save(&self, permissions: &PermissionMap) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = encode(permissions)?;
        // Readers only ever see a complete document.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Persisted permission cache");
        Ok(())
    }
}

/// In-memory storage holding the serialized document.
///
/// Goes through the same encode/decode path as [`FileStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the storage with a raw document, as if written by an earlier run.
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(document.into())),
        }
    }

    /// The currently stored raw document, if any.
    pub fn document(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PermissionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<PermissionMap>> {
        match self.document() {
            Some(data) => decode(&data),
            None => Ok(None),
        }
    }

    fn save(&self, permissions: &PermissionMap) -> Result<()> {
        let json = encode(permissions)?;
        *self
            .document
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::PermissionCacheEntry;
    use crate::scopes::{ScopeLevel, ServiceType};

    fn sample() -> PermissionMap {
        let mut map = PermissionMap::new();
        map.entry("acct1".into())
            .or_default()
            .entry(ServiceType::Mail)
            .or_default()
            .insert(
                ScopeLevel::Readonly,
                PermissionCacheEntry {
                    has_access: true,
                    last_checked: 1_700_000_000_000,
                },
            );
        map
    }

    #[test]
    fn file_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::in_dir(dir.path());
        storage.save(&sample()).unwrap();

        let loaded = storage.load().unwrap().unwrap();
        assert!(loaded["acct1"][&ServiceType::Mail][&ScopeLevel::Readonly].has_access);
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let storage = FileStorage::new("/nonexistent/google-permissions-storage.json");
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn persisted_shape_uses_camel_case_envelope() {
        let storage = MemoryStorage::new();
        storage.save(&sample()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&storage.document().unwrap()).unwrap();
        assert_eq!(doc["version"], 1);
        let entry = &doc["state"]["permissions"]["acct1"]["mail"]["readonly"];
        assert_eq!(entry["hasAccess"], true);
        assert_eq!(entry["lastChecked"], 1_700_000_000_000_i64);
    }

    #[test]
    fn version_mismatch_loads_as_empty() {
        let storage = MemoryStorage::with_document(
            r#"{"state":{"permissions":{"acct1":{"mail":{"full":{"hasAccess":true,"lastChecked":1}}}}},"version":0}"#,
        );
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn missing_version_loads_as_empty() {
        let storage = MemoryStorage::with_document(r#"{"permissions":{}}"#);
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn corrupted_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("google-permissions-storage.json");
        std::fs::write(&path, "{ not valid json !!!").unwrap();

        let result = FileStorage::new(&path).load();
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
