//! Local participant identity and its device-local persistence.
//!
//! The chosen display name is stored under a fixed key, independent of the
//! room, so it survives across sessions and restarts.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Maximum display name length in characters.
pub const MAX_DISPLAY_NAME_LEN: usize = 20;

/// Key under which the display name is persisted.
pub const DISPLAY_NAME_KEY: &str = "swiftshare:username";

/// A trimmed, non-empty display name of at most [`MAX_DISPLAY_NAME_LEN`] chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    /// Trim and truncate `raw`. Returns `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.chars().take(MAX_DISPLAY_NAME_LEN).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DisplayName {
    fn default() -> Self {
        Self("Anonymous".to_string())
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device-local key-value persistence for the display name.
pub trait IdentityStore: Send + Sync {
    fn load_display_name(&self) -> Result<Option<DisplayName>, SessionError>;
    fn save_display_name(&self, name: &DisplayName) -> Result<(), SessionError>;
}

/// JSON key-value file, e.g. `~/.config/swiftshare/identity.json`.
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform config directory, or the working directory if
    /// the platform has none.
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .map(|d| d.join("swiftshare"))
            .unwrap_or_else(|| PathBuf::from(".swiftshare"));
        Self::new(dir.join("identity.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load_display_name(&self) -> Result<Option<DisplayName>, SessionError> {
        let entries = self.read_all()?;
        Ok(entries.get(DISPLAY_NAME_KEY).and_then(|raw| DisplayName::parse(raw)))
    }

    fn save_display_name(&self, name: &DisplayName) -> Result<(), SessionError> {
        let mut entries = self.read_all()?;
        entries.insert(DISPLAY_NAME_KEY.to_string(), name.as_str().to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        log::debug!("Persisted display name to {}", self.path.display());
        Ok(())
    }
}

/// In-process store, for hosts without a writable filesystem and for tests.
#[derive(Default)]
pub struct MemoryIdentityStore {
    name: RwLock<Option<DisplayName>>,
}

impl MemoryIdentityStore {
    pub fn with_name(name: DisplayName) -> Self {
        Self {
            name: RwLock::new(Some(name)),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load_display_name(&self) -> Result<Option<DisplayName>, SessionError> {
        let guard = self.name.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn save_display_name(&self, name: &DisplayName) -> Result<(), SessionError> {
        let mut guard = self.name.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_trims_and_truncates() {
        assert_eq!(DisplayName::parse("  Alice ").unwrap().as_str(), "Alice");
        let long = DisplayName::parse("abcdefghijklmnopqrstuvwxyz").unwrap();
        assert_eq!(long.as_str().chars().count(), MAX_DISPLAY_NAME_LEN);
        assert!(DisplayName::parse("   ").is_none());
        assert!(DisplayName::parse("").is_none());
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdentityStore::new(dir.path().join("identity.json"));
        assert!(store.load_display_name().unwrap().is_none());
    }

    #[test]
    fn test_file_store_roundtrip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let store = FileIdentityStore::new(&path);
        store.save_display_name(&DisplayName::parse("Owl").unwrap()).unwrap();

        let reopened = FileIdentityStore::new(&path);
        assert_eq!(reopened.load_display_name().unwrap().unwrap().as_str(), "Owl");

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains(DISPLAY_NAME_KEY));
    }

    #[test]
    fn test_file_store_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

        let store = FileIdentityStore::new(&path);
        store.save_display_name(&DisplayName::parse("Lynx").unwrap()).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"theme\""));
        assert!(raw.contains("Lynx"));
    }

    #[test]
    fn test_file_store_corrupt_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "not json").unwrap();

        let store = FileIdentityStore::new(&path);
        assert!(matches!(
            store.load_display_name(),
            Err(SessionError::Serialization(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryIdentityStore::default();
        assert!(store.load_display_name().unwrap().is_none());
        store.save_display_name(&DisplayName::parse("Wolf").unwrap()).unwrap();
        assert_eq!(store.load_display_name().unwrap().unwrap().as_str(), "Wolf");
    }
}
