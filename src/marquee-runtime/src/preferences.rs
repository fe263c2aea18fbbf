//! Persisted provider preferences.
//!
//! Holds the user-ordered list of installed providers with their disabled
//! flags and the update/install toggles. The settings store itself is an
//! external collaborator; [`FilePreferenceStore`] is the JSON-file
//! implementation used by the CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const PREFERENCES_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("failed to create preferences directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write preferences {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read preferences {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("corrupt preferences {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("preferences format version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

pub type PreferenceResult<T> = Result<T, PreferenceError>;

/// One installed provider as remembered across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreference {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPreferences {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default = "default_true")]
    pub warn_before_install: bool,
    /// Priority order, highest first.
    #[serde(default)]
    pub providers: Vec<ProviderPreference>,
}

impl Default for ProviderPreferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            auto_update: false,
            warn_before_install: true,
            providers: Vec::new(),
        }
    }
}

impl ProviderPreferences {
    pub fn position(&self, id: &str) -> Option<usize> {
        self.providers.iter().position(|p| p.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ProviderPreference> {
        self.providers.iter().find(|p| p.id == id)
    }
}

fn current_version() -> u32 {
    PREFERENCES_VERSION
}

fn default_true() -> bool {
    true
}

pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> PreferenceResult<ProviderPreferences>;
    fn save(&self, preferences: &ProviderPreferences) -> PreferenceResult<()>;
}

/// In-memory store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    inner: Mutex<ProviderPreferences>,
}

impl MemoryPreferenceStore {
    pub fn new(preferences: ProviderPreferences) -> Self {
        Self {
            inner: Mutex::new(preferences),
        }
    }

    pub fn current(&self) -> ProviderPreferences {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> PreferenceResult<ProviderPreferences> {
        Ok(self.current())
    }

    fn save(&self, preferences: &ProviderPreferences) -> PreferenceResult<()> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = preferences.clone();
        Ok(())
    }
}

/// JSON file store with a last-known-good backup.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
    backup_path: PathBuf,
    corrupt_path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            backup_path: path.with_extension("backup.json"),
            corrupt_path: path.with_extension("corrupt.json"),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self, path: &Path) -> PreferenceResult<ProviderPreferences> {
        let file = fs::File::open(path).map_err(|source| PreferenceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let preferences: ProviderPreferences = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PreferenceError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if preferences.version != PREFERENCES_VERSION {
            return Err(PreferenceError::UnsupportedVersion {
                found: preferences.version,
                expected: PREFERENCES_VERSION,
            });
        }
        Ok(preferences)
    }
}

impl PreferenceStore for FilePreferenceStore {
    /// Missing file yields defaults. A corrupt file is set aside and the
    /// backup is tried before falling back to defaults.
    fn load(&self) -> PreferenceResult<ProviderPreferences> {
        if !self.path.exists() {
            return Ok(ProviderPreferences::default());
        }

        match self.try_load(&self.path) {
            Ok(preferences) => Ok(preferences),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "provider preferences unreadable; trying backup"
                );
                if let Err(move_err) = fs::rename(&self.path, &self.corrupt_path) {
                    tracing::warn!(error = %move_err, "failed to preserve corrupt preferences");
                }
                if self.backup_path.exists() {
                    match self.try_load(&self.backup_path) {
                        Ok(preferences) => {
                            tracing::info!(
                                providers = preferences.providers.len(),
                                "recovered provider preferences from backup"
                            );
                            return Ok(preferences);
                        }
                        Err(backup_err) => {
                            tracing::warn!(error = %backup_err, "preferences backup also unreadable");
                        }
                    }
                }
                Ok(ProviderPreferences::default())
            }
        }
    }

    fn save(&self, preferences: &ProviderPreferences) -> PreferenceResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferenceError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, &self.backup_path) {
                tracing::warn!(error = %e, "failed to back up provider preferences");
            }
        }

        let file = fs::File::create(&self.path).map_err(|source| PreferenceError::Write {
            path: self.path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), preferences).map_err(|e| {
            PreferenceError::Write {
                path: self.path.clone(),
                source: io::Error::other(e),
            }
        })?;

        tracing::debug!(
            providers = preferences.providers.len(),
            path = %self.path.display(),
            "saved provider preferences"
        );
        Ok(())
    }
}
