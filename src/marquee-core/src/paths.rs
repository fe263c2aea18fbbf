use crate::{APP_AUTHOR, APP_NAME, APP_QUALIFIER};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Platform directories used by Marquee.
#[derive(Debug, Clone)]
pub struct AppDirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
    cache_dir: PathBuf,
    log_dir: PathBuf,
    providers_dir: PathBuf,
}

impl AppDirs {
    pub fn discover() -> Result<Self, DirsError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_AUTHOR, APP_NAME)
            .ok_or(DirsError::MissingProjectDirs)?;
        Ok(Self::with_locations(
            dirs.config_dir().to_path_buf(),
            dirs.data_dir().to_path_buf(),
            dirs.cache_dir().to_path_buf(),
        ))
    }

    /// Lays every directory out under a single root.
    pub fn under(root: &Path) -> Self {
        Self::with_locations(root.join("config"), root.join("data"), root.join("cache"))
    }

    fn with_locations(config_dir: PathBuf, data_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            log_dir: data_dir.join("logs"),
            providers_dir: data_dir.join("providers"),
            config_dir,
            data_dir,
            cache_dir,
        }
    }

    /// Points installed provider binaries somewhere else.
    pub fn with_providers_dir(mut self, dir: PathBuf) -> Self {
        self.providers_dir = dir;
        self
    }

    pub fn ensure_exists(&self) -> Result<(), DirsError> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.cache_dir,
            &self.log_dir,
            &self.providers_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| DirsError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn providers_dir(&self) -> &Path {
        &self.providers_dir
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("providers.json")
    }
}

#[derive(Debug, Error)]
pub enum DirsError {
    #[error("unable to determine project directories for Marquee")]
    MissingProjectDirs,
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_under_root() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        assert!(dirs.log_dir().ends_with("logs"));
        assert!(dirs.providers_dir().is_dir());
        assert_eq!(
            dirs.preferences_path(),
            root.path().join("data").join("providers.json")
        );
    }

    #[test]
    fn providers_dir_override() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path()).with_providers_dir(root.path().join("plugins"));
        assert!(dirs.providers_dir().ends_with("plugins"));
    }
}
