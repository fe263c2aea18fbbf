//! Installation strategies turning [`ProviderMetadata`] into a loaded
//! provider.

use crate::preferences::ProviderPreference;
use async_trait::async_trait;
use marquee_core::{LoadedProvider, ProviderError, ProviderLoader, ProviderMetadata, ProviderResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[async_trait]
pub trait ProviderInstaller: Send + Sync {
    /// Fetches and loads the build described by `metadata`.
    async fn install(&self, metadata: &ProviderMetadata) -> ProviderResult<LoadedProvider>;

    /// Reloads a previously installed provider at startup.
    async fn restore(&self, preference: &ProviderPreference) -> ProviderResult<LoadedProvider>;
}

/// Downloads provider builds into a directory and loads them from disk.
pub struct DownloadInstaller {
    client: reqwest::Client,
    directory: PathBuf,
    loader: Arc<dyn ProviderLoader>,
}

impl DownloadInstaller {
    pub fn new(
        client: reqwest::Client,
        directory: impl Into<PathBuf>,
        loader: Arc<dyn ProviderLoader>,
    ) -> Self {
        Self {
            client,
            directory: directory.into(),
            loader,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Where a given build lands once installed.
    pub fn target_path(&self, metadata: &ProviderMetadata) -> PathBuf {
        self.directory
            .join(format!("{}-v{}", file_safe(&metadata.id), metadata.version_code))
    }

    async fn download(&self, metadata: &ProviderMetadata, target: &Path) -> ProviderResult<()> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error("create provider directory", &self.directory, e))?;

        let bytes = self
            .client
            .get(&metadata.build_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let partial = target.with_extension("partial");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| io_error("write provider build", &partial, e))?;
        mark_executable(&partial).await?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| io_error("move provider build into place", target, e))?;

        tracing::info!(
            provider_id = %metadata.id,
            version_code = metadata.version_code,
            bytes = bytes.len(),
            path = %target.display(),
            "downloaded provider build"
        );
        Ok(())
    }
}

#[async_trait]
impl ProviderInstaller for DownloadInstaller {
    async fn install(&self, metadata: &ProviderMetadata) -> ProviderResult<LoadedProvider> {
        let target = self.target_path(metadata);
        self.download(metadata, &target).await?;

        let loaded = match self.loader.load(&target).await {
            Ok(loaded) if loaded.metadata.id == metadata.id => loaded,
            Ok(loaded) => {
                discard(&target).await;
                return Err(ProviderError::Parse {
                    message: format!(
                        "build for {} identifies itself as {}",
                        metadata.id, loaded.metadata.id
                    ),
                });
            }
            Err(err) => {
                discard(&target).await;
                return Err(err);
            }
        };

        Ok(LoadedProvider {
            file_path: Some(target),
            ..loaded
        })
    }

    async fn restore(&self, preference: &ProviderPreference) -> ProviderResult<LoadedProvider> {
        let path = preference
            .file_path
            .as_deref()
            .ok_or_else(|| ProviderError::NotFound {
                entity: format!("installed build of {}", preference.id),
            })?;
        let loaded = self.loader.load(path).await?;
        Ok(LoadedProvider {
            file_path: Some(path.to_path_buf()),
            ..loaded
        })
    }
}

/// Removes an installed build, ignoring files that are already gone.
pub async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed provider build"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to remove provider build"),
    }
}

fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ProviderError {
    ProviderError::other(format!("failed to {action} {}: {err}", path.display()))
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> ProviderResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| io_error("mark provider build executable", path, e))
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> ProviderResult<()> {
    Ok(())
}
