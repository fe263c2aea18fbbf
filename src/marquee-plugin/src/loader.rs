use crate::adapter::ExecProvider;
use crate::host::{ExecPluginHost, PluginConfig};
use crate::protocol::PluginInfo;
use async_trait::async_trait;
use marquee_core::{LoadedProvider, ProviderError, ProviderLoader, ProviderResult};
use std::path::Path;
use std::sync::Arc;

/// Loads installed provider builds by running them as plugin processes.
#[derive(Debug, Clone, Default)]
pub struct ExecPluginLoader {
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ExecPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra arguments passed to every plugin process.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn config_for(&self, path: &Path) -> PluginConfig {
        PluginConfig {
            executable: path.to_path_buf(),
            args: self.args.clone(),
            working_dir: path.parent().map(Path::to_path_buf),
            env: self.env.clone(),
        }
    }
}

#[async_trait]
impl ProviderLoader for ExecPluginLoader {
    async fn load(&self, path: &Path) -> ProviderResult<LoadedProvider> {
        let config = self.config_for(path);
        let (host, info) = tokio::task::spawn_blocking(move || -> ProviderResult<(ExecPluginHost, PluginInfo)> {
            let host = ExecPluginHost::new(config);
            let info = host.start()?;
            if info.manifest.id != info.metadata.id {
                return Err(ProviderError::Parse {
                    message: format!(
                        "plugin manifest id {} does not match metadata id {}",
                        info.manifest.id, info.metadata.id
                    ),
                });
            }
            Ok((host, info))
        })
        .await
        .map_err(|e| ProviderError::other(format!("plugin start aborted: {e}")))??;

        tracing::info!(
            provider_id = %info.metadata.id,
            version_code = info.metadata.version_code,
            path = %path.display(),
            "loaded plugin executable"
        );

        let metadata = info.metadata.clone();
        Ok(LoadedProvider {
            metadata,
            provider: Arc::new(ExecProvider::new(Arc::new(host), info)),
            file_path: Some(path.to_path_buf()),
        })
    }
}
