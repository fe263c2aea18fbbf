//! In-process loading strategy: providers compiled into the host and
//! constructed by id.

use crate::installer::ProviderInstaller;
use crate::preferences::ProviderPreference;
use async_trait::async_trait;
use marquee_core::{LoadedProvider, Provider, ProviderError, ProviderMetadata, ProviderResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a provider for the given metadata.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderMetadata) -> ProviderResult<Arc<dyn Provider>> + Send + Sync>;

struct FactoryEntry {
    metadata: ProviderMetadata,
    factory: ProviderFactory,
}

/// Maps provider ids to constructors, each with the metadata of the build
/// the host ships.
#[derive(Default)]
pub struct ProviderFactories {
    entries: HashMap<String, FactoryEntry>,
}

impl ProviderFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, metadata: ProviderMetadata, factory: F)
    where
        F: Fn(&ProviderMetadata) -> ProviderResult<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.entries.insert(
            metadata.id.clone(),
            FactoryEntry {
                metadata,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Metadata of every bundled provider, sorted by id.
    pub fn available(&self) -> Vec<ProviderMetadata> {
        let mut all: Vec<_> = self.entries.values().map(|e| e.metadata.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn create(&self, metadata: &ProviderMetadata) -> ProviderResult<Arc<dyn Provider>> {
        let entry = self
            .entries
            .get(&metadata.id)
            .ok_or_else(|| ProviderError::NotFound {
                entity: format!("provider factory {}", metadata.id),
            })?;
        (entry.factory)(metadata)
    }
}

/// Installs providers from a [`ProviderFactories`] table.
pub struct FactoryInstaller {
    factories: ProviderFactories,
}

impl FactoryInstaller {
    pub fn new(factories: ProviderFactories) -> Self {
        Self { factories }
    }

    pub fn factories(&self) -> &ProviderFactories {
        &self.factories
    }
}

#[async_trait]
impl ProviderInstaller for FactoryInstaller {
    async fn install(&self, metadata: &ProviderMetadata) -> ProviderResult<LoadedProvider> {
        let provider = self.factories.create(metadata)?;
        Ok(LoadedProvider {
            metadata: metadata.clone(),
            provider,
            file_path: None,
        })
    }

    async fn restore(&self, preference: &ProviderPreference) -> ProviderResult<LoadedProvider> {
        let metadata = self
            .factories
            .entries
            .get(&preference.id)
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| ProviderError::NotFound {
                entity: format!("provider factory {}", preference.id),
            })?;
        self.install(&metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{metadata, StaticProvider};

    fn factories() -> ProviderFactories {
        let mut factories = ProviderFactories::new();
        factories.register(metadata("beta", 2), |meta| {
            Ok(Arc::new(StaticProvider::new(meta)) as Arc<dyn Provider>)
        });
        factories.register(metadata("alpha", 1), |meta| {
            Ok(Arc::new(StaticProvider::new(meta)) as Arc<dyn Provider>)
        });
        factories
    }

    #[test]
    fn available_is_sorted() {
        let ids: Vec<_> = factories().available().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn install_uses_given_metadata() {
        let installer = FactoryInstaller::new(factories());
        let loaded = installer.install(&metadata("beta", 9)).await.unwrap();
        assert_eq!(loaded.metadata.version_code, 9);
        assert_eq!(loaded.provider.manifest().version_code, 9);
        assert!(loaded.file_path.is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let installer = FactoryInstaller::new(factories());
        let err = installer.install(&metadata("gamma", 1)).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[tokio::test]
    async fn restore_uses_bundled_metadata() {
        let installer = FactoryInstaller::new(factories());
        let loaded = installer
            .restore(&ProviderPreference {
                id: "beta".into(),
                name: "beta".into(),
                file_path: None,
                is_disabled: true,
            })
            .await
            .unwrap();
        assert_eq!(loaded.metadata.version_code, 2);
    }
}
