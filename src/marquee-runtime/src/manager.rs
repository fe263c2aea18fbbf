//! Sequenced install / uninstall / toggle / replace across the registry and
//! the API directory.
//!
//! Only one operation per provider id runs at a time. A failed step puts
//! back whatever the operation had already changed, so the registry and the
//! directory never disagree about an id.

use crate::directory::ProviderApiDirectory;
use crate::guard::{guarded, guarded_sync};
use crate::installer::{discard, ProviderInstaller};
use crate::preferences::ProviderPreference;
use crate::registry::{InstalledProvider, ProviderRegistry, RegistryError};
use marquee_core::{LoadedProvider, Provider, ProviderError, ProviderMetadata};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A provider could not be brought into (or kept in) a consistent state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{provider}: {cause}")]
pub struct ProviderLoadError {
    /// Display name of the provider involved.
    pub provider: String,
    #[source]
    pub cause: ProviderError,
}

impl ProviderLoadError {
    pub fn new(provider: impl Into<String>, cause: ProviderError) -> Self {
        Self {
            provider: provider.into(),
            cause,
        }
    }

    fn registry(provider: &str, err: RegistryError) -> Self {
        Self::new(provider, ProviderError::other(err.to_string()))
    }
}

struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

pub struct ProviderManager {
    registry: Arc<ProviderRegistry>,
    directory: Arc<ProviderApiDirectory>,
    installer: Arc<dyn ProviderInstaller>,
    in_flight: Mutex<HashSet<String>>,
}

impl ProviderManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        directory: Arc<ProviderApiDirectory>,
        installer: Arc<dyn ProviderInstaller>,
    ) -> Self {
        Self {
            registry,
            directory,
            installer,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ProviderApiDirectory> {
        &self.directory
    }

    pub fn installer(&self) -> &Arc<dyn ProviderInstaller> {
        &self.installer
    }

    fn begin(&self, id: &str) -> Option<InFlight<'_>> {
        let mut ids = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlight {
            ids: &self.in_flight,
            id: id.to_string(),
        })
    }

    fn busy(provider: &str) -> ProviderLoadError {
        ProviderLoadError::new(
            provider,
            ProviderError::other("another operation on this provider is in progress"),
        )
    }

    async fn display_name(&self, id: &str) -> String {
        match self.registry.get_provider_metadata(id).await {
            Some(metadata) => metadata.name,
            None => id.to_string(),
        }
    }

    /// Installs, registers and (when enabled) instantiates a provider. Any
    /// failure after the build is installed unwinds the registration.
    pub async fn install(
        &self,
        metadata: &ProviderMetadata,
    ) -> Result<InstalledProvider, ProviderLoadError> {
        let _guard = self
            .begin(&metadata.id)
            .ok_or_else(|| Self::busy(&metadata.name))?;
        if self.registry.get(&metadata.id).await.is_some() {
            return Err(ProviderLoadError::registry(
                &metadata.name,
                RegistryError::AlreadyInstalled {
                    id: metadata.id.clone(),
                },
            ));
        }

        let loaded = guarded("install", self.installer.install(metadata))
            .await
            .map_err(|cause| ProviderLoadError::new(&metadata.name, cause))?;
        let name = loaded.metadata.name.clone();
        let installed = match self.register(&loaded).await {
            Ok(installed) => installed,
            Err(err) => {
                unload(&loaded.provider);
                if let Some(path) = &loaded.file_path {
                    discard(path).await;
                }
                return Err(err);
            }
        };

        if installed.is_enabled() {
            if let Err(err) = self.directory.add_api_from_id(installed.id()).await {
                tracing::warn!(provider_id = %installed.id(), error = %err, "rolling back install");
                if let Err(rollback) = self.registry.remove(installed.id()).await {
                    tracing::error!(provider_id = %installed.id(), error = %rollback, "install rollback failed");
                }
                unload(&loaded.provider);
                if let Some(path) = &loaded.file_path {
                    discard(path).await;
                }
                return Err(ProviderLoadError::new(name, err.into_provider_error()));
            }
        }

        tracing::info!(
            provider_id = %installed.id(),
            version_code = installed.metadata.version_code,
            "provider installed"
        );
        Ok(installed)
    }

    async fn register(&self, loaded: &LoadedProvider) -> Result<InstalledProvider, ProviderLoadError> {
        let preference = ProviderPreference {
            id: loaded.metadata.id.clone(),
            name: loaded.metadata.name.clone(),
            file_path: loaded.file_path.clone(),
            is_disabled: false,
        };
        self.registry
            .add(loaded.provider.clone(), loaded.metadata.clone(), preference)
            .await
            .map_err(|e| ProviderLoadError::registry(&loaded.metadata.name, e))
    }

    /// Removes the live API (announcing it) before unregistering, then
    /// unloads the provider and deletes its build.
    pub async fn uninstall(&self, id: &str) -> Result<ProviderMetadata, ProviderLoadError> {
        let name = self.display_name(id).await;
        let _guard = self.begin(id).ok_or_else(|| Self::busy(&name))?;

        let api = self.directory.remove_api(id).await;
        let installed = match self.registry.remove(id).await {
            Ok(installed) => installed,
            Err(err) => {
                if api.is_some() {
                    if let Err(restore) = self.directory.add_api_from_id(id).await {
                        tracing::error!(provider_id = %id, error = %restore, "failed to restore api");
                    }
                }
                return Err(ProviderLoadError::registry(&name, err));
            }
        };

        unload(&installed.provider);
        if let Some(path) = &installed.preference.file_path {
            discard(path).await;
        }
        tracing::info!(provider_id = %id, "provider uninstalled");
        Ok(installed.metadata)
    }

    /// Flips the provider between enabled and disabled.
    ///
    /// Returns the new enabled state, or `None` when a toggle for the same id
    /// is already in flight and this request was ignored.
    pub async fn toggle(&self, id: &str) -> Result<Option<bool>, ProviderLoadError> {
        let name = self.display_name(id).await;
        let Some(_guard) = self.begin(id) else {
            tracing::debug!(provider_id = %id, "toggle already in flight; ignoring");
            return Ok(None);
        };

        let installed = self.registry.get(id).await.ok_or_else(|| {
            ProviderLoadError::registry(&name, RegistryError::NotInstalled { id: id.to_string() })
        })?;

        if installed.is_enabled() {
            // api goes first so nobody sees it after the flag flips
            self.directory.remove_api(id).await;
            if let Err(err) = self.registry.toggle_provider(id).await {
                if let Err(restore) = self.directory.add_api_from_id(id).await {
                    tracing::error!(provider_id = %id, error = %restore, "failed to restore api");
                }
                return Err(ProviderLoadError::registry(&name, err));
            }
            return Ok(Some(false));
        }

        self.registry
            .toggle_provider(id)
            .await
            .map_err(|e| ProviderLoadError::registry(&name, e))?;
        if let Err(err) = self.directory.add_api_from_id(id).await {
            tracing::warn!(provider_id = %id, error = %err, "enable failed; disabling again");
            if let Err(rollback) = self.registry.toggle_provider(id).await {
                tracing::error!(provider_id = %id, error = %rollback, "toggle rollback failed");
            }
            return Err(ProviderLoadError::new(name, err.into_provider_error()));
        }
        Ok(Some(true))
    }

    /// Swaps an installed provider for a newly loaded build.
    ///
    /// The previous provider and API are restored when the new one cannot be
    /// instantiated; on success the previous build file is deleted.
    pub async fn replace(&self, loaded: LoadedProvider) -> Result<(), ProviderLoadError> {
        let id = loaded.metadata.id.clone();
        let name = loaded.metadata.name.clone();
        let _guard = self.begin(&id).ok_or_else(|| Self::busy(&name))?;

        let previous = self
            .registry
            .replace(
                loaded.provider.clone(),
                loaded.metadata.clone(),
                loaded.file_path.clone(),
            )
            .await
            .map_err(|e| ProviderLoadError::registry(&name, e))?;

        if previous.is_enabled() {
            if let Err(err) = self.directory.add_api_from_id(&id).await {
                tracing::warn!(provider_id = %id, error = %err, "replacement failed; restoring previous build");
                self.restore(&previous).await;
                unload(&loaded.provider);
                if let Some(path) = loaded.file_path.as_deref() {
                    if previous.preference.file_path.as_deref() != Some(path) {
                        discard(path).await;
                    }
                }
                return Err(ProviderLoadError::new(name, err.into_provider_error()));
            }
        }

        unload(&previous.provider);
        if let Some(old) = previous.preference.file_path.as_deref() {
            if loaded.file_path.as_deref() != Some(old) {
                discard(old).await;
            }
        }
        tracing::info!(
            provider_id = %id,
            from = previous.metadata.version_code,
            to = loaded.metadata.version_code,
            "provider replaced"
        );
        Ok(())
    }

    async fn restore(&self, previous: &InstalledProvider) {
        let id = previous.id();
        if let Err(err) = self
            .registry
            .replace(
                previous.provider.clone(),
                previous.metadata.clone(),
                previous.preference.file_path.clone(),
            )
            .await
        {
            tracing::error!(provider_id = %id, error = %err, "failed to restore previous provider");
            return;
        }
        if let Err(err) = self.directory.add_api_from_id(id).await {
            tracing::error!(provider_id = %id, error = %err, "failed to restore previous api");
        }
    }

    /// Loads every persisted provider through the installer and instantiates
    /// the enabled ones. Per-provider failures are collected, never fatal.
    pub async fn load_installed(&self) -> Vec<ProviderLoadError> {
        let preferences = self.registry.preferences().await;
        let mut failures = Vec::new();

        for preference in preferences.providers {
            if self.registry.get(&preference.id).await.is_some() {
                continue;
            }
            let loaded = match guarded("restore", self.installer.restore(&preference)).await {
                Ok(loaded) if loaded.metadata.id == preference.id => loaded,
                Ok(loaded) => {
                    unload(&loaded.provider);
                    failures.push(ProviderLoadError::new(
                        &preference.name,
                        ProviderError::Parse {
                            message: format!("installed build identifies itself as {}", loaded.metadata.id),
                        },
                    ));
                    continue;
                }
                Err(cause) => {
                    tracing::warn!(provider_id = %preference.id, error = %cause, "failed to load installed provider");
                    failures.push(ProviderLoadError::new(&preference.name, cause));
                    continue;
                }
            };

            let installed = match self.register(&loaded).await {
                Ok(installed) => installed,
                Err(err) => {
                    unload(&loaded.provider);
                    failures.push(err);
                    continue;
                }
            };
            if installed.is_enabled() {
                if let Err(err) = self.directory.add_api_from_id(installed.id()).await {
                    failures.push(ProviderLoadError::new(
                        &installed.metadata.name,
                        err.into_provider_error(),
                    ));
                }
            }
        }

        tracing::info!(
            loaded = self.registry.get_ordered_providers().await.len(),
            failed = failures.len(),
            "installed providers loaded"
        );
        failures
    }
}

fn unload(provider: &Arc<dyn Provider>) {
    let _ = guarded_sync("unload", || {
        provider.unload();
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{FactoryInstaller, ProviderFactories};
    use crate::preferences::{MemoryPreferenceStore, ProviderPreferences};
    use crate::testing::{metadata, StaticProvider};
    use marquee_core::ProviderContext;
    use std::sync::atomic::Ordering;

    fn factories() -> ProviderFactories {
        let mut factories = ProviderFactories::new();
        for id in ["alpha", "beta"] {
            factories.register(metadata(id, 1), |meta| {
                Ok(Arc::new(StaticProvider::new(meta)) as Arc<dyn Provider>)
            });
        }
        factories.register(metadata("broken", 1), |meta| {
            Ok(Arc::new(StaticProvider::new(meta).failing(ProviderError::other("bad config")))
                as Arc<dyn Provider>)
        });
        factories
    }

    fn manager_with(store: Arc<MemoryPreferenceStore>) -> ProviderManager {
        let registry = Arc::new(ProviderRegistry::new(store).unwrap());
        let directory = Arc::new(ProviderApiDirectory::new(
            registry.clone(),
            ProviderContext::default(),
        ));
        ProviderManager::new(registry, directory, Arc::new(FactoryInstaller::new(factories())))
    }

    fn manager() -> ProviderManager {
        manager_with(Arc::new(MemoryPreferenceStore::default()))
    }

    #[tokio::test]
    async fn install_registers_and_instantiates() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();
        assert!(manager.registry().get("alpha").await.is_some());
        assert!(manager.directory().get_api("alpha").await.is_some());
    }

    #[tokio::test]
    async fn reinstalling_is_rejected() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();
        assert!(manager.install(&metadata("alpha", 2)).await.is_err());
        assert_eq!(
            manager.registry().get_provider_metadata("alpha").await.unwrap().version_code,
            1
        );
    }

    #[tokio::test]
    async fn failed_instantiation_rolls_back_install() {
        let manager = manager();
        let err = manager.install(&metadata("broken", 1)).await.unwrap_err();
        assert_eq!(err.provider, "broken provider");
        assert_eq!(err.cause, ProviderError::other("bad config"));
        assert!(manager.registry().get("broken").await.is_none());
        assert!(manager.registry().preferences().await.providers.is_empty());
    }

    #[tokio::test]
    async fn toggle_removes_and_restores_api() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();

        assert_eq!(manager.toggle("alpha").await.unwrap(), Some(false));
        assert!(manager.directory().get_api("alpha").await.is_none());
        assert!(manager.registry().get("alpha").await.is_some());

        assert_eq!(manager.toggle("alpha").await.unwrap(), Some(true));
        assert!(manager.directory().get_api("alpha").await.is_some());
    }

    #[tokio::test]
    async fn toggle_in_flight_is_ignored() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();
        let _held = manager.begin("alpha").unwrap();

        assert_eq!(manager.toggle("alpha").await.unwrap(), None);
        assert!(manager.registry().is_enabled("alpha").await);
    }

    #[tokio::test]
    async fn enable_failure_rolls_back_toggle() {
        let manager = manager();
        let meta = metadata("flaky", 1);
        manager
            .registry()
            .add(
                Arc::new(StaticProvider::new(&meta).failing(ProviderError::other("offline"))),
                meta,
                ProviderPreference {
                    id: "flaky".into(),
                    name: "flaky provider".into(),
                    file_path: None,
                    is_disabled: true,
                },
            )
            .await
            .unwrap();

        let err = manager.toggle("flaky").await.unwrap_err();
        assert_eq!(err.provider, "flaky provider");
        assert!(!manager.registry().is_enabled("flaky").await);
        assert!(manager.directory().get_api("flaky").await.is_none());
    }

    #[tokio::test]
    async fn uninstall_unloads_and_forgets() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();
        let mut events = manager.directory().observe();

        manager.uninstall("alpha").await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            crate::directory::ApiEvent::Removed { .. }
        ));
        assert!(manager.registry().get("alpha").await.is_none());
        assert!(manager.directory().get_api("alpha").await.is_none());
        assert!(manager.uninstall("alpha").await.is_err());
    }

    #[tokio::test]
    async fn replace_restores_previous_on_failure() {
        let manager = manager();
        manager.install(&metadata("alpha", 1)).await.unwrap();

        let newer = metadata("alpha", 2);
        let err = manager
            .replace(LoadedProvider {
                provider: Arc::new(
                    StaticProvider::new(&newer).failing(ProviderError::other("incompatible")),
                ),
                metadata: newer,
                file_path: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.cause, ProviderError::other("incompatible"));

        let current = manager.registry().get("alpha").await.unwrap();
        assert_eq!(current.metadata.version_code, 1);
        assert!(manager.directory().get_api("alpha").await.is_some());
    }

    #[tokio::test]
    async fn replace_unloads_previous_provider() {
        let manager = manager();
        let old_meta = metadata("alpha", 1);
        let old = Arc::new(StaticProvider::new(&old_meta));
        manager
            .registry()
            .add(
                old.clone(),
                old_meta,
                ProviderPreference {
                    id: "alpha".into(),
                    name: "alpha".into(),
                    file_path: None,
                    is_disabled: false,
                },
            )
            .await
            .unwrap();

        let newer = metadata("alpha", 2);
        manager
            .replace(LoadedProvider {
                provider: Arc::new(StaticProvider::new(&newer)),
                metadata: newer,
                file_path: None,
            })
            .await
            .unwrap();

        assert!(old.unloaded.load(Ordering::SeqCst));
        assert_eq!(
            manager.registry().get_provider_metadata("alpha").await.unwrap().version_code,
            2
        );
    }

    #[tokio::test]
    async fn load_installed_collects_failures() {
        let store = Arc::new(MemoryPreferenceStore::new(ProviderPreferences {
            providers: vec![
                ProviderPreference {
                    id: "beta".into(),
                    name: "beta provider".into(),
                    file_path: None,
                    is_disabled: false,
                },
                ProviderPreference {
                    id: "missing".into(),
                    name: "missing provider".into(),
                    file_path: None,
                    is_disabled: false,
                },
                ProviderPreference {
                    id: "alpha".into(),
                    name: "alpha provider".into(),
                    file_path: None,
                    is_disabled: true,
                },
            ],
            ..ProviderPreferences::default()
        }));
        let manager = manager_with(store);

        let failures = manager.load_installed().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "missing provider");
        let ordered: Vec<_> = manager
            .registry()
            .get_ordered_providers()
            .await
            .into_iter()
            .map(|p| p.metadata.id)
            .collect();
        assert_eq!(ordered, vec!["beta", "alpha"]);
        assert!(manager.directory().get_api("beta").await.is_some());
        assert!(manager.directory().get_api("alpha").await.is_none());
    }
}
