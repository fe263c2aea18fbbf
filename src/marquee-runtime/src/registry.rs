//! Durable record of installed providers.
//!
//! Pairs each loaded [`Provider`] with its metadata and its persisted
//! preference entry. Preference changes are saved before they are applied,
//! so a failed save leaves the registry untouched.

use crate::preferences::{
    PreferenceError, PreferenceStore, ProviderPreference, ProviderPreferences,
};
use marquee_core::{Provider, ProviderMetadata};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider {id} is not installed")]
    NotInstalled { id: String },
    #[error("provider {id} is already installed")]
    AlreadyInstalled { id: String },
    #[error("cannot move provider from {from} to {to}: only {len} providers are ordered")]
    InvalidMove { from: usize, to: usize, len: usize },
    #[error(transparent)]
    Preferences(#[from] PreferenceError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { id: String },
    Removed { id: String },
    Replaced { id: String, version_code: u64 },
    Toggled { id: String, enabled: bool },
    Reordered,
}

/// A registered provider together with its current preference entry.
#[derive(Clone)]
pub struct InstalledProvider {
    pub metadata: ProviderMetadata,
    pub provider: Arc<dyn Provider>,
    pub preference: ProviderPreference,
}

impl InstalledProvider {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn is_enabled(&self) -> bool {
        !self.preference.is_disabled
    }
}

impl std::fmt::Debug for InstalledProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledProvider")
            .field("id", &self.metadata.id)
            .field("version_code", &self.metadata.version_code)
            .field("preference", &self.preference)
            .finish()
    }
}

#[derive(Clone)]
struct Registered {
    metadata: ProviderMetadata,
    provider: Arc<dyn Provider>,
}

struct RegistryState {
    loaded: HashMap<String, Registered>,
    preferences: ProviderPreferences,
}

impl RegistryState {
    fn installed(&self, id: &str) -> Option<InstalledProvider> {
        let registered = self.loaded.get(id)?;
        let preference = self.preferences.get(id)?.clone();
        Some(InstalledProvider {
            metadata: registered.metadata.clone(),
            provider: registered.provider.clone(),
            preference,
        })
    }

    fn ordered(&self) -> Vec<InstalledProvider> {
        self.preferences
            .providers
            .iter()
            .filter_map(|p| self.installed(&p.id))
            .collect()
    }
}

pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    store: Arc<dyn PreferenceStore>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ProviderRegistry {
    /// Opens the registry over persisted preferences. No provider is loaded
    /// yet; entries become live as they are [`add`](Self::add)ed.
    pub fn new(store: Arc<dyn PreferenceStore>) -> RegistryResult<Self> {
        let preferences = store.load()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            state: RwLock::new(RegistryState {
                loaded: HashMap::new(),
                preferences,
            }),
            store,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Registers a loaded provider.
    ///
    /// A provider already known to the preferences keeps its position and
    /// disabled flag; a new one is appended at the lowest priority.
    pub async fn add(
        &self,
        provider: Arc<dyn Provider>,
        metadata: ProviderMetadata,
        preference: ProviderPreference,
    ) -> RegistryResult<InstalledProvider> {
        let id = metadata.id.clone();
        let mut state = self.state.write().await;
        if state.loaded.contains_key(&id) {
            return Err(RegistryError::AlreadyInstalled { id });
        }

        let mut preferences = state.preferences.clone();
        match preferences.position(&id) {
            Some(index) => {
                let existing = &mut preferences.providers[index];
                existing.name = preference.name;
                existing.file_path = preference.file_path;
            }
            None => preferences.providers.push(ProviderPreference { id: id.clone(), ..preference }),
        }
        self.store.save(&preferences)?;

        state.preferences = preferences;
        state
            .loaded
            .insert(id.clone(), Registered { metadata, provider });
        let installed = state
            .installed(&id)
            .ok_or_else(|| RegistryError::NotInstalled { id: id.clone() })?;
        drop(state);

        tracing::info!(provider_id = %id, enabled = installed.is_enabled(), "provider registered");
        self.emit(RegistryEvent::Added { id });
        Ok(installed)
    }

    /// Unregisters the provider and evicts its preference entry.
    pub async fn remove(&self, id: &str) -> RegistryResult<InstalledProvider> {
        let mut state = self.state.write().await;
        let installed = state
            .installed(id)
            .ok_or_else(|| RegistryError::NotInstalled { id: id.to_string() })?;

        let mut preferences = state.preferences.clone();
        preferences.providers.retain(|p| p.id != id);
        self.store.save(&preferences)?;

        state.preferences = preferences;
        state.loaded.remove(id);
        drop(state);

        tracing::info!(provider_id = %id, "provider unregistered");
        self.emit(RegistryEvent::Removed { id: id.to_string() });
        Ok(installed)
    }

    /// Swaps in a new implementation for an installed provider, keeping its
    /// position and disabled flag. Returns what was replaced.
    pub async fn replace(
        &self,
        provider: Arc<dyn Provider>,
        metadata: ProviderMetadata,
        file_path: Option<PathBuf>,
    ) -> RegistryResult<InstalledProvider> {
        let id = metadata.id.clone();
        let version_code = metadata.version_code;
        let mut state = self.state.write().await;
        let previous = state
            .installed(&id)
            .ok_or_else(|| RegistryError::NotInstalled { id: id.clone() })?;

        let mut preferences = state.preferences.clone();
        if let Some(index) = preferences.position(&id) {
            let entry = &mut preferences.providers[index];
            entry.name = metadata.name.clone();
            entry.file_path = file_path;
        }
        self.store.save(&preferences)?;

        state.preferences = preferences;
        state
            .loaded
            .insert(id.clone(), Registered { metadata, provider });
        drop(state);

        tracing::info!(provider_id = %id, version_code, "provider replaced");
        self.emit(RegistryEvent::Replaced { id, version_code });
        Ok(previous)
    }

    /// Moves the entry at priority `from` to priority `to`.
    pub async fn move_provider(&self, from: usize, to: usize) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let len = state.preferences.providers.len();
        if from >= len || to >= len {
            return Err(RegistryError::InvalidMove { from, to, len });
        }
        if from == to {
            return Ok(());
        }

        let mut preferences = state.preferences.clone();
        let entry = preferences.providers.remove(from);
        preferences.providers.insert(to, entry);
        self.store.save(&preferences)?;
        state.preferences = preferences;
        drop(state);

        self.emit(RegistryEvent::Reordered);
        Ok(())
    }

    /// Flips the disabled flag; returns whether the provider is now enabled.
    pub async fn toggle_provider(&self, id: &str) -> RegistryResult<bool> {
        let mut state = self.state.write().await;
        let mut preferences = state.preferences.clone();
        let index = preferences
            .position(id)
            .ok_or_else(|| RegistryError::NotInstalled { id: id.to_string() })?;
        let entry = &mut preferences.providers[index];
        entry.is_disabled = !entry.is_disabled;
        let enabled = !entry.is_disabled;
        self.store.save(&preferences)?;
        state.preferences = preferences;
        drop(state);

        tracing::info!(provider_id = %id, enabled, "provider toggled");
        self.emit(RegistryEvent::Toggled {
            id: id.to_string(),
            enabled,
        });
        Ok(enabled)
    }

    pub async fn get(&self, id: &str) -> Option<InstalledProvider> {
        self.state.read().await.installed(id)
    }

    pub async fn get_provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.state
            .read()
            .await
            .loaded
            .get(id)
            .map(|r| r.provider.clone())
    }

    pub async fn get_provider_metadata(&self, id: &str) -> Option<ProviderMetadata> {
        self.state
            .read()
            .await
            .loaded
            .get(id)
            .map(|r| r.metadata.clone())
    }

    pub async fn is_enabled(&self, id: &str) -> bool {
        self.state
            .read()
            .await
            .installed(id)
            .is_some_and(|p| p.is_enabled())
    }

    /// Loaded providers in priority order.
    pub async fn get_ordered_providers(&self) -> Vec<InstalledProvider> {
        self.state.read().await.ordered()
    }

    pub async fn get_enabled_providers(&self) -> Vec<InstalledProvider> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(InstalledProvider::is_enabled)
            .collect()
    }

    pub async fn preferences(&self) -> ProviderPreferences {
        self.state.read().await.preferences.clone()
    }

    pub async fn set_auto_update(&self, auto_update: bool) -> RegistryResult<()> {
        let mut state = self.state.write().await;
        let mut preferences = state.preferences.clone();
        preferences.auto_update = auto_update;
        self.store.save(&preferences)?;
        state.preferences = preferences;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::MemoryPreferenceStore;
    use crate::testing::{metadata, StaticProvider};

    fn preference(id: &str) -> ProviderPreference {
        ProviderPreference {
            id: id.into(),
            name: id.into(),
            file_path: None,
            is_disabled: false,
        }
    }

    async fn registry_with(ids: &[&str]) -> (ProviderRegistry, Arc<MemoryPreferenceStore>) {
        let store = Arc::new(MemoryPreferenceStore::default());
        let registry = ProviderRegistry::new(store.clone()).unwrap();
        for id in ids {
            let meta = metadata(id, 1);
            registry
                .add(Arc::new(StaticProvider::new(&meta)), meta, preference(id))
                .await
                .unwrap();
        }
        (registry, store)
    }

    #[tokio::test]
    async fn add_persists_and_emits() {
        let store = Arc::new(MemoryPreferenceStore::default());
        let registry = ProviderRegistry::new(store.clone()).unwrap();
        let mut events = registry.subscribe();

        let meta = metadata("alpha", 1);
        registry
            .add(Arc::new(StaticProvider::new(&meta)), meta, preference("alpha"))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Added { id: "alpha".into() }
        );
        assert_eq!(store.current().position("alpha"), Some(0));
        assert!(registry.get_provider("alpha").await.is_some());
    }

    #[tokio::test]
    async fn add_twice_is_rejected() {
        let (registry, _) = registry_with(&["alpha"]).await;
        let meta = metadata("alpha", 2);
        let err = registry
            .add(Arc::new(StaticProvider::new(&meta)), meta, preference("alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyInstalled { .. }));
    }

    #[tokio::test]
    async fn persisted_entry_keeps_position_and_flag() {
        let store = Arc::new(MemoryPreferenceStore::new(ProviderPreferences {
            providers: vec![
                ProviderPreference {
                    is_disabled: true,
                    ..preference("beta")
                },
                preference("alpha"),
            ],
            ..ProviderPreferences::default()
        }));
        let registry = ProviderRegistry::new(store).unwrap();
        for id in ["alpha", "beta"] {
            let meta = metadata(id, 1);
            registry
                .add(Arc::new(StaticProvider::new(&meta)), meta, preference(id))
                .await
                .unwrap();
        }

        let ordered: Vec<_> = registry
            .get_ordered_providers()
            .await
            .into_iter()
            .map(|p| p.metadata.id)
            .collect();
        assert_eq!(ordered, vec!["beta", "alpha"]);
        let enabled = registry.get_enabled_providers().await;
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id(), "alpha");
    }

    #[tokio::test]
    async fn remove_evicts_preference() {
        let (registry, store) = registry_with(&["alpha", "beta"]).await;
        registry.remove("alpha").await.unwrap();
        assert!(registry.get("alpha").await.is_none());
        assert!(store.current().get("alpha").is_none());
        assert!(matches!(
            registry.remove("alpha").await,
            Err(RegistryError::NotInstalled { .. })
        ));
    }

    #[tokio::test]
    async fn toggle_flips_without_removing() {
        let (registry, store) = registry_with(&["alpha"]).await;
        assert!(!registry.toggle_provider("alpha").await.unwrap());
        assert!(!registry.is_enabled("alpha").await);
        assert!(registry.get("alpha").await.is_some());
        assert!(store.current().get("alpha").unwrap().is_disabled);
        assert!(registry.toggle_provider("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn move_reorders_priority() {
        let (registry, _) = registry_with(&["a", "b", "c"]).await;
        registry.move_provider(2, 0).await.unwrap();
        let ids: Vec<_> = registry
            .get_ordered_providers()
            .await
            .into_iter()
            .map(|p| p.metadata.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(matches!(
            registry.move_provider(0, 3).await,
            Err(RegistryError::InvalidMove { len: 3, .. })
        ));
    }

    #[tokio::test]
    async fn replace_swaps_metadata_and_keeps_flag() {
        let (registry, _) = registry_with(&["alpha"]).await;
        registry.toggle_provider("alpha").await.unwrap();
        let newer = metadata("alpha", 5);
        let previous = registry
            .replace(Arc::new(StaticProvider::new(&newer)), newer, None)
            .await
            .unwrap();
        assert_eq!(previous.metadata.version_code, 1);

        let current = registry.get("alpha").await.unwrap();
        assert_eq!(current.metadata.version_code, 5);
        assert!(!current.is_enabled());
    }
}
