//! Live API instances for enabled providers.

use crate::guard::{guarded, guarded_sync};
use crate::registry::{ProviderRegistry, RegistryEvent};
use marquee_core::{Provider, ProviderApi, ProviderContext, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::{CancellationToken, DropGuard};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("provider {id} is not installed")]
    NotInstalled { id: String },
    #[error("provider {id} is disabled")]
    Disabled { id: String },
    #[error("failed to instantiate provider {id}: {source}")]
    Instantiate {
        id: String,
        #[source]
        source: ProviderError,
    },
}

impl DirectoryError {
    /// The plugin-facing cause, for surfacing to users.
    pub fn into_provider_error(self) -> ProviderError {
        match self {
            DirectoryError::Instantiate { source, .. } => source,
            other => ProviderError::other(other.to_string()),
        }
    }
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[derive(Clone)]
pub enum ApiEvent {
    Added {
        id: String,
        api: Arc<dyn ProviderApi>,
    },
    Removed {
        id: String,
    },
}

impl ApiEvent {
    pub fn id(&self) -> &str {
        match self {
            ApiEvent::Added { id, .. } | ApiEvent::Removed { id } => id,
        }
    }
}

impl std::fmt::Debug for ApiEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiEvent::Added { id, .. } => f.debug_struct("Added").field("id", id).finish(),
            ApiEvent::Removed { id } => f.debug_struct("Removed").field("id", id).finish(),
        }
    }
}

/// Instantiated [`ProviderApi`]s keyed by provider id.
///
/// An id is only present while its registry entry exists and is enabled.
/// The directory follows [`RegistryEvent`]s in a background task and evicts
/// the instance of a provider that is removed or disabled, also when the
/// change is made on the registry directly.
pub struct ProviderApiDirectory {
    registry: Arc<ProviderRegistry>,
    context: ProviderContext,
    live: Arc<LiveApis>,
    _follower: Option<DropGuard>,
}

struct LiveApis {
    apis: RwLock<HashMap<String, Arc<dyn ProviderApi>>>,
    events: broadcast::Sender<ApiEvent>,
}

impl LiveApis {
    async fn remove(&self, id: &str) -> Option<Arc<dyn ProviderApi>> {
        let removed = self.apis.write().await.remove(id)?;
        self.announce_removal(id, &removed);
        Some(removed)
    }

    /// Evicts `id` unless the registry still lists it as enabled. The check
    /// and the eviction happen under the same write lock.
    async fn remove_inactive(&self, registry: &ProviderRegistry, id: &str) -> bool {
        let mut apis = self.apis.write().await;
        if !apis.contains_key(id) || registry.is_enabled(id).await {
            return false;
        }
        let Some(removed) = apis.remove(id) else {
            return false;
        };
        drop(apis);
        self.announce_removal(id, &removed);
        true
    }

    fn announce_removal(&self, id: &str, api: &Arc<dyn ProviderApi>) {
        release(id, api);
        let _ = self.events.send(ApiEvent::Removed { id: id.to_string() });
        tracing::debug!(provider_id = %id, "provider api removed");
    }
}

async fn follow_registry(
    live: Arc<LiveApis>,
    registry: Arc<ProviderRegistry>,
    mut changes: broadcast::Receiver<RegistryEvent>,
    token: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = token.cancelled() => return,
            change = changes.recv() => change,
        };
        match change {
            Ok(RegistryEvent::Removed { id } | RegistryEvent::Toggled { id, enabled: false }) => {
                if live.remove_inactive(&registry, &id).await {
                    tracing::debug!(provider_id = %id, "evicted api after registry change");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "registry events lagged; reconciling provider apis");
                let ids: Vec<String> = live.apis.read().await.keys().cloned().collect();
                for id in ids {
                    live.remove_inactive(&registry, &id).await;
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

impl ProviderApiDirectory {
    /// Creates an empty directory over `registry`. Must be called inside a
    /// tokio runtime for registry changes to be followed.
    pub fn new(registry: Arc<ProviderRegistry>, context: ProviderContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let live = Arc::new(LiveApis {
            apis: RwLock::new(HashMap::new()),
            events,
        });

        let follower = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let token = CancellationToken::new();
                handle.spawn(follow_registry(
                    live.clone(),
                    registry.clone(),
                    registry.subscribe(),
                    token.clone(),
                ));
                Some(token.drop_guard())
            }
            Err(_) => {
                tracing::warn!("no tokio runtime; provider apis will not follow registry changes");
                None
            }
        };

        Self {
            registry,
            context,
            live,
            _follower: follower,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    pub fn observe(&self) -> broadcast::Receiver<ApiEvent> {
        self.live.events.subscribe()
    }

    /// Instantiates `provider` and publishes the result under `id`. An
    /// existing instance is removed (and its removal announced) first.
    pub async fn add_api_from_provider(
        &self,
        id: &str,
        provider: &Arc<dyn Provider>,
    ) -> DirectoryResult<Arc<dyn ProviderApi>> {
        if self.registry.get(id).await.is_none() {
            return Err(DirectoryError::NotInstalled { id: id.to_string() });
        }
        if !self.registry.is_enabled(id).await {
            return Err(DirectoryError::Disabled { id: id.to_string() });
        }

        let api = guarded("instantiate", provider.instantiate(&self.context))
            .await
            .map_err(|source| DirectoryError::Instantiate {
                id: id.to_string(),
                source,
            })?;

        let previous = self
            .live
            .apis
            .write()
            .await
            .insert(id.to_string(), api.clone());
        if let Some(previous) = previous {
            self.live.announce_removal(id, &previous);
        }

        tracing::debug!(provider_id = %id, "provider api instantiated");
        let _ = self.live.events.send(ApiEvent::Added {
            id: id.to_string(),
            api: api.clone(),
        });
        Ok(api)
    }

    pub async fn add_api_from_id(&self, id: &str) -> DirectoryResult<Arc<dyn ProviderApi>> {
        let provider = self
            .registry
            .get_provider(id)
            .await
            .ok_or_else(|| DirectoryError::NotInstalled { id: id.to_string() })?;
        self.add_api_from_provider(id, &provider).await
    }

    /// Evicts the live instance; the removal event is sent before this
    /// returns.
    pub async fn remove_api(&self, id: &str) -> Option<Arc<dyn ProviderApi>> {
        self.live.remove(id).await
    }

    pub async fn get_api(&self, id: &str) -> Option<Arc<dyn ProviderApi>> {
        self.live.apis.read().await.get(id).cloned()
    }

    /// Live instances in provider priority order.
    pub async fn get_apis(&self) -> Vec<(String, Arc<dyn ProviderApi>)> {
        let ordered = self.registry.get_ordered_providers().await;
        let apis = self.live.apis.read().await;
        ordered
            .into_iter()
            .filter_map(|p| {
                let api = apis.get(p.id())?.clone();
                Some((p.metadata.id, api))
            })
            .collect()
    }

    pub async fn get_all(&self) -> HashMap<String, Arc<dyn ProviderApi>> {
        self.live.apis.read().await.clone()
    }
}

fn release(id: &str, api: &Arc<dyn ProviderApi>) {
    let web_view = guarded_sync("web_view", || Ok(api.web_view()));
    if let Ok(Some(view)) = web_view {
        let _ = guarded_sync("destroy", || {
            view.destroy();
            Ok(())
        });
        tracing::trace!(provider_id = %id, "released provider web view");
    }
}
