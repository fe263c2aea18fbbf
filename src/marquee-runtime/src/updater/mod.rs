//! Keeps installed providers current against their remote manifests.
//!
//! Manifest failures never propagate: an unreachable or malformed manifest
//! means "no update". Only a failed attempt to apply an update is reported.

mod manifest;

pub use manifest::{HttpManifestSource, ManifestCache, ManifestError, ManifestSource};

use crate::guard::guarded;
use crate::manager::{ProviderLoadError, ProviderManager};
use crate::registry::InstalledProvider;
use futures::future::join_all;
use marquee_core::ProviderMetadata;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderUpdateError {
    #[error("provider {id} is not installed")]
    NotInstalled { id: String },
    #[error("failed to apply update: {0}")]
    Apply(#[from] ProviderLoadError),
}

/// UI hook for update results.
pub trait UpdateNotifier: Send + Sync {
    fn updates_available(&self, count: usize);
    fn providers_updated(&self, count: usize);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateCheckOutcome {
    /// Ids with a newer remote version, in priority order.
    pub outdated: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<ProviderLoadError>,
}

pub struct ProviderUpdater {
    manager: Arc<ProviderManager>,
    manifests: ManifestCache,
    notifier: Option<Arc<dyn UpdateNotifier>>,
    auto_update: bool,
    /// Version codes of updates applied in this session.
    applied: Mutex<HashMap<String, u64>>,
}

impl ProviderUpdater {
    pub fn new(manager: Arc<ProviderManager>, source: Arc<dyn ManifestSource>, ttl: Duration) -> Self {
        Self {
            manager,
            manifests: ManifestCache::new(source, ttl),
            notifier: None,
            auto_update: false,
            applied: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn UpdateNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Applies updates during checks even when the stored preference is off.
    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    /// Latest published record for the provider, matched by id and then by
    /// name. `None` when there is no update URL or the manifest is unusable.
    pub async fn get_latest_provider_metadata(
        &self,
        provider: &InstalledProvider,
    ) -> Option<ProviderMetadata> {
        let id = provider.id();
        let Some(url) = provider.provider.manifest().update_url.clone() else {
            tracing::debug!(provider_id = %id, "provider has no update url");
            return None;
        };

        let records = match self.manifests.get(&url).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(provider_id = %id, error = %err, "update check failed");
                return None;
            }
        };
        let latest = records
            .iter()
            .find(|m| m.id == id)
            .or_else(|| records.iter().find(|m| m.name == provider.metadata.name))
            .cloned();
        if latest.is_none() {
            tracing::debug!(provider_id = %id, url, "provider missing from its manifest");
        }
        latest
    }

    /// True iff `latest` is newer than both the installed build and any
    /// update already applied for it.
    pub fn is_provider_outdated(&self, provider: &InstalledProvider, latest: &ProviderMetadata) -> bool {
        let installed = provider.provider.manifest().version_code;
        let applied = self
            .applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider.id())
            .copied()
            .unwrap_or(0);
        latest.version_code > installed.max(applied)
    }

    /// Installs and swaps in the latest build when it is newer. Returns
    /// whether an update was applied.
    pub async fn update_provider(&self, id: &str) -> Result<bool, ProviderUpdateError> {
        let provider = self
            .manager
            .registry()
            .get(id)
            .await
            .ok_or_else(|| ProviderUpdateError::NotInstalled { id: id.to_string() })?;
        let Some(latest) = self.get_latest_provider_metadata(&provider).await else {
            return Ok(false);
        };
        if !self.is_provider_outdated(&provider, &latest) {
            return Ok(false);
        }
        self.apply(&provider, &latest).await?;
        Ok(true)
    }

    async fn apply(
        &self,
        provider: &InstalledProvider,
        latest: &ProviderMetadata,
    ) -> Result<(), ProviderLoadError> {
        let loaded = guarded("install", self.manager.installer().install(latest))
            .await
            .map_err(|cause| ProviderLoadError::new(&provider.metadata.name, cause))?;
        self.manager.replace(loaded).await?;
        self.applied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(provider.id().to_string(), latest.version_code);
        tracing::info!(
            provider_id = %provider.id(),
            from = provider.metadata.version_code,
            to = latest.version_code,
            "provider updated"
        );
        Ok(())
    }

    /// Checks every installed provider. Outdated ones are updated when auto
    /// update is on (here or in the stored preferences); otherwise they are
    /// only reported.
    pub async fn check_for_updates(&self, notify: bool) -> UpdateCheckOutcome {
        let auto_update = self.auto_update || self.manager.registry().preferences().await.auto_update;
        self.check(notify, auto_update).await
    }

    /// Like [`check_for_updates`](Self::check_for_updates) but always applies.
    pub async fn apply_all_updates(&self, notify: bool) -> UpdateCheckOutcome {
        self.check(notify, true).await
    }

    async fn check(&self, notify: bool, apply: bool) -> UpdateCheckOutcome {
        let providers = self.manager.registry().get_ordered_providers().await;
        let latest = join_all(
            providers
                .iter()
                .map(|provider| self.get_latest_provider_metadata(provider)),
        )
        .await;

        let mut outcome = UpdateCheckOutcome::default();
        let mut pending = Vec::new();
        for (provider, latest) in providers.iter().zip(latest) {
            if let Some(latest) = latest.filter(|l| self.is_provider_outdated(provider, l)) {
                outcome.outdated.push(provider.id().to_string());
                pending.push((provider, latest));
            }
        }

        if apply {
            for (provider, latest) in pending {
                match self.apply(provider, &latest).await {
                    Ok(()) => outcome.updated.push(provider.id().to_string()),
                    Err(err) => {
                        tracing::warn!(provider_id = %provider.id(), error = %err, "provider update failed");
                        outcome.failed.push(err);
                    }
                }
            }
        }

        tracing::info!(
            outdated = outcome.outdated.len(),
            updated = outcome.updated.len(),
            failed = outcome.failed.len(),
            "provider update check finished"
        );
        if notify {
            if let Some(notifier) = &self.notifier {
                if apply && !outcome.updated.is_empty() {
                    notifier.providers_updated(outcome.updated.len());
                } else if !apply && !outcome.outdated.is_empty() {
                    notifier.updates_available(outcome.outdated.len());
                }
            }
        }
        outcome
    }
}
