//! Provider adapters that turn a plugin process into a `Provider` and its
//! `ProviderApi`.

use crate::host::{ExecPluginHost, PluginHostError};
use crate::protocol::{InstanceInfo, PluginInfo, PluginMethod, PluginResult};
use async_trait::async_trait;
use marquee_core::{
    Catalog, Episode, Film, FilmDetails, FilterGroup, LinkSink, Page, Provider, ProviderApi,
    ProviderContext, ProviderError, ProviderManifest, ProviderMetadata, ProviderResult,
    SearchQuery,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;

/// A provider backed by an external plugin process.
///
/// Every api it instantiates shares the same process.
pub struct ExecProvider {
    host: Arc<ExecPluginHost>,
    metadata: ProviderMetadata,
    manifest: ProviderManifest,
}

impl ExecProvider {
    pub fn new(host: Arc<ExecPluginHost>, info: PluginInfo) -> Self {
        Self {
            host,
            metadata: info.metadata,
            manifest: info.manifest,
        }
    }

    /// Metadata the plugin reported during the handshake.
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }
}

#[async_trait]
impl Provider for ExecProvider {
    fn manifest(&self) -> &ProviderManifest {
        &self.manifest
    }

    async fn instantiate(&self, _context: &ProviderContext) -> ProviderResult<Arc<dyn ProviderApi>> {
        let instance = match call(&self.host, PluginMethod::Instantiate).await? {
            PluginResult::Instance(instance) => instance,
            other => return Err(unexpected("Instantiate", &other)),
        };
        tracing::debug!(
            provider_id = %self.manifest.id,
            catalogs = instance.catalogs.as_ref().map_or(0, Vec::len),
            has_test_film = instance.test_film.is_some(),
            "instantiated plugin api"
        );
        Ok(Arc::new(ExecProviderApi {
            host: self.host.clone(),
            instance,
        }))
    }

    fn unload(&self) {
        tracing::debug!(provider_id = %self.manifest.id, "stopping plugin process");
        self.host.stop();
    }
}

/// Api object whose properties were captured at instantiation and whose
/// methods are forwarded to the plugin process.
pub struct ExecProviderApi {
    host: Arc<ExecPluginHost>,
    instance: InstanceInfo,
}

#[async_trait]
impl ProviderApi for ExecProviderApi {
    fn test_film(&self) -> ProviderResult<FilmDetails> {
        self.instance
            .test_film
            .clone()
            .ok_or_else(|| ProviderError::not_implemented("test_film"))
    }

    fn catalogs(&self) -> ProviderResult<Vec<Catalog>> {
        self.instance
            .catalogs
            .clone()
            .ok_or_else(|| ProviderError::not_implemented("catalogs"))
    }

    fn filters(&self) -> ProviderResult<Vec<FilterGroup>> {
        self.instance
            .filters
            .clone()
            .ok_or_else(|| ProviderError::not_implemented("filters"))
    }

    async fn get_catalog_items(&self, catalog: &Catalog, page: u32) -> ProviderResult<Page<Film>> {
        let method = PluginMethod::GetCatalogItems {
            catalog: catalog.clone(),
            page,
        };
        match call(&self.host, method).await? {
            PluginResult::Films(films) => Ok(films),
            other => Err(unexpected("GetCatalogItems", &other)),
        }
    }

    async fn search(&self, query: &SearchQuery) -> ProviderResult<Page<Film>> {
        let method = PluginMethod::Search {
            query: query.clone(),
        };
        match call(&self.host, method).await? {
            PluginResult::Films(films) => Ok(films),
            other => Err(unexpected("Search", &other)),
        }
    }

    async fn get_metadata(&self, film: &Film) -> ProviderResult<FilmDetails> {
        let method = PluginMethod::GetMetadata { film: film.clone() };
        match call(&self.host, method).await? {
            PluginResult::Details(details) => Ok(details),
            other => Err(unexpected("GetMetadata", &other)),
        }
    }

    async fn get_links(
        &self,
        watch_id: &str,
        film: &FilmDetails,
        episode: Option<&Episode>,
        on_link_found: &LinkSink<'_>,
    ) -> ProviderResult<()> {
        let method = PluginMethod::GetLinks {
            watch_id: watch_id.to_string(),
            film: film.clone(),
            episode: episode.cloned(),
        };

        // Links cross from the blocking reader to this task as they are read.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = self.host.clone();
        let reader = tokio::task::spawn_blocking(move || {
            host.stream_links(method, |link| {
                let _ = tx.send(link);
            })
        });

        while let Some(link) = rx.recv().await {
            on_link_found(link);
        }

        reader.await.map_err(aborted)?.map_err(ProviderError::from)
    }
}

async fn call(host: &Arc<ExecPluginHost>, method: PluginMethod) -> ProviderResult<PluginResult> {
    let host = host.clone();
    tokio::task::spawn_blocking(move || host.send_request(method))
        .await
        .map_err(aborted)?
        .map_err(ProviderError::from)
}

fn aborted(err: JoinError) -> ProviderError {
    ProviderError::other(format!("plugin call aborted: {err}"))
}

fn unexpected(method: &'static str, result: &PluginResult) -> ProviderError {
    PluginHostError::UnexpectedResponse {
        method,
        received: result.name(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PluginConfig;

    fn idle_api(instance: InstanceInfo) -> ExecProviderApi {
        ExecProviderApi {
            host: Arc::new(ExecPluginHost::new(PluginConfig::new("/nonexistent/plugin"))),
            instance,
        }
    }

    #[test]
    fn missing_properties_are_not_implemented() {
        let api = idle_api(InstanceInfo::default());
        assert!(api.test_film().unwrap_err().is_not_implemented());
        assert!(api.catalogs().unwrap_err().is_not_implemented());
        assert!(api.filters().unwrap_err().is_not_implemented());
    }

    #[test]
    fn present_properties_are_served_without_a_process() {
        let api = idle_api(InstanceInfo {
            catalogs: Some(vec![Catalog {
                name: "Latest".into(),
                url: "latest".into(),
                image: None,
                can_paginate: true,
            }]),
            filters: Some(Vec::new()),
            ..InstanceInfo::default()
        });
        assert_eq!(api.catalogs().unwrap().len(), 1);
        assert!(api.filters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn calls_without_a_process_fail_as_network_errors() {
        let api = idle_api(InstanceInfo::default());
        let err = api.search(&SearchQuery::title("heat")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network { .. }));
    }

    #[test]
    fn unexpected_results_name_both_sides() {
        let err = unexpected("Search", &PluginResult::LinksDone);
        assert_eq!(
            err.to_string(),
            "unexpected LinksDone response to Search"
        );
    }
}
