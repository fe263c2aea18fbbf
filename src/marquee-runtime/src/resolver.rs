//! Link resolution through the cache.

use crate::directory::ProviderApiDirectory;
use crate::guard::guarded;
use marquee_core::{
    CacheKey, CachedLinks, Episode, FilmDetails, LinkCache, MediaLink, ProviderError,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("provider {id} has no live api")]
    Unavailable { id: String },
    #[error("provider {id} failed to resolve links: {source}")]
    Provider {
        id: String,
        #[source]
        source: ProviderError,
    },
    #[error("no provider found streams for {film_id}")]
    NoStreams { film_id: String },
}

pub struct LinkResolver {
    directory: Arc<ProviderApiDirectory>,
    cache: Arc<LinkCache>,
}

impl LinkResolver {
    pub fn new(directory: Arc<ProviderApiDirectory>, cache: Arc<LinkCache>) -> Self {
        Self { directory, cache }
    }

    pub fn cache(&self) -> &Arc<LinkCache> {
        &self.cache
    }

    /// Returns cached links when they include a stream. Otherwise starts a
    /// fresh entry and fills it as the provider discovers links, so
    /// observers of the key see streams arrive one by one.
    ///
    /// A provider error after at least one stream was found still yields
    /// the partial entry.
    pub async fn resolve(
        &self,
        film: &FilmDetails,
        provider_id: &str,
        episode: Option<&Episode>,
    ) -> Result<CachedLinks, ResolveError> {
        let key = CacheKey::new(film.film.id.clone(), provider_id, episode);
        if let Some(cached) = self.cache.get_cache(&key) {
            if !cached.has_no_stream_links() {
                tracing::debug!(provider_id, film_id = %film.film.id, "serving cached links");
                return Ok(cached);
            }
        }

        let api = self
            .directory
            .get_api(provider_id)
            .await
            .ok_or_else(|| ResolveError::Unavailable {
                id: provider_id.to_string(),
            })?;

        let watch_id = episode.map_or(film.film.id.as_str(), |e| e.id.as_str());
        self.cache.store(
            key.clone(),
            CachedLinks::new(watch_id, provider_id, episode.cloned()),
        );

        let sink = {
            let cache = self.cache.clone();
            let key = key.clone();
            move |link: MediaLink| {
                match link {
                    MediaLink::Stream(stream) => cache.add_stream(&key, stream),
                    MediaLink::Subtitle(subtitle) => cache.add_subtitle(&key, subtitle),
                };
            }
        };

        let result = match api.web_view() {
            Some(web_view) => {
                guarded("get_links", web_view.get_links(watch_id, film, episode, &sink)).await
            }
            None => guarded("get_links", api.get_links(watch_id, film, episode, &sink)).await,
        };

        let links = self
            .cache
            .get_cache(&key)
            .unwrap_or_else(|| CachedLinks::new(watch_id, provider_id, episode.cloned()));
        match result {
            Ok(()) => Ok(links),
            Err(err) if !links.has_no_stream_links() => {
                tracing::warn!(provider_id, error = %err, streams = links.streams.len(), "link resolution ended early");
                Ok(links)
            }
            Err(source) => Err(ResolveError::Provider {
                id: provider_id.to_string(),
                source,
            }),
        }
    }

    /// Tries enabled providers in priority order until one finds a stream.
    pub async fn resolve_any(
        &self,
        film: &FilmDetails,
        episode: Option<&Episode>,
    ) -> Result<CachedLinks, ResolveError> {
        for (id, _) in self.directory.get_apis().await {
            match self.resolve(film, &id, episode).await {
                Ok(links) if !links.has_no_stream_links() => return Ok(links),
                Ok(_) => tracing::debug!(provider_id = %id, "provider found no streams"),
                Err(err) => tracing::debug!(provider_id = %id, error = %err, "provider failed"),
            }
        }
        Err(ResolveError::NoStreams {
            film_id: film.film.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preferences::{MemoryPreferenceStore, ProviderPreference};
    use crate::registry::ProviderRegistry;
    use crate::testing::{metadata, sample_movie, sample_show, FakeApi, StaticProvider};
    use marquee_core::{ProviderContext, Stream, Subtitle};
    use std::sync::atomic::Ordering;

    async fn resolver_with(apis: Vec<(&str, FakeApi)>) -> LinkResolver {
        let registry = Arc::new(
            ProviderRegistry::new(Arc::new(MemoryPreferenceStore::default())).unwrap(),
        );
        let directory = Arc::new(ProviderApiDirectory::new(
            registry.clone(),
            ProviderContext::default(),
        ));
        for (id, api) in apis {
            let meta = metadata(id, 1);
            registry
                .add(
                    Arc::new(StaticProvider::with_api(&meta, api)),
                    meta,
                    ProviderPreference {
                        id: id.into(),
                        name: id.into(),
                        file_path: None,
                        is_disabled: false,
                    },
                )
                .await
                .unwrap();
            directory.add_api_from_id(id).await.unwrap();
        }
        LinkResolver::new(directory, Arc::new(LinkCache::new()))
    }

    #[tokio::test]
    async fn resolves_into_cache_under_both_keys() {
        let resolver = resolver_with(vec![("alpha", FakeApi::working("alpha"))]).await;
        let film = sample_movie("alpha");

        let links = resolver.resolve(&film, "alpha", None).await.unwrap();

        assert_eq!(links.streams.len(), 1);
        assert_eq!(links.subtitles.len(), 1);
        let key = CacheKey::new(film.film.id.clone(), "alpha", None);
        assert_eq!(resolver.cache().get_cache(&key), Some(links.clone()));
        assert_eq!(resolver.cache().get_film_cache(&film.film.id), Some(links));
    }

    #[tokio::test]
    async fn cached_streams_skip_the_provider() {
        let api = FakeApi::working("alpha");
        let calls = api.link_calls.clone();
        let resolver = resolver_with(vec![("alpha", api)]).await;
        let film = sample_movie("alpha");

        resolver.resolve(&film, "alpha", None).await.unwrap();
        resolver.resolve(&film, "alpha", None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn episodes_are_cached_separately() {
        let resolver = resolver_with(vec![("alpha", FakeApi::working("alpha"))]).await;
        let show = sample_show("alpha");
        let episode = show.first_episode().unwrap().clone();

        let links = resolver.resolve(&show, "alpha", Some(&episode)).await.unwrap();
        assert_eq!(links.watch_id, episode.id);
        assert_eq!(links.episode.as_ref(), Some(&episode));
        assert!(resolver
            .cache()
            .get_cache(&CacheKey::new(show.film.id.clone(), "alpha", None))
            .is_none());
    }

    #[tokio::test]
    async fn partial_results_survive_provider_error() {
        let api = FakeApi::working("alpha")
            .with_links_error(ProviderError::Network {
                message: "dropped".into(),
            });
        let resolver = resolver_with(vec![("alpha", api)]).await;

        let links = resolver
            .resolve(&sample_movie("alpha"), "alpha", None)
            .await
            .unwrap();
        assert_eq!(links.streams.len(), 1);
    }

    #[tokio::test]
    async fn error_without_streams_is_reported() {
        let api = FakeApi::working("alpha")
            .with_links(vec![MediaLink::Subtitle(Subtitle::new("en", "https://x.invalid/en.vtt"))])
            .with_links_error(ProviderError::other("blocked"));
        let resolver = resolver_with(vec![("alpha", api)]).await;

        let err = resolver
            .resolve(&sample_movie("alpha"), "alpha", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Provider { .. }));
    }

    #[tokio::test]
    async fn resolve_any_falls_through_to_next_provider() {
        let empty = FakeApi::working("first").with_links(Vec::new());
        let good = FakeApi::working("second").with_links(vec![MediaLink::Stream(Stream::new(
            "720p",
            "https://second.invalid/720.m3u8",
        ))]);
        let resolver = resolver_with(vec![("first", empty), ("second", good)]).await;

        let links = resolver
            .resolve_any(&sample_movie("shared"), None)
            .await
            .unwrap();
        assert_eq!(links.provider_id, "second");
    }

    #[tokio::test]
    async fn unknown_provider_is_unavailable() {
        let resolver = resolver_with(Vec::new()).await;
        assert!(matches!(
            resolver.resolve(&sample_movie("x"), "x", None).await,
            Err(ResolveError::Unavailable { .. })
        ));
    }
}
