//! In-process fakes for exercising the runtime without real plugins.
//!
//! Used by this crate's tests and by embedders that want a provider which
//! behaves predictably. Compiled for this crate's tests and behind the
//! `testing` feature.

use async_trait::async_trait;
use marquee_core::{
    Catalog, Episode, Film, FilmDetails, FilmType, FilterGroup, LinkSink, MediaLink, Page,
    Provider, ProviderApi, ProviderContext, ProviderError, ProviderManifest, ProviderMetadata,
    ProviderResult, ProviderWebView, SearchQuery, Season, Stream, Subtitle,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn metadata(id: &str, version_code: u64) -> ProviderMetadata {
    ProviderMetadata {
        id: id.to_string(),
        name: format!("{id} provider"),
        version_code,
        version_name: format!("1.0.{version_code}"),
        authors: Vec::new(),
        repository_url: None,
        build_url: format!("https://builds.invalid/{id}/{version_code}"),
        status: Default::default(),
        language: "en".to_string(),
        provider_type: None,
        icon_url: None,
        description: None,
        changelog: None,
    }
}

pub fn sample_movie(provider_id: &str) -> FilmDetails {
    FilmDetails {
        film: Film {
            id: format!("{provider_id}-movie"),
            provider_id: provider_id.to_string(),
            title: "The Sample".to_string(),
            film_type: FilmType::Movie,
            year: Some(2001),
            poster_image: Some(format!("https://img.invalid/{provider_id}/poster.jpg")),
            backdrop_image: Some(format!("https://img.invalid/{provider_id}/backdrop.jpg")),
            tmdb_id: Some(42),
            imdb_id: Some("tt0000042".to_string()),
        },
        overview: Some("A film used for checks.".to_string()),
        genres: vec!["Drama".to_string()],
        seasons: Vec::new(),
    }
}

pub fn sample_show(provider_id: &str) -> FilmDetails {
    let mut details = sample_movie(provider_id);
    details.film.id = format!("{provider_id}-show");
    details.film.film_type = FilmType::TvShow;
    details.seasons = vec![Season {
        number: 1,
        episodes: vec![Episode {
            id: format!("{provider_id}-s1e1"),
            season: 1,
            number: 1,
            title: Some("Pilot".to_string()),
        }],
    }];
    details
}

/// A scriptable [`ProviderApi`].
#[derive(Clone)]
pub struct FakeApi {
    pub test_film: ProviderResult<FilmDetails>,
    pub catalogs: ProviderResult<Vec<Catalog>>,
    pub filters: ProviderResult<Vec<FilterGroup>>,
    /// Returned by both catalog listing and search.
    pub films: ProviderResult<Vec<Film>>,
    pub links: Vec<MediaLink>,
    pub links_error: Option<ProviderError>,
    pub delay: Duration,
    pub panic_on_search: bool,
    pub web_view: Option<Arc<FakeWebView>>,
    pub link_calls: Arc<AtomicUsize>,
}

impl FakeApi {
    /// Passes every conformance check.
    pub fn working(provider_id: &str) -> Self {
        let film = sample_movie(provider_id);
        Self {
            catalogs: Ok(vec![Catalog {
                name: "Trending".to_string(),
                url: format!("https://{provider_id}.invalid/trending"),
                image: None,
                can_paginate: true,
            }]),
            filters: Ok(vec![FilterGroup {
                name: "Genre".to_string(),
                options: vec!["Drama".to_string(), "Comedy".to_string()],
                selected: None,
            }]),
            films: Ok(vec![film.film.clone()]),
            test_film: Ok(film),
            links: vec![
                MediaLink::Stream(Stream::new("1080p", format!("https://{provider_id}.invalid/1080.m3u8"))),
                MediaLink::Subtitle(Subtitle::new("en", format!("https://{provider_id}.invalid/en.vtt"))),
            ],
            links_error: None,
            delay: Duration::ZERO,
            panic_on_search: false,
            web_view: None,
            link_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Implements nothing but `get_links`, which finds nothing.
    pub fn bare() -> Self {
        Self {
            test_film: Err(ProviderError::not_implemented("test_film")),
            catalogs: Err(ProviderError::not_implemented("catalogs")),
            filters: Err(ProviderError::not_implemented("filters")),
            films: Err(ProviderError::not_implemented("search")),
            links: Vec::new(),
            links_error: None,
            delay: Duration::ZERO,
            panic_on_search: false,
            web_view: None,
            link_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_test_film(mut self, film: ProviderResult<FilmDetails>) -> Self {
        self.test_film = film;
        self
    }

    pub fn with_links(mut self, links: Vec<MediaLink>) -> Self {
        self.links = links;
        self
    }

    pub fn with_links_error(mut self, error: ProviderError) -> Self {
        self.links_error = Some(error);
        self
    }

    /// Every async call sleeps for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn panicking_on_search(mut self) -> Self {
        self.panic_on_search = true;
        self
    }

    pub fn with_web_view(mut self, web_view: FakeWebView) -> Self {
        self.web_view = Some(Arc::new(web_view));
        self
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl ProviderApi for FakeApi {
    fn test_film(&self) -> ProviderResult<FilmDetails> {
        self.test_film.clone()
    }

    fn catalogs(&self) -> ProviderResult<Vec<Catalog>> {
        self.catalogs.clone()
    }

    fn filters(&self) -> ProviderResult<Vec<FilterGroup>> {
        self.filters.clone()
    }

    async fn get_catalog_items(&self, _catalog: &Catalog, page: u32) -> ProviderResult<Page<Film>> {
        self.pause().await;
        let items = self.films.clone()?;
        Ok(Page {
            items,
            page,
            has_next_page: false,
        })
    }

    async fn search(&self, _query: &SearchQuery) -> ProviderResult<Page<Film>> {
        self.pause().await;
        if self.panic_on_search {
            panic!("search exploded");
        }
        self.films.clone().map(Page::single_page)
    }

    async fn get_metadata(&self, film: &Film) -> ProviderResult<FilmDetails> {
        self.pause().await;
        let details = self.test_film.clone()?;
        if details.film.id == film.id {
            Ok(details)
        } else {
            Err(ProviderError::NotFound {
                entity: film.id.clone(),
            })
        }
    }

    async fn get_links(
        &self,
        _watch_id: &str,
        _film: &FilmDetails,
        _episode: Option<&Episode>,
        on_link_found: &LinkSink<'_>,
    ) -> ProviderResult<()> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        for link in &self.links {
            self.pause().await;
            on_link_found(link.clone());
        }
        match &self.links_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn web_view(&self) -> Option<Arc<dyn ProviderWebView>> {
        self.web_view
            .clone()
            .map(|view| view as Arc<dyn ProviderWebView>)
    }
}

/// WebView variant that reports the links it was built with.
#[derive(Default)]
pub struct FakeWebView {
    pub links: Vec<MediaLink>,
    pub calls: AtomicUsize,
    pub destroyed: AtomicBool,
}

impl FakeWebView {
    pub fn new(links: Vec<MediaLink>) -> Self {
        Self {
            links,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ProviderWebView for FakeWebView {
    async fn get_links(
        &self,
        _watch_id: &str,
        _film: &FilmDetails,
        _episode: Option<&Episode>,
        on_link_found: &LinkSink<'_>,
    ) -> ProviderResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for link in &self.links {
            on_link_found(link.clone());
        }
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// A [`Provider`] that hands out one fixed API instance.
pub struct StaticProvider {
    manifest: ProviderManifest,
    api: Arc<dyn ProviderApi>,
    instantiate_error: Option<ProviderError>,
    pub instantiations: AtomicUsize,
    pub unloaded: AtomicBool,
}

impl StaticProvider {
    pub fn new(metadata: &ProviderMetadata) -> Self {
        Self::with_api(metadata, FakeApi::working(&metadata.id))
    }

    pub fn with_api(metadata: &ProviderMetadata, api: impl ProviderApi + 'static) -> Self {
        Self {
            manifest: ProviderManifest::from_metadata(metadata, None),
            api: Arc::new(api),
            instantiate_error: None,
            instantiations: AtomicUsize::new(0),
            unloaded: AtomicBool::new(false),
        }
    }

    pub fn with_update_url(mut self, url: impl Into<String>) -> Self {
        self.manifest.update_url = Some(url.into());
        self
    }

    /// Every `instantiate` fails with `error`.
    pub fn failing(mut self, error: ProviderError) -> Self {
        self.instantiate_error = Some(error);
        self
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn manifest(&self) -> &ProviderManifest {
        &self.manifest
    }

    async fn instantiate(&self, _context: &ProviderContext) -> ProviderResult<Arc<dyn ProviderApi>> {
        self.instantiations.fetch_add(1, Ordering::SeqCst);
        match &self.instantiate_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.api.clone()),
        }
    }

    fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }
}
