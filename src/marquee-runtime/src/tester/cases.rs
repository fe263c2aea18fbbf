//! The fixed conformance script.
//!
//! Property cases read values the API computed at construction. Method cases
//! make live calls and depend on the test film found by the first property
//! case.

use crate::guard::{guarded, guarded_sync};
use marquee_core::{
    Episode, FilmDetails, FilmType, MediaLink, ProviderApi, ProviderError, ProviderResult,
    SearchQuery,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    TestFilm,
    Catalogs,
    Filters,
    CatalogItems,
    Search,
    Metadata,
    Links,
}

impl TestCase {
    pub const PROPERTIES: [TestCase; 3] = [TestCase::TestFilm, TestCase::Catalogs, TestCase::Filters];
    pub const METHODS: [TestCase; 4] = [
        TestCase::CatalogItems,
        TestCase::Search,
        TestCase::Metadata,
        TestCase::Links,
    ];

    /// Every case in the order it runs.
    pub fn script() -> impl Iterator<Item = TestCase> {
        Self::PROPERTIES.into_iter().chain(Self::METHODS)
    }

    pub fn name(self) -> &'static str {
        match self {
            TestCase::TestFilm => "Test film",
            TestCase::Catalogs => "Catalogs",
            TestCase::Filters => "Filters",
            TestCase::CatalogItems => "Get catalog items",
            TestCase::Search => "Search",
            TestCase::Metadata => "Get metadata",
            TestCase::Links => "Get links",
        }
    }

    pub fn is_property(self) -> bool {
        Self::PROPERTIES.contains(&self)
    }

    /// Nothing else runs for the provider unless this case succeeds.
    pub fn stops_on_failure(self) -> bool {
        self == TestCase::TestFilm
    }
}

/// State carried between the cases of one provider.
#[derive(Default)]
pub(crate) struct CaseState {
    pub film: Option<FilmDetails>,
}

/// Runs one case, returning its short log on success. Method cases are
/// bounded by `timeout`.
pub(crate) async fn run_case(
    case: TestCase,
    api: &Arc<dyn ProviderApi>,
    state: &mut CaseState,
    timeout: Duration,
) -> ProviderResult<String> {
    if case.is_property() {
        return run_property(case, api.as_ref(), state);
    }

    let film = state
        .film
        .clone()
        .ok_or_else(|| ProviderError::other("no test film to run against"))?;
    let call = run_method(case, api.as_ref(), &film);
    match tokio::time::timeout(timeout, guarded(case.name(), call)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::other(format!(
            "timed out after {}s",
            timeout.as_secs_f32()
        ))),
    }
}

fn run_property(case: TestCase, api: &dyn ProviderApi, state: &mut CaseState) -> ProviderResult<String> {
    guarded_sync(case.name(), || match case {
        TestCase::TestFilm => {
            let film = api.test_film()?;
            if film.film.film_type == FilmType::TvShow && film.first_episode().is_none() {
                return Err(ProviderError::other("test show has no episodes"));
            }
            let log = format!("{} ({})", film.film.title, film.film.id);
            state.film = Some(film);
            Ok(log)
        }
        TestCase::Catalogs => {
            let catalogs = api.catalogs()?;
            non_empty(catalogs.len(), "catalogs")
        }
        TestCase::Filters => {
            let filters = api.filters()?;
            non_empty(filters.len(), "filter groups")
        }
        _ => Err(ProviderError::other(format!("{} is not a property", case.name()))),
    })
}

async fn run_method(case: TestCase, api: &dyn ProviderApi, film: &FilmDetails) -> ProviderResult<String> {
    match case {
        TestCase::CatalogItems => {
            let catalogs = api.catalogs()?;
            let catalog = catalogs
                .first()
                .ok_or_else(|| ProviderError::other("no catalog to list"))?;
            let page = api.get_catalog_items(catalog, 1).await?;
            non_empty(page.items.len(), &format!("items in {}", catalog.name))
        }
        TestCase::Search => {
            let page = api.search(&SearchQuery::for_film(&film.film)).await?;
            non_empty(page.items.len(), &format!("results for \"{}\"", film.film.title))
        }
        TestCase::Metadata => {
            let details = api.get_metadata(&film.film).await?;
            if details.film.id != film.film.id {
                return Err(ProviderError::other(format!(
                    "metadata returned {} instead of {}",
                    details.film.id, film.film.id
                )));
            }
            Ok(format!("{} genres, {} seasons", details.genres.len(), details.seasons.len()))
        }
        TestCase::Links => fetch_links(api, film).await,
        _ => Err(ProviderError::other(format!("{} is not a method", case.name()))),
    }
}

/// Uses the WebView variant when the provider offers one. Shows are checked
/// through their first episode.
async fn fetch_links(api: &dyn ProviderApi, film: &FilmDetails) -> ProviderResult<String> {
    let episode: Option<&Episode> = match film.film.film_type {
        FilmType::TvShow => Some(
            film.first_episode()
                .ok_or_else(|| ProviderError::other("test show has no episodes"))?,
        ),
        FilmType::Movie => None,
    };
    let watch_id = episode.map_or(film.film.id.as_str(), |e| e.id.as_str());

    let found: Arc<Mutex<Vec<MediaLink>>> = Arc::default();
    let sink = {
        let found = found.clone();
        move |link: MediaLink| {
            found
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(link);
        }
    };

    let via = match api.web_view() {
        Some(web_view) => {
            web_view.get_links(watch_id, film, episode, &sink).await?;
            " via web view"
        }
        None => {
            api.get_links(watch_id, film, episode, &sink).await?;
            ""
        }
    };

    let links = found.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let streams = links.iter().filter(|l| matches!(l, MediaLink::Stream(_))).count();
    let subtitles = links.len() - streams;
    if streams == 0 {
        return Err(ProviderError::NotFound {
            entity: format!("stream links for {watch_id}"),
        });
    }
    Ok(format!("{streams} streams, {subtitles} subtitles{via}"))
}

fn non_empty(count: usize, what: &str) -> ProviderResult<String> {
    if count == 0 {
        Err(ProviderError::other(format!("no {what} returned")))
    } else {
        Ok(format!("{count} {what}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_show, FakeApi, FakeWebView};
    use marquee_core::Stream;
    use std::sync::atomic::Ordering;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn run_all(api: FakeApi) -> Vec<(TestCase, ProviderResult<String>)> {
        let api: Arc<dyn ProviderApi> = Arc::new(api);
        let mut state = CaseState::default();
        let mut out = Vec::new();
        for case in TestCase::script() {
            out.push((case, run_case(case, &api, &mut state, TIMEOUT).await));
        }
        out
    }

    #[test]
    fn script_order_is_fixed() {
        let names: Vec<_> = TestCase::script().map(TestCase::name).collect();
        assert_eq!(
            names,
            vec![
                "Test film",
                "Catalogs",
                "Filters",
                "Get catalog items",
                "Search",
                "Get metadata",
                "Get links"
            ]
        );
        assert!(TestCase::TestFilm.stops_on_failure());
        assert!(!TestCase::Links.stops_on_failure());
    }

    #[tokio::test]
    async fn working_api_passes_everything() {
        for (case, result) in run_all(FakeApi::working("demo")).await {
            assert!(result.is_ok(), "{} failed: {result:?}", case.name());
        }
    }

    #[tokio::test]
    async fn links_without_streams_fail() {
        let api = FakeApi::working("demo").with_links(Vec::new());
        let results = run_all(api).await;
        let (_, links) = results.last().unwrap();
        assert!(matches!(links, Err(ProviderError::NotFound { .. })));
    }

    #[tokio::test]
    async fn web_view_is_preferred() {
        let api = FakeApi::working("demo").with_web_view(FakeWebView::new(vec![MediaLink::Stream(
            Stream::new("web", "https://web.invalid/a.m3u8"),
        )]));
        let direct_calls = api.link_calls.clone();
        let view = api.web_view.clone().unwrap();

        let results = run_all(api).await;
        let (_, links) = results.last().unwrap();
        assert_eq!(links.as_deref(), Ok("1 streams, 0 subtitles via web view"));
        assert_eq!(direct_calls.load(Ordering::SeqCst), 0);
        assert_eq!(view.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn show_links_use_first_episode() {
        let api = FakeApi::working("demo").with_test_film(Ok(sample_show("demo")));
        let results = run_all(api).await;
        let (_, links) = results.last().unwrap();
        assert!(links.is_ok());
    }

    #[tokio::test]
    async fn panicking_search_is_contained() {
        let results = run_all(FakeApi::working("demo").panicking_on_search()).await;
        let (_, search) = &results[4];
        match search {
            Err(ProviderError::Other { message }) => assert!(message.contains("search exploded")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_method_times_out() {
        let api: Arc<dyn ProviderApi> =
            Arc::new(FakeApi::working("demo").with_delay(Duration::from_secs(30)));
        let mut state = CaseState::default();
        run_case(TestCase::TestFilm, &api, &mut state, TIMEOUT).await.unwrap();

        let err = run_case(TestCase::Search, &api, &mut state, TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::other("timed out after 5s"));
    }
}
