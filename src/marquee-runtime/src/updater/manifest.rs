//! Remote update manifests and the per-URL cache in front of them.

use async_trait::async_trait;
use marquee_core::ProviderMetadata;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("failed to fetch manifest {url}: {message}")]
    Network { url: String, message: String },
    #[error("invalid manifest {url}: {message}")]
    Parse { url: String, message: String },
}

/// Fetches the JSON array of [`ProviderMetadata`] published at a URL.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<ProviderMetadata>, ManifestError>;
}

pub struct HttpManifestSource {
    client: reqwest::Client,
}

impl HttpManifestSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, url: &str) -> Result<Vec<ProviderMetadata>, ManifestError> {
        let network = |e: reqwest::Error| ManifestError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };
        let body = self
            .client
            .get(url)
            .send()
            .await
            .map_err(network)?
            .error_for_status()
            .map_err(network)?
            .text()
            .await
            .map_err(network)?;
        serde_json::from_str(&body).map_err(|e| ManifestError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

struct CachedManifest {
    fetched_at: Instant,
    records: Arc<Vec<ProviderMetadata>>,
}

type Slot = Arc<AsyncMutex<Option<CachedManifest>>>;

/// Serves manifests younger than `ttl` from memory.
///
/// Each URL has its own slot, locked across the fetch, so concurrent misses
/// for one URL share a single request. Failed fetches are not cached.
pub struct ManifestCache {
    source: Arc<dyn ManifestSource>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ManifestCache {
    pub fn new(source: Arc<dyn ManifestSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, url: &str) -> Result<Arc<Vec<ProviderMetadata>>, ManifestError> {
        let slot = self.slot(url);
        let mut entry = slot.lock().await;
        if let Some(cached) = entry
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
        {
            tracing::trace!(url, "manifest cache hit");
            return Ok(cached.records.clone());
        }

        let records = Arc::new(self.source.fetch(url).await?);
        tracing::debug!(url, records = records.len(), "fetched provider manifest");
        *entry = Some(CachedManifest {
            fetched_at: Instant::now(),
            records: records.clone(),
        });
        Ok(records)
    }

    fn slot(&self, url: &str) -> Slot {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(url.to_string())
            .or_default()
            .clone()
    }

    pub fn invalidate(&self, url: &str) {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::metadata;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WINDOW: Duration = Duration::from_secs(30 * 60);

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestSource for CountingSource {
        async fn fetch(&self, _url: &str) -> Result<Vec<ProviderMetadata>, ManifestError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
            Ok(vec![metadata("alpha", n + 1)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_once_within_window() {
        let source = Arc::new(CountingSource::default());
        let cache = ManifestCache::new(source.clone(), WINDOW);

        cache.get("https://a.invalid/manifest.json").await.unwrap();
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        let records = cache.get("https://a.invalid/manifest.json").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(records[0].version_code, 1);
    }

    /// Takes a while to answer, like a slow manifest host.
    #[derive(Default)]
    struct SlowSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ManifestSource for SlowSource {
        async fn fetch(&self, _url: &str) -> Result<Vec<ProviderMetadata>, ManifestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![metadata("alpha", 1), metadata("beta", 1)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(SlowSource::default());
        let cache = ManifestCache::new(source.clone(), WINDOW);
        let url = "https://a.invalid/shared.json";

        let (first, second) = tokio::join!(cache.get(url), cache.get(url));

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_on_different_urls_do_not_wait_on_each_other() {
        let source = Arc::new(SlowSource::default());
        let cache = ManifestCache::new(source.clone(), WINDOW);
        let started = Instant::now();

        let (one, two) = tokio::join!(
            cache.get("https://a.invalid/one.json"),
            cache.get("https://a.invalid/two.json")
        );

        assert!(one.is_ok() && two.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn refetches_after_window() {
        let source = Arc::new(CountingSource::default());
        let cache = ManifestCache::new(source.clone(), WINDOW);

        cache.get("https://a.invalid/manifest.json").await.unwrap();
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        let records = cache.get("https://a.invalid/manifest.json").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(records[0].version_code, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn urls_are_cached_independently() {
        let source = Arc::new(CountingSource::default());
        let cache = ManifestCache::new(source.clone(), WINDOW);

        cache.get("https://a.invalid/one.json").await.unwrap();
        cache.get("https://a.invalid/two.json").await.unwrap();
        cache.get("https://a.invalid/one.json").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        cache.invalidate("https://a.invalid/one.json");
        cache.get("https://a.invalid/one.json").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn http_source_hits_network_once_per_window() {
        let server = MockServer::start().await;
        let body = serde_json::to_string(&vec![metadata("alpha", 4)]).unwrap();
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let cache = ManifestCache::new(
            Arc::new(HttpManifestSource::new(reqwest::Client::new())),
            WINDOW,
        );
        let url = format!("{}/manifest.json", server.uri());
        let first = cache.get(&url).await.unwrap();
        let second = cache.get(&url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].version_code, 4);
    }

    #[tokio::test]
    async fn http_source_reports_parse_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"an array\"}"))
            .mount(&server)
            .await;

        let source = HttpManifestSource::new(reqwest::Client::new());
        let err = source
            .fetch(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[tokio::test]
    async fn http_source_reports_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpManifestSource::new(reqwest::Client::new());
        let err = source
            .fetch(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::Network { .. }));
    }
}
