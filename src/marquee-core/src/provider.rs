use crate::metadata::{ProviderManifest, ProviderMetadata};
use crate::models::{
    Catalog, Episode, Film, FilmDetails, FilterGroup, MediaLink, Page, SearchQuery,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Common categories of provider failures surfaced to the core/UI.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("network error: {message}")]
    Network { message: String },
    #[error("entity not found: {entity}")]
    NotFound { entity: String },
    /// The provider author chose not to support this operation.
    #[error("not implemented: {operation}")]
    NotImplemented { operation: String },
    #[error("failed to parse provider response: {message}")]
    Parse { message: String },
    #[error("{message}")]
    Other { message: String },
}

impl ProviderError {
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse {
                message: err.to_string(),
            }
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Receives links as `get_links` discovers them.
///
/// May be invoked any number of times, from a background task, until the
/// `get_links` call that received it returns. It must not be retained after
/// that.
pub type LinkSink<'a> = dyn Fn(MediaLink) + Send + Sync + 'a;

/// Ambient resources handed to a provider when its API is instantiated.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub client: reqwest::Client,
}

impl ProviderContext {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// The live capability object a provider produces.
///
/// Catalogs, filters and the test film are computed at construction and
/// read-only afterwards. The defaults report `NotImplemented`, which lets a
/// provider opt out of a capability explicitly.
#[async_trait::async_trait]
pub trait ProviderApi: Send + Sync {
    /// Canonical sample film used by the conformance tester.
    fn test_film(&self) -> ProviderResult<FilmDetails> {
        Err(ProviderError::not_implemented("test_film"))
    }

    fn catalogs(&self) -> ProviderResult<Vec<Catalog>> {
        Err(ProviderError::not_implemented("catalogs"))
    }

    fn filters(&self) -> ProviderResult<Vec<FilterGroup>> {
        Err(ProviderError::not_implemented("filters"))
    }

    async fn get_catalog_items(&self, _catalog: &Catalog, _page: u32) -> ProviderResult<Page<Film>> {
        Err(ProviderError::not_implemented("get_catalog_items"))
    }

    async fn search(&self, _query: &SearchQuery) -> ProviderResult<Page<Film>> {
        Err(ProviderError::not_implemented("search"))
    }

    async fn get_metadata(&self, _film: &Film) -> ProviderResult<FilmDetails> {
        Err(ProviderError::not_implemented("get_metadata"))
    }

    /// Resolves links for a film (or one of its episodes), streaming each
    /// discovery into `on_link_found` before the call completes.
    async fn get_links(
        &self,
        watch_id: &str,
        film: &FilmDetails,
        episode: Option<&Episode>,
        on_link_found: &LinkSink<'_>,
    ) -> ProviderResult<()>;

    /// Providers that need a browser engine to resolve links return their
    /// WebView-driven variant here; callers must then use it instead of
    /// [`ProviderApi::get_links`].
    fn web_view(&self) -> Option<Arc<dyn ProviderWebView>> {
        None
    }
}

/// WebView-driven link resolution.
#[async_trait::async_trait]
pub trait ProviderWebView: Send + Sync {
    async fn get_links(
        &self,
        watch_id: &str,
        film: &FilmDetails,
        episode: Option<&Episode>,
        on_link_found: &LinkSink<'_>,
    ) -> ProviderResult<()>;

    /// Releases the underlying browser engine.
    fn destroy(&self) {}
}

/// An installed provider: loaded code plus its manifest.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn manifest(&self) -> &ProviderManifest;

    /// Builds a fresh API instance.
    async fn instantiate(&self, context: &ProviderContext) -> ProviderResult<Arc<dyn ProviderApi>>;

    /// Called once the provider is uninstalled or replaced.
    fn unload(&self) {}
}

/// A provider freshly brought into memory by a loading strategy.
#[derive(Clone)]
pub struct LoadedProvider {
    pub metadata: ProviderMetadata,
    pub provider: Arc<dyn Provider>,
    /// Backing file for strategies that load from disk.
    pub file_path: Option<PathBuf>,
}

impl std::fmt::Debug for LoadedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedProvider")
            .field("metadata", &self.metadata)
            .field("manifest", self.provider.manifest())
            .field("file_path", &self.file_path)
            .finish()
    }
}

/// Loads a provider from an installed file.
#[async_trait::async_trait]
pub trait ProviderLoader: Send + Sync {
    async fn load(&self, path: &Path) -> ProviderResult<LoadedProvider>;
}
