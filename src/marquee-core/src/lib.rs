pub mod config;
pub mod link_cache;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod paths;
pub mod provider;

pub use config::{
    Config, ConfigError, LogLevel, LoggingConfig, NetworkConfig, ProvidersConfig, TesterConfig,
    ValidationError,
};
pub use link_cache::{CacheKey, CachedLinks, EpisodeKey, LinkCache, LinkSnapshot};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use metadata::{Author, ProviderManifest, ProviderMetadata, ProviderStatus};
pub use models::{
    Catalog, Episode, Film, FilmDetails, FilmType, FilterGroup, MediaLink, Page, SearchQuery,
    Season, Stream, Subtitle,
};
pub use paths::{AppDirs, DirsError};
pub use provider::{
    LinkSink, LoadedProvider, Provider, ProviderApi, ProviderContext, ProviderError,
    ProviderLoader, ProviderResult, ProviderWebView,
};

pub const APP_NAME: &str = "marquee";
pub const APP_AUTHOR: &str = "Marquee";
pub const APP_QUALIFIER: &str = "io";
