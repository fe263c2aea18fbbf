//! Wire types for talking to external provider plugins.
//!
//! Every message is one JSON object on its own line. Most requests get
//! exactly one response; `GetLinks` gets any number of `Link` responses
//! followed by `LinksDone`, all carrying the request id.

use marquee_core::{
    Catalog, Episode, Film, FilmDetails, FilterGroup, MediaLink, Page, ProviderError,
    ProviderManifest, ProviderMetadata, SearchQuery,
};
use serde::{Deserialize, Serialize};

/// Protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;

/// Request sent from the host to a plugin process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Unique request ID for correlation.
    pub id: u64,
    pub method: PluginMethod,
}

/// Response from a plugin process to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Request ID this response correlates to.
    pub id: u64,
    pub result: PluginResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum PluginMethod {
    /// Handshake; the plugin describes itself.
    Initialize,
    /// Build the provider api and report its precomputed properties.
    Instantiate,
    GetCatalogItems {
        catalog: Catalog,
        page: u32,
    },
    Search {
        query: SearchQuery,
    },
    GetMetadata {
        film: Film,
    },
    /// Answered by a stream of `Link` results terminated by `LinksDone`.
    GetLinks {
        watch_id: String,
        film: FilmDetails,
        #[serde(default)]
        episode: Option<Episode>,
    },
    Shutdown,
}

impl PluginMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "Initialize",
            Self::Instantiate => "Instantiate",
            Self::GetCatalogItems { .. } => "GetCatalogItems",
            Self::Search { .. } => "Search",
            Self::GetMetadata { .. } => "GetMetadata",
            Self::GetLinks { .. } => "GetLinks",
            Self::Shutdown => "Shutdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum PluginResult {
    Initialized(PluginInfo),
    Instance(InstanceInfo),
    Films(Page<Film>),
    Details(FilmDetails),
    /// One discovered link; more may follow.
    Link { link: MediaLink },
    LinksDone,
    ShutdownAck,
    Error(PluginError),
}

impl PluginResult {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized(_) => "Initialized",
            Self::Instance(_) => "Instance",
            Self::Films(_) => "Films",
            Self::Details(_) => "Details",
            Self::Link { .. } => "Link",
            Self::LinksDone => "LinksDone",
            Self::ShutdownAck => "ShutdownAck",
            Self::Error(_) => "Error",
        }
    }
}

/// Returned after `Initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub metadata: ProviderMetadata,
    pub manifest: ProviderManifest,
    pub protocol_version: u32,
}

/// Returned after `Instantiate`. A missing field means the plugin does not
/// implement that property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(default)]
    pub test_film: Option<FilmDetails>,
    #[serde(default)]
    pub catalogs: Option<Vec<Catalog>>,
    #[serde(default)]
    pub filters: Option<Vec<FilterGroup>>,
}

/// Error returned by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginError {
    pub kind: PluginErrorKind,
    pub message: String,
}

/// Categories of plugin errors, matching the `ProviderError` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginErrorKind {
    Network,
    NotFound,
    NotImplemented,
    Parse,
    Internal,
}

impl From<PluginError> for ProviderError {
    fn from(err: PluginError) -> Self {
        match err.kind {
            PluginErrorKind::Network => Self::Network {
                message: err.message,
            },
            PluginErrorKind::NotFound => Self::NotFound {
                entity: err.message,
            },
            PluginErrorKind::NotImplemented => Self::NotImplemented {
                operation: err.message,
            },
            PluginErrorKind::Parse => Self::Parse {
                message: err.message,
            },
            PluginErrorKind::Internal => Self::Other {
                message: err.message,
            },
        }
    }
}

impl From<ProviderError> for PluginError {
    fn from(err: ProviderError) -> Self {
        let (kind, message) = match err {
            ProviderError::Network { message } => (PluginErrorKind::Network, message),
            ProviderError::NotFound { entity } => (PluginErrorKind::NotFound, entity),
            ProviderError::NotImplemented { operation } => {
                (PluginErrorKind::NotImplemented, operation)
            }
            ProviderError::Parse { message } => (PluginErrorKind::Parse, message),
            ProviderError::Other { message } => (PluginErrorKind::Internal, message),
        };
        Self { kind, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::Stream;

    #[test]
    fn request_serializes_correctly() {
        let req = PluginRequest {
            id: 7,
            method: PluginMethod::Search {
                query: SearchQuery::title("heat"),
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.starts_with("{\"id\":7,\"method\":{\"type\":\"Search\""));
        assert!(json.contains("\"title\":\"heat\""));
    }

    #[test]
    fn initialized_response_deserializes() {
        let json = r#"{"id":1,"result":{"status":"Initialized",
            "metadata":{"id":"demo","name":"Demo","versionCode":3,"versionName":"1.2","buildUrl":"https://b.invalid/demo"},
            "manifest":{"id":"demo","versionCode":3,"versionName":"1.2"},
            "protocol_version":1}}"#;
        let resp: PluginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, 1);
        match resp.result {
            PluginResult::Initialized(info) => {
                assert_eq!(info.metadata.name, "Demo");
                assert_eq!(info.manifest.version_code, 3);
                assert!(info.manifest.update_url.is_none());
            }
            other => panic!("expected Initialized, got {}", other.name()),
        }
    }

    #[test]
    fn link_results_carry_tagged_media_links() {
        let result = PluginResult::Link {
            link: MediaLink::Stream(Stream::new("720p", "https://cdn.invalid/a.m3u8")),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"Link\""));
        assert!(json.contains("\"kind\":\"stream\""));

        let back: PluginResult = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, PluginResult::Link { link: MediaLink::Stream(_) }));
    }

    #[test]
    fn empty_instance_means_nothing_implemented() {
        let result: PluginResult = serde_json::from_str(r#"{"status":"Instance"}"#).unwrap();
        match result {
            PluginResult::Instance(instance) => {
                assert!(instance.test_film.is_none());
                assert!(instance.catalogs.is_none());
                assert!(instance.filters.is_none());
            }
            other => panic!("expected Instance, got {}", other.name()),
        }
    }

    #[test]
    fn not_implemented_survives_the_wire() {
        let err = PluginError {
            kind: PluginErrorKind::NotImplemented,
            message: "search".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"not_implemented\""));

        let provider_err: ProviderError = err.into();
        assert!(provider_err.is_not_implemented());
        assert_eq!(PluginError::from(provider_err).kind, PluginErrorKind::NotImplemented);
    }
}
