//! Provider descriptors: the published metadata record and the minimal
//! manifest shipped inside an installed plugin.

use serde::{Deserialize, Serialize};

/// Maintenance status advertised by a provider's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProviderStatus {
    #[default]
    Working,
    Beta,
    Maintenance,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub name: String,
    #[serde(default)]
    pub social_link: Option<String>,
}

/// Published description of a provider.
///
/// This is the record shape found in remote update manifests. It is never
/// mutated in place; an update replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub id: String,
    pub name: String,
    pub version_code: u64,
    pub version_name: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub repository_url: Option<String>,
    /// Where the installable build for this version lives.
    pub build_url: String,
    #[serde(default)]
    pub status: ProviderStatus,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
}

fn default_language() -> String {
    "multiple".to_string()
}

/// Descriptor shipped with the installed plugin binary.
///
/// Only used to decide whether the installed build is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderManifest {
    pub id: String,
    pub version_code: u64,
    pub version_name: String,
    /// URL of the JSON array of [`ProviderMetadata`] records to check against.
    #[serde(default)]
    pub update_url: Option<String>,
}

impl ProviderManifest {
    pub fn from_metadata(metadata: &ProviderMetadata, update_url: Option<String>) -> Self {
        Self {
            id: metadata.id.clone(),
            version_code: metadata.version_code,
            version_name: metadata.version_name.clone(),
            update_url,
        }
    }
}
