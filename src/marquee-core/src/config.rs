use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tester: TesterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            providers: ProvidersConfig::default(),
            network: NetworkConfig::default(),
            tester: TesterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_true")]
    pub stdout: bool,
    #[serde(default = "default_true")]
    pub file: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: true,
            file: true,
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Provider installation and update behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Apply available updates instead of only reporting them.
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default = "default_true")]
    pub warn_before_install: bool,
    /// How long a fetched update manifest is reused.
    #[serde(default = "default_manifest_cache_ttl")]
    pub manifest_cache_ttl_secs: u64,
    /// Overrides the platform directory for installed provider binaries.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            auto_update: false,
            warn_before_install: true,
            manifest_cache_ttl_secs: default_manifest_cache_ttl(),
            directory: None,
        }
    }
}

impl ProvidersConfig {
    pub fn manifest_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.manifest_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_request_timeout(),
            user_agent: None,
        }
    }
}

impl NetworkConfig {
    /// Builds the HTTP client shared with providers and the updater.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("{}/{}", crate::APP_NAME, env!("CARGO_PKG_VERSION")));
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(user_agent)
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesterConfig {
    /// Upper bound for a single method test.
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs: default_test_timeout(),
        }
    }
}

impl TesterConfig {
    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        for (field, value) in [
            (
                "providers.manifest_cache_ttl_secs",
                self.providers.manifest_cache_ttl_secs,
            ),
            (
                "network.connect_timeout_secs",
                self.network.connect_timeout_secs,
            ),
            ("network.timeout_secs", self.network.timeout_secs),
            ("tester.test_timeout_secs", self.tester.test_timeout_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroDuration { field });
            }
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_true() -> bool {
    true
}

fn default_manifest_cache_ttl() -> u64 {
    30 * 60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_test_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert_eq!(config.providers.manifest_cache_ttl(), Duration::from_secs(1800));
        assert!(!config.providers.auto_update);
        assert!(config.providers.warn_before_install);
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = Config::default();
        config.providers.manifest_cache_ttl_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroDuration {
                field: "providers.manifest_cache_ttl_secs"
            })
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let root = tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        fs::write(
            Config::config_path(&dirs),
            "[providers]\nauto_update = true\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_or_default(&dirs).unwrap();
        assert!(config.providers.auto_update);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.tester.test_timeout_secs, 60);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let root = tempdir().unwrap();
        let config = Config::load_or_default(&AppDirs::under(root.path())).unwrap();
        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);
    }
}
