//! Configuration system for govingest.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/govingest/config.toml` and/or `.govingest/config.toml`
//! in the workspace directory. Source contracts are separate YAML files; this
//! configuration only carries runtime settings shared by every connector.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Outbound request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for page and API requests.
    pub timeout_secs: u64,
    /// Timeout for whole-file downloads (delimited, spreadsheet, document).
    pub file_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            file_timeout_secs: 60,
            connect_timeout_secs: 10,
            user_agent: format!("govingest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Pagination defaults; contracts may override per source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Delay between web page requests.
    pub web_delay_ms: u64,
    /// Delay between API page requests.
    pub api_delay_ms: u64,
    /// Maximum pages followed for web tables.
    pub web_max_pages: usize,
    /// Maximum pages requested from paged APIs.
    pub api_max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            web_delay_ms: 1000,
            api_delay_ms: 500,
            web_max_pages: 100,
            api_max_pages: 1000,
        }
    }
}

/// Schema validation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Share of nulls tolerated in required fields before warning.
    pub null_tolerance: f64,
}

/// Filesystem locations, relative to the workspace unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub contracts_dir: PathBuf,
    pub raw_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            contracts_dir: PathBuf::from("contracts"),
            raw_dir: PathBuf::from("data/raw"),
        }
    }
}

impl PathsConfig {
    pub fn contracts_dir_in(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.contracts_dir)
    }

    pub fn raw_dir_in(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.raw_dir)
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `GOVINGEST_`)
/// 3. An explicit config file, if given
/// 4. Workspace-local config (`.govingest/config.toml`)
/// 5. User config (`~/.config/govingest/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&IngestConfig>,
) -> Result<IngestConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(IngestConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "govingest", "govingest") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".govingest").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(file) = config_file {
        figment = figment.merge(Toml::file(file));
    }

    // Environment variables (GOVINGEST_HTTP__TIMEOUT_SECS, GOVINGEST_PATHS__RAW_DIR, etc.)
    figment = figment.merge(Env::prefixed("GOVINGEST_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Directory for JSON log files.
pub fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "govingest", "govingest")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}
