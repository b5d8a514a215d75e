use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE: &str = "rosterd.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct AppConfig {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub sign_in_page: String,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        .set_default("api_base_url", "http://localhost:8000/api")?
        .set_default("poll_interval_ms", 30_000i64)?
        .set_default("request_timeout_secs", 15i64)?
        .set_default("sign_in_page", "sign-in.html")
}

fn environment() -> Environment {
    Environment::with_prefix("ROSTERD").try_parsing(true)
}

/// Defaults overlaid by `ROSTERD_*`; used before a workspace is selected.
pub fn load_defaults() -> Result<AppConfig, ConfigError> {
    builder()?
        .add_source(environment())
        .build()?
        .try_deserialize::<AppConfig>()
}

/// Defaults, then `<workspace>/rosterd.toml`, then `ROSTERD_*`, then the
/// `apiBaseUrl` passed with `workspace.select`.
pub fn load_configuration(workspace: &Path, api_base_url: Option<&str>) -> Result<AppConfig, ConfigError> {
    builder()?
        .add_source(ConfigFile::from(workspace.join(CONFIG_FILE)).required(false))
        .add_source(environment())
        .set_override_option("api_base_url", api_base_url)?
        .build()?
        .try_deserialize::<AppConfig>()
}
