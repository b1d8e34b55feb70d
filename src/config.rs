use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::model::Amount;

pub const ENV_PREFIX: &str = "FLEETCAL";
pub const DEFAULT_CONFIG_FILE: &str = "fleetcal.toml";

/// Server settings: built-in defaults, then an optional TOML file, then
/// `FLEETCAL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Journal appends since the last compaction that trigger a rewrite. 0 disables it.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub log_level: String,
    pub employee_daily_rate: Amount,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "fleetcal".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
            log_level: "info".into(),
            employee_daily_rate: EngineSettings::default().employee_daily_rate,
        }
    }
}

impl Settings {
    /// Load from `FLEETCAL_CONFIG` (or `./fleetcal.toml`) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(format!("{ENV_PREFIX}_CONFIG"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&file, None)
    }

    /// `env` replaces the process environment when given.
    pub fn load_from(file: &Path, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true).source(env))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Message("max_connections must be at least 1".into()));
        }
        if self.employee_daily_rate < 0 {
            return Err(ConfigError::Message("employee_daily_rate must not be negative".into()));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Message(
                "tls_cert and tls_key must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            employee_daily_rate: self.employee_daily_rate,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
