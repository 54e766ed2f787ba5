/// Service configuration.
///
/// Loaded in three layers, later layers winning:
/// 1. built-in defaults;
/// 2. a TOML file (`./whenwx.toml` unless a path is given; a missing file is
///    not an error);
/// 3. environment variables, after `.env` has been loaded with `dotenv`.
///
/// Extra event definitions can only come from the file's `[[events]]` tables.
/// They are validated together with the built-in events at load time, so a
/// bad operator or duplicate id stops the service before it serves anything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::events::{CatalogError, EventCatalog, EventDefinition};
use crate::logging::LogLevel;

pub const DEFAULT_CONFIG_PATH: &str = "./whenwx.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
    #[error("invalid event catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Forecast grid: a file path, an `http(s)://` URL, or `mock`.
    pub source: String,
    pub cache_ttl_seconds: u64,
    /// `false` answers queries from the persisted batch output instead.
    pub on_demand: bool,
    pub output_path: PathBuf,
    pub marker_path: PathBuf,
    pub database_url: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub request_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    /// Batch worker threads; all available cores when unset.
    pub batch_workers: Option<usize>,
    pub log_level: String,
    pub log_file: Option<String>,
    pub console_timestamps: bool,
    pub events: Vec<EventDefinition>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            source: "./data/forecast_grid.json".to_string(),
            cache_ttl_seconds: 300,
            on_demand: true,
            output_path: PathBuf::from("./output/event_timing.json"),
            marker_path: PathBuf::from("./output/last_processed.json"),
            database_url: None,
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            request_timeout_seconds: 30,
            http_timeout_seconds: 60,
            batch_workers: None,
            log_level: "info".to_string(),
            log_file: None,
            console_timestamps: true,
            events: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads defaults, then `path` (or `./whenwx.toml`), then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&body).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(body: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(body)
    }

    /// Applies environment overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("WHENWX_SOURCE") {
            self.source = v;
        }
        if let Some(v) = get("WHENWX_CACHE_TTL") {
            self.cache_ttl_seconds = parse_env("WHENWX_CACHE_TTL", &v)?;
        }
        if let Some(v) = get("WHENWX_ON_DEMAND") {
            self.on_demand = parse_bool("WHENWX_ON_DEMAND", &v)?;
        }
        if let Some(v) = get("WHENWX_OUTPUT") {
            self.output_path = PathBuf::from(v);
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = get("API_HOST") {
            self.api_host = v;
        }
        if let Some(v) = get("API_PORT") {
            self.api_port = parse_env("API_PORT", &v)?;
        }
        if let Some(v) = get("WHENWX_REQUEST_TIMEOUT") {
            self.request_timeout_seconds = parse_env("WHENWX_REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("WHENWX_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("WHENWX_LOG_FILE") {
            self.log_file = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::Invalid("source must not be empty".to_string()));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.batch_workers == Some(0) {
            return Err(ConfigError::Invalid("batch_workers must be positive".to_string()));
        }
        self.log_level()?;
        self.catalog()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<LogLevel, ConfigError> {
        self.log_level.parse().map_err(|_| ConfigError::InvalidEnv {
            key: "log_level".to_string(),
            value: self.log_level.clone(),
        })
    }

    /// Built-in events plus the configured extras.
    pub fn catalog(&self) -> Result<EventCatalog, ConfigError> {
        Ok(EventCatalog::with_extra(self.events.clone())?)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_seconds as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), chrono::Duration::seconds(300));
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.catalog().unwrap().ids(), vec!["freezing", "heat"]);
    }

    #[test]
    fn test_toml_file_with_extra_event() {
        let config = ServiceConfig::from_toml(
            r#"
            source = "mock"
            on_demand = false
            api_port = 9100

            [[events]]
            event_id = "gale"
            name = "Gale Force Winds"
            variable = "wind_speed"
            threshold = 17.2
            operator = "gte"
            unit = "km/h"
            "#,
        )
        .unwrap();
        assert_eq!(config.source, "mock");
        assert!(!config.on_demand);
        assert_eq!(config.api_port, 9100);
        assert_eq!(config.cache_ttl_seconds, 300, "unset keys keep defaults");

        let catalog = config.catalog().unwrap();
        assert_eq!(catalog.find("gale").unwrap().operator, Operator::Gte);
    }

    #[test]
    fn test_bad_operator_in_config_is_rejected_at_load() {
        let result = ServiceConfig::from_toml(
            r#"
            [[events]]
            event_id = "odd"
            name = "Odd"
            variable = "2t"
            threshold = 1.0
            operator = "between"
            unit = "K"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_event_id_is_rejected() {
        let config = ServiceConfig::from_toml(
            r#"
            [[events]]
            event_id = "heat"
            name = "Heat again"
            variable = "2t"
            threshold = 300.0
            operator = "gt"
            unit = "°C"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Catalog(CatalogError::DuplicateEvent(_)))
        ));
    }

    #[test]
    fn test_environment_overrides_file_values() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(env(&[
                ("WHENWX_SOURCE", "https://data.example.com/grid.json"),
                ("WHENWX_CACHE_TTL", "60"),
                ("WHENWX_ON_DEMAND", "false"),
                ("API_PORT", "8080"),
                ("WHENWX_LOG_FILE", "  "),
            ]))
            .unwrap();
        assert_eq!(config.source, "https://data.example.com/grid.json");
        assert_eq!(config.cache_ttl_seconds, 60);
        assert!(!config.on_demand);
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.log_file, None, "blank values are ignored");
    }

    #[test]
    fn test_invalid_environment_value_is_reported() {
        let mut config = ServiceConfig::default();
        let err = config.apply_env(env(&[("API_PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("API_PORT"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(ServiceConfig::from_toml("cache_ttl = 5").is_err());
    }
}
