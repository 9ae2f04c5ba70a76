use serde::Deserialize;
use std::path::Path;

use nestrbac_core::path::PathLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    pub database: DatabaseConfig,
    pub hierarchy: HierarchyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub max_path_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/nestrbac".to_string(),
            max_connections: 10,
            schema: "nestrbac".to_string(),
        }
    }
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_path_length: PathLimits::default().max_length,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl RbacConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<RbacConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            RbacConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("NESTRBAC_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("NESTRBAC_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Some(v) = var("NESTRBAC_DATABASE_SCHEMA") {
            self.database.schema = v;
        }
        if let Some(v) = var("NESTRBAC_HIERARCHY_MAX_PATH_LENGTH")
            && let Ok(n) = v.parse()
        {
            self.hierarchy.max_path_length = n;
        }
        if let Some(v) = var("NESTRBAC_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = var("NESTRBAC_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if self.database.schema.is_empty() {
            return Err(ConfigError::Validation(
                "database.schema must not be empty".to_string(),
            ));
        }
        if self.hierarchy.max_path_length == 0 {
            return Err(ConfigError::Validation(
                "hierarchy.max_path_length must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn path_limits(&self) -> PathLimits {
        PathLimits::new(self.hierarchy.max_path_length)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
