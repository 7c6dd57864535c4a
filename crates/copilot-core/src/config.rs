//! Configuration schema (copilot.toml + environment)

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Flat mapping of named connection parameters for one backend
pub type ConnectionParams = HashMap<String, String>;

/// PostgreSQL connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,

    /// `require` turns on TLS
    pub sslmode: Option<String>,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "warehouse".to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            sslmode: None,
        }
    }
}

/// BigQuery settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BigQuerySettings {
    pub project_id: Option<String>,

    /// Service account key file; application default credentials otherwise
    pub credentials_path: Option<String>,
}

/// Snowflake settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowflakeSettings {
    pub account: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,

    /// PEM private key for key-pair authentication
    pub private_key: Option<String>,

    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: String,
}

impl Default for SnowflakeSettings {
    fn default() -> Self {
        Self {
            account: None,
            user: None,
            password: None,
            private_key: None,
            database: None,
            schema: None,
            warehouse: None,
            role: "PUBLIC".to_string(),
        }
    }
}

/// Redshift settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedshiftSettings {
    pub host: Option<String>,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for RedshiftSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 5439,
            database: None,
            user: None,
            password: None,
        }
    }
}

/// Caps applied around query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    pub max_query_rows: usize,
    pub query_timeout_seconds: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_query_rows: 10_000,
            query_timeout_seconds: 300,
        }
    }
}

impl QueryLimits {
    /// Wall-clock deadline around a single execution
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    /// Effective row limit: the requested one, capped at `max_query_rows`
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(n) if n > 0 => n.min(self.max_query_rows),
            _ => self.max_query_rows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    pub enable_query_logging: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_query_logging: true,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend used when a caller does not name one
    pub database_type: String,

    pub postgres: PostgresSettings,
    pub bigquery: BigQuerySettings,
    pub snowflake: SnowflakeSettings,
    pub redshift: RedshiftSettings,
    pub limits: QueryLimits,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_type: "postgres".to_string(),
            postgres: PostgresSettings::default(),
            bigquery: BigQuerySettings::default(),
            snowflake: SnowflakeSettings::default(),
            redshift: RedshiftSettings::default(),
            limits: QueryLimits::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml(&contents)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Load from an optional file, then overlay process environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Overlay values found through `lookup` (normally `std::env::var`)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("DATABASE_TYPE") {
            self.database_type = v;
        }

        if let Some(v) = get("POSTGRES_HOST") {
            self.postgres.host = v;
        }
        if let Some(v) = get("POSTGRES_PORT") {
            self.postgres.port = parse_value("POSTGRES_PORT", &v)?;
        }
        if let Some(v) = get("POSTGRES_DB") {
            self.postgres.database = v;
        }
        if let Some(v) = get("POSTGRES_USER") {
            self.postgres.user = v;
        }
        if let Some(v) = get("POSTGRES_PASSWORD") {
            self.postgres.password = v;
        }
        if let Some(v) = get("POSTGRES_SSLMODE") {
            self.postgres.sslmode = Some(v);
        }

        overlay(&mut self.bigquery.project_id, get("BIGQUERY_PROJECT_ID"));
        overlay(&mut self.bigquery.credentials_path, get("BIGQUERY_CREDENTIALS_PATH"));

        overlay(&mut self.snowflake.account, get("SNOWFLAKE_ACCOUNT"));
        overlay(&mut self.snowflake.user, get("SNOWFLAKE_USER"));
        overlay(&mut self.snowflake.password, get("SNOWFLAKE_PASSWORD"));
        overlay(&mut self.snowflake.private_key, get("SNOWFLAKE_PRIVATE_KEY"));
        overlay(&mut self.snowflake.database, get("SNOWFLAKE_DATABASE"));
        overlay(&mut self.snowflake.schema, get("SNOWFLAKE_SCHEMA"));
        overlay(&mut self.snowflake.warehouse, get("SNOWFLAKE_WAREHOUSE"));
        if let Some(v) = get("SNOWFLAKE_ROLE") {
            self.snowflake.role = v;
        }

        overlay(&mut self.redshift.host, get("REDSHIFT_HOST"));
        if let Some(v) = get("REDSHIFT_PORT") {
            self.redshift.port = parse_value("REDSHIFT_PORT", &v)?;
        }
        overlay(&mut self.redshift.database, get("REDSHIFT_DB"));
        overlay(&mut self.redshift.user, get("REDSHIFT_USER"));
        overlay(&mut self.redshift.password, get("REDSHIFT_PASSWORD"));

        if let Some(v) = get("MAX_QUERY_ROWS") {
            self.limits.max_query_rows = parse_value("MAX_QUERY_ROWS", &v)?;
        }
        if let Some(v) = get("QUERY_TIMEOUT_SECONDS") {
            self.limits.query_timeout_seconds = parse_value("QUERY_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.log_level = v.to_lowercase();
        }
        if let Some(v) = get("ENABLE_QUERY_LOGGING") {
            self.logging.enable_query_logging = parse_bool("ENABLE_QUERY_LOGGING", &v)?;
        }

        Ok(())
    }

    /// Render the named parameters for `kind`; unset values are omitted
    pub fn connection_params(&self, kind: BackendKind) -> ConnectionParams {
        let mut params = ConnectionParams::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                params.insert(key.to_string(), value);
            }
        };

        match kind {
            BackendKind::Postgres => {
                let pg = &self.postgres;
                put("host", Some(pg.host.clone()));
                put("port", Some(pg.port.to_string()));
                put("database", Some(pg.database.clone()));
                put("user", Some(pg.user.clone()));
                put("password", Some(pg.password.clone()));
                put("sslmode", pg.sslmode.clone());
            }
            BackendKind::BigQuery => {
                put("project_id", self.bigquery.project_id.clone());
                put("credentials_path", self.bigquery.credentials_path.clone());
            }
            BackendKind::Snowflake => {
                let sf = &self.snowflake;
                put("account", sf.account.clone());
                put("user", sf.user.clone());
                put("password", sf.password.clone());
                put("private_key", sf.private_key.clone());
                put("database", sf.database.clone());
                put("schema", sf.schema.clone());
                put("warehouse", sf.warehouse.clone());
                put("role", Some(sf.role.clone()));
            }
            BackendKind::Redshift => {
                let rs = &self.redshift;
                put("host", rs.host.clone());
                put("port", Some(rs.port.to_string()));
                put("database", rs.database.clone());
                put("user", rs.user.clone());
                put("password", rs.password.clone());
            }
        }

        params
    }
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.database_type, "postgres");
        assert_eq!(settings.postgres.port, 5432);
        assert_eq!(settings.redshift.port, 5439);
        assert_eq!(settings.snowflake.role, "PUBLIC");
        assert_eq!(settings.limits.max_query_rows, 10_000);
        assert_eq!(settings.limits.timeout(), Duration::from_secs(300));
        assert!(settings.logging.enable_query_logging);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            database_type = "snowflake"

            [snowflake]
            account = "xy12345"
            user = "analyst"

            [limits]
            max_query_rows = 500
            "#,
        )
        .unwrap();

        assert_eq!(settings.database_type, "snowflake");
        assert_eq!(settings.snowflake.account.as_deref(), Some("xy12345"));
        assert_eq!(settings.snowflake.role, "PUBLIC");
        assert_eq!(settings.limits.max_query_rows, 500);
        assert_eq!(settings.limits.query_timeout_seconds, 300);
        assert_eq!(settings.postgres.host, "localhost");
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let err = Settings::from_toml("database_type = [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("DATABASE_TYPE", "redshift"),
                ("REDSHIFT_HOST", "cluster.example.com"),
                ("REDSHIFT_PORT", "5440"),
                ("MAX_QUERY_ROWS", "25"),
                ("ENABLE_QUERY_LOGGING", "false"),
                ("POSTGRES_HOST", ""),
            ]))
            .unwrap();

        assert_eq!(settings.database_type, "redshift");
        assert_eq!(settings.redshift.host.as_deref(), Some("cluster.example.com"));
        assert_eq!(settings.redshift.port, 5440);
        assert_eq!(settings.limits.max_query_rows, 25);
        assert!(!settings.logging.enable_query_logging);
        assert_eq!(settings.postgres.host, "localhost");
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let mut settings = Settings::default();
        let err = settings.apply_env(env(&[("POSTGRES_PORT", "fifty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "POSTGRES_PORT"));
    }

    #[test]
    fn connection_params_omit_unset_values() {
        let settings = Settings::default();

        let pg = settings.connection_params(BackendKind::Postgres);
        assert_eq!(pg.get("port").map(String::as_str), Some("5432"));
        assert_eq!(pg.get("database").map(String::as_str), Some("warehouse"));
        assert!(!pg.contains_key("sslmode"));

        let bq = settings.connection_params(BackendKind::BigQuery);
        assert!(bq.is_empty());

        let rs = settings.connection_params(BackendKind::Redshift);
        assert_eq!(rs.len(), 1);
        assert_eq!(rs.get("port").map(String::as_str), Some("5439"));
    }

    #[test]
    fn effective_limit_caps_requests() {
        let limits = QueryLimits { max_query_rows: 100, query_timeout_seconds: 1 };
        assert_eq!(limits.effective_limit(Some(5)), 5);
        assert_eq!(limits.effective_limit(Some(500)), 100);
        assert_eq!(limits.effective_limit(Some(0)), 100);
        assert_eq!(limits.effective_limit(None), 100);
    }

    #[test]
    fn settings_toml_roundtrip() {
        let settings = Settings::default();
        let toml = toml::to_string(&settings).unwrap();
        let parsed = Settings::from_toml(&toml).unwrap();
        assert_eq!(settings, parsed);
    }
}
