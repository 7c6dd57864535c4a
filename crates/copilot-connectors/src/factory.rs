//! Connector construction from a type tag and named parameters

use crate::bigquery::BigQueryConnector;
use crate::connector::{Connector, ConnectorError};
use crate::postgres::PostgresConnector;
use crate::redshift::RedshiftConnector;
use crate::snowflake::SnowflakeConnector;
use copilot_core::{BackendKind, ConnectionParams, Settings};

/// Something that can hand out fresh, unconnected connectors
///
/// The orchestration layer depends on this rather than on the factory so
/// tests can substitute a source that returns mocks.
pub trait ConnectorSource: Send + Sync {
    /// A new connector for `db_type`, or for the configured default
    fn open(&self, db_type: Option<&str>) -> Result<Box<dyn Connector>, ConnectorError>;
}

/// Builds connectors from settings or explicit parameters
#[derive(Debug, Clone, Default)]
pub struct ConnectorFactory {
    settings: Settings,
}

impl ConnectorFactory {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Canonical type tags of every supported backend
    pub fn supported_types() -> Vec<&'static str> {
        BackendKind::ALL.iter().map(BackendKind::as_str).collect()
    }

    /// Check that `params` carries every field `db_type` needs
    ///
    /// Empty values count as missing. For Snowflake a non-empty
    /// `private_key` stands in for `password`.
    pub fn validate_config(db_type: &str, params: &ConnectionParams) -> (bool, String) {
        let kind = match db_type.parse::<BackendKind>() {
            Ok(kind) => kind,
            Err(e) => return (false, e.to_string()),
        };

        let missing = Self::missing_fields(kind, params);
        if missing.is_empty() {
            (true, "Configuration is valid".to_string())
        } else {
            (false, ConnectorError::MissingFields(missing).to_string())
        }
    }

    fn missing_fields(kind: BackendKind, params: &ConnectionParams) -> Vec<String> {
        let present = |key: &str| params.get(key).is_some_and(|v| !v.trim().is_empty());

        kind.required_fields()
            .iter()
            .filter(|field| !present(field))
            .filter(|field| !(kind == BackendKind::Snowflake && **field == "password" && present("private_key")))
            .map(|field| field.to_string())
            .collect()
    }

    /// Create an unconnected connector
    ///
    /// `db_type` defaults to the configured `database_type` and `config` to
    /// the settings for that backend. The type is checked before anything
    /// else, then the parameters; no connection is attempted.
    pub fn create(
        &self,
        db_type: Option<&str>,
        config: Option<ConnectionParams>,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        let tag = db_type.unwrap_or(&self.settings.database_type);
        let kind: BackendKind = tag.parse()?;
        let params = config.unwrap_or_else(|| self.settings.connection_params(kind));
        self.create_for(kind, params)
    }

    /// Create a connector for a known backend kind
    pub fn create_for(
        &self,
        kind: BackendKind,
        params: ConnectionParams,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        let missing = Self::missing_fields(kind, &params);
        if !missing.is_empty() {
            return Err(ConnectorError::MissingFields(missing));
        }

        tracing::debug!(backend = kind.as_str(), "creating connector");
        let connector: Box<dyn Connector> = match kind {
            BackendKind::Postgres => Box::new(PostgresConnector::new(params)),
            BackendKind::BigQuery => Box::new(BigQueryConnector::new(params)),
            BackendKind::Redshift => Box::new(RedshiftConnector::new(params)),
            BackendKind::Snowflake => Box::new(SnowflakeConnector::new(params)),
        };
        Ok(connector)
    }
}

impl ConnectorSource for ConnectorFactory {
    fn open(&self, db_type: Option<&str>) -> Result<Box<dyn Connector>, ConnectorError> {
        self.create(db_type, None)
    }
}
