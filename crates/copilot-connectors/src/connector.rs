//! The connector contract every warehouse backend implements

use copilot_core::{
    BackendKind, CostEstimate, Relationship, ResultTable, SchemaSnapshot, TableDescriptor,
    UnsupportedBackend, ValidationResult,
};

/// Errors raised by connectors and the factory
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectorError {
    #[error("Not connected: call connect() first")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Native backend error, passed through without rewording
    #[error("{0}")]
    QueryError(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedBackend(String),

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("{backend} support not compiled. Rebuild with: cargo build --features {feature}")]
    FeatureDisabled {
        backend: &'static str,
        feature: &'static str,
    },
}

impl ConnectorError {
    /// Error for a backend whose SDK feature is off
    pub fn feature_disabled(kind: BackendKind) -> Self {
        Self::FeatureDisabled {
            backend: kind.display_name(),
            feature: kind.feature(),
        }
    }

    /// Map a native error from a single-table lookup
    ///
    /// "does not exist" / "not found" style messages become `TableNotFound`,
    /// anything else stays a verbatim `QueryError`.
    pub fn from_lookup(table: &str, native: impl std::fmt::Display) -> Self {
        let message = native.to_string();
        let lower = message.to_lowercase();
        if lower.contains("does not exist") || lower.contains("not found") {
            Self::TableNotFound(table.to_string())
        } else {
            Self::QueryError(message)
        }
    }
}

impl From<UnsupportedBackend> for ConnectorError {
    fn from(e: UnsupportedBackend) -> Self {
        Self::UnsupportedBackend(e.0)
    }
}

/// Uniform session protocol over one warehouse backend
///
/// A connector is constructed with configuration only. `connect` opens and
/// smoke-tests the native session; `disconnect` releases it and is always
/// safe to call. Session operations take `&mut self`: one connector holds
/// one native connection and serves one caller at a time. Callers that need
/// parallel queries open separate connectors.
///
/// After a failed `connect` the instance should be dropped and rebuilt
/// rather than reused.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Which backend this connector talks to
    fn backend(&self) -> BackendKind;

    /// Get the connector name (e.g., "BigQuery", "Snowflake")
    fn name(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    /// Open the native session and run one cheap smoke test
    ///
    /// Returns `false` on any failure; the cause is logged, never raised.
    async fn connect(&mut self) -> bool;

    /// Release native resources. No-op when not connected; never fails.
    async fn disconnect(&mut self);

    /// Run a read query and materialize the whole result
    ///
    /// When `limit` is `Some(n)` with `n > 0`, a limit is injected using the
    /// backend's dialect. Backend execution errors are returned verbatim as
    /// [`ConnectorError::QueryError`].
    async fn execute_query(
        &mut self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<ResultTable, ConnectorError>;

    /// Walk the full metadata catalog
    ///
    /// Returns an empty snapshot when not connected. A table whose metadata
    /// cannot be read is skipped with a warning.
    async fn get_schema(&mut self) -> Result<SchemaSnapshot, ConnectorError>;

    /// Qualified names of all accessible tables; empty when not connected
    async fn get_tables(&mut self) -> Result<Vec<String>, ConnectorError>;

    /// Describe one table, accepting qualified or bare names
    async fn get_table_info(&mut self, name: &str) -> Result<TableDescriptor, ConnectorError>;

    /// Check that `sql` is a read-only statement
    async fn validate_query(&mut self, sql: &str) -> ValidationResult;

    /// Backend plan text; never executes the statement
    async fn get_query_plan(&mut self, sql: &str) -> Result<String, ConnectorError>;

    /// Backend-specific cost diagnostics; never executes the statement
    async fn estimate_query_cost(&mut self, sql: &str) -> Result<CostEstimate, ConnectorError>;

    /// Foreign-key edges. Backends without enforced keys return an empty list.
    async fn get_relationships(&mut self) -> Result<Vec<Relationship>, ConnectorError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            ConnectorError::MissingFields(vec!["host".into(), "port".into()]).to_string(),
            "Missing required fields: host, port"
        );
        assert_eq!(
            ConnectorError::QueryError("relation \"nope\" does not exist".into()).to_string(),
            "relation \"nope\" does not exist"
        );
        assert_eq!(
            ConnectorError::feature_disabled(BackendKind::Snowflake).to_string(),
            "Snowflake support not compiled. Rebuild with: cargo build --features snowflake"
        );
    }

    #[test]
    fn lookup_errors_are_classified() {
        assert!(matches!(
            ConnectorError::from_lookup("public.t", "relation \"t\" does not exist"),
            ConnectorError::TableNotFound(ref t) if t == "public.t"
        ));
        assert!(matches!(
            ConnectorError::from_lookup("d.t", "Not found: Table p:d.t"),
            ConnectorError::TableNotFound(_)
        ));
        assert!(matches!(
            ConnectorError::from_lookup("t", "permission denied for table t"),
            ConnectorError::QueryError(_)
        ));
    }

    #[test]
    fn unsupported_backend_converts() {
        let err: ConnectorError = "oracle".parse::<BackendKind>().unwrap_err().into();
        assert_eq!(err.to_string(), "Unsupported database type: oracle");
    }
}
