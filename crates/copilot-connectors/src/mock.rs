//! Mock connector for testing
//!
//! This connector serves canned result sets and a canned catalog without
//! touching any warehouse. It's useful for:
//! - Unit testing orchestration and safety logic
//! - Integration testing CI/CD pipelines
//! - Demos without real credentials
//! - Simulating connection failures, latency and per-query errors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use copilot_connectors::{Connector, MockConnectorBuilder};
//! use copilot_core::{ResultTable, TableSchema};
//!
//! let mut connector = MockConnectorBuilder::new()
//!     .with_table(&["public"], "users", users_schema)
//!     .with_result("SELECT * FROM users", users_rows)
//!     .build();
//!
//! assert!(connector.connect().await);
//! let rows = connector.execute_query("SELECT * FROM users", Some(5)).await?;
//! ```
//!
//! Result sets are keyed by whitespace-normalized SQL. When a limit is
//! injected, the statement sent to the mock is the limited one; the mock
//! recognises both limit shapes, looks up the inner statement and truncates
//! the canned rows, so tests see the same bound a real backend would apply.

use crate::connector::{Connector, ConnectorError};
use crate::dialect::{apply_limit, normalize_whitespace, split_injected_limit, LimitStyle};
use crate::guard::QueryGuard;
use copilot_core::{
    BackendKind, CostEstimate, Relationship, ResultTable, SchemaSnapshot, TableDescriptor,
    TableSchema, ValidationResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MockState {
    results: HashMap<String, ResultTable>,
    errors: HashMap<String, ConnectorError>,
    plans: HashMap<String, String>,
    snapshot: SchemaSnapshot,
    relationships: Vec<Relationship>,
    executed: Vec<String>,
    connects: usize,
    disconnects: usize,
}

/// Mock connector for testing
///
/// Canned data lives behind an `Arc<RwLock<..>>`, so clones share it: a
/// test can keep one handle for seeding and inspection while another is
/// boxed and handed to the code under test. The session flag is per
/// instance.
///
/// # Example
///
/// ```rust,ignore
/// let connector = MockConnector::new()
///     .with_latency(50)
///     .with_connection_failure();
/// ```
pub struct MockConnector {
    state: Arc<RwLock<MockState>>,
    connected: bool,
    fail_connection: bool,
    latency_ms: u64,
    kind: BackendKind,
    connector_name: &'static str,
}

impl MockConnector {
    /// Create a mock that behaves like the row store, with no canned data
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            connected: false,
            fail_connection: false,
            latency_ms: 0,
            kind: BackendKind::Postgres,
            connector_name: "Mock",
        }
    }

    /// Behave like `kind`: its deny list and its limit style
    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Configure `connect()` to fail
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for every session operation
    ///
    /// # Arguments
    ///
    /// * `latency_ms` - Delay in milliseconds before returning results
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set a custom connector name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.connector_name = name;
        self
    }

    /// Register a result set for a statement
    pub async fn add_result(&self, sql: &str, result: ResultTable) {
        self.state.write().await.results.insert(normalize_whitespace(sql), result);
    }

    /// Make a statement fail with `error`
    pub async fn add_query_error(&self, sql: &str, error: ConnectorError) {
        self.state.write().await.errors.insert(normalize_whitespace(sql), error);
    }

    /// Register plan text for a statement
    pub async fn add_plan(&self, sql: &str, plan: impl Into<String>) {
        self.state.write().await.plans.insert(normalize_whitespace(sql), plan.into());
    }

    /// Add a table to the canned catalog under namespace `path`
    pub async fn add_table(&self, path: &[&str], name: &str, schema: TableSchema) {
        self.state.write().await.snapshot.insert_table(path, name, schema);
    }

    /// Replace the canned catalog
    pub async fn set_snapshot(&self, snapshot: SchemaSnapshot) {
        self.state.write().await.snapshot = snapshot;
    }

    pub async fn add_relationship(&self, relationship: Relationship) {
        self.state.write().await.relationships.push(relationship);
    }

    /// Statements received by `execute_query`, after limit injection
    pub async fn executed_queries(&self) -> Vec<String> {
        self.state.read().await.executed.clone()
    }

    /// Number of `connect()` calls
    pub async fn connect_count(&self) -> usize {
        self.state.read().await.connects
    }

    /// Number of `disconnect()` calls
    pub async fn disconnect_count(&self) -> usize {
        self.state.read().await.disconnects
    }

    /// Clear canned results, errors and the executed-statement log
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.results.clear();
        state.errors.clear();
        state.executed.clear();
    }

    fn guard(&self) -> QueryGuard {
        match self.kind {
            BackendKind::Redshift => QueryGuard::mpp(),
            _ => QueryGuard::standard(),
        }
    }

    fn limit_style(&self) -> LimitStyle {
        match self.kind {
            BackendKind::Postgres => LimitStyle::WrapSubquery,
            _ => LimitStyle::Trailing,
        }
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn ensure_connected(&self) -> Result<(), ConnectorError> {
        if self.connected {
            Ok(())
        } else {
            Err(ConnectorError::NotConnected)
        }
    }

    /// Canned result for a (possibly limited) statement
    fn lookup(state: &MockState, sql: &str) -> Option<Result<ResultTable, ConnectorError>> {
        let key = normalize_whitespace(sql);
        if let Some(error) = state.errors.get(&key) {
            return Some(Err(error.clone()));
        }
        if let Some(result) = state.results.get(&key) {
            return Some(Ok(result.clone()));
        }

        let (inner, limit) = split_injected_limit(sql)?;
        let inner = normalize_whitespace(inner);
        if let Some(error) = state.errors.get(&inner) {
            return Some(Err(error.clone()));
        }
        state.results.get(&inner).map(|result| {
            let mut result = result.clone();
            result.truncate(limit);
            Ok(result)
        })
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockConnector {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            connected: self.connected,
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            kind: self.kind,
            connector_name: self.connector_name,
        }
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    fn backend(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.connector_name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> bool {
        self.simulate_latency().await;
        self.state.write().await.connects += 1;

        if self.fail_connection {
            tracing::error!(backend = self.name(), "simulated connection failure");
            self.connected = false;
        } else {
            self.connected = true;
        }
        self.connected
    }

    async fn disconnect(&mut self) {
        self.state.write().await.disconnects += 1;
        self.connected = false;
    }

    async fn execute_query(
        &mut self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<ResultTable, ConnectorError> {
        self.simulate_latency().await;
        self.ensure_connected()?;

        let sql = apply_limit(sql, limit, self.limit_style());
        let mut state = self.state.write().await;
        state.executed.push(sql.clone());

        Self::lookup(&state, &sql).unwrap_or_else(|| {
            Err(ConnectorError::QueryError(format!(
                "no canned result for statement: {}",
                sql
            )))
        })
    }

    async fn get_schema(&mut self) -> Result<SchemaSnapshot, ConnectorError> {
        self.simulate_latency().await;
        if !self.connected {
            return Ok(SchemaSnapshot::new());
        }
        Ok(self.state.read().await.snapshot.clone())
    }

    async fn get_tables(&mut self) -> Result<Vec<String>, ConnectorError> {
        if !self.connected {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .read()
            .await
            .snapshot
            .tables()
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    async fn get_table_info(&mut self, name: &str) -> Result<TableDescriptor, ConnectorError> {
        self.simulate_latency().await;
        self.ensure_connected()?;

        let state = self.state.read().await;
        let (qualified, schema) = state
            .snapshot
            .resolve(name)
            .ok_or_else(|| ConnectorError::TableNotFound(name.to_string()))?;

        let mut descriptor = TableDescriptor::from_schema(qualified.clone(), schema);
        descriptor.foreign_keys = state
            .relationships
            .iter()
            .filter(|r| r.from_table == qualified)
            .cloned()
            .collect();
        Ok(descriptor)
    }

    async fn validate_query(&mut self, sql: &str) -> ValidationResult {
        self.guard().check(sql)
    }

    async fn get_query_plan(&mut self, sql: &str) -> Result<String, ConnectorError> {
        self.ensure_connected()?;
        let key = normalize_whitespace(sql);
        let state = self.state.read().await;
        Ok(state
            .plans
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("Mock Scan  (cost=0.00..1.00 rows=1)\n  statement: {}", key)))
    }

    async fn estimate_query_cost(&mut self, sql: &str) -> Result<CostEstimate, ConnectorError> {
        self.ensure_connected()?;
        let key = normalize_whitespace(sql);
        let rows = self
            .state
            .read()
            .await
            .results
            .get(&key)
            .map(ResultTable::row_count)
            .unwrap_or(0);

        Ok(CostEstimate::new(self.kind)
            .with("estimated_rows", rows)
            .with("cost_units", "mock units"))
    }

    async fn get_relationships(&mut self) -> Result<Vec<Relationship>, ConnectorError> {
        if !self.connected {
            return Ok(Vec::new());
        }
        Ok(self.state.read().await.relationships.clone())
    }
}

/// Builder for creating MockConnector with canned data
///
/// # Example
///
/// ```rust,ignore
/// let connector = MockConnectorBuilder::new()
///     .with_backend(BackendKind::Snowflake)
///     .with_table(&["ANALYTICS", "PUBLIC"], "ORDERS", orders)
///     .with_result("SELECT COUNT(*) FROM ORDERS", counts)
///     .with_latency(50)
///     .build();
/// ```
pub struct MockConnectorBuilder {
    state: MockState,
    fail_connection: bool,
    latency_ms: u64,
    kind: BackendKind,
    connector_name: &'static str,
}

impl MockConnectorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            state: MockState::default(),
            fail_connection: false,
            latency_ms: 0,
            kind: BackendKind::Postgres,
            connector_name: "Mock",
        }
    }

    pub fn with_backend(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a table under namespace `path`
    pub fn with_table(mut self, path: &[&str], name: &str, schema: TableSchema) -> Self {
        self.state.snapshot.insert_table(path, name, schema);
        self
    }

    /// Use `snapshot` as the whole catalog
    pub fn with_snapshot(mut self, snapshot: SchemaSnapshot) -> Self {
        self.state.snapshot = snapshot;
        self
    }

    pub fn with_result(mut self, sql: &str, result: ResultTable) -> Self {
        self.state.results.insert(normalize_whitespace(sql), result);
        self
    }

    pub fn with_query_error(mut self, sql: &str, error: ConnectorError) -> Self {
        self.state.errors.insert(normalize_whitespace(sql), error);
        self
    }

    pub fn with_plan(mut self, sql: &str, plan: impl Into<String>) -> Self {
        self.state.plans.insert(normalize_whitespace(sql), plan.into());
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.state.relationships.push(relationship);
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set connector name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.connector_name = name;
        self
    }

    /// Build the MockConnector
    pub fn build(self) -> MockConnector {
        MockConnector {
            state: Arc::new(RwLock::new(self.state)),
            connected: false,
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            kind: self.kind,
            connector_name: self.connector_name,
        }
    }
}

impl Default for MockConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{ColumnDescriptor, LogicalType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn numbers(n: i64) -> ResultTable {
        ResultTable::from_rows(vec!["n".into()], (1..=n).map(|i| vec![json!(i)]).collect())
    }

    fn users() -> TableSchema {
        TableSchema::from_columns(vec![
            ColumnDescriptor::new("id", "integer", LogicalType::Int).with_nullable(false),
            ColumnDescriptor::new("email", "text", LogicalType::String),
        ])
    }

    #[tokio::test]
    async fn test_mock_connector_connection_failure() {
        let mut connector = MockConnector::new().with_connection_failure();
        assert!(!connector.connect().await);
        assert!(!connector.is_connected());
        assert_eq!(connector.connect_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_connector_name() {
        let connector = MockConnector::new();
        assert_eq!(connector.name(), "Mock");

        let connector = MockConnector::new().with_name("TestBigQuery");
        assert_eq!(connector.name(), "TestBigQuery");
    }

    #[tokio::test]
    async fn test_mock_connector_latency() {
        let mut connector = MockConnector::new().with_latency(50);

        let start = std::time::Instant::now();
        connector.connect().await;
        assert!(start.elapsed().as_millis() >= 50);
    }

    #[tokio::test]
    async fn injected_limits_truncate_canned_rows() {
        for kind in [BackendKind::Postgres, BackendKind::Snowflake] {
            let mut connector = MockConnectorBuilder::new()
                .with_backend(kind)
                .with_result("SELECT n FROM numbers", numbers(20))
                .build();
            connector.connect().await;

            let limited = connector.execute_query("SELECT n FROM numbers;", Some(5)).await.unwrap();
            assert_eq!(limited.row_count(), 5);

            let wide = connector.execute_query("SELECT n FROM numbers", Some(100)).await.unwrap();
            assert_eq!(wide.row_count(), 20);

            let all = connector.execute_query("SELECT  n\nFROM numbers", None).await.unwrap();
            assert_eq!(all.row_count(), 20);
        }
    }

    #[tokio::test]
    async fn executed_statements_are_recorded_with_limit() {
        let mut connector = MockConnectorBuilder::new()
            .with_result("SELECT n FROM numbers", numbers(3))
            .build();
        let observer = connector.clone();

        connector.connect().await;
        connector.execute_query("SELECT n FROM numbers", Some(2)).await.unwrap();

        assert_eq!(
            observer.executed_queries().await,
            vec!["SELECT * FROM (SELECT n FROM numbers) AS subquery LIMIT 2".to_string()]
        );
    }

    #[tokio::test]
    async fn query_errors_and_unknown_statements() {
        let mut connector = MockConnector::new();
        connector
            .add_query_error("SELECT * FROM missing", ConnectorError::QueryError("relation \"missing\" does not exist".into()))
            .await;
        connector.connect().await;

        let err = connector.execute_query("SELECT * FROM missing", Some(10)).await.unwrap_err();
        assert_eq!(err.to_string(), "relation \"missing\" does not exist");

        assert!(matches!(
            connector.execute_query("SELECT 42", None).await,
            Err(ConnectorError::QueryError(_))
        ));
    }

    #[tokio::test]
    async fn catalog_is_hidden_until_connected() {
        let mut connector = MockConnectorBuilder::new()
            .with_table(&["public"], "users", users())
            .with_relationship(Relationship::new("public.orders", "user_id", "public.users", "id"))
            .build();

        assert!(connector.get_schema().await.unwrap().is_empty());
        assert!(connector.get_tables().await.unwrap().is_empty());
        assert!(matches!(
            connector.get_table_info("users").await,
            Err(ConnectorError::NotConnected)
        ));

        connector.connect().await;
        assert_eq!(connector.get_tables().await.unwrap(), vec!["public.users".to_string()]);
        assert_eq!(connector.get_relationships().await.unwrap().len(), 1);

        let info = connector.get_table_info("users").await.unwrap();
        assert_eq!(info.name, "public.users");
        assert_eq!(info.column_names(), vec!["id", "email"]);

        assert!(matches!(
            connector.get_table_info("public.nope").await,
            Err(ConnectorError::TableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn guard_follows_backend_kind() {
        let mut postgres = MockConnector::new();
        let mut redshift = MockConnector::new().with_backend(BackendKind::Redshift);

        assert!(postgres.validate_query("SELECT * FROM copy").await.is_valid);
        assert!(!redshift.validate_query("SELECT * FROM copy").await.is_valid);
    }

    #[tokio::test]
    async fn test_mock_connector_clone_shares_state() {
        let mut connector = MockConnector::new();
        let observer = connector.clone();

        connector.add_result("SELECT 1", numbers(1)).await;
        connector.connect().await;
        connector.disconnect().await;
        connector.disconnect().await;

        assert!(!observer.is_connected());
        assert_eq!(observer.connect_count().await, 1);
        assert_eq!(observer.disconnect_count().await, 2);

        observer.clear().await;
        connector.connect().await;
        assert!(connector.execute_query("SELECT 1", None).await.is_err());
    }

    #[tokio::test]
    async fn plans_and_costs() {
        let mut connector = MockConnectorBuilder::new()
            .with_result("SELECT n FROM numbers", numbers(4))
            .with_plan("SELECT n FROM numbers", "Seq Scan on numbers")
            .build();

        assert!(connector.get_query_plan("SELECT n FROM numbers").await.is_err());
        connector.connect().await;

        assert_eq!(
            connector.get_query_plan("SELECT n FROM numbers").await.unwrap(),
            "Seq Scan on numbers"
        );
        let cost = connector.estimate_query_cost("SELECT n FROM numbers").await.unwrap();
        assert_eq!(cost.get_u64("estimated_rows"), Some(4));
    }
}
