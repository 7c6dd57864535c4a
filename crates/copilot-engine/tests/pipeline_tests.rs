//! End-to-end flows through the pipeline, driven by the mock connector

use copilot_connectors::{
    Connector, ConnectorError, ConnectorSource, MockConnector, MockConnectorBuilder,
};
use copilot_core::{
    BackendKind, ColumnDescriptor, LogicalType, QueryLimits, Relationship, ResultTable,
    SchemaSnapshot, TableSchema,
};
use copilot_engine::{
    MemoryQueryLog, QueryLog, QueryPipeline, QueryRequest, QueryType, TextGenerator,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

const EVENTS_SQL: &str = "SELECT id, label FROM events";

// =============================================================================
// Test doubles
// =============================================================================

/// Hands out clones of one mock so the test can inspect shared state
struct MockSource {
    connector: MockConnector,
}

impl ConnectorSource for MockSource {
    fn open(&self, db_type: Option<&str>) -> Result<Box<dyn Connector>, ConnectorError> {
        if let Some(tag) = db_type {
            tag.parse::<BackendKind>()?;
        }
        Ok(Box::new(self.connector.clone()))
    }
}

struct CannedGenerator {
    sql: Option<String>,
}

#[async_trait::async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate_sql(
        &self,
        _query: &str,
        schema_context: &SchemaSnapshot,
        _database_type: BackendKind,
    ) -> Option<String> {
        assert!(!schema_context.is_empty(), "generator should see the catalog");
        self.sql.clone()
    }

    async fn generate_insights(&self, query: &str, results: &ResultTable, _sql: &str) -> String {
        format!("{} rows answer '{}'", results.row_count(), query)
    }
}

fn events(n: usize) -> ResultTable {
    ResultTable::from_rows(
        vec!["id".into(), "label".into()],
        (1..=n).map(|i| vec![json!(i), json!(format!("event-{}", i))]).collect(),
    )
}

fn catalog_mock() -> MockConnector {
    let events_schema = TableSchema::from_columns(vec![
        ColumnDescriptor::new("id", "integer", LogicalType::Int).with_nullable(false),
        ColumnDescriptor::new("label", "text", LogicalType::String),
    ]);
    let sessions_schema = TableSchema::from_columns(vec![
        ColumnDescriptor::new("event_id", "integer", LogicalType::Int),
    ]);

    MockConnectorBuilder::new()
        .with_table(&["public"], "events", events_schema)
        .with_table(&["public"], "sessions", sessions_schema)
        .with_relationship(Relationship::new("public.sessions", "event_id", "public.events", "id"))
        .with_result(EVENTS_SQL, events(20))
        .build()
}

fn pipeline(connector: &MockConnector, limits: QueryLimits) -> (QueryPipeline, Arc<MemoryQueryLog>) {
    let log = Arc::new(MemoryQueryLog::new());
    let pipeline = QueryPipeline::new(
        Arc::new(MockSource {
            connector: connector.clone(),
        }),
        limits,
    )
    .with_query_log(log.clone());
    (pipeline, log)
}

fn with_generator(pipeline: QueryPipeline, sql: Option<&str>) -> QueryPipeline {
    pipeline.with_generator(Arc::new(CannedGenerator {
        sql: sql.map(str::to_string),
    }))
}

// =============================================================================
// Execute
// =============================================================================

#[tokio::test]
async fn test_sql_query_runs_and_closes_session() {
    let mock = catalog_mock();
    let (pipeline, log) = pipeline(&mock, QueryLimits::default());

    let response = pipeline.execute(&QueryRequest::sql(EVENTS_SQL)).await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.row_count, Some(20));
    assert_eq!(response.generated_sql.as_deref(), Some(EVENTS_SQL));
    assert!(response.insights.is_none());

    let results = response.results.unwrap();
    assert_eq!(results.columns, vec!["id", "label"]);
    assert_eq!(Value::Object(results.data[0].clone()), json!({"id": 1, "label": "event-1"}));

    let metadata = response.metadata.unwrap();
    assert_eq!(metadata.query_type, QueryType::Sql);
    assert_eq!(metadata.database_type, "postgres");

    assert_eq!(mock.connect_count().await, 1);
    assert_eq!(mock.disconnect_count().await, 1);

    let history = log.history(10, 0, false).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].id, response.query_id);
    assert_eq!(history[0].row_count, Some(20));
}

#[tokio::test]
async fn test_natural_query_generates_sql_and_insights() {
    let mock = catalog_mock();
    let (pipeline, _) = pipeline(&mock, QueryLimits::default());
    let pipeline = with_generator(pipeline, Some("```sql\nSELECT id, label FROM events\n```"));

    let response = pipeline
        .execute(&QueryRequest::natural("how many events?").with_limit(3))
        .await;

    assert!(response.success, "{:?}", response.error);
    assert_eq!(response.generated_sql.as_deref(), Some("SELECT id, label FROM events;"));
    assert_eq!(response.row_count, Some(3));
    assert_eq!(response.insights.as_deref(), Some("3 rows answer 'how many events?'"));
    assert_eq!(
        mock.executed_queries().await,
        vec!["SELECT * FROM (SELECT id, label FROM events) AS subquery LIMIT 3".to_string()]
    );
}

#[tokio::test]
async fn test_limit_is_capped_by_max_query_rows() {
    let mock = catalog_mock();
    let limits = QueryLimits {
        max_query_rows: 5,
        ..QueryLimits::default()
    };
    let (pipeline, _) = pipeline(&mock, limits);

    let capped = pipeline.execute(&QueryRequest::sql(EVENTS_SQL).with_limit(50)).await;
    assert_eq!(capped.row_count, Some(5));

    let defaulted = pipeline.execute(&QueryRequest::sql(EVENTS_SQL)).await;
    assert_eq!(defaulted.row_count, Some(5));

    let smaller = pipeline.execute(&QueryRequest::sql(EVENTS_SQL).with_limit(2)).await;
    assert_eq!(smaller.row_count, Some(2));
}

#[tokio::test]
async fn test_destructive_query_is_rejected_before_execution() {
    let mock = catalog_mock();
    let (pipeline, log) = pipeline(&mock, QueryLimits::default());

    let response = pipeline.execute(&QueryRequest::sql("DELETE FROM events")).await;

    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("Query validation failed: Query contains potentially destructive operation: DELETE")
    );
    assert!(mock.executed_queries().await.is_empty());
    assert_eq!(mock.disconnect_count().await, 1);

    let stats = log.stats().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate, 0.0);
}

#[tokio::test]
async fn test_generation_failures() {
    let mock = catalog_mock();

    let (pipeline_without, _) = pipeline(&mock, QueryLimits::default());
    let response = pipeline_without.execute(&QueryRequest::natural("anything")).await;
    assert_eq!(
        response.error.as_deref(),
        Some("No text generator configured for natural language queries")
    );

    let (pipeline, _) = pipeline(&mock, QueryLimits::default());
    let response = with_generator(pipeline, None)
        .execute(&QueryRequest::natural("anything"))
        .await;
    assert!(!response.success);
    assert_eq!(
        response.error.as_deref(),
        Some("Could not generate SQL from natural language query")
    );
    assert_eq!(mock.disconnect_count().await, 2);
}

#[tokio::test]
async fn test_execution_error_is_reported_verbatim() {
    let mock = MockConnectorBuilder::new()
        .with_query_error(
            "SELECT * FROM missing",
            ConnectorError::QueryError("relation \"missing\" does not exist".into()),
        )
        .build();
    let (pipeline, log) = pipeline(&mock, QueryLimits::default());

    let response = pipeline.execute(&QueryRequest::sql("SELECT * FROM missing")).await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("relation \"missing\" does not exist"));

    let history = log.history(10, 0, false).await;
    assert_eq!(history[0].error_message, response.error);
}

#[tokio::test]
async fn test_connection_failure_and_unknown_backend() {
    let mock = MockConnector::new().with_connection_failure();
    let (pipeline, log) = pipeline(&mock, QueryLimits::default());

    let response = pipeline.execute(&QueryRequest::sql("SELECT 1")).await;
    assert_eq!(response.error.as_deref(), Some("Failed to connect to database"));

    let response = pipeline
        .execute(&QueryRequest::sql("SELECT 1").with_database_type("oracle"))
        .await;
    assert_eq!(response.error.as_deref(), Some("Unsupported database type: oracle"));

    assert_eq!(log.stats().await.total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expiry_disconnects() {
    let mock = MockConnectorBuilder::new()
        .with_result("SELECT 1", ResultTable::new(vec!["one".into()]))
        .with_latency(10_000)
        .build();
    let limits = QueryLimits {
        query_timeout_seconds: 1,
        ..QueryLimits::default()
    };
    let (pipeline, _) = pipeline(&mock, limits);

    let response = pipeline.execute(&QueryRequest::sql("SELECT 1")).await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Query timed out after 1s"));
    assert!(mock.disconnect_count().await >= 1);
}

// =============================================================================
// Validate / Plan / Schema
// =============================================================================

#[tokio::test]
async fn test_validate_reports_issues_and_fixes() {
    let mock = catalog_mock();
    let (pipeline, _) = pipeline(&mock, QueryLimits::default());

    let ok = pipeline.validate(&QueryRequest::sql("SELECT 1")).await;
    assert!(ok.is_valid);
    assert!(ok.safety_issues.is_empty());
    assert!(ok.generated_sql.is_none());

    let bad = pipeline.validate(&QueryRequest::sql("UPDATE events SET label = 'x'")).await;
    assert!(!bad.is_valid);
    assert_eq!(
        bad.safety_issues,
        vec!["Query contains potentially destructive operation: UPDATE"]
    );
    assert_eq!(bad.suggested_fixes, vec!["Ensure query only contains SELECT statements"]);

    let generated = with_generator(pipeline, Some("SELECT count(*) FROM events"))
        .validate(&QueryRequest::natural("count events"))
        .await;
    assert!(generated.is_valid);
    assert_eq!(generated.generated_sql.as_deref(), Some("SELECT count(*) FROM events;"));
}

#[tokio::test]
async fn test_plan_returns_text_and_cost() {
    let mock = catalog_mock();
    mock.add_plan(EVENTS_SQL, "Seq Scan on events  (cost=0.00..22.70 rows=1270 width=36)")
        .await;
    let (pipeline, _) = pipeline(&mock, QueryLimits::default());

    let plan = pipeline.plan(&QueryRequest::sql(EVENTS_SQL)).await.unwrap();
    assert_eq!(plan.query, EVENTS_SQL);
    assert!(plan.plan.starts_with("Seq Scan on events"));
    assert_eq!(plan.estimated_cost.get_u64("estimated_rows"), Some(20));
    assert_eq!(plan.estimated_cost.get_str("cost_units"), Some("mock units"));
    assert!(mock.executed_queries().await.is_empty());
}

#[tokio::test]
async fn test_schema_overview() {
    let mock = catalog_mock();
    let (pipeline, _) = pipeline(&mock, QueryLimits::default());

    let overview = pipeline.schema(None, true).await.unwrap();
    assert_eq!(overview.database_type, "postgres");
    assert_eq!(overview.table_count, 2);
    assert_eq!(overview.relationships.len(), 1);

    let without = pipeline.schema(None, false).await.unwrap();
    assert!(without.relationships.is_empty());

    assert_eq!(
        pipeline.tables(None).await.unwrap(),
        vec!["public.events", "public.sessions"]
    );

    let info = pipeline.describe(None, "sessions").await.unwrap();
    assert_eq!(info.name, "public.sessions");
    assert_eq!(info.foreign_keys.len(), 1);

    assert!(pipeline.describe(None, "nope").await.is_err());
    assert_eq!(mock.connect_count().await, mock.disconnect_count().await);
}
