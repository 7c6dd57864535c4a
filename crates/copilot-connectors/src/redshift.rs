//! Amazon Redshift MPP-cluster connector
//!
//! Speaks the PostgreSQL wire protocol (always over TLS) but, unlike the
//! row-store connector, reads the catalog on every call instead of
//! reflecting once at connect time. Physical layout (distribution and sort
//! keys) comes from `pg_table_def`, statistics from `svv_table_info`.
//!
//! ## Parameters
//!
//! `host`, `port` (default 5439), `database`, `user`, `password`.

use crate::connector::{Connector, ConnectorError};
use crate::dialect::{apply_limit, LimitStyle};
use crate::guard::QueryGuard;
use crate::postgres::PostgresConnector;
use copilot_core::{
    BackendKind, ColumnDescriptor, ConnectionParams, CostEstimate, Relationship, ResultTable,
    SchemaSnapshot, TableDescriptor, ValidationResult,
};
use regex::Regex;
use std::sync::OnceLock;

#[cfg(feature = "redshift")]
use tokio_postgres::Client;

/// Schemas never reported to callers
pub const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "pg_catalog", "pg_internal"];

const PLAN_DETAILS_CHARS: usize = 500;
const PLAN_SUMMARY_CHARS: usize = 200;

fn cost_pattern() -> &'static Regex {
    static COST: OnceLock<Regex> = OnceLock::new();
    COST.get_or_init(|| {
        Regex::new(r"cost=([0-9.]+)\.\.([0-9.]+) rows=([0-9]+)").expect("static cost pattern compiles")
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Summarize `EXPLAIN` text into a cost estimate
///
/// Every `cost=a..b rows=n` node contributes its upper cost and row
/// estimate. Plans without any cost figures produce a summary instead.
pub fn redshift_cost_from_plan(plan: &str) -> CostEstimate {
    let mut total_cost = 0.0;
    let mut total_rows: u64 = 0;
    let mut nodes = 0;

    for captures in cost_pattern().captures_iter(plan) {
        let upper = captures[2].parse::<f64>().unwrap_or(0.0);
        let rows = captures[3].parse::<u64>().unwrap_or(0);
        total_cost += upper;
        total_rows = total_rows.saturating_add(rows);
        nodes += 1;
    }

    let estimate = CostEstimate::new(BackendKind::Redshift);
    if nodes > 0 {
        estimate
            .with("total_cost", total_cost)
            .with("estimated_rows", total_rows)
            .with("cost_units", "Redshift query planner units")
            .with("plan_details", truncate_chars(plan, PLAN_DETAILS_CHARS))
    } else {
        estimate
            .with("plan_available", true)
            .with("cost_details", "Cost information not available in plan")
            .with("plan_summary", truncate_chars(plan, PLAN_SUMMARY_CHARS))
    }
}

/// Redshift connector
pub struct RedshiftConnector {
    params: ConnectionParams,
    guard: QueryGuard,

    #[cfg(feature = "redshift")]
    client: Option<Client>,
}

impl RedshiftConnector {
    /// Create a connector; no connection is attempted
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            guard: QueryGuard::mpp(),
            #[cfg(feature = "redshift")]
            client: None,
        }
    }

    /// Build a column from an `information_schema.columns` row
    fn column(
        name: String,
        data_type: String,
        is_nullable: &str,
        default: Option<String>,
        max_length: Option<i32>,
        precision: Option<i32>,
        scale: Option<i32>,
    ) -> ColumnDescriptor {
        let logical = PostgresConnector::map_postgres_type(&data_type);
        ColumnDescriptor::new(name, data_type, logical)
            .with_nullable(is_nullable.eq_ignore_ascii_case("YES"))
            .with_default(default)
            .with_dimensions(
                max_length.map(i64::from),
                precision.map(i64::from),
                scale.map(i64::from),
            )
    }
}

#[cfg(feature = "redshift")]
mod native {
    use super::*;
    use crate::dialect::{quote_ident, split_qualified, strip_terminator};
    use crate::pgwire::{self, query_error, WireParams};
    use crate::strategy::{best_effort, first_success, RowCountStrategy, ROW_COUNT_STRATEGIES};
    use copilot_core::{PhysicalLayout, TableSchema};

    const SCHEMAS_QUERY: &str = r#"
        SELECT schema_name::text
        FROM information_schema.schemata
        WHERE schema_name NOT IN ('information_schema', 'pg_catalog', 'pg_internal')
        ORDER BY schema_name
    "#;

    const SCHEMA_TABLES_QUERY: &str = r#"
        SELECT table_name::text, table_type::text
        FROM information_schema.tables
        WHERE table_schema = $1
        ORDER BY table_name
    "#;

    const ALL_TABLES_QUERY: &str = r#"
        SELECT table_schema::text, table_name::text
        FROM information_schema.tables
        WHERE table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_internal')
        ORDER BY table_schema, table_name
    "#;

    const LOCATE_TABLE_QUERY: &str = r#"
        SELECT table_schema::text, table_type::text
        FROM information_schema.tables
        WHERE table_name = $1
          AND table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_internal')
        ORDER BY table_schema
        LIMIT 1
    "#;

    const TABLE_TYPE_QUERY: &str = r#"
        SELECT table_type::text
        FROM information_schema.tables
        WHERE table_schema = $1 AND table_name = $2
    "#;

    const COLUMNS_QUERY: &str = r#"
        SELECT
            column_name::text,
            data_type::text,
            is_nullable::text,
            column_default::text,
            character_maximum_length::int4,
            numeric_precision::int4,
            numeric_scale::int4
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
        ORDER BY ordinal_position
    "#;

    pub(super) const RELATIONSHIPS_QUERY: &str = r#"
        SELECT
            tc.table_schema::text,
            tc.table_name::text,
            kcu.column_name::text,
            ccu.table_schema::text,
            ccu.table_name::text,
            ccu.column_name::text
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON tc.constraint_name = kcu.constraint_name
         AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
          ON ccu.constraint_name = tc.constraint_name
         AND ccu.constraint_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
        ORDER BY 1, 2, 3
    "#;

    async fn columns(client: &Client, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
        let rows = client
            .query(COLUMNS_QUERY, &[&schema, &table])
            .await
            .map_err(query_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                let is_nullable: String = row.get(2);
                RedshiftConnector::column(
                    row.get(0),
                    row.get(1),
                    &is_nullable,
                    row.get(3),
                    row.get(4),
                    row.get(5),
                    row.get(6),
                )
            })
            .collect())
    }

    async fn count_rows(
        client: &Client,
        schema: &str,
        table: &str,
        strategy: RowCountStrategy,
    ) -> Result<Option<u64>, ConnectorError> {
        match strategy {
            RowCountStrategy::ExactCount => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {}.{}",
                    quote_ident(schema, '"'),
                    quote_ident(table, '"')
                );
                let row = client.query_one(&sql, &[]).await.map_err(query_error)?;
                let count: i64 = row.try_get(0).map_err(query_error)?;
                Ok(u64::try_from(count).ok())
            }
            RowCountStrategy::CatalogStatistics => {
                let row = client
                    .query_opt(
                        r#"SELECT tbl_rows::bigint FROM svv_table_info WHERE "schema" = $1 AND "table" = $2"#,
                        &[&schema, &table],
                    )
                    .await
                    .map_err(query_error)?;
                Ok(row
                    .and_then(|r| r.try_get::<_, Option<i64>>(0).ok().flatten())
                    .and_then(|n| u64::try_from(n).ok()))
            }
        }
    }

    async fn size_bytes(client: &Client, schema: &str, table: &str) -> Result<Option<u64>, ConnectorError> {
        let row = client
            .query_opt(
                r#"SELECT size::bigint FROM svv_table_info WHERE "schema" = $1 AND "table" = $2"#,
                &[&schema, &table],
            )
            .await
            .map_err(query_error)?;
        // size is reported in 1 MB blocks
        Ok(row
            .and_then(|r| r.try_get::<_, Option<i64>>(0).ok().flatten())
            .and_then(|mb| u64::try_from(mb).ok())
            .map(|mb| mb * 1024 * 1024))
    }

    async fn distribution_key(client: &Client, schema: &str, table: &str) -> Result<Option<String>, ConnectorError> {
        let row = client
            .query_opt(
                r#"SELECT "column"::text FROM pg_table_def
                   WHERE schemaname = $1 AND tablename = $2 AND distkey = true
                   LIMIT 1"#,
                &[&schema, &table],
            )
            .await
            .map_err(query_error)?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn sort_keys(client: &Client, schema: &str, table: &str) -> Result<Option<Vec<String>>, ConnectorError> {
        let rows = client
            .query(
                r#"SELECT "column"::text FROM pg_table_def
                   WHERE schemaname = $1 AND tablename = $2 AND sortkey <> 0
                   ORDER BY abs(sortkey)"#,
                &[&schema, &table],
            )
            .await
            .map_err(query_error)?;
        Ok(Some(rows.iter().map(|r| r.get(0)).collect()))
    }

    impl RedshiftConnector {
        fn client(&self) -> Result<&Client, ConnectorError> {
            self.client.as_ref().ok_or(ConnectorError::NotConnected)
        }

        pub(super) async fn open_session(&mut self) -> Result<(), ConnectorError> {
            let wire = WireParams::from_params(&self.params, 5439, true)?;
            let client = pgwire::open(&wire, "Redshift").await?;

            let version = client
                .query_one("SELECT version()", &[])
                .await
                .map_err(query_error)?;
            let version: String = version.try_get(0).map_err(query_error)?;

            tracing::info!(host = %wire.host, database = %wire.database, %version, "connected to Redshift");
            self.client = Some(client);
            Ok(())
        }

        pub(super) fn close_session(&mut self) {
            self.client = None;
        }

        pub(super) fn has_session(&self) -> bool {
            self.client.is_some()
        }

        pub(super) fn session_error(&self) -> ConnectorError {
            ConnectorError::NotConnected
        }

        pub(super) async fn run(&self, sql: &str) -> Result<ResultTable, ConnectorError> {
            pgwire::fetch_table(self.client()?, sql).await
        }

        pub(super) async fn snapshot(&self) -> Result<SchemaSnapshot, ConnectorError> {
            let client = self.client()?;
            let mut snapshot = SchemaSnapshot::new();

            let schemas = client.query(SCHEMAS_QUERY, &[]).await.map_err(query_error)?;
            for row in &schemas {
                let schema: String = row.get(0);
                snapshot.ensure_namespace(&[schema.as_str()]);

                let tables = match client.query(SCHEMA_TABLES_QUERY, &[&schema]).await {
                    Ok(tables) => tables,
                    Err(e) => {
                        tracing::warn!(schema = %schema, error = %query_error(e), "skipping schema");
                        continue;
                    }
                };

                for table_row in &tables {
                    let table: String = table_row.get(0);
                    let table_type: Option<String> = table_row.get(1);
                    match columns(client, &schema, &table).await {
                        Ok(cols) => snapshot.insert_table(
                            &[schema.as_str()],
                            table,
                            TableSchema::from_columns(cols).with_table_type(table_type),
                        ),
                        Err(e) => {
                            tracing::warn!(schema = %schema, table = %table, error = %e, "skipping table");
                        }
                    }
                }
            }

            Ok(snapshot)
        }

        pub(super) async fn table_names(&self) -> Result<Vec<String>, ConnectorError> {
            let rows = self
                .client()?
                .query(ALL_TABLES_QUERY, &[])
                .await
                .map_err(query_error)?;
            Ok(rows
                .iter()
                .map(|row| format!("{}.{}", row.get::<_, String>(0), row.get::<_, String>(1)))
                .collect())
        }

        async fn locate(&self, name: &str) -> Result<(String, String, Option<String>), ConnectorError> {
            let client = self.client()?;
            let parts = split_qualified(name, 2);

            match parts.as_slice() {
                [schema, table] => {
                    let table_type = client
                        .query_opt(TABLE_TYPE_QUERY, &[schema, table])
                        .await
                        .map_err(query_error)?
                        .ok_or_else(|| ConnectorError::TableNotFound(name.to_string()))?
                        .get(0);
                    Ok((schema.clone(), table.clone(), table_type))
                }
                [table] => {
                    let row = client
                        .query_opt(LOCATE_TABLE_QUERY, &[table])
                        .await
                        .map_err(query_error)?
                        .ok_or_else(|| ConnectorError::TableNotFound(name.to_string()))?;
                    Ok((row.get(0), table.clone(), row.get(1)))
                }
                _ => Err(ConnectorError::TableNotFound(name.to_string())),
            }
        }

        pub(super) async fn describe(&self, name: &str) -> Result<TableDescriptor, ConnectorError> {
            let client = self.client()?;
            let (schema, table, table_type) = self.locate(name).await?;

            let cols = columns(client, &schema, &table).await?;
            if cols.is_empty() {
                return Err(ConnectorError::TableNotFound(name.to_string()));
            }

            let row_count = first_success(ROW_COUNT_STRATEGIES, |strategy| {
                count_rows(client, &schema, &table, strategy)
            })
            .await;

            let layout = PhysicalLayout {
                distribution_key: best_effort("distkey", distribution_key(client, &schema, &table)).await,
                sort_keys: best_effort("sortkeys", sort_keys(client, &schema, &table))
                    .await
                    .unwrap_or_default(),
                ..PhysicalLayout::default()
            };

            let qualified = format!("{}.{}", schema, table);
            let foreign_keys = best_effort("relationships", async {
                self.relationships().await.map(Some)
            })
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.from_table == qualified)
            .collect();

            Ok(TableDescriptor {
                name: qualified,
                columns: cols,
                row_count,
                size_bytes: best_effort("size", size_bytes(client, &schema, &table)).await,
                table_type,
                layout,
                foreign_keys,
                ..TableDescriptor::default()
            })
        }

        pub(super) async fn plan(&self, sql: &str) -> Result<String, ConnectorError> {
            let lines = pgwire::explain_lines(self.client()?, strip_terminator(sql)).await?;
            Ok(lines.join("\n"))
        }

        pub(super) async fn relationships(&self) -> Result<Vec<Relationship>, ConnectorError> {
            let rows = self
                .client()?
                .query(RELATIONSHIPS_QUERY, &[])
                .await
                .map_err(query_error)?;
            Ok(rows
                .iter()
                .map(|row| {
                    Relationship::new(
                        format!("{}.{}", row.get::<_, String>(0), row.get::<_, String>(1)),
                        row.get::<_, String>(2),
                        format!("{}.{}", row.get::<_, String>(3), row.get::<_, String>(4)),
                        row.get::<_, String>(5),
                    )
                })
                .collect())
        }
    }
}

#[cfg(not(feature = "redshift"))]
impl RedshiftConnector {
    async fn open_session(&mut self) -> Result<(), ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Redshift))
    }

    fn close_session(&mut self) {}

    fn has_session(&self) -> bool {
        false
    }

    fn session_error(&self) -> ConnectorError {
        ConnectorError::feature_disabled(BackendKind::Redshift)
    }

    async fn run(&self, _sql: &str) -> Result<ResultTable, ConnectorError> {
        Err(self.session_error())
    }

    async fn snapshot(&self) -> Result<SchemaSnapshot, ConnectorError> {
        Err(self.session_error())
    }

    async fn table_names(&self) -> Result<Vec<String>, ConnectorError> {
        Err(self.session_error())
    }

    async fn describe(&self, _name: &str) -> Result<TableDescriptor, ConnectorError> {
        Err(self.session_error())
    }

    async fn plan(&self, _sql: &str) -> Result<String, ConnectorError> {
        Err(self.session_error())
    }

    async fn relationships(&self) -> Result<Vec<Relationship>, ConnectorError> {
        Err(self.session_error())
    }
}

#[async_trait::async_trait]
impl Connector for RedshiftConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::Redshift
    }

    fn name(&self) -> &'static str {
        "Redshift"
    }

    fn is_connected(&self) -> bool {
        self.has_session()
    }

    async fn connect(&mut self) -> bool {
        match self.open_session().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(backend = self.name(), error = %e, "connect failed");
                self.close_session();
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.has_session() {
            tracing::debug!(backend = self.name(), "disconnecting");
        }
        self.close_session();
    }

    async fn execute_query(
        &mut self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<ResultTable, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        let sql = apply_limit(sql, limit, LimitStyle::Trailing);
        tracing::debug!(backend = self.name(), sql = %sql, "executing query");
        self.run(&sql).await
    }

    async fn get_schema(&mut self) -> Result<SchemaSnapshot, ConnectorError> {
        if !self.has_session() {
            return Ok(SchemaSnapshot::new());
        }
        self.snapshot().await
    }

    async fn get_tables(&mut self) -> Result<Vec<String>, ConnectorError> {
        if !self.has_session() {
            return Ok(Vec::new());
        }
        self.table_names().await
    }

    async fn get_table_info(&mut self, name: &str) -> Result<TableDescriptor, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        self.describe(name).await
    }

    async fn validate_query(&mut self, sql: &str) -> ValidationResult {
        self.guard.check(sql)
    }

    async fn get_query_plan(&mut self, sql: &str) -> Result<String, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        self.plan(sql).await
    }

    async fn estimate_query_cost(&mut self, sql: &str) -> Result<CostEstimate, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        let plan = self.plan(sql).await?;
        Ok(redshift_cost_from_plan(&plan))
    }

    async fn get_relationships(&mut self) -> Result<Vec<Relationship>, ConnectorError> {
        if !self.has_session() {
            return Ok(Vec::new());
        }
        self.relationships().await
    }
}
