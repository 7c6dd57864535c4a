//! PostgreSQL row-store connector
//!
//! Catalog metadata is reflected once, at `connect`, from
//! `information_schema` and `pg_indexes`. `get_schema`, `get_tables` and
//! `get_relationships` read that reflection, so schema changes made during
//! the session are only seen after reconnecting. `get_table_info` adds live
//! statistics (row count, relation size) on top of it.
//!
//! Arbitrary statements are bounded by wrapping them in an outer
//! `SELECT * FROM (...) AS subquery LIMIT n`.
//!
//! ## Parameters
//!
//! `host`, `port`, `database`, `user`, `password`, optional `sslmode=require`.
//!
//! Reference: https://www.postgresql.org/docs/current/information-schema.html

use crate::connector::{Connector, ConnectorError};
use crate::dialect::{apply_limit, LimitStyle};
use crate::guard::QueryGuard;
use copilot_core::{
    BackendKind, ColumnDescriptor, ConnectionParams, CostEstimate, LogicalType, Relationship,
    ResultTable, SchemaSnapshot, TableDescriptor, TableSchema, ValidationResult,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "postgres")]
use tokio_postgres::Client;

/// Catalog state captured at connect time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reflection {
    pub snapshot: SchemaSnapshot,
    pub relationships: Vec<Relationship>,
}

/// One `information_schema.columns` row
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub table_type: Option<String>,
    pub name: String,
    pub data_type: String,
    pub udt_name: String,
    pub is_nullable: String,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    pub description: Option<String>,
}

/// A primary-key or unique constraint column
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRow {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub constraint_type: String,
}

/// An index on a table
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub schema: String,
    pub table: String,
    pub index: String,
}

/// Assemble a reflection from raw catalog rows
///
/// Columns must arrive ordered by schema, table and ordinal position; that
/// order is preserved in the snapshot.
pub fn assemble_reflection(
    columns: Vec<ColumnRow>,
    keys: &[KeyRow],
    relationships: Vec<Relationship>,
    indexes: &[IndexRow],
) -> Reflection {
    let mut tables: BTreeMap<(String, String), TableSchema> = BTreeMap::new();

    for row in columns {
        let full_type = PostgresConnector::full_type(&row.data_type, &row.udt_name, row.precision, row.scale);
        let column = ColumnDescriptor::new(
            row.name,
            full_type.clone(),
            PostgresConnector::map_postgres_type(&full_type),
        )
        .with_nullable(row.is_nullable.eq_ignore_ascii_case("YES"))
        .with_default(row.default)
        .with_description(row.description)
        .with_dimensions(
            row.max_length.map(i64::from),
            row.precision.map(i64::from),
            row.scale.map(i64::from),
        );

        let entry = tables
            .entry((row.schema, row.table))
            .or_insert_with(|| TableSchema::default().with_table_type(row.table_type));
        entry.columns.push(column);
    }

    let primary: HashSet<(&str, &str, &str)> = keys
        .iter()
        .filter(|k| k.constraint_type == "PRIMARY KEY")
        .map(|k| (k.schema.as_str(), k.table.as_str(), k.column.as_str()))
        .collect();
    let unique: HashSet<(&str, &str, &str)> = keys
        .iter()
        .filter(|k| k.constraint_type == "UNIQUE")
        .map(|k| (k.schema.as_str(), k.table.as_str(), k.column.as_str()))
        .collect();

    let mut snapshot = SchemaSnapshot::new();
    for ((schema, table), mut entry) in tables {
        let qualified = format!("{}.{}", schema, table);

        for column in &mut entry.columns {
            let key = (schema.as_str(), table.as_str(), column.name.as_str());
            column.primary_key = primary.contains(&key);
            column.unique_key = unique.contains(&key);
            column.foreign_keys = relationships
                .iter()
                .filter(|r| r.from_table == qualified && r.from_column == column.name)
                .map(|r| format!("{}.{}", r.to_table, r.to_column))
                .collect();
        }

        entry.indexes = indexes
            .iter()
            .filter(|i| i.schema == schema && i.table == table)
            .map(|i| i.index.clone())
            .collect();

        snapshot.insert_table(&[schema.as_str()], table, entry);
    }

    Reflection {
        snapshot,
        relationships,
    }
}

/// Build the cost estimate from `EXPLAIN (FORMAT JSON)` output
pub fn cost_from_plan_json(plan: &Value) -> Result<CostEstimate, ConnectorError> {
    let root = plan
        .get(0)
        .and_then(|entry| entry.get("Plan"))
        .ok_or_else(|| ConnectorError::InvalidResponse("EXPLAIN output has no Plan".to_string()))?;

    let number = |key: &str| root.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    Ok(CostEstimate::new(BackendKind::Postgres)
        .with("total_cost", number("Total Cost"))
        .with("startup_cost", number("Startup Cost"))
        .with("estimated_rows", number("Plan Rows") as u64)
        .with("cost_units", "arbitrary units"))
}

/// PostgreSQL connector
pub struct PostgresConnector {
    params: ConnectionParams,
    guard: QueryGuard,
    reflection: Option<Reflection>,

    #[cfg(feature = "postgres")]
    client: Option<Client>,
}

impl PostgresConnector {
    /// Create a connector; no connection is attempted
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            guard: QueryGuard::standard(),
            reflection: None,
            #[cfg(feature = "postgres")]
            client: None,
        }
    }

    /// Declared type including numeric precision and array notation
    pub fn full_type(data_type: &str, udt_name: &str, precision: Option<i32>, scale: Option<i32>) -> String {
        if data_type == "numeric" || data_type == "decimal" {
            match (precision, scale) {
                (Some(p), Some(s)) => format!("numeric({},{})", p, s),
                (Some(p), None) => format!("numeric({})", p),
                _ => data_type.to_string(),
            }
        } else if data_type == "ARRAY" {
            match udt_name.strip_prefix('_') {
                Some(element) => format!("{}[]", element),
                None => data_type.to_string(),
            }
        } else {
            data_type.to_string()
        }
    }

    /// Convert PostgreSQL type to LogicalType
    ///
    /// This method handles all standard PostgreSQL data types and maps them
    /// to the appropriate LogicalType.
    ///
    /// # Supported Types
    ///
    /// - **Boolean**: `boolean`, `bool`
    /// - **Integer**: `smallint`, `integer`, `bigint`, `serial`, `bigserial`
    /// - **Floating Point**: `real`, `double precision`
    /// - **Numeric**: `numeric(p,s)`, `decimal(p,s)`, `money`
    /// - **String**: `varchar`, `char`, `text`, `name`
    /// - **Date/Time**: `date`, `timestamp`, `timestamptz`, `time`, `interval`
    /// - **JSON**: `json`, `jsonb`, Redshift `super`
    /// - **Array**: `type[]` and `_type` notation
    pub fn map_postgres_type(pg_type: &str) -> LogicalType {
        let base_type = pg_type.split('(').next()
            .unwrap_or(pg_type)
            .trim()
            .to_lowercase();

        match base_type.as_str() {
            "boolean" | "bool" => LogicalType::Bool,

            "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8" => LogicalType::Int,
            "serial" | "serial4" | "bigserial" | "serial8" | "smallserial" | "serial2" => LogicalType::Int,
            "oid" | "regclass" | "regproc" | "regtype" | "regnamespace" => LogicalType::Int,

            "real" | "float4" | "double precision" | "float8" | "float" => LogicalType::Float,

            "numeric" | "decimal" => Self::parse_numeric_type(pg_type),

            "money" => LogicalType::Decimal {
                precision: Some(19),
                scale: Some(2),
            },

            "character varying" | "varchar" | "character" | "char" | "bpchar" | "text" | "name"
            | "citext" => LogicalType::String,

            "bytea" | "uuid" | "xml" | "interval" => LogicalType::String,

            "date" => LogicalType::Date,
            "timestamp without time zone" | "timestamp" | "timestamp with time zone" | "timestamptz" => {
                LogicalType::Timestamp
            }
            "time without time zone" | "time" | "time with time zone" | "timetz" => LogicalType::Timestamp,

            "json" | "jsonb" | "super" => LogicalType::Json,

            "array" => LogicalType::Array {
                element_type: Box::new(LogicalType::Unknown),
            },

            "point" | "line" | "lseg" | "box" | "path" | "polygon" | "circle" | "geometry"
            | "geography" => LogicalType::String,

            "inet" | "cidr" | "macaddr" | "macaddr8" => LogicalType::String,

            "bit" | "bit varying" | "varbit" | "tsvector" | "tsquery" => LogicalType::String,

            "int4range" | "int8range" | "numrange" | "tsrange" | "tstzrange" | "daterange" => {
                LogicalType::String
            }

            _ => {
                if let Some(element) = pg_type.strip_suffix("[]") {
                    LogicalType::Array {
                        element_type: Box::new(Self::map_postgres_type(element)),
                    }
                } else if let Some(element) = pg_type.strip_prefix('_') {
                    LogicalType::Array {
                        element_type: Box::new(Self::map_postgres_type(element)),
                    }
                } else {
                    LogicalType::Unknown
                }
            }
        }
    }

    /// Parse numeric type with precision and scale
    ///
    /// Handles types like:
    /// - `numeric` - arbitrary precision
    /// - `numeric(10)` - precision 10, scale 0
    /// - `numeric(10,2)` - precision 10, scale 2
    fn parse_numeric_type(type_str: &str) -> LogicalType {
        if let Some(params) = type_str.split('(').nth(1) {
            if let Some(params) = params.strip_suffix(')') {
                let parts: Vec<&str> = params.split(',').collect();
                if parts.len() == 2 {
                    let precision = parts[0].trim().parse().ok();
                    let scale = parts[1].trim().parse().ok();
                    return LogicalType::Decimal { precision, scale };
                } else if parts.len() == 1 {
                    let precision = parts[0].trim().parse().ok();
                    return LogicalType::Decimal { precision, scale: Some(0) };
                }
            }
        }

        LogicalType::Decimal {
            precision: None,
            scale: None,
        }
    }
}

#[cfg(feature = "postgres")]
mod native {
    use super::*;
    use crate::dialect::{quote_ident, strip_terminator};
    use crate::pgwire::{self, query_error, WireParams};
    use crate::strategy::{best_effort, first_success, RowCountStrategy, ROW_COUNT_STRATEGIES};

    const COLUMNS_QUERY: &str = r#"
        SELECT
            c.table_schema::text,
            c.table_name::text,
            t.table_type::text,
            c.column_name::text,
            c.data_type::text,
            c.udt_name::text,
            c.is_nullable::text,
            c.column_default::text,
            c.character_maximum_length::int4,
            c.numeric_precision::int4,
            c.numeric_scale::int4,
            d.description
        FROM information_schema.columns c
        JOIN information_schema.tables t
          ON t.table_schema = c.table_schema AND t.table_name = c.table_name
        LEFT JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema::text
        LEFT JOIN pg_catalog.pg_class cls
          ON cls.relnamespace = n.oid AND cls.relname = c.table_name::text
        LEFT JOIN pg_catalog.pg_description d
          ON d.objoid = cls.oid AND d.objsubid = c.ordinal_position::int4
        WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
          AND c.table_schema::text NOT LIKE 'pg_toast%'
        ORDER BY c.table_schema, c.table_name, c.ordinal_position
    "#;

    const KEYS_QUERY: &str = r#"
        SELECT
            tc.table_schema::text,
            tc.table_name::text,
            kcu.column_name::text,
            tc.constraint_type::text
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON tc.constraint_name = kcu.constraint_name
         AND tc.table_schema = kcu.table_schema
         AND tc.table_name = kcu.table_name
        WHERE tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
    "#;

    pub(super) const FOREIGN_KEYS_QUERY: &str = r#"
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

    const INDEXES_QUERY: &str = r#"
        SELECT schemaname::text, tablename::text, indexname::text
        FROM pg_catalog.pg_indexes
        WHERE schemaname NOT IN ('pg_catalog', 'information_schema')
        ORDER BY 1, 2, 3
    "#;

    /// Relationships with `schema.table` endpoints
    pub(crate) async fn foreign_keys(client: &Client) -> Result<Vec<Relationship>, ConnectorError> {
        let rows = client.query(FOREIGN_KEYS_QUERY, &[]).await.map_err(query_error)?;
        Ok(rows
            .iter()
            .map(|row| {
                let from_schema: String = row.get(0);
                let from_table: String = row.get(1);
                let to_schema: String = row.get(3);
                let to_table: String = row.get(4);
                Relationship::new(
                    format!("{}.{}", from_schema, from_table),
                    row.get::<_, String>(2),
                    format!("{}.{}", to_schema, to_table),
                    row.get::<_, String>(5),
                )
            })
            .collect())
    }

    pub(super) async fn reflect(client: &Client) -> Result<Reflection, ConnectorError> {
        let column_rows = client.query(COLUMNS_QUERY, &[]).await.map_err(query_error)?;
        let columns = column_rows
            .iter()
            .map(|row| ColumnRow {
                schema: row.get(0),
                table: row.get(1),
                table_type: row.get(2),
                name: row.get(3),
                data_type: row.get(4),
                udt_name: row.get(5),
                is_nullable: row.get(6),
                default: row.get(7),
                max_length: row.get(8),
                precision: row.get(9),
                scale: row.get(10),
                description: row.get(11),
            })
            .collect();

        let keys: Vec<KeyRow> = client
            .query(KEYS_QUERY, &[])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| KeyRow {
                schema: row.get(0),
                table: row.get(1),
                column: row.get(2),
                constraint_type: row.get(3),
            })
            .collect();

        let indexes: Vec<IndexRow> = client
            .query(INDEXES_QUERY, &[])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| IndexRow {
                schema: row.get(0),
                table: row.get(1),
                index: row.get(2),
            })
            .collect();

        let relationships = foreign_keys(client).await?;

        Ok(assemble_reflection(columns, &keys, relationships, &indexes))
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
                        "SELECT c.reltuples::bigint FROM pg_catalog.pg_class c \
                         JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
                         WHERE n.nspname = $1 AND c.relname = $2",
                        &[&schema, &table],
                    )
                    .await
                    .map_err(query_error)?;
                // reltuples is -1 for never-analyzed tables
                Ok(row
                    .and_then(|r| r.try_get::<_, i64>(0).ok())
                    .and_then(|n| u64::try_from(n).ok()))
            }
        }
    }

    async fn relation_size(client: &Client, schema: &str, table: &str) -> Result<Option<u64>, ConnectorError> {
        let relation = format!("{}.{}", quote_ident(schema, '"'), quote_ident(table, '"'));
        let row = client
            .query_one("SELECT pg_total_relation_size($1::text::regclass)", &[&relation])
            .await
            .map_err(query_error)?;
        let size: i64 = row.try_get(0).map_err(query_error)?;
        Ok(u64::try_from(size).ok())
    }

    impl PostgresConnector {
        fn client(&self) -> Result<&Client, ConnectorError> {
            self.client.as_ref().ok_or(ConnectorError::NotConnected)
        }

        fn resolve(&self, name: &str) -> Result<(String, &TableSchema), ConnectorError> {
            let reflection = self.reflection.as_ref().ok_or(ConnectorError::NotConnected)?;
            reflection
                .snapshot
                .resolve(name)
                .ok_or_else(|| ConnectorError::TableNotFound(name.to_string()))
        }

        pub(super) async fn open_session(&mut self) -> Result<(), ConnectorError> {
            let wire = WireParams::from_params(&self.params, 5432, false)?;
            let client = pgwire::open(&wire, "PostgreSQL").await?;

            client.simple_query("SELECT 1").await.map_err(query_error)?;
            let reflection = reflect(&client).await?;

            tracing::info!(
                host = %wire.host,
                database = %wire.database,
                tables = reflection.snapshot.table_count(),
                "connected to PostgreSQL"
            );

            self.client = Some(client);
            self.reflection = Some(reflection);
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

        pub(super) async fn describe(&self, name: &str) -> Result<TableDescriptor, ConnectorError> {
            let client = self.client()?;
            let (qualified, schema) = self.resolve(name)?;
            let mut descriptor = TableDescriptor::from_schema(qualified.clone(), schema);

            let (namespace, table) = qualified
                .split_once('.')
                .ok_or_else(|| ConnectorError::TableNotFound(qualified.clone()))?;

            descriptor.row_count = first_success(ROW_COUNT_STRATEGIES, |strategy| {
                count_rows(client, namespace, table, strategy)
            })
            .await;
            descriptor.size_bytes = best_effort("relation_size", relation_size(client, namespace, table)).await;

            if let Some(reflection) = &self.reflection {
                descriptor.foreign_keys = reflection
                    .relationships
                    .iter()
                    .filter(|r| r.from_table == qualified)
                    .cloned()
                    .collect();
            }

            Ok(descriptor)
        }

        pub(super) async fn plan(&self, sql: &str) -> Result<String, ConnectorError> {
            let lines = pgwire::explain_lines(self.client()?, strip_terminator(sql)).await?;
            Ok(lines.join("\n"))
        }

        pub(super) async fn cost(&self, sql: &str) -> Result<CostEstimate, ConnectorError> {
            let client = self.client()?;
            let row = client
                .query_one(&format!("EXPLAIN (FORMAT JSON) {}", strip_terminator(sql)), &[])
                .await
                .map_err(query_error)?;
            let plan: Value = row.try_get(0).map_err(query_error)?;
            cost_from_plan_json(&plan)
        }
    }
}

#[cfg(not(feature = "postgres"))]
impl PostgresConnector {
    async fn open_session(&mut self) -> Result<(), ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Postgres))
    }

    fn close_session(&mut self) {}

    fn has_session(&self) -> bool {
        false
    }

    fn session_error(&self) -> ConnectorError {
        ConnectorError::feature_disabled(BackendKind::Postgres)
    }

    async fn run(&self, _sql: &str) -> Result<ResultTable, ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Postgres))
    }

    async fn describe(&self, _name: &str) -> Result<TableDescriptor, ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Postgres))
    }

    async fn plan(&self, _sql: &str) -> Result<String, ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Postgres))
    }

    async fn cost(&self, _sql: &str) -> Result<CostEstimate, ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Postgres))
    }
}

#[async_trait::async_trait]
impl Connector for PostgresConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
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
                self.reflection = None;
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.has_session() {
            tracing::debug!(backend = self.name(), "disconnecting");
        }
        self.close_session();
        self.reflection = None;
    }

    async fn execute_query(
        &mut self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<ResultTable, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        let sql = apply_limit(sql, limit, LimitStyle::WrapSubquery);
        tracing::debug!(backend = self.name(), sql = %sql, "executing query");
        self.run(&sql).await
    }

    async fn get_schema(&mut self) -> Result<SchemaSnapshot, ConnectorError> {
        Ok(self
            .reflection
            .as_ref()
            .map(|r| r.snapshot.clone())
            .unwrap_or_default())
    }

    async fn get_tables(&mut self) -> Result<Vec<String>, ConnectorError> {
        Ok(self
            .reflection
            .as_ref()
            .map(|r| r.snapshot.tables().into_iter().map(|(name, _)| name).collect())
            .unwrap_or_default())
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
        self.cost(sql).await
    }

    async fn get_relationships(&mut self) -> Result<Vec<Relationship>, ConnectorError> {
        Ok(self
            .reflection
            .as_ref()
            .map(|r| r.relationships.clone())
            .unwrap_or_default())
    }
}
