//! Snowflake elastic-cloud connector
//!
//! The catalog is walked with `SHOW` and `DESCRIBE` commands rather than
//! `INFORMATION_SCHEMA`, so only objects visible to the session's role are
//! reported. Requires USAGE on the warehouse, databases and schemas.
//!
//! ## Authentication Methods
//!
//! 1. Password authentication (username/password)
//! 2. Key-pair authentication (private key PEM)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut connector = SnowflakeConnector::builder()
//!     .with_password("xy12345.us-east-1", "username", "password")
//!     .with_warehouse("COMPUTE_WH")
//!     .with_role("ANALYST")
//!     .build();
//! assert!(connector.connect().await);
//! ```
//!
//! Reference: https://docs.snowflake.com/en/sql-reference/sql/show-tables

use crate::connector::{Connector, ConnectorError};
use crate::dialect::{apply_limit, LimitStyle};
use crate::guard::QueryGuard;
use copilot_core::{
    BackendKind, ColumnDescriptor, ConnectionParams, CostEstimate, LogicalType, Relationship,
    ResultTable, SchemaSnapshot, TableDescriptor, ValidationResult,
};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[cfg(feature = "snowflake")]
use snowflake_api::SnowflakeApi;

/// Snowflake authentication credentials
#[derive(Clone)]
pub enum SnowflakeCredentials {
    /// Password-based authentication
    Password(String),
    /// Key-pair authentication (PEM format private key)
    PrivateKey(String),
}

impl std::fmt::Debug for SnowflakeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(..)"),
            Self::PrivateKey(_) => f.write_str("PrivateKey(..)"),
        }
    }
}

/// Builder for SnowflakeConnector
#[derive(Debug, Clone)]
pub struct SnowflakeConnectorBuilder {
    account: String,
    username: String,
    credentials: SnowflakeCredentials,
    warehouse: Option<String>,
    role: Option<String>,
    database: Option<String>,
    schema: Option<String>,
}

impl SnowflakeConnectorBuilder {
    /// Create new builder with password authentication
    pub fn with_password(
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            username: username.into(),
            credentials: SnowflakeCredentials::Password(password.into()),
            warehouse: None,
            role: None,
            database: None,
            schema: None,
        }
    }

    /// Create new builder with key-pair authentication
    pub fn with_key_pair(
        account: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            username: username.into(),
            credentials: SnowflakeCredentials::PrivateKey(private_key_pem.into()),
            warehouse: None,
            role: None,
            database: None,
            schema: None,
        }
    }

    /// Builder from named parameters
    ///
    /// A non-empty `private_key` selects key-pair auth, otherwise `password`
    /// is used.
    pub fn from_params(params: &ConnectionParams) -> Self {
        let get = |key: &str| {
            params
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let account = get("account").unwrap_or_default();
        let user = get("user").unwrap_or_default();
        let mut builder = match get("private_key") {
            Some(pem) => Self::with_key_pair(account, user, pem),
            None => Self::with_password(account, user, get("password").unwrap_or_default()),
        };

        builder.warehouse = get("warehouse");
        builder.role = get("role");
        builder.database = get("database");
        builder.schema = get("schema");
        builder
    }

    /// Set the warehouse to use
    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Set the role to use
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the default database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the default schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Build the connector; authentication happens at `connect`
    pub fn build(self) -> SnowflakeConnector {
        SnowflakeConnector {
            config: self,
            guard: QueryGuard::standard(),
            #[cfg(feature = "snowflake")]
            api: None,
        }
    }

    #[cfg(feature = "snowflake")]
    fn open_api(&self) -> Result<SnowflakeApi, ConnectorError> {
        match &self.credentials {
            SnowflakeCredentials::Password(password) => SnowflakeApi::with_password_auth(
                &self.account,
                self.warehouse.as_deref(),
                self.database.as_deref(),
                self.schema.as_deref(),
                &self.username,
                self.role.as_deref(),
                password,
            )
            .map_err(|e| ConnectorError::AuthenticationError(format!(
                "Failed to authenticate with Snowflake: {}",
                e
            ))),
            SnowflakeCredentials::PrivateKey(private_key_pem) => SnowflakeApi::with_certificate_auth(
                &self.account,
                self.warehouse.as_deref(),
                self.database.as_deref(),
                self.schema.as_deref(),
                &self.username,
                self.role.as_deref(),
                private_key_pem,
            )
            .map_err(|e| ConnectorError::AuthenticationError(format!(
                "Failed to authenticate with key-pair: {}",
                e
            ))),
        }
    }
}

/// Empty struct for builder pattern initialization
pub struct SnowflakeConnectorBuilderInit;

impl SnowflakeConnectorBuilderInit {
    pub fn with_password(
        self,
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SnowflakeConnectorBuilder {
        SnowflakeConnectorBuilder::with_password(account, username, password)
    }

    pub fn with_key_pair(
        self,
        account: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> SnowflakeConnectorBuilder {
        SnowflakeConnectorBuilder::with_key_pair(account, username, private_key_pem)
    }
}

fn stat_pattern(name: &'static str) -> Option<&'static Regex> {
    static TOTAL: OnceLock<Regex> = OnceLock::new();
    static ASSIGNED: OnceLock<Regex> = OnceLock::new();
    static BYTES: OnceLock<Regex> = OnceLock::new();

    let (cell, pattern) = match name {
        "partitionsTotal" => (&TOTAL, r"partitionsTotal=(\d+)"),
        "partitionsAssigned" => (&ASSIGNED, r"partitionsAssigned=(\d+)"),
        "bytesAssigned" => (&BYTES, r"bytesAssigned=(\d+)"),
        _ => return None,
    };
    Some(cell.get_or_init(|| Regex::new(pattern).expect("static plan statistic pattern compiles")))
}

/// First value of a `name=<digits>` statistic in a text plan
fn plan_stat(plan: &str, name: &'static str) -> Option<u64> {
    stat_pattern(name)?
        .captures(plan)
        .and_then(|c| c[1].parse().ok())
}

/// Heuristic cost diagnostics from `EXPLAIN USING TEXT` output
///
/// Snowflake exposes no cost figure before execution. The global partition
/// statistics are reported when present; pruning is flagged when fewer
/// partitions are assigned than exist.
pub fn snowflake_cost_from_plan(plan: &str) -> CostEstimate {
    let total = plan_stat(plan, "partitionsTotal");
    let assigned = plan_stat(plan, "partitionsAssigned");
    let bytes = plan_stat(plan, "bytesAssigned");
    let lower = plan.to_lowercase();

    let partition_pruning = match (total, assigned) {
        (Some(total), Some(assigned)) => assigned < total,
        _ => lower.contains("partitions"),
    };

    let mut estimate = CostEstimate::new(BackendKind::Snowflake)
        .with("plan_available", true)
        .with("partition_pruning", partition_pruning)
        .with("clustering_used", lower.contains("clustering") || lower.contains("cluster by"))
        .with("optimization_hints", "Check query plan for detailed performance insights")
        .with("cost_units", "Snowflake credits (warehouse-size dependent)");

    if let Some(total) = total {
        estimate = estimate.with("partitions_total", total);
    }
    if let Some(assigned) = assigned {
        estimate = estimate.with("partitions_assigned", assigned);
    }
    if let Some(bytes) = bytes {
        estimate = estimate.with("bytes_assigned", bytes);
    }
    estimate
}

/// Render an identifier from user input
///
/// Plain identifiers stay unquoted so Snowflake's case folding applies;
/// anything else is double-quoted.
pub fn sf_ident(part: &str) -> String {
    let plain = !part.is_empty()
        && part
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if plain {
        part.to_string()
    } else {
        crate::dialect::quote_ident(part, '"')
    }
}

/// The session's current database and schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl SessionContext {
    /// Statement reporting the current context
    pub const QUERY: &'static str = "SELECT CURRENT_DATABASE(), CURRENT_SCHEMA()";

    /// Context from the single row returned by [`SessionContext::QUERY`]
    pub fn from_result(result: &ResultTable) -> Self {
        let cell = |i: usize| match result.rows.first().and_then(|row| row.get(i)) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        Self {
            database: cell(0),
            schema: cell(1),
        }
    }

    /// Statement that re-enters this context, if there is one
    ///
    /// `USE DATABASE` resets the schema to PUBLIC, so a known schema is
    /// restored with `USE SCHEMA db.schema` instead.
    pub fn restore_statement(&self, render: impl Fn(&str) -> String) -> Option<String> {
        match (&self.database, &self.schema) {
            (Some(database), Some(schema)) => {
                Some(format!("USE SCHEMA {}.{}", render(database), render(schema)))
            }
            (Some(database), None) => Some(format!("USE DATABASE {}", render(database))),
            (None, _) => None,
        }
    }
}

/// Keep only the `SHOW TABLES LIKE` rows whose name is exactly `table`
///
/// `_` and `%` are LIKE wildcards, so the listing may hold near misses.
/// Names compare case-insensitively.
pub fn exact_name_rows(listing: ResultTable, table: &str) -> ResultTable {
    let Some(idx) = listing.column_index("name") else {
        return ResultTable::new(listing.columns);
    };
    let rows = listing
        .rows
        .into_iter()
        .filter(|row| matches!(row.get(idx), Some(Value::String(name)) if name.eq_ignore_ascii_case(table)))
        .collect();
    ResultTable::from_rows(listing.columns, rows)
}

/// Materialize a JSON row set (`[[cell, ...], ...]`) under `columns`
pub fn table_from_json_rows(columns: Vec<String>, rows: &Value) -> ResultTable {
    let mut table = ResultTable::new(columns);
    for row in rows.as_array().into_iter().flatten() {
        let values = row.as_array().cloned().unwrap_or_default();
        table.push_row(values);
    }
    table
}

fn flag(value: Option<String>) -> bool {
    matches!(value.as_deref(), Some("Y") | Some("y") | Some("YES") | Some("true"))
}

/// Column from one row of `DESCRIBE TABLE` output
pub fn column_from_describe(describe: &ResultTable, row: usize) -> ColumnDescriptor {
    let data_type = describe.text(row, "type").unwrap_or_else(|| "UNKNOWN".to_string());
    let logical_type = SnowflakeConnector::map_snowflake_type(&data_type);

    ColumnDescriptor::new(
        describe.text(row, "name").unwrap_or_default(),
        data_type,
        logical_type,
    )
    .with_nullable(describe.text(row, "null?").map(|v| v == "Y").unwrap_or(true))
    .with_default(describe.text(row, "default"))
    .with_primary_key(flag(describe.text(row, "primary key")))
    .with_unique_key(flag(describe.text(row, "unique key")))
    .with_description(describe.text(row, "comment"))
}

/// Snowflake connector
pub struct SnowflakeConnector {
    config: SnowflakeConnectorBuilder,
    guard: QueryGuard,

    #[cfg(feature = "snowflake")]
    api: Option<SnowflakeApi>,
}

impl SnowflakeConnector {
    /// Connector from named parameters; no connection is attempted
    pub fn new(params: ConnectionParams) -> Self {
        SnowflakeConnectorBuilder::from_params(&params).build()
    }

    /// Builder pattern entry point
    pub fn builder() -> SnowflakeConnectorBuilderInit {
        SnowflakeConnectorBuilderInit
    }

    pub fn account(&self) -> &str {
        &self.config.account
    }

    /// Convert Snowflake type to LogicalType
    pub fn map_snowflake_type(sf_type: &str) -> LogicalType {
        // Snowflake types can include precision/scale like "NUMBER(38,0)"
        let base_type = sf_type.split('(').next()
            .unwrap_or(sf_type)
            .trim()
            .to_uppercase();

        match base_type.as_str() {
            "BOOLEAN" => LogicalType::Bool,

            "NUMBER" | "DECIMAL" | "NUMERIC" => {
                // Check if it's effectively an integer (scale = 0)
                if Self::is_integer_number(sf_type) {
                    LogicalType::Int
                } else {
                    Self::parse_decimal_type(sf_type)
                }
            }

            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "BYTEINT" => {
                LogicalType::Int
            }

            "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" => {
                LogicalType::Float
            }

            "VARCHAR" | "STRING" | "TEXT" | "CHAR" | "CHARACTER" | "NVARCHAR" | "NCHAR" => {
                LogicalType::String
            }

            "BINARY" | "VARBINARY" => LogicalType::String,

            "DATE" => LogicalType::Date,

            "DATETIME" | "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => {
                LogicalType::Timestamp
            }

            "TIME" => LogicalType::Timestamp,

            "VARIANT" | "OBJECT" => LogicalType::Json,

            "ARRAY" => LogicalType::Array {
                element_type: Box::new(LogicalType::Unknown),
            },

            "GEOGRAPHY" | "GEOMETRY" => LogicalType::String,

            _ => LogicalType::Unknown,
        }
    }

    /// Check if NUMBER type is effectively an integer
    fn is_integer_number(type_str: &str) -> bool {
        if !type_str.contains('(') {
            return false; // Bare NUMBER is treated as decimal
        }

        if let Some(params) = type_str.split('(').nth(1) {
            if let Some(params) = params.strip_suffix(')') {
                let parts: Vec<&str> = params.split(',').collect();
                if parts.len() == 2 {
                    if let Ok(scale) = parts[1].trim().parse::<i32>() {
                        return scale == 0;
                    }
                } else if parts.len() == 1 {
                    // NUMBER(precision) with no scale defaults to 0
                    return true;
                }
            }
        }

        false
    }

    /// Parse decimal type with precision and scale
    fn parse_decimal_type(type_str: &str) -> LogicalType {
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

        // Default Snowflake NUMBER precision
        LogicalType::Decimal {
            precision: Some(38),
            scale: Some(0),
        }
    }
}

#[cfg(feature = "snowflake")]
mod native {
    use super::*;
    use crate::dialect::{quote_ident, quote_literal, split_qualified, strip_terminator};
    use crate::strategy::{first_success, RowCountStrategy, ROW_COUNT_STRATEGIES};
    use arrow_array::RecordBatch;
    use copilot_core::{PhysicalLayout, TableSchema};
    use serde_json::Map;
    use snowflake_api::QueryResult;

    const RELATIONSHIPS_QUERY: &str = r#"
        SELECT
            fk.table_schema,
            fk.table_name,
            fk.column_name,
            pk.table_schema,
            pk.table_name,
            pk.column_name
        FROM information_schema.referential_constraints rc
        JOIN information_schema.key_column_usage fk
          ON rc.constraint_name = fk.constraint_name
         AND rc.constraint_schema = fk.table_schema
        JOIN information_schema.key_column_usage pk
          ON rc.unique_constraint_name = pk.constraint_name
         AND rc.unique_constraint_schema = pk.table_schema
         AND fk.position_in_unique_constraint = pk.ordinal_position
        ORDER BY 1, 2, 3
    "#;

    fn arrow_to_table(batches: &[RecordBatch]) -> Result<ResultTable, ConnectorError> {
        let columns: Vec<String> = batches
            .first()
            .map(|b| b.schema().fields().iter().map(|f| f.name().clone()).collect())
            .unwrap_or_default();

        let mut writer = arrow_json::ArrayWriter::new(Vec::new());
        let refs: Vec<&RecordBatch> = batches.iter().collect();
        writer
            .write_batches(&refs)
            .map_err(|e| ConnectorError::InvalidResponse(format!("Failed to decode Arrow batch: {}", e)))?;
        writer
            .finish()
            .map_err(|e| ConnectorError::InvalidResponse(format!("Failed to decode Arrow batch: {}", e)))?;
        let bytes = writer.into_inner();

        let records: Vec<Map<String, Value>> = if bytes.iter().all(u8::is_ascii_whitespace) {
            Vec::new()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?
        };

        let mut table = ResultTable::new(columns);
        for record in records {
            // Null cells are omitted by the JSON writer
            let row = table
                .columns
                .iter()
                .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            table.push_row(row);
        }
        Ok(table)
    }

    impl SnowflakeConnector {
        fn api(&self) -> Result<&SnowflakeApi, ConnectorError> {
            self.api.as_ref().ok_or(ConnectorError::NotConnected)
        }

        /// Run one statement and materialize its rows
        async fn exec(&self, sql: &str) -> Result<ResultTable, ConnectorError> {
            tracing::debug!(backend = "Snowflake", sql = %sql, "exec");
            let result = self
                .api()?
                .exec(sql)
                .await
                .map_err(|e| ConnectorError::QueryError(e.to_string()))?;

            match result {
                QueryResult::Arrow(batches) => arrow_to_table(&batches),
                QueryResult::Json(json) => Ok(table_from_json_rows(
                    json.schema.iter().map(|f| f.name.clone()).collect(),
                    &json.value,
                )),
                QueryResult::Empty => Ok(ResultTable::default()),
            }
        }

        pub(super) async fn open_session(&mut self) -> Result<(), ConnectorError> {
            let api = self.config.open_api()?;
            self.api = Some(api);

            let version = self.exec("SELECT CURRENT_VERSION()").await?;
            tracing::info!(
                account = %self.config.account,
                version = ?version.rows.first().and_then(|r| r.first()),
                "connected to Snowflake"
            );
            Ok(())
        }

        pub(super) fn close_session(&mut self) {
            self.api = None;
        }

        pub(super) fn has_session(&self) -> bool {
            self.api.is_some()
        }

        pub(super) fn session_error(&self) -> ConnectorError {
            ConnectorError::NotConnected
        }

        pub(super) async fn run(&self, sql: &str) -> Result<ResultTable, ConnectorError> {
            self.exec(sql).await
        }

        async fn describe_columns(&self, qualified: &str) -> Result<Vec<ColumnDescriptor>, ConnectorError> {
            let describe = self
                .exec(&format!("DESCRIBE TABLE {}", qualified))
                .await
                .map_err(|e| ConnectorError::from_lookup(qualified, e))?;
            Ok((0..describe.row_count())
                .map(|row| column_from_describe(&describe, row))
                .collect())
        }

        /// Statement that returns the session to where it was before a walk
        async fn capture_context(&self) -> Option<String> {
            match self.exec(SessionContext::QUERY).await {
                Ok(current) => SessionContext::from_result(&current).restore_statement(|p| quote_ident(p, '"')),
                Err(e) => {
                    tracing::warn!(error = %e, "could not read session context, falling back to configuration");
                    SessionContext {
                        database: self.config.database.clone(),
                        schema: self.config.schema.clone(),
                    }
                    .restore_statement(sf_ident)
                }
            }
        }

        pub(super) async fn snapshot(&self) -> Result<SchemaSnapshot, ConnectorError> {
            let mut snapshot = SchemaSnapshot::new();

            let databases = self.exec("SHOW DATABASES").await?;
            let restore = self.capture_context().await;
            for db_row in 0..databases.row_count() {
                let Some(database) = databases.text(db_row, "name") else {
                    continue;
                };
                snapshot.ensure_namespace(&[database.as_str()]);

                let schemas = match self.exec(&format!("USE DATABASE {}", quote_ident(&database, '"'))).await {
                    Ok(_) => self.exec("SHOW SCHEMAS").await,
                    Err(e) => Err(e),
                };
                let schemas = match schemas {
                    Ok(schemas) => schemas,
                    Err(e) => {
                        tracing::warn!(database = %database, error = %e, "skipping database");
                        continue;
                    }
                };

                for schema_row in 0..schemas.row_count() {
                    let Some(schema) = schemas.text(schema_row, "name") else {
                        continue;
                    };
                    if schema.eq_ignore_ascii_case("INFORMATION_SCHEMA") {
                        continue;
                    }
                    snapshot.ensure_namespace(&[database.as_str(), schema.as_str()]);

                    let scope = format!("{}.{}", quote_ident(&database, '"'), quote_ident(&schema, '"'));
                    let tables = match self.exec(&format!("SHOW TABLES IN SCHEMA {}", scope)).await {
                        Ok(tables) => tables,
                        Err(e) => {
                            tracing::warn!(database = %database, schema = %schema, error = %e, "skipping schema");
                            continue;
                        }
                    };

                    for table_row in 0..tables.row_count() {
                        let Some(table) = tables.text(table_row, "name") else {
                            continue;
                        };
                        let qualified = format!("{}.{}", scope, quote_ident(&table, '"'));
                        match self.describe_columns(&qualified).await {
                            Ok(columns) => snapshot.insert_table(
                                &[database.as_str(), schema.as_str()],
                                table,
                                TableSchema::from_columns(columns)
                                    .with_table_type(tables.text(table_row, "kind")),
                            ),
                            Err(e) => {
                                tracing::warn!(table = %qualified, error = %e, "skipping table");
                            }
                        }
                    }
                }
            }

            if let Some(statement) = restore {
                if let Err(e) = self.exec(&statement).await {
                    tracing::warn!(statement = %statement, error = %e, "could not restore session context");
                }
            }

            Ok(snapshot)
        }

        pub(super) async fn table_names(&self) -> Result<Vec<String>, ConnectorError> {
            let tables = self.exec("SHOW TABLES").await?;
            Ok((0..tables.row_count())
                .filter_map(|row| {
                    Some(format!(
                        "{}.{}.{}",
                        tables.text(row, "database_name")?,
                        tables.text(row, "schema_name")?,
                        tables.text(row, "name")?
                    ))
                })
                .collect())
        }

        /// `SHOW TABLES` row for a qualified or bare name
        async fn locate(&self, name: &str) -> Result<ResultTable, ConnectorError> {
            let parts = split_qualified(name, 3);
            let sql = match parts.as_slice() {
                [database, schema, table] => format!(
                    "SHOW TABLES LIKE {} IN SCHEMA {}.{}",
                    quote_literal(table),
                    sf_ident(database),
                    sf_ident(schema)
                ),
                [schema, table] => match &self.config.database {
                    Some(database) => format!(
                        "SHOW TABLES LIKE {} IN SCHEMA {}.{}",
                        quote_literal(table),
                        sf_ident(database),
                        sf_ident(schema)
                    ),
                    None => format!("SHOW TABLES LIKE {} IN SCHEMA {}", quote_literal(table), sf_ident(schema)),
                },
                [table] => format!("SHOW TABLES LIKE {}", quote_literal(table)),
                _ => return Err(ConnectorError::TableNotFound(name.to_string())),
            };

            let listing = self
                .exec(&sql)
                .await
                .map_err(|e| ConnectorError::from_lookup(name, e))?;
            let table = parts.last().map(String::as_str).unwrap_or(name);
            let mut found = exact_name_rows(listing, table);
            if found.is_empty() {
                return Err(ConnectorError::TableNotFound(name.to_string()));
            }
            found.truncate(1);
            Ok(found)
        }

        async fn count_rows(
            &self,
            qualified: &str,
            listing: &ResultTable,
            strategy: RowCountStrategy,
        ) -> Result<Option<u64>, ConnectorError> {
            match strategy {
                RowCountStrategy::ExactCount => {
                    let count = self.exec(&format!("SELECT COUNT(*) FROM {}", qualified)).await?;
                    Ok(count.text(0, &count.columns.first().cloned().unwrap_or_default())
                        .and_then(|n| n.parse().ok()))
                }
                RowCountStrategy::CatalogStatistics => {
                    Ok(listing.text(0, "rows").and_then(|n| n.parse().ok()))
                }
            }
        }

        pub(super) async fn describe(&self, name: &str) -> Result<TableDescriptor, ConnectorError> {
            let listing = self.locate(name).await?;
            let missing = || ConnectorError::InvalidResponse("SHOW TABLES row without name".to_string());

            let database = listing.text(0, "database_name").ok_or_else(missing)?;
            let schema = listing.text(0, "schema_name").ok_or_else(missing)?;
            let table = listing.text(0, "name").ok_or_else(missing)?;
            let quoted = format!(
                "{}.{}.{}",
                quote_ident(&database, '"'),
                quote_ident(&schema, '"'),
                quote_ident(&table, '"')
            );

            let columns = self.describe_columns(&quoted).await?;
            let row_count = first_success(ROW_COUNT_STRATEGIES, |strategy| {
                self.count_rows(&quoted, &listing, strategy)
            })
            .await;

            let clustering_fields = listing
                .text(0, "cluster_by")
                .map(|expr| {
                    expr.trim()
                        .trim_start_matches("LINEAR")
                        .trim_matches(|c| c == '(' || c == ')')
                        .split(',')
                        .map(|f| f.trim().to_string())
                        .filter(|f| !f.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            Ok(TableDescriptor {
                name: format!("{}.{}.{}", database, schema, table),
                columns,
                row_count,
                size_bytes: listing.text(0, "bytes").and_then(|b| b.parse().ok()),
                table_type: listing.text(0, "kind"),
                created: listing.text(0, "created_on"),
                layout: PhysicalLayout {
                    clustering_fields,
                    ..PhysicalLayout::default()
                },
                ..TableDescriptor::default()
            })
        }

        pub(super) async fn plan(&self, sql: &str) -> Result<String, ConnectorError> {
            let plan = self
                .exec(&format!("EXPLAIN USING TEXT {}", strip_terminator(sql)))
                .await?;
            Ok((0..plan.row_count())
                .filter_map(|row| {
                    plan.rows[row].first().map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }

        pub(super) async fn relationships(&self) -> Result<Vec<Relationship>, ConnectorError> {
            let rows = self.exec(RELATIONSHIPS_QUERY).await?;
            let cell = |row: &Vec<Value>, i: usize| match row.get(i) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };

            Ok(rows
                .rows
                .iter()
                .map(|row| {
                    Relationship::new(
                        format!("{}.{}", cell(row, 0), cell(row, 1)),
                        cell(row, 2),
                        format!("{}.{}", cell(row, 3), cell(row, 4)),
                        cell(row, 5),
                    )
                })
                .collect())
        }
    }
}

#[cfg(not(feature = "snowflake"))]
impl SnowflakeConnector {
    async fn open_session(&mut self) -> Result<(), ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::Snowflake))
    }

    fn close_session(&mut self) {}

    fn has_session(&self) -> bool {
        false
    }

    fn session_error(&self) -> ConnectorError {
        ConnectorError::feature_disabled(BackendKind::Snowflake)
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
impl Connector for SnowflakeConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::Snowflake
    }

    fn name(&self) -> &'static str {
        "Snowflake"
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
        Ok(snowflake_cost_from_plan(&plan))
    }

    async fn get_relationships(&mut self) -> Result<Vec<Relationship>, ConnectorError> {
        if !self.has_session() {
            return Ok(Vec::new());
        }
        self.relationships().await
    }
}
