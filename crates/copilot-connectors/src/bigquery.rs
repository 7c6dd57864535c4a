//! Google BigQuery columnar-cloud connector
//!
//! Catalog reads walk datasets and tables through the REST API, so they
//! need `bigquery.datasets.get`, `bigquery.tables.list` and
//! `bigquery.tables.get`. Queries run as jobs with the query cache on and
//! a 100 MB billing cap. Validation, plans and cost estimates use dry runs,
//! which are free and never execute anything.
//!
//! ## Authentication
//!
//! 1. Service account JSON file (`credentials_path`)
//! 2. Application Default Credentials (ADC) when no file is given
//!
//! Table resources and query responses are read in their REST JSON shape,
//! which keeps the conversion code independent of the SDK's model types.
//!
//! Reference: https://cloud.google.com/bigquery/docs/reference/rest/v2/tables

use crate::connector::{Connector, ConnectorError};
use crate::dialect::{apply_limit, LimitStyle};
use crate::guard::QueryGuard;
use copilot_core::{
    BackendKind, ColumnDescriptor, ConnectionParams, CostEstimate, LogicalType, Partitioning,
    PhysicalLayout, ResultTable, SchemaSnapshot, TableDescriptor, TableSchema, ValidationResult,
};
use serde_json::{Map, Value};

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::Client as BigQueryClient;

/// Billing cap sent with every executed query
pub const MAXIMUM_BYTES_BILLED: u64 = 100 * 1024 * 1024;

const MB: u64 = 1024 * 1024;
const MINIMUM_BILLED_BYTES: u64 = 10 * MB;
const USD_PER_TB: f64 = 5.0;

/// Bytes billed for `processed` bytes under on-demand pricing
///
/// Billing rounds up to the next MB with a 10 MB minimum per query; a query
/// that reads nothing is not billed.
pub fn billed_bytes(processed: u64) -> u64 {
    if processed == 0 {
        return 0;
    }
    processed.max(MINIMUM_BILLED_BYTES).div_ceil(MB) * MB
}

/// Cost estimate from a dry run's processed byte count
pub fn bigquery_cost_from_bytes(processed: u64) -> CostEstimate {
    let billed = billed_bytes(processed);
    let terabytes = billed as f64 / 1024f64.powi(4);

    CostEstimate::new(BackendKind::BigQuery)
        .with("bytes_processed", processed)
        .with("bytes_billed", billed)
        .with("estimated_cost_usd", terabytes * USD_PER_TB)
        .with("cost_model", "$5 per TB processed")
}

/// Human-readable dry-run summary used as the query plan
pub fn dry_run_summary(processed: u64, output: &[ColumnDescriptor], referenced: &[String]) -> String {
    let mut lines = vec![
        "Dry run: query is valid".to_string(),
        format!(
            "Bytes processed: {} ({:.2} MB)",
            processed,
            processed as f64 / MB as f64
        ),
    ];

    if !referenced.is_empty() {
        lines.push(format!("Referenced tables: {}", referenced.join(", ")));
    }

    if !output.is_empty() {
        lines.push("Output schema:".to_string());
        lines.extend(output.iter().map(|c| format!("  {}: {}", c.name, c.data_type)));
    }

    lines.join("\n")
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Numbers in REST resources arrive as JSON strings
fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Whether a `jobs.query` / `jobs.getQueryResults` response is final
///
/// Responses without the flag (dry runs) count as complete.
pub fn job_complete(response: &Value) -> bool {
    response.get("jobComplete").and_then(Value::as_bool).unwrap_or(true)
}

/// Token for the next result page; absent or empty ends paging
pub fn page_token(response: &Value) -> Option<String> {
    str_field(response, "pageToken")
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Job id and location of the job behind a query response
pub fn job_reference(response: &Value) -> Option<(String, Option<String>)> {
    let reference = response.get("jobReference")?;
    let job_id = str_field(reference, "jobId")?.to_string();
    Some((job_id, str_field(reference, "location").map(str::to_string)))
}

/// BigQuery connector
pub struct BigQueryConnector {
    project_id: String,
    credentials_path: Option<String>,
    guard: QueryGuard,

    #[cfg(feature = "bigquery")]
    client: Option<BigQueryClient>,
}

impl BigQueryConnector {
    /// Create a connector; no connection is attempted
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            project_id: params.get("project_id").cloned().unwrap_or_default(),
            credentials_path: params
                .get("credentials_path")
                .filter(|p| !p.trim().is_empty())
                .cloned(),
            guard: QueryGuard::standard(),
            #[cfg(feature = "bigquery")]
            client: None,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Convert BigQuery type to LogicalType
    pub fn map_bigquery_type(bq_type: &str) -> LogicalType {
        // Handle parameterized types like NUMERIC(10,2) or ARRAY<STRING>
        let base_type = bq_type.split('(').next()
            .unwrap_or(bq_type)
            .split('<').next()
            .unwrap_or(bq_type)
            .trim()
            .to_uppercase();

        match base_type.as_str() {
            "BOOL" | "BOOLEAN" => LogicalType::Bool,

            "INT64" | "INTEGER" | "INT" | "SMALLINT" | "TINYINT" | "BYTEINT" => LogicalType::Int,

            "FLOAT64" | "FLOAT" => LogicalType::Float,

            "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => Self::parse_numeric_type(bq_type),

            "STRING" => LogicalType::String,
            "BYTES" => LogicalType::String,

            "DATE" => LogicalType::Date,
            "DATETIME" | "TIMESTAMP" => LogicalType::Timestamp,
            "TIME" => LogicalType::Timestamp,

            "GEOGRAPHY" | "INTERVAL" => LogicalType::String,
            "JSON" => LogicalType::Json,

            "ARRAY" => LogicalType::Array {
                element_type: Box::new(Self::extract_array_element_type(bq_type)),
            },

            "STRUCT" | "RECORD" => LogicalType::Struct { fields: vec![] },

            _ => LogicalType::Unknown,
        }
    }

    /// Parse NUMERIC(precision, scale) type
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

        // Default for NUMERIC without parameters
        LogicalType::Decimal {
            precision: Some(38),
            scale: Some(9),
        }
    }

    /// Extract element type from ARRAY<TYPE>
    fn extract_array_element_type(type_str: &str) -> LogicalType {
        if let Some(start) = type_str.find('<') {
            if let Some(end) = type_str.rfind('>') {
                let element_type_str = &type_str[start + 1..end];
                return Self::map_bigquery_type(element_type_str);
            }
        }
        LogicalType::Unknown
    }

    /// Column from a REST `TableFieldSchema`
    ///
    /// RECORD fields become struct columns carrying their nested fields;
    /// REPEATED fields become arrays of the field's type.
    pub fn column_from_field(field: &Value) -> ColumnDescriptor {
        let name = str_field(field, "name").unwrap_or_default();
        let field_type = str_field(field, "type").unwrap_or("UNKNOWN").to_uppercase();
        let mode = str_field(field, "mode").unwrap_or("NULLABLE").to_uppercase();
        let description = str_field(field, "description").map(str::to_string);

        let (element_type, element_logical) = if field_type == "RECORD" || field_type == "STRUCT" {
            let nested: Vec<ColumnDescriptor> = field
                .get("fields")
                .and_then(Value::as_array)
                .map(|fields| fields.iter().map(Self::column_from_field).collect())
                .unwrap_or_default();
            let rendered = nested
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            (format!("STRUCT<{}>", rendered), LogicalType::Struct { fields: nested })
        } else {
            let logical = Self::map_bigquery_type(&field_type);
            (field_type, logical)
        };

        let (data_type, logical_type) = if mode == "REPEATED" {
            (
                format!("ARRAY<{}>", element_type),
                LogicalType::Array {
                    element_type: Box::new(element_logical),
                },
            )
        } else {
            (element_type, element_logical)
        };

        ColumnDescriptor::new(name, data_type, logical_type)
            .with_nullable(mode != "REQUIRED")
            .with_description(description)
    }

    /// Columns of a REST table resource, in declared order
    pub fn schema_from_resource(resource: &Value) -> TableSchema {
        let columns = resource
            .pointer("/schema/fields")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().map(Self::column_from_field).collect())
            .unwrap_or_default();

        TableSchema::from_columns(columns)
            .with_table_type(str_field(resource, "type").map(str::to_string))
    }

    /// Full descriptor from a REST table resource
    pub fn describe_resource(qualified: impl Into<String>, resource: &Value) -> TableDescriptor {
        let schema = Self::schema_from_resource(resource);
        let mut descriptor = TableDescriptor::from_schema(qualified, &schema);

        descriptor.row_count = u64_field(resource, "numRows");
        descriptor.size_bytes = u64_field(resource, "numBytes");
        descriptor.created = str_field(resource, "creationTime").map(str::to_string);
        descriptor.modified = str_field(resource, "lastModifiedTime").map(str::to_string);

        descriptor.layout = PhysicalLayout {
            partitioning: resource.get("timePartitioning").map(|p| Partitioning {
                kind: str_field(p, "type").unwrap_or("DAY").to_string(),
                field: str_field(p, "field").map(str::to_string),
            }),
            clustering_fields: resource
                .pointer("/clustering/fields")
                .and_then(Value::as_array)
                .map(|fields| {
                    fields
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ..PhysicalLayout::default()
        };

        descriptor
    }

    /// Decode one REST cell (`{"v": ...}` payload) according to its field
    pub fn convert_cell(raw: &Value, field: &Value) -> Value {
        if raw.is_null() {
            return Value::Null;
        }

        let mode = str_field(field, "mode").unwrap_or("NULLABLE");
        if mode.eq_ignore_ascii_case("REPEATED") {
            let mut element_field = field.clone();
            if let Some(object) = element_field.as_object_mut() {
                object.insert("mode".into(), Value::String("NULLABLE".into()));
            }
            return match raw {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| {
                            Self::convert_cell(item.get("v").unwrap_or(&Value::Null), &element_field)
                        })
                        .collect(),
                ),
                other => other.clone(),
            };
        }

        let field_type = str_field(field, "type").unwrap_or("STRING").to_uppercase();
        match field_type.as_str() {
            "RECORD" | "STRUCT" => {
                let nested = field.get("fields").and_then(Value::as_array);
                let cells = raw.get("f").and_then(Value::as_array);
                match (nested, cells) {
                    (Some(nested), Some(cells)) => {
                        let mut object = Map::new();
                        for (sub_field, cell) in nested.iter().zip(cells) {
                            let name = str_field(sub_field, "name").unwrap_or_default().to_string();
                            let value = Self::convert_cell(cell.get("v").unwrap_or(&Value::Null), sub_field);
                            object.insert(name, value);
                        }
                        Value::Object(object)
                    }
                    _ => raw.clone(),
                }
            }
            "INTEGER" | "INT64" => match raw.as_str().and_then(|s| s.parse::<i64>().ok()) {
                Some(n) => Value::from(n),
                None => raw.clone(),
            },
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => match raw
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .and_then(serde_json::Number::from_f64)
            {
                Some(n) => Value::Number(n),
                None => raw.clone(),
            },
            "BOOLEAN" | "BOOL" => match raw.as_str() {
                Some(s) => Value::Bool(s.eq_ignore_ascii_case("true")),
                None => raw.clone(),
            },
            "JSON" => match raw.as_str() {
                Some(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
                None => raw.clone(),
            },
            _ => raw.clone(),
        }
    }

    /// Output fields of a completed query response
    pub fn result_fields(response: &Value) -> Vec<Value> {
        response
            .pointer("/schema/fields")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// Decode the rows of one result page under `fields` and append them
    pub fn append_rows(table: &mut ResultTable, fields: &[Value], page: &Value) {
        for row in page.get("rows").and_then(Value::as_array).into_iter().flatten() {
            let cells = row.get("f").and_then(Value::as_array);
            let values = fields
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let raw = cells
                        .and_then(|c| c.get(i))
                        .and_then(|cell| cell.get("v"))
                        .unwrap_or(&Value::Null);
                    Self::convert_cell(raw, field)
                })
                .collect();
            table.push_row(values);
        }
    }

    /// Materialize the first page of a REST query response
    ///
    /// Fails while the job is still running: an unfinished job carries no
    /// schema and no rows, which must not read as an empty result. Further
    /// pages are added with [`BigQueryConnector::append_rows`].
    pub fn result_from_response(response: &Value) -> Result<ResultTable, ConnectorError> {
        if !job_complete(response) {
            return Err(ConnectorError::QueryError(
                "BigQuery job has not completed; no results are available yet".to_string(),
            ));
        }

        let fields = Self::result_fields(response);
        let columns = fields
            .iter()
            .map(|f| str_field(f, "name").unwrap_or_default().to_string())
            .collect();
        let mut table = ResultTable::new(columns);
        Self::append_rows(&mut table, &fields, response);
        Ok(table)
    }

    /// Processed bytes and output columns of a dry-run response
    pub fn dry_run_details(response: &Value) -> (u64, Vec<ColumnDescriptor>) {
        let processed = u64_field(response, "totalBytesProcessed").unwrap_or(0);
        let output = Self::schema_from_resource(response).columns;
        (processed, output)
    }
}

#[cfg(feature = "bigquery")]
mod native {
    use super::*;
    use crate::dialect::{split_qualified, strip_terminator};
    use gcp_bigquery_client::error::BQError;
    use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
    use gcp_bigquery_client::model::query_request::QueryRequest;

    /// Server-side wait per `jobs.getQueryResults` call
    const RESULTS_WAIT_MS: i32 = 10_000;

    fn query_error(e: BQError) -> ConnectorError {
        ConnectorError::QueryError(e.to_string())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ConnectorError> {
        serde_json::to_value(value).map_err(|e| ConnectorError::InvalidResponse(e.to_string()))
    }

    /// Standard SQL with the query cache on and the billing cap applied
    pub(super) fn query_request(sql: &str) -> QueryRequest {
        let mut request = QueryRequest::new(sql.to_string());
        request.use_legacy_sql = false;
        request.use_query_cache = Some(true);
        request.maximum_bytes_billed = Some(MAXIMUM_BYTES_BILLED.to_string());
        request
    }

    pub(super) fn dry_run_request(sql: &str) -> QueryRequest {
        let mut request = QueryRequest::new(strip_terminator(sql).to_string());
        request.use_legacy_sql = false;
        request.dry_run = Some(true);
        request
    }

    /// Parameters for the next `jobs.getQueryResults` call
    pub(super) fn results_parameters(location: Option<String>, token: Option<String>) -> GetQueryResultsParameters {
        GetQueryResultsParameters {
            location,
            page_token: token,
            timeout_ms: Some(RESULTS_WAIT_MS),
            ..GetQueryResultsParameters::default()
        }
    }

    impl BigQueryConnector {
        fn client(&self) -> Result<&BigQueryClient, ConnectorError> {
            self.client.as_ref().ok_or(ConnectorError::NotConnected)
        }

        pub(super) async fn open_session(&mut self) -> Result<(), ConnectorError> {
            if self.project_id.trim().is_empty() {
                return Err(ConnectorError::MissingFields(vec!["project_id".to_string()]));
            }

            let client = match &self.credentials_path {
                Some(path) => BigQueryClient::from_service_account_key_file(path)
                    .await
                    .map_err(|e| ConnectorError::AuthenticationError(format!(
                        "Failed to read service account key file '{}': {}",
                        path, e
                    )))?,
                None => BigQueryClient::from_application_default_credentials()
                    .await
                    .map_err(|e| ConnectorError::AuthenticationError(format!(
                        "Failed to authenticate with ADC: {}. \
                         Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                        e
                    )))?,
            };

            client
                .dataset()
                .list(&self.project_id, gcp_bigquery_client::dataset::ListOptions::default())
                .await
                .map_err(|e| ConnectorError::ConnectionFailed(format!(
                    "Connection test failed: {}", e
                )))?;

            tracing::info!(project = %self.project_id, "connected to BigQuery");
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

        async fn datasets(&self) -> Result<Vec<String>, ConnectorError> {
            let list = self
                .client()?
                .dataset()
                .list(&self.project_id, gcp_bigquery_client::dataset::ListOptions::default())
                .await
                .map_err(query_error)?;

            Ok(to_json(&list)?
                .get("datasets")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|d| d.pointer("/datasetReference/datasetId").and_then(Value::as_str))
                .map(str::to_string)
                .collect())
        }

        async fn tables_in(&self, dataset: &str) -> Result<Vec<String>, ConnectorError> {
            let list = self
                .client()?
                .table()
                .list(&self.project_id, dataset, gcp_bigquery_client::table::ListOptions::default())
                .await
                .map_err(query_error)?;

            Ok(to_json(&list)?
                .get("tables")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|t| t.pointer("/tableReference/tableId").and_then(Value::as_str))
                .map(str::to_string)
                .collect())
        }

        async fn table_resource(&self, project: &str, dataset: &str, table: &str) -> Result<Value, ConnectorError> {
            let resource = self
                .client()?
                .table()
                .get(project, dataset, table, None)
                .await
                .map_err(|e| ConnectorError::from_lookup(&format!("{}.{}", dataset, table), e))?;
            to_json(&resource)
        }

        pub(super) async fn snapshot(&self) -> Result<SchemaSnapshot, ConnectorError> {
            let mut snapshot = SchemaSnapshot::new();

            for dataset in self.datasets().await? {
                snapshot.ensure_namespace(&[dataset.as_str()]);

                let tables = match self.tables_in(&dataset).await {
                    Ok(tables) => tables,
                    Err(e) => {
                        tracing::warn!(dataset = %dataset, error = %e, "skipping dataset");
                        continue;
                    }
                };

                for table in tables {
                    match self.table_resource(&self.project_id, &dataset, &table).await {
                        Ok(resource) => snapshot.insert_table(
                            &[dataset.as_str()],
                            table,
                            Self::schema_from_resource(&resource),
                        ),
                        Err(e) => {
                            tracing::warn!(dataset = %dataset, table = %table, error = %e, "skipping table");
                        }
                    }
                }
            }

            Ok(snapshot)
        }

        pub(super) async fn table_names(&self) -> Result<Vec<String>, ConnectorError> {
            let mut names = Vec::new();
            for dataset in self.datasets().await? {
                match self.tables_in(&dataset).await {
                    Ok(tables) => names.extend(tables.into_iter().map(|t| format!("{}.{}", dataset, t))),
                    Err(e) => tracing::warn!(dataset = %dataset, error = %e, "skipping dataset"),
                }
            }
            Ok(names)
        }

        pub(super) async fn describe(&self, name: &str) -> Result<TableDescriptor, ConnectorError> {
            let parts = split_qualified(name, 3);
            match parts.as_slice() {
                [project, dataset, table] => {
                    let resource = self.table_resource(project, dataset, table).await?;
                    Ok(Self::describe_resource(format!("{}.{}", dataset, table), &resource))
                }
                [dataset, table] => {
                    let resource = self.table_resource(&self.project_id, dataset, table).await?;
                    Ok(Self::describe_resource(format!("{}.{}", dataset, table), &resource))
                }
                [table] => {
                    for dataset in self.datasets().await? {
                        match self.table_resource(&self.project_id, &dataset, table).await {
                            Ok(resource) => {
                                return Ok(Self::describe_resource(format!("{}.{}", dataset, table), &resource));
                            }
                            Err(e) => tracing::debug!(dataset = %dataset, table = %table, error = %e, "not in dataset"),
                        }
                    }
                    Err(ConnectorError::TableNotFound(name.to_string()))
                }
                _ => Err(ConnectorError::TableNotFound(name.to_string())),
            }
        }

        /// One `jobs.getQueryResults` call, as REST JSON
        async fn results_page(
            &self,
            job_id: &str,
            location: Option<String>,
            token: Option<String>,
        ) -> Result<Value, ConnectorError> {
            let page = self
                .client()?
                .job()
                .get_query_results(&self.project_id, job_id, results_parameters(location, token))
                .await
                .map_err(query_error)?;
            to_json(&page)
        }

        /// Run `sql` and read every result page
        ///
        /// A job that outlives the request's wait is polled until it
        /// finishes; the session deadline bounds the wait.
        pub(super) async fn run(&self, sql: &str) -> Result<ResultTable, ConnectorError> {
            let response = self
                .client()?
                .job()
                .query(&self.project_id, query_request(sql))
                .await
                .map_err(query_error)?;
            let mut response = to_json(&response)?;

            let reference = job_reference(&response);
            let job = || {
                reference.clone().ok_or_else(|| {
                    ConnectorError::InvalidResponse("query response without a job reference".to_string())
                })
            };

            while !job_complete(&response) {
                let (job_id, location) = job()?;
                tracing::debug!(job = %job_id, "waiting for BigQuery job");
                response = self.results_page(&job_id, location, None).await?;
            }

            let fields = Self::result_fields(&response);
            let mut table = Self::result_from_response(&response)?;
            let mut token = page_token(&response);
            while let Some(next) = token {
                let (job_id, location) = job()?;
                let page = self.results_page(&job_id, location, Some(next)).await?;
                Self::append_rows(&mut table, &fields, &page);
                token = page_token(&page);
            }

            tracing::debug!(rows = table.row_count(), "BigQuery results read");
            Ok(table)
        }

        /// Dry-run `sql` and return the raw REST response
        pub(super) async fn dry_run(&self, sql: &str) -> Result<Value, ConnectorError> {
            let response = self
                .client()?
                .job()
                .query(&self.project_id, dry_run_request(sql))
                .await
                .map_err(query_error)?;
            to_json(&response)
        }
    }
}

#[cfg(not(feature = "bigquery"))]
impl BigQueryConnector {
    async fn open_session(&mut self) -> Result<(), ConnectorError> {
        Err(ConnectorError::feature_disabled(BackendKind::BigQuery))
    }

    fn close_session(&mut self) {}

    fn has_session(&self) -> bool {
        false
    }

    fn session_error(&self) -> ConnectorError {
        ConnectorError::feature_disabled(BackendKind::BigQuery)
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

    async fn run(&self, _sql: &str) -> Result<ResultTable, ConnectorError> {
        Err(self.session_error())
    }

    async fn dry_run(&self, _sql: &str) -> Result<Value, ConnectorError> {
        Err(self.session_error())
    }
}

#[async_trait::async_trait]
impl Connector for BigQueryConnector {
    fn backend(&self) -> BackendKind {
        BackendKind::BigQuery
    }

    fn name(&self) -> &'static str {
        "BigQuery"
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
        let result = self.guard.check(sql);
        if !result.is_valid || !self.has_session() {
            return result;
        }

        match self.dry_run(sql).await {
            Ok(_) => result,
            Err(e) => ValidationResult::invalid(format!("Query validation failed: {}", e)),
        }
    }

    async fn get_query_plan(&mut self, sql: &str) -> Result<String, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        let response = self.dry_run(sql).await?;
        let (processed, output) = Self::dry_run_details(&response);
        Ok(dry_run_summary(processed, &output, &[]))
    }

    async fn estimate_query_cost(&mut self, sql: &str) -> Result<CostEstimate, ConnectorError> {
        if !self.has_session() {
            return Err(self.session_error());
        }
        let response = self.dry_run(sql).await?;
        let (processed, _) = Self::dry_run_details(&response);
        Ok(bigquery_cost_from_bytes(processed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params() -> ConnectionParams {
        let mut params = ConnectionParams::new();
        params.insert("project_id".into(), "analytics-prod".into());
        params
    }

    #[test]
    fn test_type_mapping() {
        assert!(matches!(BigQueryConnector::map_bigquery_type("INT64"), LogicalType::Int));
        assert!(matches!(BigQueryConnector::map_bigquery_type("STRING"), LogicalType::String));
        assert!(matches!(BigQueryConnector::map_bigquery_type("BOOL"), LogicalType::Bool));
        assert!(matches!(BigQueryConnector::map_bigquery_type("TIMESTAMP"), LogicalType::Timestamp));
        assert!(matches!(BigQueryConnector::map_bigquery_type("JSON"), LogicalType::Json));
        assert!(matches!(BigQueryConnector::map_bigquery_type("FLOAT64"), LogicalType::Float));
    }

    #[test]
    fn test_numeric_and_array_types() {
        assert_eq!(
            BigQueryConnector::map_bigquery_type("NUMERIC(10,2)"),
            LogicalType::Decimal { precision: Some(10), scale: Some(2) }
        );
        assert_eq!(
            BigQueryConnector::map_bigquery_type("BIGNUMERIC"),
            LogicalType::Decimal { precision: Some(38), scale: Some(9) }
        );
        assert_eq!(
            BigQueryConnector::map_bigquery_type("ARRAY<INT64>"),
            LogicalType::Array { element_type: Box::new(LogicalType::Int) }
        );
    }

    #[test]
    fn billing_rounds_up_with_minimum() {
        assert_eq!(billed_bytes(0), 0);
        assert_eq!(billed_bytes(1), 10 * MB);
        assert_eq!(billed_bytes(10 * MB), 10 * MB);
        assert_eq!(billed_bytes(10 * MB + 1), 11 * MB);
    }

    #[test]
    fn cost_estimate_from_bytes() {
        let tb = 1024u64.pow(4);
        let estimate = bigquery_cost_from_bytes(tb);
        assert_eq!(estimate.get_u64("bytes_processed"), Some(tb));
        assert_eq!(estimate.get_u64("bytes_billed"), Some(tb));
        assert_eq!(estimate.get_f64("estimated_cost_usd"), Some(5.0));
        assert_eq!(estimate.get_str("cost_model"), Some("$5 per TB processed"));

        let free = bigquery_cost_from_bytes(0);
        assert_eq!(free.get_f64("estimated_cost_usd"), Some(0.0));
    }

    #[test]
    fn nested_and_repeated_fields() {
        let field = json!({
            "name": "address",
            "type": "RECORD",
            "mode": "REPEATED",
            "fields": [
                {"name": "city", "type": "STRING", "mode": "NULLABLE"},
                {"name": "zip", "type": "INTEGER", "mode": "REQUIRED"}
            ]
        });

        let column = BigQueryConnector::column_from_field(&field);
        assert_eq!(column.data_type, "ARRAY<STRUCT<city STRING, zip INTEGER>>");
        match column.logical_type {
            LogicalType::Array { element_type } => match *element_type {
                LogicalType::Struct { fields } => {
                    assert_eq!(fields.len(), 2);
                    assert!(!fields[1].nullable);
                }
                other => panic!("expected struct element, got {:?}", other),
            },
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn table_resource_to_descriptor() {
        let resource = json!({
            "type": "TABLE",
            "numRows": "1200",
            "numBytes": "65536",
            "creationTime": "1700000000000",
            "lastModifiedTime": "1700000500000",
            "timePartitioning": {"type": "DAY", "field": "event_date"},
            "clustering": {"fields": ["customer_id", "country"]},
            "schema": {"fields": [
                {"name": "event_date", "type": "DATE", "mode": "REQUIRED"},
                {"name": "customer_id", "type": "INTEGER", "description": "Customer key"},
                {"name": "country", "type": "STRING"}
            ]}
        });

        let descriptor = BigQueryConnector::describe_resource("events.daily", &resource);
        assert_eq!(descriptor.name, "events.daily");
        assert_eq!(descriptor.column_names(), vec!["event_date", "customer_id", "country"]);
        assert_eq!(descriptor.row_count, Some(1200));
        assert_eq!(descriptor.size_bytes, Some(65536));
        assert_eq!(descriptor.table_type.as_deref(), Some("TABLE"));
        assert_eq!(
            descriptor.layout.partitioning,
            Some(Partitioning { kind: "DAY".into(), field: Some("event_date".into()) })
        );
        assert_eq!(descriptor.layout.clustering_fields, vec!["customer_id", "country"]);
        assert_eq!(descriptor.columns[1].description.as_deref(), Some("Customer key"));
    }

    #[test]
    fn query_response_to_result_table() {
        let response = json!({
            "schema": {"fields": [
                {"name": "id", "type": "INTEGER"},
                {"name": "score", "type": "FLOAT"},
                {"name": "active", "type": "BOOLEAN"},
                {"name": "tags", "type": "STRING", "mode": "REPEATED"},
                {"name": "meta", "type": "RECORD", "fields": [{"name": "k", "type": "STRING"}]}
            ]},
            "rows": [
                {"f": [{"v": "1"}, {"v": "0.5"}, {"v": "true"}, {"v": [{"v": "a"}, {"v": "b"}]}, {"v": {"f": [{"v": "x"}]}}]},
                {"f": [{"v": "2"}, {"v": null}, {"v": "false"}, {"v": []}, {"v": null}]}
            ]
        });

        let table = BigQueryConnector::result_from_response(&response).unwrap();
        assert_eq!(table.columns, vec!["id", "score", "active", "tags", "meta"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.rows[0],
            vec![json!(1), json!(0.5), json!(true), json!(["a", "b"]), json!({"k": "x"})]
        );
        assert_eq!(table.rows[1][1], Value::Null);
    }

    #[test]
    fn unfinished_job_is_not_an_empty_result() {
        let response = json!({
            "jobComplete": false,
            "jobReference": {"projectId": "analytics-prod", "jobId": "job_42", "location": "EU"}
        });

        let err = BigQueryConnector::result_from_response(&response).unwrap_err();
        assert!(matches!(err, ConnectorError::QueryError(_)));
        assert!(!job_complete(&response));
        assert_eq!(job_reference(&response), Some(("job_42".to_string(), Some("EU".to_string()))));
    }

    #[test]
    fn later_pages_are_appended() {
        let first = json!({
            "jobComplete": true,
            "totalRows": "4",
            "pageToken": "page-2",
            "jobReference": {"jobId": "job_7"},
            "schema": {"fields": [{"name": "id", "type": "INTEGER"}, {"name": "name", "type": "STRING"}]},
            "rows": [
                {"f": [{"v": "1"}, {"v": "a"}]},
                {"f": [{"v": "2"}, {"v": "b"}]}
            ]
        });
        let second = json!({
            "jobComplete": true,
            "pageToken": "",
            "rows": [
                {"f": [{"v": "3"}, {"v": "c"}]},
                {"f": [{"v": "4"}, {"v": null}]}
            ]
        });

        assert_eq!(page_token(&first).as_deref(), Some("page-2"));
        assert_eq!(page_token(&second), None);

        let fields = BigQueryConnector::result_fields(&first);
        let mut table = BigQueryConnector::result_from_response(&first).unwrap();
        assert_eq!(table.row_count(), 2);

        BigQueryConnector::append_rows(&mut table, &fields, &second);
        assert_eq!(table.row_count(), 4);
        assert_eq!(table.columns, vec!["id", "name"]);
        assert_eq!(table.rows[2], vec![json!(3), json!("c")]);
        assert_eq!(table.rows[3][1], Value::Null);
    }

    #[test]
    fn responses_without_completion_flag_are_final() {
        let response = json!({"schema": {"fields": [{"name": "n", "type": "INTEGER"}]}});
        assert!(job_complete(&response));
        assert_eq!(page_token(&response), None);
        assert_eq!(job_reference(&response), None);
        assert!(BigQueryConnector::result_from_response(&response).unwrap().is_empty());
    }

    #[cfg(feature = "bigquery")]
    #[test]
    fn native_requests_carry_billing_cap_and_paging() {
        let request = native::query_request("SELECT 1");
        assert!(!request.use_legacy_sql);
        assert_eq!(request.use_query_cache, Some(true));
        assert_eq!(request.maximum_bytes_billed, Some(MAXIMUM_BYTES_BILLED.to_string()));

        let dry = native::dry_run_request("SELECT 1;");
        assert_eq!(dry.query, "SELECT 1");
        assert_eq!(dry.dry_run, Some(true));

        let params = native::results_parameters(Some("EU".into()), Some("page-2".into()));
        assert_eq!(params.location.as_deref(), Some("EU"));
        assert_eq!(params.page_token.as_deref(), Some("page-2"));
        assert!(params.timeout_ms.is_some());
    }

    #[test]
    fn dry_run_plan_text() {
        let response = json!({
            "totalBytesProcessed": "2097152",
            "schema": {"fields": [{"name": "n", "type": "INTEGER"}]}
        });
        let (processed, output) = BigQueryConnector::dry_run_details(&response);
        assert_eq!(processed, 2 * MB);

        let plan = dry_run_summary(processed, &output, &[]);
        assert!(plan.contains("Bytes processed: 2097152 (2.00 MB)"));
        assert!(plan.contains("  n: INTEGER"));
    }

    #[tokio::test]
    async fn validation_without_session_is_lexical() {
        let mut connector = BigQueryConnector::new(params());
        assert_eq!(connector.project_id(), "analytics-prod");
        assert!(connector.validate_query("SELECT * FROM `d.t`").await.is_valid);
        assert!(!connector.validate_query("DELETE FROM d.t WHERE 1=1").await.is_valid);
        assert!(connector.get_relationships().await.unwrap().is_empty());
        assert!(connector.get_tables().await.unwrap().is_empty());
    }
}
