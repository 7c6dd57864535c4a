//! Request-level flows over a connector source
//!
//! Each flow opens a fresh connector, runs inside a [`Session`] and closes
//! it before returning:
//!
//! 1. **execute**: optional SQL generation → read-only check → bounded
//!    execution under the deadline → optional insights → query log
//! 2. **validate**: optional SQL generation → read-only check
//! 3. **plan**: optional SQL generation → plan text and cost estimate
//! 4. **schema / tables / describe**: catalog reads

use crate::error::PipelineError;
use crate::generator::{clean_sql_output, TextGenerator};
use crate::query_log::{query_log_for, QueryLog, QueryLogEntry};
use crate::session::Session;
use chrono::{DateTime, Utc};
use copilot_connectors::{ConnectorFactory, ConnectorSource};
use copilot_core::{
    CostEstimate, QueryLimits, Relationship, ResultTable, SchemaSnapshot, Settings,
    TableDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const SELECT_ONLY_FIX: &str = "Ensure query only contains SELECT statements";

/// How the request text should be interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// A question in plain language, turned into SQL by the generator
    #[default]
    Natural,
    /// SQL run as given
    Sql,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Natural => "natural",
            QueryType::Sql => "sql",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub query_type: QueryType,
    /// Requested row cap; capped again by `max_query_rows`
    #[serde(default)]
    pub limit: Option<usize>,
    /// Backend override; the configured default when absent
    #[serde(default)]
    pub database_type: Option<String>,
}

impl QueryRequest {
    pub fn natural(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_type: QueryType::Natural,
            limit: None,
            database_type: None,
        }
    }

    pub fn sql(query: impl Into<String>) -> Self {
        Self {
            query_type: QueryType::Sql,
            ..Self::natural(query)
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_database_type(mut self, database_type: impl Into<String>) -> Self {
        self.database_type = Some(database_type.into());
        self
    }
}

/// Result rows in transport shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub columns: Vec<String>,
    /// One column → value object per row
    pub data: Vec<Map<String, Value>>,
    pub total_rows: usize,
}

impl From<&ResultTable> for QueryResults {
    fn from(table: &ResultTable) -> Self {
        Self {
            columns: table.columns.clone(),
            data: table.records(),
            total_rows: table.row_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub query_type: QueryType,
    pub database_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`QueryPipeline::execute`]; failures are reported, not raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub query_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<QueryResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<String>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QueryMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub is_valid: bool,
    pub error_message: Option<String>,
    /// SQL produced for a natural-language request
    pub generated_sql: Option<String>,
    pub safety_issues: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

impl ValidationResponse {
    fn failed(message: String, generated_sql: Option<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message),
            generated_sql,
            safety_issues: Vec::new(),
            suggested_fixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    pub query: String,
    pub plan: String,
    pub estimated_cost: CostEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverview {
    pub database_type: String,
    pub tables: SchemaSnapshot,
    pub relationships: Vec<Relationship>,
    pub table_count: usize,
}

/// What a successful execution produced
struct Executed {
    results: ResultTable,
    insights: Option<String>,
    database_type: String,
}

/// Orchestrates the session protocol for one request at a time
///
/// Cheap to share: the pipeline holds no session state, every flow opens
/// its own connector from the source.
#[derive(Clone)]
pub struct QueryPipeline {
    source: Arc<dyn ConnectorSource>,
    generator: Option<Arc<dyn TextGenerator>>,
    log: Arc<dyn QueryLog>,
    limits: QueryLimits,
}

impl QueryPipeline {
    pub fn new(source: Arc<dyn ConnectorSource>, limits: QueryLimits) -> Self {
        Self {
            source,
            generator: None,
            log: query_log_for(true),
            limits,
        }
    }

    /// Pipeline over a [`ConnectorFactory`] built from `settings`
    pub fn from_settings(settings: Settings) -> Self {
        let limits = settings.limits.clone();
        let log = query_log_for(settings.logging.enable_query_logging);
        Self::new(Arc::new(ConnectorFactory::new(settings)), limits).with_query_log(log)
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_query_log(mut self, log: Arc<dyn QueryLog>) -> Self {
        self.log = log;
        self
    }

    pub fn query_log(&self) -> &Arc<dyn QueryLog> {
        &self.log
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    async fn open(&self, database_type: Option<&str>) -> Result<Session, PipelineError> {
        let connector = self.source.open(database_type)?;
        Session::open(connector, self.limits.timeout()).await
    }

    /// Generated SQL for natural-language requests, the text itself otherwise
    async fn resolve_sql(
        &self,
        session: &mut Session,
        request: &QueryRequest,
    ) -> Result<String, PipelineError> {
        if request.query_type == QueryType::Sql {
            return Ok(request.query.clone());
        }

        let generator = self.generator.as_ref().ok_or(PipelineError::GeneratorMissing)?;
        tracing::info!(query = %request.query, "processing natural language query");

        let backend = session.backend();
        let schema = session.connector().get_schema().await?;
        let raw = generator
            .generate_sql(&request.query, &schema, backend)
            .await
            .ok_or(PipelineError::SqlGenerationFailed)?;

        let sql = clean_sql_output(&raw);
        if sql.is_empty() {
            return Err(PipelineError::SqlGenerationFailed);
        }
        Ok(sql)
    }

    /// Run a request end to end
    ///
    /// Never fails: every error, from connection to execution, is turned
    /// into an unsuccessful response. Both outcomes are recorded in the
    /// query log.
    pub async fn execute(&self, request: &QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let query_id = Uuid::new_v4();
        let mut generated_sql = None;

        let outcome = match self.open(request.database_type.as_deref()).await {
            Ok(mut session) => {
                let outcome = self.run(&mut session, request, &mut generated_sql).await;
                session.close().await;
                outcome
            }
            Err(e) => Err(e),
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(done) => {
                let row_count = done.results.row_count();
                QueryResponse {
                    success: true,
                    query_id,
                    generated_sql: generated_sql.clone(),
                    results: Some(QueryResults::from(&done.results)),
                    insights: done.insights,
                    execution_time_ms,
                    row_count: Some(row_count),
                    metadata: Some(QueryMetadata {
                        query_type: request.query_type,
                        database_type: done.database_type,
                        timestamp: Utc::now(),
                    }),
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(query_id = %query_id, error = %e, "query execution failed");
                QueryResponse {
                    success: false,
                    query_id,
                    generated_sql: generated_sql.clone(),
                    results: None,
                    insights: None,
                    execution_time_ms,
                    row_count: None,
                    metadata: None,
                    error: Some(e.to_string()),
                }
            }
        };

        self.log
            .record(QueryLogEntry {
                id: query_id,
                query_text: request.query.clone(),
                generated_sql,
                query_type: request.query_type,
                database_type: response
                    .metadata
                    .as_ref()
                    .map(|m| m.database_type.clone())
                    .or_else(|| request.database_type.clone()),
                execution_time_ms,
                row_count: response.row_count,
                success: response.success,
                error_message: response.error.clone(),
                timestamp: Utc::now(),
            })
            .await;

        response
    }

    async fn run(
        &self,
        session: &mut Session,
        request: &QueryRequest,
        generated_sql: &mut Option<String>,
    ) -> Result<Executed, PipelineError> {
        let sql = self.resolve_sql(session, request).await?;
        *generated_sql = Some(sql.clone());

        let verdict = session.connector().validate_query(&sql).await;
        if !verdict.is_valid {
            return Err(PipelineError::Rejected(verdict.reason.unwrap_or_default()));
        }

        let limit = self.limits.effective_limit(request.limit);
        let results = session.execute(&sql, Some(limit)).await?;

        let insights = match (request.query_type, &self.generator) {
            (QueryType::Natural, Some(generator)) => {
                Some(generator.generate_insights(&request.query, &results, &sql).await)
            }
            _ => None,
        };

        Ok(Executed {
            results,
            insights,
            database_type: session.backend().as_str().to_string(),
        })
    }

    /// Check a request without executing it
    ///
    /// Natural-language requests are turned into SQL first. Infrastructure
    /// failures come back as an invalid response carrying the error text.
    pub async fn validate(&self, request: &QueryRequest) -> ValidationResponse {
        let mut session = match self.open(request.database_type.as_deref()).await {
            Ok(session) => session,
            Err(e) => return ValidationResponse::failed(e.to_string(), None),
        };

        let response = match self.resolve_sql(&mut session, request).await {
            Ok(sql) => {
                let verdict = session.connector().validate_query(&sql).await;
                let generated_sql = (request.query_type == QueryType::Natural).then_some(sql);
                match verdict.reason {
                    Some(reason) if !verdict.is_valid => ValidationResponse {
                        is_valid: false,
                        error_message: Some(reason.clone()),
                        generated_sql,
                        safety_issues: vec![reason],
                        suggested_fixes: vec![SELECT_ONLY_FIX.to_string()],
                    },
                    _ => ValidationResponse {
                        is_valid: verdict.is_valid,
                        error_message: None,
                        generated_sql,
                        safety_issues: Vec::new(),
                        suggested_fixes: Vec::new(),
                    },
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "query validation failed");
                ValidationResponse::failed(e.to_string(), None)
            }
        };

        session.close().await;
        response
    }

    /// Plan text and cost estimate; the statement is never executed
    pub async fn plan(&self, request: &QueryRequest) -> Result<PlanResponse, PipelineError> {
        let mut session = self.open(request.database_type.as_deref()).await?;

        let outcome = async {
            let sql = self.resolve_sql(&mut session, request).await?;
            let plan = session.connector().get_query_plan(&sql).await?;
            let estimated_cost = session.connector().estimate_query_cost(&sql).await?;
            Ok::<_, PipelineError>(PlanResponse {
                query: sql,
                plan,
                estimated_cost,
            })
        }
        .await;

        session.close().await;
        outcome
    }

    /// Full catalog of one backend, optionally with foreign-key edges
    pub async fn schema(
        &self,
        database_type: Option<&str>,
        include_relationships: bool,
    ) -> Result<SchemaOverview, PipelineError> {
        let mut session = self.open(database_type).await?;

        let outcome = async {
            let tables = session.connector().get_schema().await?;
            let relationships = if include_relationships {
                session.connector().get_relationships().await?
            } else {
                Vec::new()
            };
            Ok::<_, PipelineError>(SchemaOverview {
                database_type: session.backend().as_str().to_string(),
                table_count: tables.table_count(),
                tables,
                relationships,
            })
        }
        .await;

        session.close().await;
        outcome
    }

    /// Qualified names of every accessible table
    pub async fn tables(&self, database_type: Option<&str>) -> Result<Vec<String>, PipelineError> {
        let mut session = self.open(database_type).await?;
        let outcome = session.connector().get_tables().await;
        session.close().await;
        Ok(outcome?)
    }

    /// Describe one table by qualified or bare name
    pub async fn describe(
        &self,
        database_type: Option<&str>,
        table: &str,
    ) -> Result<TableDescriptor, PipelineError> {
        let mut session = self.open(database_type).await?;
        let outcome = session.connector().get_table_info(table).await;
        session.close().await;
        Ok(outcome?)
    }

    /// Foreign-key edges of one backend
    pub async fn relationships(
        &self,
        database_type: Option<&str>,
    ) -> Result<Vec<Relationship>, PipelineError> {
        let mut session = self.open(database_type).await?;
        let outcome = session.connector().get_relationships().await;
        session.close().await;
        Ok(outcome?)
    }
}
