//! Warehouse Copilot engine - session orchestration
//!
//! This crate drives the connector protocol for one request at a time:
//! - Scoped sessions with guaranteed disconnect and an execution deadline
//! - Natural-language and SQL query flows
//! - Validation, plan and catalog flows
//! - Query history

pub mod error;
pub mod generator;
pub mod pipeline;
pub mod query_log;
pub mod session;

pub use error::PipelineError;
pub use generator::{clean_sql_output, format_schema_context, summarize_results, TextGenerator};
pub use pipeline::{
    PlanResponse, QueryPipeline, QueryRequest, QueryResponse, QueryResults, QueryType,
    SchemaOverview, ValidationResponse,
};
pub use query_log::{DisabledQueryLog, MemoryQueryLog, QueryLog, QueryLogEntry, QueryStats};
pub use session::Session;
