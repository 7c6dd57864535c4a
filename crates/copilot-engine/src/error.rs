//! Errors raised by the session engine

use copilot_connectors::ConnectorError;
use std::time::Duration;

/// Failure of one orchestrated flow
///
/// Validation rejections are carried here only so a flow can stop early;
/// the pipeline reports them in its response rather than raising them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("Failed to connect to database")]
    ConnectionFailed,

    #[error("Could not generate SQL from natural language query")]
    SqlGenerationFailed,

    #[error("No text generator configured for natural language queries")]
    GeneratorMissing,

    #[error("Query validation failed: {0}")]
    Rejected(String),

    #[error("Query timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}
