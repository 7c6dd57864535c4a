//! Warehouse Copilot core
//!
//! Backend-neutral domain model shared by the connectors, the session
//! engine and the CLI.

pub mod backend;
pub mod config;
pub mod result;
pub mod schema;

pub use backend::{BackendKind, UnsupportedBackend};
pub use config::{ConfigError, ConnectionParams, QueryLimits, Settings};
pub use result::{CostEstimate, ResultTable, ValidationResult};
pub use schema::{
    ColumnDescriptor, LogicalType, Partitioning, PhysicalLayout, Relationship, SchemaNode,
    SchemaSnapshot, TableDescriptor, TableSchema,
};
