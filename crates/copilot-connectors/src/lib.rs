//! Warehouse connectors for the copilot session engine
//!
//! Every backend implements the [`Connector`] contract: connect and smoke
//! test, run a read query with an optional injected limit, walk the
//! metadata catalog, describe a table, check a statement is read-only, and
//! report plans and cost diagnostics without executing anything.
//!
//! ## Features
//!
//! Enable warehouse support via Cargo features:
//! - `bigquery` - Google BigQuery support
//! - `snowflake` - Snowflake support
//! - `postgres` - PostgreSQL support
//! - `redshift` - Amazon Redshift support
//! - `all-warehouses` - All warehouse connectors
//!
//! Without a backend's feature its connector still builds and validates
//! statements, but `connect` fails and session calls report
//! [`ConnectorError::FeatureDisabled`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use copilot_connectors::{Connector, ConnectorFactory};
//! use copilot_core::Settings;
//!
//! let factory = ConnectorFactory::new(Settings::load(None)?);
//! let mut connector = factory.create(Some("postgres"), None)?;
//! if connector.connect().await {
//!     let rows = connector.execute_query("SELECT * FROM orders", Some(10)).await?;
//! }
//! connector.disconnect().await;
//! ```

pub mod connector;
pub mod dialect;
pub mod factory;
pub mod guard;
pub mod strategy;

pub mod bigquery;
pub mod mock;
pub mod postgres;
pub mod redshift;
pub mod snowflake;

#[cfg(any(feature = "postgres", feature = "redshift"))]
mod pgwire;

pub use connector::{Connector, ConnectorError};
pub use dialect::{apply_limit, LimitStyle};
pub use factory::{ConnectorFactory, ConnectorSource};
pub use guard::QueryGuard;

pub use bigquery::BigQueryConnector;
pub use mock::{MockConnector, MockConnectorBuilder};
pub use postgres::PostgresConnector;
pub use redshift::RedshiftConnector;
pub use snowflake::{SnowflakeConnector, SnowflakeConnectorBuilder};
