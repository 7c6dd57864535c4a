//! Shared tokio-postgres plumbing for the PostgreSQL and Redshift connectors

use crate::connector::ConnectorError;
use copilot_core::{ConnectionParams, ResultTable};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde_json::Value;
use std::future::Future;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, Config as PgConfig, NoTls, SimpleQueryMessage};

/// Resolved connection settings for a wire-protocol backend
#[derive(Debug, Clone)]
pub(crate) struct WireParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub tls: bool,
}

impl WireParams {
    /// Read host/port/database/user/password from named parameters
    ///
    /// `sslmode=require` (or `force_tls`) turns TLS on.
    pub fn from_params(
        params: &ConnectionParams,
        default_port: u16,
        force_tls: bool,
    ) -> Result<Self, ConnectorError> {
        let get = |key: &str| params.get(key).cloned().unwrap_or_default();

        let port = match params.get("port") {
            Some(port) => port.trim().parse().map_err(|_| {
                ConnectorError::ConfigError(format!("Invalid port: {}", port))
            })?,
            None => default_port,
        };

        let tls = force_tls
            || params
                .get("sslmode")
                .map(|mode| mode.eq_ignore_ascii_case("require"))
                .unwrap_or(false);

        Ok(Self {
            host: get("host"),
            port,
            database: get("database"),
            user: get("user"),
            password: get("password"),
            tls,
        })
    }

    fn config(&self) -> PgConfig {
        let mut config = PgConfig::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.user)
            .password(&self.password)
            .application_name("warehouse-copilot");
        if self.tls {
            config.ssl_mode(SslMode::Require);
        }
        config
    }
}

/// Open a client and spawn its connection task in the background
pub(crate) async fn open(params: &WireParams, backend: &'static str) -> Result<Client, ConnectorError> {
    let config = params.config();
    let endpoint = format!("{}:{}", params.host, params.port);

    if params.tls {
        let connector = TlsConnector::builder()
            .build()
            .map_err(|e| ConnectorError::ConfigError(format!(
                "Failed to create TLS connector: {}", e
            )))?;

        let (client, connection) = config
            .connect(MakeTlsConnector::new(connector))
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!(
                "Failed to connect to {} at {} with TLS: {}",
                backend, endpoint, e
            )))?;
        spawn_connection(connection, backend, endpoint);
        Ok(client)
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!(
                "Failed to connect to {} at {}: {}",
                backend, endpoint, e
            )))?;
        spawn_connection(connection, backend, endpoint);
        Ok(client)
    }
}

fn spawn_connection<F>(connection: F, backend: &'static str, endpoint: String)
where
    F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(backend, endpoint = %endpoint, error = %e, "connection task failed");
        }
    });
}

/// Native error text, without the driver's own prefix
pub(crate) fn query_error(e: tokio_postgres::Error) -> ConnectorError {
    let message = match e.as_db_error() {
        Some(db) => db.to_string(),
        None => e.to_string(),
    };
    ConnectorError::QueryError(message)
}

/// Run `sql` and materialize every row
///
/// The statement is prepared first, which rejects multi-statement input
/// and yields the column types. It is then run over the simple protocol so
/// every column arrives as text, which is converted according to its type.
pub(crate) async fn fetch_table(client: &Client, sql: &str) -> Result<ResultTable, ConnectorError> {
    let statement = client.prepare(sql).await.map_err(query_error)?;
    let types: Vec<Type> = statement.columns().iter().map(|c| c.type_().clone()).collect();
    let columns: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();

    let messages = client.simple_query(sql).await.map_err(query_error)?;

    let mut table = ResultTable::new(columns);
    for message in messages {
        if let SimpleQueryMessage::Row(row) = message {
            let values = (0..row.len())
                .map(|i| match types.get(i) {
                    Some(ty) => text_cell(row.get(i), ty),
                    None => text_cell(row.get(i), &Type::TEXT),
                })
                .collect();
            table.push_row(values);
        }
    }

    Ok(table)
}

/// `EXPLAIN` output, one plan line per entry
pub(crate) async fn explain_lines(client: &Client, sql: &str) -> Result<Vec<String>, ConnectorError> {
    let rows = client
        .query(&format!("EXPLAIN {}", sql), &[])
        .await
        .map_err(query_error)?;

    rows.iter()
        .map(|row| row.try_get::<_, String>(0).map_err(query_error))
        .collect()
}

/// Convert one text-protocol cell to JSON according to its column type
pub(crate) fn text_cell(text: Option<&str>, ty: &Type) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };

    match ty.name() {
        "bool" => Value::Bool(text == "t" || text.eq_ignore_ascii_case("true")),
        "int2" | "int4" | "int8" | "oid" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "float4" | "float8" | "numeric" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "json" | "jsonb" | "super" => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        _ => Value::String(text.to_string()),
    }
}
