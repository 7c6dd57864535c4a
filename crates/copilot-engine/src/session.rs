//! Scoped connector sessions
//!
//! A [`Session`] owns one connected connector for the length of one flow.
//! Callers finish every flow with [`Session::close`], on success and
//! failure alike; a session dropped while still connected logs a warning
//! because the native connection it holds is never released.

use crate::error::PipelineError;
use copilot_connectors::Connector;
use copilot_core::{BackendKind, ResultTable};
use std::time::Duration;

pub struct Session {
    connector: Box<dyn Connector>,
    timeout: Duration,
    poisoned: bool,
    closed: bool,
}

impl Session {
    /// Connect `connector` and wrap it
    ///
    /// `timeout` bounds each [`Session::execute`] call.
    pub async fn open(
        mut connector: Box<dyn Connector>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if !connector.connect().await {
            return Err(PipelineError::ConnectionFailed);
        }
        tracing::info!(backend = connector.name(), "session opened");

        Ok(Self {
            connector,
            timeout,
            poisoned: false,
            closed: false,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.connector.backend()
    }

    /// The connected connector, for introspection and validation calls
    pub fn connector(&mut self) -> &mut dyn Connector {
        self.connector.as_mut()
    }

    /// Whether an execution timed out and the connection was dropped
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Run `sql` under the session deadline
    ///
    /// On expiry the in-flight call is abandoned, the connection is
    /// disconnected and the session is marked poisoned; later calls fail
    /// with `NotConnected`.
    pub async fn execute(
        &mut self,
        sql: &str,
        limit: Option<usize>,
    ) -> Result<ResultTable, PipelineError> {
        tracing::debug!(backend = self.connector.name(), sql, ?limit, "executing");

        match tokio::time::timeout(self.timeout, self.connector.execute_query(sql, limit)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(
                    backend = self.connector.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "query deadline expired, dropping connection"
                );
                self.poisoned = true;
                self.connector.disconnect().await;
                Err(PipelineError::Timeout(self.timeout))
            }
        }
    }

    /// Disconnect and consume the session
    pub async fn close(mut self) {
        self.connector.disconnect().await;
        self.closed = true;
        tracing::info!(backend = self.connector.name(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed && self.connector.is_connected() {
            tracing::warn!(
                backend = self.connector.name(),
                "session dropped without close(); connection leaked"
            );
        }
    }
}
