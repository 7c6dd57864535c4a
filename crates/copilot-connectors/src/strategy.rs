//! Ordered estimation strategies with first-success-wins semantics

use crate::connector::ConnectorError;
use std::future::Future;

/// Ways of obtaining a table's row count, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCountStrategy {
    /// `SELECT COUNT(*)` against the table
    ExactCount,

    /// Backend statistics views (pg_class, svv_table_info, SHOW TABLES)
    CatalogStatistics,
}

/// Default order: exact first, statistics as fallback
pub const ROW_COUNT_STRATEGIES: &[RowCountStrategy] = &[
    RowCountStrategy::ExactCount,
    RowCountStrategy::CatalogStatistics,
];

/// Run `attempt` for each strategy in order and keep the first value
///
/// An error or an empty answer moves on to the next strategy; when every
/// strategy fails the result is `None`.
pub async fn first_success<S, T, F, Fut>(strategies: &[S], mut attempt: F) -> Option<T>
where
    S: Copy + std::fmt::Debug,
    F: FnMut(S) -> Fut,
    Fut: Future<Output = Result<Option<T>, ConnectorError>>,
{
    for &strategy in strategies {
        match attempt(strategy).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => tracing::debug!(?strategy, "strategy produced no value"),
            Err(e) => tracing::debug!(?strategy, error = %e, "strategy failed"),
        }
    }
    None
}

/// Evaluate an optional lookup, logging and discarding its failure
pub async fn best_effort<T, Fut>(what: &str, lookup: Fut) -> Option<T>
where
    Fut: Future<Output = Result<Option<T>, ConnectorError>>,
{
    match lookup.await {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(lookup = what, error = %e, "lookup failed, leaving it empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn first_success_wins() {
        let tried = RefCell::new(Vec::new());
        let count = first_success(ROW_COUNT_STRATEGIES, |s| {
            tried.borrow_mut().push(s);
            async move {
                match s {
                    RowCountStrategy::ExactCount => Ok(Some(42u64)),
                    RowCountStrategy::CatalogStatistics => Ok(Some(7)),
                }
            }
        })
        .await;

        assert_eq!(count, Some(42));
        assert_eq!(*tried.borrow(), vec![RowCountStrategy::ExactCount]);
    }

    #[tokio::test]
    async fn falls_back_on_error_and_empty() {
        let count = first_success(ROW_COUNT_STRATEGIES, |s| async move {
            match s {
                RowCountStrategy::ExactCount => Err(ConnectorError::QueryError("timeout".into())),
                RowCountStrategy::CatalogStatistics => Ok(Some(7u64)),
            }
        })
        .await;
        assert_eq!(count, Some(7));

        let none: Option<u64> = first_success(ROW_COUNT_STRATEGIES, |_| async { Ok(None) }).await;
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        let value: Option<String> =
            best_effort("distkey", async { Err(ConnectorError::QueryError("no".into())) }).await;
        assert_eq!(value, None);

        let value = best_effort("sortkey", async { Ok(Some("id".to_string())) }).await;
        assert_eq!(value.as_deref(), Some("id"));
    }
}
