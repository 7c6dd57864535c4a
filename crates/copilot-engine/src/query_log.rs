//! Query execution history

use crate::pipeline::QueryType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default number of entries a [`MemoryQueryLog`] retains
pub const DEFAULT_CAPACITY: usize = 1_000;

/// One executed (or attempted) query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub id: Uuid,
    pub query_text: String,
    pub generated_sql: Option<String>,
    pub query_type: QueryType,
    pub database_type: Option<String>,
    pub execution_time_ms: u64,
    pub row_count: Option<usize>,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over the retained history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful queries, 0 when there are none
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
    pub max_execution_time_ms: u64,
    pub query_types: BTreeMap<String, usize>,
}

impl QueryStats {
    fn from_entries<'a>(entries: impl IntoIterator<Item = &'a QueryLogEntry>) -> Self {
        let mut stats = Self::default();
        let mut total_time = 0u64;

        for entry in entries {
            stats.total += 1;
            if entry.success {
                stats.successful += 1;
            } else {
                stats.failed += 1;
            }
            total_time += entry.execution_time_ms;
            stats.max_execution_time_ms = stats.max_execution_time_ms.max(entry.execution_time_ms);
            *stats
                .query_types
                .entry(entry.query_type.as_str().to_string())
                .or_default() += 1;
        }

        if stats.total > 0 {
            stats.success_rate = stats.successful as f64 / stats.total as f64 * 100.0;
            stats.average_execution_time_ms = total_time as f64 / stats.total as f64;
        }
        stats
    }
}

/// Sink and store for query history
#[async_trait::async_trait]
pub trait QueryLog: Send + Sync {
    async fn record(&self, entry: QueryLogEntry);

    /// Entries newest first, after skipping `offset`
    async fn history(&self, limit: usize, offset: usize, success_only: bool) -> Vec<QueryLogEntry>;

    async fn stats(&self) -> QueryStats;
}

/// Bounded in-memory history; the oldest entry is evicted when full
#[derive(Debug)]
pub struct MemoryQueryLog {
    entries: RwLock<VecDeque<QueryLogEntry>>,
    capacity: usize,
}

impl MemoryQueryLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryQueryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QueryLog for MemoryQueryLog {
    async fn record(&self, entry: QueryLogEntry) {
        tracing::info!(
            query_id = %entry.id,
            success = entry.success,
            execution_time_ms = entry.execution_time_ms,
            row_count = ?entry.row_count,
            error = ?entry.error_message,
            "query logged"
        );

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(entry);
    }

    async fn history(&self, limit: usize, offset: usize, success_only: bool) -> Vec<QueryLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| !success_only || e.success)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn stats(&self) -> QueryStats {
        QueryStats::from_entries(self.entries.read().await.iter())
    }
}

/// Log that keeps nothing, used when query logging is switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueryLog;

#[async_trait::async_trait]
impl QueryLog for DisabledQueryLog {
    async fn record(&self, _entry: QueryLogEntry) {}

    async fn history(&self, _limit: usize, _offset: usize, _success_only: bool) -> Vec<QueryLogEntry> {
        Vec::new()
    }

    async fn stats(&self) -> QueryStats {
        QueryStats::default()
    }
}

/// The log matching the `enable_query_logging` setting
pub fn query_log_for(enabled: bool) -> Arc<dyn QueryLog> {
    if enabled {
        Arc::new(MemoryQueryLog::new())
    } else {
        Arc::new(DisabledQueryLog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(text: &str, success: bool, ms: u64) -> QueryLogEntry {
        QueryLogEntry {
            id: Uuid::new_v4(),
            query_text: text.to_string(),
            generated_sql: None,
            query_type: QueryType::Sql,
            database_type: Some("postgres".into()),
            execution_time_ms: ms,
            row_count: success.then_some(1),
            success,
            error_message: (!success).then(|| "boom".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let log = MemoryQueryLog::new();
        log.record(entry("first", true, 10)).await;
        log.record(entry("second", false, 20)).await;
        log.record(entry("third", true, 30)).await;

        let texts: Vec<String> = log.history(10, 0, false).await.into_iter().map(|e| e.query_text).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);

        let texts: Vec<String> = log.history(1, 1, true).await.into_iter().map(|e| e.query_text).collect();
        assert_eq!(texts, vec!["first"]);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let log = MemoryQueryLog::with_capacity(2);
        for name in ["a", "b", "c"] {
            log.record(entry(name, true, 1)).await;
        }
        assert_eq!(log.len().await, 2);
        let texts: Vec<String> = log.history(10, 0, false).await.into_iter().map(|e| e.query_text).collect();
        assert_eq!(texts, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn stats_aggregate() {
        let log = MemoryQueryLog::new();
        assert_eq!(log.stats().await, QueryStats::default());

        log.record(entry("ok", true, 10)).await;
        log.record(entry("ok", true, 30)).await;
        log.record(entry("bad", false, 20)).await;
        log.record(entry("ok", true, 40)).await;

        let stats = log.stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.average_execution_time_ms, 25.0);
        assert_eq!(stats.max_execution_time_ms, 40);
        assert_eq!(stats.query_types.get("sql"), Some(&4));
    }

    #[tokio::test]
    async fn disabled_log_keeps_nothing() {
        let log = query_log_for(false);
        log.record(entry("x", true, 1)).await;
        assert!(log.history(10, 0, false).await.is_empty());
        assert_eq!(log.stats().await.total, 0);
    }
}
