//! Test fixtures for connector integration tests
//!
//! Reusable table definitions and result sets shaped like what a small
//! analytics warehouse returns.

#![allow(dead_code)]

use copilot_core::{
    ColumnDescriptor, ConnectionParams, LogicalType, Relationship, ResultTable, SchemaSnapshot,
    TableSchema,
};
use serde_json::{json, Value};

/// A typical users table
pub fn users_schema() -> TableSchema {
    TableSchema::from_columns(vec![
        ColumnDescriptor::new("id", "integer", LogicalType::Int)
            .with_nullable(false)
            .with_primary_key(true),
        ColumnDescriptor::new("email", "character varying(255)", LogicalType::String)
            .with_nullable(false)
            .with_unique_key(true),
        ColumnDescriptor::new("name", "text", LogicalType::String),
        ColumnDescriptor::new("created_at", "timestamp without time zone", LogicalType::Timestamp)
            .with_nullable(false)
            .with_default(Some("now()".into())),
    ])
    .with_table_type(Some("BASE TABLE".into()))
}

/// An orders table referencing users
pub fn orders_schema() -> TableSchema {
    let mut user_id = ColumnDescriptor::new("user_id", "integer", LogicalType::Int).with_nullable(false);
    user_id.foreign_keys.push("public.users.id".into());

    TableSchema::from_columns(vec![
        ColumnDescriptor::new("id", "integer", LogicalType::Int)
            .with_nullable(false)
            .with_primary_key(true),
        user_id,
        ColumnDescriptor::new(
            "total_amount",
            "numeric(10,2)",
            LogicalType::Decimal {
                precision: Some(10),
                scale: Some(2),
            },
        )
        .with_nullable(false),
        ColumnDescriptor::new("status", "text", LogicalType::String).with_nullable(false),
    ])
    .with_table_type(Some("BASE TABLE".into()))
}

/// A view with columns declared out of alphabetical order
pub fn unsorted_view_schema() -> TableSchema {
    TableSchema::from_columns(vec![
        ColumnDescriptor::new("zeta", "text", LogicalType::String),
        ColumnDescriptor::new("alpha", "integer", LogicalType::Int),
        ColumnDescriptor::new("mid", "date", LogicalType::Date),
    ])
    .with_table_type(Some("VIEW".into()))
}

pub fn orders_to_users() -> Relationship {
    Relationship::new("public.orders", "user_id", "public.users", "id")
}

/// Two-level catalog in the row-store shape
pub fn shop_snapshot() -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::new();
    snapshot.insert_table(&["public"], "users", users_schema());
    snapshot.insert_table(&["public"], "orders", orders_schema());
    snapshot.insert_table(&["reporting"], "daily_orders", unsorted_view_schema());
    snapshot
}

/// `n` numbered rows with an id and a label
pub fn numbered_rows(n: usize) -> ResultTable {
    let rows: Vec<Vec<Value>> = (1..=n)
        .map(|i| vec![json!(i), json!(format!("row-{}", i))])
        .collect();
    ResultTable::from_rows(vec!["id".into(), "label".into()], rows)
}

pub fn params(pairs: &[(&str, &str)]) -> ConnectionParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Complete but unreachable row-store parameters
pub fn postgres_params() -> ConnectionParams {
    params(&[
        ("host", "127.0.0.1"),
        ("port", "1"),
        ("database", "shop"),
        ("user", "reader"),
        ("password", "secret"),
    ])
}
