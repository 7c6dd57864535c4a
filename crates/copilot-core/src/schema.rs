//! Schema types and canonical type system

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Portable logical type system
///
/// Maps warehouse-specific types to a common representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogicalType {
    /// Boolean type
    Bool,

    /// Integer type (any precision)
    Int,

    /// Floating point (any precision)
    Float,

    /// Decimal with precision and scale
    Decimal {
        precision: Option<u16>,
        scale: Option<u16>,
    },

    /// String/text type
    String,

    /// Date (no time component)
    Date,

    /// Timestamp (with time component)
    Timestamp,

    /// JSON/Variant type
    Json,

    /// Structured type with named fields
    Struct {
        fields: Vec<ColumnDescriptor>,
    },

    /// Array type
    Array {
        element_type: Box<LogicalType>,
    },

    /// Unknown type (cannot infer)
    Unknown,
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Decimal { precision, scale } => {
                match (precision, scale) {
                    (Some(p), Some(s)) => write!(f, "DECIMAL({}, {})", p, s),
                    (Some(p), None) => write!(f, "DECIMAL({})", p),
                    _ => write!(f, "DECIMAL"),
                }
            }
            Self::String => write!(f, "STRING"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
            Self::Struct { .. } => write!(f, "STRUCT"),
            Self::Array { element_type } => write!(f, "ARRAY<{}>", element_type),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A column as reported by a warehouse catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Declared type, verbatim from the backend
    #[serde(rename = "type")]
    pub data_type: String,

    /// Portable type derived from `data_type`
    pub logical_type: LogicalType,

    /// Whether the column accepts NULL
    pub nullable: bool,

    /// Default expression, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub primary_key: bool,

    #[serde(default)]
    pub unique_key: bool,

    /// Column comment/description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,

    /// Referenced `table.column` targets when this column is a foreign key
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<String>,
}

impl ColumnDescriptor {
    /// Create a nullable column with no key flags
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        logical_type: LogicalType,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            logical_type,
            nullable: true,
            default: None,
            primary_key: false,
            unique_key: false,
            description: None,
            max_length: None,
            precision: None,
            scale: None,
            foreign_keys: Vec::new(),
        }
    }

    /// Set nullability
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set default expression
    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn with_unique_key(mut self, unique_key: bool) -> Self {
        self.unique_key = unique_key;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.is_empty());
        self
    }

    /// Set character length and numeric precision/scale
    pub fn with_dimensions(
        mut self,
        max_length: Option<i64>,
        precision: Option<i64>,
        scale: Option<i64>,
    ) -> Self {
        self.max_length = max_length;
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// One table's entry in a [`SchemaSnapshot`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in native ordinal order
    pub columns: Vec<ColumnDescriptor>,

    /// Backend table kind (BASE TABLE, VIEW, EXTERNAL, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_type: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,
}

impl TableSchema {
    /// Create a table schema from ordered columns
    pub fn from_columns(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            table_type: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_table_type(mut self, table_type: Option<String>) -> Self {
        self.table_type = table_type;
        self
    }

    /// Find a column by name
    pub fn find_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names in ordinal order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A node in the namespace tree: either a nested namespace or a table leaf
///
/// Untagged on the wire. A table is the only node whose `columns` entry is
/// a list, so a namespace holding a child named `columns` still reads back
/// as a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaNode {
    Table(TableSchema),
    Namespace(BTreeMap<String, SchemaNode>),
}

impl SchemaNode {
    fn namespace_mut(&mut self) -> &mut BTreeMap<String, SchemaNode> {
        if let SchemaNode::Table(_) = self {
            *self = SchemaNode::Namespace(BTreeMap::new());
        }
        match self {
            SchemaNode::Namespace(children) => children,
            SchemaNode::Table(_) => unreachable!("node was converted to a namespace above"),
        }
    }

    fn collect_tables<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a TableSchema)>) {
        match self {
            SchemaNode::Table(table) => out.push((prefix.to_string(), table)),
            SchemaNode::Namespace(children) => {
                for (name, child) in children {
                    child.collect_tables(&format!("{}.{}", prefix, name), out);
                }
            }
        }
    }
}

/// Point-in-time metadata read of a warehouse
///
/// Keyed namespace-then-table. The depth depends on the backend:
/// `schema → table` for PostgreSQL and Redshift, `dataset → table` for
/// BigQuery, `database → schema → table` for Snowflake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSnapshot {
    root: BTreeMap<String, SchemaNode>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Make sure a (possibly empty) namespace exists at `path`
    pub fn ensure_namespace(&mut self, path: &[&str]) -> &mut BTreeMap<String, SchemaNode> {
        let mut level = &mut self.root;
        for segment in path {
            level = level
                .entry(segment.to_string())
                .or_insert_with(|| SchemaNode::Namespace(BTreeMap::new()))
                .namespace_mut();
        }
        level
    }

    /// Insert a table leaf under the namespace `path`
    pub fn insert_table(&mut self, path: &[&str], table: impl Into<String>, schema: TableSchema) {
        self.ensure_namespace(path)
            .insert(table.into(), SchemaNode::Table(schema));
    }

    /// Top-level namespace names
    pub fn namespaces(&self) -> Vec<&str> {
        self.root.keys().map(String::as_str).collect()
    }

    /// All tables with their dot-qualified names, depth first
    pub fn tables(&self) -> Vec<(String, &TableSchema)> {
        let mut out = Vec::new();
        for (name, node) in &self.root {
            node.collect_tables(name, &mut out);
        }
        out
    }

    pub fn table_count(&self) -> usize {
        self.tables().len()
    }

    /// Look up a table by its fully qualified dotted name
    pub fn table(&self, qualified: &str) -> Option<&TableSchema> {
        let mut parts = qualified.split('.').peekable();
        let mut level = &self.root;

        while let Some(part) = parts.next() {
            let last = parts.peek().is_none();
            match level.get(part)? {
                SchemaNode::Table(table) if last => return Some(table),
                SchemaNode::Namespace(children) if !last => level = children,
                _ => return None,
            }
        }

        None
    }

    /// Resolve a qualified or bare table name
    ///
    /// Qualified names are looked up exactly. A bare name is matched against
    /// the last segment of every table; the first match in namespace order
    /// wins, and ambiguity across namespaces is not reported.
    pub fn resolve(&self, name: &str) -> Option<(String, &TableSchema)> {
        if let Some(table) = self.table(name) {
            return Some((name.to_string(), table));
        }
        if name.contains('.') {
            return None;
        }
        self.tables()
            .into_iter()
            .find(|(qualified, _)| qualified.rsplit('.').next() == Some(name))
    }
}

/// Time partitioning of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    /// Partition granularity or kind (DAY, HOUR, RANGE, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Partition column; absent for ingestion-time partitioning
    pub field: Option<String>,
}

/// Backend-specific physical layout hints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalLayout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<Partitioning>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clustering_fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_key: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort_keys: Vec<String>,
}

impl PhysicalLayout {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A directed foreign-key edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl Relationship {
    pub fn new(
        from_table: impl Into<String>,
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            from_table: from_table.into(),
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: to_column.into(),
        }
    }
}

/// Single-table elaboration returned by `get_table_info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Fully qualified table name
    pub name: String,

    pub columns: Vec<ColumnDescriptor>,

    /// Best-effort row count; `None` when no strategy succeeded
    pub row_count: Option<u64>,

    /// Storage size in bytes, when the backend reports it
    pub size_bytes: Option<u64>,

    pub table_type: Option<String>,

    pub created: Option<String>,

    pub modified: Option<String>,

    #[serde(default)]
    pub layout: PhysicalLayout,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<Relationship>,
}

impl TableDescriptor {
    /// Build a descriptor from a snapshot entry, with no live statistics
    pub fn from_schema(name: impl Into<String>, schema: &TableSchema) -> Self {
        Self {
            name: name.into(),
            columns: schema.columns.clone(),
            table_type: schema.table_type.clone(),
            indexes: schema.indexes.clone(),
            ..Self::default()
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn column(name: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(name, "integer", LogicalType::Int)
    }

    #[test]
    fn logical_type_display() {
        assert_eq!(LogicalType::Bool.to_string(), "BOOL");
        assert_eq!(
            LogicalType::Decimal { precision: Some(10), scale: Some(2) }.to_string(),
            "DECIMAL(10, 2)"
        );
        assert_eq!(
            LogicalType::Array { element_type: Box::new(LogicalType::String) }.to_string(),
            "ARRAY<STRING>"
        );
    }

    #[test]
    fn table_schema_keeps_column_order() {
        let table = TableSchema::from_columns(vec![column("zeta"), column("alpha"), column("mid")]);

        assert_eq!(table.column_names(), vec!["zeta", "alpha", "mid"]);
        assert!(table.find_column("alpha").is_some());
        assert!(table.find_column("nonexistent").is_none());
    }

    #[test]
    fn snapshot_nesting_and_lookup() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(&["analytics", "public"], "users", TableSchema::from_columns(vec![column("id")]));
        snapshot.insert_table(&["analytics", "staging"], "events", TableSchema::default());
        snapshot.ensure_namespace(&["analytics", "empty"]);

        assert_eq!(snapshot.namespaces(), vec!["analytics"]);
        assert_eq!(snapshot.table_count(), 2);
        assert!(snapshot.table("analytics.public.users").is_some());
        assert!(snapshot.table("analytics.public").is_none());
        assert!(snapshot.table("analytics.public.users.id").is_none());

        let names: Vec<String> = snapshot.tables().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["analytics.public.users", "analytics.staging.events"]);
    }

    #[test]
    fn bare_name_resolves_to_first_namespace_match() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(&["sales"], "orders", TableSchema::from_columns(vec![column("b")]));
        snapshot.insert_table(&["archive"], "orders", TableSchema::from_columns(vec![column("a")]));

        let (name, table) = snapshot.resolve("orders").unwrap();
        assert_eq!(name, "archive.orders");
        assert_eq!(table.column_names(), vec!["a"]);

        assert_eq!(snapshot.resolve("sales.orders").unwrap().0, "sales.orders");
        assert!(snapshot.resolve("missing").is_none());
        assert!(snapshot.resolve("nope.orders").is_none());
    }

    #[test]
    fn snapshot_serializes_as_nested_mapping() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(&["public"], "t", TableSchema::from_columns(vec![column("id")]));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["public"]["t"]["columns"][0]["name"], "id");
        assert_eq!(json["public"]["t"]["columns"][0]["type"], "integer");

        let back: SchemaSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn namespace_with_table_named_columns_round_trips() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(&["meta"], "columns", TableSchema::from_columns(vec![column("name")]));
        snapshot.insert_table(&["meta"], "tables", TableSchema::from_columns(vec![column("oid")]));
        snapshot.insert_table(&["db", "columns"], "history", TableSchema::from_columns(vec![column("id")]));
        snapshot.ensure_namespace(&["empty"]);

        let json = serde_json::to_value(&snapshot).unwrap();
        let back: SchemaSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.table("meta.columns").unwrap().column_names(), vec!["name"]);
        assert_eq!(back.table("db.columns.history").unwrap().column_names(), vec!["id"]);
        assert_eq!(back.namespaces(), vec!["db", "empty", "meta"]);
        assert_eq!(back.table_count(), 3);
    }

    #[test]
    fn descriptor_from_schema() {
        let schema = TableSchema::from_columns(vec![column("id")])
            .with_table_type(Some("BASE TABLE".to_string()));
        let descriptor = TableDescriptor::from_schema("public.t", &schema);

        assert_eq!(descriptor.name, "public.t");
        assert_eq!(descriptor.column_names(), vec!["id"]);
        assert_eq!(descriptor.row_count, None);
        assert!(descriptor.layout.is_empty());
    }
}
