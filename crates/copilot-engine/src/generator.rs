//! Text-generation collaborator and the prompt helpers around it
//!
//! The engine treats the generator as a black box: it hands over the user's
//! question with a rendered schema and gets back SQL text, and later hands
//! over the results and gets back a narrative. Nothing here depends on how
//! the text is produced.

use copilot_core::{BackendKind, ResultTable, SchemaSnapshot};
use serde_json::Value;

/// Most columns listed per table in a schema context
const MAX_CONTEXT_COLUMNS: usize = 10;

/// Produces SQL from natural language and narrative from results
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// SQL for `query`, or `None` when no statement could be produced
    async fn generate_sql(
        &self,
        query: &str,
        schema_context: &SchemaSnapshot,
        database_type: BackendKind,
    ) -> Option<String>;

    /// Narrative summary of `results`
    async fn generate_insights(&self, query: &str, results: &ResultTable, sql: &str) -> String;
}

/// Normalize raw generator output into a single statement
///
/// Strips a surrounding markdown code fence (with or without the `sql`
/// tag), trims whitespace and makes sure the statement ends with `;`.
pub fn clean_sql_output(raw: &str) -> String {
    let mut sql = raw.trim();
    if let Some(rest) = sql.strip_prefix("```sql") {
        sql = rest;
    }
    if let Some(rest) = sql.strip_prefix("```") {
        sql = rest;
    }
    if let Some(rest) = sql.strip_suffix("```") {
        sql = rest;
    }

    let sql = sql.trim();
    if sql.is_empty() || sql.ends_with(';') {
        sql.to_string()
    } else {
        format!("{};", sql)
    }
}

/// Render a snapshot as prompt context
///
/// One block per table: `Table: <name>` followed by up to ten
/// `  column: type (nullable|not null)` lines, with ` - description`
/// appended when the column has one.
pub fn format_schema_context(snapshot: &SchemaSnapshot) -> String {
    if snapshot.is_empty() {
        return "No schema information available.".to_string();
    }

    let blocks: Vec<String> = snapshot
        .tables()
        .into_iter()
        .filter(|(_, table)| !table.columns.is_empty())
        .map(|(name, table)| {
            let lines: Vec<String> = table
                .columns
                .iter()
                .take(MAX_CONTEXT_COLUMNS)
                .map(|col| {
                    let nullable = if col.nullable { "nullable" } else { "not null" };
                    let mut line = format!("  {}: {} ({})", col.name, col.data_type, nullable);
                    if let Some(description) = col.description.as_deref().filter(|d| !d.is_empty()) {
                        line.push_str(" - ");
                        line.push_str(description);
                    }
                    line
                })
                .collect();
            format!("Table: {}\n{}", name, lines.join("\n"))
        })
        .collect();

    if blocks.is_empty() {
        "No tables found in schema.".to_string()
    } else {
        blocks.join("\n\n")
    }
}

/// Compact description of a result set for an insights prompt
pub fn summarize_results(results: &ResultTable) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut parts = vec![format!(
        "Results: {} rows, {} columns",
        results.row_count(),
        results.columns.len()
    )];

    let shown: Vec<&str> = results.columns.iter().take(5).map(String::as_str).collect();
    let ellipsis = if results.columns.len() > 5 { "..." } else { "" };
    parts.push(format!("Columns: {}{}", shown.join(", "), ellipsis));

    let sample: Vec<_> = results.records().into_iter().take(3).map(Value::Object).collect();
    parts.push(format!("Sample data: {}", Value::Array(sample)));

    let stats: Vec<String> = results
        .columns
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| numeric_stats(results, idx).map(|s| (name, s)))
        .take(3)
        .map(|(name, (mean, min, max))| {
            format!("{}: mean={:.2}, min={:.2}, max={:.2}", name, mean, min, max)
        })
        .collect();
    if !stats.is_empty() {
        parts.push(format!("Numeric stats: {}", stats.join("; ")));
    }

    parts.join(". ")
}

/// Mean, min and max of a column whose non-null cells are all numbers
fn numeric_stats(results: &ResultTable, column: usize) -> Option<(f64, f64, f64)> {
    let mut values = Vec::new();
    for row in &results.rows {
        match row.get(column) {
            Some(Value::Null) | None => {}
            Some(Value::Number(n)) => values.push(n.as_f64()?),
            Some(_) => return None,
        }
    }
    if values.is_empty() {
        return None;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean, min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{ColumnDescriptor, LogicalType, TableSchema};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn clean_sql_strips_fences() {
        assert_eq!(clean_sql_output("```sql\nSELECT 1\n```"), "SELECT 1;");
        assert_eq!(clean_sql_output("```\nselect * from t;\n```"), "select * from t;");
        assert_eq!(clean_sql_output("  SELECT 2  "), "SELECT 2;");
        assert_eq!(clean_sql_output("   "), "");
    }

    #[test]
    fn schema_context_lists_columns() {
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(
            &["public"],
            "orders",
            TableSchema::from_columns(vec![
                ColumnDescriptor::new("id", "integer", LogicalType::Int).with_nullable(false),
                ColumnDescriptor::new("note", "text", LogicalType::String)
                    .with_description(Some("free text".into())),
            ]),
        );

        assert_eq!(
            format_schema_context(&snapshot),
            "Table: public.orders\n  id: integer (not null)\n  note: text (nullable) - free text"
        );
    }

    #[test]
    fn schema_context_caps_columns_and_handles_empty() {
        assert_eq!(
            format_schema_context(&SchemaSnapshot::new()),
            "No schema information available."
        );

        let mut namespaces_only = SchemaSnapshot::new();
        namespaces_only.ensure_namespace(&["empty_dataset"]);
        assert_eq!(format_schema_context(&namespaces_only), "No tables found in schema.");

        let wide = TableSchema::from_columns(
            (0..15)
                .map(|i| ColumnDescriptor::new(format!("c{}", i), "int", LogicalType::Int))
                .collect(),
        );
        let mut snapshot = SchemaSnapshot::new();
        snapshot.insert_table(&["s"], "wide", wide);
        let rendered = format_schema_context(&snapshot);
        assert_eq!(rendered.lines().count(), 1 + MAX_CONTEXT_COLUMNS);
        assert!(!rendered.contains("c10"));
    }

    #[test]
    fn summary_reports_shape_and_stats() {
        let results = ResultTable::from_rows(
            vec!["region".into(), "total".into()],
            vec![
                vec![json!("east"), json!(10)],
                vec![json!("west"), json!(30)],
                vec![json!("north"), Value::Null],
            ],
        );

        let summary = summarize_results(&results);
        assert!(summary.starts_with("Results: 3 rows, 2 columns. Columns: region, total. "));
        assert!(summary.ends_with("Numeric stats: total: mean=20.00, min=10.00, max=30.00"));
        assert_eq!(summarize_results(&ResultTable::new(vec!["a".into()])), "No results found.");
    }
}
