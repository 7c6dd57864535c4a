//! Dialect helpers: limit injection, identifier quoting and name parsing

use crate::guard::words;

/// How a backend bounds an arbitrary query's row count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// Append ` LIMIT n` unless the statement already has a LIMIT clause
    Trailing,

    /// Always wrap: `SELECT * FROM (<sql>) AS subquery LIMIT n`
    ///
    /// Used by the row store, where arbitrary statements may not accept a
    /// trailing clause (e.g. a trailing `FOR UPDATE` or `OFFSET`).
    WrapSubquery,
}

/// Strip surrounding whitespace and trailing statement terminators
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Whether `sql` contains `LIMIT` as a whole word, in any case
pub fn has_limit_clause(sql: &str) -> bool {
    words(sql).contains("LIMIT")
}

/// Bound `sql` to `limit` rows using `style`
///
/// `None` and `Some(0)` leave the statement unbounded (apart from the
/// terminator being stripped).
pub fn apply_limit(sql: &str, limit: Option<usize>, style: LimitStyle) -> String {
    let body = strip_terminator(sql);
    match limit {
        Some(n) if n > 0 => match style {
            LimitStyle::Trailing if has_limit_clause(body) => body.to_string(),
            LimitStyle::Trailing => format!("{} LIMIT {}", body, n),
            LimitStyle::WrapSubquery => {
                format!("SELECT * FROM ({}) AS subquery LIMIT {}", body, n)
            }
        },
        _ => body.to_string(),
    }
}

/// Recognise a statement produced by [`apply_limit`]
///
/// Returns the inner statement and the injected limit for both the wrapped
/// and trailing shapes.
pub fn split_injected_limit(sql: &str) -> Option<(&str, usize)> {
    let sql = strip_terminator(sql);

    let (head, count) = sql.rsplit_once(" LIMIT ")?;
    let limit: usize = count.trim().parse().ok()?;

    if let Some(inner) = head
        .strip_prefix("SELECT * FROM (")
        .and_then(|rest| rest.strip_suffix(") AS subquery"))
    {
        return Some((inner, limit));
    }

    Some((head, limit))
}

/// Quote an identifier with `quote`, doubling embedded quote characters
pub fn quote_ident(ident: &str, quote: char) -> String {
    let doubled: String = ident
        .chars()
        .flat_map(|c| if c == quote { vec![c, c] } else { vec![c] })
        .collect();
    format!("{quote}{doubled}{quote}")
}

/// Escape a value for a single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Split a dotted table name into at most `max_parts` parts
///
/// Surrounding quotes and backticks on each part are removed. Extra leading
/// segments are kept together in the first part.
pub fn split_qualified(name: &str, max_parts: usize) -> Vec<String> {
    let mut parts: Vec<String> = name
        .rsplitn(max_parts.max(1), '.')
        .map(|p| p.trim().trim_matches(|c| c == '"' || c == '`').to_string())
        .collect();
    parts.reverse();
    parts
}

/// Collapse runs of whitespace so equivalent statements compare equal
pub fn normalize_whitespace(sql: &str) -> String {
    strip_terminator(sql)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trailing_limit_is_appended_once() {
        assert_eq!(
            apply_limit("SELECT * FROM t;", Some(5), LimitStyle::Trailing),
            "SELECT * FROM t LIMIT 5"
        );
        assert_eq!(
            apply_limit("select * from t limit 10", Some(5), LimitStyle::Trailing),
            "select * from t limit 10"
        );
    }

    #[test]
    fn limit_word_inside_identifier_does_not_count() {
        assert_eq!(
            apply_limit("SELECT credit_limit FROM accounts", Some(3), LimitStyle::Trailing),
            "SELECT credit_limit FROM accounts LIMIT 3"
        );
    }

    #[test]
    fn wrap_style_always_wraps() {
        assert_eq!(
            apply_limit("SELECT * FROM t LIMIT 50;", Some(5), LimitStyle::WrapSubquery),
            "SELECT * FROM (SELECT * FROM t LIMIT 50) AS subquery LIMIT 5"
        );
    }

    #[test]
    fn zero_or_absent_limit_leaves_query_unbounded() {
        for style in [LimitStyle::Trailing, LimitStyle::WrapSubquery] {
            assert_eq!(apply_limit(" SELECT 1 ; ", None, style), "SELECT 1");
            assert_eq!(apply_limit("SELECT 1", Some(0), style), "SELECT 1");
        }
    }

    #[test]
    fn injected_limits_are_recognised() {
        assert_eq!(
            split_injected_limit("SELECT * FROM (SELECT a FROM t) AS subquery LIMIT 7"),
            Some(("SELECT a FROM t", 7))
        );
        assert_eq!(
            split_injected_limit("SELECT a FROM t LIMIT 3"),
            Some(("SELECT a FROM t", 3))
        );
        assert_eq!(split_injected_limit("SELECT a FROM t"), None);
        assert_eq!(split_injected_limit("SELECT a FROM t LIMIT n"), None);
    }

    #[test]
    fn identifier_quoting() {
        assert_eq!(quote_ident("users", '"'), "\"users\"");
        assert_eq!(quote_ident("we\"ird", '"'), "\"we\"\"ird\"");
        assert_eq!(quote_ident("my-project", '`'), "`my-project`");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn qualified_names() {
        assert_eq!(split_qualified("db.schema.table", 3), vec!["db", "schema", "table"]);
        assert_eq!(split_qualified("schema.table", 3), vec!["schema", "table"]);
        assert_eq!(split_qualified("table", 3), vec!["table"]);
        assert_eq!(split_qualified("a.b.c", 2), vec!["a.b", "c"]);
        assert_eq!(split_qualified("\"Sales\".\"Orders\"", 2), vec!["Sales", "Orders"]);
    }

    #[test]
    fn whitespace_normalization() {
        assert_eq!(normalize_whitespace("SELECT *\n  FROM   t ;"), "SELECT * FROM t");
    }
}
