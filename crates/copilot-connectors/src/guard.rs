//! Lexical read-only guard applied before any statement reaches a backend
//!
//! The guard is deliberately coarse. It tokenizes the statement into words
//! and rejects it when any deny-listed keyword appears as a whole word,
//! anywhere, including inside string literals and comments. It is not a SQL
//! parser: obfuscated or dialect-specific mutations that avoid the listed
//! keywords are not caught.

use copilot_core::ValidationResult;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Mutating keywords rejected on every backend
pub const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE",
];

/// Deny list for the MPP cluster, which also loads data with `COPY`
pub const MPP_DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "COPY",
];

/// Statement prefixes accepted as reads
const READ_PREFIXES: &[&str] = &["SELECT", "WITH"];

pub const ONLY_SELECT_MESSAGE: &str = "Only SELECT queries are allowed";

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("static word pattern compiles"))
}

/// Uppercased whole words of `sql`
pub(crate) fn words(sql: &str) -> HashSet<String> {
    word_pattern()
        .find_iter(sql)
        .map(|m| m.as_str().to_uppercase())
        .collect()
}

/// Keyword deny-list plus statement-shape check
#[derive(Debug, Clone, Copy)]
pub struct QueryGuard {
    deny_list: &'static [&'static str],
}

impl QueryGuard {
    /// Guard with the common deny list
    pub const fn standard() -> Self {
        Self {
            deny_list: DESTRUCTIVE_KEYWORDS,
        }
    }

    /// Guard with the MPP deny list (adds `COPY`)
    pub const fn mpp() -> Self {
        Self {
            deny_list: MPP_DESTRUCTIVE_KEYWORDS,
        }
    }

    pub fn deny_list(&self) -> &'static [&'static str] {
        self.deny_list
    }

    /// Validate a statement
    ///
    /// Keywords are checked in deny-list order and the first hit is
    /// reported. Only then is the statement shape checked: after trimming
    /// it must start with `SELECT` or `WITH`, case-insensitively.
    pub fn check(&self, sql: &str) -> ValidationResult {
        let found = words(sql);
        if let Some(keyword) = self.deny_list.iter().find(|k| found.contains(**k)) {
            return ValidationResult::invalid(format!(
                "Query contains potentially destructive operation: {}",
                keyword
            ));
        }

        let head = sql.trim_start().to_uppercase();
        if !READ_PREFIXES.iter().any(|prefix| head.starts_with(prefix)) {
            return ValidationResult::invalid(ONLY_SELECT_MESSAGE);
        }

        ValidationResult::valid()
    }
}

impl Default for QueryGuard {
    fn default() -> Self {
        Self::standard()
    }
}
