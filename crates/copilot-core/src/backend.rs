//! Supported warehouse backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four supported warehouse engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL row store
    Postgres,

    /// Google BigQuery columnar cloud warehouse
    BigQuery,

    /// Amazon Redshift MPP cluster
    Redshift,

    /// Snowflake elastic cloud warehouse
    Snowflake,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Postgres,
        BackendKind::BigQuery,
        BackendKind::Snowflake,
        BackendKind::Redshift,
    ];

    /// Canonical type tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::BigQuery => "bigquery",
            Self::Redshift => "redshift",
            Self::Snowflake => "snowflake",
        }
    }

    /// Display name used in logs and messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::BigQuery => "BigQuery",
            Self::Redshift => "Redshift",
            Self::Snowflake => "Snowflake",
        }
    }

    /// Cargo feature that compiles this backend's SDK
    pub fn feature(&self) -> &'static str {
        self.as_str()
    }

    /// Configuration keys that must be present and non-empty
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["host", "port", "database", "user", "password"],
            Self::BigQuery => &["project_id"],
            Self::Snowflake => &["account", "user", "password"],
            Self::Redshift => &["host", "database", "user", "password"],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised backend type tag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported database type: {0}")]
pub struct UnsupportedBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnsupportedBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "bigquery" | "bq" => Ok(Self::BigQuery),
            "redshift" => Ok(Self::Redshift),
            "snowflake" => Ok(Self::Snowflake),
            _ => Err(UnsupportedBackend(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("postgres".parse::<BackendKind>(), Ok(BackendKind::Postgres));
        assert_eq!("PostgreSQL".parse::<BackendKind>(), Ok(BackendKind::Postgres));
        assert_eq!("bq".parse::<BackendKind>(), Ok(BackendKind::BigQuery));
        assert_eq!(" Snowflake ".parse::<BackendKind>(), Ok(BackendKind::Snowflake));
        assert_eq!("redshift".parse::<BackendKind>(), Ok(BackendKind::Redshift));
    }

    #[test]
    fn rejects_unknown_tags() {
        let err = "mysql".parse::<BackendKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported database type: mysql");
    }

    #[test]
    fn canonical_tags_roundtrip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>(), Ok(kind));
        }
    }
}
