use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use copilot_connectors::ConnectorFactory;
use copilot_core::{BackendKind, ResultTable, Settings, TableDescriptor};
use copilot_engine::{QueryPipeline, QueryRequest, SchemaOverview};

/// Config file picked up from the working directory when --config is absent
const DEFAULT_CONFIG: &str = "warehouse-copilot.toml";

/// Warehouse Copilot - read-only sessions against data warehouses
#[derive(Parser)]
#[command(name = "warehouse-copilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: warehouse-copilot.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend to use instead of the configured database_type
    #[arg(short, long, global = true)]
    backend: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every accessible table
    Tables,

    /// Show the full catalog
    Schema {
        /// Include foreign-key relationships
        #[arg(short, long)]
        relationships: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Describe one table (qualified or bare name)
    Describe {
        table: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check that a statement is read-only
    Validate { sql: String },

    /// Run a read query
    Run {
        sql: String,

        /// Maximum rows to return (capped by max_query_rows)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the execution plan and cost estimate without running the query
    Plan { sql: String },

    /// List foreign-key relationships
    Relationships,

    /// Check connection settings for every backend without connecting
    CheckConfig,

    /// List supported backends and whether their support is compiled in
    Backends,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.exists()),
    };
    let settings = Settings::load(config_path.as_deref())?;
    init_tracing(&settings, cli.verbose);
    tracing::debug!(
        database_type = %settings.database_type,
        max_query_rows = settings.limits.max_query_rows,
        "settings loaded"
    );

    if cli.verbose {
        match &config_path {
            Some(path) => eprintln!("{} {}", "Using config:".cyan(), path.display()),
            None => eprintln!("{}", "No config file found, using defaults".yellow()),
        }
    }

    let pipeline = QueryPipeline::from_settings(settings.clone());
    let backend = cli.backend.as_deref();

    match cli.command {
        Commands::Tables => tables_command(&pipeline, backend).await,
        Commands::Schema {
            relationships,
            json,
        } => schema_command(&pipeline, backend, relationships, json).await,
        Commands::Describe { table, json } => describe_command(&pipeline, backend, &table, json).await,
        Commands::Validate { sql } => validate_command(&pipeline, backend, sql).await,
        Commands::Run { sql, limit, json } => run_command(&pipeline, backend, sql, limit, json).await,
        Commands::Plan { sql } => plan_command(&pipeline, backend, sql).await,
        Commands::Relationships => relationships_command(&pipeline, backend).await,
        Commands::CheckConfig => check_config_command(&settings),
        Commands::Backends => backends_command(&settings),
    }
}

/// Install the stderr subscriber: `--verbose` wins, then RUST_LOG, then config
fn init_tracing(settings: &Settings, verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.logging.log_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn tables_command(pipeline: &QueryPipeline, backend: Option<&str>) -> Result<()> {
    let tables = pipeline.tables(backend).await?;
    for table in &tables {
        println!("{}", table);
    }
    eprintln!("{} {} tables", "Found".green(), tables.len());
    Ok(())
}

async fn schema_command(
    pipeline: &QueryPipeline,
    backend: Option<&str>,
    relationships: bool,
    json: bool,
) -> Result<()> {
    let overview = pipeline.schema(backend, relationships).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
    } else {
        print_schema(&overview);
    }
    Ok(())
}

async fn describe_command(
    pipeline: &QueryPipeline,
    backend: Option<&str>,
    table: &str,
    json: bool,
) -> Result<()> {
    let info = pipeline.describe(backend, table).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_table_info(&info);
    }
    Ok(())
}

/// A rejected statement is reported, not treated as a failure
async fn validate_command(pipeline: &QueryPipeline, backend: Option<&str>, sql: String) -> Result<()> {
    let request = with_backend(QueryRequest::sql(sql), backend);
    let verdict = pipeline.validate(&request).await;
    if verdict.is_valid {
        println!("{}", "✓ Query is valid".green().bold());
    } else {
        println!(
            "{} {}",
            "✗ Query rejected:".red().bold(),
            verdict.error_message.unwrap_or_default()
        );
        for fix in &verdict.suggested_fixes {
            println!("  {} {}", "hint:".yellow(), fix);
        }
    }
    Ok(())
}

async fn run_command(
    pipeline: &QueryPipeline,
    backend: Option<&str>,
    sql: String,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut request = with_backend(QueryRequest::sql(sql), backend);
    request.limit = limit;

    let response = pipeline.execute(&request).await;
    if !response.success {
        anyhow::bail!(response.error.unwrap_or_else(|| "query failed".to_string()));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else if let Some(results) = &response.results {
        let rows = results
            .data
            .iter()
            .map(|record| {
                results
                    .columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();
        print_result_table(&ResultTable::from_rows(results.columns.clone(), rows));
        eprintln!(
            "{} {} rows in {} ms",
            "Returned".green(),
            results.total_rows,
            response.execution_time_ms
        );
    }
    Ok(())
}

async fn plan_command(pipeline: &QueryPipeline, backend: Option<&str>, sql: String) -> Result<()> {
    let request = with_backend(QueryRequest::sql(sql), backend);
    let plan = pipeline.plan(&request).await?;

    println!("{}", "Plan".bold());
    println!("{}", plan.plan);
    println!();
    println!("{} ({})", "Estimated cost".bold(), plan.estimated_cost.backend);
    for (key, value) in &plan.estimated_cost.details {
        println!("  {}: {}", key.cyan(), value);
    }
    Ok(())
}

async fn relationships_command(pipeline: &QueryPipeline, backend: Option<&str>) -> Result<()> {
    let relationships = pipeline.relationships(backend).await?;
    if relationships.is_empty() {
        println!("{}", "No foreign-key relationships found".yellow());
    }
    for r in &relationships {
        println!("{}.{} -> {}.{}", r.from_table, r.from_column, r.to_table, r.to_column);
    }
    Ok(())
}

fn with_backend(request: QueryRequest, backend: Option<&str>) -> QueryRequest {
    match backend {
        Some(backend) => request.with_database_type(backend),
        None => request,
    }
}

fn check_config_command(settings: &Settings) -> Result<()> {
    println!(
        "{} {}",
        "Default backend:".bold(),
        settings.database_type.cyan()
    );

    let mut default_ok = false;
    for kind in BackendKind::ALL {
        let params = settings.connection_params(kind);
        let (ok, message) = ConnectorFactory::validate_config(kind.as_str(), &params);
        let marker = if ok { "✓".green() } else { "✗".red() };
        println!("  {} {:<10} {}", marker, kind.as_str(), message);

        if settings.database_type.parse::<BackendKind>().ok() == Some(kind) {
            default_ok = ok;
        }
    }

    if !default_ok {
        anyhow::bail!(
            "Configuration for default backend '{}' is incomplete",
            settings.database_type
        );
    }
    Ok(())
}

fn backends_command(settings: &Settings) -> Result<()> {
    for kind in BackendKind::ALL {
        let compiled = match kind {
            BackendKind::Postgres => cfg!(feature = "postgres"),
            BackendKind::BigQuery => cfg!(feature = "bigquery"),
            BackendKind::Snowflake => cfg!(feature = "snowflake"),
            BackendKind::Redshift => cfg!(feature = "redshift"),
        };
        let status = if compiled {
            "compiled".green()
        } else {
            format!("not compiled (--features {})", kind.feature()).as_str().dimmed()
        };
        let default = if settings.database_type.parse::<BackendKind>().ok() == Some(kind) {
            " (default)".cyan().to_string()
        } else {
            String::new()
        };
        println!("{:<10} {:<12} {}{}", kind.as_str(), kind.display_name(), status, default);
    }
    Ok(())
}

fn print_schema(overview: &SchemaOverview) {
    println!(
        "{} {} ({} tables)",
        "Schema for".bold(),
        overview.database_type.cyan(),
        overview.table_count
    );

    for (name, table) in overview.tables.tables() {
        println!();
        println!("{}", name.bold());
        for col in &table.columns {
            let null = if col.nullable { "NULL" } else { "NOT NULL" };
            let key = if col.primary_key { " PK".yellow().to_string() } else { String::new() };
            println!("  {:<30} {:<30} {}{}", col.name, col.data_type, null.dimmed(), key);
        }
    }

    if !overview.relationships.is_empty() {
        println!();
        println!("{}", "Relationships".bold());
        for r in &overview.relationships {
            println!("  {}.{} -> {}.{}", r.from_table, r.from_column, r.to_table, r.to_column);
        }
    }
}

fn print_table_info(info: &TableDescriptor) {
    println!("{}", info.name.bold());
    if let Some(kind) = &info.table_type {
        println!("  {} {}", "type:".cyan(), kind);
    }
    if let Some(rows) = info.row_count {
        println!("  {} {}", "rows:".cyan(), rows);
    }
    if let Some(bytes) = info.size_bytes {
        println!("  {} {}", "bytes:".cyan(), bytes);
    }
    if let Some(created) = &info.created {
        println!("  {} {}", "created:".cyan(), created);
    }
    if let Some(modified) = &info.modified {
        println!("  {} {}", "modified:".cyan(), modified);
    }
    if let Some(partitioning) = &info.layout.partitioning {
        let field = partitioning.field.as_deref().unwrap_or("_PARTITIONTIME");
        println!("  {} {} on {}", "partitioned:".cyan(), partitioning.kind, field);
    }
    if !info.layout.clustering_fields.is_empty() {
        println!("  {} {}", "clustered by:".cyan(), info.layout.clustering_fields.join(", "));
    }
    if let Some(key) = &info.layout.distribution_key {
        println!("  {} {}", "distribution key:".cyan(), key);
    }
    if !info.layout.sort_keys.is_empty() {
        println!("  {} {}", "sort keys:".cyan(), info.layout.sort_keys.join(", "));
    }
    if !info.indexes.is_empty() {
        println!("  {} {}", "indexes:".cyan(), info.indexes.join(", "));
    }

    println!();
    for col in &info.columns {
        let null = if col.nullable { "NULL" } else { "NOT NULL" };
        println!("  {:<30} {:<30} {}", col.name, col.data_type, null.dimmed());
    }

    for fk in &info.foreign_keys {
        println!("  {} {} -> {}.{}", "fk:".yellow(), fk.from_column, fk.to_table, fk.to_column);
    }
}

/// Plain column-aligned rendering; long cells are cut at 40 characters
fn print_result_table(table: &ResultTable) {
    const MAX_WIDTH: usize = 40;

    let cell = |value: &serde_json::Value| -> String {
        let text = match value {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.chars().count() > MAX_WIDTH {
            let cut: String = text.chars().take(MAX_WIDTH - 3).collect();
            format!("{}...", cut)
        } else {
            text
        }
    };

    let rendered: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            rendered
                .iter()
                .filter_map(|row| row.get(i))
                .map(|c| c.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(name, w)| format!("{:<w$}", name, w = *w))
        .collect();
    println!("{}", header.join(" | ").bold());
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );

    for row in &rendered {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        println!("{}", line.join(" | "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn backend_flag_overrides_request() {
        let request = with_backend(QueryRequest::sql("SELECT 1"), Some("bq"));
        assert_eq!(request.database_type.as_deref(), Some("bq"));

        let request = with_backend(QueryRequest::sql("SELECT 1"), None);
        assert!(request.database_type.is_none());
    }
}
