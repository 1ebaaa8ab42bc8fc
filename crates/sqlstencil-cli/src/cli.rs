//! sqlstencil command line
//!
//! Renders, inspects and runs templated SQL documents.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use serde_json::Value as Json;
use sqlstencil_core::ResultSet;
use sqlstencil_query::{
    Criteria, ExecutionState, HttpBackend, QueryDefinition, ReconcileChange, StreamUpdate,
    StreamingClient, VariableResolver, reconcile_detailed, scan,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "sqlstencil", version, about = "Render and run templated SQL")]
struct Cli {
    /// Config file (defaults to <config dir>/sqlstencil/config.toml)
    #[arg(long, global = true, env = "SQLSTENCIL_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overriding the config file
    #[arg(long, global = true, env = "SQLSTENCIL_LOG")]
    log_filter: Option<String>,

    /// Also write JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a query to SQL
    Render(QueryArgs),
    /// List the variables a query references
    Scan {
        /// Query document (JSON) or plain SQL template
        query: PathBuf,
        /// Print the reconciled variable list as JSON instead of names
        #[arg(long)]
        reconcile: bool,
    },
    /// Report required variables without a value
    Missing(QueryArgs),
    /// Execute a query against the backend and print the result
    Execute {
        #[command(flatten)]
        query: QueryArgs,
        /// Backend base URL
        #[arg(long, env = "SQLSTENCIL_ENDPOINT")]
        endpoint: Option<String>,
        #[arg(long, default_value = "default")]
        connection: String,
        /// Session id (random when omitted)
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        flush_interval_ms: Option<u64>,
        /// Maximum rows to print
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Query document (JSON `{template, variables}`) or plain SQL template
    query: PathBuf,
    /// JSON file with criteria values keyed by variable name
    #[arg(long)]
    criteria: Option<PathBuf>,
    /// Criteria value as name=value (value parsed as JSON when possible)
    #[arg(long = "set", value_parser = parse_assignment)]
    set: Vec<(String, Json)>,
    /// Date used for today/now/yesterday (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,
}

impl QueryArgs {
    fn criteria(&self) -> Result<Criteria> {
        let mut criteria = match &self.criteria {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read criteria file: {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Criteria file is not a JSON object: {:?}", path))?
            }
            None => Criteria::new(),
        };
        criteria.extend(self.set.iter().cloned());
        Ok(criteria)
    }

    fn resolver(&self) -> VariableResolver {
        let resolver = VariableResolver::default();
        match self.today {
            Some(today) => resolver.with_today(today),
            None => resolver,
        }
    }
}

fn parse_assignment(raw: &str) -> Result<(String, Json), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Json::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Load a query document, bringing its variable list in line with the
/// template text.
fn load_query(path: &Path) -> Result<QueryDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query: {:?}", path))?;

    let mut query = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str::<QueryDefinition>(&text)
            .with_context(|| format!("Invalid query document: {:?}", path))?
    } else {
        QueryDefinition::new(text)
    };

    let reconciled = reconcile_detailed(&scan(&query.template), &query.variables);
    if reconciled.change != ReconcileChange::Unchanged {
        tracing::info!(change = ?reconciled.change, "variable list updated from template");
    }
    query.variables = reconciled.variables;
    Ok(query)
}

fn render(args: &QueryArgs) -> Result<()> {
    let query = load_query(&args.query)?;
    let resolver = args.resolver();
    let resolution = resolver.resolve_all(&query.variables, &args.criteria()?);
    let out = resolver.renderer().render(&query.template, &resolution.context);

    for warning in &resolution.warnings {
        eprintln!("warning: {}: {}", warning.name, warning.message);
    }
    if !out.unresolved.is_empty() {
        eprintln!("unresolved: {}", out.unresolved.join(", "));
    }
    println!("{}", out.sql);

    if let Some(error) = out.error {
        bail!("template failed to render: {}", error);
    }
    Ok(())
}

fn scan_command(path: &Path, reconcile: bool) -> Result<()> {
    let query = load_query(path)?;
    if reconcile {
        println!("{}", serde_json::to_string_pretty(&query.variables)?);
    } else {
        for name in scan(&query.template) {
            println!("{}", name);
        }
    }
    Ok(())
}

fn missing(args: &QueryArgs) -> Result<()> {
    let query = load_query(&args.query)?;
    let missing = args
        .resolver()
        .scan_missing(&query.template, &query.variables, &args.criteria()?);
    println!("{}", serde_json::to_string_pretty(&missing)?);
    Ok(())
}

async fn execute(
    args: &QueryArgs,
    config: &Config,
    endpoint: Option<String>,
    connection: &str,
    session: Option<String>,
    flush_interval_ms: Option<u64>,
    limit: usize,
) -> Result<()> {
    let query = load_query(&args.query)?;
    let criteria = args.criteria()?;

    let mut options = config.client_options();
    if let Some(ms) = flush_interval_ms {
        options = options.with_flush_interval(std::time::Duration::from_millis(ms));
    }
    let endpoint = endpoint.unwrap_or_else(|| config.endpoint.clone());
    let backend = HttpBackend::new(&endpoint, options.request_timeout)
        .context("Failed to create HTTP client")?;
    let client = StreamingClient::new(Arc::new(backend), options).with_resolver(args.resolver());

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                StreamUpdate::Started { .. } => eprintln!("running..."),
                StreamUpdate::Batches { total_rows, .. } => eprintln!("{} rows received", total_rows),
                StreamUpdate::Columns(_) | StreamUpdate::Finished(_) => {}
            }
        }
    });

    let session = session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let report = client
        .execute(&query, &criteria, connection, &session, token, tx)
        .await?;
    let _ = progress.await;

    for warning in &report.warnings {
        eprintln!("warning: {}: {}", warning.name, warning.message);
    }

    match report.state {
        ExecutionState::Completed | ExecutionState::Cancelled => {
            println!("{}", result_table(&report.result, limit));
            let elapsed = report
                .execution_time
                .map(|d| format!(" in {} ms", d.as_millis()))
                .unwrap_or_default();
            eprintln!("{} rows, {}{}", report.result.total_rows(), report.state, elapsed);
        }
        ExecutionState::Idle => {
            for variable in &report.missing {
                eprintln!("missing: {} ({})", variable.name, variable.label);
            }
        }
        ExecutionState::Errored | ExecutionState::Running => {}
    }

    report.into_result()?;
    Ok(())
}

fn result_table(result: &ResultSet, limit: usize) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(result.columns().iter().map(|c| c.name.clone()));

    for row in result.rows().take(limit) {
        table.add_row(row.values.iter().map(|v| v.to_string()));
    }
    table
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(filter) = cli.log_filter {
        config.log_filter = filter;
    }
    config.json_logs |= cli.json_logs;
    let _log_guard = logging::init(LoggingConfig::from_config(&config))?;

    match cli.command {
        Command::Render(args) => render(&args),
        Command::Scan { query, reconcile } => scan_command(&query, reconcile),
        Command::Missing(args) => missing(&args),
        Command::Execute {
            query,
            endpoint,
            connection,
            session,
            flush_interval_ms,
            limit,
        } => {
            execute(
                &query,
                &config,
                endpoint,
                &connection,
                session,
                flush_interval_ms,
                limit,
            )
            .await
        }
    }
}
