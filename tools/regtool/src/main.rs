//! regtool - register table inspection for VoltageEMS field drivers
//!
//! Validates register tables, shows the batched read plan a driver would
//! issue, and decodes captured register dumps through the same pipeline.

mod dump;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::json;
use tracing::{debug, info};
use voltage_registers::{RegisterStore, RegisterTable, TableAccessor};

use crate::dump::{DumpConnection, RegisterDump};

#[derive(Parser)]
#[command(name = "regtool")]
#[command(about = "Register table validation, read planning and dump decoding")]
#[command(long_about = "Register table validation, read planning and dump decoding

Examples:
  regtool validate tables/inverter.yaml
  regtool plan tables/inverter.yaml --group info --max-span 32
  regtool decode tables/inverter.yaml capture.csv --json")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a register table
    Validate {
        /// Register table (yaml, toml or json)
        table: PathBuf,
    },

    /// Show the coalesced read requests for a table
    Plan {
        /// Register table (yaml, toml or json)
        table: PathBuf,

        /// Only plan registers in this group
        #[arg(short, long)]
        group: Option<String>,

        /// Override the table's max_span
        #[arg(short, long)]
        max_span: Option<usize>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a CSV register dump (`address,value`) against a table
    Decode {
        /// Register table (yaml, toml or json)
        table: PathBuf,

        /// Register dump
        dump: PathBuf,

        /// Only decode registers in this group
        #[arg(short, long)]
        group: Option<String>,

        /// Fail reads that touch addresses missing from the dump
        #[arg(long)]
        strict: bool,

        /// Print values as JSON
        #[arg(long, conflicts_with = "raw")]
        json: bool,

        /// Print the raw register image instead of decoded values
        #[arg(long)]
        raw: bool,
    },
}

fn load_table(path: &Path) -> Result<RegisterTable> {
    let table = RegisterTable::from_file(path)
        .with_context(|| format!("failed to load register table {}", path.display()))?;
    info!(
        "Loaded table '{}' with {} registers",
        table.name,
        table.registers.len()
    );
    Ok(table)
}

fn run_validate(path: &Path) -> Result<()> {
    let table = load_table(path)?;
    let groups = table.groups();

    println!("{} {}", "✓".green(), table.name.bold());
    println!("  registers: {}", table.registers.len());
    println!("  read kind: {}", table.poll.read_kind);
    println!("  max span:  {}", table.poll.max_span);
    if !groups.is_empty() {
        let names: Vec<&str> = groups.into_iter().collect();
        println!("  groups:    {}", names.join(", "));
    }
    Ok(())
}

fn run_plan(path: &Path, group: Option<&str>, max_span: Option<usize>, as_json: bool) -> Result<()> {
    let table = load_table(path)?;
    let span = max_span.unwrap_or(table.poll.max_span);
    let wanted = table.address_set(group)?;
    let plan = table.poll_plan_with_span(group, span)?;
    debug!("Planned {} from {}", plan.ranges(), wanted);

    if as_json {
        let requests: Vec<_> = plan
            .ranges()
            .iter()
            .map(|r| json!({ "start": r.start(), "count": r.len() }))
            .collect();
        let out = json!({
            "table": table.name,
            "group": group,
            "kind": plan.kind(),
            "function_code": plan.kind().function_code(),
            "max_span": plan.max_span(),
            "wanted": wanted.address_count(),
            "registers": plan.register_count(),
            "requests": requests,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{} {} ({} registers, max span {})",
        "Plan for".bold(),
        table.name.bold(),
        plan.kind(),
        plan.max_span()
    );
    for range in plan.ranges() {
        println!(
            "  {:>5} +{:<4} {}",
            range.start(),
            range.len(),
            format!("[{}]", range).dimmed()
        );
    }
    println!(
        "{} requests, {} registers read for {} wanted",
        plan.ranges().len().to_string().cyan(),
        plan.register_count(),
        wanted.address_count()
    );
    Ok(())
}

async fn run_decode(
    table_path: &Path,
    dump_path: &Path,
    group: Option<&str>,
    strict: bool,
    as_json: bool,
    raw: bool,
) -> Result<()> {
    let table = Arc::new(load_table(table_path)?);
    let dump = RegisterDump::from_path(dump_path)?;
    if dump.is_empty() {
        bail!("dump {} contains no registers", dump_path.display());
    }
    info!("Loaded {} words from {}", dump.len(), dump_path.display());

    let store = RegisterStore::new();
    let mut conn = DumpConnection::new(dump, strict);
    let plan = table.poll_plan(group)?;
    let stats = plan
        .execute(&store, &mut conn)
        .await
        .context("reading registers from dump failed")?;
    debug!(
        "Read {} words in {} requests ({} served from dump)",
        stats.words,
        stats.requests,
        conn.requests()
    );

    if raw {
        println!("{}", store);
        return Ok(());
    }

    let fields = TableAccessor::from_store(Arc::clone(&table), &store);
    if as_json {
        let mut values = serde_json::Map::new();
        for entry in table.entries(group) {
            values.insert(entry.name.clone(), json!(fields.entry_value(entry)));
        }
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    let width = table
        .entries(group)
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    for entry in table.entries(group) {
        let unit = entry.unit.as_deref().unwrap_or("");
        match fields.entry_value(entry) {
            Some(value) => println!(
                "  {:<width$}  {} {}",
                entry.name,
                value.to_string().green(),
                unit.dimmed()
            ),
            None => println!("  {:<width$}  {}", entry.name, "unavailable".yellow()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    logging::init(cli.verbose, !cli.no_color);

    match cli.command {
        Commands::Validate { table } => run_validate(&table),
        Commands::Plan {
            table,
            group,
            max_span,
            json,
        } => run_plan(&table, group.as_deref(), max_span, json),
        Commands::Decode {
            table,
            dump,
            group,
            strict,
            json,
            raw,
        } => run_decode(&table, &dump, group.as_deref(), strict, json, raw).await,
    }
}
