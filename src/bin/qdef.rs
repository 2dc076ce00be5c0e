//! qdef: the query definition CLI
//!
//! Dry-runs JSON query definitions against the recording builder.
//!
//! # Usage
//!
//! ```bash
//! # Execute a definition and show the builder trace
//! qdef run query.json --params '{"ids": [1, 2, 3]}'
//!
//! # Answer executors from canned rows, shaped as tabular
//! qdef run query.json --rows rows.json --format tabular
//!
//! # Screen a raw fragment
//! qdef check-raw "id = 1; DROP TABLE users"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::*;
use qdef::prelude::*;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qdef")]
#[command(author = "qdef Contributors")]
#[command(version)]
#[command(about = "JSON query definitions, validated and replayed onto a query builder", long_about = None)]
#[command(after_help = "EXAMPLES:
    qdef run query.json --params '{\"status\": \"active\"}'
    qdef run query.json --rows rows.json --format '[\"struct\",\"id\",\"name\"]'
    qdef check-raw \"age > 18\"
    qdef explain orWhereNotIn")]
struct Cli {
    /// Configuration file (defaults to ./qdef.toml, then the user config directory)
    #[arg(short, long, global = true, env = "QDEF_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a definition against the recording builder
    Run {
        /// Definition file
        query: PathBuf,

        /// Parameters, as a JSON file or an inline JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Return format: array, query, tabular or a JSON struct tuple
        #[arg(short, long)]
        format: Option<ReturnFormat>,

        /// JSON array of row objects answering the executor
        #[arg(long)]
        rows: Option<PathBuf>,

        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Run the whole-definition security check only
    Validate {
        /// Definition file
        query: PathBuf,
    },
    /// Screen a raw SQL fragment against the pattern catalog
    CheckRaw {
        /// The fragment
        sql: String,
    },
    /// List every action and executor name
    Actions,
    /// Show how an action name is routed
    Explain {
        /// Action name, e.g. orWhereNotIn
        name: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = dispatch(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("qdef=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qdef=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            query,
            params,
            format,
            rows,
            json,
        } => {
            let engine = engine(cli.config.as_deref())?;
            run(&engine, query, params.as_deref(), format.clone(), rows.as_deref(), *json)
        }
        Commands::Validate { query } => {
            let engine = engine(cli.config.as_deref())?;
            let definition = read_json(query)?;
            match engine.validate(&definition) {
                Ok(()) => {
                    println!("{} {}", "✓".green(), "Definition passed validation".white());
                    Ok(())
                }
                Err(e) => {
                    println!("{} [{}] {}", "✗".red(), e.code().yellow(), e);
                    bail!("validation failed")
                }
            }
        }
        Commands::CheckRaw { sql } => {
            let engine = engine(cli.config.as_deref())?;
            match engine.validator().inspect_raw_expression(sql) {
                None => {
                    println!("{} {}", "✓".green(), "No dangerous pattern found".white());
                    Ok(())
                }
                Some(hit) => {
                    println!("{} {}", "✗".red(), "Dangerous pattern found".red().bold());
                    println!("  {} {}", "Category:".dimmed(), hit.category.to_string().cyan());
                    println!("  {} {}", "Pattern:".dimmed(), hit.name.cyan());
                    println!("  {} {}", "Matched:".dimmed(), hit.matched.yellow());
                    bail!("raw expression rejected")
                }
            }
        }
        Commands::Actions => {
            show_actions();
            Ok(())
        }
        Commands::Explain { name } => {
            explain(name);
            Ok(())
        }
    }
}

fn engine(config: Option<&Path>) -> Result<QdefEngine> {
    let config = QdefConfig::discover(config).context("loading configuration")?;
    Ok(QdefEngine::new(config)?)
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// `--params` is a path when such a file exists, inline JSON otherwise.
fn read_params(arg: &str) -> Result<ParamMap> {
    let value = if Path::new(arg).is_file() {
        read_json(Path::new(arg))?
    } else {
        serde_json::from_str(arg).context("parsing --params as JSON")?
    };
    if !value.is_object() {
        bail!("--params must be a JSON object");
    }
    Ok(serde_json::from_value(value)?)
}

fn run(
    engine: &QdefEngine,
    query: &Path,
    params: Option<&str>,
    format: Option<ReturnFormat>,
    rows: Option<&Path>,
    json_output: bool,
) -> Result<()> {
    let definition = read_json(query)?;
    let params = params.map(read_params).transpose()?.unwrap_or_default();

    let mut builder = RecordingBuilder::new();
    if let Some(path) = rows {
        let rows: Vec<Value> = serde_json::from_value(read_json(path)?).context("--rows must be a JSON array")?;
        builder = builder.with_rows(rows);
    }

    let mut options = ExecuteOptions::with_params(params);
    options.return_format = format;
    let result = engine.execute(&mut builder, &definition, &options)?;

    if json_output {
        let out = json!({"calls": builder.calls(), "result": result});
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Builder calls:".green().bold());
    for call in builder.calls() {
        println!("  {} {}", "→".dimmed(), call.white());
    }
    println!();
    println!("{}", "Result:".green().bold());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn show_actions() {
    let registry = ActionRegistry::new();

    println!("{}", "Base actions".cyan().bold());
    println!("{}", "─".repeat(60).dimmed());
    let base = registry.base_names();
    for name in &base {
        println!("  {}", name.white());
    }

    let generated: Vec<&str> = registry
        .action_names()
        .into_iter()
        .filter(|name| !base.contains(name))
        .collect();
    println!();
    println!("{} {}", "Generated variants".cyan().bold(), format!("({})", generated.len()).dimmed());
    println!("{}", "─".repeat(60).dimmed());
    for chunk in generated.chunks(3) {
        let line: Vec<String> = chunk.iter().map(|name| format!("{:24}", name)).collect();
        println!("  {}", line.join("").white());
    }

    println!();
    println!("{}", "Executors".cyan().bold());
    println!("{}", "─".repeat(60).dimmed());
    for executor in Executor::ALL {
        println!("  {}", executor.name().yellow());
    }
}

fn explain(name: &str) {
    let registry = ActionRegistry::new();

    println!("{} {}", "Name:".dimmed(), name.yellow());
    if let Some(executor) = registry.executor(name) {
        println!("  {} {}", "Executor:".dimmed(), executor.to_string().cyan());
        return;
    }

    let normalized = registry.normalize(name);
    println!("  {} {}", "Base action:".dimmed(), normalized.base_action.white());
    println!("  {} {}", "Combinator:".dimmed(), normalized.combinator.to_string().white());
    println!("  {} {}", "Negated:".dimmed(), normalized.negated.to_string().white());
    println!("  {} {}", "Builder method:".dimmed(), normalized.qb_method.white());
    match registry.route(name) {
        Some((_, kind)) => println!("  {} {}", "Routed as:".dimmed(), format!("{:?}", kind).cyan()),
        None => println!("  {}", "Not a registered action".red()),
    }
}
