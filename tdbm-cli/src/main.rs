mod fixture;
mod repl;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fixture::Fixture;
use std::io::Write;
use std::path::PathBuf;
use tdbm_api::Params;
use tdbm_core::{BeanRef, GenericBean};
use tracing::info;

#[derive(Parser)]
#[command(name = "tdbm", version, arg_required_else_help = true)]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. `debug`, `tdbm_core=trace`)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named query from a fixture and print its beans
    Run(RunArgs),
    /// Step through a named query interactively
    Repl(ReplArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Ndjson,
}

#[derive(Parser)]
struct RunArgs {
    /// Fixture file (JSON)
    #[arg(long)]
    fixture: PathBuf,

    /// Name of the query in the fixture
    #[arg(long)]
    query: String,

    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    offset: Option<u64>,

    /// Parameters as a JSON object, replacing the query's own (e.g. '{"status":"open"}')
    #[arg(long)]
    params_json: Option<String>,

    /// Print windowed and full counts to stderr after the rows
    #[arg(long)]
    counts: bool,

    #[arg(long, value_enum, default_value = "ndjson")]
    format: OutputFormat,
}

#[derive(Parser)]
struct ReplArgs {
    #[arg(long)]
    fixture: PathBuf,

    #[arg(long)]
    query: String,
}

pub(crate) fn parse_params_json(raw: &str) -> Result<Params> {
    if raw.trim().is_empty() {
        return Ok(Params::new());
    }
    serde_json::from_str(raw).context("params must be a JSON object")
}

pub(crate) fn bean_to_json(bean: &BeanRef) -> serde_json::Value {
    bean.with(|b: &GenericBean| b.to_json())
        .unwrap_or_else(|| serde_json::Value::String(format!("{bean:?}")))
}

fn run_query(args: RunArgs) -> Result<()> {
    let fixture = Fixture::load(&args.fixture)?;
    let conn = fixture.connection();
    let session = fixture.session();
    let mut it = fixture.iterator(&conn, &session, &args.query)?;

    if let Some(raw) = args.params_json.as_deref() {
        it.set_parameters(parse_params_json(raw)?);
    }
    if args.limit.is_some() {
        it.set_limit(args.limit);
    }
    if args.offset.is_some() {
        it.set_offset(args.offset);
    }
    info!(query = %args.query, limit = ?it.limit(), offset = ?it.offset(), "running query");

    let mut stdout = std::io::stdout().lock();
    match args.format {
        OutputFormat::Ndjson => {
            for bean in it.iter() {
                serde_json::to_writer(&mut stdout, &bean_to_json(&bean?))?;
                stdout.write_all(b"\n")?;
            }
        }
    }

    if args.counts {
        let windowed = it.count()?;
        let full = it.full_count()?;
        eprintln!("count={windowed} full_count={full}");
    }
    info!(cached_beans = session.cached_beans(), "done");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_lowercase())),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Run(args) => run_query(args),
        Commands::Repl(args) => repl::run_repl(&args.fixture, &args.query),
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
