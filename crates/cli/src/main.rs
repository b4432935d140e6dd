mod config;
mod error;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use policy::{ActionKind, Artifact};
use runtime::{ChannelError, Controller, Envelope, Host, Mailbox, Request, Response};
use storage::{LogRecord, Store};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "scriptguard.toml";
const LOG_ENV: &str = "SCRIPTGUARD_LOG";

#[derive(Parser)]
#[command(name = "scriptguard")]
#[command(about = "Per-origin capability policy enforcement", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer JSON commands on stdin, one per line, until EOF
    Serve,
    /// Show recorded decisions, newest first
    Logs {
        /// Show only the last N decisions
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter by capability (e.g. geolocation)
        #[arg(short = 'p', long)]
        capability: Option<String>,
    },
    /// Delete all recorded decisions
    ClearLogs,
    /// List available presets
    Presets,
    /// Replace an origin's policy with a preset
    ApplyPreset { origin: String, preset: String },
    /// Allow everything on an origin for a limited time
    AllowTemp {
        origin: String,
        #[arg(short, long, default_value = "5")]
        minutes: u32,
    },
    /// Show the effective policy for an origin
    Resolve { origin: String },
    /// Evaluate one capability call and record the decision
    Check {
        origin: String,
        capability: String,
        /// Call parameters as JSON
        #[arg(long, default_value = "null")]
        params: String,
    },
    /// Score artifacts from a JSON file (array of artifacts)
    Classify { origin: String, file: PathBuf },
    /// Block, unblock or delete an artifact
    Artifact {
        action: ActionArg,
        origin: String,
        name: String,
    },
    /// Undo the most recent artifact action
    Undo,
    /// Show the artifact action history
    History,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Block,
    Unblock,
    Delete,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Block => ActionKind::Block,
            ActionArg::Unblock => ActionKind::Unblock,
            ActionArg::Delete => ActionKind::Delete,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config.log_level)?;

    match cli.command {
        Commands::Serve => cmd_serve(&config).await,
        Commands::Logs { limit, capability } => cmd_logs(&config, limit, capability.as_deref()),
        Commands::ClearLogs => {
            let removed = open_existing(&config)?.clear_logs()?;
            println!("Removed {removed} decisions.");
            Ok(())
        }
        Commands::Presets => cmd_presets(&config),
        Commands::ApplyPreset { origin, preset } => {
            controller(&config)?.apply_preset(&origin, &preset)?;
            println!("Applied preset '{preset}' to {origin}.");
            Ok(())
        }
        Commands::AllowTemp { origin, minutes } => {
            let grant = controller(&config)?.set_temporary_override(&origin, minutes)?;
            println!("{origin} unrestricted until {}.", local_time(grant.expires_at));
            Ok(())
        }
        Commands::Resolve { origin } => {
            let effective = controller(&config)?.resolve(&origin);
            println!("{}", serde_json::to_string_pretty(&effective)?);
            Ok(())
        }
        Commands::Check {
            origin,
            capability,
            params,
        } => cmd_check(&config, &origin, &capability, &params).await,
        Commands::Classify { origin, file } => cmd_classify(&config, &origin, &file),
        Commands::Artifact {
            action,
            origin,
            name,
        } => {
            let entry =
                controller(&config)?.record_artifact_action(action.into(), &name, &origin)?;
            println!("{:?} {} on {}.", entry.action, entry.artifact_name, entry.origin);
            Ok(())
        }
        Commands::Undo => {
            match controller(&config)?.undo_artifact_action() {
                Some(entry) => println!(
                    "Undid {:?} {} on {}.",
                    entry.action, entry.artifact_name, entry.origin
                ),
                None => println!("Nothing to undo."),
            }
            Ok(())
        }
        Commands::History => cmd_history(&config),
    }
}

async fn cmd_serve(config: &Config) -> Result<()> {
    let host = start_host(config)?;
    tracing::info!("serving commands on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => host.controller().handle_request(request),
            Err(e) => Response::invalid(request_id(&line), e.to_string()),
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    host.shutdown().await;
    Ok(())
}

/// Best-effort id recovery from a line that failed to parse as a request.
fn request_id(line: &str) -> Option<runtime::RequestId> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}

fn cmd_logs(config: &Config, limit: usize, capability: Option<&str>) -> Result<()> {
    let store = open_existing(config)?;
    let records = store.load_logs(Some(limit), capability)?;

    if records.is_empty() {
        println!("No decisions recorded.");
        return Ok(());
    }

    println!("{:<20}  {:<20}  {:<8}  ORIGIN", "TIME", "CAPABILITY", "DECISION");
    println!("{}", "-".repeat(80));
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &LogRecord) {
    println!(
        "{:<20}  {:<20}  {:<8}  {}",
        local_time(record.timestamp),
        record.capability,
        record.decision.as_str(),
        record.origin
    );
    if let Some(location) = &record.location {
        println!("{:<20}  at {location}", "");
    }
}

fn cmd_presets(config: &Config) -> Result<()> {
    let presets = controller(config)?.presets();
    println!("{:<12}  {:<6}  {:<16}  DESCRIPTION", "ID", "LABEL", "NAME");
    for preset in presets {
        println!(
            "{:<12}  {:<6}  {:<16}  {}",
            preset.id, preset.short_label, preset.name, preset.description
        );
    }
    Ok(())
}

async fn cmd_check(config: &Config, origin: &str, capability: &str, params: &str) -> Result<()> {
    let params: serde_json::Value = serde_json::from_str(params)
        .map_err(|e| Error::InvalidArgument(format!("--params: {e}")))?;

    let host = start_host(config)?;
    host.synced().await;

    let enforcer = host.enforcer(origin);
    let verdict = enforcer.check_raw(capability, &params, None, None)?;
    println!("{} {} ({:?})", verdict.capability, verdict.decision, verdict.reason);
    if let Some(surface) = &verdict.surface {
        println!("fails with {}", serde_json::to_string(surface)?);
    }

    host.shutdown().await;
    Ok(())
}

fn cmd_classify(config: &Config, origin: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)?;
    let artifacts: Vec<Artifact> = serde_json::from_str(&content)?;
    let classified = controller(config)?.classify(origin, &artifacts, Utc::now());

    println!("{:<24}  {:<12}  {:<6}  {:<6}  REASONS", "NAME", "CATEGORY", "SCORE", "RISK");
    for item in classified {
        println!(
            "{:<24}  {:<12}  {:<6}  {:<6}  {}",
            item.name,
            format!("{:?}", item.category),
            item.score,
            format!("{:?}", item.tier),
            item.reasons.join(", ")
        );
    }
    Ok(())
}

fn cmd_history(config: &Config) -> Result<()> {
    let history = controller(config)?.history();
    if history.is_empty() {
        println!("No artifact actions recorded.");
        return Ok(());
    }
    for entry in history.iter().rev() {
        println!(
            "[{}] {:?} {} on {}",
            local_time(entry.timestamp),
            entry.action,
            entry.artifact_name,
            entry.origin
        );
    }
    Ok(())
}

fn local_time(ts: chrono::DateTime<Utc>) -> String {
    Local
        .from_utc_datetime(&ts.naive_utc())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn open_store(config: &Config) -> Result<Arc<Store>> {
    let path = config.db_path();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(Arc::new(Store::open(&path)?))
}

/// For read-only commands: don't create a database just to report it empty.
fn open_existing(config: &Config) -> Result<Store> {
    let path = config.db_path();
    if !path.exists() {
        return Err(Error::DatabaseNotFound { path });
    }
    Ok(Store::open(&path)?)
}

/// One-shot commands run without an enforcement context; pushes are dropped.
struct Detached;

impl Mailbox for Detached {
    fn post(&self, _envelope: Envelope) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}

fn controller(config: &Config) -> Result<Controller> {
    Ok(Controller::open(open_store(config)?, Arc::new(Detached), config.presets()?)?)
}

fn start_host(config: &Config) -> Result<Host> {
    Ok(Host::start(open_store(config)?, &config.runtime(), config.presets()?)?)
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("log_level: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}
