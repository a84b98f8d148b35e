mod approver;
mod config;
mod error;
mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{
    ApprovalGate, InvocationBridge, Orchestrator, ProviderStatus, ToolExecutionResult,
    ToolRegistry, transcript,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{Event, EventKind, EventStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use approver::TerminalApprover;
use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "capstan.toml";
const DEFAULT_LOG_FILTER: &str = "cli=info,runtime=info,warn";

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Approval-gated tool orchestration for coding agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sanitized tool list as JSON
    Tools,
    /// Show tool providers and their availability
    Providers,
    /// Run a single tool call in a new session
    Exec {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
        /// Task description recorded with the session
        #[arg(short, long)]
        task: Option<String>,
    },
    /// Run a JSON plan of tool calls as one bounded session
    Run {
        /// File containing `[{"name": ..., "params": {...}}, ...]`
        plan: PathBuf,
        /// Task description recorded with the session
        #[arg(short, long)]
        task: Option<String>,
    },
    /// Resolve approved/denied tool invocations in a transcript
    Resolve {
        /// Transcript JSON file
        transcript: PathBuf,
        /// Write the resolved transcript here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List all sessions
    Sessions {
        /// Show only the last N sessions
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show event logs for a session
    Logs {
        /// Session ID (prefix match supported)
        #[arg(short, long)]
        session: String,
        /// Filter by event kind (tool_call, tool_result, approval_requested, ...)
        #[arg(short, long)]
        kind: Option<String>,
    },
}

/// One step of a `run` plan.
#[derive(Debug, Deserialize)]
struct PlannedCall {
    name: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct StepReport<'a> {
    step: usize,
    name: &'a str,
    #[serde(flatten)]
    result: &'a ToolExecutionResult,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Tools => cmd_tools(&config).await,
        Commands::Providers => cmd_providers(&config).await,
        Commands::Exec { tool, args, task } => cmd_exec(&config, &tool, args.as_deref(), task).await,
        Commands::Run { plan, task } => cmd_run(&config, &plan, task).await,
        Commands::Resolve { transcript, out } => cmd_resolve(&config, &transcript, out.as_deref()).await,
        Commands::Sessions { limit } => cmd_sessions(&config, limit),
        Commands::Logs { session, kind } => cmd_logs(&config, &session, kind.as_deref()),
    }
}

/// Built-in tools plus every configured provider.
async fn build_registry(config: &Config) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.connect(Arc::new(tools::provider())).await;
    registry.connect_servers(config.provider_configs()).await;
    registry
}

fn build_orchestrator(config: &Config, registry: Arc<ToolRegistry>) -> Result<Orchestrator> {
    let gate = ApprovalGate::new(config.approval.clone()).with_channel(Arc::new(TerminalApprover));
    let store = open_store_for_write(config)?;
    Ok(Orchestrator::new(registry, gate, config.settings()).with_store(store))
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let registry = build_registry(config).await;
    let specs = registry.specs().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&specs).map_err(Error::json("tool list"))?
    );
    registry.shutdown().await;
    Ok(())
}

async fn cmd_providers(config: &Config) -> Result<()> {
    let registry = build_registry(config).await;

    println!("{:<20}  {:<12}  TOOLS", "PROVIDER", "STATUS");
    println!("{}", "-".repeat(60));
    for provider in registry.providers().await {
        match &provider.status {
            ProviderStatus::Available => println!(
                "{:<20}  {:<12}  {}",
                provider.provider_id,
                "available",
                provider.tools.join(", ")
            ),
            ProviderStatus::Unavailable { reason } => println!(
                "{:<20}  {:<12}  {reason}",
                provider.provider_id, "unavailable"
            ),
        }
    }

    let conflicts = registry.conflicts().await;
    if !conflicts.is_empty() {
        println!();
        for c in conflicts {
            println!("{} from {} overridden by {}", c.tool, c.overridden, c.winner);
        }
    }

    registry.shutdown().await;
    Ok(())
}

async fn cmd_exec(config: &Config, tool: &str, args: Option<&str>, task: Option<String>) -> Result<()> {
    let params: Value = match args {
        Some(raw) => serde_json::from_str(raw).map_err(Error::json("--args"))?,
        None => Value::Object(Default::default()),
    };

    let registry = build_registry(config).await;
    let mut orchestrator = build_orchestrator(config, Arc::clone(&registry))?;
    orchestrator.start_session(task.unwrap_or_else(|| format!("exec {tool}")));
    info!(session = %orchestrator.session().id, "session started");

    let result = orchestrator.execute_tool(tool, params).await;
    orchestrator.increment_iteration();
    orchestrator.complete();

    println!(
        "{}",
        serde_json::to_string_pretty(&result).map_err(Error::json("result"))?
    );
    eprintln!("\n{}", orchestrator.get_session_summary());
    registry.shutdown().await;
    Ok(())
}

async fn cmd_run(config: &Config, plan_path: &Path, task: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(plan_path)?;
    let plan: Vec<PlannedCall> = serde_json::from_str(&raw).map_err(Error::json("plan"))?;

    let registry = build_registry(config).await;
    let mut orchestrator = build_orchestrator(config, Arc::clone(&registry))?;
    orchestrator.start_session(task.unwrap_or_else(|| format!("run {}", plan_path.display())));

    for (step, call) in plan.iter().enumerate() {
        if !orchestrator.can_continue() {
            eprintln!(
                "Iteration budget exhausted; {} call(s) not run.",
                plan.len() - step
            );
            break;
        }
        if let Some(warning) = orchestrator.iteration_warning() {
            eprintln!("Warning: {warning}");
        }

        let result = orchestrator.execute_tool(&call.name, call.params.clone()).await;
        let report = StepReport {
            step: step + 1,
            name: &call.name,
            result: &result,
        };
        println!(
            "{}",
            serde_json::to_string(&report).map_err(Error::json("result"))?
        );
        orchestrator.increment_iteration();
    }

    orchestrator.complete();
    eprintln!("\n{}", orchestrator.get_session_summary());
    registry.shutdown().await;
    Ok(())
}

async fn cmd_resolve(config: &Config, path: &Path, out: Option<&Path>) -> Result<()> {
    let input = transcript::parse(&std::fs::read_to_string(path)?)?;

    let registry = build_registry(config).await;
    let bridge =
        InvocationBridge::new(Arc::clone(&registry)).with_timeout(config.settings().tool_timeout);

    let resolution = bridge.resolve_transcript(&input).await;
    for notification in &resolution.notifications {
        eprintln!(
            "{}",
            serde_json::to_string(notification).map_err(Error::json("notification"))?
        );
    }

    let json = transcript::to_json(&resolution.transcript)?;
    match out {
        Some(out) => std::fs::write(out, json)?,
        None => println!("{json}"),
    }
    registry.shutdown().await;
    Ok(())
}

fn cmd_sessions(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let sessions = store.list_sessions()?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<5}  {:<10}  TASK",
        "SESSION ID", "STARTED", "CALLS", "STATUS"
    );
    println!("{}", "-".repeat(100));

    for summary in sessions.into_iter().take(limit) {
        let started = Local
            .from_utc_datetime(&summary.started_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        let status = summary.final_status.as_deref().unwrap_or("active");
        println!(
            "{:<36}  {:<16}  {:<5}  {:<10}  {}",
            summary.id, started, summary.tool_calls, status, summary.task
        );
    }

    Ok(())
}

fn cmd_logs(config: &Config, session_prefix: &str, kind_filter: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    // Find session by prefix
    let sessions = store.list_sessions()?;
    let matching: Vec<_> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(session_prefix))
        .collect();

    let session_id = match matching.len() {
        0 => {
            return Err(Error::SessionNotFound {
                prefix: session_prefix.to_string(),
            });
        }
        1 => matching[0].id,
        _ => {
            return Err(Error::AmbiguousSession {
                prefix: session_prefix.to_string(),
                matches: matching.iter().map(|s| s.id.to_string()).collect(),
            });
        }
    };

    let events = store.load_session(session_id, kind_filter)?;

    if events.is_empty() {
        println!("No events found for session {session_id}");
        return Ok(());
    }

    println!("Session: {session_id}\n");

    for event in events {
        print_event(&event);
    }

    Ok(())
}

fn print_event(event: &Event) {
    let time = Local
        .from_utc_datetime(&event.timestamp.naive_utc())
        .format("%H:%M:%S");

    match &event.kind {
        EventKind::SessionStart { task } => {
            println!("[{time}] === Session started: {task} ===");
        }
        EventKind::SessionEnd { status, summary } => {
            println!("[{time}] === Session ended ({status}) ===");
            for line in summary.lines() {
                println!("           {line}");
            }
        }
        EventKind::ToolCall { call_id, name, params } => {
            println!("[{time}] TOOL CALL {}: {name} {}", short(call_id), clip(&params.to_string()));
        }
        EventKind::ToolResult {
            call_id,
            name,
            success,
            output,
            duration_ms,
        } => {
            let outcome = if *success { "ok" } else { "FAILED" };
            println!(
                "[{time}] TOOL RESULT {}: {name} {outcome} in {duration_ms}ms {}",
                short(call_id),
                clip(&output.to_string())
            );
        }
        EventKind::ApprovalRequested { name, reason } => {
            println!("[{time}] APPROVAL REQUESTED: {name} ({reason})");
        }
        EventKind::ApprovalResolved { name, approved } => {
            let verdict = if *approved { "approved" } else { "denied" };
            println!("[{time}] APPROVAL: {name} {verdict}");
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate long payloads for display.
fn clip(text: &str) -> String {
    match text.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn db_path(config: &Config) -> PathBuf {
    config
        .storage_path()
        .unwrap_or_else(|| PathBuf::from(".capstan/events.db"))
}

fn open_store(config: &Config) -> Result<EventStore> {
    let db_path = db_path(config);

    if !db_path.exists() {
        return Err(Error::DatabaseNotFound { path: db_path });
    }

    Ok(EventStore::open(&db_path)?)
}

fn open_store_for_write(config: &Config) -> Result<EventStore> {
    let db_path = db_path(config);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(EventStore::open(&db_path)?)
}
