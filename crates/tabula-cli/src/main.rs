//! tabula command-line driver.
//!
//! Runs one AI chat turn against a workbook, or rolls back an earlier turn.
//!
//! Usage:
//!   # Ask the agent to edit a workbook snapshot, write the result back
//!   tabula ask "add a totals row" --workbook budget.json --out budget.json
//!
//!   # Undo a turn by its branch id
//!   tabula rollback 0192f1c4-...
//!
//!   # Show the effective configuration
//!   tabula config

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use tabula_client::{
    AgentSession, ClientConfig, Connector, JobClient, TcpDialer, TurnOutcome, VersionStore,
};
use tabula_sheet::{CommandRouter, SheetDocument, Workbook};
use tabula_types::{
    BranchId, ChatId, DocumentId, JobMode, RollbackRequest, UserId, VersionPair,
};

#[derive(Parser, Debug)]
#[command(name = "tabula")]
#[command(about = "Run AI edit jobs against a shared spreadsheet")]
struct Args {
    /// Config file (default: <config dir>/tabula/client.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend endpoint, overrides the config file
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// User id, overrides the config file
    #[arg(long, global = true)]
    user: Option<String>,

    /// Chat the turn belongs to
    #[arg(long, global = true, default_value = "default")]
    chat: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one chat message as an AI job and apply its edits
    Ask {
        message: String,

        /// Workbook snapshot (JSON) to start from; one empty sheet otherwise
        #[arg(long)]
        workbook: Option<PathBuf>,

        /// Where to write the resulting workbook snapshot
        #[arg(long)]
        out: Option<PathBuf>,

        /// Document id the backend knows this workbook by
        #[arg(long, default_value = "local")]
        document: String,

        /// Sheets the agent may touch (repeatable; default: all)
        #[arg(long = "sheet")]
        sheets: Vec<String>,

        /// agent | edit
        #[arg(long, value_parser = parse_mode)]
        mode: Option<JobMode>,

        /// Document version the workbook was loaded at
        #[arg(long, requires = "lock")]
        version_id: Option<String>,

        /// Edit lock issued with --version-id
        #[arg(long, requires = "version_id")]
        lock: Option<String>,
    },
    /// Undo the edits of an earlier turn
    Rollback {
        /// Branch id printed by `ask`
        branch: BranchId,
    },
    /// Print the effective configuration as RON
    Config,
}

fn parse_mode(s: &str) -> Result<JobMode, String> {
    JobMode::from_str(s).ok_or_else(|| format!("unknown mode '{s}' (expected agent or edit)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load_or_default(args.config.as_deref())
        .context("failed to load client config")?;
    if let Some(endpoint) = args.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(user) = args.user {
        config.user_id = user;
    }

    match args.command {
        Command::Config => {
            println!("{}", config.to_ron()?);
            Ok(())
        }
        Command::Ask {
            message,
            workbook,
            out,
            document,
            sheets,
            mode,
            version_id,
            lock,
        } => {
            if let Some(mode) = mode {
                config.mode = mode;
            }
            let versions = match (version_id, lock) {
                (Some(v), Some(l)) => Some(VersionPair::new(v, l)),
                _ => None,
            };
            let request = AskRequest {
                message,
                document: DocumentId::new(document),
                chat: ChatId::new(args.chat),
                sheets,
                versions,
            };
            ask(&config, request, workbook.as_deref(), out.as_deref()).await
        }
        Command::Rollback { branch } => rollback(&config, ChatId::new(args.chat), branch).await,
    }
}

struct AskRequest {
    message: String,
    document: DocumentId,
    chat: ChatId,
    sheets: Vec<String>,
    versions: Option<VersionPair>,
}

async fn connect(config: &ClientConfig) -> Result<Arc<JobClient>> {
    let dialer = TcpDialer::new(config.connect_timeout());
    let connector = Connector::new(Arc::new(dialer));
    let client = Arc::new(JobClient::new(connector, Arc::new(VersionStore::new())));
    client
        .connect(&config.endpoint)
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint))?;
    Ok(client)
}

fn load_workbook(path: Option<&Path>) -> Result<Workbook> {
    let Some(path) = path else {
        return Ok(Workbook::with_sheets(["Sheet1"]));
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not JSON", path.display()))?;
    Workbook::from_snapshot(&value).with_context(|| format!("{} is not a workbook", path.display()))
}

async fn ask(
    config: &ClientConfig,
    request: AskRequest,
    workbook: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let document = load_workbook(workbook)?;
    let client = connect(config).await?;

    let mut session = AgentSession::new(
        Arc::clone(&client),
        document,
        request.document,
        request.chat,
        UserId::new(config.user_id.clone()),
    )
    .with_mode(config.mode)
    .with_router(CommandRouter::with_capacity(config.applied_job_memory));
    if let Some(versions) = request.versions {
        session.open(versions);
    }

    let outcome = session.run_turn(&request.message, request.sheets).await;
    client.disconnect();
    let outcome = outcome?;

    report(&outcome);
    if let Some(versions) = client.versions().snapshot() {
        println!("version: {}", versions);
    }

    if let Some(out) = out {
        let snapshot = serde_json::to_string_pretty(&session.document().snapshot())?;
        std::fs::write(out, snapshot)
            .with_context(|| format!("failed to write {}", out.display()))?;
        tracing::info!("Wrote workbook to {}", out.display());
    }
    Ok(())
}

fn report(outcome: &TurnOutcome) {
    println!("branch: {}", outcome.branch_id);
    if let Some(message) = &outcome.job.message {
        println!("{}", message);
    }
    match &outcome.report {
        Some(report) => {
            println!("applied {} edit command(s)", report.applied);
            for skipped in &report.skipped {
                println!(
                    "  skipped #{} {} on '{}': {}",
                    skipped.index, skipped.op, skipped.sheet, skipped.reason
                );
            }
        }
        None => println!("edit commands could not be applied"),
    }
}

async fn rollback(config: &ClientConfig, chat: ChatId, branch: BranchId) -> Result<()> {
    let client = connect(config).await?;
    let result = client
        .rollback_message(RollbackRequest {
            branch_id: branch,
            chat_id: chat,
            user_id: UserId::new(config.user_id.clone()),
        })
        .await;
    client.disconnect();

    let response = result?;
    if !response.success {
        bail!("backend declined rollback of {}", branch);
    }
    println!("rolled back {}", branch);
    if let Some(ref message) = response.message {
        println!("{}", message);
    }
    if let Some(versions) = response.restored_versions() {
        println!("version: {}", versions);
    }
    Ok(())
}
