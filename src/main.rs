use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use digest_builder::config;
use digest_builder::digest::DigestClient;
use digest_builder::identity::{CurrentUser, StaticIdentity};
use digest_builder::model::{SessionPatch, WorkflowState};
use digest_builder::service::{BuilderService, PresenceUpdate};
use digest_builder::store::SqliteStore;

#[derive(Debug, Parser)]
#[command(author, version, about = "Operate collaborative digest builder sessions")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Acting user id; required for `new` and `finalize`
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session
    New,
    /// Print a session with its derived properties
    Show { id: String },
    /// List sessions of the acting user updated within the inactivity window
    Active,
    /// Merge a JSON patch file into a session
    Update { id: String, patch: PathBuf },
    /// Merge a JSON patch file and stamp the save time
    Autosave { id: String, patch: PathBuf },
    /// Print the autosave history of a session
    History { id: String },
    /// Move a session to another workflow state if the move is legal
    Transition { id: String, state: String },
    /// Report the acting user's current section
    Presence {
        id: String,
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        lock: bool,
        #[arg(long)]
        username: Option<String>,
    },
    /// Create the digest and mark the session published
    Finalize {
        id: String,
        #[arg(long)]
        title: Option<String>,
    },
}

fn read_patch(path: &Path) -> Result<SessionPatch> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read patch {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid patch {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let store = SqliteStore::connect(&cfg.database_url()).await?;
    let identity = match &args.user {
        Some(id) => StaticIdentity::signed_in(CurrentUser::new(id.clone())),
        None => StaticIdentity::anonymous(),
    };
    let digests = DigestClient::from_config(&cfg)?;
    let service = BuilderService::new(
        Arc::new(store),
        Arc::new(identity),
        Arc::new(digests),
        cfg.settings(),
    );

    match args.command {
        Command::New => {
            let view = service.create().await?;
            info!(id = %view.id(), "created session");
            print_json(&view)?;
        }
        Command::Show { id } => print_json(&service.get(&id).await?)?,
        Command::Active => {
            let user = args.user.context("--user is required to list sessions")?;
            print_json(&service.list_active(&user).await?)?;
        }
        Command::Update { id, patch } => {
            let patch = read_patch(&patch)?;
            print_json(&service.update(&id, &patch).await?)?;
        }
        Command::Autosave { id, patch } => {
            let patch = read_patch(&patch)?;
            print_json(&service.autosave(&id, &patch).await?)?;
        }
        Command::History { id } => print_json(&service.history(&id).await?)?,
        Command::Transition { id, state } => {
            let target = WorkflowState::parse_state(&state)
                .with_context(|| format!("unknown workflow state {}", state))?;
            print_json(&service.transition(&id, target).await?)?;
        }
        Command::Presence {
            id,
            section,
            lock,
            username,
        } => {
            let user_id = args.user.context("--user is required to report presence")?;
            let presence = PresenceUpdate {
                username: username.unwrap_or_else(|| user_id.clone()),
                user_id,
                section,
                lock,
            };
            print_json(&service.record_presence(&id, &presence).await?)?;
        }
        Command::Finalize { id, title } => {
            let outcome = service.finalize(&id, title.as_deref()).await?;
            info!(digest_id = %outcome.digest.id, "finalized session");
            print_json(&outcome)?;
        }
    }

    Ok(())
}
