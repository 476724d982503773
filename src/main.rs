use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use docstore_session_lib::config::{load_config, ConfigMerger, PartialConfig, StoreConfig};
use docstore_session_lib::shutdown::{register_signal_handlers, ShutdownState};
use docstore_session_lib::store::file::FileStore;
use docstore_session_lib::{GcSweeper, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Administer a file-backed session store
#[derive(Parser, Debug)]
#[command(name = "docstore-session")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, env = "DOCSTORE_SESSION_CONFIG", default_value = "docstore-session.toml")]
    config: PathBuf,

    /// Collection directory (overrides the first file:// server in the config)
    #[arg(long, env = "DOCSTORE_SESSION_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Session id namespace
    #[arg(long, env = "DOCSTORE_SESSION_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store indexes
    Init,
    /// Print a session document as JSON without locking it
    Show { id: String },
    /// Clear a session lock left behind by a crashed holder
    Unlock { id: String },
    /// Delete a session
    Destroy { id: String },
    /// Remove expired sessions once
    Gc,
    /// Remove expired sessions periodically until interrupted
    Sweep {
        /// Seconds between sweeps (defaults to gcIntervalSecs from the config)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(cli)) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<StoreConfig> {
    let file = load_config(&cli.config)?;
    let overrides = PartialConfig {
        servers: cli
            .data_dir
            .as_ref()
            .map(|dir| vec![format!("file://{}", dir.display())]),
        namespace: cli.namespace.clone(),
        gc_interval_secs: match cli.command {
            Command::Sweep { interval_secs } => interval_secs,
            _ => None,
        },
        ..Default::default()
    };

    let config = ConfigMerger::new()
        .with_file(Some(file))
        .with_cli(Some(overrides))
        .merge();
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let data_dir = config.file_endpoint().ok_or_else(|| {
        anyhow!("No file:// endpoint configured; pass --data-dir or add one to servers")
    })?;

    let store = FileStore::open(&data_dir)?;
    let sessions = Arc::new(SessionStore::new(Arc::new(store), config.session_config()));

    tokio::time::timeout(config.connect_timeout(), sessions.ensure_indexes())
        .await
        .map_err(|_| anyhow!("Timed out opening store at {}", data_dir.display()))??;

    match cli.command {
        Command::Init => {
            println!("Indexes ready in {}", data_dir.display());
        }
        Command::Show { id } => match sessions.peek(&id).await? {
            Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
            None => println!("Session {} not found", id),
        },
        Command::Unlock { id } => {
            sessions.unlock(&id).await;
            println!("Released lock on session {}", id);
        }
        Command::Destroy { id } => {
            sessions.destroy(&id).await?;
            println!("Destroyed session {}", id);
        }
        Command::Gc => {
            let removed = sessions.gc(config.max_lifetime()).await;
            println!("Removed {} expired sessions", removed);
        }
        Command::Sweep { .. } => {
            let shutdown = ShutdownState::new();
            if let Err(e) = register_signal_handlers(shutdown.clone()) {
                log::warn!("Failed to register signal handlers: {}", e);
            }

            let report = GcSweeper::new(sessions, config.gc_interval(), shutdown)
                .spawn()
                .await?;
            println!(
                "Ran {} sweeps, removed {} expired sessions",
                report.sweeps_run, report.documents_removed
            );
        }
    }

    Ok(())
}
