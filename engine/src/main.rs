use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use praetor_core::{
    resolve_shared_paths, ConfigStore, EventBus, NullFarmIntelligence, Storage, Supervisor,
};
use praetor_observability::{init_logging, ProcessKind};
use praetor_server::{serve_stdio, AppState, NullBrowserControl};

#[derive(Parser, Debug)]
#[command(name = "praetor-engine")]
#[command(about = "Headless game-automation supervisor")]
struct Cli {
    /// Override the state directory (also honors PRAETOR_STATE_DIR).
    #[arg(long, global = true, env = "PRAETOR_STATE_DIR")]
    state_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the JSON-RPC transport on stdin/stdout.
    Serve,
    /// Print the resolved state, storage, and log paths.
    Paths,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(dir) = cli.state_dir.as_deref() {
        std::env::set_var("PRAETOR_STATE_DIR", dir);
    }
    let paths = resolve_shared_paths();

    match cli.command {
        Command::Paths => {
            println!("root:    {}", paths.root.display());
            println!("storage: {}", paths.storage_dir.display());
            println!("logs:    {}", paths.logs_dir.display());
        }
        Command::Serve => {
            // The guard keeps the rolling file writer alive for the whole
            // process; stdout stays reserved for the protocol.
            let (_guard, log_info) = init_logging(&paths.logs_dir, ProcessKind::Engine)?;
            log_startup_paths(&paths.root);
            info!("file logs under {}", log_info.logs_dir);

            let state = build_state(&paths.storage_dir).await?;
            serve_stdio(state).await?;
            info!("transport closed, exiting");
        }
    }

    Ok(())
}

fn log_startup_paths(root: &PathBuf) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        root.display()
    );
}

async fn build_state(storage_dir: &PathBuf) -> anyhow::Result<AppState> {
    let storage = Arc::new(Storage::new(storage_dir).await?);
    let migration = storage.migrate_legacy_layout().await?;
    if migration.performed {
        info!(
            "migrated legacy layout for {}",
            migration.server_key.as_deref().unwrap_or("unknown_server")
        );
    }
    let config_store = ConfigStore::new(Arc::clone(&storage));
    let event_bus = EventBus::new();
    let supervisor = Arc::new(Supervisor::new(
        storage,
        config_store,
        event_bus,
        Arc::new(NullFarmIntelligence),
    ));

    Ok(AppState {
        supervisor,
        browser: Arc::new(NullBrowserControl),
    })
}
