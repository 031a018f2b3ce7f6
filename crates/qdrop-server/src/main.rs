//! qdrop server binary entry point.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use qdrop_server::connection::ServerContext;
use qdrop_server::registry::SessionRegistry;
use qdrop_server::roles::RoleManager;
use qdrop_server::storage::MemoryStorage;
use qdrop_server::{listener, scheduler, Cli};

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let log_format = cli.log_format.into();
    if let Err(e) = qdrop_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol = qdrop_core::constants::PROTOCOL_VERSION,
        "qdrop-server starting"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!(%e, "server error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> qdrop_core::Result<()> {
    let registry = Arc::new(SessionRegistry::new());
    let storage = Arc::new(MemoryStorage::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (scheduler_handle, scheduler_task) = scheduler::spawn(
        Arc::clone(&registry),
        Arc::clone(&storage),
        cli.scheduler_config(),
        shutdown_rx.clone(),
    );

    let ctx = ServerContext {
        roles: RoleManager::new(Arc::clone(&registry), scheduler_handle.clone()),
        registry,
        scheduler: scheduler_handle,
        storage,
    };

    let bind = cli.socket_addr();
    info!(addr = %bind, "binding server");

    tokio::select! {
        result = listener::serve(bind, ctx, shutdown_rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    Ok(())
}
