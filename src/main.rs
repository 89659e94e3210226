//! Broker process entry point.
//!
//! Loads the configuration file, runs the first reconciliation pass, then
//! keeps the broker in step with the file until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use broker_reload::admin::{self, AdminState};
use broker_reload::config::watcher::ConfigWatcher;
use broker_reload::config::{load_config, FileConfigSource};
use broker_reload::observability::{logging, metrics};
use broker_reload::{Broker, Shutdown, TickOutcome};

#[derive(Parser)]
#[command(name = "broker-reload")]
#[command(about = "Broker with live configuration reload", long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "broker.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Startup settings come from the file as it is now; later edits to
    // them need a restart.
    let config = load_config(&args.config)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "broker-reload starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let source = Arc::new(FileConfigSource::new(&args.config));
    let broker = Arc::new(Broker::from_config(source, &config));

    match broker.reload() {
        TickOutcome::Failed(e) => return Err(e.into()),
        outcome => tracing::info!(outcome = outcome.label(), "Initial configuration applied"),
    }

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    // The watcher has to outlive the reload loop.
    let (nudges, _watcher) = if config.reload.enabled && config.reload.watch {
        let (watcher, rx) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(w) => (Some(rx), Some(w)),
            Err(e) => {
                tracing::warn!(error = %e, "File watching unavailable, relying on periodic checks");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    if config.reload.enabled {
        let manager = Arc::clone(broker.reload_manager());
        tasks.push(tokio::spawn(manager.run(shutdown.subscribe(), nudges)));
    } else {
        tracing::info!("Periodic reload disabled");
    }

    if config.admin.enabled {
        let addr: SocketAddr = config.admin.bind_address.parse()?;
        let state = AdminState::new(broker.clone(), &config.admin.api_key);
        let signalled = shutdown.signalled();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(addr, state, signalled).await {
                tracing::error!(address = %addr, error = %e, "Admin API failed");
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.trigger();

    for task in tasks {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
