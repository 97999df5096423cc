use anyhow::Result;
use oxpulse_server::app;
use oxpulse_server::config::ServerConfig;
use oxpulse_server::logging;
use oxpulse_server::seed::{self, ChannelsSeedFile, RulesSeedFile};
use oxpulse_server::state::AppState;
use oxpulse_storage::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

const DEFAULT_CONFIG_PATH: &str = "config/server.toml";
const QUEUE_STATS_INTERVAL: Duration = Duration::from_secs(60);

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  oxpulse-server [config.toml]                               Start the server");
    eprintln!("  oxpulse-server init-rules <config.toml> <seed.json>        Import alert rules from a seed file");
    eprintln!("  oxpulse-server init-channels <config.toml> <seed.json>     Import notification channels from a seed file");
}

fn seed_args<'a>(args: &'a [String], command: &str) -> Result<(&'a str, &'a str)> {
    match (args.get(2), args.get(3)) {
        (Some(config), Some(seed)) => Ok((config, seed)),
        _ => {
            print_usage();
            anyhow::bail!("{command} requires <config.toml> and <seed.json> arguments")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    oxpulse_common::id::init(1, 1);

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("init-rules") => {
            let (config_path, seed_path) = seed_args(&args, "init-rules")?;
            run_init_rules(config_path, seed_path).await
        }
        Some("init-channels") => {
            let (config_path, seed_path) = seed_args(&args, "init-channels")?;
            run_init_channels(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        other => run_server(other.unwrap_or(DEFAULT_CONFIG_PATH)).await,
    }
}

async fn open_store(config: &ServerConfig) -> Result<Arc<Store>> {
    if config.database.url.as_deref().map_or(true, str::is_empty) {
        std::fs::create_dir_all(&config.database.data_dir)?;
    }
    Ok(Arc::new(Store::new(&config.database.connection_url()).await?))
}

async fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    logging::init_tracing(config.logging.format)?;
    let seed: RulesSeedFile = seed::load_seed(seed_path)?;
    let store = open_store(&config).await?;
    let state = AppState::build(store, config)?;

    let report = seed::seed_rules(&state.rules, &seed).await?;
    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "Rule seed import finished"
    );
    Ok(())
}

async fn run_init_channels(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    logging::init_tracing(config.logging.format)?;
    let seed: ChannelsSeedFile = seed::load_seed(seed_path)?;
    let store = open_store(&config).await?;
    let state = AppState::build(store, config)?;

    let report = seed::seed_channels(state.channels.as_ref(), &state.registry, &seed).await?;
    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "Channel seed import finished"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    logging::init_tracing(config.logging.format)?;
    tracing::info!(config = %config_path, "Starting oxpulse-server");

    let http_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let store = open_store(&config).await?;
    let state = AppState::build(store, config)?;
    let queue = Arc::clone(&state.queue);

    let stats_queue = Arc::clone(&queue);
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(QUEUE_STATS_INTERVAL);
        loop {
            ticker.tick().await;
            let stats = stats_queue.stats();
            tracing::debug!(
                depth = stats.depth,
                submitted = stats.submitted,
                completed = stats.completed,
                dropped = stats.dropped,
                "Task queue stats"
            );
        }
    });

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(addr = %http_addr, "HTTP server listening");
    let server = axum::serve(listener, app::build_http_app(state));

    if let Err(e) = server.with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!(error = %e, "HTTP server error");
    }

    stats_task.abort();
    tracing::info!("Draining background tasks");
    queue.shutdown().await;
    tracing::info!("Shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
