use nixy::admin::{AdminServer, PKG_NAME, VERSION};
use nixy::config::Config;
use nixy::events::{self, ReloadQueue};
use nixy::healthcheck;
use nixy::marathon::Marathon;
use nixy::metrics::Metrics;
use nixy::state::Store;
use nixy::worker;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config_path = "nixy.toml".to_string();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-f" => {
                config_path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("-f requires a path argument"))?;
            }
            "-v" | "--version" => {
                println!("{}", VERSION);
                return Ok(());
            }
            other => {
                anyhow::bail!("unknown argument '{}' (usage: {} [-f config.toml] [-v])", other, PKG_NAME);
            }
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nixy=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration; startup errors are fatal
    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "failed to load configuration");
        e
    })?;
    info!(path = %config_path, "configuration loaded");

    let config = Arc::new(config);
    let store = Arc::new(Store::new(Arc::clone(&config)));
    let metrics = Arc::new(Metrics::new(&config.statsd));
    let marathon = Arc::new(Marathon::new(&config)?);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (queue, queue_rx) = ReloadQueue::new();

    // Endpoint health monitor
    tokio::spawn(healthcheck::run_monitor(
        Arc::clone(&marathon),
        Arc::clone(&store),
        config.marathon.clone(),
        shutdown_rx.clone(),
    ));

    // Marathon event subscriber
    tokio::spawn(events::run_subscriber(
        Arc::clone(&marathon),
        Arc::clone(&store),
        queue.clone(),
        shutdown_rx.clone(),
    ));

    // Reload worker
    tokio::spawn(worker::run_worker(
        Arc::clone(&marathon),
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&metrics),
        queue_rx,
        shutdown_rx.clone(),
    ));

    // Converge immediately instead of waiting for the first event.
    if !queue.offer() {
        warn!("startup reload token dropped, queue is full");
    }

    // Admin API server
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse().map_err(|e| {
        error!(port = config.port, error = %e, "invalid admin bind address");
        anyhow::anyhow!("invalid admin bind address: {}", e)
    })?;
    let admin_server = AdminServer::new(
        admin_addr,
        Arc::clone(&config),
        Arc::clone(&store),
        queue,
        shutdown_rx.clone(),
    );

    info!(name = PKG_NAME, version = VERSION, port = config.port, "starting nixy");

    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!(error = %e, "admin server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down...");
    }

    // Signal shutdown and give the workers a moment to wind down
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), admin_handle).await;

    info!("shutdown complete");
    Ok(())
}
