//! Reload worker and the reload pipeline
//!
//! One serial consumer drains the reload queue at a floor of one attempt
//! per second. Each attempt runs the full pipeline: fetch Marathon state,
//! materialize the application map, render the config, validate it,
//! install it, and signal nginx. A stage failure aborts the attempt and
//! leaves the earlier stages' timestamps in place; the worker then waits
//! for the next token.

use crate::apps;
use crate::config::Config;
use crate::error::Result;
use crate::marathon::Marathon;
use crate::metrics::Metrics;
use crate::nginx;
use crate::state::Store;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

const RELOAD_INTERVAL: Duration = Duration::from_secs(1);

/// Run the reload worker until shutdown.
pub async fn run_worker(
    marathon: Arc<Marathon>,
    store: Arc<Store>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    mut queue_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(RELOAD_INTERVAL);
    // A slow reload must not earn back-to-back catch-up ticks; the
    // one-per-second floor holds regardless of queue pressure.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("reload worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let token = tokio::select! {
                    token = queue_rx.recv() => token,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                };
                if token.is_none() {
                    break;
                }

                let start = Instant::now();
                match reload(&marathon, &store, &config).await {
                    Ok(()) => {
                        let elapsed = start.elapsed();
                        info!(took = ?elapsed, "config updated");
                        metrics.incr("reload.success");
                        metrics.time("reload.time", elapsed);
                    }
                    Err(e) => {
                        error!(error = %e, "config update failed");
                        metrics.incr("reload.failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    info!("reload worker shutting down");
}

/// One reload attempt: fetch, materialize, render, validate, install,
/// signal. Each stage stamps its timestamp only on success.
pub async fn reload(marathon: &Marathon, store: &Store, config: &Config) -> Result<()> {
    let endpoint = store
        .first_healthy_endpoint()
        .await
        .ok_or(crate::error::Error::EndpointsDown)?;

    let (tasks, defs) = marathon.fetch(&endpoint).await.map_err(|e| {
        error!(error = %e, %endpoint, "unable to sync from marathon");
        e
    })?;

    let apps = apps::sync_apps(&tasks.tasks, &defs.apps);
    store.replace_apps(apps).await;

    let snapshot = store.snapshot().await;
    let candidate = nginx::render_to_candidate(
        &config.nginx_template,
        &config.nginx_config,
        &snapshot,
    )
    .map_err(|e| {
        error!(error = %e, "unable to generate nginx config");
        e
    })?;
    store.stamp_config_rendered().await;

    nginx::validate(&config.nginx_cmd, candidate.path())
        .await
        .map_err(|e| {
            error!(error = %e, "rendered nginx config failed validation");
            e
        })?;
    store.stamp_config_valid().await;

    nginx::install(candidate, &config.nginx_config)?;
    nginx::reload_nginx(&config.nginx_cmd).await.map_err(|e| {
        error!(error = %e, "unable to reload nginx");
        e
    })?;
    store.stamp_nginx_reload().await;

    Ok(())
}
