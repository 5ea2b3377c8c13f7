//! Endpoint health monitor
//!
//! Probes every configured Marathon endpoint on a fixed cadence and
//! writes liveness annotations into the state store. The annotated list
//! drives endpoint selection for both the event subscriber and the
//! fetcher; configuration order is preference order.

use crate::marathon::Marathon;
use crate::state::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Run the health monitor until shutdown.
pub async fn run_monitor(
    marathon: Arc<Marathon>,
    store: Arc<Store>,
    endpoints: Vec<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(PROBE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(
        interval_secs = PROBE_INTERVAL.as_secs(),
        endpoints = endpoints.len(),
        "endpoint health monitor started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                probe_endpoints(&marathon, &store, &endpoints).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("endpoint health monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// One probe sweep over every endpoint, in configuration order.
pub async fn probe_endpoints(marathon: &Marathon, store: &Store, endpoints: &[String]) {
    for endpoint in endpoints {
        match marathon.ping(endpoint).await {
            Ok(()) => {
                debug!(%endpoint, "endpoint is healthy");
                store.set_endpoint_status(endpoint, true, "OK").await;
            }
            Err(e) => {
                error!(error = %e, %endpoint, "endpoint is down");
                store.set_endpoint_status(endpoint, false, e.to_string()).await;
            }
        }
    }
}
