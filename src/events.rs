//! Reload queue and the Marathon event subscriber
//!
//! The queue is the coalescing point between everything that wants a
//! reload (event stream, admin API, startup) and the single worker. Its
//! capacity of 2 allows at most one pending reload behind one in
//! progress; offers beyond that are dropped, which is the coalescing
//! contract.
//!
//! The subscriber keeps one long-lived `text/event-stream` connection to
//! the first healthy endpoint. Marathon emits a keepalive roughly every
//! 10 s, so a 15 s inactivity watchdog bounds both the connect and every
//! line read; expiry drops the response, which cancels the in-flight
//! request. A watchdog that would fire after the stream already ended is
//! a no-op by construction.

use crate::marathon::Marathon;
use crate::state::Store;
use futures_util::TryStreamExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

const SUBSCRIBE_INTERVAL: Duration = Duration::from_secs(1);
const WATCHDOG: Duration = Duration::from_secs(15);

/// Coalescing reload signal queue (capacity 2)
#[derive(Clone)]
pub struct ReloadQueue {
    tx: mpsc::Sender<()>,
}

impl ReloadQueue {
    pub fn new() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(2);
        (Self { tx }, rx)
    }

    /// Non-blocking offer; returns false when the queue is full and the
    /// token was dropped.
    pub fn offer(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Run the event subscriber until shutdown.
pub async fn run_subscriber(
    marathon: Arc<Marathon>,
    store: Arc<Store>,
    queue: ReloadQueue,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(SUBSCRIBE_INTERVAL);
    // Ticks missed while a stream was open must not burst into a volley
    // of reconnect attempts when it closes.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("event subscriber started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(endpoint) = store.first_healthy_endpoint().await else {
                    warn!("no healthy marathon endpoint for event stream");
                    continue;
                };
                match tokio::time::timeout(WATCHDOG, marathon.open_event_stream(&endpoint)).await {
                    Err(_) => {
                        warn!(%endpoint, "event stream request was cancelled");
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, %endpoint, "unable to access marathon event stream");
                    }
                    Ok(Ok(resp)) => {
                        tokio::select! {
                            _ = read_events(resp, &endpoint, &queue, WATCHDOG) => {
                                warn!(%endpoint, "event stream connection was closed, re-opening");
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
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
    info!("event subscriber shutting down");
}

/// Read lines off an open event stream until EOF, a read error, or the
/// inactivity watchdog expires. Lines prefixed `event: ` offer one token
/// to the reload queue; anything else is discarded.
pub async fn read_events(
    resp: reqwest::Response,
    endpoint: &str,
    queue: &ReloadQueue,
    watchdog: Duration,
) {
    let stream = resp
        .bytes_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let mut lines = BufReader::new(StreamReader::new(stream)).lines();

    loop {
        match tokio::time::timeout(watchdog, lines.next_line()).await {
            // Watchdog expired: dropping the reader cancels the request.
            Err(_) => {
                warn!(%endpoint, "event stream request was cancelled");
                return;
            }
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                error!(error = %e, %endpoint, "error reading marathon event stream");
                return;
            }
            Ok(Ok(Some(line))) => {
                let Some(event) = line.strip_prefix("event: ") else {
                    continue;
                };
                info!(event = event.trim(), %endpoint, "marathon event received");
                if !queue.offer() {
                    warn!("queue is full");
                }
            }
        }
    }
}
