//! Statsd metrics emitter
//!
//! A thin facade over `cadence`: counters and timings for the reload
//! worker. Metrics must never affect the pipeline, so construction
//! failures degrade to a no-op emitter and send failures are logged at
//! debug. `sample_rate` is a percentage (0-100) applied client-side.

use crate::config::StatsdConfig;
use cadence::{Counted, StatsdClient, Timed, UdpMetricSink};
use rand::Rng;
use std::net::UdpSocket;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Metrics {
    client: Option<StatsdClient>,
    sample_rate: u32,
}

impl Metrics {
    pub fn new(config: &StatsdConfig) -> Self {
        if config.addr.is_empty() {
            return Self {
                client: None,
                sample_rate: config.sample_rate,
            };
        }

        let client = Self::build_client(config);
        if client.is_none() {
            warn!(addr = %config.addr, "unable to set up statsd, metrics disabled");
        }
        Self {
            client,
            sample_rate: config.sample_rate,
        }
    }

    fn build_client(config: &StatsdConfig) -> Option<StatsdClient> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.set_nonblocking(true).ok()?;
        let sink = UdpMetricSink::from(config.addr.as_str(), socket).ok()?;
        Some(StatsdClient::from_sink(&config.namespace, sink))
    }

    fn sampled(&self) -> bool {
        self.sample_rate >= 100 || rand::thread_rng().gen_ratio(self.sample_rate, 100)
    }

    pub fn incr(&self, key: &str) {
        let Some(client) = &self.client else {
            return;
        };
        if !self.sampled() {
            return;
        }
        if let Err(e) = client.count(key, 1_i64) {
            debug!(key, error = %e, "statsd count failed");
        }
    }

    pub fn time(&self, key: &str, elapsed: Duration) {
        let Some(client) = &self.client else {
            return;
        };
        if !self.sampled() {
            return;
        }
        if let Err(e) = client.time(key, elapsed.as_millis() as u64) {
            debug!(key, error = %e, "statsd timing failed");
        }
    }
}
