//! Process-wide state store
//!
//! One readers-writer lock guards the derived application map, the
//! per-endpoint health annotations, and the stage timestamps. Admin
//! handlers and the renderer take the reader; the materializer, the
//! health monitor, and the stamp operations take the writer. Replacing
//! the apps map and stamping the later stages are deliberately separate
//! writes: each stamp records its own stage outcome.

use crate::apps::App;
use crate::config::{Config, StatsdConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health annotation for one configured Marathon endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: String,
    pub healthy: bool,
    pub message: String,
}

/// Timestamps of the last successful run of each reload stage
#[derive(Debug, Clone, Default, Serialize)]
pub struct Updates {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_config_rendered: Option<DateTime<Utc>>,
    pub last_config_valid: Option<DateTime<Utc>>,
    pub last_nginx_reload: Option<DateTime<Utc>>,
}

/// Serializable view of configuration plus derived state.
///
/// This is both the template's data context and the `/v1/config` body.
/// Only `xproxy`, `statsd`, `last_updates`, and `apps` are exposed;
/// credentials, endpoints, the admin port, and the nginx paths/command
/// are withheld.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub xproxy: String,
    pub statsd: StatsdConfig,
    pub last_updates: Updates,
    pub apps: HashMap<String, App>,
}

struct Inner {
    endpoints: Vec<EndpointStatus>,
    apps: HashMap<String, App>,
    updates: Updates,
}

/// The state store shared by every task
pub struct Store {
    config: Arc<Config>,
    inner: RwLock<Inner>,
}

impl Store {
    /// Seed the store from configuration. Endpoints start out healthy so
    /// the subscriber can connect before the first probe tick.
    pub fn new(config: Arc<Config>) -> Self {
        let endpoints = config
            .marathon
            .iter()
            .map(|endpoint| EndpointStatus {
                endpoint: endpoint.clone(),
                healthy: true,
                message: "OK".to_string(),
            })
            .collect();
        Self {
            config,
            inner: RwLock::new(Inner {
                endpoints,
                apps: HashMap::new(),
                updates: Updates::default(),
            }),
        }
    }

    /// The first healthy endpoint in configuration order, if any.
    pub async fn first_healthy_endpoint(&self) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .endpoints
            .iter()
            .find(|status| status.healthy)
            .map(|status| status.endpoint.clone())
    }

    pub async fn endpoint_statuses(&self) -> Vec<EndpointStatus> {
        self.inner.read().await.endpoints.clone()
    }

    pub async fn set_endpoint_status(
        &self,
        endpoint: &str,
        healthy: bool,
        message: impl Into<String>,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(status) = inner
            .endpoints
            .iter_mut()
            .find(|status| status.endpoint == endpoint)
        {
            status.healthy = healthy;
            status.message = message.into();
        }
    }

    /// Swap in a freshly materialized application map and stamp the sync.
    pub async fn replace_apps(&self, apps: HashMap<String, App>) {
        let mut inner = self.inner.write().await;
        inner.apps = apps;
        inner.updates.last_sync = Some(Utc::now());
    }

    pub async fn stamp_config_rendered(&self) {
        self.inner.write().await.updates.last_config_rendered = Some(Utc::now());
    }

    pub async fn stamp_config_valid(&self) {
        self.inner.write().await.updates.last_config_valid = Some(Utc::now());
    }

    pub async fn stamp_nginx_reload(&self) {
        self.inner.write().await.updates.last_nginx_reload = Some(Utc::now());
    }

    pub async fn updates(&self) -> Updates {
        self.inner.read().await.updates.clone()
    }

    /// Capture a consistent view under the read lock.
    pub async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            xproxy: self.config.xproxy.clone(),
            statsd: self.config.statsd.clone(),
            last_updates: inner.updates.clone(),
            apps: inner.apps.clone(),
        }
    }
}
