use crate::config::Config;
use crate::events::ReloadQueue;
use crate::nginx;
use crate::state::{EndpointStatus, Store};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Version information for nixy
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json; charset=utf-8")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Health report for `/v1/health`
#[derive(Debug, Serialize)]
struct Health {
    config: Status,
    template: Status,
    endpoints: Vec<EndpointStatus>,
}

#[derive(Debug, Serialize)]
struct Status {
    healthy: bool,
    message: String,
}

impl Status {
    fn from_check(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                message: "OK".to_string(),
            },
            Err(e) => Self {
                healthy: false,
                message: e.to_string(),
            },
        }
    }
}

/// Admin API server: version, reload trigger, config snapshot, health
pub struct AdminServer {
    bind_addr: SocketAddr,
    config: Arc<Config>,
    store: Arc<Store>,
    queue: ReloadQueue,
    shutdown_rx: watch::Receiver<bool>,
}

impl AdminServer {
    pub fn new(
        bind_addr: SocketAddr,
        config: Arc<Config>,
        store: Arc<Store>,
        queue: ReloadQueue,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            config,
            store,
            queue,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "admin API server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let config = Arc::clone(&self.config);
                            let store = Arc::clone(&self.store);
                            let queue = self.queue.clone();

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let config = Arc::clone(&config);
                                    let store = Arc::clone(&store);
                                    let queue = queue.clone();
                                    async move {
                                        handle_request(req, config, store, queue, addr).await
                                    }
                                });

                                if let Err(e) = AutoBuilder::new(TokioExecutor::new())
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(addr = %addr, error = %e, "admin connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept admin connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("admin server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    config: Arc<Config>,
    store: Arc<Store>,
    queue: ReloadQueue,
    addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method();

    debug!(%method, %path, "admin API request");

    let response = match (method, path) {
        // Version banner
        (&Method::GET, "/") => response(StatusCode::OK, format!("{} {}\n", PKG_NAME, VERSION)),

        // Enqueue a reload token; coalesced when the queue is full
        (&Method::GET, "/v1/reload") => {
            info!(client = %addr, "marathon reload triggered");
            if queue.offer() {
                response(StatusCode::ACCEPTED, "queued\n")
            } else {
                warn!(client = %addr, "reload queue is full");
                response(StatusCode::ACCEPTED, "queue is full\n")
            }
        }

        // Current configuration and derived application map
        (&Method::GET, "/v1/config") => {
            let snapshot = store.snapshot().await;
            match serde_json::to_string_pretty(&snapshot) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => {
                    error!(error = %e, "unable to serialize config snapshot");
                    response(StatusCode::INTERNAL_SERVER_ERROR, "serialization error\n")
                }
            }
        }

        // Re-check template and installed config, report endpoint liveness
        (&Method::GET, "/v1/health") => {
            let snapshot = store.snapshot().await;
            let template =
                Status::from_check(nginx::check_template(&config.nginx_template, &snapshot));
            let conf =
                Status::from_check(nginx::check_conf(&config.nginx_cmd, &config.nginx_config).await);
            let endpoints = store.endpoint_statuses().await;

            let healthy =
                template.healthy && conf.healthy && endpoints.iter().all(|ep| ep.healthy);
            let health = Health {
                config: conf,
                template,
                endpoints,
            };
            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            match serde_json::to_string_pretty(&health) {
                Ok(body) => json_response(status, body),
                Err(e) => {
                    error!(error = %e, "unable to serialize health report");
                    response(StatusCode::INTERNAL_SERVER_ERROR, "serialization error\n")
                }
            }
        }

        // 404 for everything else
        _ => response(StatusCode::NOT_FOUND, "not found\n"),
    };

    Ok(response)
}
