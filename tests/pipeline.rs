//! End-to-end tests for the sync pipeline against a mock Marathon

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use nixy::admin::AdminServer;
use nixy::config::Config;
use nixy::error::Error;
use nixy::events::{read_events, ReloadQueue};
use nixy::healthcheck;
use nixy::marathon::Marathon;
use nixy::state::Store;
use nixy::worker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const TASKS_FIXTURE: &str = r#"{
    "tasks": [
        {"appId": "/web", "host": "hostA", "ports": [31001]},
        {"appId": "/web", "host": "hostB", "ports": [31002]}
    ]
}"#;

const APPS_FIXTURE: &str = r#"{
    "apps": [
        {"id": "/web", "labels": {"frontends": "example.com/http"}, "env": {}, "healthChecks": []}
    ]
}"#;

/// Fixture responses for a mock Marathon endpoint
#[derive(Clone)]
struct MockMarathon {
    ping_status: StatusCode,
    tasks: &'static str,
    apps: &'static str,
}

impl MockMarathon {
    fn healthy() -> Self {
        Self {
            ping_status: StatusCode::OK,
            tasks: TASKS_FIXTURE,
            apps: APPS_FIXTURE,
        }
    }

    fn sick() -> Self {
        Self {
            ping_status: StatusCode::INTERNAL_SERVER_ERROR,
            tasks: TASKS_FIXTURE,
            apps: APPS_FIXTURE,
        }
    }

    async fn handle(
        self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let (status, body) = match req.uri().path() {
            "/ping" => (self.ping_status, "pong".to_string()),
            "/v2/tasks" => (StatusCode::OK, self.tasks.to_string()),
            "/v2/apps" => (StatusCode::OK, self.apps.to_string()),
            _ => (StatusCode::NOT_FOUND, "not found".to_string()),
        };
        Ok(Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }
}

/// Serve a mock Marathon on an ephemeral port; returns its base URL.
async fn spawn_mock(mock: MockMarathon) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mock = mock.clone();
            tokio::spawn(async move {
                let service =
                    service_fn(move |req| MockMarathon::handle(mock.clone(), req));
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    format!("http://{}", addr)
}

fn test_config(endpoints: &[String], dir: &tempfile::TempDir, nginx_cmd: &str) -> Arc<Config> {
    let template_path = dir.path().join("nginx.tmpl");
    std::fs::write(
        &template_path,
        "# managed by nixy\n\
         {% for id, app in apps %}upstream {{ id }} {\n\
         {% for server in app.tasks.0 %}  server {{ server }};\n{% endfor %}}\n{% endfor %}",
    )
    .unwrap();

    let endpoints_toml = endpoints
        .iter()
        .map(|ep| format!("\"{}\"", ep))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
marathon = [{}]
nginx_config = "{}"
nginx_template = "{}"
nginx_cmd = "{}"
"#,
        endpoints_toml,
        dir.path().join("nginx.conf").display(),
        template_path.display(),
        nginx_cmd,
    );
    Arc::new(toml::from_str(&toml).unwrap())
}

/// Send a simple HTTP request and return the raw response
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_happy_path_reload() {
    let endpoint = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint], &dir, "true");

    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    worker::reload(&marathon, &store, &config).await.unwrap();

    // The rendered config was installed.
    let rendered = std::fs::read_to_string(dir.path().join("nginx.conf")).unwrap();
    assert!(rendered.contains("upstream /web {"));
    assert!(rendered.contains("server hostA:31001;"));
    assert!(rendered.contains("server hostB:31002;"));

    // The application map matches the fixture.
    let snapshot = store.snapshot().await;
    let app = &snapshot.apps["/web"];
    assert_eq!(app.tasks, vec![vec!["hostA:31001", "hostB:31002"]]);
    assert_eq!(app.frontends.len(), 1);

    // All four timestamps advanced, in stage order.
    let updates = store.updates().await;
    let sync = updates.last_sync.unwrap();
    let rendered_at = updates.last_config_rendered.unwrap();
    let valid = updates.last_config_valid.unwrap();
    let reloaded = updates.last_nginx_reload.unwrap();
    assert!(sync <= rendered_at);
    assert!(rendered_at <= valid);
    assert!(valid <= reloaded);
}

#[tokio::test]
async fn test_back_to_back_reloads_render_identically() {
    let endpoint = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint], &dir, "true");

    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    worker::reload(&marathon, &store, &config).await.unwrap();
    let first = std::fs::read(dir.path().join("nginx.conf")).unwrap();
    worker::reload(&marathon, &store, &config).await.unwrap();
    let second = std::fs::read(dir.path().join("nginx.conf")).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_validation_failure_preserves_config() {
    let endpoint = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint], &dir, "false");
    std::fs::write(dir.path().join("nginx.conf"), "previous contents").unwrap();

    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    let err = worker::reload(&marathon, &store, &config).await.unwrap_err();
    assert!(matches!(err, Error::ConfigInvalid(_)));

    // The on-disk config is untouched and no candidate remains.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nginx.conf")).unwrap(),
        "previous contents"
    );
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".nginx.conf."))
        .collect();
    assert!(leftovers.is_empty());

    // Stamps advanced exactly up to the failed stage.
    let updates = store.updates().await;
    assert!(updates.last_sync.is_some());
    assert!(updates.last_config_rendered.is_some());
    assert!(updates.last_config_valid.is_none());
    assert!(updates.last_nginx_reload.is_none());
}

#[tokio::test]
async fn test_reload_without_healthy_endpoint_fails_fast() {
    let endpoint = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint.clone()], &dir, "true");

    let store = Store::new(Arc::clone(&config));
    store.set_endpoint_status(&endpoint, false, "down").await;
    let marathon = Marathon::new(&config).unwrap();

    let err = worker::reload(&marathon, &store, &config).await.unwrap_err();
    assert!(matches!(err, Error::EndpointsDown));
    assert!(store.updates().await.last_sync.is_none());
}

#[tokio::test]
async fn test_endpoint_failover() {
    let sick = spawn_mock(MockMarathon::sick()).await;
    let healthy = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[sick.clone(), healthy.clone()], &dir, "true");

    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    // One monitor sweep marks the first endpoint down.
    healthcheck::probe_endpoints(&marathon, &store, &config.marathon).await;
    let statuses = store.endpoint_statuses().await;
    assert!(!statuses[0].healthy);
    assert!(statuses[0].message.contains("500"));
    assert!(statuses[1].healthy);

    // The fetcher follows the annotated preference order.
    assert_eq!(store.first_healthy_endpoint().await.unwrap(), healthy);
    worker::reload(&marathon, &store, &config).await.unwrap();
    assert!(store.updates().await.last_nginx_reload.is_some());
}

#[tokio::test]
async fn test_unreachable_endpoint_is_marked_down() {
    // Reserve a port and close it so the probe gets a connect error.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint.clone()], &dir, "true");
    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    healthcheck::probe_endpoints(&marathon, &store, &config.marathon).await;
    let statuses = store.endpoint_statuses().await;
    assert!(!statuses[0].healthy);
    assert!(store.first_healthy_endpoint().await.is_none());
}

#[tokio::test]
async fn test_event_stream_offers_tokens_and_watchdog_cancels() {
    // A raw socket server: serves one SSE event, then goes silent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        stream
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n\
                  event: deployment_info\ndata: {}\n\n",
            )
            .await
            .unwrap();
        stream.flush().await.unwrap();
        // Keep the connection open without sending anything further.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let endpoint = format!("http://{}", addr);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint.clone()], &dir, "true");
    let marathon = Marathon::new(&config).unwrap();
    let (queue, mut rx) = ReloadQueue::new();

    let resp = marathon.open_event_stream(&endpoint).await.unwrap();
    let started = std::time::Instant::now();
    read_events(resp, &endpoint, &queue, Duration::from_millis(300)).await;

    // The watchdog cancelled the idle stream rather than waiting forever.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(5));

    // Exactly one `event: ` line was seen.
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_admin_surface() {
    let endpoint = spawn_mock(MockMarathon::healthy()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint.clone()], &dir, "true");
    std::fs::write(dir.path().join("nginx.conf"), "# empty").unwrap();

    let store = Arc::new(Store::new(Arc::clone(&config)));
    let (queue, _queue_rx) = ReloadQueue::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // Pick an ephemeral port for the admin server.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = probe.local_addr().unwrap();
    drop(probe);

    let server = AdminServer::new(
        admin_addr,
        Arc::clone(&config),
        Arc::clone(&store),
        queue,
        shutdown_rx,
    );
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Version banner
    let response = http_get(admin_addr, "/").await;
    assert!(response.contains("HTTP/1.1 200"));
    assert!(response.contains(&format!("nixy {}", env!("CARGO_PKG_VERSION"))));

    // Reload queue accepts two tokens, then coalesces
    let response = http_get(admin_addr, "/v1/reload").await;
    assert!(response.contains("HTTP/1.1 202"));
    assert!(response.contains("queued"));
    let response = http_get(admin_addr, "/v1/reload").await;
    assert!(response.contains("queued"));
    let response = http_get(admin_addr, "/v1/reload").await;
    assert!(response.contains("HTTP/1.1 202"));
    assert!(response.contains("queue is full"));

    // Config snapshot exposes only xproxy, statsd, last_updates, apps
    let response = http_get(admin_addr, "/v1/config").await;
    assert!(response.contains("HTTP/1.1 200"));
    assert!(response.contains("\"apps\""));
    assert!(response.contains("\"last_updates\""));
    assert!(!response.contains("\"pass\""));
    assert!(!response.contains("\"marathon\""));
    assert!(!response.contains("\"nginx_config\""));
    assert!(!response.contains("\"nginx_template\""));
    assert!(!response.contains("\"nginx_cmd\""));

    // Healthy: template renders, `nginx -t` stub passes, endpoint is up
    let response = http_get(admin_addr, "/v1/health").await;
    assert!(response.contains("HTTP/1.1 200"));
    assert!(response.contains("\"endpoints\""));

    // An unhealthy endpoint flips the health report to 500
    store.set_endpoint_status(&endpoint, false, "down").await;
    let response = http_get(admin_addr, "/v1/health").await;
    assert!(response.contains("HTTP/1.1 500"));

    // Unknown paths 404
    let response = http_get(admin_addr, "/nope").await;
    assert!(response.contains("HTTP/1.1 404"));
}

#[tokio::test]
async fn test_fetch_decode_error_aborts_attempt() {
    let mock = MockMarathon {
        ping_status: StatusCode::OK,
        tasks: "{ not json",
        apps: APPS_FIXTURE,
    };
    let endpoint = spawn_mock(mock).await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&[endpoint], &dir, "true");

    let store = Store::new(Arc::clone(&config));
    let marathon = Marathon::new(&config).unwrap();

    let err = worker::reload(&marathon, &store, &config).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(store.updates().await.last_sync.is_none());
    assert!(!dir.path().join("nginx.conf").exists());
}
