//! Marathon REST client and wire types
//!
//! One shared `reqwest::Client` backs every request so connections are
//! reused across the health monitor, the fetcher, and the event
//! subscriber. Probes and fetches carry a 5 s request timeout; the event
//! stream deliberately has none (its lifetime is bounded by the
//! subscriber's inactivity watchdog).

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One running task of a Marathon app
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub app_id: String,
    pub host: String,
    pub ports: Vec<u32>,
    pub health_check_results: Vec<HealthCheckResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HealthCheckResult {
    pub alive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

/// A Marathon app definition (only the fields the materializer needs)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDef {
    pub id: String,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    /// Only the presence of health checks matters; elements stay opaque.
    pub health_checks: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppsResponse {
    pub apps: Vec<AppDef>,
}

/// Client for the Marathon REST API
pub struct Marathon {
    http: reqwest::Client,
    user: String,
    pass: String,
}

impl Marathon {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            user: config.user.clone(),
            pass: config.pass.clone(),
        })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if !self.user.is_empty() {
            req = req.basic_auth(&self.user, Some(&self.pass));
        }
        req
    }

    /// Probe `GET <endpoint>/ping`; healthy iff the response is exactly 200.
    pub async fn ping(&self, endpoint: &str) -> Result<()> {
        let resp = self
            .get(format!("{}/ping", endpoint))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if resp.status().as_u16() != 200 {
            return Err(Error::EndpointStatus {
                endpoint: endpoint.to_string(),
                status: resp.status(),
            });
        }
        Ok(())
    }

    /// Fetch `/v2/tasks` and `/v2/apps` concurrently from one endpoint.
    ///
    /// Both requests always run to completion. If both fail, the tasks
    /// error is the one reported.
    pub async fn fetch(&self, endpoint: &str) -> Result<(TasksResponse, AppsResponse)> {
        let (tasks, apps) = tokio::join!(
            self.get_json::<TasksResponse>(endpoint, "/v2/tasks"),
            self.get_json::<AppsResponse>(endpoint, "/v2/apps"),
        );
        Ok((tasks?, apps?))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
    ) -> Result<T> {
        let resp = self
            .get(format!("{}{}", endpoint, path))
            .timeout(REQUEST_TIMEOUT)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::EndpointStatus {
                endpoint: endpoint.to_string(),
                status: resp.status(),
            });
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Open the server-sent event stream on `/v2/events`.
    ///
    /// No client timeout is set; the caller bounds the connect and every
    /// subsequent read with its inactivity watchdog.
    pub async fn open_event_stream(&self, endpoint: &str) -> Result<reqwest::Response> {
        let resp = self
            .get(format!("{}/v2/events", endpoint))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::EndpointStatus {
                endpoint: endpoint.to_string(),
                status: resp.status(),
            });
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tasks() {
        let body = r#"{
            "tasks": [
                {
                    "appId": "/web",
                    "host": "agent-1",
                    "id": "web.abc123",
                    "ports": [31001, 31002],
                    "healthCheckResults": [{"alive": true, "consecutiveFailures": 0}],
                    "stagedAt": "2016-01-01T00:00:00.000Z"
                },
                {
                    "appId": "/batch",
                    "host": "agent-2",
                    "ports": []
                }
            ]
        }"#;
        let decoded: TasksResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.tasks.len(), 2);
        assert_eq!(decoded.tasks[0].app_id, "/web");
        assert_eq!(decoded.tasks[0].ports, vec![31001, 31002]);
        assert!(decoded.tasks[0].health_check_results[0].alive);
        // Missing healthCheckResults decodes as empty.
        assert!(decoded.tasks[1].health_check_results.is_empty());
    }

    #[test]
    fn test_decode_apps() {
        let body = r#"{
            "apps": [
                {
                    "id": "/web",
                    "labels": {"frontends": "example.com/http"},
                    "env": {"RAILS_ENV": "production"},
                    "healthChecks": [{"path": "/health", "protocol": "HTTP"}]
                },
                {"id": "/bare"}
            ]
        }"#;
        let decoded: AppsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.apps.len(), 2);
        assert_eq!(
            decoded.apps[0].labels.get("frontends").unwrap(),
            "example.com/http"
        );
        assert_eq!(decoded.apps[0].health_checks.len(), 1);
        assert!(decoded.apps[1].labels.is_empty());
        assert!(decoded.apps[1].health_checks.is_empty());
    }
}
