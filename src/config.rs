use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global configuration for nixy
///
/// # Security Warning
///
/// `nginx_cmd` is executed directly and `user`/`pass` are sent as HTTP
/// Basic credentials. Configuration files must be protected with
/// appropriate file permissions (e.g., readable only by the service user).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Value exposed to the template for the X-Proxy header
    #[serde(default)]
    pub xproxy: String,

    /// Port for the admin API (default: 6000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Marathon API base URLs, in order of preference
    pub marathon: Vec<String>,

    /// HTTP Basic user for Marathon requests (empty disables auth)
    #[serde(default)]
    pub user: String,

    /// HTTP Basic password for Marathon requests
    #[serde(default)]
    pub pass: String,

    /// Path the rendered nginx config is installed to
    pub nginx_config: String,

    /// Path to the nginx config template (re-read on every render)
    pub nginx_template: String,

    /// The nginx binary, used for `-t` validation and `-s reload`
    pub nginx_cmd: String,

    /// Statsd emitter settings
    #[serde(default)]
    pub statsd: StatsdConfig,
}

/// Statsd sink configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatsdConfig {
    /// UDP address of the statsd daemon (empty disables metrics)
    #[serde(default)]
    pub addr: String,

    /// Prefix for every emitted metric
    #[serde(default)]
    pub namespace: String,

    /// Percentage of metric sends to keep, 0-100 (default: 100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            namespace: String::new(),
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_port() -> u16 {
    6000
}

fn default_sample_rate() -> u32 {
    100
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.marathon.is_empty() {
            errors.push("at least one marathon endpoint is required".to_string());
        }
        for (field, value) in [
            ("nginx_config", &self.nginx_config),
            ("nginx_template", &self.nginx_template),
            ("nginx_cmd", &self.nginx_cmd),
        ] {
            if value.is_empty() {
                errors.push(format!("'{}' must not be empty", field));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
