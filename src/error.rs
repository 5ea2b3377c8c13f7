//! Error kinds for the reload pipeline.
//!
//! Each stage of a reload attempt fails with its own variant so the worker
//! can log precisely which stage aborted. Stage errors never escape the
//! worker loop; they abort the current attempt only.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No Marathon endpoint is currently marked healthy.
    #[error("no healthy marathon endpoint available")]
    EndpointsDown,

    /// The HTTP request itself failed (connect, timeout, body read).
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// An endpoint answered with an unexpected status code.
    #[error("{endpoint} returned {status}")]
    EndpointStatus {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    /// A Marathon response body did not decode.
    #[error("json decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The nginx template could not be read or parsed.
    #[error("template parse error: {0}")]
    TemplateParse(String),

    /// The nginx template parsed but failed to render against the state.
    #[error("template render error: {0}")]
    TemplateRender(String),

    /// `nginx -t` rejected the rendered candidate config.
    #[error("nginx config validation failed: {0}")]
    ConfigInvalid(String),

    /// Filesystem error writing the candidate or renaming it over the
    /// live config.
    #[error("unable to install config: {0}")]
    Install(#[from] std::io::Error),

    /// `nginx -s reload` failed after the config was installed.
    #[error("nginx reload failed: {0}")]
    NginxReload(String),
}
