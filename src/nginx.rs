//! Config rendering, validation, and the atomic install
//!
//! A reload attempt runs render -> validate -> install -> signal. The
//! candidate config is rendered into a temp file created in the target's
//! directory so the final rename stays on one filesystem and is atomic.
//! Any failure leaves the on-disk config and the running nginx untouched.
//!
//! The template file is re-read and re-parsed on every render so edits
//! are picked up without a restart. Two helper functions are bound into
//! every render: `fileExists(path=...)` and `splitStr(s=...)` (single
//! ASCII space). Both are pure.

use crate::error::{Error, Result};
use crate::state::Snapshot;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tera::{Context, Tera, Value};
use tokio::process::Command;

const TEMPLATE_NAME: &str = "nginx.conf";

/// Render the template against a state snapshot.
pub fn render_to_string(template_path: &str, snapshot: &Snapshot) -> Result<String> {
    let source = std::fs::read_to_string(template_path)
        .map_err(|e| Error::TemplateParse(format!("{}: {}", template_path, e)))?;

    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, &source)
        .map_err(|e| Error::TemplateParse(describe(&e)))?;
    tera.register_function("fileExists", file_exists);
    tera.register_function("splitStr", split_str);

    let context =
        Context::from_serialize(snapshot).map_err(|e| Error::TemplateRender(describe(&e)))?;
    tera.render(TEMPLATE_NAME, &context)
        .map_err(|e| Error::TemplateRender(describe(&e)))
}

/// Render into a fresh temp file next to the target config.
///
/// The caller validates the returned file and either persists it over
/// the target or drops it, which removes it.
pub fn render_to_candidate(
    template_path: &str,
    config_path: &str,
    snapshot: &Snapshot,
) -> Result<NamedTempFile> {
    let rendered = render_to_string(template_path, snapshot)?;

    let dir = match Path::new(config_path).parent() {
        Some(parent) if parent != Path::new("") => parent,
        _ => Path::new("."),
    };
    let mut candidate = tempfile::Builder::new()
        .prefix(".nginx.conf.")
        .tempfile_in(dir)?;
    candidate.write_all(rendered.as_bytes())?;
    candidate.flush()?;
    Ok(candidate)
}

/// Run `<nginx_cmd> -c <path> -t` and capture stderr on failure.
pub async fn validate(nginx_cmd: &str, path: &Path) -> Result<()> {
    let output = Command::new(nginx_cmd)
        .arg("-c")
        .arg(path)
        .arg("-t")
        .output()
        .await
        .map_err(|e| Error::ConfigInvalid(e.to_string()))?;

    if !output.status.success() {
        return Err(Error::ConfigInvalid(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Atomically rename the validated candidate over the live config.
pub fn install(candidate: NamedTempFile, config_path: &str) -> Result<()> {
    candidate
        .persist(config_path)
        .map(|_| ())
        .map_err(|e| Error::Install(e.error))
}

/// Run `<nginx_cmd> -s reload` and capture stderr on failure.
pub async fn reload_nginx(nginx_cmd: &str) -> Result<()> {
    let output = Command::new(nginx_cmd)
        .arg("-s")
        .arg("reload")
        .output()
        .await
        .map_err(|e| Error::NginxReload(e.to_string()))?;

    if !output.status.success() {
        return Err(Error::NginxReload(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Render-check the template against the current state, discarding output.
pub fn check_template(template_path: &str, snapshot: &Snapshot) -> Result<()> {
    render_to_string(template_path, snapshot).map(|_| ())
}

/// Validate the installed on-disk config with `nginx -t`.
pub async fn check_conf(nginx_cmd: &str, config_path: &str) -> Result<()> {
    validate(nginx_cmd, Path::new(config_path)).await
}

fn file_exists(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let path = args
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("fileExists requires a string `path` argument"))?;
    Ok(Value::Bool(Path::new(path).exists()))
}

fn split_str(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let s = args
        .get("s")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("splitStr requires a string `s` argument"))?;
    Ok(Value::Array(
        s.split(' ').map(|part| Value::String(part.to_string())).collect(),
    ))
}

fn describe(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
