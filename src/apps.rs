//! Routable application model and the state materializer
//!
//! Joins the Marathon task list and app list into the per-app map the
//! template renders from: one port slot per task port index, each slot
//! holding one `host:port` per healthy running task, plus the frontends
//! parsed from the app's `frontends` label.

use crate::marathon::{AppDef, Task};
use serde::Serialize;
use std::collections::HashMap;

/// A routable application derived from Marathon state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct App {
    /// One slot per port index; each slot lists `host:port` per task
    pub tasks: Vec<Vec<String>>,
    /// Routing rules parsed from the `frontends` label
    pub frontends: Vec<Frontend>,
    /// Labels copied verbatim from the app definition
    pub labels: HashMap<String, String>,
    /// Environment copied verbatim from the app definition
    pub env: HashMap<String, String>,
}

/// A proxy routing rule binding names or ports to a port slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frontend {
    #[serde(rename = "type")]
    pub kind: FrontendKind,
    pub data: Vec<String>,
}

impl Frontend {
    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FrontendKind::Error,
            data: vec![message.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontendKind {
    Http,
    HttpPublic,
    Partner,
    ShopDev,
    Shop,
    Tcp,
    Error,
}

impl FrontendKind {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "http" => Some(Self::Http),
            "http-public" => Some(Self::HttpPublic),
            "partner" => Some(Self::Partner),
            "shop-dev" => Some(Self::ShopDev),
            "shop" => Some(Self::Shop),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }

    /// Whether `c` may appear in a name for this frontend type.
    ///
    /// Domain-name types accept dots and ASCII case-folded letters so that
    /// hostnames like `example.com` validate; tcp frontends name ports.
    fn allows(self, c: char) -> bool {
        match self {
            Self::Http | Self::HttpPublic | Self::ShopDev => {
                c.is_ascii_alphanumeric() || c == '-' || c == '.'
            }
            Self::Partner | Self::Shop => c.is_ascii_alphabetic() || c == '.' || c == '-',
            Self::Tcp => c.is_ascii_digit(),
            Self::Error => false,
        }
    }
}

/// Parse a single frontend token of the form `<name>(,<name>)*/<type>`.
///
/// Returns `None` when the token does not match the grammar: missing or
/// extra `/`, unknown type, or a name with characters outside the type's
/// alphabet.
pub fn parse_frontend_token(token: &str) -> Option<Frontend> {
    let mut parts = token.split('/');
    let names = parts.next()?;
    let kind_label = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let kind = FrontendKind::from_label(kind_label)?;
    let mut data = Vec::new();
    for name in names.split(',') {
        if name.is_empty() || !name.chars().all(|c| kind.allows(c)) {
            return None;
        }
        data.push(name.to_string());
    }
    Some(Frontend { kind, data })
}

/// Parse an app's `frontends` label against its port-slot count.
///
/// More tokens than slots, or any malformed token, collapses the whole
/// list into a single error frontend. Parsing stops at the first
/// malformed token.
pub fn parse_frontends(label: &str, slot_count: usize) -> Vec<Frontend> {
    let tokens: Vec<&str> = label.split_whitespace().collect();
    if tokens.len() > slot_count {
        return vec![Frontend::error("more frontends defined than ports exposed")];
    }

    let mut frontends = Vec::with_capacity(tokens.len());
    for token in tokens {
        match parse_frontend_token(token) {
            Some(frontend) => frontends.push(frontend),
            None => return vec![Frontend::error(format!("frontend {} not recognized", token))],
        }
    }
    frontends
}

/// Rebuild the application map from a Marathon snapshot.
///
/// The map is built from scratch; it is never merged with prior content.
/// A task contributes only if it exposes at least one port and, when the
/// app declares health checks, reports at least one result with every
/// result alive.
pub fn sync_apps(tasks: &[Task], defs: &[AppDef]) -> HashMap<String, App> {
    let mut apps: HashMap<String, App> = HashMap::new();

    for def in defs {
        for task in tasks {
            if task.app_id != def.id {
                continue;
            }
            // Skip tasks that do not expose any ports.
            if task.ports.is_empty() {
                continue;
            }
            if !def.health_checks.is_empty() {
                if task.health_check_results.is_empty() {
                    // Task is deploying but not yet monitored as alive. Assume down.
                    continue;
                }
                if task.health_check_results.iter().any(|h| !h.alive) {
                    // At least one health check has failed. Assume down.
                    continue;
                }
            }

            if let Some(app) = apps.get_mut(&def.id) {
                for (slot, port) in app.tasks.iter_mut().zip(&task.ports) {
                    slot.push(format!("{}:{}", task.host, port));
                }
            } else {
                apps.insert(
                    def.id.clone(),
                    App {
                        tasks: task
                            .ports
                            .iter()
                            .map(|port| vec![format!("{}:{}", task.host, port)])
                            .collect(),
                        frontends: Vec::new(),
                        labels: def.labels.clone(),
                        env: def.env.clone(),
                    },
                );
            }
        }
    }

    // Frontends come from the app definition, parsed once the slots exist.
    for def in defs {
        let Some(app) = apps.get_mut(&def.id) else {
            continue;
        };
        if let Some(label) = def.labels.get("frontends") {
            app.frontends = parse_frontends(label, app.tasks.len());
        }
    }

    apps
}
