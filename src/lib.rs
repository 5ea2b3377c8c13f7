//! Nixy - keeps nginx routing in sync with a Marathon cluster
//!
//! This library provides a control-plane bridge that:
//! - Watches Marathon's event stream and re-syncs on every event
//! - Tracks the health of every configured Marathon endpoint
//! - Joins tasks and apps into a routable per-app model
//! - Renders an nginx config from a user template, validates it with
//!   `nginx -t`, installs it atomically, and triggers a live reload
//! - Coalesces reload bursts through a bounded queue with a rate floor
//! - Serves an admin API for version, config, health, and manual reloads

pub mod admin;
pub mod apps;
pub mod config;
pub mod error;
pub mod events;
pub mod healthcheck;
pub mod marathon;
pub mod metrics;
pub mod nginx;
pub mod state;
pub mod worker;
