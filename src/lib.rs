//! plugmon: plugin runtime with realtime alerting
//!
//! The [`plugin`] module discovers manifests, loads plugins in dependency
//! order and mounts their routes under per-plugin namespaces. The
//! [`monitoring`] module ingests plugin telemetry and system samples and
//! raises deduplicated alerts, delivered through [`notifications`].

pub mod admin;
pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod monitoring;
pub mod notifications;
pub mod plugin;
