//! Command execution

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use log::{debug, error, info, warn};
use serde::Deserialize;
use crate::cli::{self, duration_parser, Command, PluginsCommand};
use crate::config;
use crate::monitoring::{MetricsPayload, SysinfoProbe, SystemProbe, ThresholdEvaluator};
use super::initialization::{build_services, Services};

/// Payload file contents: a single payload or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadFile {
    Batch(Vec<MetricsPayload>),
    Single(MetricsPayload),
}

impl PayloadFile {
    fn into_payloads(self) -> Vec<MetricsPayload> {
        match self {
            PayloadFile::Batch(payloads) => payloads,
            PayloadFile::Single(payload) => vec![payload],
        }
    }
}

/// Dispatch the parsed subcommand
pub async fn run_command(args: &cli::Args, config: &config::ConfigManager) -> Result<()> {
    match args.command() {
        Command::Run { tick_interval, once } => {
            let tick_interval = tick_interval
                .as_deref()
                .map(duration_parser::parse_duration)
                .transpose()
                .map_err(|e| anyhow::anyhow!("Invalid tick interval: {}", e))?;
            let services = build_services(args, config, tick_interval)?;
            run_monitor(&services, once).await
        }
        Command::Plugins(command) => {
            let services = build_services(args, config, None)?;
            handle_plugins_command(&services, &command).await
        }
        Command::Ingest { file } => {
            let services = build_services(args, config, None)?;
            ingest_file(&services, &file).await
        }
        Command::Check => {
            let evaluator = ThresholdEvaluator::default();
            check_system(&evaluator, &config.get_thresholds()?).await
        }
    }
}

async fn start_runtime(services: &Services) -> Result<()> {
    match services.coordinator.engine().restore().await {
        Ok(restored) => info!("Restored {} alerts from store", restored),
        Err(e) => warn!("Failed to restore alerts, starting empty: {}", e),
    }

    let report = services.router.reload_all().await?;
    for (plugin_id, reason) in &report.failed {
        warn!("Plugin '{}' not mounted: {}", plugin_id, reason);
    }
    for (plugin_id, reason) in &report.scan.rejected {
        warn!("Manifest for '{}' rejected: {}", plugin_id, reason);
    }
    info!(
        "Mounted {} plugins ({} routes)",
        report.loaded.len() + report.reloaded.len(),
        services.router.mounted_routes().len()
    );

    services.coordinator.rebuild_activity();
    Ok(())
}

async fn shutdown_runtime(services: &Services) {
    services.coordinator.stop().await;

    // Dependents first, so no unload is refused
    let manager = services.manager();
    let loaded = manager.loaded_ids().await;
    for plugin_id in manager.registry().load_order(&loaded).into_iter().rev() {
        if let Err(e) = services.router.unload_plugin(&plugin_id).await {
            warn!("Failed to unload plugin '{}': {}", plugin_id, e);
        }
    }

    services.notifier.shutdown();
    debug!("Runtime shut down");
}

async fn run_monitor(services: &Services, once: bool) -> Result<()> {
    start_runtime(services).await?;

    if once {
        let report = services.coordinator.run_tick().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        services.coordinator.start();
        info!("Press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    }

    shutdown_runtime(services).await;
    Ok(())
}

async fn handle_plugins_command(services: &Services, command: &PluginsCommand) -> Result<()> {
    let registry = services.manager().registry();
    let scan = registry.scan().await?;

    match command {
        PluginsCommand::List => {
            let plugins = services.manager().list().await;
            if plugins.is_empty() {
                println!("No plugins discovered.");
                return Ok(());
            }
            println!("{:<24} {:<10} {:<9} {:<10} DEPENDENCIES", "ID", "VERSION", "ENABLED", "STATUS");
            for summary in plugins {
                let descriptor = &summary.descriptor;
                println!(
                    "{:<24} {:<10} {:<9} {:<10} {}",
                    descriptor.id,
                    descriptor.version,
                    if descriptor.enabled { "yes" } else { "no" },
                    summary.status.to_string(),
                    join_ids(&descriptor.dependencies)
                );
            }
            Ok(())
        }
        PluginsCommand::Check => {
            println!("{}", serde_json::to_string_pretty(&scan)?);
            let order = registry.load_order(&registry.enabled_ids());
            println!("Load order: {}", if order.is_empty() { "(none)".to_string() } else { order.join(" -> ") });
            if scan.rejected.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} manifest(s) rejected", scan.rejected.len()))
            }
        }
        PluginsCommand::Enable { id } => {
            registry.set_enabled(id, true).await?;
            println!("Plugin '{}' enabled", id);
            Ok(())
        }
        PluginsCommand::Disable { id } => {
            registry.set_enabled(id, false).await?;
            println!("Plugin '{}' disabled", id);
            Ok(())
        }
    }
}

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    ids.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn read_payloads(path: &Path) -> Result<Vec<MetricsPayload>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metrics file {}", path.display()))?;
    let parsed: PayloadFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse metrics file {}", path.display()))?;
    Ok(parsed.into_payloads())
}

async fn ingest_file(services: &Services, path: &Path) -> Result<()> {
    let payloads = read_payloads(path)?;
    info!("Ingesting {} payloads from {}", payloads.len(), path.display());

    if let Err(e) = services.coordinator.engine().restore().await {
        warn!("Failed to restore alerts: {}", e);
    }

    let mut rejected = 0;
    let mut raised = Vec::new();
    for payload in payloads {
        let plugin_id = payload.plugin_id.clone();
        let response = services.admin.update_plugin_metrics(payload).await;
        match response.data {
            Some(alerts) => raised.extend(alerts),
            None => {
                rejected += 1;
                warn!("Payload for '{}' rejected: {}", plugin_id, response.message);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&raised)?);
    services.notifier.shutdown();

    if rejected > 0 {
        return Err(anyhow::anyhow!("{} payload(s) rejected", rejected));
    }
    Ok(())
}

async fn check_system(evaluator: &ThresholdEvaluator, thresholds: &crate::monitoring::ThresholdConfig) -> Result<()> {
    let snapshot = tokio::task::spawn_blocking(|| {
        let probe = SysinfoProbe::new();
        // CPU usage needs two refreshes
        probe.probe()?;
        std::thread::sleep(Duration::from_millis(250));
        probe.probe()
    })
    .await
    .context("System probe task failed")??;

    println!(
        "cpu {:.1}%  memory {:.1}%  disk {:.1}%",
        snapshot.cpu_usage, snapshot.memory_usage, snapshot.disk_usage
    );

    let breaches = evaluator.evaluate_system(&snapshot, thresholds);
    if breaches.is_empty() {
        println!("All system resources within thresholds");
    }
    for candidate in breaches {
        println!("[{}] {}: {}", candidate.severity, candidate.title, candidate.message);
    }
    Ok(())
}
