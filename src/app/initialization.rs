//! Application initialization and configuration

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, error, info, warn};
use crate::admin::AdminService;
use crate::monitoring::{FileAlertStore, MonitoringCoordinator, SysinfoProbe, SystemClock};
use crate::notifications::{AlertNotifier, LogSink, NotificationConfig};
use crate::plugin::{
    builtin, BuiltinLoader, DynamicRouter, FileManifestStore, ManifestStore, MemoryManifestStore,
    PluginManager, PluginRegistry,
};
use crate::{cli, config, logging};

pub fn load_configuration(args: &cli::Args) -> Result<config::ConfigManager> {
    let mut manager = if let Some(config_file) = &args.config_file {
        debug!("Loading configuration from explicit file: {}", config_file.display());
        config::ConfigManager::load_from_file(config_file.clone())?
    } else {
        config::ConfigManager::load()?
    };

    if let Some(section_name) = &args.config_name {
        debug!("Selecting configuration section: {}", section_name);
        manager.select_section(section_name.clone());
    }

    Ok(manager)
}

/// Handle configuration export command
pub fn handle_export_config(config_manager: &config::ConfigManager, export_path: &Path) -> Result<()> {
    info!("Exporting configuration to: {}", export_path.display());

    let config_content = config_manager.export_complete_config()?;
    std::fs::write(export_path, config_content)
        .with_context(|| format!("Failed to write configuration to {}", export_path.display()))?;

    println!("Configuration exported to: {}", export_path.display());
    Ok(())
}

pub fn configure_logging(args: &cli::Args, config: &config::ConfigManager) -> Result<logging::LogConfig> {
    use log::LevelFilter;
    use std::str::FromStr;

    let console_level = if args.debug {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        match config.get_log_level("base", "console-level") {
            Ok(Some(level)) => level,
            Ok(None) => LevelFilter::Info,
            Err(e) => {
                debug!("Invalid console-level in config, using default: {}", e);
                LevelFilter::Info
            }
        }
    };

    let format = if args.log_format != "text" {
        logging::LogFormat::from_str(&args.log_format)
            .map_err(|e| anyhow::anyhow!(e))?
    } else {
        config.get_value("base", "log-format")
            .and_then(|value| logging::LogFormat::from_str(value).ok())
            .unwrap_or(logging::LogFormat::Text)
    };

    let log_file_path = args.log_file.clone()
        .or_else(|| config.get_path("base", "log-file"));

    let file_log_level = match &args.log_file_level {
        Some(level_str) => Some(logging::parse_log_level(level_str)?),
        None => match config.get_log_level("base", "file-log-level") {
            Ok(level) => level,
            Err(e) => {
                debug!("Invalid file-log-level in config, using None: {}", e);
                None
            }
        },
    };

    let (destination, file_level) = match (log_file_path, file_log_level) {
        (Some(file_path), Some(level)) => (logging::LogDestination::Both(file_path), Some(level)),
        (Some(file_path), None) => (logging::LogDestination::Both(file_path), Some(console_level)),
        (None, None) => (logging::LogDestination::Console, None),
        (None, Some(_)) => {
            error!("Log file level specified without log file");
            return Err(anyhow::anyhow!("Log file level specified without log file"));
        }
    };

    Ok(logging::LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}

/// Fully wired runtime: plugin control plane plus monitoring pipeline
pub struct Services {
    pub router: Arc<DynamicRouter>,
    pub coordinator: Arc<MonitoringCoordinator>,
    pub notifier: Arc<AlertNotifier>,
    pub admin: AdminService,
}

impl Services {
    pub fn manager(&self) -> &Arc<PluginManager> {
        self.router.manager()
    }
}

/// Build every service from CLI overrides and configuration.
///
/// A missing plugin directory leaves the runtime with no plugins rather
/// than failing, so the alerting commands work without one.
pub fn build_services(
    args: &cli::Args,
    config: &config::ConfigManager,
    tick_interval: Option<Duration>,
) -> Result<Services> {
    let plugin_dir = args.plugin_dir.clone().unwrap_or_else(|| config.get_plugin_directory());
    let manifests: Arc<dyn ManifestStore> = if plugin_dir.is_dir() {
        Arc::new(FileManifestStore::new(&plugin_dir)
            .with_context(|| format!("Failed to open plugin directory {}", plugin_dir.display()))?)
    } else {
        warn!("Plugin directory {} does not exist; no plugins will be discovered", plugin_dir.display());
        Arc::new(MemoryManifestStore::new())
    };

    let registry = Arc::new(PluginRegistry::new(manifests));
    let loader = Arc::new(BuiltinLoader::with_builtins());
    let manager = Arc::new(PluginManager::new(registry, loader.clone()));
    let router = Arc::new(DynamicRouter::new(Arc::clone(&manager)));

    let notifier = Arc::new(AlertNotifier::new());
    let mut log_config = NotificationConfig::new("operator");
    if let Some(quiet_hours) = config.get_quiet_hours()? {
        info!("Quiet hours {} - {} UTC: only critical alerts are delivered", quiet_hours.start, quiet_hours.end);
        log_config = log_config.with_quiet_hours(quiet_hours);
    }
    notifier.register_sink_with_config(Arc::new(LogSink::new()), log_config)?;

    let mut monitoring = config.get_monitoring_config()?;
    if let Some(interval) = tick_interval {
        monitoring.tick_interval = interval;
    }
    let alert_store_path = args.alert_store.clone().unwrap_or_else(|| config.get_alert_store_path());
    debug!("Alert store: {}", alert_store_path.display());

    let coordinator = Arc::new(
        MonitoringCoordinator::with_store(
            monitoring,
            config.get_thresholds()?,
            Arc::new(FileAlertStore::new(&alert_store_path)),
            Arc::clone(&notifier),
            Arc::new(SysinfoProbe::new()),
            Arc::new(SystemClock),
        )
        .with_plugin_manager(Arc::clone(&manager)),
    );
    builtin::register_alert_feed(&loader, Arc::clone(coordinator.engine()));

    let admin = AdminService::new(Arc::clone(&router), Arc::clone(&coordinator));
    Ok(Services { router, coordinator, notifier, admin })
}
