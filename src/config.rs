use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use toml::Value;
use log::{debug, info};
use crate::cli::duration_parser::{format_duration, parse_duration};
use crate::monitoring::{MonitoringConfig, ThresholdConfig};
use crate::notifications::QuietHours;

/// Configuration storage - section_name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Section holding alert thresholds
pub const THRESHOLDS_SECTION: &str = "thresholds";
/// Section holding monitoring loop and alert engine settings
pub const MONITORING_SECTION: &str = "monitoring";
/// Section holding trend analysis settings
pub const TREND_SECTION: &str = "trend";
/// Section holding delivery settings
pub const NOTIFICATIONS_SECTION: &str = "notifications";

/// Configuration manager
pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
    selected_section: Option<String>,
}

impl ConfigManager {
    /// Create a new ConfigManager from a Configuration (primarily for testing)
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
            selected_section: None,
        }
    }

    /// Load configuration using discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                info!("Loading configuration from: {}", path.display());
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::from_config(Configuration::new()))
    }

    /// Load configuration from explicit file path
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        debug!("Loading configuration from file: {}", path.display());

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = parse_toml_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Successfully loaded configuration from: {}", path.display());
        Ok(Self {
            config,
            config_file_path: Some(path),
            selected_section: None,
        })
    }

    /// File this configuration was loaded from
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Get value from configuration with section fallback
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        // Priority: selected_section -> specified section -> base
        if let Some(selected) = &self.selected_section {
            if let Some(value) = self.config.get(selected).and_then(|s| s.get(key)) {
                return Some(value);
            }
        }

        if let Some(value) = self.config.get(section).and_then(|s| s.get(key)) {
            return Some(value);
        }

        self.config.get("base").and_then(|s| s.get(key))
    }

    /// Select configuration section for --config-name
    pub fn select_section(&mut self, section: String) {
        debug!("Selecting configuration section: {}", section);
        self.selected_section = Some(section);
    }

    /// Get boolean value with type conversion
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    /// Get log level value with type conversion
    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    /// Get path value, expanding a leading `~`
    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(|value| expand_home(value))
    }

    /// Get a duration value (`30s`, `5m`, `2h`, `7d` or plain seconds)
    pub fn get_duration(&self, section: &str, key: &str) -> Result<Option<Duration>> {
        match self.get_value(section, key) {
            Some(value) => parse_duration(value)
                .map(Some)
                .with_context(|| format!("Invalid duration for {}.{}: {}", section, key, value)),
            None => Ok(None),
        }
    }

    /// Get a parsed value of any `FromStr` type
    pub fn get_parsed<T>(&self, section: &str, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_value(section, key) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid value for {}.{}: {} ({})", section, key, value, e)),
            None => Ok(None),
        }
    }

    /// Alert thresholds from `[thresholds]`, validated
    pub fn get_thresholds(&self) -> Result<ThresholdConfig> {
        let mut config = ThresholdConfig::default();

        let fields: [(&str, &mut f64); 7] = [
            ("plugin-cpu-threshold", &mut config.plugin_cpu_threshold),
            ("plugin-memory-threshold", &mut config.plugin_memory_threshold),
            ("plugin-error-rate-threshold", &mut config.plugin_error_rate_threshold),
            ("plugin-response-time-threshold", &mut config.plugin_response_time_threshold),
            ("system-cpu-threshold", &mut config.system_cpu_threshold),
            ("system-memory-threshold", &mut config.system_memory_threshold),
            ("system-disk-threshold", &mut config.system_disk_threshold),
        ];
        for (key, slot) in fields {
            if let Some(value) = self.get_parsed::<f64>(THRESHOLDS_SECTION, key)? {
                *slot = value;
            }
        }

        config.validate()
            .with_context(|| "Threshold configuration validation failed")?;
        Ok(config)
    }

    /// Monitoring loop, alert engine and trend settings
    pub fn get_monitoring_config(&self) -> Result<MonitoringConfig> {
        let mut config = MonitoringConfig::default();
        let section = MONITORING_SECTION;

        if let Some(value) = self.get_duration(section, "tick-interval")? {
            if value.is_zero() {
                return Err(anyhow::anyhow!("monitoring.tick-interval must be greater than zero"));
            }
            config.tick_interval = value;
        }
        if let Some(value) = self.get_duration(section, "inactivity-bound")? {
            config.inactivity_bound = value;
        }
        if let Some(value) = self.get_duration(section, "stop-timeout")? {
            config.stop_timeout = value;
        }
        if let Some(value) = self.get_parsed::<usize>(section, "sample-capacity")? {
            config.sample_capacity = value.max(1);
        }
        if let Some(value) = self.get_duration(section, "auto-resolve-after")? {
            config.auto_resolve_after = (!value.is_zero()).then_some(value);
        }
        if let Some(value) = self.get_duration(section, "cooldown")? {
            config.alerts.cooldown = value;
        }
        if let Some(value) = self.get_parsed::<usize>(section, "history-capacity")? {
            config.alerts.history_capacity = value.max(1);
        }
        if let Some(value) = self.get_duration(section, "retention")? {
            config.alerts.retention = value;
        }
        if let Some(value) = self.get_parsed::<u32>(section, "dedup-retention-factor")? {
            config.alerts.dedup_retention_factor = value.max(1);
        }

        let trend = &mut config.trend;
        for (key, slot) in [
            ("window", &mut trend.window),
            ("baseline-window", &mut trend.baseline_window),
            ("baseline-min-samples", &mut trend.baseline_min_samples),
        ] {
            if let Some(value) = self.get_parsed::<usize>(TREND_SECTION, key)? {
                *slot = value;
            }
        }
        if trend.window < 2 {
            return Err(anyhow::anyhow!("trend.window must be at least 2"));
        }
        for (key, slot) in [
            ("cpu-slope", &mut trend.cpu_slope),
            ("memory-slope", &mut trend.memory_slope),
            ("error-rate-slope", &mut trend.error_rate_slope),
            ("response-time-slope", &mut trend.response_time_slope),
            ("cpu-deviation", &mut trend.cpu_deviation),
            ("memory-deviation", &mut trend.memory_deviation),
            ("error-rate-deviation", &mut trend.error_rate_deviation),
        ] {
            if let Some(value) = self.get_parsed::<f64>(TREND_SECTION, key)? {
                *slot = value;
            }
        }

        Ok(config)
    }

    /// Quiet hours for alert delivery (`quiet-hours-start`/`quiet-hours-end`, `HH:MM`, UTC)
    pub fn get_quiet_hours(&self) -> Result<Option<QuietHours>> {
        let start = self.get_value(NOTIFICATIONS_SECTION, "quiet-hours-start");
        let end = self.get_value(NOTIFICATIONS_SECTION, "quiet-hours-end");
        match (start, end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Ok(Some(QuietHours::new(parse_time(start)?, parse_time(end)?))),
            _ => Err(anyhow::anyhow!(
                "quiet-hours-start and quiet-hours-end must be configured together"
            )),
        }
    }

    /// Directory containing one sub-directory per plugin
    pub fn get_plugin_directory(&self) -> PathBuf {
        self.get_path("base", "plugin-directory")
            .unwrap_or_else(|| PathBuf::from("./plugins"))
    }

    /// JSON file alerts are persisted to
    pub fn get_alert_store_path(&self) -> PathBuf {
        self.get_path("base", "alert-store").unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("plugmon").join("alerts.json"))
                .unwrap_or_else(|| PathBuf::from("./plugmon-alerts.json"))
        })
    }

    /// Render the effective configuration as a TOML document
    pub fn export_complete_config(&self) -> Result<String> {
        let thresholds = self.get_thresholds()?;
        let monitoring = self.get_monitoring_config()?;

        let mut base = toml::Table::new();
        base.insert("plugin-directory".into(), path_value(&self.get_plugin_directory()));
        base.insert("alert-store".into(), path_value(&self.get_alert_store_path()));
        for key in ["log-format", "console-level", "log-file", "file-log-level"] {
            if let Some(value) = self.get_value("base", key) {
                base.insert(key.into(), Value::String(value.clone()));
            }
        }

        let mut threshold_table = toml::Table::new();
        for (key, value) in [
            ("plugin-cpu-threshold", thresholds.plugin_cpu_threshold),
            ("plugin-memory-threshold", thresholds.plugin_memory_threshold),
            ("plugin-error-rate-threshold", thresholds.plugin_error_rate_threshold),
            ("plugin-response-time-threshold", thresholds.plugin_response_time_threshold),
            ("system-cpu-threshold", thresholds.system_cpu_threshold),
            ("system-memory-threshold", thresholds.system_memory_threshold),
            ("system-disk-threshold", thresholds.system_disk_threshold),
        ] {
            threshold_table.insert(key.into(), Value::Float(value));
        }

        let mut monitoring_table = toml::Table::new();
        for (key, value) in [
            ("tick-interval", monitoring.tick_interval),
            ("inactivity-bound", monitoring.inactivity_bound),
            ("stop-timeout", monitoring.stop_timeout),
            ("cooldown", monitoring.alerts.cooldown),
            ("retention", monitoring.alerts.retention),
            ("auto-resolve-after", monitoring.auto_resolve_after.unwrap_or(Duration::ZERO)),
        ] {
            monitoring_table.insert(key.into(), Value::String(format_duration(value)));
        }
        monitoring_table.insert("sample-capacity".into(), Value::Integer(monitoring.sample_capacity as i64));
        monitoring_table.insert("history-capacity".into(), Value::Integer(monitoring.alerts.history_capacity as i64));
        monitoring_table.insert(
            "dedup-retention-factor".into(),
            Value::Integer(i64::from(monitoring.alerts.dedup_retention_factor)),
        );

        let mut root = toml::Table::new();
        root.insert("base".into(), Value::Table(base));
        root.insert(THRESHOLDS_SECTION.into(), Value::Table(threshold_table));
        root.insert(MONITORING_SECTION.into(), Value::Table(monitoring_table));

        toml::to_string_pretty(&root).context("Failed to render configuration as TOML")
    }
}

/// Discover configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. Environment variable $PLUGMON_CONFIG
    if let Ok(env_path) = env::var("PLUGMON_CONFIG") {
        paths.push(PathBuf::from(env_path));
    }

    // 2. XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("plugmon").join("config.toml"));
    }

    // 3. Home directory
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".plugmon.toml"));
    }

    // 4. Project local
    paths.push(PathBuf::from("./.plugmon.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

fn path_value(path: &std::path::Path) -> Value {
    Value::String(path.display().to_string())
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .with_context(|| format!("Invalid time of day (expected HH:MM): {}", value))
}

/// Parse TOML content to string-based configuration
fn parse_toml_config(content: &str) -> Result<Configuration> {
    let toml_value: Value = content.parse()
        .context("Failed to parse TOML content")?;

    let mut config = Configuration::new();

    if let Value::Table(table) = toml_value {
        flatten_toml_table(&table, String::new(), &mut config);
    }

    debug!("Parsed configuration: {:?}", config);
    Ok(config)
}

/// Recursively flatten TOML tables into section.subsection format
fn flatten_toml_table(table: &toml::Table, prefix: String, config: &mut Configuration) {
    for (key, value) in table {
        let section_name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Table(subtable) => {
                if subtable.values().all(|v| !matches!(v, Value::Table(_))) {
                    // Leaf table: a configuration section
                    let section_map = subtable
                        .iter()
                        .map(|(subkey, subvalue)| (subkey.clone(), toml_value_to_string(subvalue)))
                        .collect();
                    config.insert(section_name, section_map);
                } else {
                    flatten_toml_table(subtable, section_name, config);
                }
            }
            _ => {
                // Top-level key outside any table
                config
                    .entry(section_name)
                    .or_default()
                    .insert("value".to_string(), toml_value_to_string(value));
            }
        }
    }
}

/// Convert TOML Value to string representation
fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Datetime(dt) => dt.to_string(),
        Value::Array(_) | Value::Table(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn manager_from(toml_content: &str) -> ConfigManager {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, toml_content).unwrap();
        ConfigManager::load_from_file(temp_file.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_toml_value_to_string_conversion() {
        assert_eq!(toml_value_to_string(&Value::String("test".to_string())), "test");
        assert_eq!(toml_value_to_string(&Value::Integer(42)), "42");
        assert_eq!(toml_value_to_string(&Value::Float(82.5)), "82.5");
        assert_eq!(toml_value_to_string(&Value::Boolean(false)), "false");
    }

    #[test]
    fn test_parse_toml_config() {
        let config = parse_toml_config(r#"
[base]
log-format = "json"
plugin-directory = "/srv/plugins"

[monitoring]
tick-interval = "10s"
history-capacity = 500
"#).unwrap();

        assert_eq!(config["base"]["log-format"], "json");
        assert_eq!(config["base"]["plugin-directory"], "/srv/plugins");
        assert_eq!(config["monitoring"]["tick-interval"], "10s");
        assert_eq!(config["monitoring"]["history-capacity"], "500");
    }

    #[test]
    fn test_config_manager_value_retrieval_and_selection() {
        let mut config = Configuration::new();
        config.insert("base".to_string(), HashMap::from([
            ("log-format".to_string(), "text".to_string()),
            ("quiet".to_string(), "true".to_string()),
        ]));
        config.insert("staging".to_string(), HashMap::from([
            ("log-format".to_string(), "json".to_string()),
        ]));

        let mut manager = ConfigManager::from_config(config);
        assert_eq!(manager.get_value("monitoring", "quiet").unwrap(), "true");
        assert_eq!(manager.get_value("base", "log-format").unwrap(), "text");
        assert!(manager.get_value("base", "missing").is_none());

        manager.select_section("staging".to_string());
        assert_eq!(manager.get_value("base", "log-format").unwrap(), "json");
    }

    #[test]
    fn test_config_manager_type_conversion() {
        let mut config = Configuration::new();
        config.insert("base".to_string(), HashMap::from([
            ("debug".to_string(), "true".to_string()),
            ("invalid-bool".to_string(), "maybe".to_string()),
            ("log-level".to_string(), "info".to_string()),
            ("path".to_string(), "/tmp/test".to_string()),
            ("interval".to_string(), "5m".to_string()),
            ("bad-interval".to_string(), "soon".to_string()),
        ]));
        let manager = ConfigManager::from_config(config);

        assert_eq!(manager.get_bool("base", "debug").unwrap(), Some(true));
        assert!(manager.get_bool("base", "invalid-bool").is_err());
        assert!(manager.get_bool("base", "missing").unwrap().is_none());
        assert_eq!(manager.get_log_level("base", "log-level").unwrap(), Some(log::LevelFilter::Info));
        assert_eq!(manager.get_path("base", "path").unwrap(), PathBuf::from("/tmp/test"));
        assert_eq!(manager.get_duration("base", "interval").unwrap(), Some(Duration::from_secs(300)));
        assert!(manager.get_duration("base", "bad-interval").is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let manager = ConfigManager::from_config(Configuration::new());
        assert_eq!(manager.get_thresholds().unwrap(), ThresholdConfig::default());
        assert_eq!(manager.get_monitoring_config().unwrap(), MonitoringConfig::default());
        assert_eq!(manager.get_plugin_directory(), PathBuf::from("./plugins"));
        assert!(manager.get_quiet_hours().unwrap().is_none());
    }

    #[test]
    fn test_thresholds_from_toml() {
        let manager = manager_from(r#"
[thresholds]
plugin-cpu-threshold = 70
system-disk-threshold = 95.5
"#);
        let thresholds = manager.get_thresholds().unwrap();
        assert_eq!(thresholds.plugin_cpu_threshold, 70.0);
        assert_eq!(thresholds.system_disk_threshold, 95.5);
        assert_eq!(thresholds.plugin_memory_threshold, 80.0);

        let invalid = manager_from("[thresholds]\nplugin-cpu-threshold = 150\n");
        assert!(invalid.get_thresholds().is_err());
    }

    #[test]
    fn test_monitoring_config_from_toml() {
        let manager = manager_from(r#"
[monitoring]
tick-interval = "10s"
inactivity-bound = "2m"
cooldown = "1m"
retention = "3d"
history-capacity = 200
auto-resolve-after = "90"

[trend]
window = 5
cpu-slope = 1.5
"#);
        let config = manager.get_monitoring_config().unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(10));
        assert_eq!(config.inactivity_bound, Duration::from_secs(120));
        assert_eq!(config.alerts.cooldown, Duration::from_secs(60));
        assert_eq!(config.alerts.retention, Duration::from_secs(3 * 86400));
        assert_eq!(config.alerts.history_capacity, 200);
        assert_eq!(config.auto_resolve_after, Some(Duration::from_secs(90)));
        assert_eq!(config.trend.window, 5);
        assert_eq!(config.trend.cpu_slope, 1.5);

        assert!(manager_from("[monitoring]\ntick-interval = \"0s\"\n").get_monitoring_config().is_err());
        assert!(manager_from("[trend]\nwindow = 1\n").get_monitoring_config().is_err());
    }

    #[test]
    fn test_quiet_hours() {
        let manager = manager_from(r#"
[notifications]
quiet-hours-start = "22:00"
quiet-hours-end = "06:30"
"#);
        let quiet = manager.get_quiet_hours().unwrap().unwrap();
        assert_eq!(quiet.start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(quiet.end, NaiveTime::from_hms_opt(6, 30, 0).unwrap());

        let partial = manager_from("[notifications]\nquiet-hours-start = \"22:00\"\n");
        assert!(partial.get_quiet_hours().is_err());
    }

    #[test]
    fn test_export_round_trips_through_parser() {
        let manager = manager_from(r#"
[base]
plugin-directory = "/srv/plugins"

[monitoring]
cooldown = "2m"
"#);
        let exported = manager.export_complete_config().unwrap();
        let reloaded = ConfigManager::from_config(parse_toml_config(&exported).unwrap());

        assert_eq!(reloaded.get_plugin_directory(), PathBuf::from("/srv/plugins"));
        assert_eq!(reloaded.get_monitoring_config().unwrap(), manager.get_monitoring_config().unwrap());
        assert_eq!(reloaded.get_thresholds().unwrap(), manager.get_thresholds().unwrap());
    }

    #[test]
    fn test_config_file_path_recorded() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, "[base]\nlog-format = \"json\"\n").unwrap();
        let manager = ConfigManager::load_from_file(temp_file.path().to_path_buf()).unwrap();
        assert_eq!(manager.config_file_path().unwrap(), temp_file.path());
    }
}
