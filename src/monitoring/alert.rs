//! Alert Types
//!
//! The alert record delivered to sinks and persisted to the alert store,
//! plus the candidate alerts produced by evaluators.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::monitoring::metrics::MetricKind;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Info, Severity::Warning, Severity::Error, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What condition an alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighCpu,
    HighMemory,
    HighErrorRate,
    SlowResponse,
    /// Sustained increase detected by regression over recent samples
    Trend,
    BaselineDeviation,
    PluginOffline,
    SystemCpu,
    SystemMemory,
    SystemDisk,
    Custom,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighCpu => "high_cpu",
            AlertType::HighMemory => "high_memory",
            AlertType::HighErrorRate => "high_error_rate",
            AlertType::SlowResponse => "slow_response",
            AlertType::Trend => "trend",
            AlertType::BaselineDeviation => "baseline_deviation",
            AlertType::PluginOffline => "plugin_offline",
            AlertType::SystemCpu => "system_cpu",
            AlertType::SystemMemory => "system_memory",
            AlertType::SystemDisk => "system_disk",
            AlertType::Custom => "custom",
        }
    }

    /// Threshold alert type for a plugin metric, if that metric has one
    pub fn for_threshold(metric: MetricKind) -> Option<Self> {
        match metric {
            MetricKind::CpuUsage => Some(AlertType::HighCpu),
            MetricKind::MemoryUsage => Some(AlertType::HighMemory),
            MetricKind::ErrorRate => Some(AlertType::HighErrorRate),
            MetricKind::ResponseTime => Some(AlertType::SlowResponse),
            MetricKind::RequestCount | MetricKind::Uptime => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, AlertType::SystemCpu | AlertType::SystemMemory | AlertType::SystemDisk)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key: at most one unresolved alert per key inside the cooldown
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DedupKey {
    pub alert_type: AlertType,
    pub plugin_id: Option<String>,
    pub metric: Option<MetricKind>,
}

impl DedupKey {
    pub fn new(alert_type: AlertType, plugin_id: Option<&str>, metric: Option<MetricKind>) -> Self {
        Self {
            alert_type,
            plugin_id: plugin_id.map(str::to_string),
            metric,
        }
    }

    /// Key of the offline alert for a plugin
    pub fn offline(plugin_id: &str) -> Self {
        Self::new(AlertType::PluginOffline, Some(plugin_id), None)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alert_type)?;
        if let Some(plugin_id) = &self.plugin_id {
            write!(f, "/{}", plugin_id)?;
        }
        if let Some(metric) = &self.metric {
            write!(f, "/{}", metric)?;
        }
        Ok(())
    }
}

/// An alert proposed by an evaluator, not yet deduplicated
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAlert {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub plugin_id: Option<String>,
    pub plugin_name: Option<String>,
    pub metric: Option<MetricKind>,
    pub current_value: f64,
    pub threshold_value: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CandidateAlert {
    pub fn new(alert_type: AlertType, severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            plugin_id: None,
            plugin_name: None,
            metric: None,
            current_value: 0.0,
            threshold_value: 0.0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn for_plugin(mut self, plugin_id: &str, plugin_name: Option<&str>) -> Self {
        self.plugin_id = Some(plugin_id.to_string());
        self.plugin_name = plugin_name.map(str::to_string);
        self
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_values(mut self, current_value: f64, threshold_value: f64) -> Self {
        self.current_value = current_value;
        self.threshold_value = threshold_value;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.alert_type, self.plugin_id.as_deref(), self.metric)
    }
}

/// An accepted alert; immutable apart from resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub plugin_id: Option<String>,
    pub plugin_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricKind>,
    pub current_value: f64,
    pub threshold_value: f64,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Alert {
    pub fn from_candidate(candidate: CandidateAlert, id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            alert_type: candidate.alert_type,
            severity: candidate.severity,
            title: candidate.title,
            message: candidate.message,
            plugin_id: candidate.plugin_id,
            plugin_name: candidate.plugin_name,
            metric: candidate.metric,
            current_value: candidate.current_value,
            threshold_value: candidate.threshold_value,
            created_at,
            resolved: false,
            resolved_at: None,
            metadata: candidate.metadata,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.alert_type, self.plugin_id.as_deref(), self.metric)
    }

    /// Mark resolved; returns false if it already was
    pub(crate) fn mark_resolved(&mut self, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Info < Severity::Error);
    }

    #[test]
    fn test_alert_payload_shape() {
        let candidate = CandidateAlert::new(AlertType::HighCpu, Severity::Warning, "High CPU", "cpu at 82%")
            .for_plugin("billing", Some("Billing"))
            .with_metric(MetricKind::CpuUsage)
            .with_values(82.0, 80.0);
        let alert = Alert::from_candidate(candidate, "a1".to_string(), Utc::now());

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "high_cpu");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["plugin_name"], "Billing");
        assert_eq!(json["current_value"], 82.0);
        assert!(json["timestamp"].is_string());
        assert_eq!(json["resolved"], false);
        assert!(json["resolved_at"].is_null());

        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back, alert);
    }

    #[test]
    fn test_dedup_key_separates_alert_types() {
        let threshold = DedupKey::new(AlertType::HighCpu, Some("billing"), Some(MetricKind::CpuUsage));
        let trend = DedupKey::new(AlertType::Trend, Some("billing"), Some(MetricKind::CpuUsage));
        assert_ne!(threshold, trend);
        assert_eq!(trend.to_string(), "trend/billing/cpu_usage");
        assert_eq!(DedupKey::offline("billing").to_string(), "plugin_offline/billing");
    }

    #[test]
    fn test_mark_resolved_once() {
        let candidate = CandidateAlert::new(AlertType::Custom, Severity::Info, "t", "m");
        let mut alert = Alert::from_candidate(candidate, "a1".to_string(), Utc::now());
        let at = Utc::now();
        assert!(alert.mark_resolved(at));
        assert!(!alert.mark_resolved(at + chrono::Duration::seconds(5)));
        assert_eq!(alert.resolved_at, Some(at));
    }
}
