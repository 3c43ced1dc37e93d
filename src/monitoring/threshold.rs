//! Threshold Evaluation
//!
//! Compares fresh samples against configured bounds. Severity is WARNING
//! above the threshold and CRITICAL above a per-metric pivot. Evaluation is
//! pure: no deduplication, no persistence.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::monitoring::alert::{AlertType, CandidateAlert, Severity};
use crate::monitoring::error::{MonitorError, MonitorResult};
use crate::monitoring::metrics::{MetricKind, MetricSample};
use crate::monitoring::system::SystemSnapshot;

/// Configured alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Percent
    pub plugin_cpu_threshold: f64,
    /// Percent
    pub plugin_memory_threshold: f64,
    /// Percent of failed requests
    pub plugin_error_rate_threshold: f64,
    /// Milliseconds
    pub plugin_response_time_threshold: f64,
    pub system_cpu_threshold: f64,
    pub system_memory_threshold: f64,
    pub system_disk_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            plugin_cpu_threshold: 80.0,
            plugin_memory_threshold: 80.0,
            plugin_error_rate_threshold: 5.0,
            plugin_response_time_threshold: 1000.0,
            system_cpu_threshold: 85.0,
            system_memory_threshold: 85.0,
            system_disk_threshold: 90.0,
        }
    }
}

impl ThresholdConfig {
    /// Threshold configured for a plugin metric, if it is monitored
    pub fn plugin_threshold(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::CpuUsage => Some(self.plugin_cpu_threshold),
            MetricKind::MemoryUsage => Some(self.plugin_memory_threshold),
            MetricKind::ErrorRate => Some(self.plugin_error_rate_threshold),
            MetricKind::ResponseTime => Some(self.plugin_response_time_threshold),
            MetricKind::RequestCount | MetricKind::Uptime => None,
        }
    }

    pub fn validate(&self) -> MonitorResult<()> {
        let percentages = [
            ("plugin_cpu_threshold", self.plugin_cpu_threshold),
            ("plugin_memory_threshold", self.plugin_memory_threshold),
            ("plugin_error_rate_threshold", self.plugin_error_rate_threshold),
            ("system_cpu_threshold", self.system_cpu_threshold),
            ("system_memory_threshold", self.system_memory_threshold),
            ("system_disk_threshold", self.system_disk_threshold),
        ];
        for (name, value) in percentages {
            if !value.is_finite() || value <= 0.0 || value > 100.0 {
                return Err(MonitorError::validation(format!(
                    "{} must be within (0, 100], got {}", name, value
                )));
            }
        }

        if !self.plugin_response_time_threshold.is_finite() || self.plugin_response_time_threshold <= 0.0 {
            return Err(MonitorError::validation(format!(
                "plugin_response_time_threshold must be positive, got {}",
                self.plugin_response_time_threshold
            )));
        }
        Ok(())
    }
}

/// Runtime-mutable thresholds shared between the evaluator and administrators
#[derive(Debug, Default)]
pub struct SharedThresholds {
    inner: RwLock<ThresholdConfig>,
}

impl SharedThresholds {
    pub fn new(config: ThresholdConfig) -> Self {
        Self { inner: RwLock::new(config) }
    }

    pub fn get(&self) -> ThresholdConfig {
        self.inner.read().clone()
    }

    /// Replace the configuration after validating it
    pub fn update(&self, config: ThresholdConfig) -> MonitorResult<ThresholdConfig> {
        config.validate()?;
        let mut inner = self.inner.write();
        let previous = std::mem::replace(&mut *inner, config);
        log::info!("Threshold configuration updated");
        Ok(previous)
    }
}

/// Per-metric CRITICAL pivots.
///
/// Utilisation pivots are absolute percentages; error-rate and response-time
/// pivots are multiples of the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotTable {
    pub cpu: f64,
    pub memory: f64,
    pub error_rate_factor: f64,
    pub response_time_factor: f64,
    pub system_cpu: f64,
    pub system_memory: f64,
    pub system_disk: f64,
}

impl Default for PivotTable {
    fn default() -> Self {
        Self {
            cpu: 95.0,
            memory: 95.0,
            error_rate_factor: 2.0,
            response_time_factor: 2.0,
            system_cpu: 95.0,
            system_memory: 95.0,
            system_disk: 95.0,
        }
    }
}

impl PivotTable {
    pub fn plugin_pivot(&self, metric: MetricKind, threshold: f64) -> f64 {
        match metric {
            MetricKind::CpuUsage => self.cpu,
            MetricKind::MemoryUsage => self.memory,
            MetricKind::ErrorRate => threshold * self.error_rate_factor,
            MetricKind::ResponseTime => threshold * self.response_time_factor,
            MetricKind::RequestCount | MetricKind::Uptime => f64::INFINITY,
        }
    }
}

/// Severity of `value` against `threshold` and `pivot`; `None` when in bounds
pub fn classify(value: f64, threshold: f64, pivot: f64) -> Option<Severity> {
    if value <= threshold {
        None
    } else if value > pivot {
        Some(Severity::Critical)
    } else {
        Some(Severity::Warning)
    }
}

/// System resource measured by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemResource {
    Cpu,
    Memory,
    Disk,
}

impl SystemResource {
    const ALL: [SystemResource; 3] = [SystemResource::Cpu, SystemResource::Memory, SystemResource::Disk];

    fn alert_type(&self) -> AlertType {
        match self {
            SystemResource::Cpu => AlertType::SystemCpu,
            SystemResource::Memory => AlertType::SystemMemory,
            SystemResource::Disk => AlertType::SystemDisk,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SystemResource::Cpu => "CPU",
            SystemResource::Memory => "memory",
            SystemResource::Disk => "disk",
        }
    }
}

/// Stateless threshold evaluator
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    pivots: PivotTable,
}

impl ThresholdEvaluator {
    pub fn new(pivots: PivotTable) -> Self {
        Self { pivots }
    }

    pub fn pivots(&self) -> &PivotTable {
        &self.pivots
    }

    /// Candidate alert for one plugin metric, if it breaches its threshold
    pub fn evaluate_metric(
        &self,
        sample: &MetricSample,
        metric: MetricKind,
        thresholds: &ThresholdConfig,
        plugin_name: Option<&str>,
    ) -> Option<CandidateAlert> {
        let alert_type = AlertType::for_threshold(metric)?;
        let threshold = thresholds.plugin_threshold(metric)?;
        let value = metric.value_of(sample);
        let pivot = self.pivots.plugin_pivot(metric, threshold);
        let severity = classify(value, threshold, pivot)?;

        let display = plugin_name.unwrap_or(sample.plugin_id.as_str());
        let unit = metric.unit();
        Some(
            CandidateAlert::new(
                alert_type,
                severity,
                format!("{} high for {}", metric.label(), display),
                format!(
                    "{} of plugin '{}' is {:.1}{} (threshold {:.1}{})",
                    metric.label(), sample.plugin_id, value, unit, threshold, unit
                ),
            )
            .for_plugin(&sample.plugin_id, plugin_name)
            .with_metric(metric)
            .with_values(value, threshold)
            .with_metadata("pivot", serde_json::json!(pivot)),
        )
    }

    /// Every threshold breach in a sample
    pub fn evaluate(
        &self,
        sample: &MetricSample,
        thresholds: &ThresholdConfig,
        plugin_name: Option<&str>,
    ) -> Vec<CandidateAlert> {
        MetricKind::ALL
            .iter()
            .filter_map(|metric| self.evaluate_metric(sample, *metric, thresholds, plugin_name))
            .collect()
    }

    /// Breaches in a process-wide resource snapshot
    pub fn evaluate_system(&self, snapshot: &SystemSnapshot, thresholds: &ThresholdConfig) -> Vec<CandidateAlert> {
        SystemResource::ALL
            .iter()
            .filter_map(|resource| {
                let (value, threshold, pivot) = match resource {
                    SystemResource::Cpu => (snapshot.cpu_usage, thresholds.system_cpu_threshold, self.pivots.system_cpu),
                    SystemResource::Memory => (snapshot.memory_usage, thresholds.system_memory_threshold, self.pivots.system_memory),
                    SystemResource::Disk => (snapshot.disk_usage, thresholds.system_disk_threshold, self.pivots.system_disk),
                };
                let severity = classify(value, threshold, pivot)?;
                Some(
                    CandidateAlert::new(
                        resource.alert_type(),
                        severity,
                        format!("High system {} usage", resource.label()),
                        format!("System {} usage is {:.1}% (threshold {:.1}%)", resource.label(), value, threshold),
                    )
                    .with_values(value, threshold)
                    .with_metadata("pivot", serde_json::json!(pivot)),
                )
            })
            .collect()
    }
}
