//! Metric Samples and Rolling History
//!
//! Per-plugin, per-metric bounded ring buffers fed by ingestion. The store
//! holds data only; evaluation lives in the threshold and trend modules.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use crate::monitoring::clock::Clock;
use crate::monitoring::error::{MonitorError, MonitorResult};

/// Default number of samples retained per plugin and metric
pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;

/// A numeric per-plugin metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    CpuUsage,
    MemoryUsage,
    ResponseTime,
    ErrorRate,
    RequestCount,
    Uptime,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::CpuUsage,
        MetricKind::MemoryUsage,
        MetricKind::ResponseTime,
        MetricKind::ErrorRate,
        MetricKind::RequestCount,
        MetricKind::Uptime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::MemoryUsage => "memory_usage",
            MetricKind::ResponseTime => "response_time",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::RequestCount => "request_count",
            MetricKind::Uptime => "uptime",
        }
    }

    /// Human readable label used in alert titles
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::CpuUsage => "CPU usage",
            MetricKind::MemoryUsage => "Memory usage",
            MetricKind::ResponseTime => "Response time",
            MetricKind::ErrorRate => "Error rate",
            MetricKind::RequestCount => "Request count",
            MetricKind::Uptime => "Uptime",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::CpuUsage | MetricKind::MemoryUsage | MetricKind::ErrorRate => "%",
            MetricKind::ResponseTime => "ms",
            MetricKind::Uptime => "s",
            MetricKind::RequestCount => "",
        }
    }

    /// Value of this metric in a sample
    pub fn value_of(&self, sample: &MetricSample) -> f64 {
        match self {
            MetricKind::CpuUsage => sample.cpu_usage,
            MetricKind::MemoryUsage => sample.memory_usage,
            MetricKind::ResponseTime => sample.response_time,
            MetricKind::ErrorRate => sample.error_rate,
            MetricKind::RequestCount => sample.request_count as f64,
            MetricKind::Uptime => sample.uptime,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-reported plugin status carried by a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Active,
    Degraded,
    Error,
    Inactive,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Metrics ingestion payload as received from collectors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub plugin_id: String,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub status: SampleStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricsPayload {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            status: SampleStatus::Active,
            ..Self::default()
        }
    }

    pub fn with_cpu(mut self, cpu_usage: f64) -> Self {
        self.cpu_usage = cpu_usage;
        self
    }

    pub fn with_memory(mut self, memory_usage: f64) -> Self {
        self.memory_usage = memory_usage;
        self
    }

    pub fn with_response_time(mut self, response_time: f64) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn with_error_rate(mut self, error_rate: f64) -> Self {
        self.error_rate = error_rate;
        self
    }

    /// Validate the payload and turn it into an immutable sample.
    ///
    /// A missing timestamp is filled with `received_at`.
    pub fn into_sample(self, received_at: DateTime<Utc>) -> MonitorResult<MetricSample> {
        let plugin_id = self.plugin_id.trim();
        if plugin_id.is_empty() {
            return Err(MonitorError::validation("Metric payload is missing plugin_id"));
        }

        let checks = [
            ("cpu_usage", self.cpu_usage, None),
            ("memory_usage", self.memory_usage, Some(100.0)),
            ("response_time", self.response_time, None),
            ("error_rate", self.error_rate, Some(100.0)),
            ("uptime", self.uptime, None),
        ];
        for (field, value, upper) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(MonitorError::validation(format!(
                    "Metric '{}' for plugin '{}' must be a non-negative number, got {}",
                    field, plugin_id, value
                )));
            }
            if let Some(upper) = upper {
                if value > upper {
                    return Err(MonitorError::validation(format!(
                        "Metric '{}' for plugin '{}' exceeds {}: {}",
                        field, plugin_id, upper, value
                    )));
                }
            }
        }

        Ok(MetricSample {
            plugin_id: plugin_id.to_string(),
            timestamp: self.timestamp.unwrap_or(received_at),
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            response_time: self.response_time,
            error_rate: self.error_rate,
            request_count: self.request_count,
            uptime: self.uptime,
            status: self.status,
        })
    }
}

/// One validated observation of a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub plugin_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub response_time: f64,
    pub error_rate: f64,
    pub request_count: u64,
    pub uptime: f64,
    pub status: SampleStatus,
}

/// A single value in a metric series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

struct PluginSeries {
    series: HashMap<MetricKind, VecDeque<MetricPoint>>,
    latest: MetricSample,
    last_activity: DateTime<Utc>,
    samples_seen: u64,
}

/// Snapshot of what the store knows about one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginMetricsSnapshot {
    pub latest: MetricSample,
    pub last_activity: DateTime<Utc>,
    pub samples_seen: u64,
    pub retained: usize,
}

/// Bounded rolling history of samples per plugin and metric
pub struct MetricsStore {
    capacity: usize,
    clock: Arc<dyn Clock>,
    plugins: DashMap<String, PluginSeries>,
}

impl MetricsStore {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            clock,
            plugins: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample to every metric series of its plugin and mark the
    /// plugin active now
    pub fn ingest(&self, sample: MetricSample) {
        let now = self.clock.now();
        let capacity = self.capacity;

        let mut entry = self.plugins
            .entry(sample.plugin_id.clone())
            .or_insert_with(|| PluginSeries {
                series: HashMap::new(),
                latest: sample.clone(),
                last_activity: now,
                samples_seen: 0,
            });

        for metric in MetricKind::ALL {
            let series = entry.series.entry(metric).or_insert_with(|| VecDeque::with_capacity(capacity));
            if series.len() == capacity {
                series.pop_front();
            }
            series.push_back(MetricPoint {
                timestamp: sample.timestamp,
                value: metric.value_of(&sample),
            });
        }
        entry.latest = sample;
        entry.last_activity = now;
        entry.samples_seen += 1;
    }

    /// The most recent `n` values of a metric, oldest first
    pub fn history(&self, plugin_id: &str, metric: MetricKind, n: usize) -> Vec<MetricPoint> {
        let Some(entry) = self.plugins.get(plugin_id) else {
            return Vec::new();
        };
        match entry.series.get(&metric) {
            Some(series) => {
                let skip = series.len().saturating_sub(n);
                series.iter().skip(skip).copied().collect()
            }
            None => Vec::new(),
        }
    }

    /// Values only, oldest first
    pub fn values(&self, plugin_id: &str, metric: MetricKind, n: usize) -> Vec<f64> {
        self.history(plugin_id, metric, n).into_iter().map(|p| p.value).collect()
    }

    pub fn latest(&self, plugin_id: &str) -> Option<MetricSample> {
        self.plugins.get(plugin_id).map(|e| e.latest.clone())
    }

    pub fn last_activity(&self, plugin_id: &str) -> Option<DateTime<Utc>> {
        self.plugins.get(plugin_id).map(|e| e.last_activity)
    }

    /// Last activity of every tracked plugin, sorted by id
    pub fn activity_snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut all: Vec<(String, DateTime<Utc>)> = self.plugins
            .iter()
            .map(|e| (e.key().clone(), e.value().last_activity))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn snapshot(&self, plugin_id: &str) -> Option<PluginMetricsSnapshot> {
        self.plugins.get(plugin_id).map(|e| PluginMetricsSnapshot {
            latest: e.latest.clone(),
            last_activity: e.last_activity,
            samples_seen: e.samples_seen,
            retained: e.series.get(&MetricKind::CpuUsage).map(VecDeque::len).unwrap_or(0),
        })
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Forget a plugin's history
    pub fn remove(&self, plugin_id: &str) -> bool {
        self.plugins.remove(plugin_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
