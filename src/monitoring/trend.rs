//! Trend and Baseline Analysis
//!
//! Least-squares slope over the most recent samples and deviation of the
//! latest sample from a moving-average baseline. Each produces its own alert
//! type so it never shares a dedup key with threshold alerts.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::monitoring::alert::{AlertType, CandidateAlert, Severity};
use crate::monitoring::metrics::{MetricKind, MetricsStore};

/// Trend and baseline parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Samples fitted by the regression
    pub window: usize,
    /// Samples averaged into the baseline
    pub baseline_window: usize,
    /// Prior samples required before a baseline is meaningful
    pub baseline_min_samples: usize,
    pub cpu_slope: f64,
    pub memory_slope: f64,
    pub error_rate_slope: f64,
    pub response_time_slope: f64,
    pub cpu_deviation: f64,
    pub memory_deviation: f64,
    pub error_rate_deviation: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window: 10,
            baseline_window: 20,
            baseline_min_samples: 5,
            cpu_slope: 0.5,
            memory_slope: 0.5,
            error_rate_slope: 0.3,
            response_time_slope: 0.3,
            cpu_deviation: 0.5,
            memory_deviation: 0.5,
            error_rate_deviation: 1.0,
        }
    }
}

impl TrendConfig {
    pub fn slope_bound(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::CpuUsage => Some(self.cpu_slope),
            MetricKind::MemoryUsage => Some(self.memory_slope),
            MetricKind::ErrorRate => Some(self.error_rate_slope),
            MetricKind::ResponseTime => Some(self.response_time_slope),
            MetricKind::RequestCount | MetricKind::Uptime => None,
        }
    }

    pub fn deviation_bound(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::CpuUsage => Some(self.cpu_deviation),
            MetricKind::MemoryUsage => Some(self.memory_deviation),
            MetricKind::ErrorRate => Some(self.error_rate_deviation),
            _ => None,
        }
    }
}

/// Slope of the least-squares line through `(i, values[i])`
pub fn least_squares_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        covariance += dx * (y - mean_y);
        variance += dx * dx;
    }

    Some(covariance / variance)
}

/// Latest value compared with its moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub baseline: f64,
    pub current: f64,
    /// `(current - baseline) / baseline`
    pub deviation: f64,
    pub samples: usize,
}

/// Trend analyzer over a metrics store
pub struct TrendAnalyzer {
    store: Arc<MetricsStore>,
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new(store: Arc<MetricsStore>, config: TrendConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Regression slope over the last `window` samples; `None` until a full
    /// window exists
    pub fn trend(&self, plugin_id: &str, metric: MetricKind) -> Option<f64> {
        let values = self.store.values(plugin_id, metric, self.config.window);
        if values.len() < self.config.window.max(2) {
            return None;
        }
        least_squares_slope(&values)
    }

    /// Deviation of the latest sample from the mean of the samples before it.
    ///
    /// `None` with fewer than `baseline_min_samples` prior samples or when
    /// the baseline is zero.
    pub fn baseline(&self, plugin_id: &str, metric: MetricKind) -> Option<Baseline> {
        let values = self.store.values(plugin_id, metric, self.config.baseline_window + 1);
        let (current, prior) = values.split_last()?;
        if prior.len() < self.config.baseline_min_samples.max(1) {
            return None;
        }

        let baseline = prior.iter().sum::<f64>() / prior.len() as f64;
        if baseline == 0.0 {
            return None;
        }

        Some(Baseline {
            baseline,
            current: *current,
            deviation: (current - baseline) / baseline,
            samples: prior.len(),
        })
    }

    /// Trend and baseline candidates for every analysed metric of a plugin
    pub fn analyze(&self, plugin_id: &str, plugin_name: Option<&str>) -> Vec<CandidateAlert> {
        let mut candidates = Vec::new();
        let display = plugin_name.unwrap_or(plugin_id);

        for metric in MetricKind::ALL {
            if let (Some(bound), Some(slope)) = (self.config.slope_bound(metric), self.trend(plugin_id, metric)) {
                if slope > bound {
                    log::debug!("Sustained increase in {} for '{}': slope {:.3}", metric, plugin_id, slope);
                    candidates.push(
                        CandidateAlert::new(
                            AlertType::Trend,
                            Severity::Warning,
                            format!("{} rising for {}", metric.label(), display),
                            format!(
                                "{} of plugin '{}' increased by {:.2}{} per sample over the last {} samples",
                                metric.label(), plugin_id, slope, metric.unit(), self.config.window
                            ),
                        )
                        .for_plugin(plugin_id, plugin_name)
                        .with_metric(metric)
                        .with_values(slope, bound)
                        .with_metadata("window", serde_json::json!(self.config.window)),
                    );
                }
            }

            if let (Some(bound), Some(baseline)) = (self.config.deviation_bound(metric), self.baseline(plugin_id, metric)) {
                if baseline.deviation.abs() > bound {
                    let (severity, direction) = if baseline.deviation > 0.0 {
                        (Severity::Warning, "above")
                    } else {
                        (Severity::Info, "below")
                    };
                    candidates.push(
                        CandidateAlert::new(
                            AlertType::BaselineDeviation,
                            severity,
                            format!("{} off baseline for {}", metric.label(), display),
                            format!(
                                "{} of plugin '{}' is {:.0}% {} its baseline ({:.1} vs {:.1})",
                                metric.label(),
                                plugin_id,
                                baseline.deviation.abs() * 100.0,
                                direction,
                                baseline.current,
                                baseline.baseline
                            ),
                        )
                        .for_plugin(plugin_id, plugin_name)
                        .with_metric(metric)
                        .with_values(baseline.current, baseline.baseline)
                        .with_metadata("deviation", serde_json::json!(baseline.deviation))
                        .with_metadata("bound", serde_json::json!(bound)),
                    );
                }
            }
        }

        candidates
    }
}
