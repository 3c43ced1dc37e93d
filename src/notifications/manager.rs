//! Alert Notifier
//!
//! Routes accepted alerts to every registered sink. Each delivery runs with
//! its own timeout and panic boundary; one broken sink never suppresses
//! delivery to the others.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::timeout;

use crate::monitoring::alert::Alert;
use crate::notifications::error::{NotificationError, NotificationResult};
use crate::notifications::traits::{AlertSink, DeliveryStats, NotificationConfig};

/// Registered sink with its preferences and statistics
struct SinkEntry {
    sink: Arc<dyn AlertSink>,
    config: Option<NotificationConfig>,
    stats: SinkStats,
}

/// Statistics for individual sinks
#[derive(Debug, Clone, Default, Serialize)]
pub struct SinkStats {
    pub delivered: u64,
    pub filtered: u64,
    pub failures: u64,
    pub total_delivery_time_us: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-sink outcome of one dispatch
#[derive(Debug, Default, Serialize)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub filtered: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

enum Outcome {
    Delivered(Duration),
    Filtered,
    Failed(NotificationError, Duration),
}

/// Alert fan-out to sinks
pub struct AlertNotifier {
    sinks: RwLock<BTreeMap<String, SinkEntry>>,
    global_stats: RwLock<DeliveryStats>,
    delivery_timeout: Duration,
    shutdown: AtomicBool,
}

impl AlertNotifier {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(delivery_timeout: Duration) -> Self {
        Self {
            sinks: RwLock::new(BTreeMap::new()),
            global_stats: RwLock::new(DeliveryStats::default()),
            delivery_timeout,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register a sink that receives every alert
    pub fn register_sink(&self, sink: Arc<dyn AlertSink>) -> NotificationResult<()> {
        self.insert_sink(sink, None)
    }

    /// Register a sink filtered by a recipient's preferences
    pub fn register_sink_with_config(
        &self,
        sink: Arc<dyn AlertSink>,
        config: NotificationConfig,
    ) -> NotificationResult<()> {
        self.insert_sink(sink, Some(config))
    }

    fn insert_sink(&self, sink: Arc<dyn AlertSink>, config: Option<NotificationConfig>) -> NotificationResult<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(NotificationError::SystemShutdown);
        }

        let sink_id = sink.sink_id().to_string();
        let mut sinks = self.sinks.write();
        if sinks.contains_key(&sink_id) {
            return Err(NotificationError::sink_already_exists(sink_id));
        }
        sinks.insert(sink_id.clone(), SinkEntry { sink, config, stats: SinkStats::default() });
        debug!("Registered alert sink '{}'", sink_id);
        Ok(())
    }

    pub fn unregister_sink(&self, sink_id: &str) -> NotificationResult<()> {
        if self.sinks.write().remove(sink_id).is_some() {
            debug!("Unregistered alert sink '{}'", sink_id);
            Ok(())
        } else {
            Err(NotificationError::sink_not_found(sink_id))
        }
    }

    /// Replace the preferences attached to a sink
    pub fn update_config(&self, sink_id: &str, config: Option<NotificationConfig>) -> NotificationResult<()> {
        let mut sinks = self.sinks.write();
        let entry = sinks.get_mut(sink_id).ok_or_else(|| NotificationError::sink_not_found(sink_id))?;
        entry.config = config;
        Ok(())
    }

    /// Deliver an alert to every interested sink.
    ///
    /// Never fails; per-sink problems are logged and reported.
    pub async fn dispatch(&self, alert: &Alert) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.shutdown.load(Ordering::SeqCst) {
            debug!("Notifier shut down; dropping alert {}", alert.id);
            return report;
        }

        let targets: Vec<(String, Arc<dyn AlertSink>, Option<NotificationConfig>)> = self.sinks
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(&entry.sink), entry.config.clone()))
            .collect();

        let now = Utc::now();
        let deliveries = targets.into_iter().map(|(sink_id, sink, config)| async move {
            let outcome = self.deliver_to_sink(sink.as_ref(), config.as_ref(), alert, now).await;
            (sink_id, outcome)
        });
        let outcomes = futures::future::join_all(deliveries).await;

        let mut sinks = self.sinks.write();
        let mut global = self.global_stats.write();
        global.alerts_dispatched += 1;
        let mut total_time = Duration::ZERO;

        for (sink_id, outcome) in outcomes {
            let stats = sinks.get_mut(&sink_id).map(|entry| &mut entry.stats);
            match outcome {
                Outcome::Delivered(elapsed) => {
                    global.deliveries += 1;
                    total_time += elapsed;
                    if let Some(stats) = stats {
                        stats.delivered += 1;
                        stats.total_delivery_time_us += elapsed.as_micros() as u64;
                        stats.last_delivery_at = Some(now);
                    }
                    report.delivered.push(sink_id);
                }
                Outcome::Filtered => {
                    global.filtered += 1;
                    if let Some(stats) = stats {
                        stats.filtered += 1;
                    }
                    report.filtered.push(sink_id);
                }
                Outcome::Failed(error, elapsed) => {
                    warn!("Alert {} not delivered: {}", alert.id, error);
                    global.delivery_failures += 1;
                    if let Some(stats) = stats {
                        stats.failures += 1;
                        stats.total_delivery_time_us += elapsed.as_micros() as u64;
                        stats.last_error = Some(error.to_string());
                    }
                    report.failed.insert(sink_id, error.to_string());
                }
            }
        }

        if !report.delivered.is_empty() {
            let avg = total_time.as_micros() as u64 / report.delivered.len() as u64;
            global.avg_delivery_time_us = if global.deliveries == report.delivered.len() as u64 {
                avg
            } else {
                (global.avg_delivery_time_us + avg) / 2
            };
        }

        debug!(
            "Dispatched alert {} ({} delivered, {} filtered, {} failed)",
            alert.id,
            report.delivered.len(),
            report.filtered.len(),
            report.failed.len()
        );
        report
    }

    async fn deliver_to_sink(
        &self,
        sink: &dyn AlertSink,
        config: Option<&NotificationConfig>,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Outcome {
        if let Some(config) = config {
            if !config.accepts(alert, sink.channel(), now) {
                debug!("Sink '{}' filtered out alert {}", sink.sink_id(), alert.id);
                return Outcome::Filtered;
            }
        }

        let start = Instant::now();
        let delivery = AssertUnwindSafe(sink.deliver(alert)).catch_unwind();
        let result = timeout(self.delivery_timeout, delivery).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(Ok(()))) => Outcome::Delivered(elapsed),
            Ok(Ok(Err(e))) => Outcome::Failed(
                NotificationError::delivery_failed(sink.sink_id(), e.to_string()),
                elapsed,
            ),
            Ok(Err(_)) => Outcome::Failed(
                NotificationError::delivery_failed(sink.sink_id(), "sink panicked"),
                elapsed,
            ),
            Err(_) => Outcome::Failed(
                NotificationError::timeout(sink.sink_id(), self.delivery_timeout.as_millis() as u64),
                elapsed,
            ),
        }
    }

    /// Get delivery statistics
    pub fn stats(&self) -> DeliveryStats {
        self.global_stats.read().clone()
    }

    pub fn sink_stats(&self, sink_id: &str) -> Option<SinkStats> {
        self.sinks.read().get(sink_id).map(|entry| entry.stats.clone())
    }

    /// Registered sink ids, sorted
    pub fn list_sinks(&self) -> Vec<String> {
        self.sinks.read().keys().cloned().collect()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    /// Drop every sink and refuse further registrations
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let removed = {
            let mut sinks = self.sinks.write();
            let count = sinks.len();
            sinks.clear();
            count
        };
        debug!("Alert notifier shut down ({} sinks removed)", removed);
    }
}

impl Default for AlertNotifier {
    fn default() -> Self {
        Self::new()
    }
}
