//! Realtime Monitoring and Alerting
//!
//! Per-plugin telemetry flows through the [`MetricsStore`] into the
//! [`ThresholdEvaluator`] and [`TrendAnalyzer`]; their candidate alerts are
//! deduplicated, persisted and delivered by the [`AlertEngine`]. The
//! [`MonitoringCoordinator`] owns the periodic loop that detects silent
//! plugins and probes system resources.

pub mod alert;
pub mod clock;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod store;
pub mod system;
pub mod threshold;
pub mod trend;

pub use alert::{Alert, AlertType, CandidateAlert, DedupKey, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{MonitoringConfig, MonitoringCoordinator, TickReport};
pub use engine::{AlertEngine, AlertEngineConfig, AlertFilter, AlertSummary, PurgeReport};
pub use error::{MonitorError, MonitorResult};
pub use metrics::{
    MetricKind, MetricPoint, MetricSample, MetricsPayload, MetricsStore, PluginMetricsSnapshot, SampleStatus,
};
pub use store::{AlertStore, FileAlertStore, MemoryAlertStore};
pub use system::{FixedProbe, SysinfoProbe, SystemProbe, SystemSnapshot};
pub use threshold::{PivotTable, SharedThresholds, ThresholdConfig, ThresholdEvaluator};
pub use trend::{Baseline, TrendAnalyzer, TrendConfig};
