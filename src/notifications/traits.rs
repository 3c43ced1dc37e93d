//! Alert Sink Traits and Delivery Preferences
//!
//! Sinks are the opaque delivery mechanisms (log, web-socket push, mobile
//! push, email). A sink may carry a [`NotificationConfig`] describing which
//! alerts its recipient wants.

use std::collections::BTreeSet;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use crate::monitoring::alert::{Alert, AlertType, Severity};
use crate::notifications::error::NotificationResult;

/// Delivery channel a sink represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Log,
    WebSocket,
    Push,
    Email,
    Callback,
}

/// Delivery mechanism for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Unique sink identifier
    fn sink_id(&self) -> &str;

    fn channel(&self) -> Channel;

    /// Deliver one alert
    async fn deliver(&self, alert: &Alert) -> NotificationResult<()>;
}

/// Daily window, in UTC, during which only critical alerts are delivered.
///
/// A window whose end is before its start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: NaiveTime) -> bool {
        // Sub-second precision does not matter for a daily window
        let at = at.with_nanosecond(0).unwrap_or(at);
        if self.start <= self.end {
            at >= self.start && at < self.end
        } else {
            at >= self.start || at < self.end
        }
    }
}

/// Per-recipient delivery preferences.
///
/// Empty channel, type and severity sets mean "no restriction".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub user_id: String,
    #[serde(default)]
    pub channels: BTreeSet<Channel>,
    #[serde(default)]
    pub alert_types: BTreeSet<AlertType>,
    #[serde(default)]
    pub severities: BTreeSet<Severity>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
}

fn default_enabled() -> bool {
    true
}

impl NotificationConfig {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channels: BTreeSet::new(),
            alert_types: BTreeSet::new(),
            severities: BTreeSet::new(),
            enabled: true,
            quiet_hours: None,
        }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.insert(channel);
        self
    }

    pub fn with_alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_types.insert(alert_type);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severities.insert(severity);
        self
    }

    pub fn with_quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Whether `alert` should reach this recipient over `channel` at `now`
    pub fn accepts(&self, alert: &Alert, channel: Channel, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.channels.is_empty() && !self.channels.contains(&channel) {
            return false;
        }
        if !self.alert_types.is_empty() && !self.alert_types.contains(&alert.alert_type) {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&alert.severity) {
            return false;
        }
        match self.quiet_hours {
            Some(quiet) if quiet.contains(now.time()) => alert.severity == Severity::Critical,
            _ => true,
        }
    }
}

/// Statistics about alert delivery
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryStats {
    /// Alerts handed to the notifier
    pub alerts_dispatched: u64,

    /// Successful sink deliveries
    pub deliveries: u64,

    /// Sink deliveries skipped by a notification config
    pub filtered: u64,

    /// Failed, timed out or panicked deliveries
    pub delivery_failures: u64,

    /// Average delivery time in microseconds
    pub avg_delivery_time_us: u64,
}
