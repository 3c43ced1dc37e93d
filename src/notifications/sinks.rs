//! Built-in alert sinks

use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::broadcast;
use crate::monitoring::alert::{Alert, Severity};
use crate::notifications::error::{NotificationError, NotificationResult};
use crate::notifications::traits::{AlertSink, Channel};

/// Writes alerts to the application log
pub struct LogSink {
    id: String,
}

impl LogSink {
    pub fn new() -> Self {
        Self { id: "log".to_string() }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertSink for LogSink {
    fn sink_id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> Channel {
        Channel::Log
    }

    async fn deliver(&self, alert: &Alert) -> NotificationResult<()> {
        let plugin = alert.plugin_id.as_deref().unwrap_or("system");
        match alert.severity {
            Severity::Critical | Severity::Error => {
                log::error!("[{}] {} ({}): {}", alert.severity, alert.title, plugin, alert.message)
            }
            Severity::Warning => log::warn!("[{}] {} ({}): {}", alert.severity, alert.title, plugin, alert.message),
            Severity::Info => log::info!("[{}] {} ({}): {}", alert.severity, alert.title, plugin, alert.message),
        }
        Ok(())
    }
}

/// Publishes alerts on a broadcast channel for a push layer (web sockets,
/// dashboards). Having no subscribers is not a failure.
pub struct BroadcastSink {
    id: String,
    sender: broadcast::Sender<Alert>,
}

impl BroadcastSink {
    pub fn new(id: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { id: id.to_string(), sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl AlertSink for BroadcastSink {
    fn sink_id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> Channel {
        Channel::WebSocket
    }

    async fn deliver(&self, alert: &Alert) -> NotificationResult<()> {
        match self.sender.send(alert.clone()) {
            Ok(receivers) => {
                log::trace!("Broadcast alert {} to {} receiver(s)", alert.id, receivers);
            }
            Err(_) => {
                log::trace!("No broadcast receivers for alert {}", alert.id);
            }
        }
        Ok(())
    }
}

type Callback = Arc<dyn Fn(&Alert) -> Result<(), String> + Send + Sync>;

/// Adapts a plain delivery callback into a sink
pub struct CallbackSink {
    id: String,
    callback: Callback,
}

impl CallbackSink {
    pub fn new<F>(id: &str, callback: F) -> Self
    where
        F: Fn(&Alert) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl AlertSink for CallbackSink {
    fn sink_id(&self) -> &str {
        &self.id
    }

    fn channel(&self) -> Channel {
        Channel::Callback
    }

    async fn deliver(&self, alert: &Alert) -> NotificationResult<()> {
        (self.callback)(alert).map_err(|e| NotificationError::delivery_failed(self.id.as_str(), e))
    }
}
