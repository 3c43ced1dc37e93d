//! Alert Persistence
//!
//! Durable audit trail for accepted alerts. Writes are best-effort from the
//! engine's point of view: a failing store never blocks delivery.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::fs;
use crate::monitoring::alert::Alert;
use crate::monitoring::error::{MonitorError, MonitorResult};

/// Backing store for alerts
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert or replace an alert
    async fn save(&self, alert: &Alert) -> MonitorResult<()>;

    async fn mark_resolved(&self, alert_id: &str, resolved_at: DateTime<Utc>) -> MonitorResult<()>;

    /// Up to `limit` most recent alerts, oldest first
    async fn load_recent(&self, limit: usize) -> MonitorResult<Vec<Alert>>;

    /// Drop alerts resolved before `cutoff`; returns how many were removed
    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize>;

    /// Human readable location for log messages
    fn location(&self) -> String;
}

fn upsert(alerts: &mut Vec<Alert>, alert: &Alert) {
    match alerts.iter_mut().find(|a| a.id == alert.id) {
        Some(existing) => *existing = alert.clone(),
        None => alerts.push(alert.clone()),
    }
}

fn resolve_in(alerts: &mut [Alert], alert_id: &str, resolved_at: DateTime<Utc>) -> MonitorResult<()> {
    let alert = alerts
        .iter_mut()
        .find(|a| a.id == alert_id)
        .ok_or_else(|| MonitorError::alert_not_found(alert_id))?;
    alert.mark_resolved(resolved_at);
    Ok(())
}

fn purge_in(alerts: &mut Vec<Alert>, cutoff: DateTime<Utc>) -> usize {
    let before = alerts.len();
    alerts.retain(|a| !(a.resolved && a.resolved_at.map(|at| at < cutoff).unwrap_or(false)));
    before - alerts.len()
}

fn most_recent(alerts: &[Alert], limit: usize) -> Vec<Alert> {
    let mut sorted = alerts.to_vec();
    sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    let skip = sorted.len().saturating_sub(limit);
    sorted.split_off(skip)
}

/// In-memory alert store
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn save(&self, alert: &Alert) -> MonitorResult<()> {
        upsert(&mut self.alerts.lock(), alert);
        Ok(())
    }

    async fn mark_resolved(&self, alert_id: &str, resolved_at: DateTime<Utc>) -> MonitorResult<()> {
        resolve_in(&mut self.alerts.lock(), alert_id, resolved_at)
    }

    async fn load_recent(&self, limit: usize) -> MonitorResult<Vec<Alert>> {
        Ok(most_recent(&self.alerts.lock(), limit))
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize> {
        Ok(purge_in(&mut self.alerts.lock(), cutoff))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// JSON file alert store.
///
/// The whole document is rewritten on every change through a staging file
/// and a rename, so readers never observe a partial write.
#[derive(Debug)]
pub struct FileAlertStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileAlertStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> MonitorResult<Vec<Alert>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                MonitorError::validation(format!("Corrupt alert store {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(MonitorError::transient_io(format!(
                "Failed to read {}: {}", self.path.display(), e
            ))),
        }
    }

    async fn write_all(&self, alerts: &[Alert]) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                MonitorError::transient_io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(alerts)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content).await.map_err(|e| {
            MonitorError::transient_io(format!("Failed to write {}: {}", staging.display(), e))
        })?;
        fs::rename(&staging, &self.path).await.map_err(|e| {
            MonitorError::transient_io(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn save(&self, alert: &Alert) -> MonitorResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut alerts = self.read_all().await?;
        upsert(&mut alerts, alert);
        self.write_all(&alerts).await
    }

    async fn mark_resolved(&self, alert_id: &str, resolved_at: DateTime<Utc>) -> MonitorResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut alerts = self.read_all().await?;
        resolve_in(&mut alerts, alert_id, resolved_at)?;
        self.write_all(&alerts).await
    }

    async fn load_recent(&self, limit: usize) -> MonitorResult<Vec<Alert>> {
        let _guard = self.write_lock.lock().await;
        Ok(most_recent(&self.read_all().await?, limit))
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> MonitorResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut alerts = self.read_all().await?;
        let removed = purge_in(&mut alerts, cutoff);
        if removed > 0 {
            self.write_all(&alerts).await?;
        }
        Ok(removed)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
