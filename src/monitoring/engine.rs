//! Alert Engine
//!
//! Accepts candidate alerts, deduplicates them per key within a cooldown,
//! keeps a bounded history, persists to an [`AlertStore`] and delivers via
//! the [`AlertNotifier`].
//!
//! The dedup check and the history insert happen under one lock, so two
//! concurrent breaches for the same key produce exactly one alert.
//! Persistence and delivery run after the lock is released.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::monitoring::alert::{Alert, AlertType, CandidateAlert, DedupKey, Severity};
use crate::monitoring::clock::{to_chrono, Clock};
use crate::monitoring::error::{MonitorError, MonitorResult};
use crate::monitoring::store::AlertStore;
use crate::notifications::AlertNotifier;

/// Alert engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// Minimum time between two alerts sharing a dedup key
    pub cooldown: Duration,
    /// Alerts kept in memory
    pub history_capacity: usize,
    /// How long resolved alerts are kept
    pub retention: Duration,
    /// Dedup entries older than this many cooldowns are purged
    pub dedup_retention_factor: u32,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5 * 60),
            history_capacity: 1000,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            dedup_retention_factor: 3,
        }
    }
}

/// Query over the alert history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub plugin_id: Option<String>,
    /// Minimum severity
    pub severity: Option<Severity>,
    pub alert_type: Option<AlertType>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn unresolved() -> Self {
        Self { resolved: Some(false), ..Self::default() }
    }

    fn matches(&self, alert: &Alert) -> bool {
        self.plugin_id.as_ref().map_or(true, |id| alert.plugin_id.as_ref() == Some(id))
            && self.severity.map_or(true, |s| alert.severity >= s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.resolved.map_or(true, |r| alert.resolved == r)
    }
}

/// Counts over the in-memory history
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub unresolved: usize,
    /// Unresolved alerts per severity
    pub by_severity: BTreeMap<Severity, usize>,
    /// Unresolved alerts per type
    pub by_type: BTreeMap<AlertType, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub alerts_removed: usize,
    pub dedup_entries_removed: usize,
    pub stored_alerts_removed: usize,
}

#[derive(Debug, Clone)]
struct DedupEntry {
    alert_id: String,
    created_at: DateTime<Utc>,
    resolved: bool,
}

#[derive(Default)]
struct AlertState {
    history: VecDeque<Alert>,
    dedup: HashMap<DedupKey, DedupEntry>,
}

impl AlertState {
    /// Append, evicting the oldest resolved alert first, then the oldest overall
    fn push(&mut self, alert: Alert, capacity: usize) {
        while self.history.len() >= capacity.max(1) {
            let evicted = match self.history.iter().position(|a| a.resolved) {
                Some(index) => self.history.remove(index),
                None => self.history.pop_front(),
            };
            if let Some(evicted) = evicted {
                log::debug!("Evicted alert {} from history", evicted.id);
            }
        }
        self.history.push_back(alert);
    }

    fn find_mut(&mut self, alert_id: &str) -> Option<&mut Alert> {
        self.history.iter_mut().find(|a| a.id == alert_id)
    }

    /// Resolve an alert in place, keeping the dedup entry in sync
    fn resolve(&mut self, alert_id: &str, at: DateTime<Utc>) -> Option<(Alert, bool)> {
        let alert = self.find_mut(alert_id)?;
        let changed = alert.mark_resolved(at);
        let snapshot = alert.clone();
        if changed {
            if let Some(entry) = self.dedup.get_mut(&snapshot.dedup_key()) {
                if entry.alert_id == alert_id {
                    entry.resolved = true;
                }
            }
        }
        Some((snapshot, changed))
    }
}

/// Deduplicating alert engine
pub struct AlertEngine {
    config: AlertEngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlertStore>,
    notifier: Arc<AlertNotifier>,
    state: Mutex<AlertState>,
}

impl AlertEngine {
    pub fn new(
        config: AlertEngineConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlertStore>,
        notifier: Arc<AlertNotifier>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            notifier,
            state: Mutex::new(AlertState::default()),
        }
    }

    pub fn config(&self) -> &AlertEngineConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<AlertNotifier> {
        &self.notifier
    }

    /// Accept a candidate alert.
    ///
    /// Returns `None` when an unresolved alert with the same dedup key was
    /// created within the cooldown.
    pub async fn accept(&self, candidate: CandidateAlert) -> Option<Alert> {
        let key = candidate.dedup_key();
        let now = self.clock.now();
        let cooldown = to_chrono(self.config.cooldown);

        let alert = {
            let mut state = self.state.lock();
            if let Some(entry) = state.dedup.get(&key) {
                if !entry.resolved && now - entry.created_at < cooldown {
                    log::debug!("Suppressed duplicate alert {} (active: {})", key, entry.alert_id);
                    return None;
                }
            }

            let alert = Alert::from_candidate(candidate, Uuid::new_v4().to_string(), now);
            state.dedup.insert(key, DedupEntry {
                alert_id: alert.id.clone(),
                created_at: now,
                resolved: false,
            });
            state.push(alert.clone(), self.config.history_capacity);
            alert
        };

        log::info!("Alert {} raised: [{}] {}", alert.id, alert.severity, alert.title);

        if let Err(e) = self.store.save(&alert).await {
            log::warn!("Failed to persist alert {} to {}: {}", alert.id, self.store.location(), e);
        }
        self.notifier.dispatch(&alert).await;

        Some(alert)
    }

    /// Accept several candidates, returning those that became alerts
    pub async fn accept_all(&self, candidates: Vec<CandidateAlert>) -> Vec<Alert> {
        let mut accepted = Vec::new();
        for candidate in candidates {
            if let Some(alert) = self.accept(candidate).await {
                accepted.push(alert);
            }
        }
        accepted
    }

    /// Resolve an alert. Idempotent: resolving twice returns the alert
    /// unchanged from the first resolution.
    pub async fn resolve(&self, alert_id: &str) -> MonitorResult<Alert> {
        let now = self.clock.now();
        let (alert, changed) = self.state
            .lock()
            .resolve(alert_id, now)
            .ok_or_else(|| MonitorError::alert_not_found(alert_id))?;

        if changed {
            log::info!("Alert {} resolved", alert_id);
            self.persist_resolution(&alert).await;
        }
        Ok(alert)
    }

    /// Resolve the unresolved alert currently holding `key`, if any
    pub async fn resolve_by_key(&self, key: &DedupKey) -> Option<Alert> {
        let alert_id = {
            let state = self.state.lock();
            let entry = state.dedup.get(key)?;
            if entry.resolved {
                return None;
            }
            entry.alert_id.clone()
        };
        self.resolve(&alert_id).await.ok()
    }

    /// Resolve each id, collecting per-id outcomes
    pub async fn bulk_resolve(&self, alert_ids: &[String]) -> BTreeMap<String, MonitorResult<Alert>> {
        let mut results = BTreeMap::new();
        for alert_id in alert_ids {
            results.insert(alert_id.clone(), self.resolve(alert_id).await);
        }
        results
    }

    /// Resolve `alert_id` after `delay`, unless a newer unresolved alert has
    /// taken over its dedup key by then
    pub fn auto_resolve_after(self: &Arc<Self>, alert_id: &str, delay: Duration) -> JoinHandle<Option<Alert>> {
        let engine = Arc::clone(self);
        let alert_id = alert_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.resolve_if_current(&alert_id).await
        })
    }

    async fn resolve_if_current(&self, alert_id: &str) -> Option<Alert> {
        let now = self.clock.now();
        let (alert, changed) = {
            let mut state = self.state.lock();
            let alert = state.history.iter().find(|a| a.id == alert_id)?;
            if alert.resolved {
                return None;
            }
            let key = alert.dedup_key();
            if let Some(entry) = state.dedup.get(&key) {
                if entry.alert_id != alert_id && !entry.resolved {
                    log::debug!("Skipping auto-resolve of {}: superseded by {}", alert_id, entry.alert_id);
                    return None;
                }
            }
            state.resolve(alert_id, now)?
        };

        if changed {
            log::info!("Alert {} auto-resolved", alert_id);
            self.persist_resolution(&alert).await;
        }
        Some(alert)
    }

    async fn persist_resolution(&self, alert: &Alert) {
        let resolved_at = alert.resolved_at.unwrap_or_else(|| self.clock.now());
        if let Err(e) = self.store.mark_resolved(&alert.id, resolved_at).await {
            log::warn!("Failed to persist resolution of alert {}: {}", alert.id, e);
        }
    }

    pub fn get(&self, alert_id: &str) -> MonitorResult<Alert> {
        self.state
            .lock()
            .history
            .iter()
            .find(|a| a.id == alert_id)
            .cloned()
            .ok_or_else(|| MonitorError::alert_not_found(alert_id))
    }

    /// Matching alerts, newest first
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let state = self.state.lock();
        let matching = state.history.iter().rev().filter(|a| filter.matches(a)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Unresolved alert currently holding `key`
    pub fn active_for_key(&self, key: &DedupKey) -> Option<Alert> {
        let state = self.state.lock();
        let entry = state.dedup.get(key).filter(|e| !e.resolved)?;
        state.history.iter().find(|a| a.id == entry.alert_id).cloned()
    }

    pub fn summary(&self) -> AlertSummary {
        let state = self.state.lock();
        let mut summary = AlertSummary {
            total: state.history.len(),
            ..AlertSummary::default()
        };
        for alert in state.history.iter().filter(|a| !a.resolved) {
            summary.unresolved += 1;
            *summary.by_severity.entry(alert.severity).or_insert(0) += 1;
            *summary.by_type.entry(alert.alert_type).or_insert(0) += 1;
        }
        summary
    }

    /// Drop alerts resolved longer than the retention window ago and dedup
    /// entries older than several cooldowns
    pub async fn purge(&self) -> PurgeReport {
        let now = self.clock.now();
        let cutoff = now - to_chrono(self.config.retention);
        let dedup_horizon = to_chrono(self.config.cooldown * self.config.dedup_retention_factor.max(1));

        let mut report = {
            let mut state = self.state.lock();
            let alerts_before = state.history.len();
            state.history.retain(|a| !(a.resolved && a.resolved_at.map_or(false, |at| at < cutoff)));

            let dedup_before = state.dedup.len();
            state.dedup.retain(|_, entry| now - entry.created_at < dedup_horizon);

            PurgeReport {
                alerts_removed: alerts_before - state.history.len(),
                dedup_entries_removed: dedup_before - state.dedup.len(),
                stored_alerts_removed: 0,
            }
        };

        match self.store.purge_resolved_before(cutoff).await {
            Ok(removed) => report.stored_alerts_removed = removed,
            Err(e) => log::warn!("Failed to purge alert store {}: {}", self.store.location(), e),
        }

        if report.alerts_removed + report.dedup_entries_removed + report.stored_alerts_removed > 0 {
            log::debug!(
                "Purged {} alert(s), {} dedup entr(ies), {} stored alert(s)",
                report.alerts_removed,
                report.dedup_entries_removed,
                report.stored_alerts_removed
            );
        }
        report
    }

    /// Reload recent alerts from the store so cooldowns survive restarts.
    ///
    /// Alerts already in memory are kept. Returns how many were restored.
    pub async fn restore(&self) -> MonitorResult<usize> {
        let stored = self.store.load_recent(self.config.history_capacity).await?;
        let cutoff = self.clock.now() - to_chrono(self.config.retention);

        let mut state = self.state.lock();
        let mut restored = 0;
        for alert in stored {
            if alert.resolved && alert.resolved_at.map_or(false, |at| at < cutoff) {
                continue;
            }
            if state.history.iter().any(|a| a.id == alert.id) {
                continue;
            }

            let key = alert.dedup_key();
            let newer = state.dedup.get(&key).map_or(false, |e| e.created_at > alert.created_at);
            if !newer {
                state.dedup.insert(key, DedupEntry {
                    alert_id: alert.id.clone(),
                    created_at: alert.created_at,
                    resolved: alert.resolved,
                });
            }
            state.push(alert, self.config.history_capacity);
            restored += 1;
        }

        let mut ordered: Vec<Alert> = state.history.drain(..).collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        state.history = ordered.into();

        log::info!("Restored {} alert(s) from {}", restored, self.store.location());
        Ok(restored)
    }
}
