//! Aggregated dashboard state
//!
//! One driver task owns and mutates this; everyone else sees cloned
//! snapshots through a watch channel, so there is no locking discipline to
//! get wrong.

use invigil_api::{
    ActivityDetail, ActivityEvent, Alert, AlertStatus, ExamSession, Severity,
};
use invigil_util::{AlertId, StudentId};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Default capacity of the recent-activity buffer
pub const DEFAULT_ACTIVITY_BUFFER: usize = 100;

/// Headline numbers shown at the top of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStats {
    pub total_alerts: usize,
    /// Unresolved HIGH and CRITICAL alerts
    pub critical_alerts: usize,
    pub active_tests: usize,
    pub active_students: usize,
    pub recent_activities: usize,
}

/// Live aggregation of alerts, activity and presence for one proctor view
#[derive(Debug, Clone)]
pub struct DashboardState {
    /// Most-recent-first by display time
    alerts: Vec<Alert>,
    /// Newest at the front; bounded, oldest dropped
    activities: VecDeque<ActivityEvent>,
    active_students: HashSet<StudentId>,
    active_sessions: Vec<ExamSession>,
    capacity: usize,
}

impl DashboardState {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: Vec::new(),
            activities: VecDeque::with_capacity(capacity),
            active_students: HashSet::new(),
            active_sessions: Vec::new(),
            capacity,
        }
    }

    /// Ingest one live activity event. Events that under-report their
    /// severity are discarded; the feed must keep moving either way.
    pub fn record_activity(&mut self, event: ActivityEvent) -> bool {
        if let Err(reason) = event.validate() {
            warn!(reason, "Discarding invalid activity event");
            return false;
        }

        if let Some(student) = &event.student {
            match event.detail {
                ActivityDetail::TestSubmitted => {
                    self.active_students.remove(&student.id);
                }
                _ => {
                    // Any sign of life counts as presence, including
                    // violations: the student is demonstrably at the test
                    self.active_students.insert(student.id);
                }
            }
        }

        self.activities.push_front(event);
        while self.activities.len() > self.capacity {
            self.activities.pop_back();
        }
        true
    }

    /// Splice a live alert into position. The list may briefly over-count
    /// relative to the system of record; the next reconcile corrects it.
    pub fn splice_alert(&mut self, alert: Alert) {
        let at = self
            .alerts
            .iter()
            .position(|existing| existing.display_time() <= alert.display_time())
            .unwrap_or(self.alerts.len());
        self.alerts.insert(at, alert);
    }

    /// Replace the alert list with the authoritative one.
    pub fn reconcile_alerts(&mut self, mut alerts: Vec<Alert>) {
        alerts.sort_by(|a, b| b.display_time().cmp(&a.display_time()));
        debug!(count = alerts.len(), "Alerts reconciled");
        self.alerts = alerts;
    }

    pub fn reconcile_sessions(&mut self, sessions: Vec<ExamSession>) {
        debug!(count = sessions.len(), "Active sessions reconciled");
        self.active_sessions = sessions;
    }

    /// Optimistically resolve an alert ahead of the server's answer.
    /// Returns false when the alert is unknown or has no confirmed id yet.
    pub fn mark_resolved(&mut self, id: AlertId) -> bool {
        match self.alert_mut(id) {
            Some(alert) => {
                alert.resolve(invigil_util::now());
                true
            }
            None => false,
        }
    }

    /// Roll back an optimistic resolve after the command failed.
    pub fn rollback_resolve(&mut self, id: AlertId) {
        if let Some(alert) = self.alert_mut(id) {
            alert.unresolve();
        }
    }

    /// Replace the local copy of an alert with the server's.
    pub fn confirm_alert(&mut self, confirmed: Alert) {
        match confirmed
            .id
            .and_then(|id| self.alert_mut(id))
        {
            Some(alert) => *alert = confirmed,
            None => self.splice_alert(confirmed),
        }
    }

    fn alert_mut(&mut self, id: AlertId) -> Option<&mut Alert> {
        self.alerts.iter_mut().find(|alert| alert.id == Some(id))
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Newest first
    pub fn activities(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.activities.iter()
    }

    pub fn active_students(&self) -> &HashSet<StudentId> {
        &self.active_students
    }

    pub fn active_sessions(&self) -> &[ExamSession] {
        &self.active_sessions
    }

    /// Pure projection; the underlying list keeps its order and content.
    pub fn alerts_with_severity(&self, severity: Severity) -> Vec<&Alert> {
        self.alerts
            .iter()
            .filter(|alert| alert.severity == severity)
            .collect()
    }

    pub fn alerts_with_status(&self, status: AlertStatus) -> Vec<&Alert> {
        self.alerts
            .iter()
            .filter(|alert| alert.status == status)
            .collect()
    }

    pub fn stats(&self) -> DashboardStats {
        DashboardStats {
            total_alerts: self.alerts.len(),
            critical_alerts: self
                .alerts
                .iter()
                .filter(|alert| alert.severity.is_alerting() && !alert.is_resolved())
                .count(),
            active_tests: self.active_sessions.len(),
            active_students: self.active_students.len(),
            recent_activities: self.activities.len(),
        }
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_BUFFER)
    }
}
