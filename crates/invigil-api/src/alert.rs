//! Alerts: derived, actionable notices shown to a proctor

use chrono::{DateTime, Utc};
use invigil_util::AlertId;
use serde::{Deserialize, Serialize};

use crate::{ExamSession, Severity, StudentRef};

/// Resolve lifecycle of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Resolved,
}

/// A derived, actionable notice with its own resolve lifecycle.
///
/// `student` is an identity snapshot, not a live reference; `exam_session`
/// may be absent when the triggering activity lacked session context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Assigned by the system of record; locally-synthesized alerts carry
    /// `None` until the next reconciliation confirms them.
    #[serde(default)]
    pub id: Option<AlertId>,
    pub student: StudentRef,
    #[serde(default)]
    pub exam_session: Option<ExamSession>,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// Resolving never touches severity, only status and the resolve time.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(at);
    }

    /// Roll back an optimistic local resolve after the command failed.
    pub fn unresolve(&mut self) {
        self.status = AlertStatus::Active;
        self.resolved_at = None;
    }

    /// Ordering key for the dashboard list (most-recent-first sort).
    pub fn display_time(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
