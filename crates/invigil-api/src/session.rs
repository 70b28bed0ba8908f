//! Exam sessions: scheduled windows during which a test is accessible
//!
//! Status is never stored alongside the timestamps; it is always derived by
//! `invigil_core::session_status` so the two cannot drift.

use chrono::{DateTime, Utc};
use invigil_util::{ExamId, SessionId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an exam session, derived from its snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Scheduled,
    Active,
    Completed,
}

/// A scheduled proctored window, owned by the system of record.
/// The client holds read-mostly projections of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: SessionId,
    pub exam_id: ExamId,
    pub exam_name: String,
    pub start_time: DateTime<Utc>,
    /// Set when the session ends; a session with this set is Completed
    /// regardless of the current time.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl ExamSession {
    /// Snapshot invariant: when both bounds are present they must be ordered.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(end) = self.end_time {
            if self.start_time >= end {
                return Err(format!(
                    "session {}: start_time {} is not before end_time {}",
                    self.id, self.start_time, end
                ));
            }
        }
        Ok(())
    }
}
