//! Enrollments: a student's verification/approval standing for an exam
//!
//! Enrollment records are never destroyed — they are the audit trail of who
//! was allowed into an exam and why. The block flag is exam-scoped and
//! independent of the primary status.

use chrono::{DateTime, Utc};
use invigil_util::{EnrollmentId, ExamId, StudentId};
use serde::{Deserialize, Serialize};

/// Primary enrollment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Pending,
    Verified,
    Approved,
    Rejected,
}

/// Cross-cutting block flag with its audit fields
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockState {
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub blocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blocked_by: Option<String>,
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub unblocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unblocked_by: Option<String>,
}

impl BlockState {
    pub fn block(&mut self, by: impl Into<String>, reason: impl Into<String>, at: DateTime<Utc>) {
        self.blocked = true;
        self.blocked_at = Some(at);
        self.blocked_by = Some(by.into());
        self.block_reason = Some(reason.into());
    }

    /// Unblocking keeps the block audit fields; only the flag flips.
    pub fn unblock(&mut self, by: impl Into<String>, at: DateTime<Utc>) {
        self.blocked = false;
        self.unblocked_at = Some(at);
        self.unblocked_by = Some(by.into());
    }
}

/// A student's standing for a given exam
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub student_id: StudentId,
    pub exam_id: ExamId,
    pub status: EnrollmentStatus,
    /// Face-verification score recorded at enrollment
    #[serde(default)]
    pub verification_score: Option<f64>,
    pub enrolled_at: DateTime<Utc>,
    #[serde(default)]
    pub block: BlockState,
}

impl Enrollment {
    /// A fresh enrollment attempt, Pending until verification comes back.
    pub fn pending(
        id: EnrollmentId,
        student_id: StudentId,
        exam_id: ExamId,
        verification_score: Option<f64>,
    ) -> Self {
        Self {
            id,
            student_id,
            exam_id,
            status: EnrollmentStatus::Pending,
            verification_score,
            enrolled_at: invigil_util::now(),
            block: BlockState::default(),
        }
    }
}
