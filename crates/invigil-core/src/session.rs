//! Session status derivation and the enrollment state machine
//!
//! Administrative transitions (approve, reject, block, unblock) are commands
//! to the system of record. The helpers here are applied to the entity the
//! server returned, never optimistically, so the local projection only ever
//! reflects acknowledged state.

use chrono::{DateTime, Utc};
use invigil_api::{Enrollment, EnrollmentStatus, ExamSession, SessionStatus};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("enrollment {0}: cannot move from {1:?} to {2:?}")]
    InvalidTransition(invigil_util::EnrollmentId, EnrollmentStatus, EnrollmentStatus),
}

/// Derive the lifecycle state of a session from its snapshot.
///
/// A recorded end always wins, even when the clock says the window has not
/// opened yet — end time is set by an explicit end command, not the clock.
pub fn session_status(session: &ExamSession, now: DateTime<Utc>) -> SessionStatus {
    if session.end_time.is_some() {
        SessionStatus::Completed
    } else if now < session.start_time {
        SessionStatus::Scheduled
    } else {
        SessionStatus::Active
    }
}

/// Exam access gate: verified-or-approved standing, and not blocked.
///
/// Pending and Rejected never pass; the block flag vetoes independently of
/// the primary status.
pub fn can_access_test(enrollment: &Enrollment) -> bool {
    let standing = matches!(
        enrollment.status,
        EnrollmentStatus::Verified | EnrollmentStatus::Approved
    );
    standing && !enrollment.block.blocked
}

/// Pending -> Verified, on a passing face-verification result.
pub fn mark_verified(enrollment: &mut Enrollment) -> Result<(), TransitionError> {
    transition(enrollment, EnrollmentStatus::Verified, |from| {
        from == EnrollmentStatus::Pending
    })
}

/// Verified -> Approved, by an administrator.
pub fn approve(enrollment: &mut Enrollment) -> Result<(), TransitionError> {
    transition(enrollment, EnrollmentStatus::Approved, |from| {
        from == EnrollmentStatus::Verified
    })
}

/// Any non-rejected state -> Rejected. Terminal.
pub fn reject(enrollment: &mut Enrollment) -> Result<(), TransitionError> {
    transition(enrollment, EnrollmentStatus::Rejected, |from| {
        from != EnrollmentStatus::Rejected
    })
}

fn transition(
    enrollment: &mut Enrollment,
    to: EnrollmentStatus,
    allowed: impl Fn(EnrollmentStatus) -> bool,
) -> Result<(), TransitionError> {
    let from = enrollment.status;
    if !allowed(from) {
        return Err(TransitionError::InvalidTransition(enrollment.id, from, to));
    }
    enrollment.status = to;
    info!(
        enrollment_id = %enrollment.id,
        from = ?from,
        to = ?to,
        "Enrollment transition"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use invigil_util::{EnrollmentId, ExamId, SessionId, StudentId};

    fn session(start_offset: i64, end_offset: Option<i64>) -> ExamSession {
        let now = invigil_util::now();
        ExamSession {
            id: SessionId::new(1),
            exam_id: ExamId::new(2),
            exam_name: "Midterm".into(),
            start_time: now + Duration::seconds(start_offset),
            end_time: end_offset.map(|secs| now + Duration::seconds(secs)),
            created_by: "admin".into(),
        }
    }

    fn enrollment(status: EnrollmentStatus, blocked: bool) -> Enrollment {
        let mut e = Enrollment::pending(
            EnrollmentId::new(1),
            StudentId::new(2),
            ExamId::new(3),
            Some(0.9),
        );
        e.status = status;
        if blocked {
            e.block.block("proctor", "suspicious", invigil_util::now());
        }
        e
    }

    #[test]
    fn status_is_derived_from_snapshot() {
        let now = invigil_util::now();
        assert_eq!(session_status(&session(60, None), now), SessionStatus::Scheduled);
        assert_eq!(session_status(&session(-60, None), now), SessionStatus::Active);
        assert_eq!(
            session_status(&session(-120, Some(-10)), now),
            SessionStatus::Completed
        );
    }

    #[test]
    fn recorded_end_wins_over_clock() {
        // Ended early, before the scheduled start would even have passed
        let now = invigil_util::now();
        let mut s = session(60, None);
        s.end_time = Some(now);
        assert_eq!(session_status(&s, now), SessionStatus::Completed);
    }

    #[test]
    fn status_never_moves_backwards_as_time_advances() {
        let s = session(10, None);
        let t0 = s.start_time - Duration::seconds(5);
        let t1 = s.start_time + Duration::seconds(5);
        assert_eq!(session_status(&s, t0), SessionStatus::Scheduled);
        assert_eq!(session_status(&s, t1), SessionStatus::Active);
    }

    #[test]
    fn access_gate_cross_product() {
        use EnrollmentStatus::*;
        let cases = [
            (Pending, false, false),
            (Pending, true, false),
            (Verified, false, true),
            (Verified, true, false),
            (Approved, false, true),
            (Approved, true, false),
            (Rejected, false, false),
            (Rejected, true, false),
        ];
        for (status, blocked, expected) in cases {
            let e = enrollment(status, blocked);
            assert_eq!(
                can_access_test(&e),
                expected,
                "status {status:?}, blocked {blocked}"
            );
        }
    }

    #[test]
    fn verification_flow() {
        let mut e = enrollment(EnrollmentStatus::Pending, false);
        mark_verified(&mut e).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Verified);
        approve(&mut e).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Approved);
    }

    #[test]
    fn approval_requires_verification() {
        let mut e = enrollment(EnrollmentStatus::Pending, false);
        assert!(approve(&mut e).is_err());
        assert_eq!(e.status, EnrollmentStatus::Pending);
    }

    #[test]
    fn rejection_is_terminal() {
        let mut e = enrollment(EnrollmentStatus::Approved, false);
        reject(&mut e).unwrap();
        assert_eq!(e.status, EnrollmentStatus::Rejected);
        assert!(reject(&mut e).is_err());
        assert!(mark_verified(&mut e).is_err());
    }

    #[test]
    fn blocking_does_not_touch_primary_status() {
        let mut e = enrollment(EnrollmentStatus::Approved, false);
        e.block.block("proctor", "copy attempts", invigil_util::now());
        assert_eq!(e.status, EnrollmentStatus::Approved);
        assert!(!can_access_test(&e));

        e.block.unblock("proctor", invigil_util::now());
        assert!(can_access_test(&e));
    }
}
