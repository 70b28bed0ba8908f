//! Student-side activity reporter
//!
//! One reporter lives for the duration of a test attempt. Every observed
//! behavior goes out twice: on the live channel (best-effort, proctors
//! watching now) and to the durable REST log (authoritative record, issued
//! even when the channel is down). The reporter also owns the per-attempt
//! tab-switch counter that drives severity escalation and a latch that
//! remembers whether anything alert-worthy happened.

use chrono::{DateTime, Utc};
use invigil_api::{
    ActivityDetail, ActivityEvent, Enrollment, ExamSession, SessionRef, SessionStatus, StudentRef,
};
use invigil_backend::ApiClient;
use invigil_channel::{Channel, Topic};
use invigil_core::{can_access_test, session_status};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gate combining enrollment standing and the session window: a student may
/// begin only with verified-or-approved unblocked standing inside an active
/// session.
pub fn may_begin_test(
    enrollment: &Enrollment,
    session: &ExamSession,
    now: DateTime<Utc>,
) -> bool {
    can_access_test(enrollment) && session_status(session, now) == SessionStatus::Active
}

/// Reports one student's activity for one test attempt
pub struct ActivityReporter {
    channel: Arc<Channel>,
    api: Arc<ApiClient>,
    student: StudentRef,
    session: SessionRef,
    tab_switches: u32,
    suspicious: bool,
}

impl ActivityReporter {
    pub fn new(
        channel: Arc<Channel>,
        api: Arc<ApiClient>,
        student: StudentRef,
        session: SessionRef,
    ) -> Self {
        Self {
            channel,
            api,
            student,
            session,
            tab_switches: 0,
            suspicious: false,
        }
    }

    /// Tab switches observed so far in this attempt
    pub fn tab_switch_count(&self) -> u32 {
        self.tab_switches
    }

    /// Whether anything alert-worthy has happened in this attempt
    pub fn suspicious_activity_detected(&self) -> bool {
        self.suspicious
    }

    pub async fn test_started(&mut self) -> ActivityEvent {
        self.report(ActivityDetail::TestStarted, "Test started").await
    }

    /// Submit marker; logs the suspicion summary for the attempt.
    pub async fn test_submitted(&mut self) -> ActivityEvent {
        let description = if self.suspicious {
            "Test submitted (suspicious activity was detected)"
        } else {
            "Test submitted"
        };
        info!(
            student_id = %self.student.id,
            suspicious = self.suspicious,
            tab_switches = self.tab_switches,
            "Test submitted"
        );
        self.report(ActivityDetail::TestSubmitted, description).await
    }

    pub async fn question_answered(&mut self, question_index: u32) -> ActivityEvent {
        self.report(
            ActivityDetail::QuestionAnswered { question_index },
            format!("Answered question {}", question_index + 1),
        )
        .await
    }

    /// Record one tab switch. The running count rides in the event so the
    /// classification table can escalate at the threshold.
    pub async fn tab_switch(&mut self) -> ActivityEvent {
        self.tab_switches += 1;
        let count = self.tab_switches;
        self.report(
            ActivityDetail::TabSwitch { count },
            format!("Switched away from the test tab ({count} times)"),
        )
        .await
    }

    /// Report an observed behavior: stamp severity and identity, publish on
    /// the live topics, and issue the durable log call. Log failures are
    /// warned and swallowed; losing the durable record must not interrupt
    /// the attempt.
    pub async fn report(
        &mut self,
        detail: ActivityDetail,
        description: impl Into<String>,
    ) -> ActivityEvent {
        let event = ActivityEvent::new(detail, description)
            .with_student(self.student.clone())
            .with_session(self.session.clone());

        if event.severity.is_alerting() {
            self.suspicious = true;
        }

        self.channel.publish(Topic::StudentActivity, &event);
        self.channel.publish(
            Topic::SessionActivity(self.session.session_id),
            &event,
        );

        match event.to_log_record() {
            Some(record) => {
                if let Err(e) = self.api.log_event(&record).await {
                    warn!(
                        event_type = record.event_type,
                        error = %e,
                        "Durable event log failed"
                    );
                }
            }
            None => debug!("Event lacks attribution, nothing to log durably"),
        }

        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use invigil_api::{EnrollmentStatus, Severity};
    use invigil_channel::{ChannelConfig, spawn_broker};
    use invigil_util::{EnrollmentId, ExamId, SessionId, StudentId, TestId};

    fn student() -> StudentRef {
        StudentRef {
            id: StudentId::new(7),
            name: "Grace".into(),
            email: Some("grace@example.org".into()),
        }
    }

    fn session_ref() -> SessionRef {
        SessionRef {
            session_id: SessionId::new(3),
            test_id: TestId::new(11),
            test_name: "Databases".into(),
        }
    }

    fn enrollment(status: EnrollmentStatus) -> Enrollment {
        let mut e = Enrollment::pending(
            EnrollmentId::new(1),
            StudentId::new(7),
            ExamId::new(2),
            Some(0.95),
        );
        e.status = status;
        e
    }

    fn active_session() -> ExamSession {
        ExamSession {
            id: SessionId::new(3),
            exam_id: ExamId::new(2),
            exam_name: "Finals".into(),
            start_time: invigil_util::now() - Duration::minutes(5),
            end_time: None,
            created_by: "admin".into(),
        }
    }

    async fn reporter() -> (ActivityReporter, Arc<Channel>, tokio::task::JoinHandle<()>) {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();
        let channel = Arc::new(Channel::new(ChannelConfig::new(addr.to_string())));
        channel.connect();
        channel
            .status()
            .wait_for(|s| *s == invigil_channel::ChannelStatus::Connected)
            .await
            .unwrap();

        // Unreachable backend: durable log failures must be non-fatal
        let api = Arc::new(
            ApiClient::new("http://127.0.0.1:9", std::time::Duration::from_millis(100)).unwrap(),
        );
        let reporter = ActivityReporter::new(channel.clone(), api, student(), session_ref());
        (reporter, channel, broker)
    }

    #[test]
    fn begin_gate_needs_standing_and_active_window() {
        let now = invigil_util::now();
        let active = active_session();

        assert!(may_begin_test(&enrollment(EnrollmentStatus::Approved), &active, now));
        assert!(may_begin_test(&enrollment(EnrollmentStatus::Verified), &active, now));
        assert!(!may_begin_test(&enrollment(EnrollmentStatus::Pending), &active, now));

        let mut scheduled = active.clone();
        scheduled.start_time = now + Duration::minutes(10);
        assert!(!may_begin_test(
            &enrollment(EnrollmentStatus::Approved),
            &scheduled,
            now
        ));

        let mut ended = active.clone();
        ended.end_time = Some(now);
        assert!(!may_begin_test(
            &enrollment(EnrollmentStatus::Approved),
            &ended,
            now
        ));

        let mut blocked = enrollment(EnrollmentStatus::Approved);
        blocked.block.block("proctor", "copying", now);
        assert!(!may_begin_test(&blocked, &active, now));
    }

    #[tokio::test]
    async fn tab_switches_count_and_escalate() {
        let (mut reporter, _channel, broker) = reporter().await;

        let first = reporter.tab_switch().await;
        let second = reporter.tab_switch().await;
        let third = reporter.tab_switch().await;

        assert_eq!(reporter.tab_switch_count(), 3);
        assert_eq!(first.severity, Severity::High);
        assert_eq!(second.severity, Severity::High);
        assert_eq!(third.severity, Severity::Critical);

        broker.abort();
    }

    #[tokio::test]
    async fn suspicion_latch_sets_and_holds() {
        let (mut reporter, _channel, broker) = reporter().await;

        reporter.test_started().await;
        assert!(!reporter.suspicious_activity_detected());

        reporter
            .report(ActivityDetail::CopyAttempt, "Copy attempt blocked")
            .await;
        assert!(reporter.suspicious_activity_detected());

        // Benign events do not clear the latch
        reporter.question_answered(0).await;
        let submitted = reporter.test_submitted().await;
        assert!(reporter.suspicious_activity_detected());
        assert!(submitted.description.contains("suspicious"));

        broker.abort();
    }

    #[tokio::test]
    async fn events_reach_both_live_topics() {
        let (mut reporter, channel, broker) = reporter().await;

        let mut all = channel.subscribe(Topic::StudentActivity).await.unwrap();
        let mut scoped = channel
            .subscribe(Topic::SessionActivity(SessionId::new(3)))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        reporter
            .report(ActivityDetail::PasteAttempt, "Paste attempt blocked")
            .await;

        for sub in [&mut all, &mut scoped] {
            let delivered = tokio::time::timeout(std::time::Duration::from_secs(2), sub.next())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(delivered["type"], "PASTE_ATTEMPT");
            assert!(delivered["server_timestamp"].is_string());
        }

        broker.abort();
    }
}
