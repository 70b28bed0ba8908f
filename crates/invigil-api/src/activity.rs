//! Activity events observed on the student side
//!
//! An event is an envelope (identity, timing, severity) around a tagged
//! per-type detail. Severity is stamped at construction from a fixed
//! classification table; producers do not pick severities for known types.

use chrono::{DateTime, Utc};
use invigil_util::{SessionId, StudentId, TestId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered severity of an observed behavior
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Whether this severity qualifies for automatic alert synthesis
    pub fn is_alerting(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// Per-type detail of an observed behavior
///
/// Unknown types land in `Other` rather than failing the feed, so a newer
/// producer cannot stall an older dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityDetail {
    TestStarted,
    TestSubmitted,
    QuestionAnswered { question_index: u32 },
    TabSwitch { count: u32 },
    CopyAttempt,
    PasteAttempt,
    RightClick,
    WindowBlur,
    WindowFocus,
    FaceDetected,
    MultipleFaces { count: u32 },
    NoFace,
    MouseLeave,
    Other { kind: String, detail: serde_json::Value },
}

/// Tab-switch occurrences at which severity escalates from HIGH to CRITICAL
pub const TAB_SWITCH_ESCALATION_THRESHOLD: u32 = 3;

impl ActivityDetail {
    /// Default severity for this activity type (the classification table).
    ///
    /// TAB_SWITCH escalates to CRITICAL at the third occurrence within a
    /// session; the occurrence count is carried in the detail itself.
    pub fn severity(&self) -> Severity {
        match self {
            ActivityDetail::TestStarted
            | ActivityDetail::TestSubmitted
            | ActivityDetail::QuestionAnswered { .. }
            | ActivityDetail::WindowFocus
            | ActivityDetail::FaceDetected => Severity::Low,
            ActivityDetail::RightClick
            | ActivityDetail::WindowBlur
            | ActivityDetail::MouseLeave
            | ActivityDetail::Other { .. } => Severity::Medium,
            ActivityDetail::TabSwitch { count } => {
                if *count >= TAB_SWITCH_ESCALATION_THRESHOLD {
                    Severity::Critical
                } else {
                    Severity::High
                }
            }
            ActivityDetail::PasteAttempt | ActivityDetail::NoFace => Severity::High,
            ActivityDetail::CopyAttempt | ActivityDetail::MultipleFaces { .. } => {
                Severity::Critical
            }
        }
    }

    /// Wire tag for this activity type
    pub fn kind(&self) -> &str {
        match self {
            ActivityDetail::TestStarted => "TEST_STARTED",
            ActivityDetail::TestSubmitted => "TEST_SUBMITTED",
            ActivityDetail::QuestionAnswered { .. } => "QUESTION_ANSWERED",
            ActivityDetail::TabSwitch { .. } => "TAB_SWITCH",
            ActivityDetail::CopyAttempt => "COPY_ATTEMPT",
            ActivityDetail::PasteAttempt => "PASTE_ATTEMPT",
            ActivityDetail::RightClick => "RIGHT_CLICK",
            ActivityDetail::WindowBlur => "WINDOW_BLUR",
            ActivityDetail::WindowFocus => "WINDOW_FOCUS",
            ActivityDetail::FaceDetected => "FACE_DETECTED",
            ActivityDetail::MultipleFaces { .. } => "MULTIPLE_FACES",
            ActivityDetail::NoFace => "NO_FACE",
            ActivityDetail::MouseLeave => "MOUSE_LEAVE",
            ActivityDetail::Other { kind, .. } => kind,
        }
    }
}

/// Known activity types as an internally-tagged enum for serde.
/// `ActivityDetail` wraps this with a catch-all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum KnownDetail {
    TestStarted,
    TestSubmitted,
    QuestionAnswered { question_index: u32 },
    TabSwitch { count: u32 },
    CopyAttempt,
    PasteAttempt,
    RightClick,
    WindowBlur,
    WindowFocus,
    FaceDetected,
    MultipleFaces { count: u32 },
    NoFace,
    MouseLeave,
}

impl From<KnownDetail> for ActivityDetail {
    fn from(known: KnownDetail) -> Self {
        match known {
            KnownDetail::TestStarted => ActivityDetail::TestStarted,
            KnownDetail::TestSubmitted => ActivityDetail::TestSubmitted,
            KnownDetail::QuestionAnswered { question_index } => {
                ActivityDetail::QuestionAnswered { question_index }
            }
            KnownDetail::TabSwitch { count } => ActivityDetail::TabSwitch { count },
            KnownDetail::CopyAttempt => ActivityDetail::CopyAttempt,
            KnownDetail::PasteAttempt => ActivityDetail::PasteAttempt,
            KnownDetail::RightClick => ActivityDetail::RightClick,
            KnownDetail::WindowBlur => ActivityDetail::WindowBlur,
            KnownDetail::WindowFocus => ActivityDetail::WindowFocus,
            KnownDetail::FaceDetected => ActivityDetail::FaceDetected,
            KnownDetail::MultipleFaces { count } => ActivityDetail::MultipleFaces { count },
            KnownDetail::NoFace => ActivityDetail::NoFace,
            KnownDetail::MouseLeave => ActivityDetail::MouseLeave,
        }
    }
}

impl TryFrom<&ActivityDetail> for KnownDetail {
    type Error = ();

    fn try_from(detail: &ActivityDetail) -> Result<Self, ()> {
        Ok(match detail {
            ActivityDetail::TestStarted => KnownDetail::TestStarted,
            ActivityDetail::TestSubmitted => KnownDetail::TestSubmitted,
            ActivityDetail::QuestionAnswered { question_index } => KnownDetail::QuestionAnswered {
                question_index: *question_index,
            },
            ActivityDetail::TabSwitch { count } => KnownDetail::TabSwitch { count: *count },
            ActivityDetail::CopyAttempt => KnownDetail::CopyAttempt,
            ActivityDetail::PasteAttempt => KnownDetail::PasteAttempt,
            ActivityDetail::RightClick => KnownDetail::RightClick,
            ActivityDetail::WindowBlur => KnownDetail::WindowBlur,
            ActivityDetail::WindowFocus => KnownDetail::WindowFocus,
            ActivityDetail::FaceDetected => KnownDetail::FaceDetected,
            ActivityDetail::MultipleFaces { count } => {
                KnownDetail::MultipleFaces { count: *count }
            }
            ActivityDetail::NoFace => KnownDetail::NoFace,
            ActivityDetail::MouseLeave => KnownDetail::MouseLeave,
            ActivityDetail::Other { .. } => return Err(()),
        })
    }
}

impl Serialize for ActivityDetail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match KnownDetail::try_from(self) {
            Ok(known) => known.serialize(serializer),
            Err(()) => {
                let ActivityDetail::Other { kind, detail } = self else {
                    unreachable!()
                };
                let mut map = match detail {
                    serde_json::Value::Object(map) => map.clone(),
                    serde_json::Value::Null => serde_json::Map::new(),
                    other => {
                        let mut map = serde_json::Map::new();
                        map.insert("detail".into(), other.clone());
                        map
                    }
                };
                map.insert("type".into(), serde_json::Value::String(kind.clone()));
                serde_json::Value::Object(map).serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ActivityDetail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        match serde_json::from_value::<KnownDetail>(value.clone()) {
            Ok(known) => Ok(known.into()),
            Err(_) => {
                let Some(map) = value.as_object_mut() else {
                    return Err(D::Error::custom("activity detail must be an object"));
                };
                let kind = match map.remove("type") {
                    Some(serde_json::Value::String(kind)) => kind,
                    _ => return Err(D::Error::custom("activity detail missing type tag")),
                };
                Ok(ActivityDetail::Other {
                    kind,
                    detail: value,
                })
            }
        }
    }
}

/// Identity snapshot of the student an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRef {
    pub id: StudentId,
    pub name: String,
    pub email: Option<String>,
}

/// Session context an event was observed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: SessionId,
    pub test_id: TestId,
    pub test_name: String,
}

/// One observed client-side behavior during a test
///
/// On the wire the envelope is flat: the detail's fields (including the
/// `type` tag) sit next to severity, description, identity and timestamps
/// in one object.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEvent {
    pub detail: ActivityDetail,
    pub severity: Severity,
    pub description: String,
    pub student: Option<StudentRef>,
    pub session: Option<SessionRef>,
    /// Client-assigned timestamp
    pub timestamp: DateTime<Utc>,
    /// Assigned by the broker on receipt
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl Serialize for ActivityEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error as _;

        let mut map = match serde_json::to_value(&self.detail) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => return Err(S::Error::custom("activity detail must be an object")),
            Err(e) => return Err(S::Error::custom(e)),
        };

        let mut put = |key: &str, value: Result<serde_json::Value, serde_json::Error>| {
            value.map(|value| {
                map.insert(key.into(), value);
            })
        };
        put("severity", serde_json::to_value(self.severity)).map_err(S::Error::custom)?;
        put("description", serde_json::to_value(&self.description)).map_err(S::Error::custom)?;
        if let Some(student) = &self.student {
            put("student", serde_json::to_value(student)).map_err(S::Error::custom)?;
        }
        if let Some(session) = &self.session {
            put("session", serde_json::to_value(session)).map_err(S::Error::custom)?;
        }
        put("timestamp", serde_json::to_value(self.timestamp)).map_err(S::Error::custom)?;
        if let Some(server_timestamp) = self.server_timestamp {
            put("server_timestamp", serde_json::to_value(server_timestamp))
                .map_err(S::Error::custom)?;
        }

        serde_json::Value::Object(map).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActivityEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        fn take<T: serde::de::DeserializeOwned, E: serde::de::Error>(
            map: &mut serde_json::Map<String, serde_json::Value>,
            key: &str,
        ) -> Result<Option<T>, E> {
            match map.remove(key) {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(value) => serde_json::from_value(value).map(Some).map_err(E::custom),
            }
        }

        let mut value = serde_json::Value::deserialize(deserializer)?;
        let Some(map) = value.as_object_mut() else {
            return Err(D::Error::custom("activity event must be an object"));
        };

        let severity: Severity = take(map, "severity")?
            .ok_or_else(|| D::Error::custom("activity event missing severity"))?;
        let description: String = take(map, "description")?.unwrap_or_default();
        let student = take(map, "student")?;
        let session = take(map, "session")?;
        let timestamp: DateTime<Utc> = take(map, "timestamp")?
            .ok_or_else(|| D::Error::custom("activity event missing timestamp"))?;
        let server_timestamp = take(map, "server_timestamp")?;

        // What remains is the tagged detail
        let detail =
            serde_json::from_value::<ActivityDetail>(value).map_err(D::Error::custom)?;

        Ok(ActivityEvent {
            detail,
            severity,
            description,
            student,
            session,
            timestamp,
            server_timestamp,
        })
    }
}

impl ActivityEvent {
    /// Build an event, stamping severity from the classification table and
    /// the timestamp from the caller's clock. Missing identity/session
    /// context is legal; the event just cannot be attributed later.
    pub fn new(detail: ActivityDetail, description: impl Into<String>) -> Self {
        let severity = detail.severity();
        Self {
            detail,
            severity,
            description: description.into(),
            student: None,
            session: None,
            timestamp: invigil_util::now(),
            server_timestamp: None,
        }
    }

    pub fn with_student(mut self, student: StudentRef) -> Self {
        self.student = Some(student);
        self
    }

    pub fn with_session(mut self, session: SessionRef) -> Self {
        self.session = Some(session);
        self
    }

    /// Ordering key for display: broker receipt time when present, else the
    /// client clock.
    pub fn display_time(&self) -> DateTime<Utc> {
        self.server_timestamp.unwrap_or(self.timestamp)
    }

    /// Ingestion-boundary check: a declared severity below the table value
    /// for its type would under-report a violation and is rejected.
    /// (Above is allowed; alert severity is monotone non-decreasing.)
    pub fn validate(&self) -> Result<(), String> {
        let expected = self.detail.severity();
        if self.severity < expected {
            return Err(format!(
                "declared severity {:?} below table value {:?} for {}",
                self.severity,
                expected,
                self.detail.kind()
            ));
        }
        Ok(())
    }

    /// Durable-log form of this event (`POST /events/log` payload).
    /// Requires identity and session context; unattributable events have
    /// nothing to persist against.
    pub fn to_log_record(&self) -> Option<EventLogRecord> {
        let student = self.student.as_ref()?;
        let session = self.session.as_ref()?;
        Some(EventLogRecord {
            student_id: student.id,
            test_id: session.test_id,
            event_type: self.detail.kind().to_string(),
            details: self.description.clone(),
            timestamp: self.timestamp,
        })
    }
}

/// Payload of the direct REST logging call — the durable fallback record
/// that survives even when the live channel is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub student_id: StudentId,
    pub test_id: TestId,
    pub event_type: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn classification_table() {
        assert_eq!(ActivityDetail::CopyAttempt.severity(), Severity::Critical);
        assert_eq!(ActivityDetail::PasteAttempt.severity(), Severity::High);
        assert_eq!(ActivityDetail::RightClick.severity(), Severity::Medium);
        assert_eq!(ActivityDetail::WindowBlur.severity(), Severity::Medium);
        assert_eq!(ActivityDetail::WindowFocus.severity(), Severity::Low);
        assert_eq!(ActivityDetail::TestStarted.severity(), Severity::Low);
        assert_eq!(ActivityDetail::TestSubmitted.severity(), Severity::Low);
        assert_eq!(
            ActivityDetail::QuestionAnswered { question_index: 1 }.severity(),
            Severity::Low
        );
        assert_eq!(ActivityDetail::FaceDetected.severity(), Severity::Low);
        assert_eq!(
            ActivityDetail::MultipleFaces { count: 2 }.severity(),
            Severity::Critical
        );
        assert_eq!(ActivityDetail::NoFace.severity(), Severity::High);
        assert_eq!(ActivityDetail::MouseLeave.severity(), Severity::Medium);
    }

    #[test]
    fn tab_switch_escalation() {
        assert_eq!(
            ActivityDetail::TabSwitch { count: 1 }.severity(),
            Severity::High
        );
        assert_eq!(
            ActivityDetail::TabSwitch { count: 2 }.severity(),
            Severity::High
        );
        assert_eq!(
            ActivityDetail::TabSwitch { count: 3 }.severity(),
            Severity::Critical
        );
        assert_eq!(
            ActivityDetail::TabSwitch { count: 7 }.severity(),
            Severity::Critical
        );
    }

    #[test]
    fn detail_serialization_round_trip() {
        let detail = ActivityDetail::TabSwitch { count: 3 };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains("TAB_SWITCH"));
        let parsed: ActivityDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(detail, parsed);
    }

    #[test]
    fn unknown_detail_falls_into_other() {
        let json = r#"{"type":"DEVTOOLS_OPENED","panel":"network"}"#;
        let parsed: ActivityDetail = serde_json::from_str(json).unwrap();
        match &parsed {
            ActivityDetail::Other { kind, detail } => {
                assert_eq!(kind, "DEVTOOLS_OPENED");
                assert_eq!(detail["panel"], "network");
            }
            other => panic!("expected Other, got {other:?}"),
        }
        // Round-trips with the tag restored
        let json = serde_json::to_string(&parsed).unwrap();
        let reparsed: ActivityDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn event_wire_shape_is_flat() {
        let event = ActivityEvent::new(ActivityDetail::TabSwitch { count: 2 }, "tab switch")
            .with_student(StudentRef {
                id: StudentId::new(1),
                name: "Ada".into(),
                email: None,
            });
        let value = serde_json::to_value(&event).unwrap();

        // The detail's tag and fields sit at the top level of the envelope
        assert_eq!(value["type"], "TAB_SWITCH");
        assert_eq!(value["count"], 2);
        assert_eq!(value["severity"], "HIGH");
        assert_eq!(value["student"]["name"], "Ada");
        assert!(value.get("server_timestamp").is_none());

        let parsed: ActivityEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn event_construction_stamps_severity_and_time() {
        let event = ActivityEvent::new(ActivityDetail::CopyAttempt, "Copy attempt blocked");
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.server_timestamp.is_none());
        assert_eq!(event.display_time(), event.timestamp);
    }

    #[test]
    fn display_time_prefers_server_timestamp() {
        let mut event = ActivityEvent::new(ActivityDetail::WindowBlur, "Window lost focus");
        let later = event.timestamp + chrono::Duration::seconds(2);
        event.server_timestamp = Some(later);
        assert_eq!(event.display_time(), later);
    }

    #[test]
    fn validate_rejects_underreported_severity() {
        let mut event = ActivityEvent::new(ActivityDetail::CopyAttempt, "copy");
        event.severity = Severity::Low;
        assert!(event.validate().is_err());

        let event = ActivityEvent::new(ActivityDetail::CopyAttempt, "copy");
        assert!(event.validate().is_ok());
    }

    #[test]
    fn log_record_needs_attribution() {
        let event = ActivityEvent::new(ActivityDetail::PasteAttempt, "paste");
        assert!(event.to_log_record().is_none());

        let event = event
            .with_student(StudentRef {
                id: StudentId::new(1),
                name: "Ada".into(),
                email: None,
            })
            .with_session(SessionRef {
                session_id: SessionId::new(5),
                test_id: TestId::new(9),
                test_name: "Algebra".into(),
            });
        let record = event.to_log_record().unwrap();
        assert_eq!(record.event_type, "PASTE_ATTEMPT");
        assert_eq!(record.test_id, TestId::new(9));
    }
}
