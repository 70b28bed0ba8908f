//! Pub/sub topics on the telemetry broker

use invigil_util::SessionId;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A broker topic. Serialized as its string form on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Live student activity feed
    StudentActivity,
    /// Derived alerts pushed by the system of record
    Alerts,
    /// Activity scoped to one exam session
    SessionActivity(SessionId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::StudentActivity => write!(f, "student-activity"),
            Topic::Alerts => write!(f, "alerts"),
            Topic::SessionActivity(id) => write!(f, "session/{id}/activity"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student-activity" => return Ok(Topic::StudentActivity),
            "alerts" => return Ok(Topic::Alerts),
            _ => {}
        }
        if let Some(rest) = s.strip_prefix("session/") {
            if let Some(id) = rest.strip_suffix("/activity") {
                let id: i64 = id
                    .parse()
                    .map_err(|_| format!("invalid session id in topic: {s}"))?;
                return Ok(Topic::SessionActivity(SessionId::new(id)));
            }
        }
        Err(format!("unknown topic: {s}"))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
