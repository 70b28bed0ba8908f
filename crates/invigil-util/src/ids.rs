//! Strongly-typed identifiers for invigil
//!
//! Entity ids are numeric because the system of record hands out database
//! ids; broker client ids are generated locally and use UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a student account
    StudentId
);

numeric_id!(
    /// Identifier of an exam (the scheduling unit enrollments attach to)
    ExamId
);

numeric_id!(
    /// Identifier of a test (the question set taken within an exam session)
    TestId
);

numeric_id!(
    /// Identifier of an exam session (a scheduled proctored window)
    SessionId
);

numeric_id!(
    /// Identifier of a persisted alert
    AlertId
);

numeric_id!(
    /// Identifier of an enrollment record
    EnrollmentId
);

/// Unique identifier for a connected broker client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
