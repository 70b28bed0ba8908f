//! Domain and wire types for invigil
//!
//! This crate defines the stable vocabulary shared by the student monitor,
//! the broker, and the proctor dashboard:
//! - Activity events (envelope + per-type detail) and the severity table
//! - Alerts and their resolve lifecycle
//! - Exam sessions and enrollments
//! - Pub/sub topics
//! - Versioning

mod activity;
mod alert;
mod enrollment;
mod session;
mod topic;

pub use activity::*;
pub use alert::*;
pub use enrollment::*;
pub use session::*;
pub use topic::*;

/// Current API version
pub const API_VERSION: u32 = 1;
