//! Shared utilities for invigil
//!
//! This crate provides:
//! - ID types (StudentId, ExamId, TestId, SessionId, AlertId, EnrollmentId, ClientId)
//! - Time helpers

mod ids;
mod time;

pub use ids::*;
pub use time::*;
