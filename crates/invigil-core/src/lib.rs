//! Core policy for invigil
//!
//! This crate contains the pure decision logic shared by the student and
//! proctor sides:
//! - Alert derivation (which activity events become alerts, and the
//!   notification side effect)
//! - Session status derivation (Scheduled -> Active -> Completed)
//! - Enrollment state machine (Pending -> Verified -> Approved/Rejected)
//!   and the exam access gate

mod engine;
mod session;

pub use engine::*;
pub use session::*;
