//! Proctor dashboard aggregation
//!
//! `DashboardState` is the pure aggregator: alert list, bounded activity
//! buffer, active-student set and derived statistics. `DashboardClient`
//! wraps it in a driver task wired to the live channel and the
//! reconciliation poll; each dashboard view owns one client.

mod client;
mod state;

pub use client::*;
pub use state::*;
