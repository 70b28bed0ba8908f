//! Client for the exam system of record
//!
//! Every request carries the bearer credential when one is set. 401
//! responses are classified into authentication failures (stale or missing
//! credential, triggers the forced-logout path at most once per login) and
//! authorization failures (valid identity, insufficient rights, surfaced to
//! the caller).

mod auth;
mod client;

pub use auth::*;
pub use client::*;
