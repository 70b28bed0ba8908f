//! Pub/sub transport for invigil
//!
//! Provides:
//! - NDJSON (newline-delimited JSON) frame protocol over TCP
//! - `Broker`: topic-routing server that stamps server timestamps on
//!   activity payloads and exchanges heartbeats
//! - `Channel`: client with idempotent connect, automatic reconnect at a
//!   fixed delay, bounded-wait subscription install, and best-effort
//!   publish with a single delayed retry

mod broker;
mod client;

pub use broker::*;
pub use client::*;
pub use invigil_api::Topic;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Subscription install timed out for topic {0}")]
    SubscribeTimeout(Topic),

    #[error("Broker error: {0}")]
    BrokerError(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Wire frames exchanged between channel and broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Liveness probe, sent in both directions
    Heartbeat,
    /// Client asks to receive messages for a topic
    Subscribe { topic: Topic },
    /// Client publishes a payload to a topic
    Publish {
        topic: Topic,
        payload: serde_json::Value,
    },
    /// Broker delivers a payload to a subscriber
    Message {
        topic: Topic,
        payload: serde_json::Value,
    },
}

/// Connection lifecycle state of a [`Channel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}
