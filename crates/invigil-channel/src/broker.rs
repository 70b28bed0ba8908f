//! Reference broker implementation
//!
//! Routes published frames to topic subscribers, stamps `server_timestamp`
//! on activity payloads at receipt, and emits heartbeats so clients can
//! detect a silently dead link. The production deployment runs its own
//! broker; this one backs `invigild` and the integration tests.

use invigil_api::Topic;
use invigil_util::ClientId;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info, warn};

use crate::{ChannelError, ChannelResult, Frame};

/// Default interval between broker-side heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(4);

/// Topic-routing pub/sub broker
pub struct Broker {
    listener: TcpListener,
    local_addr: SocketAddr,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    fanout_tx: broadcast::Sender<Delivery>,
    heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
struct Delivery {
    topic: String,
    line: String,
}

struct ClientHandle {
    topics: HashSet<String>,
}

impl Broker {
    /// Bind the broker to an address (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str) -> ChannelResult<Self> {
        Self::bind_with_heartbeat(addr, DEFAULT_HEARTBEAT_INTERVAL).await
    }

    pub async fn bind_with_heartbeat(
        addr: &str,
        heartbeat_interval: Duration,
    ) -> ChannelResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (fanout_tx, _) = broadcast::channel(256);

        info!(addr = %local_addr, "Broker listening");

        Ok(Self {
            listener,
            local_addr,
            clients: Arc::new(RwLock::new(HashMap::new())),
            fanout_tx,
            heartbeat_interval,
        })
    }

    /// Address the broker is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> ChannelResult<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let client_id = ClientId::new();
                    info!(client_id = %client_id, peer = %peer, "Client connected");
                    self.handle_client(stream, client_id).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream, client_id: ClientId) {
        let (read_half, write_half) = stream.into_split();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                client_id.clone(),
                ClientHandle {
                    topics: HashSet::new(),
                },
            );
        }

        // Reader task: parse frames, route publishes, record subscriptions
        let clients = self.clients.clone();
        let fanout_tx = self.fanout_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Frame>(line) {
                            Ok(Frame::Subscribe { topic }) => {
                                debug!(client_id = %reader_id, topic = %topic, "Subscribed");
                                let mut clients = clients.write().await;
                                if let Some(handle) = clients.get_mut(&reader_id) {
                                    handle.topics.insert(topic.to_string());
                                }
                            }
                            Ok(Frame::Publish { topic, payload }) => {
                                let payload = stamp_payload(&topic, payload);
                                let frame = Frame::Message {
                                    topic: topic.clone(),
                                    payload,
                                };
                                match serde_json::to_string(&frame) {
                                    Ok(line) => {
                                        let _ = fanout_tx.send(Delivery {
                                            topic: topic.to_string(),
                                            line,
                                        });
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "Failed to encode delivery");
                                    }
                                }
                            }
                            Ok(Frame::Heartbeat) => {}
                            Ok(Frame::Message { .. }) => {
                                warn!(client_id = %reader_id, "Client sent a message frame, ignoring");
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid frame");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        // Writer task: fan deliveries out to subscribed topics, heartbeat
        let mut fanout_rx = self.fanout_tx.subscribe();
        let clients_writer = self.clients.clone();
        let writer_id = client_id;
        let heartbeat_interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut writer = write_half;
            let mut heartbeat = tokio::time::interval(heartbeat_interval);
            heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    delivery = fanout_rx.recv() => {
                        match delivery {
                            Ok(delivery) => {
                                let is_subscribed = {
                                    let clients = clients_writer.read().await;
                                    clients
                                        .get(&writer_id)
                                        .map(|h| h.topics.contains(&delivery.topic))
                                        .unwrap_or(false)
                                };

                                if is_subscribed {
                                    let mut msg = delivery.line;
                                    msg.push('\n');
                                    if let Err(e) = writer.write_all(msg.as_bytes()).await {
                                        debug!(client_id = %writer_id, error = %e, "Write error");
                                        break;
                                    }
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(client_id = %writer_id, missed, "Subscriber lagged, messages dropped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }

                    _ = heartbeat.tick() => {
                        let mut msg = match serde_json::to_string(&Frame::Heartbeat) {
                            Ok(msg) => msg,
                            Err(_) => break,
                        };
                        msg.push('\n');
                        if let Err(e) = writer.write_all(msg.as_bytes()).await {
                            debug!(client_id = %writer_id, error = %e, "Heartbeat write error");
                            break;
                        }
                    }
                }
            }

            let mut clients = clients_writer.write().await;
            clients.remove(&writer_id);
        });
    }
}

/// Stamp the broker receipt time onto activity payloads that lack one.
/// Alert payloads pass through untouched; their timestamps belong to the
/// system of record.
fn stamp_payload(topic: &Topic, mut payload: serde_json::Value) -> serde_json::Value {
    let is_activity = matches!(topic, Topic::StudentActivity | Topic::SessionActivity(_));
    if is_activity {
        if let Some(map) = payload.as_object_mut() {
            let missing = map
                .get("server_timestamp")
                .map(|v| v.is_null())
                .unwrap_or(true);
            if missing {
                match serde_json::to_value(invigil_util::now()) {
                    Ok(ts) => {
                        map.insert("server_timestamp".into(), ts);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to stamp server timestamp");
                    }
                }
            }
        }
    }
    payload
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Convenience: bind a broker and serve it on a background task.
/// Returns the bound address and the task handle (abort to stop).
pub async fn spawn_broker(addr: &str) -> ChannelResult<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let broker = Broker::bind(addr).await?;
    let local_addr = broker.local_addr();
    let handle = tokio::spawn(async move {
        if let Err(e) = broker.run().await {
            error!(error = %e, "Broker stopped");
        }
    });
    Ok((local_addr, handle))
}

// Keep the error type in the public signature honest
impl From<std::net::AddrParseError> for ChannelError {
    fn from(e: std::net::AddrParseError) -> Self {
        ChannelError::BrokerError(e.to_string())
    }
}
