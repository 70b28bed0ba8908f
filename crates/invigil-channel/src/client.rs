//! Client channel implementation
//!
//! A `Channel` owns one logical connection to the broker for its whole
//! lifetime (one per dashboard view or test page). Connection management is
//! a single driver task; `connect()` is idempotent, reconnection is
//! automatic at a fixed delay, and subscriptions installed before or during
//! an outage are replayed on every successful connect.

use invigil_api::Topic;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{ChannelError, ChannelResult, ChannelStatus, Frame};

/// Channel timing configuration. Defaults match the deployed broker
/// contract: 5 s reconnect, 4 s heartbeats, 5 s subscription install bound,
/// one publish retry after 1 s.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub addr: String,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub subscribe_timeout: Duration,
    pub publish_retry_delay: Duration,
}

impl ChannelConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(4),
            subscribe_timeout: Duration::from_secs(5),
            publish_retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&invigil_config::BrokerConfig> for ChannelConfig {
    fn from(config: &invigil_config::BrokerConfig) -> Self {
        Self {
            addr: config.addr.clone(),
            reconnect_delay: config.reconnect_delay,
            heartbeat_interval: config.heartbeat_interval,
            subscribe_timeout: config.subscribe_timeout,
            publish_retry_delay: config.publish_retry_delay,
        }
    }
}

#[derive(Debug)]
enum Cmd {
    Connect,
    Disconnect,
    Publish {
        topic: Topic,
        payload: serde_json::Value,
    },
    Subscribe {
        topic: Topic,
    },
}

struct Shared {
    config: ChannelConfig,
    status_tx: watch::Sender<ChannelStatus>,
    /// Auto-reconnect enabled; cleared by `disconnect()`
    reconnect: AtomicBool,
    /// Successful broker connections over the channel's lifetime
    connections: AtomicU64,
    subs: Mutex<HashMap<Topic, Vec<mpsc::UnboundedSender<serde_json::Value>>>>,
}

impl Shared {
    fn set_status(&self, status: ChannelStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    fn dispatch(&self, topic: &Topic, payload: serde_json::Value) {
        let Ok(mut subs) = self.subs.lock() else {
            return;
        };
        if let Some(senders) = subs.get_mut(topic) {
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
    }

    fn topics(&self) -> Vec<Topic> {
        self.subs
            .lock()
            .map(|subs| subs.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Durable pub/sub connection to the telemetry broker
pub struct Channel {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Cmd>>>,
    driver_started: AtomicBool,
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                config,
                status_tx,
                reconnect: AtomicBool::new(false),
                connections: AtomicU64::new(0),
                subs: Mutex::new(HashMap::new()),
            }),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            driver_started: AtomicBool::new(false),
        }
    }

    /// Start (or resume) the connection. Idempotent: a connected or
    /// currently-connecting channel is left alone.
    pub fn connect(&self) {
        self.shared.reconnect.store(true, Ordering::SeqCst);

        if !self.driver_started.swap(true, Ordering::SeqCst) {
            if let Ok(mut guard) = self.cmd_rx.lock() {
                if let Some(cmd_rx) = guard.take() {
                    tokio::spawn(driver(self.shared.clone(), cmd_rx));
                }
            }
        }

        let _ = self.cmd_tx.send(Cmd::Connect);
    }

    /// Tear down the connection and suppress auto-reconnect until the next
    /// `connect()`.
    pub fn disconnect(&self) {
        self.shared.reconnect.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Cmd::Disconnect);
    }

    /// Fire-and-forget publish. When disconnected, a single retry is
    /// scheduled after `publish_retry_delay`; if the channel is still down
    /// the payload is dropped from the live path (the durable REST log is
    /// the authoritative record).
    pub fn publish<T: Serialize>(&self, topic: Topic, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to encode payload, dropping");
                return;
            }
        };
        self.publish_value(topic, value);
    }

    pub fn publish_value(&self, topic: Topic, payload: serde_json::Value) {
        if self.is_connected() {
            let _ = self.cmd_tx.send(Cmd::Publish { topic, payload });
            return;
        }

        warn!(topic = %topic, "Channel not connected, scheduling one publish retry");
        let cmd_tx = self.cmd_tx.clone();
        let status_rx = self.shared.status_tx.subscribe();
        let delay = self.shared.config.publish_retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if *status_rx.borrow() == ChannelStatus::Connected {
                let _ = cmd_tx.send(Cmd::Publish { topic, payload });
            } else {
                warn!(topic = %topic, "Channel still down, dropping payload from live path");
            }
        });
    }

    /// Install a subscription. Legal before the connection is up: waits on
    /// the connected notification, bounded at `subscribe_timeout`, then
    /// fails with a logged error (the caller retries). Installed
    /// subscriptions survive reconnects without being re-issued.
    pub async fn subscribe(&self, topic: Topic) -> ChannelResult<Subscription> {
        let mut status_rx = self.shared.status_tx.subscribe();
        let wait = status_rx.wait_for(|status| *status == ChannelStatus::Connected);

        match tokio::time::timeout(self.shared.config.subscribe_timeout, wait).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(ChannelError::ConnectionClosed),
            Err(_) => {
                error!(topic = %topic, "Subscription install timed out");
                return Err(ChannelError::SubscribeTimeout(topic));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.shared.subs.lock() {
            subs.entry(topic.clone()).or_default().push(tx);
        }
        let _ = self.cmd_tx.send(Cmd::Subscribe {
            topic: topic.clone(),
        });

        debug!(topic = %topic, "Subscription installed");
        Ok(Subscription { topic, rx })
    }

    /// Observable connection state, for the UI connectivity indicator
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.status_tx.borrow() == ChannelStatus::Connected
    }

    /// Successful broker connections so far (one for an idempotent connect)
    pub fn connection_count(&self) -> u64 {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

/// Stream of payloads delivered for one topic
pub struct Subscription {
    topic: Topic,
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Wait for the next payload, in arrival order. Returns `None` only
    /// when the channel itself has been dropped.
    pub async fn next(&mut self) -> Option<serde_json::Value> {
        self.rx.recv().await
    }
}

enum Exit {
    /// Channel handle dropped, stop for good
    Shutdown,
    /// `disconnect()` requested, go idle
    Requested,
    /// Transport failure, reconnect after the fixed delay
    Lost(String),
}

async fn driver(shared: Arc<Shared>, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    loop {
        if !shared.reconnect.load(Ordering::SeqCst) {
            // Idle until a connect request arrives
            match cmd_rx.recv().await {
                Some(Cmd::Connect) => continue,
                Some(_) => continue,
                None => return,
            }
        }

        shared.set_status(ChannelStatus::Connecting);
        debug!(addr = %shared.config.addr, "Connecting to broker");

        let stream = match TcpStream::connect(&shared.config.addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(addr = %shared.config.addr, error = %e, "Broker connection failed");
                shared.set_status(ChannelStatus::Disconnected);
                if !wait_before_retry(&shared, &mut cmd_rx).await {
                    return;
                }
                continue;
            }
        };

        shared.connections.fetch_add(1, Ordering::SeqCst);
        shared.set_status(ChannelStatus::Connected);
        info!(addr = %shared.config.addr, "Connected to broker");

        let exit = drive_connection(&shared, &mut cmd_rx, stream).await;
        shared.set_status(ChannelStatus::Disconnected);

        match exit {
            Exit::Shutdown => return,
            Exit::Requested => {
                info!("Channel disconnected by request");
            }
            Exit::Lost(reason) => {
                warn!(reason = %reason, "Connection lost");
                if !wait_before_retry(&shared, &mut cmd_rx).await {
                    return;
                }
            }
        }
    }
}

/// Sleep out the fixed reconnect delay while still servicing commands.
/// Returns false when the channel handle has been dropped.
async fn wait_before_retry(shared: &Arc<Shared>, cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>) -> bool {
    let sleep = tokio::time::sleep(shared.config.reconnect_delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None => return false,
                Some(Cmd::Disconnect) | Some(Cmd::Connect) => return true,
                Some(Cmd::Publish { topic, .. }) => {
                    debug!(topic = %topic, "Dropping publish while reconnecting");
                }
                Some(Cmd::Subscribe { .. }) => {
                    // Already recorded; the frame goes out on the next connect
                }
            },
        }
    }
}

async fn drive_connection(
    shared: &Arc<Shared>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Cmd>,
    stream: TcpStream,
) -> Exit {
    let (read_half, mut write_half) = stream.into_split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(read_half, frame_tx));

    // Replay subscriptions that predate this connection
    for topic in shared.topics() {
        if let Err(e) = write_frame(&mut write_half, &Frame::Subscribe { topic }).await {
            reader.abort();
            return Exit::Lost(format!("subscription replay failed: {e}"));
        }
    }

    let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let silence_limit = shared.config.heartbeat_interval * 3;
    let mut last_inbound = tokio::time::Instant::now();

    let exit = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => break Exit::Shutdown,
                Some(Cmd::Disconnect) => break Exit::Requested,
                Some(Cmd::Connect) => {
                    // Idempotent: already connected
                }
                Some(Cmd::Publish { topic, payload }) => {
                    if let Err(e) = write_frame(&mut write_half, &Frame::Publish { topic, payload }).await {
                        break Exit::Lost(format!("publish write failed: {e}"));
                    }
                }
                Some(Cmd::Subscribe { topic }) => {
                    if let Err(e) = write_frame(&mut write_half, &Frame::Subscribe { topic }).await {
                        break Exit::Lost(format!("subscribe write failed: {e}"));
                    }
                }
            },

            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > silence_limit {
                    break Exit::Lost("no traffic from broker within silence limit".into());
                }
                if let Err(e) = write_frame(&mut write_half, &Frame::Heartbeat).await {
                    break Exit::Lost(format!("heartbeat write failed: {e}"));
                }
            }

            frame = frame_rx.recv() => match frame {
                None => break Exit::Lost("broker closed the connection".into()),
                Some(frame) => {
                    last_inbound = tokio::time::Instant::now();
                    match frame {
                        Frame::Message { topic, payload } => shared.dispatch(&topic, payload),
                        Frame::Heartbeat => {}
                        other => debug!(frame = ?other, "Unexpected frame from broker"),
                    }
                }
            },
        }
    };

    reader.abort();
    exit
}

async fn read_loop(read_half: OwnedReadHalf, frame_tx: mpsc::UnboundedSender<Frame>) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Frame>(line) {
                    Ok(frame) => {
                        if frame_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // A malformed frame must not stop delivery of
                        // subsequent genuine ones
                        warn!(error = %e, "Invalid frame from broker, skipping");
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Read error");
                break;
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &Frame) -> std::io::Result<()> {
    let mut msg = serde_json::to_string(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    msg.push('\n');
    writer.write_all(msg.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::spawn_broker;
    use invigil_util::SessionId;

    fn fast_config(addr: std::net::SocketAddr) -> ChannelConfig {
        let mut config = ChannelConfig::new(addr.to_string());
        config.reconnect_delay = Duration::from_millis(50);
        config.heartbeat_interval = Duration::from_millis(100);
        config.subscribe_timeout = Duration::from_secs(2);
        config.publish_retry_delay = Duration::from_millis(50);
        config
    }

    async fn recv(sub: &mut Subscription) -> serde_json::Value {
        tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel dropped")
    }

    #[test]
    fn config_defaults_match_broker_contract() {
        let config = ChannelConfig::new("127.0.0.1:4870");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(4));
        assert_eq!(config.subscribe_timeout, Duration::from_secs(5));
        assert_eq!(config.publish_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn config_converts_from_broker_section() {
        let parsed = invigil_config::parse_config(
            r#"
            config_version = 1

            [broker]
            addr = "broker.example.org:4870"
            reconnect_delay_secs = 3
            publish_retry_secs = 2
        "#,
        )
        .unwrap();

        let config = ChannelConfig::from(&parsed.broker);
        assert_eq!(config.addr, "broker.example.org:4870");
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(4));
        assert_eq!(config.publish_retry_delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn channel_starts_disconnected() {
        let channel = Channel::new(ChannelConfig::new("127.0.0.1:1"));
        assert!(!channel.is_connected());
        assert_eq!(channel.connection_count(), 0);
        assert_eq!(*channel.status().borrow(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_times_out_without_connection() {
        let mut config = ChannelConfig::new("127.0.0.1:1");
        config.subscribe_timeout = Duration::from_millis(50);
        let channel = Channel::new(config);

        let result = channel.subscribe(Topic::Alerts).await;
        assert!(matches!(result, Err(ChannelError::SubscribeTimeout(_))));
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_with_server_stamp() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        let mut sub = channel.subscribe(Topic::StudentActivity).await.unwrap();

        // Broker subscription install races the publish; give it a beat
        tokio::time::sleep(Duration::from_millis(100)).await;

        channel.publish(
            Topic::StudentActivity,
            &serde_json::json!({"type": "COPY_ATTEMPT", "server_timestamp": null}),
        );

        let delivered = recv(&mut sub).await;
        assert_eq!(delivered["type"], "COPY_ATTEMPT");
        assert!(delivered["server_timestamp"].is_string());

        broker.abort();
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Connected)
            .await
            .unwrap();

        channel.connect();
        channel.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(channel.connection_count(), 1);
        broker.abort();
    }

    #[tokio::test]
    async fn session_topic_routes_independently() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        let mut session_sub = channel
            .subscribe(Topic::SessionActivity(SessionId::from(7)))
            .await
            .unwrap();
        let mut alert_sub = channel.subscribe(Topic::Alerts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        channel.publish(
            Topic::SessionActivity(SessionId::from(7)),
            &serde_json::json!({"type": "TAB_SWITCH", "count": 1}),
        );

        let delivered = recv(&mut session_sub).await;
        assert_eq!(delivered["type"], "TAB_SWITCH");

        // Alert subscription must not see activity traffic
        let stray = tokio::time::timeout(Duration::from_millis(200), alert_sub.next()).await;
        assert!(stray.is_err());

        broker.abort();
    }

    #[tokio::test]
    async fn subscription_survives_broker_restart() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        let mut sub = channel.subscribe(Topic::Alerts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Kill the broker, then bring one back on the same port
        broker.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (_, broker) = spawn_broker(&addr.to_string()).await.unwrap();

        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Connected)
            .await
            .unwrap();
        assert_eq!(channel.connection_count(), 2);

        // The replayed subscription delivers without a fresh subscribe()
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.publish(Topic::Alerts, &serde_json::json!({"message": "back"}));

        let delivered = recv(&mut sub).await;
        assert_eq!(delivered["message"], "back");

        broker.abort();
    }

    #[tokio::test]
    async fn disconnect_suppresses_reconnect() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Connected)
            .await
            .unwrap();

        channel.disconnect();
        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Disconnected)
            .await
            .unwrap();

        // Well past the reconnect delay: still down, still one connection
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!channel.is_connected());
        assert_eq!(channel.connection_count(), 1);

        broker.abort();
    }

    #[tokio::test]
    async fn publish_retry_delivers_after_late_connect() {
        let (addr, broker) = spawn_broker("127.0.0.1:0").await.unwrap();

        let channel = Channel::new(fast_config(addr));
        channel.connect();
        let mut sub = channel.subscribe(Topic::Alerts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        channel.disconnect();
        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Disconnected)
            .await
            .unwrap();

        // Publish while down, then reconnect inside the retry window
        channel.publish(Topic::Alerts, &serde_json::json!({"message": "late"}));
        channel.connect();
        channel
            .status()
            .wait_for(|s| *s == ChannelStatus::Connected)
            .await
            .unwrap();

        let delivered = recv(&mut sub).await;
        assert_eq!(delivered["message"], "late");

        broker.abort();
    }
}
