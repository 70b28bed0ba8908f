//! Dashboard driver
//!
//! One driver task per dashboard view: it owns the `DashboardState`, feeds
//! it from the live subscriptions and the reconciliation poll, and
//! publishes snapshots over a watch channel. Commands (resolve, toggles,
//! shutdown) come in over an mpsc so every mutation happens on the one
//! task.

use invigil_api::{ActivityEvent, Alert};
use invigil_backend::ApiClient;
use invigil_channel::{Channel, ChannelResult, ChannelStatus, Subscription, Topic};
use invigil_core::AlertEngine;
use invigil_util::AlertId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::DashboardState;

/// Tuning for one dashboard view
#[derive(Debug, Clone)]
pub struct DashboardOptions {
    /// Reconciliation poll period
    pub poll_interval: Duration,
    /// Recent-activity buffer capacity
    pub activity_buffer: usize,
    /// Initial state of the alert-notification toggle
    pub sound_enabled: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            activity_buffer: crate::DEFAULT_ACTIVITY_BUFFER,
            sound_enabled: true,
        }
    }
}

impl From<&invigil_config::DashboardConfig> for DashboardOptions {
    fn from(config: &invigil_config::DashboardConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            activity_buffer: config.activity_buffer,
            sound_enabled: config.sound_enabled,
        }
    }
}

#[derive(Debug)]
enum DashboardCommand {
    ResolveAlert(AlertId),
    SetNotificationsEnabled(bool),
    Shutdown,
}

/// Handle to a running dashboard driver
pub struct DashboardClient {
    channel: Arc<Channel>,
    cmd_tx: mpsc::UnboundedSender<DashboardCommand>,
    state_rx: watch::Receiver<DashboardState>,
}

impl DashboardClient {
    /// Connect the channel, install the live subscriptions and start the
    /// driver task.
    pub async fn start(
        channel: Arc<Channel>,
        api: Arc<ApiClient>,
        mut engine: AlertEngine,
        options: DashboardOptions,
    ) -> ChannelResult<Self> {
        engine.set_notifications_enabled(options.sound_enabled);
        channel.connect();
        let activity_sub = channel.subscribe(Topic::StudentActivity).await?;
        let alert_sub = channel.subscribe(Topic::Alerts).await?;

        let state = DashboardState::new(options.activity_buffer);
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(
            state,
            state_tx,
            cmd_rx,
            activity_sub,
            alert_sub,
            api,
            engine,
            channel.clone(),
            options.poll_interval,
        ));

        Ok(Self {
            channel,
            cmd_tx,
            state_rx,
        })
    }

    /// Observe state snapshots as they change
    pub fn state(&self) -> watch::Receiver<DashboardState> {
        self.state_rx.clone()
    }

    pub fn snapshot(&self) -> DashboardState {
        self.state_rx.borrow().clone()
    }

    /// Connectivity indicator source
    pub fn connection_status(&self) -> watch::Receiver<ChannelStatus> {
        self.channel.status()
    }

    /// Resolve an alert optimistically; rolled back if the server refuses.
    pub fn resolve_alert(&self, id: AlertId) {
        let _ = self.cmd_tx.send(DashboardCommand::ResolveAlert(id));
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        let _ = self
            .cmd_tx
            .send(DashboardCommand::SetNotificationsEnabled(enabled));
    }

    /// Tear the view down: stops the driver and disconnects the channel.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(DashboardCommand::Shutdown);
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    mut state: DashboardState,
    state_tx: watch::Sender<DashboardState>,
    mut cmd_rx: mpsc::UnboundedReceiver<DashboardCommand>,
    mut activity_sub: Subscription,
    mut alert_sub: Subscription,
    api: Arc<ApiClient>,
    mut engine: AlertEngine,
    channel: Arc<Channel>,
    poll_interval: Duration,
) {
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(DashboardCommand::Shutdown) => {
                    info!("Dashboard driver stopping");
                    channel.disconnect();
                    return;
                }
                Some(DashboardCommand::ResolveAlert(id)) => {
                    resolve(&api, &mut state, &state_tx, id).await;
                }
                Some(DashboardCommand::SetNotificationsEnabled(enabled)) => {
                    engine.set_notifications_enabled(enabled);
                }
            },

            _ = poll.tick() => {
                reconcile(&api, &mut state).await;
            }

            payload = activity_sub.next() => match payload {
                None => return,
                Some(payload) => handle_activity(&mut state, &engine, payload),
            },

            payload = alert_sub.next() => match payload {
                None => return,
                Some(payload) => handle_alert(&mut state, payload),
            },
        }

        state_tx.send_replace(state.clone());
    }
}

fn handle_activity(state: &mut DashboardState, engine: &AlertEngine, payload: serde_json::Value) {
    let event: ActivityEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Unparseable activity payload, skipping");
            return;
        }
    };

    if !state.record_activity(event.clone()) {
        return;
    }
    if let Some(alert) = engine.derive(&event) {
        state.splice_alert(alert);
    }
}

fn handle_alert(state: &mut DashboardState, payload: serde_json::Value) {
    match serde_json::from_value::<Alert>(payload) {
        Ok(alert) => state.confirm_alert(alert),
        Err(e) => warn!(error = %e, "Unparseable alert payload, skipping"),
    }
}

/// Pull the authoritative alert and session lists. Failures keep the
/// current state; the next tick tries again.
async fn reconcile(api: &ApiClient, state: &mut DashboardState) {
    match api.alerts().await {
        Ok(alerts) => state.reconcile_alerts(alerts),
        Err(e) => warn!(error = %e, "Alert reconciliation failed"),
    }
    match api.active_sessions().await {
        Ok(sessions) => state.reconcile_sessions(sessions),
        Err(e) => warn!(error = %e, "Session reconciliation failed"),
    }
}

async fn resolve(
    api: &ApiClient,
    state: &mut DashboardState,
    state_tx: &watch::Sender<DashboardState>,
    id: AlertId,
) {
    if !state.mark_resolved(id) {
        warn!(alert_id = %id, "Resolve requested for unknown alert");
        return;
    }
    // Show the optimistic result immediately, before the round trip
    state_tx.send_replace(state.clone());

    match api.resolve_alert(id).await {
        Ok(confirmed) => {
            debug!(alert_id = %id, "Alert resolution confirmed");
            state.confirm_alert(confirmed);
        }
        Err(e) => {
            warn!(alert_id = %id, error = %e, "Alert resolution failed, rolling back");
            state.rollback_resolve(id);
        }
    }
}
