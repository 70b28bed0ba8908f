//! Alert derivation engine

use invigil_api::{ActivityEvent, Alert, AlertStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Side-effect hook fired when a qualifying alert is raised (sound, desktop
/// notification). Injected so the engine stays pure in tests.
pub trait Notify: Send + Sync {
    fn alert_raised(&self, alert: &Alert);
}

/// Derives alerts from the activity stream.
///
/// HIGH and CRITICAL events each produce exactly one alert; everything below
/// that threshold is telemetry only. The engine does no de-duplication: a
/// student copying three times is three alerts. TAB_SWITCH escalation is not
/// the engine's job either; it comes in via the event's severity, which the
/// classification table already escalated at the source.
pub struct AlertEngine {
    notifier: Option<Arc<dyn Notify>>,
    notifications_enabled: bool,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self {
            notifier: None,
            notifications_enabled: true,
        }
    }

    pub fn with_notifier(notifier: Arc<dyn Notify>) -> Self {
        Self {
            notifier: Some(notifier),
            notifications_enabled: true,
        }
    }

    /// Proctor-facing toggle; suppresses the side effect, never the alert.
    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        info!(enabled, "Alert notifications toggled");
        self.notifications_enabled = enabled;
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Derive an alert from one activity event, firing the notification
    /// hook when applicable.
    ///
    /// Returns `None` for events below the alerting threshold and for
    /// unattributable events (no student snapshot): an alert the proctor
    /// cannot act on is noise.
    pub fn derive(&self, event: &ActivityEvent) -> Option<Alert> {
        if !event.severity.is_alerting() {
            return None;
        }

        let Some(student) = event.student.clone() else {
            debug!(
                kind = event.detail.kind(),
                "Alerting event without student attribution, skipping"
            );
            return None;
        };

        let alert = Alert {
            id: None,
            student,
            exam_session: None,
            severity: event.severity,
            message: format!("{}: {}", event.detail.kind(), event.description),
            status: AlertStatus::Active,
            timestamp: event.display_time(),
            resolved_at: None,
        };

        if self.notifications_enabled {
            if let Some(notifier) = &self.notifier {
                notifier.alert_raised(&alert);
            }
        }

        debug!(
            severity = ?alert.severity,
            student_id = %alert.student.id,
            "Alert derived"
        );
        Some(alert)
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}
