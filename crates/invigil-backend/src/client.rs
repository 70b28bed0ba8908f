//! REST client and command surface

use invigil_api::{Alert, Enrollment, EventLogRecord, ExamSession};
use invigil_util::{AlertId, EnrollmentId, ExamId, SessionId, StudentId};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{AuthFailure, SessionExpiryReason, classify_unauthorized};

/// Errors from the system-of-record client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Authentication failed ({})", reason.as_str())]
    Auth { reason: SessionExpiryReason },

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Command rejected: {0}")]
    Command(String),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Client for the exam system of record.
///
/// Holds the bearer credential and the forced-logout guard: the first
/// authentication failure after a login ends the session (credential
/// cleared, expiry reason published on the watch); repeats are swallowed so
/// a burst of in-flight requests cannot stack redirects.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
    logging_out: AtomicBool,
    expiry_tx: watch::Sender<Option<SessionExpiryReason>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        let (expiry_tx, _) = watch::channel(None);

        Ok(Self {
            http,
            base_url: base_url.into(),
            token: RwLock::new(None),
            logging_out: AtomicBool::new(false),
            expiry_tx,
        })
    }

    pub fn from_config(config: &invigil_config::BackendConfig) -> ApiResult<Self> {
        Self::new(config.base_url.clone(), config.request_timeout)
    }

    /// Install the credential from a fresh login and re-arm the logout guard.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
        self.logging_out.store(false, Ordering::SeqCst);
        self.expiry_tx.send_replace(None);
    }

    pub fn clear_token(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    /// Observe forced logouts; the reason appears here exactly once per
    /// expired login.
    pub fn session_expiry(&self) -> watch::Receiver<Option<SessionExpiryReason>> {
        self.expiry_tx.subscribe()
    }

    fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    /// End the session once; later authentication failures are no-ops.
    /// Returns whether this call performed the logout.
    fn force_logout(&self, reason: SessionExpiryReason) -> bool {
        if self.logging_out.swap(true, Ordering::SeqCst) {
            debug!(reason = reason.as_str(), "Logout already in progress, ignoring");
            return false;
        }
        warn!(reason = reason.as_str(), "Session expired, forcing logout");
        self.clear_token();
        self.expiry_tx.send_replace(Some(reason));
        true
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> ApiResult<reqwest::Response> {
        let token = self.token();
        let had_token = token.is_some();
        let req = match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = req.send().await?;
        let status = resp.status();

        if status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return match classify_unauthorized(&body, had_token) {
                AuthFailure::Authentication { reason } => {
                    self.force_logout(reason);
                    Err(ApiError::Auth { reason })
                }
                AuthFailure::Authorization => Err(ApiError::Forbidden(server_message(&body))),
            };
        }
        if status == StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Forbidden(server_message(&body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Command(server_message(&body)));
        }

        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        Ok(resp.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> ApiResult<T> {
        let resp = self.send(self.http.post(self.url(path)).json(body)).await?;
        Ok(resp.json().await?)
    }

    async fn put_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let resp = self.send(self.http.put(self.url(path))).await?;
        Ok(resp.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    // --- command surface ---

    /// Durable activity log, issued for every event regardless of channel
    /// health.
    pub async fn log_event(&self, record: &EventLogRecord) -> ApiResult<()> {
        self.send(self.http.post(self.url("/api/events/log")).json(record))
            .await?;
        Ok(())
    }

    /// Authoritative alert list, consumed by the reconciliation poll.
    pub async fn alerts(&self) -> ApiResult<Vec<Alert>> {
        self.get_json("/api/alerts").await
    }

    /// Sessions currently in their proctored window.
    pub async fn active_sessions(&self) -> ApiResult<Vec<ExamSession>> {
        self.get_json("/api/sessions/active").await
    }

    pub async fn resolve_alert(&self, id: AlertId) -> ApiResult<Alert> {
        self.put_json(&format!("/api/alerts/{id}/resolve")).await
    }

    pub async fn start_session(&self, exam_id: ExamId) -> ApiResult<ExamSession> {
        self.post_json("/api/sessions", &serde_json::json!({ "exam_id": exam_id }))
            .await
    }

    pub async fn end_session(&self, id: SessionId) -> ApiResult<ExamSession> {
        self.put_json(&format!("/api/sessions/{id}/end")).await
    }

    pub async fn block_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
        reason: &str,
    ) -> ApiResult<Enrollment> {
        self.post_json(
            &format!("/api/exams/{exam_id}/students/{student_id}/block"),
            &serde_json::json!({ "reason": reason }),
        )
        .await
    }

    pub async fn unblock_student(
        &self,
        exam_id: ExamId,
        student_id: StudentId,
    ) -> ApiResult<Enrollment> {
        self.put_json(&format!("/api/exams/{exam_id}/students/{student_id}/unblock"))
            .await
    }

    pub async fn approve_enrollment(&self, id: EnrollmentId) -> ApiResult<Enrollment> {
        self.put_json(&format!("/api/enrollments/{id}/approve")).await
    }

    pub async fn reject_enrollment(&self, id: EnrollmentId) -> ApiResult<Enrollment> {
        self.put_json(&format!("/api/enrollments/{id}/reject")).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Pull the human-readable message out of an error payload, falling back to
/// the raw body.
fn server_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|message| message.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}
