//! 401 classification
//!
//! The backend returns 401 both for credential problems (expired or
//! malformed JWT, missing token) and for endpoints the caller's role may
//! not touch. Only the former should end the session; the distinction is
//! made by inspecting the error payload for credential markers.

/// Why the session is being ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExpiryReason {
    /// Credential aged out normally
    TokenExpired,
    /// Signature no longer verifies: the backend restarted with a new
    /// signing key, every outstanding token is dead
    BackendRestart,
}

impl SessionExpiryReason {
    /// Query-string value carried to the login page
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionExpiryReason::TokenExpired => "token_expired",
            SessionExpiryReason::BackendRestart => "backend_restart",
        }
    }
}

/// Outcome of classifying a 401 response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Credential problem; the session must end
    Authentication { reason: SessionExpiryReason },
    /// Identity fine, rights insufficient; the caller handles it
    Authorization,
}

/// Substrings that mark a 401 as a credential problem
const AUTH_MARKERS: [&str; 5] = ["jwt", "token", "expired", "signature", "malformed"];

/// Markers that specifically indicate a signing-key mismatch
const RESTART_MARKERS: [&str; 2] = ["signature", "invalid jwt"];

/// Classify a 401 response body.
///
/// A request sent without any credential is an authentication failure
/// outright. Otherwise the body decides: credential markers mean the token
/// is bad; anything else is an authorization denial.
pub fn classify_unauthorized(body: &str, had_token: bool) -> AuthFailure {
    if !had_token {
        return AuthFailure::Authentication {
            reason: SessionExpiryReason::TokenExpired,
        };
    }

    let body = body.to_lowercase();
    if AUTH_MARKERS.iter().any(|marker| body.contains(marker)) {
        let reason = if RESTART_MARKERS.iter().any(|marker| body.contains(marker)) {
            SessionExpiryReason::BackendRestart
        } else {
            SessionExpiryReason::TokenExpired
        };
        AuthFailure::Authentication { reason }
    } else {
        AuthFailure::Authorization
    }
}
