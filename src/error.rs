// Error handling module
// Defines the error taxonomy surfaced by the authenticated client

use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by `ApiClient` operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// No response reached the client (connect failure, timeout, reset)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend reported an expired access token and it could not be renewed
    /// within this request (the retry expired again, or no refresh token is stored)
    #[error("Credential expired: {status} - {message}")]
    CredentialExpired {
        status: u16,
        data: serde_json::Value,
        message: String,
    },

    /// Any other non-success response, including 401/403 authorization denials
    #[error("API error: {status} - {message}")]
    Api {
        status: u16,
        data: serde_json::Value,
        message: String,
    },

    /// The refresh call failed; the original expired-credential error is superseded
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshFailure),

    /// A success response whose body did not decode as requested
    #[error("Decode error: {0}")]
    Decode(String),

    /// The request descriptor could not be turned into a transport request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The durable credential store failed
    #[error("Credential storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Outcome of a failed refresh call
///
/// Cloneable so that every request waiting on a shared refresh receives the
/// same failure.
#[derive(Error, Debug, Clone)]
pub enum RefreshFailure {
    /// The refresh endpoint rejected the refresh token; the session is over
    #[error("refresh token rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh endpoint answered with an unexpected status
    #[error("refresh endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The refresh call never got a response
    #[error("refresh request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    /// The refresh response body was not a credential pair
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// The new credential pair could not be persisted
    #[error("failed to persist refreshed credentials: {0}")]
    Storage(String),
}

impl ClientError {
    /// Build an error from a non-success response body
    ///
    /// `data` is the decoded JSON body when it parses, otherwise the raw text.
    /// `message` prefers the JSON `message` field, then the raw text, then the
    /// canonical reason phrase.
    pub fn from_response(status: StatusCode, body: &str, expired: bool) -> Self {
        let data = serde_json::from_str::<serde_json::Value>(body).unwrap_or_else(|_| {
            if body.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::Value::String(body.to_string())
            }
        });
        let message = extract_message(&data, body, status);
        let status = status.as_u16();

        if expired {
            ClientError::CredentialExpired {
                status,
                data,
                message,
            }
        } else {
            ClientError::Api {
                status,
                data,
                message,
            }
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            ClientError::CredentialExpired { status, .. } | ClientError::Api { status, .. } => {
                Some(*status)
            }
            ClientError::Refresh(RefreshFailure::Rejected { status, .. })
            | ClientError::Refresh(RefreshFailure::Status { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// True when the session ended and the user has to log in again
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::Refresh(RefreshFailure::Rejected { .. }))
    }
}

/// Pull a human-readable message out of an error body
pub(crate) fn extract_message(data: &serde_json::Value, raw: &str, status: StatusCode) -> String {
    if let Some(message) = data.get("message").and_then(|v| v.as_str()) {
        return message.to_string();
    }
    if let Some(message) = data.get("error").and_then(|v| v.as_str()) {
        return message.to_string();
    }
    if !raw.is_empty() {
        return raw.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("Unknown status")
        .to_string()
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
