//! Error types for the bridge.
//!
//! The [`Display`](std::fmt::Display) text of every [`BridgeError`] variant is the exact
//! message surfaced in [`AuthResult::Error`](crate::AuthResult::Error).

use http::StatusCode;

/// Failures of a single authentication attempt.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The `Authorization` header does not carry the `NTLM ` scheme.
    #[error("Invalid authorization header")]
    InvalidHeader,

    /// The NTLM blob is not valid base64, too short, or lacks the NTLMSSP signature.
    #[error("Invalid NTLM message")]
    MalformedMessage,

    /// The SSO challenge endpoint answered with something other than 401.
    #[error("Error: {status_text}")]
    ChallengeRelay {
        /// Status returned by the SSO endpoint.
        status: StatusCode,
        /// Canonical reason phrase for `status`.
        status_text: String,
        /// `Set-Cookie` values observed on the failed response.
        cookies: Vec<String>,
    },

    /// The authorize endpoint did not return a usable `challenge`.
    #[error("Invalid OAuth challenge response")]
    InvalidChallenge,

    /// The login endpoint returned a non-success status.
    #[error("Login failed with status {}", .0.as_u16())]
    LoginStatus(StatusCode),

    /// The login endpoint did not return a usable `code`.
    #[error("Invalid login response")]
    InvalidLogin,

    /// The token endpoint returned a non-success status.
    #[error("Token exchange failed with status {}", .0.as_u16())]
    TokenStatus(StatusCode),

    /// The token endpoint did not return a usable `access_token`.
    #[error("Invalid token response")]
    InvalidToken,

    /// The user details endpoint returned a non-success status.
    #[error("Failed to get user details: {} {}", .0.as_u16(), .0.canonical_reason().unwrap_or_default())]
    UserDetails(StatusCode),

    /// An upstream body could not be decoded as JSON.
    #[error("{0}")]
    Decode(#[from] serde_json::Error),

    /// A request URL could not be built from the issuer.
    #[error("{0}")]
    Url(#[from] url::ParseError),

    /// The transport failed before a response was received.
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// Returns the upstream HTTP status embedded in this error, if any.
    #[must_use]
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::ChallengeRelay { status, .. } => Some(*status),
            Self::LoginStatus(status) | Self::TokenStatus(status) | Self::UserDetails(status) => Some(*status),
            _ => None,
        }
    }
}

/// Error raised by a [`Transport`](crate::Transport) implementation.
///
/// Only the message is kept; it is what the caller eventually sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Errors raised while loading or validating [`BridgeConfig`](crate::BridgeConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A required value is empty.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// The issuer is not an absolute http(s) URL.
    #[error("invalid issuer url {url:?}: {reason}")]
    InvalidIssuer {
        /// Value as configured.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The per-call timeout is zero.
    #[error("invalid request timeout {0:?}")]
    InvalidTimeout(std::time::Duration),

    /// The reqwest client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_embed_numeric_status() {
        assert_eq!(
            BridgeError::LoginStatus(StatusCode::UNAUTHORIZED).to_string(),
            "Login failed with status 401"
        );
        assert_eq!(
            BridgeError::TokenStatus(StatusCode::BAD_REQUEST).to_string(),
            "Token exchange failed with status 400"
        );
        assert_eq!(
            BridgeError::UserDetails(StatusCode::FORBIDDEN).to_string(),
            "Failed to get user details: 403 Forbidden"
        );
    }

    #[test]
    fn challenge_relay_uses_status_text() {
        let err = BridgeError::ChallengeRelay {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            status_text: "Internal Server Error".into(),
            cookies: Vec::new(),
        };
        assert_eq!(err.to_string(), "Error: Internal Server Error");
        assert_eq!(err.upstream_status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn transport_message_is_passed_through() {
        let err = BridgeError::from(TransportError::new("Network error"));
        assert_eq!(err.to_string(), "Network error");
    }
}
