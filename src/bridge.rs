//! The NTLM to OAuth decision logic.
//!
//! [`Bridge::authenticate`] inspects one request's headers and yields exactly one
//! [`AuthResult`]. Nothing is kept between calls; the only state linking the two NTLM
//! round-trips is whatever cookie the identity provider sets and the client echoes.

use http::{
    HeaderMap,
    header::{AUTHORIZATION, COOKIE},
};
use serde::Serialize;
use tracing::Instrument;

use crate::{
    config::BridgeConfig,
    error::BridgeError,
    gateway::{Gateway, TokenSet},
    ntlm::{NTLM_PREFIX, NtlmMessage},
    session::Transport,
};

const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Headers of one inbound authentication request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthAttempt {
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

impl AuthAttempt {
    /// Extracts `Authorization` and `Cookie` from `headers`.
    ///
    /// A header that is present but not valid UTF-8 is kept as an empty string so that
    /// it is rejected as an invalid authorization rather than treated as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let authorization = headers
            .get(AUTHORIZATION)
            .map(|v| v.to_str().unwrap_or_default().to_owned());
        let cookie = headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
        Self { authorization, cookie }
    }
}

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AuthResult {
    /// The client must continue the NTLM handshake.
    Challenge {
        /// Value for the `WWW-Authenticate` response header.
        www_authenticate: String,
        /// `Set-Cookie` values to pass on to the client.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        cookies: Vec<String>,
    },
    /// The identity provider issued an access token.
    Success {
        #[serde(flatten)]
        token: TokenSet,
        /// Response of `{issuer}me`, when user details are requested.
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<serde_json::Value>,
    },
    /// The attempt failed. The message is meant for logs, not for the client.
    Error { error: String },
}

impl AuthResult {
    /// Bare `NTLM` challenge that starts a handshake.
    pub fn bootstrap() -> Self {
        Self::Challenge {
            www_authenticate: "NTLM".to_owned(),
            cookies: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.is_empty() {
            return Self::Error {
                error: UNKNOWN_ERROR.to_owned(),
            };
        }
        Self::Error { error: message }
    }

    /// Access token on success.
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Success { token, .. } => Some(&token.access_token),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

impl From<BridgeError> for AuthResult {
    fn from(err: BridgeError) -> Self {
        Self::error(err.to_string())
    }
}

/// Stateless NTLM to OAuth bridge.
///
/// Cheap to share: it holds configuration and a transport, and every call to
/// [`authenticate`](Self::authenticate) builds its own cookie session.
#[derive(Debug, Clone)]
pub struct Bridge<T> {
    transport: T,
    config: BridgeConfig,
}

impl<T: Transport> Bridge<T> {
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Runs one attempt for the given request headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        self.authenticate_attempt(AuthAttempt::from_headers(headers)).await
    }

    /// Runs one attempt. Never fails; every error becomes [`AuthResult::Error`].
    pub async fn authenticate_attempt(&self, attempt: AuthAttempt) -> AuthResult {
        let span = tracing::debug_span!("ntlm_bridge.attempt", ntlm_type = tracing::field::Empty);
        let result = self.run(attempt).instrument(span).await;
        match &result {
            Ok(outcome) if outcome.is_success() => tracing::debug!("attempt succeeded"),
            Ok(_) => tracing::debug!("attempt challenged"),
            Err(err) => tracing::warn!(error = %err, upstream_status = ?err.upstream_status(), "attempt failed"),
        }
        result.unwrap_or_else(AuthResult::from)
    }

    async fn run(&self, attempt: AuthAttempt) -> Result<AuthResult, BridgeError> {
        let Some(authorization) = attempt.authorization.as_deref() else {
            return Ok(AuthResult::bootstrap());
        };
        if !authorization.starts_with(NTLM_PREFIX) {
            return Err(BridgeError::InvalidHeader);
        }
        let message = NtlmMessage::from_authorization(authorization)?;
        let Some(message_type) = message.message_type() else {
            return Err(BridgeError::MalformedMessage);
        };
        tracing::Span::current().record("ntlm_type", message_type.as_u32());

        let cookie = attempt.cookie.as_deref();
        let mut gateway = Gateway::new(&self.transport, &self.config);
        let result = self.drive(&mut gateway, &message, authorization, cookie).await;
        gateway.finish();
        result
    }

    async fn drive(
        &self,
        gateway: &mut Gateway<'_, T>,
        message: &NtlmMessage,
        authorization: &str,
        cookie: Option<&str>,
    ) -> Result<AuthResult, BridgeError> {
        if message.is_negotiate() {
            let outcome = gateway.relay_challenge(authorization, cookie).await?;
            match outcome.www_authenticate {
                Some(www_authenticate) if !www_authenticate.is_empty() => {
                    return Ok(AuthResult::Challenge {
                        www_authenticate,
                        cookies: outcome.cookies,
                    });
                }
                _ => tracing::debug!("no NTLM challenge from identity provider, continuing with OAuth"),
            }
        }

        let challenge = gateway.authorize(cookie).await?;
        let code = gateway.login(&challenge, authorization, cookie).await?;
        let token = gateway.exchange_code(&code).await?;
        let user = if self.config.fetch_user_details() {
            Some(gateway.user_details(&token.access_token).await?)
        } else {
            None
        };
        Ok(AuthResult::Success { token, user })
    }
}
