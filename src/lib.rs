//! ntlm-oauth-bridge turns a Windows-integrated NTLM handshake into an OAuth 2.0 access token.
//!
//! The NTLM messages a client sends are relayed to an identity provider's SSO endpoint, which
//! performs the actual NTLM validation. Once the handshake is complete the bridge drives an
//! authorization-code exchange against the same provider and hands the resulting bearer token
//! to the application.
//!
//! # Features
//!
//! - [`Bridge`]: the per-request decision logic, usable without any web framework
//! - [`NtlmOAuthLayer`]: a [`tower::Layer`] that protects an axum router with the bridge
//! - An [`Authenticated`] request extension carrying the issued token
//!
//! # Usage
//!
//! ```rust,no_run
//! use axum::{routing::get, Extension, Router};
//! use ntlm_oauth_bridge::{Authenticated, BridgeConfig, NtlmOAuthLayer};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BridgeConfig::from_env().unwrap();
//!     let router = Router::new()
//!         .route("/", get(hello))
//!         .layer(NtlmOAuthLayer::from_config(config).unwrap());
//!     let listener = TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//!
//! async fn hello(Extension(a): Extension<Authenticated>) -> String {
//!     format!("token expires in {:?}s", a.tokens().expires_in)
//! }
//! ```
//!
//! The bridge keeps no state between requests. The two NTLM round-trips are tied together
//! only by the cookie the identity provider sets on the challenge, which the layer passes on
//! to the client.
use axum::{
    extract::Request,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONNECTION, SET_COOKIE, WWW_AUTHENTICATE},
    },
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};

mod bridge;
mod config;
mod error;
mod gateway;
pub mod ntlm;
mod session;

pub use bridge::{AuthAttempt, AuthResult, Bridge};
pub use crate::config::BridgeConfig;
pub use error::{BridgeError, ConfigError, TransportError};
pub use gateway::{AuthorizationCode, ChallengeOutcome, CookieDetails, Gateway, OAuthChallenge, TokenSet};
pub use session::{ReqwestTransport, Session, Transport, UpstreamRequest, UpstreamResponse};

/// [`Extension`](axum::Extension) type that gets set after successful authentication
#[derive(Debug, Clone)]
pub struct Authenticated {
    tokens: TokenSet,
    user: Option<serde_json::Value>,
}
impl Authenticated {
    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }
    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }
    /// Response of the identity provider's user details endpoint, if it was requested.
    pub fn user(&self) -> Option<&serde_json::Value> {
        self.user.as_ref()
    }
}

/// [`Layer`] which will enforce authentication through the bridge
pub struct NtlmOAuthLayer<T = ReqwestTransport> {
    bridge: Arc<Bridge<T>>,
}
impl<T> Clone for NtlmOAuthLayer<T> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}
impl NtlmOAuthLayer<ReqwestTransport> {
    /// Builds the layer with a reqwest transport using the configured timeout.
    pub fn from_config(config: BridgeConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(Bridge::new(transport, config)))
    }
}
impl<T> NtlmOAuthLayer<T> {
    pub fn new(bridge: Bridge<T>) -> Self {
        Self {
            bridge: Arc::new(bridge),
        }
    }
}
impl<S, T> Layer<S> for NtlmOAuthLayer<T> {
    type Service = NtlmOAuthMiddleware<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        NtlmOAuthMiddleware {
            inner,
            bridge: Arc::clone(&self.bridge),
        }
    }
}

/// Middleware to enforce authentication
///
/// A layer may be made from this via [`NtlmOAuthLayer::new`]
pub struct NtlmOAuthMiddleware<S, T = ReqwestTransport> {
    inner: S,
    bridge: Arc<Bridge<T>>,
}
impl<S: Clone, T> Clone for NtlmOAuthMiddleware<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            bridge: Arc::clone(&self.bridge),
        }
    }
}
impl<S, T> NtlmOAuthMiddleware<S, T> {
    pub fn new(service: S, bridge: Bridge<T>) -> NtlmOAuthMiddleware<S, T> {
        NtlmOAuthMiddleware {
            inner: service,
            bridge: Arc::new(bridge),
        }
    }
}
impl<S, T> Service<Request> for NtlmOAuthMiddleware<S, T>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    T: Transport + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }
    fn call(&mut self, req: Request) -> Self::Future {
        // The ready inner service is taken, its clone stays behind for the next call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let bridge = Arc::clone(&self.bridge);
        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            match bridge.authenticate(&parts.headers).await {
                AuthResult::Success { token, user } => {
                    parts.extensions.insert(Authenticated { tokens: token, user });
                    inner.call(Request::from_parts(parts, body)).await
                }
                AuthResult::Challenge {
                    www_authenticate,
                    cookies,
                } => Ok(challenge(&www_authenticate, &cookies)),
                AuthResult::Error { .. } => Ok(unauthorized("authorization failed")),
            }
        })
    }
}

fn challenge(www_authenticate: &str, cookies: &[String]) -> Response {
    let Ok(value) = HeaderValue::from_str(www_authenticate) else {
        tracing::warn!("identity provider returned an unusable WWW-Authenticate value");
        return internal_error();
    };
    let mut map = HeaderMap::new();
    map.insert(WWW_AUTHENTICATE, value);
    map.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    for cookie in cookies {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                map.append(SET_COOKIE, value);
            }
            Err(_) => tracing::warn!("dropping unusable Set-Cookie from identity provider"),
        }
    }
    (StatusCode::UNAUTHORIZED, map).into_response()
}

fn www_authenticate_map() -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(WWW_AUTHENTICATE, HeaderValue::from_static("NTLM"));
    map.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    map
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, www_authenticate_map(), message.to_owned()).into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
