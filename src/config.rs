use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings shared by every authentication attempt.
///
/// A `BridgeConfig` only exists in validated form: the client id is non-empty and the
/// issuer is an absolute http(s) URL whose path ends with `/`, so endpoint paths such as
/// `sso/challenge` resolve beneath it. Deserializing goes through the same checks.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawBridgeConfig")]
pub struct BridgeConfig {
    client_id: String,
    issuer_url: Url,
    debug: bool,
    request_timeout: Duration,
    fetch_user_details: bool,
}

/// Settings as they appear in the environment or a serialized document.
#[derive(Deserialize)]
struct RawBridgeConfig {
    #[serde(alias = "clientId")]
    client_id: String,
    #[serde(alias = "issuerUrl")]
    issuer_url: String,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_request_timeout_secs", alias = "requestTimeoutSecs")]
    request_timeout_secs: u64,
    #[serde(default, alias = "fetchUserDetails")]
    fetch_user_details: bool,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl TryFrom<RawBridgeConfig> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(raw: RawBridgeConfig) -> Result<Self, Self::Error> {
        if raw.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id"));
        }
        if raw.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(Duration::ZERO));
        }
        Ok(Self {
            client_id: raw.client_id,
            issuer_url: issuer_base(&raw.issuer_url)?,
            debug: raw.debug,
            request_timeout: Duration::from_secs(raw.request_timeout_secs),
            fetch_user_details: raw.fetch_user_details,
        })
    }
}

/// Parses the issuer and makes its path end with `/`.
fn issuer_base(value: &str) -> Result<Url, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Missing("issuer_url"));
    }
    let invalid = |reason: String| ConfigError::InvalidIssuer {
        url: value.to_owned(),
        reason,
    };
    let mut url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed".to_owned()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

impl BridgeConfig {
    pub fn new(client_id: impl Into<String>, issuer_url: impl Into<String>) -> Result<Self, ConfigError> {
        RawBridgeConfig {
            client_id: client_id.into(),
            issuer_url: issuer_url.into(),
            debug: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            fetch_user_details: false,
        }
        .try_into()
    }

    /// Loads settings from the process environment (`CLIENT_ID`, `ISSUER_URL`, `DEBUG`, ...).
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_environment(Environment::default())
    }

    /// Loads settings from an explicit [`Environment`] source.
    pub fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        let raw: RawBridgeConfig = Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        raw.try_into()
    }

    /// OAuth client identifier registered with the identity provider.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Base URL of the identity provider, always ending with `/`.
    pub fn issuer_url(&self) -> &Url {
        &self.issuer_url
    }

    /// Resolves an endpoint path beneath the issuer.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.issuer_url.join(path)
    }

    /// Whether raw header values, URLs and captured cookies are logged.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether `{issuer}me` is resolved after a successful token exchange.
    pub fn fetch_user_details(&self) -> bool {
        self.fetch_user_details
    }

    /// Per-call timeout applied by [`ReqwestTransport`](crate::ReqwestTransport).
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Replaces the per-call timeout. A zero duration is rejected.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(timeout));
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    #[must_use]
    pub fn with_user_details(mut self, fetch: bool) -> Self {
        self.fetch_user_details = fetch;
        self
    }
}
