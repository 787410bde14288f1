//! Calls to the identity provider's SSO and OAuth endpoints.
//!
//! Every operation goes through the attempt's [`Session`], so cookies set by the SSO
//! challenge or the authorize endpoint reach the login call. Each response body is
//! decoded into a loose shape once and converted into a typed value only if the
//! required field is present and non-empty.

use http::{
    StatusCode,
    header::{AUTHORIZATION, COOKIE, WWW_AUTHENTICATE},
};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{
    config::BridgeConfig,
    error::BridgeError,
    session::{Session, Transport, UpstreamRequest},
};

const CHALLENGE_PATH: &str = "sso/challenge";
const AUTHORIZE_PATH: &str = "auth";
const LOGIN_PATH: &str = "login";
const TOKEN_PATH: &str = "token";
const USER_DETAILS_PATH: &str = "me";

/// Successful relay of an NTLM message to the SSO challenge endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOutcome {
    pub status: StatusCode,
    /// NTLM `WWW-Authenticate` value to hand back to the client, if the IdP issued one.
    pub www_authenticate: Option<String>,
    /// `Set-Cookie` values the IdP sent along with the challenge.
    pub cookies: Vec<String>,
}

/// Opaque challenge returned by the authorize endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthChallenge(pub String);

/// Authorization code returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode(pub String);

/// Token bundle returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Deserialize)]
struct ChallengeBody {
    challenge: Option<String>,
}

#[derive(Deserialize)]
struct LoginBody {
    code: Option<String>,
}

#[derive(Deserialize)]
struct TokenBody {
    access_token: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
    token_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    challenge: &'a str,
    sso_token: &'a str,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Name, value and `Max-Age` of a `Set-Cookie` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDetails {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
}

impl CookieDetails {
    pub fn parse(set_cookie: &str) -> Option<Self> {
        let cookie = cookie::Cookie::parse(set_cookie.trim()).ok()?;
        if cookie.value().is_empty() {
            return None;
        }
        Some(Self {
            name: cookie.name().to_owned(),
            value: cookie.value().to_owned(),
            max_age: cookie.max_age().map(|age| age.whole_seconds()),
        })
    }
}

/// Client for the identity provider, bound to one attempt.
pub struct Gateway<'a, T> {
    session: Session<'a, T>,
    config: &'a BridgeConfig,
}

impl<'a, T: Transport> Gateway<'a, T> {
    pub fn new(transport: &'a T, config: &'a BridgeConfig) -> Self {
        Self {
            session: Session::new(transport).with_debug(config.debug()),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BridgeError> {
        Ok(self.config.endpoint(path)?)
    }

    /// Relays the client's NTLM header to `{issuer}sso/challenge`.
    ///
    /// The IdP must answer 401; any other status is a failure. A 401 whose
    /// `WWW-Authenticate` is not an NTLM challenge yields no header, which tells the
    /// caller there is nothing left to negotiate.
    pub async fn relay_challenge(
        &mut self,
        authorization: &str,
        cookie: Option<&str>,
    ) -> Result<ChallengeOutcome, BridgeError> {
        let url = self.endpoint(CHALLENGE_PATH)?;
        if self.config.debug() {
            tracing::debug!(%url, authorization, "relaying NTLM message");
        }
        let request = with_cookie(UpstreamRequest::get(url).header(AUTHORIZATION, authorization), cookie);
        let response = self.session.send(request).await?;

        let cookies = response.set_cookies();
        if self.config.debug() {
            for details in cookies.iter().filter_map(|c| CookieDetails::parse(c)) {
                tracing::debug!(name = %details.name, max_age = ?details.max_age, "NTLM session cookie");
            }
        }
        if response.status != StatusCode::UNAUTHORIZED {
            return Err(BridgeError::ChallengeRelay {
                status: response.status,
                status_text: response.status.canonical_reason().unwrap_or_default().to_owned(),
                cookies,
            });
        }
        let www_authenticate = match response.header_str(WWW_AUTHENTICATE) {
            Some(value) if value.starts_with("NTLM") => Some(value.to_owned()),
            Some(other) => {
                tracing::debug!(www_authenticate = other, "challenge is not NTLM");
                None
            }
            None => None,
        };
        Ok(ChallengeOutcome {
            status: response.status,
            www_authenticate,
            cookies,
        })
    }

    /// Starts an authorization-code request and returns the IdP's login challenge.
    ///
    /// A fresh `state` value is sent with every call. It is not checked on the way back.
    pub async fn authorize(&mut self, cookie: Option<&str>) -> Result<OAuthChallenge, BridgeError> {
        let mut url = self.endpoint(AUTHORIZE_PATH)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", self.config.client_id())
            .append_pair("state", &Uuid::new_v4().to_string());
        if self.config.debug() {
            tracing::debug!(%url, "requesting OAuth challenge");
        }
        let response = self.session.send(with_cookie(UpstreamRequest::get(url), cookie)).await?;
        let body: ChallengeBody = serde_json::from_slice(&response.body)?;
        non_empty(body.challenge)
            .map(OAuthChallenge)
            .ok_or(BridgeError::InvalidChallenge)
    }

    /// Submits the challenge together with the NTLM header as SSO token.
    pub async fn login(
        &mut self,
        challenge: &OAuthChallenge,
        sso_token: &str,
        cookie: Option<&str>,
    ) -> Result<AuthorizationCode, BridgeError> {
        let url = self.endpoint(LOGIN_PATH)?;
        if self.config.debug() {
            tracing::debug!(%url, challenge = %challenge.0, sso_token, "submitting login");
        }
        let body = serde_json::to_vec(&LoginRequest {
            challenge: &challenge.0,
            sso_token,
        })?;
        let request = with_cookie(UpstreamRequest::post(url).body("application/json", body), cookie);
        let response = self.session.send(request).await?;
        if !response.status.is_success() {
            return Err(BridgeError::LoginStatus(response.status));
        }
        let body: LoginBody = serde_json::from_slice(&response.body)?;
        non_empty(body.code)
            .map(AuthorizationCode)
            .ok_or(BridgeError::InvalidLogin)
    }

    /// Exchanges an authorization code for tokens.
    pub async fn exchange_code(&mut self, code: &AuthorizationCode) -> Result<TokenSet, BridgeError> {
        let url = self.endpoint(TOKEN_PATH)?;
        if self.config.debug() {
            tracing::debug!(%url, client_id = %self.config.client_id(), code = %code.0, "exchanging code");
        }
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("client_id", self.config.client_id())
            .append_pair("code", &code.0)
            .finish();
        let request = UpstreamRequest::post(url).body("application/x-www-form-urlencoded", form);
        let response = self.session.send(request).await?;
        if !response.status.is_success() {
            return Err(BridgeError::TokenStatus(response.status));
        }
        let body: TokenBody = serde_json::from_slice(&response.body)?;
        let access_token = non_empty(body.access_token).ok_or(BridgeError::InvalidToken)?;
        Ok(TokenSet {
            access_token,
            expires_in: body.expires_in,
            scope: body.scope,
            token_type: body.token_type,
        })
    }

    /// Fetches `{issuer}me` with the access token as bearer credential.
    pub async fn user_details(&mut self, access_token: &str) -> Result<serde_json::Value, BridgeError> {
        let url = self.endpoint(USER_DETAILS_PATH)?;
        if self.config.debug() {
            tracing::debug!(%url, "fetching user details");
        }
        let request = UpstreamRequest::get(url).header(AUTHORIZATION, &format!("Bearer {access_token}"));
        let response = self.session.send(request).await?;
        if !response.status.is_success() {
            return Err(BridgeError::UserDetails(response.status));
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Clears the attempt's cookies ahead of drop.
    pub fn finish(mut self) {
        self.session.purge();
    }
}

fn with_cookie(request: UpstreamRequest, cookie: Option<&str>) -> UpstreamRequest {
    match cookie.filter(|c| !c.is_empty()) {
        Some(cookie) => request.header(COOKIE, cookie),
        None => request,
    }
}
