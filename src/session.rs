//! Outbound HTTP for one authentication attempt.
//!
//! A [`Transport`] performs single requests and knows nothing about cookies. A [`Session`]
//! wraps a transport with a cookie jar that lives exactly as long as one attempt: cookies
//! set by one upstream response are replayed on every later call of the same attempt,
//! and the jar is cleared when the session is dropped, whether the attempt finished,
//! failed or its future was cancelled.

use std::{future::Future, time::Duration};

use bytes::Bytes;
use cookie_store::CookieStore;
use http::{
    HeaderMap, HeaderValue, Method, StatusCode,
    header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
};
use url::Url;

use crate::error::{BridgeError, ConfigError, TransportError};

/// A request to the identity provider.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Sets a header, silently skipping values that are not valid header material.
    #[must_use]
    pub fn header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "dropping invalid header value"),
        }
        self
    }

    #[must_use]
    pub fn body(mut self, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = Some(body.into());
        self
    }
}

/// A fully buffered response from the identity provider.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// First value of `name` as a string, if present and visible ASCII.
    pub fn header_str(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All `Set-Cookie` values of the response.
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_owned)
            .collect()
    }
}

/// Capability to perform one HTTP exchange.
///
/// Implementations must not keep cookies between calls; that is the job of [`Session`].
pub trait Transport: Send + Sync {
    fn send(&self, request: UpstreamRequest) -> impl Future<Output = Result<UpstreamResponse, TransportError>> + Send;
}

impl<T: Transport> Transport for &T {
    fn send(&self, request: UpstreamRequest) -> impl Future<Output = Result<UpstreamResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
///
/// The client is built without a cookie store and with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(UpstreamResponse { status, headers, body })
    }
}

#[cfg(test)]
thread_local! {
    /// Cookies removed by [`Session::purge`] on this thread.
    pub(crate) static PURGED_COOKIES: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Cookie-carrying view of a [`Transport`] for a single attempt.
pub struct Session<'t, T> {
    transport: &'t T,
    jar: CookieStore,
    debug: bool,
}

impl<'t, T: Transport> Session<'t, T> {
    pub fn new(transport: &'t T) -> Self {
        Self {
            transport,
            jar: CookieStore::default(),
            debug: false,
        }
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sends `request`, adding stored cookies and storing any the response sets.
    ///
    /// A `Cookie` header already present on the request (the client's inbound cookie)
    /// is kept and the jar's cookies are appended to it.
    pub async fn send(&mut self, mut request: UpstreamRequest) -> Result<UpstreamResponse, BridgeError> {
        self.attach_cookies(&mut request);
        let url = request.url.clone();
        tracing::debug!(method = %request.method, path = url.path(), "upstream request");
        let response = self.transport.send(request).await?;
        tracing::debug!(status = response.status.as_u16(), path = url.path(), "upstream response");
        for set_cookie in response.set_cookies() {
            if let Err(e) = self.jar.parse(&set_cookie, &url) {
                tracing::debug!(error = %e, "ignoring unparsable Set-Cookie");
            } else if self.debug {
                tracing::debug!(cookie = %set_cookie, "stored session cookie");
            }
        }
        Ok(response)
    }

    fn attach_cookies(&self, request: &mut UpstreamRequest) {
        let stored = self
            .jar
            .get_request_values(&request.url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>();
        if stored.is_empty() {
            return;
        }
        let stored = stored.join("; ");
        let combined = match request.headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            Some(inbound) if !inbound.trim().is_empty() => format!("{inbound}; {stored}"),
            _ => stored,
        };
        if let Ok(value) = HeaderValue::from_str(&combined) {
            request.headers.insert(COOKIE, value);
        }
    }
}

impl<T> Session<'_, T> {
    /// Number of unexpired cookies currently held.
    pub fn cookie_count(&self) -> usize {
        self.jar.iter_unexpired().count()
    }

    /// Removes every cookie from the jar.
    pub fn purge(&mut self) {
        let held = self.cookie_count();
        self.jar.clear();
        #[cfg(test)]
        PURGED_COOKIES.with(|purged| purged.set(purged.get() + held));
        if held > 0 {
            tracing::trace!(cookies = held, "purged session cookie jar");
        }
    }
}

impl<T> Drop for Session<'_, T> {
    fn drop(&mut self) {
        self.purge();
    }
}
