//! The axum layer in front of a router, backed by a mock identity provider.

use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, CONNECTION, SET_COOKIE, WWW_AUTHENTICATE},
    },
    routing::get,
};
use base64::{Engine, prelude::BASE64_STANDARD};
use ntlm_oauth_bridge::{Authenticated, Bridge, BridgeConfig, NtlmOAuthLayer, ReqwestTransport};
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn ntlm_header(kind: u32) -> String {
    let mut bytes = b"NTLMSSP\0".to_vec();
    bytes.extend_from_slice(&kind.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 20]);
    format!("NTLM {}", BASE64_STANDARD.encode(bytes))
}

async fn whoami(Extension(auth): Extension<Authenticated>) -> String {
    match auth.user() {
        Some(user) => format!("{} {}", auth.access_token(), user["sub"].as_str().unwrap_or("?")),
        None => auth.access_token().to_owned(),
    }
}

fn app(server: &MockServer, config: impl FnOnce(BridgeConfig) -> BridgeConfig) -> Router {
    let config = config(BridgeConfig::new("portal", server.uri()).unwrap());
    let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    Router::new()
        .route("/", get(whoami))
        .layer(NtlmOAuthLayer::new(Bridge::new(transport, config)))
}

fn request(authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/");
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn mount_oauth_leg(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "challenge": "c1" })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": "auth-code" })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok-abc" })))
        .mount(server)
        .await;
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn missing_authorization_requests_ntlm() {
    let server = MockServer::start().await;
    let response = app(&server, |c| c).oneshot(request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[WWW_AUTHENTICATE], "NTLM");
    assert_eq!(response.headers()[CONNECTION], "keep-alive");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn negotiate_message_gets_upstream_challenge_and_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sso/challenge"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", "NTLM TlRMTVNTUAACAAAA")
                .insert_header("set-cookie", "sso=ntlm1; Path=/"),
        )
        .mount(&server)
        .await;

    let response = app(&server, |c| c)
        .oneshot(request(Some(&ntlm_header(1))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[WWW_AUTHENTICATE], "NTLM TlRMTVNTUAACAAAA");
    assert_eq!(response.headers()[SET_COOKIE], "sso=ntlm1; Path=/");
}

#[tokio::test]
async fn authenticate_message_reaches_handler_with_token() {
    let server = MockServer::start().await;
    mount_oauth_leg(&server).await;

    let response = app(&server, |c| c)
        .oneshot(request(Some(&ntlm_header(3))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "tok-abc");
}

#[tokio::test]
async fn user_details_are_exposed_to_handler() {
    let server = MockServer::start().await;
    mount_oauth_leg(&server).await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sub": "alice" })))
        .mount(&server)
        .await;

    let response = app(&server, |c| c.with_user_details(true))
        .oneshot(request(Some(&ntlm_header(3))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "tok-abc alice");
}

#[tokio::test]
async fn errors_are_not_leaked_to_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let response = app(&server, |c| c)
        .oneshot(request(Some(&ntlm_header(3))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[WWW_AUTHENTICATE], "NTLM");
    assert_eq!(body_text(response).await, "authorization failed");
}

#[tokio::test]
async fn invalid_scheme_is_unauthorized() {
    let server = MockServer::start().await;
    let response = app(&server, |c| c)
        .oneshot(request(Some("Basic dXNlcjpwYXNz")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(server.received_requests().await.unwrap().is_empty());
}
