//! Minimal app protected by the bridge.
//!
//! Configure with `CLIENT_ID` and `ISSUER_URL` (a `.env` file works too), then point a
//! browser with integrated Windows authentication at `http://localhost:3000/`.

use axum::{Extension, Router, routing::get};
use ntlm_oauth_bridge::{Authenticated, BridgeConfig, NtlmOAuthLayer};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::from_env()?;
    tracing::info!(issuer = %config.issuer_url(), client_id = config.client_id(), "starting bridge demo");
    let router = Router::new()
        .route("/", get(hello))
        .layer(NtlmOAuthLayer::from_config(config)?);

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn hello(Extension(auth): Extension<Authenticated>) -> String {
    let tokens = auth.tokens();
    format!(
        "Hello World! token type {}, expires in {}s",
        tokens.token_type.as_deref().unwrap_or("bearer"),
        tokens.expires_in.unwrap_or_default()
    )
}
