// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use super::*;
use crate::test_support::{bundle_expiring_at, ensure_crypto_provider, fake_jwt};

/// Start a fake token server that replies with `responses` in order (the
/// last one repeats) and records each form body it receives.
async fn mock_token_server(
    responses: Vec<(u16, String)>,
) -> (SocketAddr, Arc<AtomicU32>, Arc<Mutex<Vec<String>>>) {
    let call_count = Arc::new(AtomicU32::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let count = Arc::clone(&call_count);
    let seen = Arc::clone(&bodies);
    let responses = Arc::new(responses);

    let handler = move |body: String| {
        let count = Arc::clone(&count);
        let seen = Arc::clone(&seen);
        let resps = Arc::clone(&responses);
        async move {
            seen.lock().push(body);
            let idx = count.fetch_add(1, Ordering::Relaxed) as usize;
            let (status, body) = resps
                .get(idx)
                .or_else(|| resps.last())
                .cloned()
                .unwrap_or((500, "{}".to_owned()));
            (
                axum::http::StatusCode::from_u16(status)
                    .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
                body,
            )
        }
    };
    let app = Router::new().route("/token", post(handler.clone())).route("/revoke", post(handler));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (addr, call_count, bodies)
}

fn oauth(token_url: impl Into<String>, client_id: &str) -> OAuthProvider {
    ensure_crypto_provider();
    OAuthProvider::new(token_url, client_id)
}

fn new_id_token(exp: u64) -> String {
    fake_jwt(serde_json::json!({ "sub": "user-1", "exp": exp }))
}

#[tokio::test]
async fn forced_fetch_exchanges_refresh_token() -> anyhow::Result<()> {
    let body = serde_json::json!({
        "access_token": "new-access",
        "id_token": new_id_token(4_000_000_000),
        "expires_in": 3600,
        "token_type": "Bearer"
    })
    .to_string();
    let (addr, calls, bodies) = mock_token_server(vec![(200, body)]).await;

    let provider = oauth(format!("http://{addr}/token"), "tour-client");
    provider.seed(bundle_expiring_at(1_000));

    let bundle = provider.fetch_credentials(true).await?;
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(bundle.access_token.as_deref(), Some("new-access"));
    assert_eq!(bundle.id_token, Some(new_id_token(4_000_000_000)));
    // Not rotated: the previous refresh token is kept.
    assert_eq!(bundle.refresh_token.as_deref(), Some("refresh-1"));

    let sent = bodies.lock().first().cloned().unwrap_or_default();
    assert!(sent.contains("grant_type=refresh_token"));
    assert!(sent.contains("client_id=tour-client"));
    assert!(sent.contains("refresh_token=refresh-1"));
    Ok(())
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() -> anyhow::Result<()> {
    let body = serde_json::json!({
        "access_token": "a2",
        "refresh_token": "refresh-2"
    })
    .to_string();
    let (addr, _calls, _bodies) = mock_token_server(vec![(200, body)]).await;

    let provider = oauth(format!("http://{addr}/token"), "c");
    provider.seed(bundle_expiring_at(1_000));
    provider.fetch_credentials(true).await?;

    let cached = provider.fetch_credentials(false).await?;
    assert_eq!(cached.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(cached.access_token.as_deref(), Some("a2"));
    Ok(())
}

#[tokio::test]
async fn unforced_fetch_never_calls_the_endpoint() -> anyhow::Result<()> {
    let (addr, calls, _bodies) = mock_token_server(vec![(500, "{}".to_owned())]).await;
    let provider = oauth(format!("http://{addr}/token"), "c");
    provider.seed(bundle_expiring_at(1_000));

    let bundle = provider.fetch_credentials(false).await?;
    assert_eq!(bundle, bundle_expiring_at(1_000));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
    Ok(())
}

#[tokio::test]
async fn oauth_error_body_is_reported() {
    let body = serde_json::json!({
        "error": "invalid_grant",
        "error_description": "Refresh Token has been revoked"
    })
    .to_string();
    let (addr, _calls, _bodies) = mock_token_server(vec![(400, body)]).await;
    let provider = oauth(format!("http://{addr}/token"), "c");
    provider.seed(bundle_expiring_at(1_000));

    let result = provider.fetch_credentials(true).await;
    crate::assert_err_contains!(result, "invalid_grant: Refresh Token has been revoked");
}

#[tokio::test]
async fn refresh_without_refresh_token_fails_fast() {
    let provider = oauth("http://127.0.0.1:9/token", "c");
    let result = provider.fetch_credentials(true).await;
    crate::assert_err_contains!(result, "no refresh token");
}

#[tokio::test]
async fn seed_publishes_signed_in() -> anyhow::Result<()> {
    let bus = EventBus::auth();
    let mut rx = bus.subscribe();
    let provider = oauth("http://127.0.0.1:9/token", "c").with_bus(bus);

    provider.seed(bundle_expiring_at(1_000));

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await??;
    assert_eq!(event, LifecycleEvent::SignedIn);
    Ok(())
}

#[tokio::test]
async fn identity_comes_from_id_token_claims() -> anyhow::Result<()> {
    let provider = oauth("http://127.0.0.1:9/token", "c");
    crate::assert_err_contains!(provider.current_identity().await, "not signed in");

    provider.seed(bundle_expiring_at(1_000));
    let identity = provider.current_identity().await?;
    assert_eq!(identity.user_id, "user-1");
    assert_eq!(identity.username.as_deref(), Some("guide"));
    assert_eq!(identity.email.as_deref(), Some("guide@example.com"));
    Ok(())
}

#[tokio::test]
async fn sign_out_revokes_and_clears() -> anyhow::Result<()> {
    let (addr, calls, bodies) = mock_token_server(vec![(200, "{}".to_owned())]).await;
    let provider = oauth(format!("http://{addr}/token"), "c")
        .with_revoke_url(format!("http://{addr}/revoke"));
    provider.seed(bundle_expiring_at(1_000));

    provider.sign_out().await?;

    assert_eq!(calls.load(Ordering::Relaxed), 1);
    let sent = bodies.lock().first().cloned().unwrap_or_default();
    assert!(sent.contains("token=refresh-1"));
    assert!(provider.fetch_credentials(false).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn sign_out_survives_revoke_failure() -> anyhow::Result<()> {
    let (addr, _calls, _bodies) = mock_token_server(vec![(503, "down".to_owned())]).await;
    let provider = oauth(format!("http://{addr}/token"), "c")
        .with_revoke_url(format!("http://{addr}/revoke"));
    provider.seed(bundle_expiring_at(1_000));

    provider.sign_out().await?;
    assert!(provider.fetch_credentials(false).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn sign_out_during_refresh_keeps_the_provider_empty() -> anyhow::Result<()> {
    let app = Router::new().route(
        "/token",
        post(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            serde_json::json!({ "access_token": "late", "refresh_token": "refresh-2" }).to_string()
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let provider = Arc::new(oauth(format!("http://{addr}/token"), "c"));
    provider.seed(bundle_expiring_at(1_000));
    let p = Arc::clone(&provider);
    let refresh = tokio::spawn(async move { p.fetch_credentials(true).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    provider.sign_out().await?;

    crate::assert_err_contains!(refresh.await?, "credentials changed during refresh");
    assert!(provider.fetch_credentials(false).await?.is_empty());
    Ok(())
}
