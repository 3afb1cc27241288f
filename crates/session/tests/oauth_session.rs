// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session over a fake OAuth2 token endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use tourkit_session::bus::{EventBus, LifecycleEvent};
use tourkit_session::clock::{Clock, SystemClock};
use tourkit_session::config::SessionConfig;
use tourkit_session::facade::SessionFacade;
use tourkit_session::provider::oauth::OAuthProvider;
use tourkit_session::test_support::{bundle_expiring_at, ensure_crypto_provider, fake_jwt};

/// Token endpoint that always issues an hour-long identity token.
async fn token_server() -> anyhow::Result<(SocketAddr, Arc<AtomicU32>)> {
    let calls = Arc::new(AtomicU32::new(0));
    let count = Arc::clone(&calls);
    let app = Router::new().route(
        "/token",
        post(move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                let exp = SystemClock.now_secs() + 3600;
                serde_json::json!({
                    "access_token": format!("access-{exp}"),
                    "id_token": fake_jwt(serde_json::json!({ "sub": "user-1", "exp": exp })),
                    "token_type": "Bearer",
                })
                .to_string()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((addr, calls))
}

async fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<LifecycleEvent>,
    want: &LifecycleEvent,
) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if rx.recv().await? == *want {
                return Ok::<_, anyhow::Error>(());
            }
        }
    })
    .await?
}

#[tokio::test]
async fn sign_in_near_expiry_refreshes_over_http() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let (addr, calls) = token_server().await?;

    let bus = EventBus::auth();
    let mut events = bus.subscribe();
    let provider =
        Arc::new(OAuthProvider::new(format!("http://{addr}/token"), "tour-client").with_bus(bus.clone()));
    let config = SessionConfig { monitor_interval_ms: 200, ..SessionConfig::default() };
    let facade = SessionFacade::builder(provider.clone()).config(config).bus(bus).build()?;
    facade.start().await?;
    assert!(!facade.is_monitoring());

    // Inside the 60 s refresh buffer.
    provider.seed(bundle_expiring_at(SystemClock.now_secs() + 30));

    wait_for(&mut events, &LifecycleEvent::Refreshed).await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(facade.is_monitoring());

    let snap = facade.current_snapshot();
    assert!(snap.time_until_expiry_secs.is_some_and(|t| t > 3000));
    assert!(snap.refresh_token_present);

    facade.force_sign_out().await?;
    assert!(facade.current_snapshot().is_missing());
    assert!(!facade.is_monitoring());
    Ok(())
}

#[tokio::test]
async fn endpoint_failure_surfaces_as_refresh_failed() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let bus = EventBus::auth();
    let mut events = bus.subscribe();
    // Nothing listens on the discard port.
    let provider =
        Arc::new(OAuthProvider::new("http://127.0.0.1:9/token", "tour-client").with_bus(bus.clone()));
    provider.seed(bundle_expiring_at(SystemClock.now_secs() + 30));
    let facade = SessionFacade::builder(provider).bus(bus).build()?;

    let outcome = facade.refresh_now().await;
    assert!(outcome.is_err());
    assert!(!facade.extend_session().await);

    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, LifecycleEvent::RefreshFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
    Ok(())
}
