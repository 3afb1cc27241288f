// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a manual clock, a scripted provider, token
//! builders, and assertion helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::provider::{Identity, IdentityProvider, ProviderFuture};
use crate::token::CredentialBundle;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (reqwest is built without one).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Wall clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(now_secs: u64) -> Arc<Self> {
        Arc::new(Self { now: AtomicU64::new(now_secs) })
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Build an unsigned JWT whose payload is `claims`.
pub fn fake_jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

/// A full bundle whose identity token expires at `exp` (epoch seconds).
pub fn bundle_expiring_at(exp: u64) -> CredentialBundle {
    CredentialBundle {
        access_token: Some(format!("access-{exp}")),
        id_token: Some(fake_jwt(serde_json::json!({
            "sub": "user-1",
            "email": "guide@example.com",
            "cognito:username": "guide",
            "exp": exp,
        }))),
        refresh_token: Some("refresh-1".to_owned()),
    }
}

/// In-memory provider with scripted refresh results.
///
/// Each forced fetch pops the next scripted result (the last one repeats)
/// after sleeping for `delay`, so paused-clock tests can hold a refresh
/// in flight.
pub struct ScriptedProvider {
    current: Mutex<CredentialBundle>,
    script: Mutex<VecDeque<Result<CredentialBundle, String>>>,
    last: Mutex<Option<Result<CredentialBundle, String>>>,
    delay: Duration,
    refresh_calls: AtomicU32,
    sign_outs: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(current: CredentialBundle) -> Self {
        Self {
            current: Mutex::new(current),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            delay: Duration::ZERO,
            refresh_calls: AtomicU32::new(0),
            sign_outs: AtomicU32::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_ok(self, bundle: CredentialBundle) -> Self {
        self.script.lock().push_back(Ok(bundle));
        self
    }

    pub fn then_err(self, message: &str) -> Self {
        self.script.lock().push_back(Err(message.to_owned()));
        self
    }

    pub fn set_current(&self, bundle: CredentialBundle) {
        *self.current.lock() = bundle;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_outs(&self) -> u32 {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<CredentialBundle, String> {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last.clone().unwrap_or_else(|| Err("no scripted refresh".to_owned())),
        }
    }
}

impl IdentityProvider for ScriptedProvider {
    fn fetch_credentials(&self, force_refresh: bool) -> ProviderFuture<'_, CredentialBundle> {
        Box::pin(async move {
            if !force_refresh {
                return Ok(self.current.lock().clone());
            }
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let sign_outs = self.sign_outs();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.next_result() {
                Ok(_) if self.sign_outs() != sign_outs => {
                    Err(anyhow::anyhow!("signed out during refresh"))
                }
                Ok(bundle) => {
                    *self.current.lock() = bundle.clone();
                    Ok(bundle)
                }
                Err(message) => Err(anyhow::anyhow!(message)),
            }
        })
    }

    fn current_identity(&self) -> ProviderFuture<'_, Identity> {
        Box::pin(async move { Identity::from_bundle(&self.current.lock().clone()) })
    }

    fn sign_out(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            *self.current.lock() = CredentialBundle::default();
            Ok(())
        })
    }
}

/// Assert that an expression returns `Err` whose message contains `substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
