// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential refresh.
//!
//! At most one refresh runs at a time. Callers that arrive while one is in
//! flight wait on the same handle and receive the same outcome. The
//! operation itself runs on a spawned task, so it settles (and clears the
//! handle) even if every caller stops waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, LifecycleEvent};
use crate::error::{ErrorCode, SessionError};
use crate::provider::IdentityProvider;
use crate::token::{CredentialStore, Validation};

/// Successful refresh outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Credentials were fresh enough; the provider was not contacted.
    NotNeeded,
    /// A refresh completed. `generation` counts completed refreshes and is
    /// shared by every caller that waited on the same operation.
    Refreshed { generation: u64 },
}

pub type RefreshOutcome = Result<Refresh, SessionError>;

/// The in-flight operation handle. `None` until the operation settles.
type Pending = watch::Receiver<Option<RefreshOutcome>>;

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<CredentialStore>,
    bus: EventBus,
    refresh_buffer_secs: u64,
    in_flight: Mutex<Option<Pending>>,
    generation: AtomicU64,
}

/// De-duplicating front for [`IdentityProvider::fetch_credentials`].
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<CredentialStore>,
        bus: EventBus,
        refresh_buffer_secs: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                bus,
                refresh_buffer_secs,
                in_flight: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Check the latest snapshot against the refresh buffer.
    pub fn validate(&self) -> Validation {
        self.inner.store.snapshot().validate(self.inner.refresh_buffer_secs)
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of refreshes completed successfully so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Refresh only when the credentials are expired or inside the refresh
    /// buffer. Never retries a failure.
    pub async fn refresh_if_needed(&self) -> RefreshOutcome {
        if !self.validate().needs_refresh {
            debug!("refresh not needed");
            return Ok(Refresh::NotNeeded);
        }
        self.join_or_start().await
    }

    /// Refresh regardless of remaining lifetime, still de-duplicated.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.join_or_start().await
    }

    async fn join_or_start(&self) -> RefreshOutcome {
        let mut pending = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                // A settled or orphaned handle is never joined.
                Some(rx) if rx.has_changed().is_ok() && rx.borrow().is_none() => {
                    debug!("joining in-flight refresh");
                    rx.clone()
                }
                _ => {
                    let rx = self.start();
                    *slot = Some(rx.clone());
                    rx
                }
            }
        };

        let outcome = match pending.wait_for(Option::is_some).await {
            Ok(settled) => match &*settled {
                Some(outcome) => outcome.clone(),
                None => Err(ErrorCode::RefreshFailed.to_error("refresh settled without outcome")),
            },
            Err(_) => Err(ErrorCode::RefreshFailed.to_error("refresh task ended without outcome")),
        };
        outcome
    }

    /// Spawn the refresh operation. Called with the handle slot locked.
    fn start(&self) -> Pending {
        let (tx, rx) = watch::channel(None);
        let inner = Arc::clone(&self.inner);
        // A sign-out while the request is out supersedes its result.
        let epoch = inner.store.epoch();
        debug!(epoch, "starting credential refresh");

        tokio::spawn(async move {
            let outcome = match inner.provider.fetch_credentials(true).await {
                Ok(bundle) if inner.store.replace_if_current(epoch, bundle.clone()) => {
                    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(generation, "credentials refreshed");
                    Ok(Refresh::Refreshed { generation })
                }
                Ok(_) => {
                    warn!(epoch, "session signed out during refresh, discarding result");
                    Err(ErrorCode::RefreshFailed.to_error("session signed out during refresh"))
                }
                Err(e) => {
                    warn!(err = %format!("{e:#}"), "credential refresh failed");
                    Err(SessionError::refresh_failed(&e))
                }
            };

            // Clear before settling so a woken caller can start a fresh refresh.
            inner.in_flight.lock().take();
            let _ = tx.send(Some(outcome.clone()));

            match outcome {
                Ok(_) => inner.bus.publish(LifecycleEvent::Refreshed),
                Err(e) => inner.bus.publish(LifecycleEvent::RefreshFailed { error: e.message }),
            };
        });

        rx
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
