// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single entry point over credentials, refresh, monitoring and idle
//! tracking.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, LifecycleEvent, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::idle::{
    ActivitySignal, IdleSessionState, IdleSessionTimer, IdleSettings, IdleTransition,
};
use crate::monitor::BackgroundMonitor;
use crate::provider::{Identity, IdentityProvider};
use crate::refresh::{Refresh, RefreshCoordinator, RefreshOutcome};
use crate::token::{CredentialStore, TokenSnapshot, Validation};

/// Builder for [`SessionFacade`].
pub struct SessionFacadeBuilder {
    provider: Arc<dyn IdentityProvider>,
    config: SessionConfig,
    bus: Option<EventBus>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionFacadeBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing bus, typically the one the provider publishes on.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> anyhow::Result<SessionFacade> {
        self.config.validate()?;
        let bus = self.bus.unwrap_or_else(EventBus::auth);
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let store =
            Arc::new(CredentialStore::new(clock, config.expiry_warning_threshold_secs));
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&self.provider),
            Arc::clone(&store),
            bus.clone(),
            config.refresh_buffer_secs,
        );
        let monitor = BackgroundMonitor::new(
            Arc::clone(&store),
            coordinator.clone(),
            bus.clone(),
            config.monitor_interval(),
        );
        let idle = IdleSessionTimer::new(IdleSettings::from(&config), Some(bus.clone()));
        let provider = self.provider;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            if config.idle_sign_out {
                let weak = weak.clone();
                idle.on_transition(move |transition, _| {
                    if transition == IdleTransition::Timeout {
                        sign_out_on_idle(&weak);
                    }
                });
            }
            Shared {
                config,
                provider,
                bus,
                store,
                coordinator,
                monitor,
                idle,
                wiring: Mutex::new(None),
            }
        });

        Ok(SessionFacade { shared })
    }
}

/// Idle-timeout sign-out, driven by the timer itself rather than the bus.
fn sign_out_on_idle(shared: &Weak<Shared>) {
    let Some(shared) = shared.upgrade() else { return };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("idle timeout outside a runtime, sign-out skipped");
        return;
    };
    info!("idle timeout reached, signing out");
    runtime.spawn(async move {
        if let Err(e) = shared.sign_out().await {
            warn!(err = %format!("{e:#}"), "provider sign-out failed");
        }
    });
}

struct Shared {
    config: SessionConfig,
    provider: Arc<dyn IdentityProvider>,
    bus: EventBus,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    monitor: BackgroundMonitor,
    idle: IdleSessionTimer,
    wiring: Mutex<Option<CancellationToken>>,
}

impl Shared {
    /// Pull the provider's current bundle into the store. A provider with no
    /// credentials counts as signed out.
    async fn reload(&self) -> anyhow::Result<()> {
        let epoch = self.store.epoch();
        let bundle = self.provider.fetch_credentials(false).await?;
        if bundle.is_empty() {
            self.store.clear();
        } else if !self.store.replace_if_current(epoch, bundle) {
            debug!("signed out during reload, keeping the cleared store");
        }
        Ok(())
    }

    /// Recover from missed events by asking the provider directly.
    async fn resync(&self) {
        if let Err(e) = self.reload().await {
            warn!(err = %format!("{e:#}"), "credential resync failed");
            return;
        }
        if self.store.snapshot().is_missing() {
            self.stop_timers();
        } else if !self.monitor.is_running() {
            self.start_timers();
        }
    }

    fn start_timers(&self) {
        self.monitor.start();
        self.idle.start();
    }

    fn stop_timers(&self) {
        self.monitor.stop();
        self.idle.stop();
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        let result = self.provider.sign_out().await;
        self.store.clear();
        self.stop_timers();
        self.bus.publish(LifecycleEvent::SignedOut);
        info!("session signed out");
        result
    }

    async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::SignedIn => {
                if let Err(e) = self.reload().await {
                    warn!(err = %format!("{e:#}"), "credential reload after sign-in failed");
                    return;
                }
                if !self.store.snapshot().is_missing() {
                    self.start_timers();
                }
            }
            LifecycleEvent::Refreshed => {
                if let Err(e) = self.reload().await {
                    warn!(err = %format!("{e:#}"), "credential reload after refresh failed");
                }
            }
            LifecycleEvent::SignedOut => {
                self.store.clear();
                self.stop_timers();
            }
            _ => {}
        }
    }
}

/// Consolidated session surface owned by the host.
///
/// Dropping the facade shuts it down.
pub struct SessionFacade {
    shared: Arc<Shared>,
}

impl SessionFacade {
    pub fn builder(provider: Arc<dyn IdentityProvider>) -> SessionFacadeBuilder {
        SessionFacadeBuilder { provider, config: SessionConfig::default(), bus: None, clock: None }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Begin reacting to lifecycle events and load the provider's current
    /// credentials. Monitoring starts immediately when a session exists,
    /// otherwise on the next `SignedIn`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.spawn_wiring();
        self.shared.reload().await?;
        if self.shared.store.snapshot().is_missing() {
            info!("no session yet, waiting for sign-in");
        } else {
            self.shared.start_timers();
        }
        Ok(())
    }

    /// Stop monitoring and event wiring without signing out.
    pub fn shutdown(&self) {
        if let Some(cancel) = self.shared.wiring.lock().take() {
            cancel.cancel();
        }
        self.shared.stop_timers();
        debug!("session facade shut down");
    }

    pub fn current_snapshot(&self) -> TokenSnapshot {
        self.shared.store.snapshot()
    }

    pub fn validate(&self) -> Validation {
        self.shared.coordinator.validate()
    }

    /// Refresh now regardless of remaining lifetime.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.shared.coordinator.force_refresh().await
    }

    pub async fn refresh_if_needed(&self) -> RefreshOutcome {
        self.shared.coordinator.refresh_if_needed().await
    }

    pub fn idle_state(&self) -> IdleSessionState {
        self.shared.idle.state()
    }

    /// Whether the idle timer is in its warning window.
    pub fn is_warning(&self) -> bool {
        self.shared.idle.state().is_warning
    }

    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        self.shared.idle.record_activity(signal)
    }

    pub fn reset_idle_timer(&self) {
        self.shared.idle.reset_timer();
    }

    /// Refresh credentials and, only if that succeeds, restart the idle
    /// period. Concurrent callers share one refresh and one reset.
    pub async fn extend_session(&self) -> bool {
        match self.shared.coordinator.force_refresh().await {
            Ok(refresh) => {
                // A forced refresh always completes with a generation.
                if let Refresh::Refreshed { generation } = refresh {
                    self.shared.idle.extend_with(generation);
                }
                true
            }
            Err(e) => {
                warn!(err = %e, "session extension failed");
                false
            }
        }
    }

    /// Sign out through the provider, then clear local state and stop the
    /// timers. Local state is cleared even when the provider fails.
    pub async fn force_sign_out(&self) -> anyhow::Result<()> {
        self.shared.sign_out().await
    }

    pub async fn current_identity(&self) -> anyhow::Result<Identity> {
        self.shared.provider.current_identity().await
    }

    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on_event(handler)
    }

    /// Register a callback for idle warning and timeout transitions.
    pub fn on_idle<F>(&self, handler: F)
    where
        F: Fn(IdleTransition, &IdleSessionState) + Send + Sync + 'static,
    {
        self.shared.idle.on_transition(handler);
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.monitor.is_running()
    }

    pub fn is_idle_timer_running(&self) -> bool {
        self.shared.idle.is_running()
    }

    /// Surface the current credential problem, if any.
    pub fn check_credentials(&self) -> Result<(), SessionError> {
        match self.current_snapshot().problem() {
            Some(code) => Err(code.to_error("credentials unusable")),
            None => Ok(()),
        }
    }

    fn spawn_wiring(&self) {
        let mut wiring = self.shared.wiring.lock();
        if wiring.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut rx = self.shared.bus.subscribe();
        // The task must not keep the facade alive.
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let Some(shared) = shared.upgrade() else { break };
                        shared.handle(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session wiring lagged, resyncing");
                        let Some(shared) = shared.upgrade() else { break };
                        shared.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("session wiring exited");
        });
        *wiring = Some(cancel);
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod tests;
