// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background credential monitor: warns before expiry and refreshes
//! proactively on a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, LifecycleEvent};
use crate::error::{ErrorCode, SessionError};
use crate::refresh::RefreshCoordinator;
use crate::token::CredentialStore;

/// State shared between the monitor handle and its loop task.
struct Ticker {
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    bus: EventBus,
    ticks: AtomicU64,
}

impl Ticker {
    /// One sample: expiry warning first, then the (de-duplicated) refresh.
    async fn tick(&self) -> Result<(), SessionError> {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let snapshot = self.store.snapshot();

        if snapshot.is_expiring_soon && !snapshot.is_expired {
            if let Some(seconds_remaining) = snapshot.time_until_expiry_secs {
                debug!(seconds_remaining, "credentials expiring soon");
                self.bus.publish(LifecycleEvent::ExpiryWarning { seconds_remaining });
            }
        }

        self.coordinator.refresh_if_needed().await.map(|_| ())
    }
}

/// Recurring credential check. `Stopped -> Running -> Stopped`, restartable.
pub struct BackgroundMonitor {
    ticker: Arc<Ticker>,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl BackgroundMonitor {
    pub fn new(
        store: Arc<CredentialStore>,
        coordinator: RefreshCoordinator,
        bus: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            ticker: Arc::new(Ticker { store, coordinator, bus, ticks: AtomicU64::new(0) }),
            interval,
            running: Mutex::new(None),
        }
    }

    /// Start ticking, replacing any loop already running. The first tick
    /// fires immediately.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            debug!("restarting credential monitor");
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let ticker = Arc::clone(&self.ticker);
        let period = self.interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }

                // Cancellation also abandons a tick in progress; the refresh
                // it may have started still settles on its own task.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = ticker.tick() => {
                        if let Err(e) = result {
                            warn!(code = %ErrorCode::MonitorTickFailed, err = %e, "monitor tick failed");
                        }
                    }
                }
            }
            debug!("credential monitor loop exited");
        });

        *running = Some(cancel);
        info!(interval_ms = period.as_millis() as u64, "credential monitor started");
    }

    /// Stop ticking, abandoning any tick in progress.
    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
            info!("credential monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Ticks started since construction.
    pub fn tick_count(&self) -> u64 {
        self.ticker.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for BackgroundMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
