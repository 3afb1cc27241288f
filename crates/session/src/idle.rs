// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inactivity timer, independent of credential validity.
//!
//! `Active -> Warning -> Idle`, and back to `Active` on any recognized
//! activity signal. Each transition out of `Active` fires once per
//! continuous inactive period.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{EventBus, LifecycleEvent, IDLE_TIMEOUT, IDLE_WARNING};

/// User presence signals a host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySignal {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
    /// The host surface became visible again.
    Visible,
}

impl ActivitySignal {
    pub const ALL: [Self; 5] = [Self::Pointer, Self::Keyboard, Self::Scroll, Self::Touch, Self::Visible];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Keyboard => "keyboard",
            Self::Scroll => "scroll",
            Self::Touch => "touch",
            Self::Visible => "visible",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePhase {
    Active,
    Warning,
    Idle,
}

/// A transition reported by [`IdleSessionTimer::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTransition {
    Warning,
    Timeout,
}

impl IdleTransition {
    /// Bus event name for this transition.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Warning => IDLE_WARNING,
            Self::Timeout => IDLE_TIMEOUT,
        }
    }
}

/// Point-in-time view of the idle timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSessionState {
    pub last_activity_at: Instant,
    pub timeout_minutes: u64,
    pub warning_minutes: u64,
    /// Whole minutes left before the timeout, never below zero.
    pub remaining_minutes: i64,
    pub phase: IdlePhase,
    pub is_warning: bool,
    pub is_idle: bool,
    /// Successful session extensions since construction.
    pub extensions: u64,
}

/// Timer settings, normally taken from [`SessionConfig`](crate::config::SessionConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleSettings {
    pub timeout_minutes: u64,
    pub warning_minutes: u64,
    pub check_interval: Duration,
    pub signals: Vec<ActivitySignal>,
}

impl From<&crate::config::SessionConfig> for IdleSettings {
    fn from(config: &crate::config::SessionConfig) -> Self {
        Self {
            timeout_minutes: config.idle_timeout_minutes,
            warning_minutes: config.idle_warning_minutes,
            check_interval: config.idle_check_interval(),
            signals: config.idle_activity_signals.clone(),
        }
    }
}

type TransitionHandler = Arc<dyn Fn(IdleTransition, &IdleSessionState) + Send + Sync>;

struct Latches {
    last_activity_at: Instant,
    warned: bool,
    timed_out: bool,
    extensions: u64,
    /// Refresh generation of the last extension that reset the timer.
    extended_generation: u64,
}

impl Latches {
    fn reset(&mut self, now: Instant) {
        self.last_activity_at = now;
        self.warned = false;
        self.timed_out = false;
    }
}

struct Inner {
    settings: IdleSettings,
    latches: Mutex<Latches>,
    handlers: Mutex<Vec<TransitionHandler>>,
    bus: Option<EventBus>,
}

impl Inner {
    fn state_at(&self, latches: &Latches, now: Instant) -> IdleSessionState {
        let elapsed_minutes = now.saturating_duration_since(latches.last_activity_at).as_secs() / 60;
        let remaining_minutes =
            (self.settings.timeout_minutes as i64 - elapsed_minutes as i64).max(0);
        let is_idle = remaining_minutes <= 0;
        let is_warning = !is_idle && remaining_minutes <= self.settings.warning_minutes as i64;
        let phase = if is_idle {
            IdlePhase::Idle
        } else if is_warning {
            IdlePhase::Warning
        } else {
            IdlePhase::Active
        };
        IdleSessionState {
            last_activity_at: latches.last_activity_at,
            timeout_minutes: self.settings.timeout_minutes,
            warning_minutes: self.settings.warning_minutes,
            remaining_minutes,
            phase,
            is_warning,
            is_idle,
            extensions: latches.extensions,
        }
    }

    fn check(&self, now: Instant) -> Option<IdleTransition> {
        // Transition and latch update happen under one lock with one `now`.
        let (transition, state) = {
            let mut latches = self.latches.lock();
            let state = self.state_at(&latches, now);
            let transition = if state.is_idle && !latches.timed_out {
                latches.timed_out = true;
                latches.warned = true;
                Some(IdleTransition::Timeout)
            } else if state.is_warning && !latches.warned {
                latches.warned = true;
                Some(IdleTransition::Warning)
            } else {
                None
            };
            (transition?, state)
        };

        match transition {
            IdleTransition::Warning => {
                info!(remaining_minutes = state.remaining_minutes, "idle warning")
            }
            IdleTransition::Timeout => info!(timeout_minutes = state.timeout_minutes, "idle timeout"),
        }
        if let Some(ref bus) = self.bus {
            bus.publish(LifecycleEvent::custom(
                transition.event_name(),
                serde_json::json!({ "remaining_minutes": state.remaining_minutes }),
            ));
        }
        let handlers: Vec<TransitionHandler> = self.handlers.lock().clone();
        for handler in handlers {
            handler(transition, &state);
        }
        Some(transition)
    }
}

/// Inactivity state machine with an optional periodic check loop.
pub struct IdleSessionTimer {
    inner: Arc<Inner>,
    running: Mutex<Option<CancellationToken>>,
}

impl IdleSessionTimer {
    /// Create a timer whose inactivity period starts now. Transitions are
    /// published on `bus` when one is given.
    pub fn new(settings: IdleSettings, bus: Option<EventBus>) -> Self {
        let latches = Latches {
            last_activity_at: Instant::now(),
            warned: false,
            timed_out: false,
            extensions: 0,
            extended_generation: 0,
        };
        Self {
            inner: Arc::new(Inner {
                settings,
                latches: Mutex::new(latches),
                handlers: Mutex::new(Vec::new()),
                bus,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &IdleSettings {
        &self.inner.settings
    }

    /// Register a callback for warning and timeout transitions. Called on
    /// the checking task, outside the timer's lock.
    pub fn on_transition<F>(&self, handler: F)
    where
        F: Fn(IdleTransition, &IdleSessionState) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().push(Arc::new(handler));
    }

    pub fn state(&self) -> IdleSessionState {
        let latches = self.inner.latches.lock();
        self.inner.state_at(&latches, Instant::now())
    }

    /// Evaluate the timer now, firing any transition that is due.
    pub fn check(&self) -> Option<IdleTransition> {
        self.inner.check(Instant::now())
    }

    /// Report user activity. Returns false when `signal` is not one of the
    /// configured presence signals.
    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        if !self.inner.settings.signals.contains(&signal) {
            debug!(%signal, "ignoring unconfigured activity signal");
            return false;
        }
        self.inner.latches.lock().reset(Instant::now());
        true
    }

    /// "Still here": restart the inactivity period without touching
    /// credentials.
    pub fn reset_timer(&self) {
        self.inner.latches.lock().reset(Instant::now());
        debug!("idle timer reset");
    }

    /// Restart the inactivity period for a session extension backed by
    /// refresh `generation`. Extensions sharing a generation reset once;
    /// returns whether this call reset the timer.
    pub fn extend_with(&self, generation: u64) -> bool {
        let mut latches = self.inner.latches.lock();
        if generation <= latches.extended_generation {
            return false;
        }
        latches.extended_generation = generation;
        latches.extensions += 1;
        latches.reset(Instant::now());
        info!(generation, "session extended");
        true
    }

    /// Start the periodic check, restarting the inactivity period. Replaces
    /// any loop already running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if let Some(previous) = running.take() {
            previous.cancel();
        }
        self.inner.latches.lock().reset(Instant::now());

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let period = self.inner.settings.check_interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {
                        inner.check(Instant::now());
                    }
                }
            }
            debug!("idle timer loop exited");
        });

        *running = Some(cancel);
        info!(
            timeout_minutes = self.inner.settings.timeout_minutes,
            warning_minutes = self.inner.settings.warning_minutes,
            "idle timer started"
        );
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.running.lock().take() {
            cancel.cancel();
            info!("idle timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for IdleSessionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
