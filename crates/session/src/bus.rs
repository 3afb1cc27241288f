// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle event bus shared by the identity provider, the background
//! monitor, and any subscriber.
//!
//! Delivery is asynchronous: a handler registered with [`EventBus::on_event`]
//! runs on its own task and sees events some time after they are published.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Topic carrying authentication lifecycle events.
pub const AUTH_TOPIC: &str = "auth";

/// Event names used for idle-timer notifications.
pub const IDLE_WARNING: &str = "idle_warning";
pub const IDLE_TIMEOUT: &str = "idle_timeout";

/// Named lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    SignedIn,
    SignedOut,
    Refreshed,
    RefreshFailed { error: String },
    ExpiryWarning { seconds_remaining: i64 },
    Custom { name: String, payload: serde_json::Value },
}

impl LifecycleEvent {
    pub fn custom(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Custom { name: name.into(), payload }
    }

    /// Stable event name, matching the serialized tag for built-in events.
    pub fn name(&self) -> &str {
        match self {
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::Refreshed => "refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::ExpiryWarning { .. } => "expiry_warning",
            Self::Custom { name, .. } => name,
        }
    }
}

/// Broadcast transport for one topic.
#[derive(Clone)]
pub struct EventBus {
    topic: Arc<str>,
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(topic: &str) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { topic: Arc::from(topic), tx }
    }

    /// Bus for the [`AUTH_TOPIC`].
    pub fn auth() -> Self {
        Self::new(AUTH_TOPIC)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        tracing::debug!(topic = %self.topic, event = event.name(), "publish");
        self.tx.send(event).unwrap_or(0)
    }

    /// Raw receiver for callers that drive their own loop.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` on a background task for every event published after
    /// this call. Delivery stops when the returned [`Subscription`] is
    /// dropped or unsubscribed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(LifecycleEvent) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let cancel = CancellationToken::new();
        let topic = Arc::clone(&self.topic);
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(e) => handler(e),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(topic = %topic, skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription { cancel }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::auth()
    }
}

/// Handle returned by [`EventBus::on_event`].
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
