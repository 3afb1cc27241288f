// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::idle::ActivitySignal;

/// Configuration accepted by [`SessionFacade`](crate::facade::SessionFacade)
/// at construction.
///
/// Embeddable in a host CLI via `#[command(flatten)]` or loaded from a
/// config file; missing keys fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lead time before credential expiry at which expiry warnings start.
    #[arg(long, default_value_t = 300, env = "TOURKIT_EXPIRY_WARNING_SECS")]
    pub expiry_warning_threshold_secs: u64,

    /// Refresh proactively once fewer than this many seconds remain.
    #[arg(long, default_value_t = 60, env = "TOURKIT_REFRESH_BUFFER_SECS")]
    pub refresh_buffer_secs: u64,

    /// Background credential monitor interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "TOURKIT_MONITOR_INTERVAL_MS")]
    pub monitor_interval_ms: u64,

    /// Minutes of inactivity before the session is signed out.
    #[arg(long, default_value_t = 30, env = "TOURKIT_IDLE_TIMEOUT_MINUTES")]
    pub idle_timeout_minutes: u64,

    /// Minutes before the idle timeout at which the warning fires.
    #[arg(long, default_value_t = 5, env = "TOURKIT_IDLE_WARNING_MINUTES")]
    pub idle_warning_minutes: u64,

    /// Idle check interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "TOURKIT_IDLE_CHECK_MS")]
    pub idle_check_interval_ms: u64,

    /// Activity signals that count as user presence.
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = ActivitySignal::ALL,
        env = "TOURKIT_IDLE_SIGNALS"
    )]
    pub idle_activity_signals: Vec<ActivitySignal>,

    /// Force sign-out when the idle timeout elapses.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "TOURKIT_IDLE_SIGN_OUT")]
    pub idle_sign_out: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_warning_threshold_secs: 300,
            refresh_buffer_secs: 60,
            monitor_interval_ms: 30_000,
            idle_timeout_minutes: 30,
            idle_warning_minutes: 5,
            idle_check_interval_ms: 30_000,
            idle_activity_signals: ActivitySignal::ALL.to_vec(),
            idle_sign_out: true,
        }
    }
}

impl SessionConfig {
    /// Reject combinations the timers cannot honor.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.monitor_interval_ms == 0 {
            anyhow::bail!("monitor interval must be greater than zero");
        }
        if self.idle_check_interval_ms == 0 {
            anyhow::bail!("idle check interval must be greater than zero");
        }
        if self.idle_timeout_minutes == 0 {
            anyhow::bail!("idle timeout must be at least one minute");
        }
        if self.idle_warning_minutes >= self.idle_timeout_minutes {
            anyhow::bail!(
                "idle warning ({} min) must be shorter than idle timeout ({} min)",
                self.idle_warning_minutes,
                self.idle_timeout_minutes
            );
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes * 60)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
