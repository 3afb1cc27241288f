// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::*;

#[derive(Debug, Parser)]
struct Cli {
    #[command(flatten)]
    session: SessionConfig,
}

fn parse(args: &[&str]) -> anyhow::Result<SessionConfig> {
    Ok(Cli::try_parse_from(args)?.session)
}

#[test]
fn cli_defaults_match_default_impl() -> anyhow::Result<()> {
    let config = parse(&["host"])?;
    assert_eq!(config, SessionConfig::default());
    config.validate()?;
    Ok(())
}

#[test]
fn cli_overrides_and_signal_list() -> anyhow::Result<()> {
    let config = parse(&[
        "host",
        "--idle-timeout-minutes",
        "10",
        "--idle-warning-minutes",
        "2",
        "--idle-activity-signals",
        "keyboard,visible",
        "--idle-sign-out",
        "false",
    ])?;
    assert_eq!(config.idle_timeout_minutes, 10);
    assert_eq!(config.idle_warning_minutes, 2);
    assert_eq!(
        config.idle_activity_signals,
        vec![ActivitySignal::Keyboard, ActivitySignal::Visible]
    );
    assert!(!config.idle_sign_out);
    Ok(())
}

#[test]
fn deserialize_partial_json_uses_defaults() -> anyhow::Result<()> {
    let json = r#"{"refresh_buffer_secs": 120, "idle_activity_signals": ["touch"]}"#;
    let config: SessionConfig = serde_json::from_str(json)?;
    assert_eq!(config.refresh_buffer_secs, 120);
    assert_eq!(config.expiry_warning_threshold_secs, 300);
    assert_eq!(config.idle_activity_signals, vec![ActivitySignal::Touch]);
    Ok(())
}

#[test]
fn duration_accessors() {
    let config = SessionConfig::default();
    assert_eq!(config.monitor_interval(), Duration::from_secs(30));
    assert_eq!(config.idle_check_interval(), Duration::from_secs(30));
    assert_eq!(config.idle_timeout(), Duration::from_secs(30 * 60));
}

#[yare::parameterized(
    zero_monitor   = { SessionConfig { monitor_interval_ms: 0, ..SessionConfig::default() },
                       "monitor interval" },
    zero_idle_tick = { SessionConfig { idle_check_interval_ms: 0, ..SessionConfig::default() },
                       "idle check interval" },
    zero_timeout   = { SessionConfig { idle_timeout_minutes: 0, ..SessionConfig::default() },
                       "at least one minute" },
    warning_longer = { SessionConfig { idle_warning_minutes: 30, ..SessionConfig::default() },
                       "must be shorter" },
)]
fn invalid_config(config: SessionConfig, expected_substr: &str) {
    crate::assert_err_contains!(config.validate(), expected_substr);
}
