// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use tourkit_session::bus::{EventBus, LifecycleEvent};
use tourkit_session::config::SessionConfig;
use tourkit_session::facade::SessionFacade;
use tourkit_session::idle::ActivitySignal;
use tourkit_session::provider::oauth::OAuthProvider;
use tourkit_session::token::CredentialBundle;

/// Keep a signed-in session alive against an OAuth2 token endpoint and log
/// its lifecycle events.
///
/// Each line on stdin counts as keyboard activity. The lines `extend`,
/// `refresh` and `signout` run the matching session action instead.
#[derive(Debug, Parser)]
#[command(name = "session-watch", version)]
struct Cli {
    /// OAuth2 token endpoint.
    #[arg(long, env = "TOURKIT_TOKEN_URL")]
    token_url: String,

    /// OAuth2 client ID.
    #[arg(long, env = "TOURKIT_CLIENT_ID")]
    client_id: String,

    /// Revocation endpoint called on sign-out.
    #[arg(long, env = "TOURKIT_REVOKE_URL")]
    revoke_url: Option<String>,

    /// JSON file with the signed-in credential bundle.
    #[arg(long, env = "TOURKIT_CREDENTIALS")]
    credentials: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "TOURKIT_LOG_FORMAT", default_value = "json")]
    log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOURKIT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(flatten)]
    session: SessionConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.session.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&cli.credentials)
        .with_context(|| format!("reading {}", cli.credentials.display()))?;
    let bundle: CredentialBundle = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", cli.credentials.display()))?;

    let bus = EventBus::auth();
    let mut provider = OAuthProvider::new(cli.token_url, cli.client_id).with_bus(bus.clone());
    if let Some(url) = cli.revoke_url {
        provider = provider.with_revoke_url(url);
    }
    let provider = Arc::new(provider);

    let facade = SessionFacade::builder(provider.clone()).config(cli.session).bus(bus.clone()).build()?;
    let mut events = bus.subscribe();

    // Wiring is live before the sign-in lands, so it starts the timers.
    facade.start().await?;
    provider.seed(bundle);

    match facade.current_identity().await {
        Ok(identity) => info!(user_id = %identity.user_id, "watching session"),
        Err(e) => warn!(err = %e, "session has no identity"),
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => command(&facade, line.trim()).await,
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    info!(event = %serde_json::to_string(&event)?, "lifecycle event");
                    if event == LifecycleEvent::SignedOut {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    facade.shutdown();
    Ok(())
}

async fn command(facade: &SessionFacade, line: &str) {
    match line {
        "extend" => {
            let extended = facade.extend_session().await;
            info!(extended, "extend session");
        }
        "refresh" => match facade.refresh_now().await {
            Ok(outcome) => info!(?outcome, "refresh"),
            Err(e) => warn!(err = %e, "refresh"),
        },
        "signout" => {
            if let Err(e) = facade.force_sign_out().await {
                warn!(err = %format!("{e:#}"), "sign-out");
            }
        }
        _ => {
            facade.record_activity(ActivitySignal::Keyboard);
        }
    }
    let snap = facade.current_snapshot();
    let idle = facade.idle_state();
    info!(
        expires_in = ?snap.time_until_expiry_secs,
        idle_remaining_minutes = idle.remaining_minutes,
        idle_phase = ?idle.phase,
        "session state"
    );
}
