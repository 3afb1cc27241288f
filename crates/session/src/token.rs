// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential bundles and point-in-time validity snapshots.
//!
//! Claims are decoded, never verified: signature validation belongs to the
//! identity provider and the API backend.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{ErrorCode, SessionError};

/// The set of tokens issued by the identity provider for one session.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    #[serde(default, alias = "accessToken", skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, alias = "idToken", skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, alias = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl CredentialBundle {
    pub fn is_empty(&self) -> bool {
        !present(&self.access_token) && !present(&self.id_token) && !present(&self.refresh_token)
    }
}

// Tokens never reach logs.
impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &present(&self.access_token))
            .field("id_token", &present(&self.id_token))
            .field("refresh_token", &present(&self.refresh_token))
            .finish()
    }
}

fn present(token: &Option<String>) -> bool {
    token.as_deref().is_some_and(|t| !t.is_empty())
}

/// Claims read from an identity token payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdClaims {
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "cognito:username", alias = "username")]
    pub username: Option<String>,
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<IdClaims, SessionError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
        _ => {
            return Err(ErrorCode::MalformedCredentials.to_error("token is not a three-part JWT"))
        }
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).map_err(|e| {
        ErrorCode::MalformedCredentials.to_error(format!("token payload is not base64url: {e}"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ErrorCode::MalformedCredentials.to_error(format!("token payload is not valid claims: {e}"))
    })
}

/// Point-in-time validity of a credential bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenSnapshot {
    pub access_token_present: bool,
    pub id_token_present: bool,
    pub refresh_token_present: bool,
    /// Epoch seconds from the identity token `exp` claim.
    pub expires_at: Option<u64>,
    /// `None` when no expiry is known.
    pub time_until_expiry_secs: Option<i64>,
    pub is_expired: bool,
    pub is_expiring_soon: bool,
}

/// Result of checking a snapshot against the refresh buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub is_valid: bool,
    pub needs_refresh: bool,
}

impl TokenSnapshot {
    /// Derive a snapshot from `bundle` at `now` (epoch seconds).
    ///
    /// A missing identity token or `exp` claim means unknown expiry, not
    /// expiry. An undecodable identity token fails closed.
    pub fn read(bundle: &CredentialBundle, now: u64, warning_threshold_secs: u64) -> Self {
        let access_token_present = present(&bundle.access_token);
        let id_token_present = present(&bundle.id_token);
        let refresh_token_present = present(&bundle.refresh_token);

        let expires_at = match bundle.id_token.as_deref().filter(|t| !t.is_empty()) {
            None => None,
            Some(token) => match decode_claims(token) {
                Ok(claims) => match claims.exp {
                    Some(exp) if exp.is_finite() => Some(exp.max(0.0).floor() as u64),
                    Some(_) => return Self::fail_closed(),
                    None => None,
                },
                Err(e) => {
                    tracing::debug!(err = %e, "identity token unreadable, failing closed");
                    return Self::fail_closed();
                }
            },
        };

        let now = i64::try_from(now).unwrap_or(i64::MAX);
        let time_until_expiry_secs =
            expires_at.map(|exp| i64::try_from(exp).unwrap_or(i64::MAX).saturating_sub(now));
        let (is_expired, is_expiring_soon) = match time_until_expiry_secs {
            None => (false, false),
            Some(remaining) if remaining <= 0 => (true, false),
            Some(remaining) => (false, (remaining as u64) < warning_threshold_secs),
        };

        Self {
            access_token_present,
            id_token_present,
            refresh_token_present,
            expires_at,
            time_until_expiry_secs,
            is_expired,
            is_expiring_soon,
        }
    }

    /// Derive a snapshot from a raw JSON credential bundle.
    pub fn read_raw(raw: &str, now: u64, warning_threshold_secs: u64) -> Self {
        match serde_json::from_str::<CredentialBundle>(raw) {
            Ok(bundle) => Self::read(&bundle, now, warning_threshold_secs),
            Err(e) => {
                tracing::debug!(err = %e, "credential bundle unparseable, failing closed");
                Self::fail_closed()
            }
        }
    }

    /// The safe "unauthenticated" snapshot used for unparseable credentials.
    pub fn fail_closed() -> Self {
        Self {
            access_token_present: false,
            id_token_present: false,
            refresh_token_present: false,
            expires_at: None,
            time_until_expiry_secs: Some(0),
            is_expired: true,
            is_expiring_soon: false,
        }
    }

    /// True when no token of any kind is held.
    pub fn is_missing(&self) -> bool {
        !self.access_token_present && !self.id_token_present && !self.refresh_token_present
    }

    pub fn validate(&self, refresh_buffer_secs: u64) -> Validation {
        let inside_buffer =
            self.time_until_expiry_secs.is_some_and(|t| t < refresh_buffer_secs as i64);
        Validation {
            is_valid: self.access_token_present && !self.is_expired,
            needs_refresh: self.is_expired || inside_buffer,
        }
    }

    /// Classify the snapshot for callers that need a coded reason.
    pub fn problem(&self) -> Option<ErrorCode> {
        if self.is_missing() && self.is_expired {
            Some(ErrorCode::MalformedCredentials)
        } else if self.is_missing() {
            Some(ErrorCode::CredentialsMissing)
        } else if self.is_expired {
            Some(ErrorCode::CredentialsExpired)
        } else {
            None
        }
    }
}

/// Shared holder of the latest credential bundle.
///
/// Every snapshot is derived on read, so it always reflects the current time.
///
/// [`clear`](Self::clear) marks a sign-out by advancing the store's epoch;
/// writers that started before it use
/// [`replace_if_current`](Self::replace_if_current) so a late result cannot
/// resurrect the session.
pub struct CredentialStore {
    bundle: RwLock<CredentialBundle>,
    epoch: AtomicU64,
    clock: Arc<dyn Clock>,
    warning_threshold_secs: u64,
}

impl CredentialStore {
    pub fn new(clock: Arc<dyn Clock>, warning_threshold_secs: u64) -> Self {
        Self {
            bundle: RwLock::new(CredentialBundle::default()),
            epoch: AtomicU64::new(0),
            clock,
            warning_threshold_secs,
        }
    }

    pub fn replace(&self, bundle: CredentialBundle) {
        *self.bundle.write() = bundle;
    }

    /// Store `bundle` only if no sign-out happened since `epoch` was read.
    pub fn replace_if_current(&self, epoch: u64, bundle: CredentialBundle) -> bool {
        let mut held = self.bundle.write();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        *held = bundle;
        true
    }

    /// Drop the credentials and start a new sign-out epoch.
    pub fn clear(&self) {
        let mut held = self.bundle.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *held = CredentialBundle::default();
    }

    /// Sign-outs seen so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn bundle(&self) -> CredentialBundle {
        self.bundle.read().clone()
    }

    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        let bundle = self.bundle.read();
        TokenSnapshot::read(&bundle, self.clock.now_secs(), self.warning_threshold_secs)
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
