// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for the session and credential lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// No tokens at all. A valid unauthenticated state, not a failure.
    CredentialsMissing,
    CredentialsExpired,
    RefreshFailed,
    MalformedCredentials,
    MonitorTickFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CredentialsMissing => "CREDENTIALS_MISSING",
            Self::CredentialsExpired => "CREDENTIALS_EXPIRED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::MalformedCredentials => "MALFORMED_CREDENTIALS",
            Self::MonitorTickFailed => "MONITOR_TICK_FAILED",
        }
    }

    /// Whether the hosting application must treat the session as signed out.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::CredentialsExpired | Self::MalformedCredentials => true,
            Self::CredentialsMissing | Self::RefreshFailed | Self::MonitorTickFailed => false,
        }
    }

    pub fn to_error(&self, message: impl Into<String>) -> SessionError {
        SessionError { code: *self, message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded session failure.
///
/// `Clone` so a single refresh failure can be handed to every caller that
/// joined the same in-flight operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub code: ErrorCode,
    pub message: String,
}

impl SessionError {
    pub fn refresh_failed(err: &anyhow::Error) -> Self {
        ErrorCode::RefreshFailed.to_error(format!("{err:#}"))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
