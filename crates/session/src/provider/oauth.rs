// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth2 token-endpoint provider (refresh_token grant).

use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Identity, IdentityProvider, ProviderFuture};
use crate::bus::{EventBus, LifecycleEvent};
use crate::token::CredentialBundle;

/// Request timeout for token and revoke calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Token response from the provider.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth error response from the provider.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Holds one session's tokens and refreshes them against an OAuth2 token
/// endpoint (Cognito's `/oauth2/token` and compatible servers).
pub struct OAuthProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    revoke_url: Option<String>,
    bundle: RwLock<CredentialBundle>,
    bus: Option<EventBus>,
}

impl OAuthProvider {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            token_url: token_url.into(),
            client_id: client_id.into(),
            revoke_url: None,
            bundle: RwLock::new(CredentialBundle::default()),
            bus: None,
        }
    }

    /// Revoke the refresh token at this endpoint on sign-out.
    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.revoke_url = Some(url.into());
        self
    }

    /// Publish `SignedIn` on this bus when seeded.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Install the tokens from a completed sign-in.
    pub fn seed(&self, bundle: CredentialBundle) {
        *self.bundle.write() = bundle;
        info!(client_id = %self.client_id, "credentials seeded");
        if let Some(ref bus) = self.bus {
            bus.publish(LifecycleEvent::SignedIn);
        }
    }

    async fn refresh(&self) -> anyhow::Result<CredentialBundle> {
        let refresh_token = self
            .bundle
            .read()
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no refresh token held"))?;

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<TokenErrorResponse>(&text) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error,
                },
                Err(_) => text,
            };
            anyhow::bail!("refresh failed ({status}): {reason}");
        }

        let token: TokenResponse = resp.json().await?;
        let mut bundle = self.bundle.write();
        // Sign-out or a new sign-in while the request was out wins.
        if bundle.refresh_token.as_deref() != Some(refresh_token.as_str()) {
            anyhow::bail!("credentials changed during refresh");
        }
        bundle.access_token = Some(token.access_token);
        if let Some(id) = token.id_token {
            bundle.id_token = Some(id);
        }
        // Servers that do not rotate refresh tokens omit the field.
        if let Some(rt) = token.refresh_token {
            bundle.refresh_token = Some(rt);
        }
        debug!(client_id = %self.client_id, "token endpoint refresh succeeded");
        Ok(bundle.clone())
    }

    async fn revoke(&self, url: &str, refresh_token: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(url)
            .form(&[("token", refresh_token), ("client_id", self.client_id.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("revoke failed ({})", resp.status());
        }
        Ok(())
    }
}

impl IdentityProvider for OAuthProvider {
    fn fetch_credentials(&self, force_refresh: bool) -> ProviderFuture<'_, CredentialBundle> {
        Box::pin(async move {
            if force_refresh {
                self.refresh().await
            } else {
                Ok(self.bundle.read().clone())
            }
        })
    }

    fn current_identity(&self) -> ProviderFuture<'_, Identity> {
        Box::pin(async move { Identity::from_bundle(&self.bundle.read()) })
    }

    fn sign_out(&self) -> ProviderFuture<'_, ()> {
        Box::pin(async move {
            let refresh_token = std::mem::take(&mut *self.bundle.write()).refresh_token;
            if let (Some(url), Some(rt)) = (self.revoke_url.as_deref(), refresh_token) {
                // Local sign-out stands even if the server rejects the revoke.
                if let Err(e) = self.revoke(url, &rt).await {
                    warn!(err = %e, "refresh token revoke failed");
                }
            }
            info!(client_id = %self.client_id, "signed out");
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
