// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity provider seam.
//!
//! The provider issues, stores and refreshes credentials. This crate only
//! consumes it; [`oauth::OAuthProvider`] is the bundled adapter for OAuth2
//! token endpoints.

pub mod oauth;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::token::{decode_claims, CredentialBundle};

/// Boxed future returned by [`IdentityProvider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Credential source consumed by the session manager.
///
/// Object-safe for use as `Arc<dyn IdentityProvider>`.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Return the current bundle, exchanging the refresh token first when
    /// `force_refresh` is set.
    fn fetch_credentials(&self, force_refresh: bool) -> ProviderFuture<'_, CredentialBundle>;

    fn current_identity(&self) -> ProviderFuture<'_, Identity>;

    /// Discard the provider's credentials.
    fn sign_out(&self) -> ProviderFuture<'_, ()>;
}

/// The signed-in user, as described by the identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Identity {
    pub fn from_id_token(token: &str) -> anyhow::Result<Self> {
        let claims = decode_claims(token)?;
        let user_id =
            claims.sub.ok_or_else(|| anyhow::anyhow!("identity token has no sub claim"))?;
        Ok(Self { user_id, username: claims.username, email: claims.email })
    }

    pub fn from_bundle(bundle: &CredentialBundle) -> anyhow::Result<Self> {
        match bundle.id_token.as_deref() {
            Some(token) if !token.is_empty() => Self::from_id_token(token),
            _ => anyhow::bail!("not signed in"),
        }
    }
}
