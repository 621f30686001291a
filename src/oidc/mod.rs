// Copyright 2025 The Sigstore Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Workload identity tokens issued by CI platforms.
//!
//! A runner that can prove its identity fetches a token from its platform,
//! verifies it against the issuer's published keys and keeps the claims it
//! needs. Verification never makes a runner unusable: on any failure the
//! client reports no claims and the runner stays unauthenticated.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use openidconnect::core::{
    CoreGenderClaim, CoreJsonWebKeyType, CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm, CoreProviderMetadata,
};
use openidconnect::reqwest::async_http_client;
use openidconnect::{AdditionalClaims, ClientId, IdToken, IdTokenVerifier, IssuerUrl, Nonce};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{CrafterError, Result};

pub mod github;
pub mod gitlab;

pub use github::{GitHubOidcClient, GitHubTokenClaims, GITHUB_OIDC_ISSUER};
pub use gitlab::{GitlabOidcClient, GitlabTokenClaims};

/// Verifies a raw ID token and returns its full claim set.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, raw_token: &str, issuer: &str, audience: &str) -> Result<Value>;
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct PlatformClaims {
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl AdditionalClaims for PlatformClaims {}

type PlatformIdToken = IdToken<
    PlatformClaims,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
    CoreJsonWebKeyType,
>;

/// [`TokenVerifier`] that discovers the issuer's signing keys through
/// OpenID Connect discovery.
#[derive(Clone, Debug)]
pub struct DiscoveryTokenVerifier {
    timeout: Duration,
}

impl DiscoveryTokenVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TokenVerifier for DiscoveryTokenVerifier {
    async fn verify(&self, raw_token: &str, issuer: &str, audience: &str) -> Result<Value> {
        let issuer_url = IssuerUrl::new(issuer.to_string())
            .map_err(|e| CrafterError::IdentityTokenError(format!("invalid issuer: {e}")))?;

        let metadata = tokio::time::timeout(
            self.timeout,
            CoreProviderMetadata::discover_async(issuer_url.clone(), async_http_client),
        )
        .await
        .map_err(|_| CrafterError::Timeout(self.timeout))?
        .map_err(|e| CrafterError::IdentityTokenError(format!("discovery failed: {e}")))?;

        let token = PlatformIdToken::from_str(raw_token)
            .map_err(|e| CrafterError::IdentityTokenError(format!("malformed token: {e}")))?;

        let verifier = IdTokenVerifier::new_public_client(
            ClientId::new(audience.to_string()),
            issuer_url,
            metadata.jwks().clone(),
        )
        .set_allowed_algs(vec![
            CoreJwsSigningAlgorithm::RsaSsaPkcs1V15Sha256,
            CoreJwsSigningAlgorithm::EcdsaP256Sha256,
        ]);

        let claims = token
            .claims(&verifier, |_: Option<&Nonce>| Ok(()))
            .map_err(|e| CrafterError::IdentityTokenError(e.to_string()))?;

        let mut all = claims.additional_claims().extra.clone();
        all.insert("iss".into(), Value::String(claims.issuer().to_string()));
        all.insert("sub".into(), Value::String(claims.subject().to_string()));
        debug!(issuer, "verified workload identity token");
        Ok(Value::Object(all))
    }
}

/// Decode a verified claim set into a platform claims struct.
pub(crate) fn decode_claims<T: for<'de> Deserialize<'de>>(claims: Value) -> Result<T> {
    serde_json::from_value(claims)
        .map_err(|e| CrafterError::IdentityTokenError(format!("unexpected claims: {e}")))
}

/// Reject a verified token whose required claim is blank.
pub(crate) fn require_claim(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CrafterError::IdentityTokenError(format!("claim {name} is empty")));
    }
    Ok(())
}

/// Keep the part of a workflow reference that names the file inside the
/// repository, dropping the ref suffix.
pub(crate) fn strip_ref(reference: &str) -> &str {
    reference
        .split_once('@')
        .map(|(path, _)| path)
        .unwrap_or(reference)
}
