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

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{decode_claims, require_claim, DiscoveryTokenVerifier, TokenVerifier};
use crate::config::CrafterConfig;
use crate::errors::{CrafterError, Result};
use crate::runners::EnvLookup;

/// Claims of a GitLab CI ID token the crafter relies on.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GitlabTokenClaims {
    pub sub: String,
    /// `gitlab.com/group/project//.gitlab-ci.yml@refs/heads/main`
    pub ci_config_ref_uri: String,
    pub runner_environment: String,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
}

/// Verifies the ID token GitLab injects into the job environment.
///
/// GitLab hands the token over through a variable declared in the job's
/// `id_tokens` section, so nothing is fetched over the network except the
/// issuer's signing keys.
pub struct GitlabOidcClient {
    token: Option<String>,
    token_env: String,
    issuer: Option<String>,
    audience: String,
    verifier: Arc<dyn TokenVerifier>,
    claims: OnceCell<Option<GitlabTokenClaims>>,
}

impl GitlabOidcClient {
    pub fn new(env: &dyn EnvLookup, config: &CrafterConfig) -> Self {
        Self {
            token: env.var(&config.gitlab_oidc_token_env),
            token_env: config.gitlab_oidc_token_env.clone(),
            issuer: env.var("CI_SERVER_URL"),
            audience: config.oidc_audience.clone(),
            verifier: Arc::new(DiscoveryTokenVerifier::new(config.oidc_timeout)),
            claims: OnceCell::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub async fn claims(&self) -> Option<&GitlabTokenClaims> {
        self.claims
            .get_or_init(|| async {
                match self.verify().await {
                    Ok(claims) => Some(claims),
                    Err(e) => {
                        warn!(error = %e, "GitLab workload identity unavailable");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    pub fn cached_claims(&self) -> Option<&GitlabTokenClaims> {
        self.claims.get().and_then(Option::as_ref)
    }

    async fn verify(&self) -> Result<GitlabTokenClaims> {
        let token = self.token.as_deref().ok_or_else(|| {
            CrafterError::IdentityTokenError(format!(
                "{} is not set, declare it under id_tokens in the job",
                self.token_env
            ))
        })?;
        let issuer = self
            .issuer
            .as_deref()
            .ok_or_else(|| CrafterError::IdentityTokenError("CI_SERVER_URL is not set".into()))?;

        let claims = self.verifier.verify(token, issuer, &self.audience).await?;
        let claims: GitlabTokenClaims = decode_claims(claims)?;
        require_claim("ci_config_ref_uri", &claims.ci_config_ref_uri)?;
        require_claim("runner_environment", &claims.runner_environment)?;
        debug!(subject = %claims.sub, "GitLab workload identity verified");
        Ok(claims)
    }
}
