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
use url::Url;

use super::{decode_claims, require_claim, DiscoveryTokenVerifier, TokenVerifier};
use crate::config::CrafterConfig;
use crate::errors::{CrafterError, Result};
use crate::runners::EnvLookup;

/// Issuer of GitHub Actions workload identity tokens.
pub const GITHUB_OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Claims of a GitHub Actions ID token the crafter relies on.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GitHubTokenClaims {
    pub sub: String,
    /// `owner/repo/.github/workflows/file.yml@ref`
    pub job_workflow_ref: String,
    pub runner_environment: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    value: String,
}

/// Fetches the Actions ID token once per process and verifies it.
pub struct GitHubOidcClient {
    http: reqwest::Client,
    request_url: Option<String>,
    request_token: Option<String>,
    audience: String,
    issuer: String,
    verifier: Arc<dyn TokenVerifier>,
    claims: OnceCell<Option<GitHubTokenClaims>>,
}

impl GitHubOidcClient {
    pub fn new(env: &dyn EnvLookup, config: &CrafterConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.oidc_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            request_url: env.var("ACTIONS_ID_TOKEN_REQUEST_URL"),
            request_token: env.var("ACTIONS_ID_TOKEN_REQUEST_TOKEN"),
            audience: config.oidc_audience.clone(),
            issuer: GITHUB_OIDC_ISSUER.to_string(),
            verifier: Arc::new(DiscoveryTokenVerifier::new(config.oidc_timeout)),
            claims: OnceCell::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Expect tokens from a different issuer, as GitHub Enterprise Server does.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    /// Verified claims, fetching the token on first use.
    pub async fn claims(&self) -> Option<&GitHubTokenClaims> {
        self.claims
            .get_or_init(|| async {
                match self.fetch_and_verify().await {
                    Ok(claims) => Some(claims),
                    Err(e) => {
                        warn!(error = %e, "GitHub workload identity unavailable");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Claims from a previous [`GitHubOidcClient::claims`] call, if any.
    pub fn cached_claims(&self) -> Option<&GitHubTokenClaims> {
        self.claims.get().and_then(Option::as_ref)
    }

    async fn fetch_token(&self) -> Result<String> {
        let (Some(request_url), Some(request_token)) = (&self.request_url, &self.request_token)
        else {
            return Err(CrafterError::IdentityTokenError(
                "ACTIONS_ID_TOKEN_REQUEST_URL and ACTIONS_ID_TOKEN_REQUEST_TOKEN must be set, \
                 is the id-token: write permission granted?"
                    .into(),
            ));
        };

        let mut url = Url::parse(request_url)?;
        url.query_pairs_mut().append_pair("audience", &self.audience);

        let response = self
            .http
            .get(url)
            .bearer_auth(request_token)
            .send()
            .await?
            .error_for_status()?;
        let body: TokenResponse = response.json().await?;
        Ok(body.value)
    }

    async fn fetch_and_verify(&self) -> Result<GitHubTokenClaims> {
        let token = self.fetch_token().await?;
        let claims = self
            .verifier
            .verify(&token, &self.issuer, &self.audience)
            .await?;
        let claims: GitHubTokenClaims = decode_claims(claims)?;
        require_claim("job_workflow_ref", &claims.job_workflow_ref)?;
        require_claim("runner_environment", &claims.runner_environment)?;
        debug!(subject = %claims.sub, "GitHub workload identity verified");
        Ok(claims)
    }
}
