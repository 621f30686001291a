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

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use tracing::debug;

use super::{
    detect_signature_type, pgp, read_limited, CommitVerification, CommitVerifier,
    VerificationStatus,
};
use crate::errors::Result;

const PLATFORM: &str = "github";

#[derive(Deserialize)]
struct CommitResponse {
    commit: CommitData,
}

#[derive(Deserialize)]
struct CommitData {
    verification: Option<Verification>,
}

#[derive(Deserialize)]
struct Verification {
    verified: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    signature: Option<String>,
}

/// Queries `GET /repos/{owner}/{repo}/commits/{sha}`.
pub struct GitHubCommitVerifier {
    http: reqwest::Client,
    api_url: String,
    owner_repo: String,
    token: Option<String>,
}

impl GitHubCommitVerifier {
    pub fn new(
        api_url: &str,
        owner_repo: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("attestation-crafter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            owner_repo: owner_repo.to_string(),
            token,
        })
    }
}

#[async_trait]
impl CommitVerifier for GitHubCommitVerifier {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    async fn verify(&self, sha: &str) -> CommitVerification {
        let url = format!("{}/repos/{}/commits/{sha}", self.api_url, self.owner_repo);
        let mut request = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return CommitVerification::unavailable(PLATFORM, format!("request failed: {e}")),
        };
        debug!(url, status = %response.status(), "GitHub commit lookup");

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return CommitVerification::new(
                VerificationStatus::NotApplicable,
                PLATFORM,
                "commit not found",
            );
        }
        if !status.is_success() {
            return CommitVerification::from_http_status(PLATFORM, status);
        }

        let body = match read_limited(response).await {
            Ok(body) => body,
            Err(reason) => return CommitVerification::unavailable(PLATFORM, reason),
        };
        let parsed: CommitResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return CommitVerification::unavailable(PLATFORM, format!("invalid response: {e}"))
            }
        };

        let Some(verification) = parsed.commit.verification else {
            return CommitVerification::new(
                VerificationStatus::NotApplicable,
                PLATFORM,
                "no verification data",
            );
        };

        if !verification.verified {
            return CommitVerification::new(
                VerificationStatus::Unverified,
                PLATFORM,
                verification.reason,
            );
        }

        let mut result =
            CommitVerification::new(VerificationStatus::Verified, PLATFORM, verification.reason);
        if let Some(signature) = verification.signature.as_deref() {
            result.signature_algorithm = Some(detect_signature_type(signature));
            // The API does not name the key, PGP signatures carry its id.
            result.key_id = pgp::issuer_key_id(signature);
        }
        result
    }
}
