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
use serde::Deserialize;
use tracing::debug;

use super::{read_limited, CommitVerification, CommitVerifier, SignatureType, VerificationStatus};
use crate::errors::Result;

const PLATFORM: &str = "gitlab";

#[derive(Deserialize)]
struct SignatureResponse {
    verification_status: String,
    #[serde(default)]
    signature_type: Option<String>,
    #[serde(default)]
    gpg_key_primary_keyid: Option<String>,
    #[serde(default)]
    gpg_key_id: Option<serde_json::Value>,
    #[serde(default)]
    key: Option<SshKey>,
    #[serde(default)]
    x509_certificate: Option<X509Certificate>,
}

#[derive(Deserialize)]
struct SshKey {
    #[serde(default)]
    fingerprint: Option<String>,
}

#[derive(Deserialize)]
struct X509Certificate {
    #[serde(default)]
    subject_key_identifier: Option<String>,
}

impl SignatureResponse {
    fn key_id(&self) -> Option<String> {
        self.gpg_key_primary_keyid
            .clone()
            .or_else(|| {
                self.gpg_key_id.as_ref().map(|id| match id {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
            .or_else(|| self.key.as_ref().and_then(|k| k.fingerprint.clone()))
            .or_else(|| {
                self.x509_certificate
                    .as_ref()
                    .and_then(|c| c.subject_key_identifier.clone())
            })
    }

    fn signature_type(&self) -> SignatureType {
        match self.signature_type.as_deref() {
            Some("PGP") => SignatureType::Pgp,
            Some("SSH") => SignatureType::Ssh,
            Some("X509") => SignatureType::X509,
            _ => SignatureType::Unknown,
        }
    }
}

/// Queries `GET {server}/api/v4/projects/{path}/repository/commits/{sha}/signature`.
pub struct GitlabCommitVerifier {
    http: reqwest::Client,
    server_url: String,
    project_path: String,
    job_token: Option<String>,
}

impl GitlabCommitVerifier {
    pub fn new(
        server_url: &str,
        project_path: &str,
        job_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            project_path: project_path.to_string(),
            job_token,
        })
    }

    fn signature_url(&self, sha: &str) -> String {
        let project: String =
            url::form_urlencoded::byte_serialize(self.project_path.as_bytes()).collect();
        format!(
            "{}/api/v4/projects/{project}/repository/commits/{sha}/signature",
            self.server_url
        )
    }
}

#[async_trait]
impl CommitVerifier for GitlabCommitVerifier {
    fn platform(&self) -> &'static str {
        PLATFORM
    }

    async fn verify(&self, sha: &str) -> CommitVerification {
        let url = self.signature_url(sha);
        let mut request = self.http.get(&url);
        if let Some(token) = &self.job_token {
            request = request.header("JOB-TOKEN", token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return CommitVerification::unavailable(PLATFORM, format!("request failed: {e}")),
        };
        debug!(url, status = %response.status(), "GitLab signature lookup");

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return CommitVerification::new(
                VerificationStatus::NotApplicable,
                PLATFORM,
                "commit is not signed",
            );
        }
        if !status.is_success() {
            return CommitVerification::from_http_status(PLATFORM, status);
        }

        let body = match read_limited(response).await {
            Ok(body) => body,
            Err(reason) => return CommitVerification::unavailable(PLATFORM, reason),
        };
        let parsed: SignatureResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return CommitVerification::unavailable(PLATFORM, format!("invalid response: {e}"))
            }
        };

        let status = if parsed.verification_status == "verified" {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Unverified
        };
        let mut result = CommitVerification::new(status, PLATFORM, parsed.verification_status.clone());
        if status == VerificationStatus::Verified {
            result.key_id = parsed.key_id();
            result.signature_algorithm = Some(parsed.signature_type());
        }
        result
    }
}
