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

//! Server-side commit signature verification.
//!
//! Source hosting platforms verify commit signatures against the keys their
//! users registered. This module asks the platform for its verdict on the
//! HEAD commit. The result is advisory evidence: every failure mode maps to
//! a [`VerificationStatus`] and nothing here returns an error to the crafter.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::CrafterConfig;
use crate::git::{HeadCommit, Remote};
use crate::runners::EnvLookup;

pub mod github;
pub mod gitlab;
mod pgp;

pub use github::GitHubCommitVerifier;
pub use gitlab::GitlabCommitVerifier;

/// Responses above this size are not decoded.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Unverified,
    /// The platform could not be asked, or did not answer usefully.
    Unavailable,
    /// The platform has nothing to verify, e.g. the commit is unsigned.
    NotApplicable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureType {
    Pgp,
    Ssh,
    X509,
    Unknown,
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignatureType::Pgp => "PGP",
            SignatureType::Ssh => "SSH",
            SignatureType::X509 => "X509",
            SignatureType::Unknown => "UNKNOWN",
        })
    }
}

/// Guess the signature format from its armor header.
pub fn detect_signature_type(signature: &str) -> SignatureType {
    let signature = signature.trim_start();
    if signature.starts_with("-----BEGIN PGP SIGNATURE-----") {
        SignatureType::Pgp
    } else if signature.starts_with("-----BEGIN SSH SIGNATURE-----") {
        SignatureType::Ssh
    } else if signature.starts_with("-----BEGIN SIGNED MESSAGE-----")
        || signature.starts_with("-----BEGIN CERTIFICATE-----")
    {
        SignatureType::X509
    } else {
        SignatureType::Unknown
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitVerification {
    pub status: VerificationStatus,
    pub platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_algorithm: Option<SignatureType>,
}

impl CommitVerification {
    pub fn new(status: VerificationStatus, platform: &str, reason: impl Into<String>) -> Self {
        Self {
            status,
            platform: platform.to_string(),
            reason: reason.into(),
            key_id: None,
            signature_algorithm: None,
        }
    }

    pub(crate) fn unavailable(platform: &str, reason: impl Into<String>) -> Self {
        Self::new(VerificationStatus::Unavailable, platform, reason)
    }

    /// Outcome for a non-2xx answer. 404 is left to the caller since its
    /// meaning differs per platform.
    pub(crate) fn from_http_status(platform: &str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::unavailable(
                platform,
                format!("authentication failed (HTTP {})", status.as_u16()),
            ),
            code => Self::unavailable(platform, format!("unexpected response (HTTP {code})")),
        }
    }
}

/// Asks a hosting platform whether a commit signature verified.
#[async_trait]
pub trait CommitVerifier: Send + Sync {
    fn platform(&self) -> &'static str;

    async fn verify(&self, sha: &str) -> CommitVerification;
}

/// Read a response body, refusing anything above [`MAX_RESPONSE_SIZE`].
pub(crate) async fn read_limited(mut response: reqwest::Response) -> Result<Vec<u8>, String> {
    if response
        .content_length()
        .is_some_and(|len| len > MAX_RESPONSE_SIZE as u64)
    {
        return Err(format!("response exceeds {MAX_RESPONSE_SIZE} bytes"));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| format!("reading response: {e}"))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_SIZE {
            return Err(format!("response exceeds {MAX_RESPONSE_SIZE} bytes"));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Location of a repository on a hosting platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryCoordinates {
    GitHub { owner_repo: String },
    Gitlab { server_url: String, project_path: String },
}

/// Split a remote URL into host and repository path, `.git` suffix and
/// credentials dropped. Handles both URL and scp-like forms.
pub(crate) fn parse_remote(url: &str) -> Option<(String, String)> {
    let (host, path) = if let Ok(parsed) = Url::parse(url) {
        (parsed.host_str()?.to_string(), parsed.path().to_string())
    } else {
        // git@github.com:owner/repo.git
        let (user_host, path) = url.split_once(':')?;
        let host = user_host.rsplit('@').next()?;
        (host.to_string(), path.to_string())
    };
    let path = path.trim_matches('/').trim_end_matches(".git").to_string();
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some((host, path))
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// Work out which platform hosts the repository.
///
/// Coordinates exposed by the runner take precedence over git remotes,
/// since a remote can be rewritten by the job itself.
pub fn resolve_coordinates(remotes: &[Remote], env: &dyn EnvLookup) -> Option<RepositoryCoordinates> {
    if let Some(owner_repo) = env.var("GITHUB_REPOSITORY") {
        return Some(RepositoryCoordinates::GitHub { owner_repo });
    }
    if let (Some(server_url), Some(project_path)) =
        (env.var("CI_SERVER_URL"), env.var("CI_PROJECT_PATH"))
    {
        return Some(RepositoryCoordinates::Gitlab {
            server_url,
            project_path,
        });
    }

    let gitlab_host = env
        .var("CI_SERVER_URL")
        .and_then(|u| host_of(&u))
        .unwrap_or_else(|| "gitlab.com".to_string());

    // origin first, then the rest in the order git lists them
    let ordered = remotes
        .iter()
        .filter(|r| r.name == "origin")
        .chain(remotes.iter().filter(|r| r.name != "origin"));
    for remote in ordered {
        let Some((host, path)) = parse_remote(&remote.url) else {
            continue;
        };
        if host == "github.com" {
            return Some(RepositoryCoordinates::GitHub { owner_repo: path });
        }
        if host == gitlab_host {
            return Some(RepositoryCoordinates::Gitlab {
                server_url: format!("https://{host}"),
                project_path: path,
            });
        }
    }
    None
}

/// Build the verifier for the platform hosting the repository.
pub fn verifier_for(
    remotes: &[Remote],
    env: &dyn EnvLookup,
    config: &CrafterConfig,
) -> Option<Box<dyn CommitVerifier>> {
    let coordinates = resolve_coordinates(remotes, env)?;
    let built: crate::errors::Result<Box<dyn CommitVerifier>> = match coordinates {
        RepositoryCoordinates::GitHub { owner_repo } => GitHubCommitVerifier::new(
            &config.github_api_url,
            &owner_repo,
            env.var("GITHUB_TOKEN"),
            config.commit_verification_timeout,
        )
        .map(|v| Box::new(v) as Box<dyn CommitVerifier>),
        RepositoryCoordinates::Gitlab {
            server_url,
            project_path,
        } => GitlabCommitVerifier::new(
            &server_url,
            &project_path,
            env.var("CI_JOB_TOKEN"),
            config.commit_verification_timeout,
        )
        .map(|v| Box::new(v) as Box<dyn CommitVerifier>),
    };
    match built {
        Ok(verifier) => Some(verifier),
        Err(e) => {
            warn!(error = %e, "cannot build commit verifier");
            None
        }
    }
}

/// Best-effort verification of the HEAD commit.
///
/// Returns `None` when the hosting platform cannot be determined.
pub async fn verify_head_commit(
    head: &HeadCommit,
    env: &dyn EnvLookup,
    config: &CrafterConfig,
) -> Option<CommitVerification> {
    let verifier = verifier_for(&head.remotes, env, config)?;

    if head.signature.is_none() {
        return Some(CommitVerification::new(
            VerificationStatus::NotApplicable,
            verifier.platform(),
            "commit is not signed",
        ));
    }

    let verification = verifier.verify(&head.hash).await;
    match verification.status {
        VerificationStatus::Unavailable => warn!(
            platform = verification.platform,
            reason = %verification.reason,
            "commit signature verification unavailable"
        ),
        status => debug!(platform = verification.platform, ?status, "commit signature checked"),
    }
    Some(verification)
}
