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

//! Snapshot of the HEAD commit of the repository the crafter runs in.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::commit_verification::CommitVerification;
use crate::errors::{CrafterError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadCommit {
    pub hash: String,
    pub author_email: String,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(default)]
    pub remotes: Vec<Remote>,
    /// Armored PGP, SSH or X.509 signature of the commit object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<CommitVerification>,
}

async fn git(dir: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = match Command::new("git").arg("-C").arg(dir).args(args).output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("git executable not found");
            return Ok(None);
        }
        Err(e) => return Err(CrafterError::Git(format!("running git {}: {e}", args.join(" ")))),
    };
    if !output.status.success() {
        return Ok(None);
    }
    String::from_utf8(output.stdout)
        .map(Some)
        .map_err(|e| CrafterError::Git(format!("git {} output: {e}", args.join(" "))))
}

/// Read the HEAD commit of the repository containing `dir`.
///
/// Returns `Ok(None)` when `dir` is not inside a repository, the repository
/// has no commits yet, or git is not installed.
pub async fn head_commit(dir: &Path) -> Result<Option<HeadCommit>> {
    if git(dir, &["rev-parse", "--is-inside-work-tree"]).await?.is_none() {
        debug!(dir = %dir.display(), "not a git repository");
        return Ok(None);
    }

    let Some(log) = git(dir, &["log", "-1", "--format=%H%x00%an%x00%ae%x00%cI%x00%B"]).await? else {
        debug!("repository has no commits");
        return Ok(None);
    };

    let mut fields = log.splitn(5, '\0');
    let mut next = || fields.next().unwrap_or_default().to_string();
    let hash = next();
    let author_name = next();
    let author_email = next();
    let date = DateTime::parse_from_rfc3339(next().trim())
        .ok()
        .map(|d| d.with_timezone(&Utc));
    let message = next().trim_end().to_string();

    let remotes = match git(dir, &["remote", "-v"]).await? {
        Some(out) => parse_remotes(&out),
        None => Vec::new(),
    };

    let signature = match git(dir, &["cat-file", "commit", "HEAD"]).await? {
        Some(raw) => extract_signature(&raw),
        None => None,
    };

    Ok(Some(HeadCommit {
        hash,
        author_email,
        author_name,
        date,
        message,
        remotes,
        signature,
        verification: None,
    }))
}

/// Parse `git remote -v`, keeping the fetch URL of each remote.
fn parse_remotes(output: &str) -> Vec<Remote> {
    let mut remotes: Vec<Remote> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(Remote {
            name: name.to_string(),
            url: strip_credentials(url),
        });
    }
    remotes
}

/// Remove user info from a remote URL so tokens never reach the attestation.
pub fn strip_credentials(remote: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url) if url.has_host() => {
            if url.scheme() != "ssh" {
                let _ = url.set_username("");
            }
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => remote.to_string(),
    }
}

/// Pull the `gpgsig` header out of a raw commit object. Continuation lines
/// of a header start with a single space.
fn extract_signature(raw_commit: &str) -> Option<String> {
    let mut signature: Option<Vec<&str>> = None;
    for line in raw_commit.lines() {
        if line.is_empty() {
            // end of headers
            break;
        }
        match signature.as_mut() {
            Some(lines) => match line.strip_prefix(' ') {
                Some(continuation) => lines.push(continuation),
                None => break,
            },
            None => {
                if let Some(first) = line
                    .strip_prefix("gpgsig ")
                    .or_else(|| line.strip_prefix("gpgsig-sha256 "))
                {
                    signature = Some(vec![first]);
                }
            }
        }
    }
    signature.map(|lines| lines.join("\n"))
}
