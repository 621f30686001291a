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

//! Persistence of the crafting state.
//!
//! Every backend follows the same optimistic concurrency contract: a read
//! hands back the state together with an opaque version token, and a write
//! carrying a token the store has moved past is rejected with
//! [`CrafterError::StateConflict`]. Nothing is ever locked. Callers that hit
//! a conflict re-read, re-apply their change and write again, usually
//! through [`retry_on_conflict`].

use std::collections::BTreeMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RetryPolicy;
use crate::errors::{CrafterError, Result};
use crate::git::HeadCommit;
use crate::materials::Material;
use crate::policies::PolicyEvaluation;
use crate::runners::RunnerInfo;
use crate::schema::CraftingSchema;

mod filesystem;
mod memory;
mod remote;

pub use filesystem::FilesystemStateManager;
pub use memory::MemoryStateService;
pub use remote::{HttpStateService, RemoteStateManager, StateService};

/// A value together with the version token of the store it was read from.
///
/// `version` is `None` for a value that was never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Option<String>,
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            version: None,
        }
    }

    pub fn with_version(value: T, version: impl Into<String>) -> Self {
        Self {
            value,
            version: Some(version.into()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub organization: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_id: String,
    /// Identifies the run, and so the state, in the remote state service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_run_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contract_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contract_revision: String,
}

/// How the rendered attestation will be signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningOptions {
    /// Ephemeral key certified for the workload identity instead of a
    /// long lived key.
    #[serde(default)]
    pub keyless: bool,
    pub signing_scheme: String,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            keyless: false,
            signing_scheme: crate::crypto::SigningScheme::default().to_string(),
        }
    }
}

/// The in-progress attestation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingState {
    pub metadata: WorkflowMetadata,
    pub schema: CraftingSchema,
    #[serde(default)]
    pub materials: BTreeMap<String, Material>,
    /// Attestation level annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub policy_evaluations: Vec<PolicyEvaluation>,
    pub runner: RunnerInfo,
    /// Variables from the schema allow list, on top of the runner's own.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub signing: SigningOptions,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<HeadCommit>,
    pub started_at: DateTime<Utc>,
}

impl CraftingState {
    /// Key under which the state is persisted.
    pub fn key(&self) -> &str {
        state_key(&self.metadata)
    }

    /// Names of required schema materials not added yet.
    pub fn missing_required_materials(&self) -> Vec<String> {
        self.schema
            .required_materials()
            .filter(|m| !self.materials.contains_key(&m.name))
            .map(|m| m.name.clone())
            .collect()
    }
}

/// Runs without a run id (local, contract-only runs) share a single key.
pub const LOCAL_STATE_KEY: &str = "local";

pub(crate) fn state_key(metadata: &WorkflowMetadata) -> &str {
    if metadata.workflow_run_id.is_empty() {
        LOCAL_STATE_KEY
    } else {
        &metadata.workflow_run_id
    }
}

/// A store for crafting states.
#[async_trait]
pub trait StateManager: Send + Sync {
    /// Whether a state exists for `key`.
    async fn initialized(&self, key: &str) -> Result<bool>;

    /// Persist `state`, returning the new version token.
    ///
    /// Fails with [`CrafterError::StateConflict`] if the stored version is
    /// not `state.version` anymore.
    async fn write(&self, key: &str, state: &Versioned<CraftingState>) -> Result<String>;

    async fn read(&self, key: &str) -> Result<Versioned<CraftingState>>;

    async fn reset(&self, key: &str) -> Result<()>;

    /// Human readable location of the state, for diagnostics only.
    fn info(&self, key: &str) -> String;
}

/// Run `op` until it succeeds or fails with anything but a state conflict,
/// backing off exponentially between attempts.
///
/// `op` must redo the whole read-modify-write sequence: retrying only the
/// write would send the same stale version token again.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < policy.max_attempts => {
                let backoff = policy.backoff(attempt);
                warn!(attempt, ?backoff, "crafting state changed concurrently, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) if e.is_conflict() => {
                warn!(attempts = attempt, "giving up after repeated state conflicts");
                return Err(e);
            }
            other => return other,
        }
    }
}

pub(crate) fn conflict(key: &str) -> CrafterError {
    CrafterError::StateConflict {
        key: key.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::runners::RunnerType;

    pub(crate) fn sample_state(run_id: &str) -> CraftingState {
        CraftingState {
            metadata: WorkflowMetadata {
                organization: "acme".into(),
                project: "app".into(),
                name: "build".into(),
                workflow_run_id: run_id.into(),
                ..Default::default()
            },
            schema: CraftingSchema::default(),
            materials: BTreeMap::new(),
            annotations: BTreeMap::new(),
            policy_evaluations: Vec::new(),
            runner: RunnerInfo {
                runner_type: RunnerType::Unspecified,
                ..Default::default()
            },
            env_vars: BTreeMap::new(),
            signing: SigningOptions::default(),
            dry_run: false,
            head_commit: None,
            started_at: Utc::now(),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn runs_without_id_use_local_key() {
        assert_eq!(sample_state("").key(), LOCAL_STATE_KEY);
        assert_eq!(sample_state("run-7").key(), "run-7");
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_on_conflict(&fast_policy(5), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict("run-1"))
                } else {
                    Ok("written")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "written");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = retry_on_conflict(&fast_policy(3), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(conflict("run-1"))
            }
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = retry_on_conflict(&fast_policy(5), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CrafterError::MissingSchema)
            }
        })
        .await;
        assert!(matches!(result, Err(CrafterError::MissingSchema)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
