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

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::HeadCommit;
use crate::materials::{Material, MaterialKind, MaterialValue};
use crate::policies::PolicyEvaluation;
use crate::runners::{RunnerEnvironment, RunnerType};
use crate::state::{CraftingState, WorkflowMetadata};

/// Predicate type of the crafted attestations.
pub const PREDICATE_TYPE_V0_2: &str = "https://chainloop.dev/attestation/v0.2";

/// Build type recorded in every predicate.
pub const BUILD_TYPE: &str = "chainloop.dev/workflowrun/v0.1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub build_type: String,
    pub metadata: PredicateMetadata,
    pub materials: Vec<PredicateMaterial>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub runner: PredicateRunner,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_evaluations: Vec<PolicyEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredicateMetadata {
    #[serde(flatten)]
    pub workflow: WorkflowMetadata,
    pub initialized_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredicateRunner {
    #[serde(rename = "type")]
    pub runner_type: RunnerType,
    pub url: String,
    pub environment: RunnerEnvironment,
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_file_path: String,
}

/// A material as recorded in the predicate. Inline artifact content is left
/// out, its digest identifies it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredicateMaterial {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MaterialKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub digest: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub output: bool,
    pub added_at: DateTime<Utc>,
}

impl From<&Material> for PredicateMaterial {
    fn from(material: &Material) -> Self {
        Self {
            name: material.name.clone(),
            kind: material.kind,
            value: display_value(&material.value),
            digest: material
                .digest()
                .map(|d| BTreeMap::from([("sha256".to_string(), d.to_string())]))
                .unwrap_or_default(),
            annotations: material.annotations.clone(),
            output: material.output,
            added_at: material.added_at,
        }
    }
}

/// Human readable value of a material, also used as subject name.
pub(crate) fn display_value(value: &MaterialValue) -> String {
    match value {
        MaterialValue::String { value } => value.clone(),
        MaterialValue::ContainerImage { name, tag: None } => name.clone(),
        MaterialValue::ContainerImage {
            name,
            tag: Some(tag),
        } => format!("{name}:{tag}"),
        MaterialValue::Artifact { file_name, .. } => file_name.clone(),
    }
}

impl Predicate {
    pub fn from_state(state: &CraftingState, finished_at: DateTime<Utc>) -> Self {
        Self {
            build_type: BUILD_TYPE.to_string(),
            metadata: PredicateMetadata {
                workflow: state.metadata.clone(),
                initialized_at: state.started_at,
                finished_at,
            },
            materials: state.materials.values().map(PredicateMaterial::from).collect(),
            annotations: state.annotations.clone(),
            env: state.env_vars.clone(),
            runner: PredicateRunner {
                runner_type: state.runner.runner_type,
                url: state.runner.url.clone(),
                environment: state.runner.environment,
                authenticated: state.runner.authenticated,
                workflow_file_path: state.runner.workflow_file_path.clone(),
            },
            policy_evaluations: state.policy_evaluations.clone(),
            head_commit: state.head_commit.clone(),
        }
    }
}
