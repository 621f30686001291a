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

//! Policy evaluation results and the interface to the policy engine.
//!
//! The engine itself lives outside this crate. The crafter hands it a
//! material or a statement together with the schema, and records the
//! [`PolicyEvaluation`]s it returns in the crafting state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::attestation::Statement;
use crate::errors::Result;
use crate::materials::Material;
use crate::schema::CraftingSchema;

/// Point of the crafting lifecycle at which attestation level policies run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationPhase {
    Init,
    Push,
}

impl fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvaluationPhase::Init => "INIT",
            EvaluationPhase::Push => "PUSH",
        })
    }
}

/// Identity of a policy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    pub name: String,
    /// Material the evaluation is scoped to, empty for attestation level.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub material_name: String,
    pub reference: PolicyReference,
    #[serde(default)]
    pub with: BTreeMap<String, String>,
    #[serde(default)]
    pub gate: bool,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_reasons: Vec<String>,
    /// Phases an attestation level evaluation ran in.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<EvaluationPhase>,
}

impl PolicyEvaluation {
    pub fn is_material_scoped(&self) -> bool {
        !self.material_name.is_empty()
    }

    /// Violated and configured to block.
    pub fn blocks(&self) -> bool {
        self.gate && !self.skipped && !self.violations.is_empty()
    }

    /// Two evaluations are duplicates when they reference the same policy
    /// with the same arguments against the same scope.
    fn identity(&self) -> (&PolicyReference, &BTreeMap<String, String>, &str) {
        (&self.reference, &self.with, &self.material_name)
    }

    pub(crate) fn violation_messages(&self) -> impl Iterator<Item = String> + '_ {
        self.violations
            .iter()
            .map(move |v| format!("{}: {v}", self.name))
    }
}

/// Drop duplicate evaluations, keeping the last occurrence of each. The
/// phases of the dropped occurrences carry over to the survivor.
pub fn dedup(evaluations: Vec<PolicyEvaluation>) -> Vec<PolicyEvaluation> {
    let mut kept: Vec<PolicyEvaluation> = Vec::with_capacity(evaluations.len());
    for mut evaluation in evaluations {
        match kept.iter().position(|k| k.identity() == evaluation.identity()) {
            Some(i) => {
                let phases: BTreeSet<EvaluationPhase> = kept[i]
                    .phases
                    .drain(..)
                    .chain(evaluation.phases.drain(..))
                    .collect();
                evaluation.phases = phases.into_iter().collect();
                kept[i] = evaluation;
            }
            None => kept.push(evaluation),
        }
    }
    kept
}

/// Merge a fresh attestation level run for `phase` into prior results.
///
/// Material scoped evaluations are always kept. Attestation level ones
/// lose `phase`, which `fresh` now speaks for, and are dropped once no other
/// phase is left. A fresh evaluation matching a prior one inherits the
/// prior's other phases.
pub fn merge_evaluations(
    prior: Vec<PolicyEvaluation>,
    fresh: Vec<PolicyEvaluation>,
    phase: EvaluationPhase,
) -> Vec<PolicyEvaluation> {
    let retained = prior.into_iter().filter_map(|mut e| {
        if e.is_material_scoped() || !e.phases.contains(&phase) {
            return Some(e);
        }
        e.phases.retain(|p| *p != phase);
        (!e.phases.is_empty()).then_some(e)
    });

    let fresh = fresh.into_iter().map(|mut e| {
        let phases: BTreeSet<EvaluationPhase> = e.phases.drain(..).chain([phase]).collect();
        e.phases = phases.into_iter().collect();
        e
    });

    dedup(retained.chain(fresh).collect())
}

/// The policy engine, opaque to the crafter.
#[async_trait]
pub trait PolicyVerifier: Send + Sync {
    /// Run the policy groups and then the individual policies the schema
    /// attaches to a material. One call covers both passes, group results
    /// first.
    async fn verify_material(
        &self,
        schema: &CraftingSchema,
        material: &Material,
    ) -> Result<Vec<PolicyEvaluation>>;

    /// Run attestation level policy groups and then policies for the given
    /// phase, group results first.
    async fn verify_statement(
        &self,
        schema: &CraftingSchema,
        statement: &Statement,
        phase: EvaluationPhase,
    ) -> Result<Vec<PolicyEvaluation>>;
}

/// Verifier for deployments without a policy engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPolicyVerifier;

#[async_trait]
impl PolicyVerifier for NoopPolicyVerifier {
    async fn verify_material(
        &self,
        _schema: &CraftingSchema,
        _material: &Material,
    ) -> Result<Vec<PolicyEvaluation>> {
        Ok(Vec::new())
    }

    async fn verify_statement(
        &self,
        _schema: &CraftingSchema,
        _statement: &Statement,
        _phase: EvaluationPhase,
    ) -> Result<Vec<PolicyEvaluation>> {
        Ok(Vec::new())
    }
}
