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

//! Crafting schema, the contract an attestation is crafted against.
//!
//! A schema declares which materials the workflow must provide, the
//! annotations they carry, the policies attached to them and the runner the
//! workflow is expected to execute on. Schemas are plain JSON documents:
//!
//! ```json
//! {
//!   "schemaVersion": "v1",
//!   "runner": {"type": "GITHUB_ACTION"},
//!   "materials": [
//!     {"name": "image", "type": "CONTAINER_IMAGE", "output": true},
//!     {"name": "sbom", "type": "SBOM_CYCLONEDX_JSON",
//!      "annotations": [{"name": "component", "value": ""}]}
//!   ],
//!   "policies": {"materials": [{"ref": "no-critical-vulns", "gate": true}]}
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::{CrafterError, Result};
use crate::materials::MaterialKind;
use crate::runners::RunnerType;

pub const SCHEMA_VERSION_V1: &str = "v1";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    /// Empty means the value must be supplied when the material is added.
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MaterialKind,
    #[serde(default)]
    pub optional: bool,
    /// Output materials become subjects of the rendered statement.
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSpec {
    #[serde(rename = "type", default)]
    pub runner_type: RunnerType,
}

/// A policy attached to the contract. Evaluation is delegated to the
/// configured [`crate::policies::PolicyVerifier`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAttachment {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub with: BTreeMap<String, String>,
    /// Violations block the operation instead of only being reported.
    #[serde(default)]
    pub gate: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub materials: Vec<PolicyAttachment>,
    #[serde(default)]
    pub attestation: Vec<PolicyAttachment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingSchema {
    pub schema_version: String,
    #[serde(default)]
    pub materials: Vec<MaterialDefinition>,
    /// Extra environment variables recorded with the runner metadata.
    #[serde(default)]
    pub env_allow_list: Vec<String>,
    #[serde(default)]
    pub runner: RunnerSpec,
    /// Attestation level annotations.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub policies: Policies,
    #[serde(default)]
    pub policy_groups: Vec<PolicyAttachment>,
}

impl Default for CraftingSchema {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            materials: Vec::new(),
            env_allow_list: Vec::new(),
            runner: RunnerSpec::default(),
            annotations: Vec::new(),
            policies: Policies::default(),
            policy_groups: Vec::new(),
        }
    }
}

impl CraftingSchema {
    /// Parse and validate a JSON schema document.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let schema: CraftingSchema = serde_json::from_slice(raw)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION_V1 {
            return Err(CrafterError::UnexpectedError(format!(
                "unsupported schema version {}",
                self.schema_version
            )));
        }

        let mut seen = HashSet::new();
        for material in &self.materials {
            if material.name.is_empty() {
                return Err(CrafterError::UnexpectedError(
                    "schema declares a material without a name".into(),
                ));
            }
            if !seen.insert(material.name.as_str()) {
                return Err(CrafterError::UnexpectedError(format!(
                    "schema declares material {} twice",
                    material.name
                )));
            }
        }
        Ok(())
    }

    pub fn material(&self, name: &str) -> Option<&MaterialDefinition> {
        self.materials.iter().find(|m| m.name == name)
    }

    pub fn required_materials(&self) -> impl Iterator<Item = &MaterialDefinition> {
        self.materials.iter().filter(|m| !m.optional)
    }

    pub fn expected_runner(&self) -> RunnerType {
        self.runner.runner_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "schemaVersion": "v1",
        "runner": {"type": "GITLAB_PIPELINE"},
        "materials": [
            {"name": "image", "type": "CONTAINER_IMAGE", "output": true},
            {"name": "sbom", "type": "SBOM_CYCLONEDX_JSON", "optional": true,
             "annotations": [{"name": "component"}]}
        ],
        "policies": {"materials": [{"ref": "sbom-freshness", "with": {"days": "30"}, "gate": true}]}
    }"#;

    #[test]
    fn parses_contract() {
        let schema = CraftingSchema::from_json(SCHEMA.as_bytes()).unwrap();
        assert_eq!(schema.expected_runner(), RunnerType::GitlabPipeline);
        assert_eq!(
            schema.required_materials().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["image"]
        );
        let sbom = schema.material("sbom").unwrap();
        assert_eq!(sbom.kind, MaterialKind::SbomCyclonedxJson);
        assert_eq!(sbom.annotations[0].value, "");
        assert!(schema.policies.materials[0].gate);
    }

    #[test]
    fn rejects_duplicate_material_names() {
        let raw = r#"{"schemaVersion": "v1", "materials": [
            {"name": "a", "type": "STRING"}, {"name": "a", "type": "GENERIC"}]}"#;
        assert!(CraftingSchema::from_json(raw.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unknown_version() {
        let raw = r#"{"schemaVersion": "v0"}"#;
        assert!(CraftingSchema::from_json(raw.as_bytes()).is_err());
    }
}
