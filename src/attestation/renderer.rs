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

use std::path::Path;

use chrono::Utc;
use tracing::info;

use super::bundle::Bundle;
use super::dsse::{DsseSigner, Envelope};
use super::predicate::{display_value, Predicate, PREDICATE_TYPE_V0_2};
use super::statement::{Statement, StatementBuilder, Subject};
use crate::crypto::Signer;
use crate::errors::Result;
use crate::materials::{Material, MaterialValue};
use crate::state::CraftingState;

pub const SUBJECT_ANNOTATION_NAME: &str = "material.name";
pub const SUBJECT_ANNOTATION_TYPE: &str = "material.type";

/// A signed attestation, ready to be stored or pushed.
#[derive(Debug, Clone)]
pub struct RenderedAttestation {
    pub statement: Statement,
    pub envelope: Envelope,
    pub bundle: Bundle,
}

impl RenderedAttestation {
    /// Write the bundle as JSON to `path`.
    pub async fn write_bundle(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, self.bundle.to_json_pretty()?).await?;
        info!(path = %path.display(), "attestation bundle written");
        Ok(())
    }
}

/// Turns a finished crafting state into a signed attestation.
pub struct Renderer<S> {
    signer: DsseSigner<S>,
}

impl<S: Signer> Renderer<S> {
    pub fn new(signer: S) -> Self {
        Self {
            signer: DsseSigner::new(signer),
        }
    }

    /// Build and validate the in-toto statement for `state`.
    pub fn statement(&self, state: &CraftingState) -> Result<Statement> {
        let predicate = Predicate::from_state(state, Utc::now());
        StatementBuilder::new()
            .subjects(subjects(state))
            .predicate_type(PREDICATE_TYPE_V0_2)
            .predicate(serde_json::to_value(predicate)?)
            .build()
    }

    /// Render, sign and bundle the attestation for `state`.
    pub fn render(&self, state: &CraftingState) -> Result<RenderedAttestation> {
        let statement = self.statement(state)?;
        let envelope = self.sign_statement(&statement)?;
        let bundle = Bundle::new(envelope.clone(), self.signer.leaf_certificate());

        info!(
            subjects = statement.subject.len(),
            keyless = bundle.verification_material.is_some(),
            "attestation rendered"
        );
        Ok(RenderedAttestation {
            statement,
            envelope,
            bundle,
        })
    }

    /// Sign an already built statement.
    pub fn sign_statement(&self, statement: &Statement) -> Result<Envelope> {
        statement.validate()?;
        self.signer.sign_envelope(&serde_json::to_vec(statement)?)
    }
}

/// Output materials are the subjects. Without any, every hashed material is.
fn subjects(state: &CraftingState) -> Vec<Subject> {
    let hashed: Vec<&Material> = state
        .materials
        .values()
        .filter(|m| m.digest().is_some())
        .collect();
    let outputs: Vec<&Material> = hashed.iter().copied().filter(|m| m.output).collect();
    let chosen = if outputs.is_empty() { hashed } else { outputs };

    chosen.into_iter().filter_map(subject).collect()
}

fn subject(material: &Material) -> Option<Subject> {
    let name = match &material.value {
        MaterialValue::String { .. } => material.name.clone(),
        MaterialValue::ContainerImage { name, .. } => name.clone(),
        value => display_value(value),
    };
    let mut subject = Subject::new(name, "sha256", material.digest()?);
    for (key, value) in &material.annotations {
        subject = subject.with_annotation(key, value);
    }
    // Reserved keys win over material annotations of the same name.
    Some(
        subject
            .with_annotation(SUBJECT_ANNOTATION_NAME, &material.name)
            .with_annotation(SUBJECT_ANNOTATION_TYPE, material.kind.as_str()),
    )
}
