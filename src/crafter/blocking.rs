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

//! Synchronous wrapper around [`super::Crafter`].
//!
//! Every call blocks on a private current-thread runtime, so this type
//! cannot be used from within an asynchronous context.

use std::collections::BTreeMap;

use super::{Crafter as AsyncCrafter, InitOptions};
use crate::attestation::{RenderedAttestation, Renderer, Statement};
use crate::crypto::Signer;
use crate::errors::Result;
use crate::materials::Material;
use crate::policies::{EvaluationPhase, PolicyEvaluation};
use crate::runners::Runner;
use crate::state::CraftingState;

pub struct Crafter {
    inner: AsyncCrafter,
    rt: tokio::runtime::Runtime,
}

impl Crafter {
    pub fn new(inner: AsyncCrafter) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { inner, rt })
    }

    pub fn state(&self) -> Option<&CraftingState> {
        self.inner.state()
    }

    pub fn init(&mut self, opts: InitOptions, runner: &Runner) -> Result<()> {
        self.rt.block_on(self.inner.init(opts, runner))
    }

    pub fn load_state(&mut self, key: &str) -> Result<()> {
        self.rt.block_on(self.inner.load_state(key))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.rt.block_on(self.inner.reset())
    }

    pub fn add_material_from_contract(
        &mut self,
        name: &str,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        self.rt
            .block_on(self.inner.add_material_from_contract(name, value, annotations))
    }

    pub fn add_material_contract_free(
        &mut self,
        kind: &str,
        name: Option<&str>,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        self.rt.block_on(
            self.inner
                .add_material_contract_free(kind, name, value, annotations),
        )
    }

    pub fn add_material_auto_detect(
        &mut self,
        name: Option<&str>,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        self.rt
            .block_on(self.inner.add_material_auto_detect(name, value, annotations))
    }

    pub fn evaluate_attestation_policies(
        &mut self,
        statement: &Statement,
        phase: EvaluationPhase,
    ) -> Result<Vec<PolicyEvaluation>> {
        self.rt
            .block_on(self.inner.evaluate_attestation_policies(statement, phase))
    }

    pub fn validate_attestation(&self) -> Result<()> {
        self.inner.validate_attestation()
    }

    pub fn render<S: Signer>(&self, renderer: &Renderer<S>) -> Result<RenderedAttestation> {
        self.inner.render(renderer)
    }
}
