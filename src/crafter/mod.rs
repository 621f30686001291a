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

//! The crafting state machine.
//!
//! A [`Crafter`] goes through `uninitialized -> initialized -> (materials
//! added)* -> validated`. Every mutation is persisted through the configured
//! [`StateManager`] before it becomes visible in memory, so an aborted or
//! timed out write never advances the local state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::attestation::{RenderedAttestation, Renderer, Statement};
use crate::commit_verification::verify_head_commit;
use crate::config::CrafterConfig;
use crate::crypto::Signer;
use crate::errors::{CrafterError, Result};
use crate::git;
use crate::materials::{ArtifactUploader, Material, MaterialCrafter, MaterialKind};
use crate::policies::{
    dedup, merge_evaluations, EvaluationPhase, NoopPolicyVerifier, PolicyEvaluation,
    PolicyVerifier,
};
use crate::runners::{Runner, RunnerInfo, RunnerType};
use crate::schema::{MaterialDefinition, CraftingSchema};
use crate::state::{
    retry_on_conflict, state_key, CraftingState, SigningOptions, StateManager, Versioned,
    WorkflowMetadata,
};

pub mod blocking;

/// Prefix of the names given to contract free materials added without one.
pub const GENERATED_NAME_PREFIX: &str = "material-";

/// Inputs of [`Crafter::init`].
#[derive(Clone, Debug, Default)]
pub struct InitOptions {
    pub schema: Option<CraftingSchema>,
    pub metadata: Option<WorkflowMetadata>,
    pub dry_run: bool,
    pub signing: SigningOptions,
    /// Values for the attestation annotations the schema leaves blank.
    pub annotations: BTreeMap<String, String>,
}

/// Result of trying one kind during auto-detection.
enum AutoDetectOutcome {
    /// The value is not of this kind, try the next one.
    Miss(CrafterError),
    /// A gated policy rejected the material.
    PolicyViolation(CrafterError),
    /// The value matched but the material could not be stored.
    HardFailure(CrafterError),
    Added(Material),
}

impl AutoDetectOutcome {
    /// The value could not be crafted as the kind being tried. Only a value
    /// that is not of that kind lets the loop move on.
    fn craft_failed(error: CrafterError) -> Self {
        match error {
            CrafterError::MaterialValidation { .. } => AutoDetectOutcome::Miss(error),
            error => AutoDetectOutcome::HardFailure(error),
        }
    }

    /// The value crafted fine, so the kind is settled whatever happens next.
    fn stored(result: Result<Material>) -> Self {
        match result {
            Ok(material) => AutoDetectOutcome::Added(material),
            Err(e) if e.is_policy_violation() => AutoDetectOutcome::PolicyViolation(e),
            Err(e) => AutoDetectOutcome::HardFailure(e),
        }
    }
}

pub struct Crafter {
    state_manager: Arc<dyn StateManager>,
    config: CrafterConfig,
    materials: MaterialCrafter,
    policy_verifier: Arc<dyn PolicyVerifier>,
    working_dir: PathBuf,
    state: Option<Versioned<CraftingState>>,
}

impl Crafter {
    pub fn new(state_manager: Arc<dyn StateManager>, config: CrafterConfig) -> Self {
        Self {
            state_manager,
            materials: MaterialCrafter::new(config.max_inline_material_size),
            config,
            policy_verifier: Arc::new(NoopPolicyVerifier),
            working_dir: PathBuf::from("."),
            state: None,
        }
    }

    pub fn with_policy_verifier(mut self, verifier: Arc<dyn PolicyVerifier>) -> Self {
        self.policy_verifier = verifier;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ArtifactUploader>) -> Self {
        self.materials = self.materials.with_uploader(uploader);
        self
    }

    /// Directory whose git repository is snapshotted on init.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// The current state, if one was initialized or loaded.
    pub fn state(&self) -> Option<&CraftingState> {
        self.state.as_ref().map(|s| &s.value)
    }

    fn loaded(&self) -> Result<&Versioned<CraftingState>> {
        self.state.as_ref().ok_or(CrafterError::StateNotLoaded)
    }

    /// Create and persist a new crafting state for the run `runner` is on.
    pub async fn init(&mut self, opts: InitOptions, runner: &Runner) -> Result<()> {
        let schema = opts.schema.ok_or(CrafterError::MissingSchema)?;
        schema.validate()?;
        let metadata = opts.metadata.ok_or(CrafterError::MissingMetadata)?;
        let dry_run = opts.dry_run || self.config.dry_run;

        let expected = schema.expected_runner();
        if !dry_run && expected != RunnerType::Unspecified && runner.id() != expected {
            return Err(CrafterError::RunnerMismatch {
                expected: expected.to_string(),
                discovered: runner.id().to_string(),
            });
        }

        let runner_info = match runner.report() {
            Ok(info) => info,
            Err(e) if dry_run => {
                warn!(error = %e, "incomplete runner environment, ignored in dry run");
                RunnerInfo {
                    runner_type: runner.id(),
                    url: runner.run_uri(),
                    workflow_file_path: runner.workflow_file_path(),
                    authenticated: runner.is_authenticated(),
                    environment: runner.environment(),
                    ..Default::default()
                }
            }
            Err(e) => return Err(e),
        };

        let env_vars = schema
            .env_allow_list
            .iter()
            .filter_map(|name| runner.env().var(name).map(|v| (name.clone(), v)))
            .collect();

        let mut annotations = BTreeMap::new();
        for annotation in &schema.annotations {
            if !annotation.value.is_empty() {
                annotations.insert(annotation.name.clone(), annotation.value.clone());
            } else if let Some(value) = opts.annotations.get(&annotation.name) {
                annotations.insert(annotation.name.clone(), value.clone());
            }
        }
        for (name, value) in opts.annotations {
            if annotations.get(&name).is_some_and(|v| *v != value) {
                warn!(annotation = %name, "annotation set by the schema cannot be overridden");
                continue;
            }
            annotations.insert(name, value);
        }

        let head_commit = match git::head_commit(&self.working_dir).await {
            Ok(Some(mut head)) => {
                head.verification = verify_head_commit(&head, runner.env(), &self.config).await;
                Some(head)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not snapshot the git repository");
                None
            }
        };

        let state = CraftingState {
            metadata,
            schema,
            materials: BTreeMap::new(),
            annotations,
            policy_evaluations: Vec::new(),
            runner: runner_info,
            env_vars,
            signing: opts.signing,
            dry_run,
            head_commit,
            started_at: Utc::now(),
        };

        let key = state.key().to_string();
        let mut versioned = Versioned::new(state);
        versioned.version = Some(self.state_manager.write(&key, &versioned).await?);
        info!(
            key = %key,
            location = %self.state_manager.info(&key),
            runner = %versioned.value.runner.runner_type,
            dry_run,
            "crafting state initialized"
        );
        self.state = Some(versioned);
        Ok(())
    }

    /// Resume the state persisted under `key`.
    pub async fn load_state(&mut self, key: &str) -> Result<()> {
        let state = self.state_manager.read(key).await?;
        debug!(key, version = ?state.version, "crafting state loaded");
        self.state = Some(state);
        Ok(())
    }

    /// Discard the current state, locally and in the store.
    pub async fn reset(&mut self) -> Result<()> {
        let key = self.loaded()?.value.key().to_string();
        self.state_manager.reset(&key).await?;
        self.state = None;
        info!(key = %key, "crafting state reset");
        Ok(())
    }

    /// Add the material `name` declared in the schema.
    pub async fn add_material_from_contract(
        &mut self,
        name: &str,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        let state = &self.loaded()?.value;
        let definition = state
            .schema
            .material(name)
            .cloned()
            .ok_or_else(|| CrafterError::MaterialNotInSchema {
                name: name.to_string(),
            })?;
        if state.materials.contains_key(name) {
            warn!(material = name, "overriding material already in the attestation");
        }

        self.add_material(definition.kind, name, value, annotations, Some(&definition))
            .await
    }

    /// Add a material of `kind` whether or not the schema declares it.
    ///
    /// A name is generated when none is given.
    pub async fn add_material_contract_free(
        &mut self,
        kind: &str,
        name: Option<&str>,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        let kind: MaterialKind = kind.parse()?;
        let name = self.material_name(name)?;
        let definition = self.contract_definition(&name, kind)?;
        self.add_material(kind, &name, value, annotations, definition.as_ref())
            .await
    }

    /// Add a material, trying every known kind in a fixed order.
    ///
    /// Stops at the first kind that accepts the value. Once a kind accepts
    /// it, any later failure (annotations, policies, persistence) is
    /// returned as is instead of trying the next kind.
    pub async fn add_material_auto_detect(
        &mut self,
        name: Option<&str>,
        value: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Material> {
        let name = self.material_name(name)?;

        for kind in MaterialKind::AUTO_DETECT_ORDER {
            let definition = match self.contract_definition(&name, kind) {
                Ok(definition) => definition,
                Err(e) => {
                    debug!(material = %name, %kind, error = %e, "not a material of this kind");
                    continue;
                }
            };
            let crafted = self.materials.craft(kind, &name, value).await;
            let outcome = match crafted {
                Ok(material) => AutoDetectOutcome::stored(
                    self.store_material(material, annotations, definition.as_ref())
                        .await,
                ),
                Err(e) => AutoDetectOutcome::craft_failed(e),
            };

            match outcome {
                AutoDetectOutcome::Added(material) => {
                    debug!(material = %name, %kind, "material kind detected");
                    return Ok(material);
                }
                AutoDetectOutcome::Miss(e) => {
                    debug!(material = %name, %kind, error = %e, "not a material of this kind");
                }
                AutoDetectOutcome::PolicyViolation(e) | AutoDetectOutcome::HardFailure(e) => {
                    return Err(e)
                }
            }
        }

        Err(CrafterError::NoMatchingMaterialKind)
    }

    fn material_name(&self, name: Option<&str>) -> Result<String> {
        self.loaded()?;
        Ok(match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!(
                "{GENERATED_NAME_PREFIX}{}",
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ),
        })
    }

    /// The schema definition of `name`, which must be of `kind` if present.
    fn contract_definition(
        &self,
        name: &str,
        kind: MaterialKind,
    ) -> Result<Option<MaterialDefinition>> {
        match self.loaded()?.value.schema.material(name) {
            Some(definition) if definition.kind != kind => Err(CrafterError::MaterialValidation {
                name: name.to_string(),
                kind: kind.to_string(),
                reason: format!("declared in the schema as {}", definition.kind),
            }),
            definition => Ok(definition.cloned()),
        }
    }

    async fn add_material(
        &mut self,
        kind: MaterialKind,
        name: &str,
        value: &str,
        annotations: &BTreeMap<String, String>,
        definition: Option<&MaterialDefinition>,
    ) -> Result<Material> {
        self.loaded()?;
        let material = self.materials.craft(kind, name, value).await?;
        self.store_material(material, annotations, definition).await
    }

    /// Annotate, policy check and persist a crafted material.
    async fn store_material(
        &mut self,
        mut material: Material,
        annotations: &BTreeMap<String, String>,
        definition: Option<&MaterialDefinition>,
    ) -> Result<Material> {
        let schema = self.loaded()?.value.schema.clone();
        let name = material.name.clone();
        let kind = material.kind;

        material.annotations = merge_annotations(&name, definition, annotations)?;
        material.output = definition.is_some_and(|d| d.output);

        let evaluations: Vec<PolicyEvaluation> = self
            .policy_verifier
            .verify_material(&schema, &material)
            .await?
            .into_iter()
            .map(|mut e| {
                e.material_name = name.clone();
                e
            })
            .collect();
        let evaluations = dedup(evaluations);
        self.enforce_gate(&evaluations)?;

        self.commit(|state| {
            let mut kept = std::mem::take(&mut state.policy_evaluations);
            kept.retain(|e| e.material_name != material.name);
            kept.extend(evaluations.iter().cloned());
            state.policy_evaluations = dedup(kept);
            state.materials.insert(material.name.clone(), material.clone());
        })
        .await?;

        info!(material = %material.name, %kind, "material added");
        Ok(material)
    }

    /// Run the attestation level policies for `phase` and merge their
    /// results into the state.
    pub async fn evaluate_attestation_policies(
        &mut self,
        statement: &Statement,
        phase: EvaluationPhase,
    ) -> Result<Vec<PolicyEvaluation>> {
        let schema = self.loaded()?.value.schema.clone();
        let fresh: Vec<PolicyEvaluation> = self
            .policy_verifier
            .verify_statement(&schema, statement, phase)
            .await?
            .into_iter()
            .map(|mut e| {
                e.material_name.clear();
                e
            })
            .collect();
        let fresh = dedup(fresh);
        self.enforce_gate(&fresh)?;

        self.commit(|state| {
            let prior = std::mem::take(&mut state.policy_evaluations);
            state.policy_evaluations = merge_evaluations(prior, fresh.clone(), phase);
        })
        .await?;

        info!(%phase, evaluations = fresh.len(), "attestation policies evaluated");
        Ok(fresh)
    }

    /// Check the attestation is complete enough to be rendered.
    pub fn validate_attestation(&self) -> Result<()> {
        let state = &self.loaded()?.value;
        let missing = state.missing_required_materials();
        if missing.is_empty() {
            return Ok(());
        }
        if state.dry_run {
            warn!(missing = %missing.join(", "), "required materials missing, ignored in dry run");
            return Ok(());
        }
        Err(CrafterError::MissingRequiredMaterials(missing))
    }

    /// Validate the attestation and render it with `renderer`.
    pub fn render<S: Signer>(&self, renderer: &Renderer<S>) -> Result<RenderedAttestation> {
        self.validate_attestation()?;
        renderer.render(&self.loaded()?.value)
    }

    fn enforce_gate(&self, evaluations: &[PolicyEvaluation]) -> Result<()> {
        for evaluation in evaluations.iter().filter(|e| !e.violations.is_empty()) {
            warn!(
                policy = %evaluation.name,
                material = %evaluation.material_name,
                gate = evaluation.gate,
                violations = evaluation.violations.len(),
                "policy violations found"
            );
        }

        let violations: Vec<String> = evaluations
            .iter()
            .filter(|e| e.blocks())
            .flat_map(PolicyEvaluation::violation_messages)
            .collect();
        if violations.is_empty() {
            return Ok(());
        }
        if self.config.policy_bypass {
            warn!("gated policy violations bypassed");
            return Ok(());
        }
        Err(CrafterError::PolicyGateViolation { violations })
    }

    /// Apply `mutate` to the state and persist it.
    ///
    /// On a conflict the state is re-read and `mutate` applied again, up to
    /// the configured number of attempts. The in-memory state only changes
    /// once a write succeeds.
    async fn commit<F>(&mut self, mutate: F) -> Result<()>
    where
        F: Fn(&mut CraftingState) + Send + Sync,
    {
        let current = self.loaded()?.clone();
        let key = state_key(&current.value.metadata).to_string();
        let manager = self.state_manager.clone();
        let mut base = Some(current);
        let mutate = &mutate;

        let written = retry_on_conflict(&self.config.conflict_retry, move || {
            let manager = manager.clone();
            let key = key.clone();
            let base = base.take();
            async move {
                let mut versioned = match base {
                    Some(versioned) => versioned,
                    None => manager.read(&key).await?,
                };
                mutate(&mut versioned.value);
                let version = manager.write(&key, &versioned).await?;
                versioned.version = Some(version);
                Ok(versioned)
            }
        })
        .await?;

        self.state = Some(written);
        Ok(())
    }
}

/// Merge runtime annotations into the ones the contract declares.
///
/// Contract values are immutable. Blank contract annotations must be filled
/// at runtime.
fn merge_annotations(
    material: &str,
    definition: Option<&MaterialDefinition>,
    runtime: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut merged = BTreeMap::new();
    for annotation in definition.map(|d| d.annotations.as_slice()).unwrap_or_default() {
        let value = if annotation.value.is_empty() {
            match runtime.get(&annotation.name).filter(|v| !v.is_empty()) {
                Some(value) => value.clone(),
                None => {
                    return Err(CrafterError::MissingAnnotation {
                        material: material.to_string(),
                        annotation: annotation.name.clone(),
                    })
                }
            }
        } else {
            if runtime
                .get(&annotation.name)
                .is_some_and(|v| *v != annotation.value)
            {
                warn!(
                    material,
                    annotation = %annotation.name,
                    "annotation set by the contract cannot be overridden"
                );
            }
            annotation.value.clone()
        };
        merged.insert(annotation.name.clone(), value);
    }

    for (name, value) in runtime {
        merged.entry(name.clone()).or_insert_with(|| value.clone());
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::crypto::SigningScheme;
    use crate::materials::MaterialValue;
    use crate::policies::PolicyReference;
    use crate::runners::tests::env_of;
    use crate::runners::{Generic, GitHubAction};
    use crate::schema::{Annotation, RunnerSpec};
    use crate::state::{FilesystemStateManager, MemoryStateService, RemoteStateManager};

    const IMAGE: &str =
        "ghcr.io/acme/app@sha256:01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b";

    fn schema() -> CraftingSchema {
        CraftingSchema::from_json(
            br#"{
                "schemaVersion": "v1",
                "materials": [
                    {"name": "image", "type": "CONTAINER_IMAGE", "output": true,
                     "annotations": [{"name": "component", "value": "api"}, {"name": "owner"}]},
                    {"name": "build-ref", "type": "STRING"},
                    {"name": "notes", "type": "STRING", "optional": true}
                ],
                "envAllowList": ["BUILD_LABEL"],
                "annotations": [{"name": "team", "value": "platform"}, {"name": "release"}]
            }"#,
        )
        .unwrap()
    }

    fn metadata() -> WorkflowMetadata {
        WorkflowMetadata {
            organization: "acme".into(),
            project: "app".into(),
            name: "build".into(),
            workflow_run_id: "run-1".into(),
            ..Default::default()
        }
    }

    fn generic_runner() -> Runner {
        Runner::Generic(Generic::new(env_of(&[("BUILD_LABEL", "nightly")])))
    }

    fn options(schema: CraftingSchema) -> InitOptions {
        InitOptions {
            schema: Some(schema),
            metadata: Some(metadata()),
            ..Default::default()
        }
    }

    fn no_annotations() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn owner(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("owner".to_string(), value.to_string())])
    }

    fn memory_crafter() -> Crafter {
        let config = CrafterConfig::default();
        let manager =
            RemoteStateManager::from_config(Arc::new(MemoryStateService::default()), &config);
        Crafter::new(Arc::new(manager), config)
            .with_working_dir(std::env::temp_dir())
    }

    async fn initialized(crafter: Crafter) -> Crafter {
        let dir = tempfile::tempdir().unwrap();
        let mut crafter = crafter.with_working_dir(dir.path());
        crafter
            .init(options(schema()), &generic_runner())
            .await
            .unwrap();
        crafter
    }

    /// Reports one violation per material, gated as configured.
    struct ViolatingVerifier {
        gate: bool,
        calls: Mutex<u32>,
    }

    impl ViolatingVerifier {
        fn new(gate: bool) -> Self {
            Self {
                gate,
                calls: Mutex::new(0),
            }
        }

        fn evaluation(&self, name: &str, with: &str) -> PolicyEvaluation {
            PolicyEvaluation {
                name: name.into(),
                reference: PolicyReference {
                    name: name.into(),
                    ..Default::default()
                },
                with: BTreeMap::from([("arg".to_string(), with.to_string())]),
                gate: self.gate,
                violations: vec!["not compliant".into()],
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl PolicyVerifier for ViolatingVerifier {
        async fn verify_material(
            &self,
            _schema: &CraftingSchema,
            material: &Material,
        ) -> Result<Vec<PolicyEvaluation>> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok(vec![
                self.evaluation("material-check", &calls.to_string()),
                self.evaluation("material-check", &calls.to_string()),
                self.evaluation(&format!("{}-only", material.name), "x"),
            ])
        }

        async fn verify_statement(
            &self,
            _schema: &CraftingSchema,
            _statement: &Statement,
            _phase: EvaluationPhase,
        ) -> Result<Vec<PolicyEvaluation>> {
            Ok(vec![
                self.evaluation("statement-check", "1"),
                self.evaluation("statement-check", "1"),
            ])
        }
    }

    #[tokio::test]
    async fn init_requires_schema_and_metadata() {
        let mut crafter = memory_crafter();
        let err = crafter
            .init(
                InitOptions {
                    metadata: Some(metadata()),
                    ..Default::default()
                },
                &generic_runner(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::MissingSchema));

        let err = crafter
            .init(
                InitOptions {
                    schema: Some(schema()),
                    ..Default::default()
                },
                &generic_runner(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::MissingMetadata));
        assert!(crafter.state().is_none());
    }

    #[tokio::test]
    async fn init_records_runner_env_and_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let mut crafter = memory_crafter().with_working_dir(dir.path());
        let mut opts = options(schema());
        opts.annotations = BTreeMap::from([
            ("team".to_string(), "intruders".to_string()),
            ("release".to_string(), "1.2.0".to_string()),
        ]);
        crafter.init(opts, &generic_runner()).await.unwrap();

        let state = crafter.state().unwrap();
        assert_eq!(state.runner.runner_type, RunnerType::Unspecified);
        assert_eq!(state.env_vars["BUILD_LABEL"], "nightly");
        assert_eq!(state.annotations["team"], "platform");
        assert_eq!(state.annotations["release"], "1.2.0");
        assert!(state.head_commit.is_none());
        assert_eq!(state.key(), "run-1");
    }

    #[tokio::test]
    async fn init_enforces_declared_runner() {
        let mut declared = schema();
        declared.runner = RunnerSpec {
            runner_type: RunnerType::GithubAction,
        };

        let mut crafter = memory_crafter();
        let err = crafter
            .init(options(declared.clone()), &generic_runner())
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::RunnerMismatch { .. }));

        let mut opts = options(declared);
        opts.dry_run = true;
        crafter.init(opts, &generic_runner()).await.unwrap();
    }

    #[tokio::test]
    async fn incomplete_runner_environment_is_fatal_outside_dry_run() {
        let config = CrafterConfig::default();
        let runner = Runner::GitHubAction(GitHubAction::new(env_of(&[("CI", "true")]), &config));

        let mut crafter = memory_crafter();
        let err = crafter
            .init(options(schema()), &runner)
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::MissingEnvVars(_)));

        let mut opts = options(schema());
        opts.dry_run = true;
        crafter.init(opts, &runner).await.unwrap();
        assert_eq!(
            crafter.state().unwrap().runner.runner_type,
            RunnerType::GithubAction
        );
    }

    #[tokio::test]
    async fn operations_need_a_loaded_state() {
        let mut crafter = memory_crafter();
        let err = crafter
            .add_material_from_contract("image", IMAGE, &owner("me"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::StateNotLoaded));
        assert!(matches!(
            crafter.validate_attestation(),
            Err(CrafterError::StateNotLoaded)
        ));
    }

    #[tokio::test]
    async fn contract_material_keeps_contract_annotations() {
        let mut crafter = initialized(memory_crafter()).await;
        let mut runtime = owner("team-a");
        runtime.insert("component".into(), "frontend".into());
        runtime.insert("extra".into(), "yes".into());

        let material = crafter
            .add_material_from_contract("image", IMAGE, &runtime)
            .await
            .unwrap();

        assert!(material.output);
        assert_eq!(material.annotations["component"], "api");
        assert_eq!(material.annotations["owner"], "team-a");
        assert_eq!(material.annotations["extra"], "yes");
        assert!(matches!(
            material.value,
            MaterialValue::ContainerImage { .. }
        ));
    }

    #[tokio::test]
    async fn blank_contract_annotation_must_be_filled() {
        let mut crafter = initialized(memory_crafter()).await;
        let err = crafter
            .add_material_from_contract("image", IMAGE, &no_annotations())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrafterError::MissingAnnotation { ref annotation, .. } if annotation == "owner"
        ));
        assert!(crafter.state().unwrap().materials.is_empty());
    }

    #[tokio::test]
    async fn undeclared_material_is_rejected() {
        let mut crafter = initialized(memory_crafter()).await;
        let err = crafter
            .add_material_from_contract("unknown", "value", &no_annotations())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found in schema"));
    }

    #[tokio::test]
    async fn contract_free_material_gets_generated_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.txt");
        std::fs::write(&file, "all good").unwrap();

        let mut crafter = initialized(memory_crafter()).await;
        let material = crafter
            .add_material_contract_free(
                "GENERIC",
                None,
                file.to_str().unwrap(),
                &no_annotations(),
            )
            .await
            .unwrap();

        assert!(material.name.starts_with(GENERATED_NAME_PREFIX));
        assert!(crafter
            .state()
            .unwrap()
            .materials
            .contains_key(&material.name));
    }

    #[tokio::test]
    async fn contract_free_kind_must_match_schema() {
        let mut crafter = initialized(memory_crafter()).await;
        let err = crafter
            .add_material_contract_free("STRING", Some("image"), "v1", &no_annotations())
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::MaterialValidation { .. }));

        let err = crafter
            .add_material_contract_free("NOT_A_KIND", None, "v1", &no_annotations())
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::UnknownMaterialKind(_)));
    }

    #[tokio::test]
    async fn auto_detect_finds_container_image_and_string() {
        let mut crafter = initialized(memory_crafter()).await;

        let image = crafter
            .add_material_auto_detect(Some("image"), IMAGE, &owner("me"))
            .await
            .unwrap();
        assert_eq!(image.kind, MaterialKind::ContainerImage);

        let plain = crafter
            .add_material_auto_detect(None, "just some text", &no_annotations())
            .await
            .unwrap();
        assert_eq!(plain.kind, MaterialKind::String);
    }

    #[tokio::test]
    async fn auto_detect_stops_on_policy_violation() {
        let verifier = Arc::new(ViolatingVerifier::new(true));
        let mut crafter =
            initialized(memory_crafter().with_policy_verifier(verifier.clone())).await;

        let err = crafter
            .add_material_auto_detect(None, IMAGE, &no_annotations())
            .await
            .unwrap_err();
        assert!(err.is_policy_violation());
        assert_eq!(*verifier.calls.lock().unwrap(), 1);
        assert!(crafter.state().unwrap().materials.is_empty());
    }

    /// Fails to evaluate policies for one material kind only.
    struct FailingVerifier(MaterialKind);

    #[async_trait]
    impl PolicyVerifier for FailingVerifier {
        async fn verify_material(
            &self,
            _schema: &CraftingSchema,
            material: &Material,
        ) -> Result<Vec<PolicyEvaluation>> {
            if material.kind == self.0 {
                return Err(CrafterError::PolicyVerification("engine unreachable".into()));
            }
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

    #[tokio::test]
    async fn auto_detect_reports_failures_after_the_kind_matched() {
        let dir = tempfile::tempdir().unwrap();
        let sbom = dir.path().join("sbom.cdx.json");
        std::fs::write(&sbom, br#"{"bomFormat": "CycloneDX", "specVersion": "1.5"}"#).unwrap();

        let verifier = Arc::new(FailingVerifier(MaterialKind::SbomCyclonedxJson));
        let mut crafter = initialized(memory_crafter().with_policy_verifier(verifier)).await;
        let err = crafter
            .add_material_auto_detect(Some("sbom"), sbom.to_str().unwrap(), &no_annotations())
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::PolicyVerification(_)));
        assert!(crafter.state().unwrap().materials.is_empty());
    }

    #[tokio::test]
    async fn auto_detect_reports_missing_contract_annotation() {
        let mut crafter = initialized(memory_crafter()).await;
        let err = crafter
            .add_material_auto_detect(Some("image"), IMAGE, &no_annotations())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrafterError::MissingAnnotation { ref annotation, .. } if annotation == "owner"
        ));
    }

    #[tokio::test]
    async fn gate_violation_can_be_bypassed() {
        let manager = RemoteStateManager::new(
            Arc::new(MemoryStateService::default()),
            Duration::from_secs(5),
        );
        let crafter = Crafter::new(
            Arc::new(manager),
            CrafterConfig::default().with_policy_bypass(true),
        )
        .with_policy_verifier(Arc::new(ViolatingVerifier::new(true)));
        let mut crafter = initialized(crafter).await;

        crafter
            .add_material_from_contract("build-ref", "abc", &no_annotations())
            .await
            .unwrap();
        assert_eq!(crafter.state().unwrap().policy_evaluations.len(), 2);
    }

    #[tokio::test]
    async fn re_adding_material_replaces_its_evaluations() {
        let verifier = Arc::new(ViolatingVerifier::new(false));
        let mut crafter = initialized(memory_crafter().with_policy_verifier(verifier)).await;

        crafter
            .add_material_from_contract("build-ref", "abc", &no_annotations())
            .await
            .unwrap();
        crafter
            .add_material_from_contract("build-ref", "def", &no_annotations())
            .await
            .unwrap();

        let state = crafter.state().unwrap();
        let evaluations: Vec<&PolicyEvaluation> = state
            .policy_evaluations
            .iter()
            .filter(|e| e.material_name == "build-ref")
            .collect();
        // The first run used arguments "1", the second "2".
        assert_eq!(evaluations.len(), 2);
        assert!(evaluations
            .iter()
            .all(|e| e.name != "material-check" || e.with["arg"] == "2"));
        assert!(matches!(
            &state.materials["build-ref"].value,
            MaterialValue::String { value } if value == "def"
        ));
    }

    #[tokio::test]
    async fn attestation_policies_are_merged_without_duplicates() {
        let verifier = Arc::new(ViolatingVerifier::new(false));
        let mut crafter = initialized(memory_crafter().with_policy_verifier(verifier)).await;
        crafter
            .add_material_from_contract("image", IMAGE, &owner("me"))
            .await
            .unwrap();

        let renderer = Renderer::new(SigningScheme::default().create_signer().unwrap());
        let statement = renderer.statement(crafter.state().unwrap()).unwrap();
        crafter
            .evaluate_attestation_policies(&statement, EvaluationPhase::Init)
            .await
            .unwrap();
        crafter
            .evaluate_attestation_policies(&statement, EvaluationPhase::Push)
            .await
            .unwrap();

        let state = crafter.state().unwrap();
        let attestation_level: Vec<&PolicyEvaluation> = state
            .policy_evaluations
            .iter()
            .filter(|e| !e.is_material_scoped())
            .collect();
        assert_eq!(attestation_level.len(), 1);
        assert_eq!(
            attestation_level[0].phases,
            vec![EvaluationPhase::Init, EvaluationPhase::Push]
        );
        assert_eq!(
            state
                .policy_evaluations
                .iter()
                .filter(|e| e.is_material_scoped())
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn validation_requires_required_materials() {
        let mut crafter = initialized(memory_crafter()).await;
        crafter
            .add_material_from_contract("image", IMAGE, &owner("me"))
            .await
            .unwrap();
        let err = crafter.validate_attestation().unwrap_err();
        assert!(matches!(
            err,
            CrafterError::MissingRequiredMaterials(ref missing) if missing == &vec!["build-ref".to_string()]
        ));

        crafter
            .add_material_from_contract("build-ref", "abc", &no_annotations())
            .await
            .unwrap();
        crafter.validate_attestation().unwrap();

        let rendered = crafter
            .render(&Renderer::new(SigningScheme::default().create_signer().unwrap()))
            .unwrap();
        assert_eq!(rendered.statement.subject.len(), 1);
        assert_eq!(rendered.statement.subject[0].name, "ghcr.io/acme/app");
    }

    #[tokio::test]
    async fn dry_run_tolerates_missing_materials() {
        let dir = tempfile::tempdir().unwrap();
        let mut crafter = memory_crafter().with_working_dir(dir.path());
        let mut opts = options(schema());
        opts.dry_run = true;
        crafter.init(opts, &generic_runner()).await.unwrap();
        crafter.validate_attestation().unwrap();
    }

    #[tokio::test]
    async fn state_survives_reload_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let manager: Arc<dyn StateManager> = Arc::new(FilesystemStateManager::new(dir.path()));

        let mut crafter = initialized(Crafter::new(manager.clone(), CrafterConfig::default())).await;
        crafter
            .add_material_from_contract("build-ref", "abc", &no_annotations())
            .await
            .unwrap();

        let mut resumed = Crafter::new(manager.clone(), CrafterConfig::default());
        resumed.load_state("run-1").await.unwrap();
        assert_eq!(resumed.state(), crafter.state());

        resumed.reset().await.unwrap();
        assert!(resumed.state().is_none());
        assert!(!manager.initialized("run-1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_writer_is_absorbed_by_retry() {
        let manager: Arc<dyn StateManager> = Arc::new(RemoteStateManager::new(
            Arc::new(MemoryStateService::default()),
            Duration::from_secs(5),
        ));
        let config = CrafterConfig::default().with_conflict_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        });
        let mut crafter = initialized(Crafter::new(manager.clone(), config)).await;

        // Another process records a material behind our back.
        let mut other = manager.read("run-1").await.unwrap();
        other.value.annotations.insert("pushed-by".into(), "other".into());
        manager.write("run-1", &other).await.unwrap();

        crafter
            .add_material_from_contract("build-ref", "abc", &no_annotations())
            .await
            .unwrap();

        let state = crafter.state().unwrap();
        assert_eq!(state.annotations["pushed-by"], "other");
        assert!(state.materials.contains_key("build-ref"));
        assert_eq!(manager.read("run-1").await.unwrap().value, *state);
    }

    #[test]
    fn outcome_classification() {
        assert!(matches!(
            AutoDetectOutcome::craft_failed(CrafterError::MaterialValidation {
                name: "m".into(),
                kind: "SARIF".into(),
                reason: "not sarif".into(),
            }),
            AutoDetectOutcome::Miss(_)
        ));
        assert!(matches!(
            AutoDetectOutcome::craft_failed(CrafterError::Upload("boom".into())),
            AutoDetectOutcome::HardFailure(_)
        ));
        assert!(matches!(
            AutoDetectOutcome::stored(Err(CrafterError::PolicyGateViolation {
                violations: vec![]
            })),
            AutoDetectOutcome::PolicyViolation(_)
        ));
        assert!(matches!(
            AutoDetectOutcome::stored(Err(CrafterError::MissingAnnotation {
                material: "image".into(),
                annotation: "owner".into(),
            })),
            AutoDetectOutcome::HardFailure(_)
        ));
    }

    #[test]
    fn contract_annotations_are_immutable() {
        let definition = MaterialDefinition {
            name: "image".into(),
            kind: MaterialKind::ContainerImage,
            optional: false,
            output: false,
            annotations: vec![Annotation {
                name: "component".into(),
                value: "api".into(),
            }],
        };
        let merged = merge_annotations(
            "image",
            Some(&definition),
            &BTreeMap::from([("component".to_string(), "other".to_string())]),
        )
        .unwrap();
        assert_eq!(merged["component"], "api");
    }
}
