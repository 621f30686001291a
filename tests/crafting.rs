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

//! End to end crafting of an attestation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use attestation_crafter::attestation::{DsseVerifier, Renderer, Statement, PREDICATE_TYPE_V0_2};
use attestation_crafter::config::CrafterConfig;
use attestation_crafter::crafter::{Crafter, InitOptions};
use attestation_crafter::crypto::SigningScheme;
use attestation_crafter::errors::CrafterError;
use attestation_crafter::materials::MaterialKind;
use attestation_crafter::runners::{EnvLookup, RunnerRegistry, RunnerType};
use attestation_crafter::schema::CraftingSchema;
use attestation_crafter::state::{
    FilesystemStateManager, MemoryStateService, RemoteStateManager, StateManager, Versioned,
    WorkflowMetadata,
};

fn contract() -> CraftingSchema {
    CraftingSchema::from_json(&fs::read("tests/data/contract.json").unwrap()).unwrap()
}

fn metadata(run_id: &str) -> WorkflowMetadata {
    WorkflowMetadata {
        organization: "acme".into(),
        project: "app".into(),
        name: "release".into(),
        workflow_run_id: run_id.into(),
        ..Default::default()
    }
}

async fn discover_generic_runner() -> attestation_crafter::runners::Runner {
    let env: Arc<dyn EnvLookup> = Arc::new(HashMap::<String, String>::new());
    RunnerRegistry::new(env, CrafterConfig::default())
        .discover_and_enforce(RunnerType::Unspecified, false)
        .await
        .unwrap()
}

#[tokio::test]
async fn init_outside_repository_and_add_materials() {
    let workdir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let runner = discover_generic_runner().await;

    let mut crafter = Crafter::new(
        Arc::new(FilesystemStateManager::new(state_dir.path())),
        CrafterConfig::default(),
    )
    .with_working_dir(workdir.path());

    let minimal = CraftingSchema::from_json(br#"{"schemaVersion": "v1"}"#).unwrap();
    crafter
        .init(
            InitOptions {
                schema: Some(minimal),
                metadata: Some(metadata("")),
                ..Default::default()
            },
            &runner,
        )
        .await
        .unwrap();
    assert!(crafter.state().unwrap().head_commit.is_none());

    let err = crafter
        .add_material_from_contract("undeclared", "value", &BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CrafterError::MaterialNotInSchema { .. }));
    assert!(err.to_string().contains("not found in schema"));

    let artifact = workdir.path().join("build.log");
    fs::write(&artifact, "build ok").unwrap();
    let material = crafter
        .add_material_contract_free(
            "GENERIC",
            None,
            artifact.to_str().unwrap(),
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    assert!(material.name.starts_with("material-"));
    assert!(state_dir.path().join("local.json").exists());
}

#[tokio::test]
async fn crafted_attestation_verifies_with_signer_key() {
    let workdir = tempfile::tempdir().unwrap();
    let runner = discover_generic_runner().await;
    let manager = RemoteStateManager::new(
        Arc::new(MemoryStateService::default()),
        Duration::from_secs(5),
    );
    let mut crafter = Crafter::new(Arc::new(manager), CrafterConfig::default())
        .with_working_dir(workdir.path());

    crafter
        .init(
            InitOptions {
                schema: Some(contract()),
                metadata: Some(metadata("run-42")),
                ..Default::default()
            },
            &runner,
        )
        .await
        .unwrap();

    let sbom = crafter
        .add_material_auto_detect(Some("sbom"), "tests/data/sbom.cdx.json", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(sbom.kind, MaterialKind::SbomCyclonedxJson);
    assert!(matches!(
        crafter.validate_attestation(),
        Err(CrafterError::MissingRequiredMaterials(_))
    ));

    crafter
        .add_material_from_contract("commit", "4b825dc642cb6eb9a060e54bf8d69288fbee4904", &BTreeMap::new())
        .await
        .unwrap();

    let signer = SigningScheme::ECDSA_P384_SHA384_ASN1.create_signer().unwrap();
    let verifier = DsseVerifier::for_signer(&signer).unwrap();
    let rendered = crafter.render(&Renderer::new(signer)).unwrap();

    let payload = verifier.verify(&rendered.envelope).unwrap();
    let statement: Statement = serde_json::from_slice(&payload).unwrap();
    assert_eq!(statement.predicate_type, PREDICATE_TYPE_V0_2);
    assert_eq!(statement.subject.len(), 1);
    assert_eq!(statement.subject[0].name, "sbom.cdx.json");
    assert_eq!(
        statement.subject[0].digest["sha256"],
        sbom.digest().unwrap()
    );
    assert_eq!(statement.predicate["metadata"]["workflowRunId"], "run-42");
    assert_eq!(statement.predicate["annotations"]["team"], "platform");
    assert!(rendered.bundle.verification_material.is_none());

    let bundle_path = workdir.path().join("attestation.json");
    rendered.write_bundle(&bundle_path).await.unwrap();
    assert!(bundle_path.exists());
}

#[tokio::test]
async fn stale_version_token_is_rejected_until_reread() {
    let state_dir = tempfile::tempdir().unwrap();
    let manager = FilesystemStateManager::new(state_dir.path());

    let workdir = tempfile::tempdir().unwrap();
    let mut crafter = Crafter::new(Arc::new(manager.clone()), CrafterConfig::default())
        .with_working_dir(workdir.path());
    crafter
        .init(
            InitOptions {
                schema: Some(contract()),
                metadata: Some(metadata("run-7")),
                ..Default::default()
            },
            &discover_generic_runner().await,
        )
        .await
        .unwrap();

    let t0 = manager.read("run-7").await.unwrap();
    let mut first = t0.clone();
    first.value.annotations.insert("step".into(), "one".into());
    let t1 = manager.write("run-7", &first).await.unwrap();

    let mut stale = t0.clone();
    stale.value.annotations.insert("step".into(), "two".into());
    assert!(manager.write("run-7", &stale).await.unwrap_err().is_conflict());

    let mut fresh = manager.read("run-7").await.unwrap();
    assert_eq!(fresh.version.as_deref(), Some(t1.as_str()));
    fresh.value.annotations.insert("step".into(), "two".into());
    manager.write("run-7", &fresh).await.unwrap();

    let stored: Versioned<_> = manager.read("run-7").await.unwrap();
    assert_eq!(stored.value.annotations["step"], "two");
}
