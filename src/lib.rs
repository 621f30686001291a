//! Crafting of signed software supply chain attestations.
//!
//! The crate collects the evidence ("materials") produced during a CI/CD run,
//! binds it to the identity of the runner it was produced on, gates every
//! piece of evidence against policies, and finally renders a signed in-toto
//! statement wrapped into a DSSE envelope and a Sigstore bundle.
//!
//! # Crafting an attestation
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use attestation_crafter::attestation::Renderer;
//! use attestation_crafter::config::CrafterConfig;
//! use attestation_crafter::crafter::{Crafter, InitOptions};
//! use attestation_crafter::crypto::SigningScheme;
//! use attestation_crafter::runners::RunnerRegistry;
//! use attestation_crafter::schema::CraftingSchema;
//! use attestation_crafter::state::{FilesystemStateManager, WorkflowMetadata};
//!
//! # async fn example() -> attestation_crafter::errors::Result<()> {
//! let config = CrafterConfig::default();
//! let registry = RunnerRegistry::from_process_env(config.clone());
//! let schema = CraftingSchema::from_json(&std::fs::read("contract.json")?)?;
//! let runner = registry
//!     .discover_and_enforce(schema.expected_runner(), config.dry_run)
//!     .await?;
//!
//! let mut crafter = Crafter::new(Arc::new(FilesystemStateManager::new(".state")), config);
//! crafter
//!     .init(
//!         InitOptions {
//!             schema: Some(schema),
//!             metadata: Some(WorkflowMetadata::default()),
//!             ..Default::default()
//!         },
//!         &runner,
//!     )
//!     .await?;
//! crafter
//!     .add_material_auto_detect(Some("sbom"), "sbom.cdx.json", &BTreeMap::new())
//!     .await?;
//!
//! let renderer = Renderer::new(SigningScheme::default().create_signer()?);
//! let attestation = crafter.render(&renderer)?;
//! attestation.write_bundle("attestation.bundle.json").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Advisory checks
//!
//! Workload identity verification and commit signature verification never
//! fail the crafting process. When the platform cannot be reached or the
//! token does not verify, the runner is simply reported as unauthenticated
//! and the commit verification as unavailable.

pub mod attestation;
pub mod commit_verification;
pub mod config;
pub mod crafter;
pub mod crypto;
pub mod errors;
pub mod git;
pub mod materials;
pub mod oidc;
pub mod policies;
pub mod runners;
pub mod schema;
pub mod state;
