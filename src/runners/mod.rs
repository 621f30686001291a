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

//! # CI/CD Runners
//!
//! Every supported CI platform is a variant of the closed [`Runner`] enum.
//! Each variant wraps a struct implementing [`SupportedRunner`], declaring the
//! environment variables it reads. Detection is data-driven: a runner matches
//! when all of its required variables are present.
//!
//! Use [`RunnerRegistry`] to pick the active runner:
//!
//! ```rust,no_run
//! # async fn example() -> attestation_crafter::errors::Result<()> {
//! use attestation_crafter::config::CrafterConfig;
//! use attestation_crafter::runners::{RunnerRegistry, RunnerType};
//!
//! let registry = RunnerRegistry::from_process_env(CrafterConfig::default());
//! let runner = registry
//!     .discover_and_enforce(RunnerType::GithubAction, false)
//!     .await?;
//! println!("running on {} at {}", runner.id(), runner.run_uri());
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CrafterConfig;
use crate::errors::{CrafterError, Result};

pub mod azure_pipeline;
pub mod circleci_build;
pub mod dagger_pipeline;
pub mod generic;
pub mod github_action;
pub mod gitlab_pipeline;
pub mod jenkins_job;
pub mod teamcity_pipeline;
pub mod tekton_pipeline;

pub use azure_pipeline::AzurePipeline;
pub use circleci_build::CircleCIBuild;
pub use dagger_pipeline::DaggerPipeline;
pub use generic::Generic;
pub use github_action::GitHubAction;
pub use gitlab_pipeline::GitlabPipeline;
pub use jenkins_job::JenkinsJob;
pub use teamcity_pipeline::TeamCityPipeline;
pub use tekton_pipeline::TektonPipeline;

/// Read access to environment variables.
///
/// Runners never call [`std::env::var`] directly so the detection logic can
/// be exercised against a fixed map. Empty values count as unset.
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// [`EnvLookup`] over the current process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

/// An environment variable a runner reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvVarDefinition {
    pub name: &'static str,
    pub optional: bool,
}

impl EnvVarDefinition {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            optional: true,
        }
    }
}

/// Returns true when every required variable in `vars` is set.
pub fn required_vars_present(env: &dyn EnvLookup, vars: &[EnvVarDefinition]) -> bool {
    vars.iter()
        .filter(|v| !v.optional)
        .all(|v| env.var(v.name).is_some())
}

/// Resolve `vars` against the environment.
///
/// Missing optional variables are omitted. Every missing required variable
/// is collected, so the error names all of them at once.
pub fn resolve_env_vars(
    env: &dyn EnvLookup,
    vars: &[EnvVarDefinition],
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    let mut missing = Vec::new();

    for var in vars {
        match env.var(var.name) {
            Some(value) => {
                resolved.insert(var.name.to_string(), value);
            }
            None if var.optional => {}
            None => missing.push(var.name.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(CrafterError::MissingEnvVars(missing))
    }
}

/// Identifier of a runner type, as declared in crafting schemas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerType {
    #[default]
    Unspecified,
    GithubAction,
    GitlabPipeline,
    AzurePipeline,
    JenkinsJob,
    CircleciBuild,
    DaggerPipeline,
    TeamcityPipeline,
    TektonPipeline,
}

impl fmt::Display for RunnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunnerType::Unspecified => "UNSPECIFIED",
            RunnerType::GithubAction => "GITHUB_ACTION",
            RunnerType::GitlabPipeline => "GITLAB_PIPELINE",
            RunnerType::AzurePipeline => "AZURE_PIPELINE",
            RunnerType::JenkinsJob => "JENKINS_JOB",
            RunnerType::CircleciBuild => "CIRCLECI_BUILD",
            RunnerType::DaggerPipeline => "DAGGER_PIPELINE",
            RunnerType::TeamcityPipeline => "TEAMCITY_PIPELINE",
            RunnerType::TektonPipeline => "TEKTON_PIPELINE",
        })
    }
}

/// Where the runner executes, as asserted by a verified workload identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerEnvironment {
    Managed,
    SelfHosted,
    #[default]
    Unknown,
}

impl RunnerEnvironment {
    /// Map the `runner_environment` claim of GitHub and GitLab tokens.
    pub fn from_claim(value: &str) -> Self {
        match value {
            "github-hosted" | "gitlab-hosted" => RunnerEnvironment::Managed,
            "self-hosted" => RunnerEnvironment::SelfHosted,
            _ => RunnerEnvironment::Unknown,
        }
    }
}

/// The capability set every CI platform provides.
#[async_trait]
pub trait SupportedRunner: Send + Sync {
    fn id(&self) -> RunnerType;

    /// Environment variables this runner reads. Must be side-effect free.
    fn list_env_vars(&self) -> &'static [EnvVarDefinition];

    fn env(&self) -> &dyn EnvLookup;

    /// Whether the current process runs on this platform.
    fn check_env(&self) -> bool {
        required_vars_present(self.env(), self.list_env_vars())
    }

    fn resolve_env_vars(&self) -> Result<BTreeMap<String, String>> {
        resolve_env_vars(self.env(), self.list_env_vars())
    }

    /// URL of the current run, empty when the platform has none.
    fn run_uri(&self) -> String;

    /// Path of the workflow definition, only known once authenticated.
    fn workflow_file_path(&self) -> String {
        String::new()
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn environment(&self) -> RunnerEnvironment {
        RunnerEnvironment::Unknown
    }

    /// Fetch and verify the workload identity, if the platform offers one.
    /// Failures degrade the runner to unauthenticated and are never returned.
    async fn authenticate(&self) {}
}

/// Runner metadata recorded into the crafting state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerInfo {
    #[serde(rename = "type")]
    pub runner_type: RunnerType,
    pub url: String,
    pub environment_variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workflow_file_path: String,
    pub authenticated: bool,
    pub environment: RunnerEnvironment,
}

/// The closed set of supported runners.
pub enum Runner {
    GitHubAction(GitHubAction),
    GitlabPipeline(GitlabPipeline),
    AzurePipeline(AzurePipeline),
    JenkinsJob(JenkinsJob),
    CircleCIBuild(CircleCIBuild),
    DaggerPipeline(DaggerPipeline),
    TeamCityPipeline(TeamCityPipeline),
    TektonPipeline(TektonPipeline),
    Generic(Generic),
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runner({})", self.id())
    }
}

impl Runner {
    /// Return the inner [`SupportedRunner`] of the enum.
    fn as_inner(&self) -> &dyn SupportedRunner {
        match self {
            Runner::GitHubAction(inner) => inner,
            Runner::GitlabPipeline(inner) => inner,
            Runner::AzurePipeline(inner) => inner,
            Runner::JenkinsJob(inner) => inner,
            Runner::CircleCIBuild(inner) => inner,
            Runner::DaggerPipeline(inner) => inner,
            Runner::TeamCityPipeline(inner) => inner,
            Runner::TektonPipeline(inner) => inner,
            Runner::Generic(inner) => inner,
        }
    }

    pub fn id(&self) -> RunnerType {
        self.as_inner().id()
    }

    pub fn check_env(&self) -> bool {
        self.as_inner().check_env()
    }

    pub fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        self.as_inner().list_env_vars()
    }

    pub fn resolve_env_vars(&self) -> Result<BTreeMap<String, String>> {
        self.as_inner().resolve_env_vars()
    }

    pub fn run_uri(&self) -> String {
        self.as_inner().run_uri()
    }

    pub fn workflow_file_path(&self) -> String {
        self.as_inner().workflow_file_path()
    }

    pub fn is_authenticated(&self) -> bool {
        self.as_inner().is_authenticated()
    }

    pub fn environment(&self) -> RunnerEnvironment {
        self.as_inner().environment()
    }

    pub async fn authenticate(&self) {
        self.as_inner().authenticate().await
    }

    /// Lookup used by this runner, shared with commit verification.
    pub fn env(&self) -> &dyn EnvLookup {
        self.as_inner().env()
    }

    /// Snapshot the runner metadata.
    ///
    /// Missing required variables make the snapshot fail, since recording
    /// a partial environment would misrepresent the run.
    pub fn report(&self) -> Result<RunnerInfo> {
        Ok(RunnerInfo {
            runner_type: self.id(),
            url: self.run_uri(),
            environment_variables: self.resolve_env_vars()?,
            workflow_file_path: self.workflow_file_path(),
            authenticated: self.is_authenticated(),
            environment: self.environment(),
        })
    }
}

/// Registry of supported runners, built once per process.
pub struct RunnerRegistry {
    env: Arc<dyn EnvLookup>,
    config: CrafterConfig,
}

impl RunnerRegistry {
    pub fn new(env: Arc<dyn EnvLookup>, config: CrafterConfig) -> Self {
        Self { env, config }
    }

    /// Registry reading the current process environment.
    pub fn from_process_env(config: CrafterConfig) -> Self {
        Self::new(Arc::new(ProcessEnv), config)
    }

    pub fn config(&self) -> &CrafterConfig {
        &self.config
    }

    /// One instance of every platform runner, the generic fallback excluded.
    fn platform_runners(&self) -> Vec<Runner> {
        let env = &self.env;
        vec![
            Runner::GitHubAction(GitHubAction::new(env.clone(), &self.config)),
            Runner::GitlabPipeline(GitlabPipeline::new(env.clone(), &self.config)),
            Runner::AzurePipeline(AzurePipeline::new(env.clone())),
            Runner::JenkinsJob(JenkinsJob::new(env.clone())),
            Runner::CircleCIBuild(CircleCIBuild::new(env.clone())),
            Runner::DaggerPipeline(DaggerPipeline::new(env.clone())),
            Runner::TeamCityPipeline(TeamCityPipeline::new(env.clone())),
            Runner::TektonPipeline(TektonPipeline::new(
                env.clone(),
                &self.config.tekton_marker_dir,
            )),
        ]
    }

    /// Runner types whose environment check currently passes.
    pub fn matching(&self) -> Vec<RunnerType> {
        self.platform_runners()
            .into_iter()
            .filter(|r| r.check_env())
            .map(|r| r.id())
            .collect()
    }

    /// Select the runner the process executes on, without authenticating it.
    ///
    /// Zero or several matches both yield the generic runner: guessing would
    /// attach the wrong provenance to the attestation.
    pub fn detect(&self) -> Runner {
        let mut matches: Vec<Runner> = self
            .platform_runners()
            .into_iter()
            .filter(|r| {
                let matched = r.check_env();
                debug!(runner = %r.id(), matched, "probed runner environment");
                matched
            })
            .collect();

        match matches.len() {
            0 => {
                debug!("no CI runner detected, using generic runner");
                Runner::Generic(Generic::new(self.env.clone()))
            }
            1 => matches.remove(0),
            _ => {
                let ids: Vec<String> = matches.iter().map(|r| r.id().to_string()).collect();
                warn!(
                    runners = %ids.join(", "),
                    "several CI runners detected at once, falling back to generic runner"
                );
                Runner::Generic(Generic::new(self.env.clone()))
            }
        }
    }

    /// Select the active runner and authenticate its workload identity.
    pub async fn discover(&self) -> Runner {
        let runner = self.detect();
        runner.authenticate().await;
        info!(
            runner = %runner.id(),
            authenticated = runner.is_authenticated(),
            "runner discovered"
        );
        runner
    }

    /// Discover the runner and check it matches the operator declared type.
    ///
    /// Enforcement is skipped for dry runs and when `expected` is unspecified.
    pub async fn discover_and_enforce(&self, expected: RunnerType, dry_run: bool) -> Result<Runner> {
        let runner = self.discover().await;
        if dry_run || expected == RunnerType::Unspecified {
            return Ok(runner);
        }

        if runner.id() != expected {
            return Err(CrafterError::RunnerMismatch {
                expected: expected.to_string(),
                discovered: runner.id().to_string(),
            });
        }

        Ok(runner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn env_of(vars: &[(&str, &str)]) -> Arc<dyn EnvLookup> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(map)
    }

    /// `vars` with `missing` left out.
    pub(crate) fn env_without(vars: &[(&str, &str)], missing: &str) -> Arc<dyn EnvLookup> {
        let kept: Vec<(&str, &str)> = vars
            .iter()
            .copied()
            .filter(|(name, _)| *name != missing)
            .collect();
        env_of(&kept)
    }

    fn registry(vars: &[(&str, &str)]) -> RunnerRegistry {
        RunnerRegistry::new(
            env_of(vars),
            CrafterConfig::default().with_tekton_marker_dir("/nonexistent/tekton-marker"),
        )
    }

    const JENKINS: &[(&str, &str)] = &[
        ("JENKINS_HOME", "/var/jenkins_home"),
        ("BUILD_URL", "https://jenkins.example.com/job/app/42/"),
        ("JOB_NAME", "app"),
    ];

    const CIRCLE: &[(&str, &str)] = &[
        ("CIRCLECI", "true"),
        ("CIRCLE_BUILD_URL", "https://circleci.com/gh/acme/app/7"),
        ("CIRCLE_JOB", "build"),
    ];

    #[test]
    fn resolve_collects_every_missing_required_var() {
        let env = env_of(&[("A", "1")]);
        let vars = [
            EnvVarDefinition::required("A"),
            EnvVarDefinition::required("B"),
            EnvVarDefinition::optional("C"),
            EnvVarDefinition::required("D"),
        ];
        match resolve_env_vars(env.as_ref(), &vars) {
            Err(CrafterError::MissingEnvVars(missing)) => assert_eq!(missing, vec!["B", "D"]),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn resolve_omits_missing_optional_vars() {
        let env = env_of(&[("A", "1"), ("C", "")]);
        let vars = [
            EnvVarDefinition::required("A"),
            EnvVarDefinition::optional("C"),
        ];
        let resolved = resolve_env_vars(env.as_ref(), &vars).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["A"], "1");
    }

    #[test]
    fn detect_without_ci_is_generic() {
        let runner = registry(&[]).detect();
        assert_eq!(runner.id(), RunnerType::Unspecified);
        assert!(matches!(runner, Runner::Generic(_)));
    }

    #[test]
    fn detect_single_platform() {
        let runner = registry(JENKINS).detect();
        assert_eq!(runner.id(), RunnerType::JenkinsJob);
        assert_eq!(runner.run_uri(), "https://jenkins.example.com/job/app/42/");
    }

    #[test]
    fn detect_ambiguous_platforms_is_generic() {
        let vars: Vec<(&str, &str)> = JENKINS.iter().chain(CIRCLE.iter()).copied().collect();
        let registry = registry(&vars);
        assert_eq!(
            registry.matching(),
            vec![RunnerType::JenkinsJob, RunnerType::CircleciBuild]
        );
        assert!(matches!(registry.detect(), Runner::Generic(_)));
    }

    #[tokio::test]
    async fn enforce_rejects_mismatch() {
        let err = registry(JENKINS)
            .discover_and_enforce(RunnerType::CircleciBuild, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::RunnerMismatch { .. }));
    }

    #[tokio::test]
    async fn enforce_skipped_for_dry_run_and_unspecified() {
        let registry = registry(JENKINS);
        let runner = registry
            .discover_and_enforce(RunnerType::CircleciBuild, true)
            .await
            .unwrap();
        assert_eq!(runner.id(), RunnerType::JenkinsJob);

        let runner = registry
            .discover_and_enforce(RunnerType::Unspecified, false)
            .await
            .unwrap();
        assert_eq!(runner.id(), RunnerType::JenkinsJob);
    }

    #[tokio::test]
    async fn enforce_accepts_match() {
        let runner = registry(CIRCLE)
            .discover_and_enforce(RunnerType::CircleciBuild, false)
            .await
            .unwrap();
        let info = runner.report().unwrap();
        assert_eq!(info.runner_type, RunnerType::CircleciBuild);
        assert_eq!(info.environment, RunnerEnvironment::Unknown);
        assert!(!info.authenticated);
        assert_eq!(info.environment_variables["CIRCLE_JOB"], "build");
    }

    #[test]
    fn runner_environment_from_claims() {
        assert_eq!(
            RunnerEnvironment::from_claim("github-hosted"),
            RunnerEnvironment::Managed
        );
        assert_eq!(
            RunnerEnvironment::from_claim("gitlab-hosted"),
            RunnerEnvironment::Managed
        );
        assert_eq!(
            RunnerEnvironment::from_claim("self-hosted"),
            RunnerEnvironment::SelfHosted
        );
        assert_eq!(RunnerEnvironment::from_claim(""), RunnerEnvironment::Unknown);
    }
}
