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

use std::sync::Arc;

use async_trait::async_trait;

use super::{EnvLookup, EnvVarDefinition, RunnerEnvironment, RunnerType, SupportedRunner};
use crate::config::CrafterConfig;
use crate::oidc::{strip_ref, GitlabOidcClient};

const ENV_VARS: &[EnvVarDefinition] = &[
    EnvVarDefinition::required("GITLAB_CI"),
    EnvVarDefinition::required("CI_JOB_URL"),
    EnvVarDefinition::required("CI_PROJECT_URL"),
    EnvVarDefinition::required("CI_PROJECT_PATH"),
    EnvVarDefinition::required("CI_COMMIT_SHA"),
    EnvVarDefinition::required("CI_SERVER_URL"),
    EnvVarDefinition::optional("GITLAB_USER_EMAIL"),
    EnvVarDefinition::optional("GITLAB_USER_LOGIN"),
    EnvVarDefinition::optional("CI_PIPELINE_URL"),
    EnvVarDefinition::optional("CI_COMMIT_REF_NAME"),
    EnvVarDefinition::optional("CI_RUNNER_VERSION"),
    EnvVarDefinition::optional("CI_RUNNER_DESCRIPTION"),
];

pub struct GitlabPipeline {
    env: Arc<dyn EnvLookup>,
    oidc: GitlabOidcClient,
}

impl GitlabPipeline {
    pub fn new(env: Arc<dyn EnvLookup>, config: &CrafterConfig) -> Self {
        let oidc = GitlabOidcClient::new(env.as_ref(), config);
        Self { env, oidc }
    }

    pub fn with_oidc_client(mut self, oidc: GitlabOidcClient) -> Self {
        self.oidc = oidc;
        self
    }
}

#[async_trait]
impl SupportedRunner for GitlabPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::GitlabPipeline
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn run_uri(&self) -> String {
        self.env.var("CI_JOB_URL").unwrap_or_default()
    }

    /// Path after the `//` separator of the verified `ci_config_ref_uri`.
    fn workflow_file_path(&self) -> String {
        self.oidc
            .cached_claims()
            .and_then(|c| {
                strip_ref(&c.ci_config_ref_uri)
                    .split_once("//")
                    .map(|(_, path)| path.to_string())
            })
            .unwrap_or_default()
    }

    fn is_authenticated(&self) -> bool {
        self.oidc.cached_claims().is_some()
    }

    fn environment(&self) -> RunnerEnvironment {
        self.oidc
            .cached_claims()
            .map(|c| RunnerEnvironment::from_claim(&c.runner_environment))
            .unwrap_or_default()
    }

    async fn authenticate(&self) {
        self.oidc.claims().await;
    }
}
