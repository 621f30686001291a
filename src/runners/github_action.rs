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
use crate::oidc::{strip_ref, GitHubOidcClient};

const ENV_VARS: &[EnvVarDefinition] = &[
    EnvVarDefinition::required("GITHUB_ACTOR"),
    EnvVarDefinition::required("GITHUB_REF"),
    EnvVarDefinition::required("GITHUB_REPOSITORY"),
    EnvVarDefinition::required("GITHUB_REPOSITORY_OWNER"),
    EnvVarDefinition::required("GITHUB_RUN_ID"),
    EnvVarDefinition::required("GITHUB_SHA"),
    EnvVarDefinition::required("RUNNER_NAME"),
    EnvVarDefinition::required("RUNNER_OS"),
    EnvVarDefinition::optional("GITHUB_SERVER_URL"),
    EnvVarDefinition::optional("GITHUB_HEAD_REF"),
    EnvVarDefinition::optional("GITHUB_BASE_REF"),
    EnvVarDefinition::optional("GITHUB_EVENT_NAME"),
];

pub struct GitHubAction {
    env: Arc<dyn EnvLookup>,
    oidc: GitHubOidcClient,
}

impl GitHubAction {
    pub fn new(env: Arc<dyn EnvLookup>, config: &CrafterConfig) -> Self {
        let oidc = GitHubOidcClient::new(env.as_ref(), config);
        Self { env, oidc }
    }

    /// Replace the OIDC client, e.g. to point it at a GitHub Enterprise issuer.
    pub fn with_oidc_client(mut self, oidc: GitHubOidcClient) -> Self {
        self.oidc = oidc;
        self
    }
}

#[async_trait]
impl SupportedRunner for GitHubAction {
    fn id(&self) -> RunnerType {
        RunnerType::GithubAction
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn run_uri(&self) -> String {
        let (Some(repo), Some(run_id)) = (
            self.env.var("GITHUB_REPOSITORY"),
            self.env.var("GITHUB_RUN_ID"),
        ) else {
            return String::new();
        };
        let server = self
            .env
            .var("GITHUB_SERVER_URL")
            .unwrap_or_else(|| "https://github.com".to_string());
        format!("{}/{repo}/actions/runs/{run_id}", server.trim_end_matches('/'))
    }

    /// `.github/workflows/<file>`, taken from the verified `job_workflow_ref`.
    fn workflow_file_path(&self) -> String {
        let Some(claims) = self.oidc.cached_claims() else {
            return String::new();
        };
        // owner/repo/<path>@ref
        strip_ref(&claims.job_workflow_ref)
            .splitn(3, '/')
            .nth(2)
            .unwrap_or_default()
            .to_string()
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
