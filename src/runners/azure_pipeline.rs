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

use super::{EnvLookup, EnvVarDefinition, RunnerType, SupportedRunner};

const ENV_VARS: &[EnvVarDefinition] = &[
    EnvVarDefinition::required("TF_BUILD"),
    EnvVarDefinition::required("BUILD_BUILDID"),
    EnvVarDefinition::required("BUILD_REPOSITORY_URI"),
    EnvVarDefinition::required("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI"),
    EnvVarDefinition::required("SYSTEM_TEAMPROJECT"),
    EnvVarDefinition::optional("BUILD_REQUESTEDFOR"),
    EnvVarDefinition::optional("BUILD_REQUESTEDFOREMAIL"),
    EnvVarDefinition::optional("BUILD_REPOSITORY_NAME"),
    EnvVarDefinition::optional("BUILD_BUILDNUMBER"),
    EnvVarDefinition::optional("BUILD_REASON"),
    EnvVarDefinition::optional("AGENT_VERSION"),
    EnvVarDefinition::optional("SYSTEM_DEFINITIONNAME"),
];

pub struct AzurePipeline {
    env: Arc<dyn EnvLookup>,
}

impl AzurePipeline {
    pub fn new(env: Arc<dyn EnvLookup>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl SupportedRunner for AzurePipeline {
    fn id(&self) -> RunnerType {
        RunnerType::AzurePipeline
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn run_uri(&self) -> String {
        let (Some(collection), Some(project), Some(build_id)) = (
            self.env.var("SYSTEM_TEAMFOUNDATIONCOLLECTIONURI"),
            self.env.var("SYSTEM_TEAMPROJECT"),
            self.env.var("BUILD_BUILDID"),
        ) else {
            return String::new();
        };
        format!(
            "{}/{project}/_build/results?buildId={build_id}",
            collection.trim_end_matches('/')
        )
    }
}
