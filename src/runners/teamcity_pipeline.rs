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
    EnvVarDefinition::required("TEAMCITY_VERSION"),
    EnvVarDefinition::required("TEAMCITY_PROJECT_NAME"),
    EnvVarDefinition::required("BUILD_URL"),
    EnvVarDefinition::required("BUILD_NUMBER"),
    EnvVarDefinition::optional("HOSTNAME"),
];

pub struct TeamCityPipeline {
    env: Arc<dyn EnvLookup>,
}

impl TeamCityPipeline {
    pub fn new(env: Arc<dyn EnvLookup>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl SupportedRunner for TeamCityPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::TeamcityPipeline
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn run_uri(&self) -> String {
        self.env.var("BUILD_URL").unwrap_or_default()
    }
}
