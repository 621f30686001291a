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

/// Set by the Dagger module that drives the crafter.
const ENV_VARS: &[EnvVarDefinition] = &[EnvVarDefinition::required("CRAFTER_DAGGER_CLIENT")];

pub struct DaggerPipeline {
    env: Arc<dyn EnvLookup>,
}

impl DaggerPipeline {
    pub fn new(env: Arc<dyn EnvLookup>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl SupportedRunner for DaggerPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::DaggerPipeline
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    // Dagger runs have no addressable page.
    fn run_uri(&self) -> String {
        String::new()
    }
}
