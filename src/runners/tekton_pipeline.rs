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

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{EnvLookup, EnvVarDefinition, RunnerType, SupportedRunner};

const ENV_VARS: &[EnvVarDefinition] = &[EnvVarDefinition::optional("HOSTNAME")];

/// Tekton task pods carry no identifying variables. Detection relies on the
/// directory Tekton mounts into every step container.
pub struct TektonPipeline {
    env: Arc<dyn EnvLookup>,
    marker_dir: PathBuf,
}

impl TektonPipeline {
    pub fn new(env: Arc<dyn EnvLookup>, marker_dir: &str) -> Self {
        Self {
            env,
            marker_dir: PathBuf::from(marker_dir),
        }
    }
}

#[async_trait]
impl SupportedRunner for TektonPipeline {
    fn id(&self) -> RunnerType {
        RunnerType::TektonPipeline
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        ENV_VARS
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn check_env(&self) -> bool {
        self.marker_dir.is_dir()
    }

    fn run_uri(&self) -> String {
        String::new()
    }
}
