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

/// Fallback used when no platform, or more than one, is detected.
pub struct Generic {
    env: Arc<dyn EnvLookup>,
}

impl Generic {
    pub fn new(env: Arc<dyn EnvLookup>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl SupportedRunner for Generic {
    fn id(&self) -> RunnerType {
        RunnerType::Unspecified
    }

    fn list_env_vars(&self) -> &'static [EnvVarDefinition] {
        &[]
    }

    fn env(&self) -> &dyn EnvLookup {
        self.env.as_ref()
    }

    fn check_env(&self) -> bool {
        true
    }

    fn run_uri(&self) -> String {
        String::new()
    }
}
