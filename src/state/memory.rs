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

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{conflict, CraftingState, StateService};
use crate::errors::{CrafterError, Result};
use crate::materials::sha256_hex;

/// In-process [`StateService`] honoring the same digest contract as the
/// remote service.
#[derive(Default)]
pub struct MemoryStateService {
    states: Mutex<HashMap<String, (CraftingState, String)>>,
}

impl MemoryStateService {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (CraftingState, String)>>> {
        self.states
            .lock()
            .map_err(|_| CrafterError::StateService("state store poisoned".into()))
    }
}

#[async_trait]
impl StateService for MemoryStateService {
    async fn initialized(&self, run_id: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(run_id))
    }

    async fn save(
        &self,
        run_id: &str,
        state: &CraftingState,
        base_digest: Option<&str>,
    ) -> Result<String> {
        let mut states = self.lock()?;
        let stored = states.get(run_id).map(|(_, digest)| digest.as_str());
        if stored != base_digest {
            return Err(conflict(run_id));
        }

        let digest = sha256_hex(&serde_json::to_vec(state)?);
        states.insert(run_id.to_string(), (state.clone(), digest.clone()));
        Ok(digest)
    }

    async fn read(&self, run_id: &str) -> Result<(CraftingState, String)> {
        self.lock()?
            .get(run_id)
            .cloned()
            .ok_or(CrafterError::StateNotLoaded)
    }

    async fn reset(&self, run_id: &str) -> Result<()> {
        self.lock()?.remove(run_id);
        Ok(())
    }
}
