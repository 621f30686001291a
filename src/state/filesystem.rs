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

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{conflict, CraftingState, StateManager, Versioned};
use crate::errors::{CrafterError, Result};
use crate::materials::sha256_hex;

/// Keeps one JSON document per key in a local directory.
///
/// The version token is the sha256 of the file contents. Writing a state
/// that was never read (no version) replaces whatever is on disk, so a new
/// local run starts over a stale state left behind by an aborted one.
#[derive(Clone, Debug)]
pub struct FilesystemStateManager {
    dir: PathBuf,
}

impl FilesystemStateManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn current_version(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read(path).await {
            Ok(content) => Ok(Some(sha256_hex(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateManager for FilesystemStateManager {
    async fn initialized(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(key)).await?)
    }

    async fn write(&self, key: &str, state: &Versioned<CraftingState>) -> Result<String> {
        let path = self.path(key);
        if let Some(expected) = &state.version {
            if Self::current_version(&path).await?.as_ref() != Some(expected) {
                return Err(conflict(key));
            }
        }

        let content = serde_json::to_vec_pretty(&state.value)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let version = sha256_hex(&content);
        debug!(path = %path.display(), %version, "crafting state written");
        Ok(version)
    }

    async fn read(&self, key: &str) -> Result<Versioned<CraftingState>> {
        let content = match tokio::fs::read(self.path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CrafterError::StateNotLoaded),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&content)?;
        Ok(Versioned::with_version(state, sha256_hex(&content)))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn info(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::sample_state;

    #[tokio::test]
    async fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FilesystemStateManager::new(dir.path());
        assert!(!manager.initialized("run-1").await.unwrap());

        let state = sample_state("run-1");
        let version = manager
            .write("run-1", &Versioned::new(state.clone()))
            .await
            .unwrap();

        assert!(manager.initialized("run-1").await.unwrap());
        let read = manager.read("run-1").await.unwrap();
        assert_eq!(read.value, state);
        assert_eq!(read.version.as_deref(), Some(version.as_str()));
        assert!(manager.info("run-1").ends_with("run-1.json"));
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FilesystemStateManager::new(dir.path());
        let t0 = manager
            .write("run-1", &Versioned::new(sample_state("run-1")))
            .await
            .unwrap();

        let mut changed = sample_state("run-1");
        changed.dry_run = true;
        let t1 = manager
            .write("run-1", &Versioned::with_version(changed.clone(), t0.clone()))
            .await
            .unwrap();
        assert_ne!(t0, t1);

        let err = manager
            .write("run-1", &Versioned::with_version(changed, t0))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn reset_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FilesystemStateManager::new(dir.path());
        manager
            .write("run-1", &Versioned::new(sample_state("run-1")))
            .await
            .unwrap();
        manager.reset("run-1").await.unwrap();
        manager.reset("run-1").await.unwrap();

        assert!(matches!(
            manager.read("run-1").await,
            Err(CrafterError::StateNotLoaded)
        ));
    }
}
