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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{conflict, CraftingState, StateManager, Versioned};
use crate::config::CrafterConfig;
use crate::errors::{CrafterError, Result};

const STATE_PATH: &str = "v1/attestation-state/";

/// The persistence service keeping crafting states between invocations.
#[async_trait]
pub trait StateService: Send + Sync {
    async fn initialized(&self, run_id: &str) -> Result<bool>;

    /// Store `state` if the stored digest is still `base_digest`, returning
    /// the new digest. `None` only succeeds when nothing is stored yet.
    async fn save(
        &self,
        run_id: &str,
        state: &CraftingState,
        base_digest: Option<&str>,
    ) -> Result<String>;

    /// Stored state and its digest.
    async fn read(&self, run_id: &str) -> Result<(CraftingState, String)>;

    async fn reset(&self, run_id: &str) -> Result<()>;
}

/// [`StateManager`] backed by a [`StateService`], with every call bounded
/// by a timeout.
pub struct RemoteStateManager {
    service: Arc<dyn StateService>,
    timeout: Duration,
}

impl RemoteStateManager {
    pub fn new(service: Arc<dyn StateService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Bound calls by the configured remote state timeout.
    pub fn from_config(service: Arc<dyn StateService>, config: &CrafterConfig) -> Self {
        Self::new(service, config.remote_state_timeout)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CrafterError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl StateManager for RemoteStateManager {
    async fn initialized(&self, key: &str) -> Result<bool> {
        self.bounded(self.service.initialized(key)).await
    }

    async fn write(&self, key: &str, state: &Versioned<CraftingState>) -> Result<String> {
        self.bounded(
            self.service
                .save(key, &state.value, state.version.as_deref()),
        )
        .await
    }

    async fn read(&self, key: &str) -> Result<Versioned<CraftingState>> {
        let (state, digest) = self.bounded(self.service.read(key)).await?;
        Ok(Versioned::with_version(state, digest))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.bounded(self.service.reset(key)).await
    }

    fn info(&self, key: &str) -> String {
        format!("remote attestation state {key}")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest<'a> {
    state: &'a CraftingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_digest: Option<&'a str>,
}

#[derive(Deserialize)]
struct SaveResponse {
    digest: String,
}

#[derive(Deserialize)]
struct ReadResponse {
    state: CraftingState,
    digest: String,
}

/// HTTP client for the attestation state endpoints:
///
/// * `GET {base}/v1/attestation-state/{run_id}` returns `{state, digest}`,
///   404 when absent;
/// * `PUT` with `{state, baseDigest}` returns `{digest}`, 409 when the
///   stored digest moved;
/// * `DELETE` removes the state.
pub struct HttpStateService {
    base_url: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpStateService {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token: None,
            http: reqwest::Client::new(),
        }
    }

    /// Bearer token presented on every request.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    fn url(&self, run_id: &str) -> Result<Url> {
        Ok(self.base_url.join(STATE_PATH)?.join(run_id)?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn unexpected(action: &str, status: StatusCode) -> CrafterError {
    CrafterError::StateService(format!("{action} returned HTTP {}", status.as_u16()))
}

#[async_trait]
impl StateService for HttpStateService {
    async fn initialized(&self, run_id: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET, self.url(run_id)?)
            .send()
            .await
            .map_err(|e| CrafterError::StateService(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(unexpected("state lookup", status)),
        }
    }

    async fn save(
        &self,
        run_id: &str,
        state: &CraftingState,
        base_digest: Option<&str>,
    ) -> Result<String> {
        let response = self
            .request(reqwest::Method::PUT, self.url(run_id)?)
            .json(&SaveRequest { state, base_digest })
            .send()
            .await
            .map_err(|e| CrafterError::StateService(e.to_string()))?;
        match response.status() {
            StatusCode::CONFLICT => Err(conflict(run_id)),
            status if status.is_success() => {
                let saved: SaveResponse = response
                    .json()
                    .await
                    .map_err(|e| CrafterError::StateService(e.to_string()))?;
                debug!(run_id, digest = %saved.digest, "crafting state saved");
                Ok(saved.digest)
            }
            status => Err(unexpected("state save", status)),
        }
    }

    async fn read(&self, run_id: &str) -> Result<(CraftingState, String)> {
        let response = self
            .request(reqwest::Method::GET, self.url(run_id)?)
            .send()
            .await
            .map_err(|e| CrafterError::StateService(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(CrafterError::StateNotLoaded),
            status if status.is_success() => {
                let read: ReadResponse = response
                    .json()
                    .await
                    .map_err(|e| CrafterError::StateService(e.to_string()))?;
                Ok((read.state, read.digest))
            }
            status => Err(unexpected("state read", status)),
        }
    }

    async fn reset(&self, run_id: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, self.url(run_id)?)
            .send()
            .await
            .map_err(|e| CrafterError::StateService(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(unexpected("state reset", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::state::tests::sample_state;
    use crate::state::MemoryStateService;

    fn service(server: &MockServer) -> HttpStateService {
        HttpStateService::new(Url::parse(&format!("{}/", server.base_url())).unwrap())
            .with_token("s3cr3t")
    }

    #[tokio::test]
    async fn save_sends_base_digest_and_returns_new_one() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/v1/attestation-state/run-1")
                .header("authorization", "Bearer s3cr3t")
                .body_contains("\"baseDigest\":\"t0\"");
            then.status(200).json_body(json!({"digest": "t1"}));
        });

        let digest = service(&server)
            .save("run-1", &sample_state("run-1"), Some("t0"))
            .await
            .unwrap();
        mock.assert();
        assert_eq!(digest, "t1");
    }

    #[tokio::test]
    async fn conflict_status_maps_to_conflict_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT).path("/v1/attestation-state/run-1");
            then.status(409);
        });

        let err = service(&server)
            .save("run-1", &sample_state("run-1"), Some("t0"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn read_returns_state_and_digest() {
        let server = MockServer::start();
        let state = sample_state("run-1");
        server.mock(|when, then| {
            when.method(GET).path("/v1/attestation-state/run-1");
            then.status(200)
                .json_body(json!({"state": state, "digest": "t1"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/v1/attestation-state/run-2");
            then.status(404);
        });

        let svc = service(&server);
        let (read, digest) = svc.read("run-1").await.unwrap();
        assert_eq!(read, state);
        assert_eq!(digest, "t1");
        assert!(svc.initialized("run-1").await.unwrap());
        assert!(!svc.initialized("run-2").await.unwrap());
        assert!(matches!(
            svc.read("run-2").await,
            Err(CrafterError::StateNotLoaded)
        ));
    }

    #[tokio::test]
    async fn server_errors_are_state_service_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(DELETE).path("/v1/attestation-state/run-1");
            then.status(500);
        });

        let err = service(&server).reset("run-1").await.unwrap_err();
        assert!(matches!(err, CrafterError::StateService(_)));
    }

    struct SlowService;

    #[async_trait]
    impl StateService for SlowService {
        async fn initialized(&self, _: &str) -> Result<bool> {
            Ok(true)
        }

        async fn save(&self, _: &str, _: &CraftingState, _: Option<&str>) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".into())
        }

        async fn read(&self, _: &str) -> Result<(CraftingState, String)> {
            Err(CrafterError::StateNotLoaded)
        }

        async fn reset(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_times_out() {
        let manager = RemoteStateManager::new(Arc::new(SlowService), Duration::from_secs(1));
        let err = manager
            .write("run-1", &Versioned::new(sample_state("run-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_bounds_calls() {
        let config = CrafterConfig::default().with_remote_state_timeout(Duration::from_secs(2));
        let manager = RemoteStateManager::from_config(Arc::new(SlowService), &config);
        let err = manager
            .write("run-1", &Versioned::new(sample_state("run-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, CrafterError::Timeout(t) if t == Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn stale_token_conflicts_until_reread() {
        let manager = RemoteStateManager::new(
            Arc::new(MemoryStateService::default()),
            Duration::from_secs(5),
        );
        let t0 = manager
            .write("run-1", &Versioned::new(sample_state("run-1")))
            .await
            .unwrap();

        // Another writer moves the state to T1.
        let mut other = manager.read("run-1").await.unwrap();
        other.value.annotations.insert("by".into(), "other".into());
        let t1 = manager.write("run-1", &other).await.unwrap();

        let mut mine = sample_state("run-1");
        mine.annotations.insert("by".into(), "me".into());
        let err = manager
            .write("run-1", &Versioned::with_version(mine.clone(), t0))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let fresh = manager.read("run-1").await.unwrap();
        assert_eq!(fresh.version.as_deref(), Some(t1.as_str()));
        let t2 = manager
            .write("run-1", &Versioned::with_version(mine, t1.clone()))
            .await
            .unwrap();
        assert_ne!(t2, t1);
    }
}
