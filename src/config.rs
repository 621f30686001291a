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

//! Configuration shared by the runner registry, the crafter and the clients
//! it drives.

use std::time::Duration;

use serde::Deserialize;

use crate::runners::EnvLookup;

/// Default audience requested for workload identity tokens.
pub const DEFAULT_OIDC_AUDIENCE: &str = "sigstore";

/// Default GitHub REST API root.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default name of the variable GitLab injects the ID token into.
pub const DEFAULT_GITLAB_OIDC_TOKEN_ENV: &str = "GITLAB_OIDC";

/// Default directory whose presence marks a Tekton task pod.
pub const DEFAULT_TEKTON_MARKER_DIR: &str = "/tekton";

/// Materials up to this size are inlined into the attestation.
pub const DEFAULT_MAX_INLINE_MATERIAL_SIZE: u64 = 500 * 1024;

/// Bounded exponential backoff used when a state write conflicts.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait before the given (1-based) retry.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Crafter configuration.
///
/// Every field has a default, so an empty document or
/// [`CrafterConfig::default`] is a valid configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CrafterConfig {
    pub oidc_audience: String,
    #[serde(with = "duration_millis")]
    pub oidc_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub commit_verification_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub remote_state_timeout: Duration,
    pub max_inline_material_size: u64,
    pub conflict_retry: RetryPolicy,
    pub github_api_url: String,
    pub gitlab_oidc_token_env: String,
    pub tekton_marker_dir: String,
    pub dry_run: bool,
    pub policy_bypass: bool,
}

impl Default for CrafterConfig {
    fn default() -> Self {
        Self {
            oidc_audience: DEFAULT_OIDC_AUDIENCE.to_string(),
            oidc_timeout: Duration::from_secs(10),
            commit_verification_timeout: Duration::from_secs(10),
            remote_state_timeout: Duration::from_secs(30),
            max_inline_material_size: DEFAULT_MAX_INLINE_MATERIAL_SIZE,
            conflict_retry: RetryPolicy::default(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            gitlab_oidc_token_env: DEFAULT_GITLAB_OIDC_TOKEN_ENV.to_string(),
            tekton_marker_dir: DEFAULT_TEKTON_MARKER_DIR.to_string(),
            dry_run: false,
            policy_bypass: false,
        }
    }
}

impl CrafterConfig {
    /// Build a configuration from defaults overridden by environment variables.
    pub fn from_env(env: &dyn EnvLookup) -> Self {
        let mut config = Self::default();
        if let Some(audience) = env.var("CRAFTER_OIDC_AUDIENCE") {
            config.oidc_audience = audience;
        }
        if let Some(size) = env
            .var("CRAFTER_MAX_INLINE_SIZE")
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.max_inline_material_size = size;
        }
        if let Some(url) = env.var("GITHUB_API_URL") {
            config.github_api_url = url;
        }
        if let Some(dry_run) = env.var("CRAFTER_DRY_RUN") {
            config.dry_run = matches!(dry_run.as_str(), "1" | "true" | "TRUE" | "yes");
        }
        config
    }

    /// Set a non-default OIDC audience.
    pub fn with_oidc_audience(mut self, audience: &str) -> Self {
        self.oidc_audience = audience.to_string();
        self
    }

    /// Set a non-default GitHub API root, mostly useful for GitHub Enterprise.
    pub fn with_github_api_url(mut self, url: &str) -> Self {
        self.github_api_url = url.to_string();
        self
    }

    /// Set a non-default Tekton marker directory.
    pub fn with_tekton_marker_dir(mut self, dir: &str) -> Self {
        self.tekton_marker_dir = dir.to_string();
        self
    }

    pub fn with_max_inline_material_size(mut self, size: u64) -> Self {
        self.max_inline_material_size = size;
        self
    }

    pub fn with_conflict_retry(mut self, retry: RetryPolicy) -> Self {
        self.conflict_retry = retry;
        self
    }

    pub fn with_remote_state_timeout(mut self, timeout: Duration) -> Self {
        self.remote_state_timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Record gated policy violations without failing the operation.
    pub fn with_policy_bypass(mut self, bypass: bool) -> Self {
        self.policy_bypass = bypass;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: CrafterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CrafterConfig::default());
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config: CrafterConfig = serde_json::from_str(
            r#"{"oidc_timeout": 2500, "conflict_retry": {"max_attempts": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.oidc_timeout, Duration::from_millis(2500));
        assert_eq!(config.conflict_retry.max_attempts, 2);
        assert_eq!(
            config.conflict_retry.initial_backoff,
            RetryPolicy::default().initial_backoff
        );
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<String, String> = [
            ("CRAFTER_OIDC_AUDIENCE", "attestations"),
            ("CRAFTER_MAX_INLINE_SIZE", "42"),
            ("CRAFTER_DRY_RUN", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = CrafterConfig::from_env(&env);
        assert_eq!(config.oidc_audience, "attestations");
        assert_eq!(config.max_inline_material_size, 42);
        assert!(config.dry_run);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
    }
}
