//
// Copyright 2021 The Sigstore Authors.
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

//! The errors that can be raised by attestation-crafter

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrafterError>;

#[derive(Error, Debug)]
pub enum CrafterError {
    #[error("crafting state not loaded, call init or load_state first")]
    StateNotLoaded,

    #[error("crafting schema is required")]
    MissingSchema,

    #[error("workflow metadata is required")]
    MissingMetadata,

    #[error("material {name} not found in schema")]
    MaterialNotInSchema { name: String },

    #[error("unknown material kind: {0}")]
    UnknownMaterialKind(String),

    #[error("material {name} of kind {kind} is invalid: {reason}")]
    MaterialValidation {
        name: String,
        kind: String,
        reason: String,
    },

    #[error("material {material} is missing required annotation {annotation}")]
    MissingAnnotation {
        material: String,
        annotation: String,
    },

    #[error("attestation is missing required materials: {}", .0.join(", "))]
    MissingRequiredMaterials(Vec<String>),

    #[error("the provided value could not be crafted as any known material kind")]
    NoMatchingMaterialKind,

    #[error("attestation statement is invalid: {0}")]
    StatementValidation(String),

    #[error("DSSE: exactly 1 signature allowed, got {0}")]
    InvalidSignatureCount(usize),

    #[error("DSSE: unexpected payload type {0}")]
    UnexpectedPayloadType(String),

    #[error("policy gate violation: {}", .violations.join("; "))]
    PolicyGateViolation { violations: Vec<String> },

    #[error("policy verification failed: {0}")]
    PolicyVerification(String),

    #[error("crafting state {key} was modified concurrently, re-read and retry")]
    StateConflict { key: String },

    #[error("state service request failed: {0}")]
    StateService(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("runner mismatch: expected {expected}, discovered {discovered}")]
    RunnerMismatch {
        expected: String,
        discovered: String,
    },

    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("artifact upload failed: {0}")]
    Upload(String),

    #[error("material {name} is {size} bytes, above the inline limit of {limit} bytes and no uploader is configured")]
    MaterialTooLarge { name: String, size: u64, limit: u64 },

    #[error("Unable to parse identity token: {0}")]
    IdentityTokenError(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("invalid key format: {error}")]
    InvalidKeyFormat { error: String },

    #[error("unmatched key type {key_typ} and signing scheme {scheme}")]
    UnmatchedKeyAndSigningScheme { key_typ: String, scheme: String },

    #[error("Public key verification error")]
    PublicKeyVerificationError,

    #[error("Public key with unsupported algorithm: {0}")]
    PublicKeyUnsupportedAlgorithmError(String),

    #[error("Fulcio request unsuccessful: {0}")]
    FulcioClientError(String),

    #[error("Fulcio certificates not provided")]
    FulcioCertificatesNotProvided,

    #[error("Pkcs8 error : {0}")]
    PKCS8Error(String),

    #[error("Pkcs8 spki error : {0}")]
    PKCS8SpkiError(String),

    #[error("Failed to parse the key: {0}")]
    KeyParseError(String),

    #[error(transparent)]
    ECDSAError(#[from] ecdsa::Error),

    #[error(transparent)]
    X509ParseError(#[from] x509_cert::der::Error),

    #[error(transparent)]
    FromPEMError(#[from] pem::PemError),

    #[error(transparent)]
    Base64DecodeError(#[from] base64::DecodeError),

    #[error("failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::error::Error),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error("{0}")]
    UnexpectedError(String),
}

impl CrafterError {
    /// Returns true for optimistic concurrency conflicts, the only errors a
    /// caller should retry automatically.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CrafterError::StateConflict { .. })
    }

    /// Returns true when a gated policy blocked the operation.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, CrafterError::PolicyGateViolation { .. })
    }

    /// Errors that prove the input was understood but the operation still
    /// cannot proceed. Material kind auto-detection stops on these instead of
    /// trying the next kind.
    pub fn is_confirmed_failure(&self) -> bool {
        matches!(
            self,
            CrafterError::PolicyGateViolation { .. }
                | CrafterError::StateConflict { .. }
                | CrafterError::Upload(_)
                | CrafterError::MaterialTooLarge { .. }
                | CrafterError::StateService(_)
                | CrafterError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_the_only_retryable_error() {
        let conflict = CrafterError::StateConflict {
            key: "run-1".into(),
        };
        assert!(conflict.is_conflict());
        assert!(conflict.is_confirmed_failure());

        let gate = CrafterError::PolicyGateViolation {
            violations: vec!["no critical vulnerabilities".into()],
        };
        assert!(!gate.is_conflict());
        assert!(gate.is_policy_violation());

        let validation = CrafterError::MaterialValidation {
            name: "sbom".into(),
            kind: "SBOM_CYCLONEDX_JSON".into(),
            reason: "not json".into(),
        };
        assert!(!validation.is_confirmed_failure());
    }

    #[test]
    fn missing_lists_are_joined() {
        let err = CrafterError::MissingRequiredMaterials(vec!["image".into(), "sbom".into()]);
        assert_eq!(
            err.to_string(),
            "attestation is missing required materials: image, sbom"
        );
    }
}
