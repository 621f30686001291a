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

//! Sigstore bundles wrapping signed attestations.

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use super::dsse::Envelope;
use crate::errors::Result;

/// Media type of the bundles produced by this crate.
pub const BUNDLE_MEDIA_TYPE_V0_3: &str = "application/vnd.dev.sigstore.bundle.v0.3+json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub media_type: String,
    /// Only present for certificate backed signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_material: Option<VerificationMaterial>,
    pub dsse_envelope: Envelope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationMaterial {
    pub certificate: X509Certificate,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct X509Certificate {
    #[serde_as(as = "Base64")]
    pub raw_bytes: Vec<u8>,
}

impl Bundle {
    /// Bundle `envelope`, embedding `leaf_certificate` when there is one.
    ///
    /// The rest of the chain is never embedded: verifiers rebuild it from
    /// their own trust roots.
    pub fn new(envelope: Envelope, leaf_certificate: Option<&[u8]>) -> Self {
        Self {
            media_type: BUNDLE_MEDIA_TYPE_V0_3.to_string(),
            verification_material: leaf_certificate.map(|der| VerificationMaterial {
                certificate: X509Certificate {
                    raw_bytes: der.to_vec(),
                },
            }),
            dsse_envelope: envelope,
        }
    }

    pub fn from_json(contents: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(contents)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use base64::{engine::general_purpose::STANDARD as BASE64_STD_ENGINE, Engine as _};
    use serde_json::json;

    use super::*;
    use crate::attestation::dsse::Signature;

    fn envelope() -> Envelope {
        Envelope {
            payload: b"{}".to_vec(),
            payload_type: "application/vnd.in-toto+json".into(),
            signatures: vec![Signature {
                sig: b"sig".to_vec(),
                keyid: String::new(),
            }],
        }
    }

    #[test]
    fn key_based_bundle_has_no_verification_material() {
        let bundle = Bundle::new(envelope(), None);
        assert_json_eq!(
            serde_json::to_value(&bundle).unwrap(),
            json!({
                "mediaType": BUNDLE_MEDIA_TYPE_V0_3,
                "dsseEnvelope": {
                    "payload": BASE64_STD_ENGINE.encode("{}"),
                    "payloadType": "application/vnd.in-toto+json",
                    "signatures": [{"sig": BASE64_STD_ENGINE.encode("sig")}]
                }
            })
        );
    }

    #[test]
    fn keyless_bundle_embeds_leaf_only() {
        let bundle = Bundle::new(envelope(), Some(b"leaf-der"));
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(
            value["verificationMaterial"],
            json!({"certificate": {"rawBytes": BASE64_STD_ENGINE.encode("leaf-der")}})
        );

        let parsed = Bundle::from_json(bundle.to_json_pretty().unwrap().as_bytes()).unwrap();
        assert_eq!(parsed, bundle);
    }
}
