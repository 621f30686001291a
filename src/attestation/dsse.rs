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

//! DSSE (Dead Simple Signing Envelope) signing and verification.
//!
//! See: <https://github.com/secure-systems-lab/dsse/blob/v1.0.0/envelope.md>

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use tracing::debug;

use crate::crypto::{Signature as RawSignature, Signer, SigningScheme, VerificationKey};
use crate::errors::{CrafterError, Result};

/// Payload type of in-toto statements.
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// Compute the DSSE Pre-Authentication Encoding (PAE):
///
/// ```text
/// "DSSEv1" + SP + LEN(type) + SP + type + SP + LEN(body) + SP + body
/// ```
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut pae = format!("DSSEv1 {} {} ", payload_type.len(), payload_type).into_bytes();
    pae.extend_from_slice(format!("{} ", payload.len()).as_bytes());
    pae.extend_from_slice(payload);
    pae
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Envelope {
    #[serde_as(as = "Base64")]
    pub payload: Vec<u8>,
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub signatures: Vec<Signature>,
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Signature {
    #[serde_as(as = "Base64")]
    pub sig: Vec<u8>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub keyid: String,
}

impl Envelope {
    pub fn from_json(contents: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(contents)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Signs the PAE of whatever it is given with the wrapped signer.
///
/// A `DsseSigner` is itself a [`Signer`], so wrapping one twice signs a PAE
/// of a PAE, which no [`DsseVerifier`] accepts.
pub struct DsseSigner<S> {
    inner: S,
    payload_type: String,
}

impl<S: Signer> DsseSigner<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            payload_type: PAYLOAD_TYPE.to_string(),
        }
    }

    pub fn with_payload_type(mut self, payload_type: &str) -> Self {
        self.payload_type = payload_type.to_string();
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Sign `payload` and wrap it into an envelope with a single signature.
    pub fn sign_envelope(&self, payload: &[u8]) -> Result<Envelope> {
        let sig = self.sign(payload)?;
        debug!(
            payload_type = %self.payload_type,
            scheme = %self.signing_scheme(),
            "payload signed"
        );
        Ok(Envelope {
            payload: payload.to_vec(),
            payload_type: self.payload_type.clone(),
            signatures: vec![Signature {
                sig,
                keyid: String::new(),
            }],
        })
    }
}

impl<S: Signer> Signer for DsseSigner<S> {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        self.inner.sign(&pae(&self.payload_type, msg))
    }

    fn public_key_to_der(&self) -> Result<Vec<u8>> {
        self.inner.public_key_to_der()
    }

    fn signing_scheme(&self) -> SigningScheme {
        self.inner.signing_scheme()
    }

    fn leaf_certificate(&self) -> Option<&[u8]> {
        self.inner.leaf_certificate()
    }
}

/// Verifies envelopes against a single key.
pub struct DsseVerifier {
    key: VerificationKey,
    payload_type: String,
}

impl DsseVerifier {
    pub fn new(key: VerificationKey) -> Self {
        Self {
            key,
            payload_type: PAYLOAD_TYPE.to_string(),
        }
    }

    /// Verifier for envelopes signed by `signer`.
    pub fn for_signer(signer: &dyn Signer) -> Result<Self> {
        Ok(Self::new(signer.to_verification_key()?))
    }

    /// Verify the signature of an envelope and return the payload if it is
    /// valid.
    pub fn verify(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        if envelope.payload_type != self.payload_type {
            return Err(CrafterError::UnexpectedPayloadType(
                envelope.payload_type.clone(),
            ));
        }
        if envelope.signatures.len() != 1 {
            return Err(CrafterError::InvalidSignatureCount(
                envelope.signatures.len(),
            ));
        }

        let pae = pae(&envelope.payload_type, &envelope.payload);
        self.key
            .verify_signature(RawSignature::Raw(&envelope.signatures[0].sig), &pae)?;
        Ok(envelope.payload.clone())
    }
}
