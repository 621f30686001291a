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

use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{
    crypto::{signing_key::Signer, SigningScheme},
    errors::*,
};

#[derive(Clone)]
pub struct Ed25519Signer {
    key: ed25519_dalek::SigningKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        Self {
            key: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_pkcs8_der(private_key: &[u8]) -> Result<Self> {
        ed25519_dalek::SigningKey::from_pkcs8_der(private_key)
            .map(|key| Self { key })
            .map_err(|e| {
                CrafterError::PKCS8Error(format!(
                    "Convert from pkcs8 der to ed25519 private key failed: {e}"
                ))
            })
    }

    pub fn private_key_to_pem(&self) -> Result<Zeroizing<String>> {
        self.key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CrafterError::PKCS8Error(e.to_string()))
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let signature = ed25519_dalek::Signer::sign(&self.key, msg);
        Ok(signature.to_bytes().to_vec())
    }

    fn public_key_to_der(&self) -> Result<Vec<u8>> {
        self.key
            .verifying_key()
            .to_public_key_der()
            .map(|der| der.into_vec())
            .map_err(|e| CrafterError::PKCS8SpkiError(e.to_string()))
    }

    fn signing_scheme(&self) -> SigningScheme {
        SigningScheme::ED25519
    }
}
