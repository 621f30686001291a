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

//! # ECDSA signers
//!
//! Two curves are provided, each paired with its recommended digest:
//! * [`P256Signer`]: `P-256` with `SHA-256`;
//! * [`P384Signer`]: `P-384` with `SHA-384`.
//!
//! Signatures are ASN.1 DER encoded and deterministic (RFC 6979).

use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::{
    crypto::{signing_key::Signer, SigningScheme},
    errors::*,
};

macro_rules! ecdsa_signer {
    ($name:ident, $curve:ident, $scheme:expr) => {
        #[derive(Clone)]
        pub struct $name {
            key: $curve::ecdsa::SigningKey,
        }

        impl $name {
            /// Generate a new random key.
            pub fn generate() -> Self {
                Self {
                    key: $curve::ecdsa::SigningKey::random(&mut OsRng),
                }
            }

            /// Import a pkcs8 DER-encoded private key.
            pub fn from_pkcs8_der(private_key: &[u8]) -> Result<Self> {
                $curve::ecdsa::SigningKey::from_pkcs8_der(private_key)
                    .map(|key| Self { key })
                    .map_err(|e| {
                        CrafterError::PKCS8Error(format!(
                            "Convert from pkcs8 der to ecdsa private key failed: {e}"
                        ))
                    })
            }

            /// `private_key_to_pem` will export the PEM-encoded pkcs8 private key.
            pub fn private_key_to_pem(&self) -> Result<Zeroizing<String>> {
                self.key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| CrafterError::PKCS8Error(e.to_string()))
            }
        }

        impl Signer for $name {
            fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
                let signature: $curve::ecdsa::Signature =
                    signature::Signer::try_sign(&self.key, msg)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }

            fn public_key_to_der(&self) -> Result<Vec<u8>> {
                self.key
                    .verifying_key()
                    .to_public_key_der()
                    .map(|der| der.into_vec())
                    .map_err(|e| CrafterError::PKCS8SpkiError(e.to_string()))
            }

            fn signing_scheme(&self) -> SigningScheme {
                $scheme
            }
        }
    };
}

ecdsa_signer!(P256Signer, p256, SigningScheme::ECDSA_P256_SHA256_ASN1);
ecdsa_signer!(P384Signer, p384, SigningScheme::ECDSA_P384_SHA384_ASN1);
