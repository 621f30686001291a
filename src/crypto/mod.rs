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

//! Signing schemes, signers and verification keys used to seal attestations.
//!
//! Two families of signers are available:
//! * key-based signers ([`SigStoreSigner`]) backed by a long lived private
//!   key, either generated on the fly or imported from a PKCS8 PEM file;
//! * keyless signers ([`keyless::FulcioSigner`]) backed by an ephemeral key
//!   and a short lived certificate issued by Fulcio for the workload identity.

use crate::errors::*;

pub mod keyless;
pub mod signing_key;
pub mod verification_key;

pub use signing_key::{SigStoreSigner, Signer};
pub use verification_key::VerificationKey;

use self::signing_key::{
    ecdsa::{P256Signer, P384Signer},
    ed25519::Ed25519Signer,
};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum SigningScheme {
    #[default]
    ECDSA_P256_SHA256_ASN1,
    ECDSA_P384_SHA384_ASN1,
    ED25519,
}

impl std::fmt::Display for SigningScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningScheme::ECDSA_P256_SHA256_ASN1 => write!(f, "ECDSA_P256_SHA256_ASN1"),
            SigningScheme::ECDSA_P384_SHA384_ASN1 => write!(f, "ECDSA_P384_SHA384_ASN1"),
            SigningScheme::ED25519 => write!(f, "ED25519"),
        }
    }
}

impl TryFrom<&str> for SigningScheme {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value {
            "ECDSA_P256_SHA256_ASN1" => Ok(Self::ECDSA_P256_SHA256_ASN1),
            "ECDSA_P384_SHA384_ASN1" => Ok(Self::ECDSA_P384_SHA384_ASN1),
            "ED25519" => Ok(Self::ED25519),
            unknown => Err(format!("Unsupported signing algorithm: {unknown}")),
        }
    }
}

impl SigningScheme {
    /// Create a fresh key due to the given signing scheme.
    pub fn create_signer(&self) -> Result<SigStoreSigner> {
        Ok(match self {
            SigningScheme::ECDSA_P256_SHA256_ASN1 => {
                SigStoreSigner::ECDSA_P256_SHA256_ASN1(P256Signer::generate())
            }
            SigningScheme::ECDSA_P384_SHA384_ASN1 => {
                SigStoreSigner::ECDSA_P384_SHA384_ASN1(P384Signer::generate())
            }
            SigningScheme::ED25519 => SigStoreSigner::ED25519(Ed25519Signer::generate()),
        })
    }

    /// Key algorithm name as Fulcio expects it in a certificate request.
    pub(crate) fn fulcio_key_algorithm(&self) -> &'static str {
        match self {
            SigningScheme::ECDSA_P256_SHA256_ASN1 | SigningScheme::ECDSA_P384_SHA384_ASN1 => "ECDSA",
            SigningScheme::ED25519 => "ED25519",
        }
    }
}

pub enum Signature<'a> {
    /// Raw signature. There's no need to process the contents
    Raw(&'a [u8]),
    /// A base64 encoded signature
    Base64Encoded(&'a [u8]),
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ECDSA_P256_SHA256_ASN1", SigningScheme::ECDSA_P256_SHA256_ASN1)]
    #[case("ECDSA_P384_SHA384_ASN1", SigningScheme::ECDSA_P384_SHA384_ASN1)]
    #[case("ED25519", SigningScheme::ED25519)]
    fn scheme_names_round_trip(#[case] name: &str, #[case] scheme: SigningScheme) {
        assert_eq!(SigningScheme::try_from(name).unwrap(), scheme);
        assert_eq!(scheme.to_string(), name);
    }

    #[test]
    fn rsa_is_not_supported() {
        assert!(SigningScheme::try_from("RSA_PSS_SHA256").is_err());
    }
}
