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

use base64::{engine::general_purpose::STANDARD as BASE64_STD_ENGINE, Engine as _};
use pkcs8::DecodePublicKey;
use signature::Verifier;
use x509_cert::der::{Decode, Encode};

use super::{Signature, SigningScheme};

use crate::errors::*;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone)]
pub enum VerificationKey {
    ECDSA_P256_SHA256_ASN1(p256::ecdsa::VerifyingKey),
    ECDSA_P384_SHA384_ASN1(p384::ecdsa::VerifyingKey),
    ED25519(ed25519_dalek::VerifyingKey),
}

impl VerificationKey {
    /// Builds a [`VerificationKey`] from DER-encoded SubjectPublicKeyInfo,
    /// expecting a key of the given scheme.
    pub fn from_der(der_data: &[u8], signing_scheme: &SigningScheme) -> Result<Self> {
        Ok(match signing_scheme {
            SigningScheme::ECDSA_P256_SHA256_ASN1 => VerificationKey::ECDSA_P256_SHA256_ASN1(
                p256::ecdsa::VerifyingKey::from_public_key_der(der_data).map_err(|e| {
                    CrafterError::PKCS8SpkiError(format!(
                        "Ecdsa-P256 from der bytes to public key failed: {e}"
                    ))
                })?,
            ),
            SigningScheme::ECDSA_P384_SHA384_ASN1 => VerificationKey::ECDSA_P384_SHA384_ASN1(
                p384::ecdsa::VerifyingKey::from_public_key_der(der_data).map_err(|e| {
                    CrafterError::PKCS8SpkiError(format!(
                        "Ecdsa-P384 from der bytes to public key failed: {e}"
                    ))
                })?,
            ),
            SigningScheme::ED25519 => VerificationKey::ED25519(
                ed25519_dalek::VerifyingKey::from_public_key_der(der_data).map_err(|e| {
                    CrafterError::PKCS8SpkiError(format!(
                        "Ed25519 from der bytes to public key failed: {e}"
                    ))
                })?,
            ),
        })
    }

    /// Builds a [`VerificationKey`] from DER-encoded public key data. The
    /// verification algorithm follows the key type:
    /// * `EC public key with P-256 curve`: `ECDSA_P256_SHA256_ASN1`
    /// * `EC public key with P-384 curve`: `ECDSA_P384_SHA384_ASN1`
    /// * `Ed25519 public key`: `ED25519`
    pub fn try_from_der(der_data: &[u8]) -> Result<Self> {
        if let Ok(p256vk) = p256::ecdsa::VerifyingKey::from_public_key_der(der_data) {
            Ok(Self::ECDSA_P256_SHA256_ASN1(p256vk))
        } else if let Ok(p384vk) = p384::ecdsa::VerifyingKey::from_public_key_der(der_data) {
            Ok(Self::ECDSA_P384_SHA384_ASN1(p384vk))
        } else if let Ok(ed25519vk) = ed25519_dalek::VerifyingKey::from_public_key_der(der_data) {
            Ok(Self::ED25519(ed25519vk))
        } else {
            Err(CrafterError::InvalidKeyFormat {
                error: "Failed to parse the public key.".to_string(),
            })
        }
    }

    /// Builds a [`VerificationKey`] from PEM-encoded data.
    pub fn from_pem(pem_data: &[u8], signing_scheme: &SigningScheme) -> Result<Self> {
        let key_pem = pem::parse(pem_data)?;
        Self::from_der(key_pem.contents(), signing_scheme)
    }

    /// Builds a [`VerificationKey`] from PEM-encoded public key data, picking
    /// the algorithm like [`VerificationKey::try_from_der`].
    pub fn try_from_pem(pem_data: &[u8]) -> Result<Self> {
        let key_pem = pem::parse(pem_data)?;
        Self::try_from_der(key_pem.contents())
    }

    /// Extract the subject public key of a DER encoded X.509 certificate.
    pub fn from_certificate_der(cert_der: &[u8]) -> Result<Self> {
        let cert = x509_cert::Certificate::from_der(cert_der)?;
        let spki = cert.tbs_certificate.subject_public_key_info.to_der()?;
        Self::try_from_der(&spki)
    }

    /// Verify the signature provided has been actually generated by the given key
    /// when signing the provided message.
    pub fn verify_signature(&self, signature: Signature, msg: &[u8]) -> Result<()> {
        let sig = match signature {
            Signature::Raw(data) => data.to_owned(),
            Signature::Base64Encoded(data) => BASE64_STD_ENGINE.decode(data)?,
        };

        match self {
            // ECDSA signatures are encoded in der.
            VerificationKey::ECDSA_P256_SHA256_ASN1(inner) => {
                let sig = p256::ecdsa::Signature::from_der(&sig)?;
                inner
                    .verify(msg, &sig)
                    .map_err(|_| CrafterError::PublicKeyVerificationError)
            }
            VerificationKey::ECDSA_P384_SHA384_ASN1(inner) => {
                let sig = p384::ecdsa::Signature::from_der(&sig)?;
                inner
                    .verify(msg, &sig)
                    .map_err(|_| CrafterError::PublicKeyVerificationError)
            }
            VerificationKey::ED25519(inner) => {
                let sig = ed25519_dalek::Signature::from_slice(sig.as_slice())
                    .map_err(|_| CrafterError::PublicKeyVerificationError)?;
                inner
                    .verify(msg, &sig)
                    .map_err(|_| CrafterError::PublicKeyVerificationError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::crypto::signing_key::{tests::MESSAGE, Signer};

    #[rstest]
    #[case(SigningScheme::ECDSA_P256_SHA256_ASN1)]
    #[case(SigningScheme::ECDSA_P384_SHA384_ASN1)]
    #[case(SigningScheme::ED25519)]
    fn key_type_detected_from_pem(#[case] scheme: SigningScheme) {
        let signer = scheme.create_signer().unwrap();
        let key = VerificationKey::try_from_pem(signer.public_key_to_pem().unwrap().as_bytes())
            .unwrap();

        let signature = BASE64_STD_ENGINE.encode(signer.sign(MESSAGE.as_bytes()).unwrap());
        assert!(key
            .verify_signature(
                Signature::Base64Encoded(signature.as_bytes()),
                MESSAGE.as_bytes()
            )
            .is_ok());
    }

    #[test]
    fn wrong_scheme_fails_to_load() {
        let signer = SigningScheme::ED25519.create_signer().unwrap();
        let der = signer.public_key_to_der().unwrap();
        assert!(VerificationKey::from_der(&der, &SigningScheme::ECDSA_P256_SHA256_ASN1).is_err());
    }

    #[test]
    fn signature_from_another_key_is_rejected() {
        let signer = SigningScheme::ECDSA_P256_SHA256_ASN1.create_signer().unwrap();
        let other = SigningScheme::ECDSA_P256_SHA256_ASN1.create_signer().unwrap();
        let signature = other.sign(MESSAGE.as_bytes()).unwrap();

        let err = signer
            .to_verification_key()
            .unwrap()
            .verify_signature(Signature::Raw(&signature), MESSAGE.as_bytes())
            .unwrap_err();
        assert!(matches!(err, CrafterError::PublicKeyVerificationError));
    }

    #[test]
    fn garbage_is_not_a_certificate() {
        assert!(VerificationKey::from_certificate_der(b"not a certificate").is_err());
    }
}
