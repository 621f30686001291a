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

//! # Signing keys
//!
//! Every signer implements [`Signer`]. [`SigStoreSigner`] is the closed set
//! of key-based signers, wrapping one concrete key type per
//! [`SigningScheme`]:
//!
//! ```rust
//! use attestation_crafter::crypto::{Signature, Signer, SigningScheme};
//!
//! let signer = SigningScheme::ECDSA_P256_SHA256_ASN1.create_signer().unwrap();
//! let signature = signer.sign(b"some message").unwrap();
//!
//! let verification_key = signer.to_verification_key().unwrap();
//! assert!(verification_key
//!     .verify_signature(Signature::Raw(&signature), b"some message")
//!     .is_ok());
//! ```

use zeroize::Zeroizing;

use crate::errors::*;

use self::{
    ecdsa::{P256Signer, P384Signer},
    ed25519::Ed25519Signer,
};

use super::{verification_key::VerificationKey, SigningScheme};

pub mod ecdsa;
pub mod ed25519;

pub const PUBLIC_KEY_PEM_LABEL: &str = "PUBLIC KEY";

pub const PRIVATE_KEY_PEM_LABEL: &str = "PRIVATE KEY";

pub trait Signer: Send + Sync {
    /// `sign` will sign the given data, and return the signature.
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>>;

    /// `public_key_to_der` will export the asn.1 PKIX public key.
    fn public_key_to_der(&self) -> Result<Vec<u8>>;

    fn signing_scheme(&self) -> SigningScheme;

    /// `public_key_to_pem` will export the PEM-encoded public key.
    fn public_key_to_pem(&self) -> Result<String> {
        let der = self.public_key_to_der()?;
        Ok(pem::encode(&pem::Pem::new(PUBLIC_KEY_PEM_LABEL, der)))
    }

    /// DER encoded certificate binding the public key to an identity.
    /// Only keyless signers have one.
    fn leaf_certificate(&self) -> Option<&[u8]> {
        None
    }

    /// `to_verification_key` will derive the [`VerificationKey`] able to
    /// check signatures produced by this signer.
    fn to_verification_key(&self) -> Result<VerificationKey> {
        VerificationKey::from_der(&self.public_key_to_der()?, &self.signing_scheme())
    }
}

impl<T: Signer + ?Sized> Signer for Box<T> {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        (**self).sign(msg)
    }

    fn public_key_to_der(&self) -> Result<Vec<u8>> {
        (**self).public_key_to_der()
    }

    fn signing_scheme(&self) -> SigningScheme {
        (**self).signing_scheme()
    }

    fn leaf_certificate(&self) -> Option<&[u8]> {
        (**self).leaf_certificate()
    }
}

#[derive(Clone)]
#[allow(non_camel_case_types)]
pub enum SigStoreSigner {
    ECDSA_P256_SHA256_ASN1(P256Signer),
    ECDSA_P384_SHA384_ASN1(P384Signer),
    ED25519(Ed25519Signer),
}

impl std::fmt::Debug for SigStoreSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigStoreSigner({})", self.signing_scheme())
    }
}

macro_rules! sigstore_signer_from {
    ($func: ident ($($args:expr),*)) => {
        if let Ok(signer) = P256Signer::$func($($args,)*) {
            Ok(SigStoreSigner::ECDSA_P256_SHA256_ASN1(signer))
        } else if let Ok(signer) = P384Signer::$func($($args,)*) {
            Ok(SigStoreSigner::ECDSA_P384_SHA384_ASN1(signer))
        } else if let Ok(signer) = Ed25519Signer::$func($($args,)*) {
            Ok(SigStoreSigner::ED25519(signer))
        } else {
            Err(CrafterError::KeyParseError("Unsupported key type".to_string()))
        }
    }
}

impl SigStoreSigner {
    /// Return the inner `Signer` of the enum. This function
    /// is useful in the inner interface conversion.
    fn as_inner(&self) -> &dyn Signer {
        match self {
            SigStoreSigner::ECDSA_P256_SHA256_ASN1(inner) => inner,
            SigStoreSigner::ECDSA_P384_SHA384_ASN1(inner) => inner,
            SigStoreSigner::ED25519(inner) => inner,
        }
    }

    /// Builds a `SigStoreSigner` from a pkcs8 DER-encoded private key.
    /// The key type, and so the signing scheme, is taken from the key.
    pub fn from_der(private_key: &[u8]) -> Result<Self> {
        sigstore_signer_from!(from_pkcs8_der(private_key))
    }

    /// Builds a `SigStoreSigner` from a pkcs8 PEM-encoded private key.
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let pem_data = std::str::from_utf8(pem_data)?;
        let (label, document) = pkcs8::SecretDocument::from_pem(pem_data)
            .map_err(|e| CrafterError::PKCS8Error(e.to_string()))?;
        if label != PRIVATE_KEY_PEM_LABEL {
            return Err(CrafterError::InvalidKeyFormat {
                error: format!("unsupported pem tag {label}"),
            });
        }
        Self::from_der(document.as_bytes())
    }

    /// Builds a `SigStoreSigner` from a pkcs8 PEM-encoded private key,
    /// failing if the key does not belong to `scheme`.
    pub fn from_pem_with_scheme(pem_data: &[u8], scheme: SigningScheme) -> Result<Self> {
        let signer = Self::from_pem(pem_data)?;
        if signer.signing_scheme() != scheme {
            return Err(CrafterError::UnmatchedKeyAndSigningScheme {
                key_typ: signer.signing_scheme().to_string(),
                scheme: scheme.to_string(),
            });
        }
        Ok(signer)
    }

    /// `private_key_to_pem` will export the PEM-encoded pkcs8 private key.
    pub fn private_key_to_pem(&self) -> Result<Zeroizing<String>> {
        match self {
            SigStoreSigner::ECDSA_P256_SHA256_ASN1(inner) => inner.private_key_to_pem(),
            SigStoreSigner::ECDSA_P384_SHA384_ASN1(inner) => inner.private_key_to_pem(),
            SigStoreSigner::ED25519(inner) => inner.private_key_to_pem(),
        }
    }
}

impl Signer for SigStoreSigner {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        self.as_inner().sign(msg)
    }

    fn public_key_to_der(&self) -> Result<Vec<u8>> {
        self.as_inner().public_key_to_der()
    }

    fn signing_scheme(&self) -> SigningScheme {
        self.as_inner().signing_scheme()
    }
}
