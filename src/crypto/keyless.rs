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

//! Keyless signing: an ephemeral key certified by Fulcio for the identity
//! carried by an OIDC token.

use std::fmt;
use std::time::Duration;

use base64::{
    engine::general_purpose::{STANDARD as BASE64_STD_ENGINE, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{signing_key::Signer, SigStoreSigner, SigningScheme};
use crate::errors::*;

/// Default public Fulcio server root.
pub const FULCIO_ROOT: &str = "https://fulcio.sigstore.dev/";

/// Path within Fulcio to obtain a signing certificate.
pub const SIGNING_CERT_PATH: &str = "api/v2/signingCert";

const SIGSTORE_AUDIENCE: &str = "sigstore";

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Claims {
    aud: Audience,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    #[serde(default)]
    pub nbf: Option<DateTime<Utc>>,
    pub email: Option<String>,
    pub iss: String,
    pub sub: Option<String>,
}

/// The claim Fulcio binds the certificate to. Depending on the issuer it
/// is either the "sub" or the "email" claim.
#[derive(Debug, PartialEq)]
pub enum Identity {
    Sub(String),
    Email(String),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identity::Sub(sub) => sub.fmt(f),
            Identity::Email(email) => email.fmt(f),
        }
    }
}

/// An OIDC token meant for Fulcio.
///
/// The claims are decoded but **not verified**; Fulcio verifies the token
/// when issuing the certificate.
pub struct IdentityToken {
    original_token: String,
    claims: Claims,
    pub identity: Identity,
}

impl IdentityToken {
    pub fn unverified_claims(&self) -> &Claims {
        &self.claims
    }

    /// Returns whether or not this token is within its self-stated validity period.
    pub fn in_validity_period(&self) -> bool {
        let now = Utc::now();

        if let Some(nbf) = self.claims.nbf {
            nbf <= now && now < self.claims.exp
        } else {
            now < self.claims.exp
        }
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.original_token)
    }
}

impl TryFrom<&str> for IdentityToken {
    type Error = CrafterError;

    fn try_from(value: &str) -> Result<Self> {
        let parts: [&str; 3] = value
            .split('.')
            .collect::<Vec<_>>()
            .try_into()
            .or(Err(CrafterError::IdentityTokenError("Malformed JWT".into())))?;

        let claims = URL_SAFE_NO_PAD
            .decode(parts[1].trim_end_matches('='))
            .or(Err(CrafterError::IdentityTokenError(
                "Malformed JWT: Unable to decode claims".into(),
            )))?;
        let claims: Claims = serde_json::from_slice(&claims).or(Err(
            CrafterError::IdentityTokenError("Malformed JWT: claims JSON malformed".into()),
        ))?;
        if !claims.aud.contains(SIGSTORE_AUDIENCE) {
            return Err(CrafterError::IdentityTokenError(
                "Not a Sigstore JWT".into(),
            ));
        }

        let identity = match claims.iss.as_str() {
            "https://accounts.google.com"
            | "https://oauth2.sigstore.dev/auth"
            | "https://oauth2.sigstage.dev/auth" => match claims.email.as_ref() {
                Some(email) => Identity::Email(email.clone()),
                None => {
                    return Err(CrafterError::IdentityTokenError(
                        "Email claim not found in JWT".into(),
                    ))
                }
            },
            _ => match claims.sub.as_ref() {
                Some(sub) => Identity::Sub(sub.clone()),
                None => {
                    return Err(CrafterError::IdentityTokenError(
                        "Sub claim not found in JWT".into(),
                    ))
                }
            },
        };

        Ok(IdentityToken {
            original_token: value.to_owned(),
            claims,
            identity,
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Credentials {
    oidc_identity_token: String,
}

#[derive(Serialize, Debug)]
struct PublicKey {
    algorithm: &'static str,
    content: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PublicKeyRequest {
    public_key: PublicKey,
    proof_of_possession: String,
}

/// Fulcio certificate signing request: a public key and a signed challenge
/// proving possession of the private key.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Csr {
    credentials: Credentials,
    public_key_request: PublicKeyRequest,
}

#[derive(Deserialize)]
struct Chain {
    certificates: Vec<String>,
}

#[derive(Deserialize)]
struct SignedCertificate {
    chain: Chain,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrResponse {
    signed_certificate_detached_sct: Option<SignedCertificate>,
    signed_certificate_embedded_sct: Option<SignedCertificate>,
}

/// Client requesting signing certificates from Fulcio.
pub struct FulcioClient {
    root_url: Url,
    http: reqwest::Client,
}

impl FulcioClient {
    pub fn new(root_url: Url, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { root_url, http })
    }

    /// Generate an ephemeral key for `signing_scheme` and have Fulcio
    /// certify it for the identity in `token`.
    pub async fn request_cert(
        &self,
        signing_scheme: SigningScheme,
        token: &IdentityToken,
    ) -> Result<FulcioSigner> {
        let signer = signing_scheme.create_signer()?;
        let challenge = token.identity.to_string();
        let proof_of_possession = BASE64_STD_ENGINE.encode(signer.sign(challenge.as_bytes())?);

        let csr = Csr {
            credentials: Credentials {
                oidc_identity_token: token.to_string(),
            },
            public_key_request: PublicKeyRequest {
                public_key: PublicKey {
                    algorithm: signing_scheme.fulcio_key_algorithm(),
                    content: signer.public_key_to_pem()?,
                },
                proof_of_possession,
            },
        };

        let response = self
            .http
            .post(self.root_url.join(SIGNING_CERT_PATH)?)
            .bearer_auth(token.to_string())
            .json(&csr)
            .send()
            .await
            .map_err(|e| CrafterError::FulcioClientError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrafterError::FulcioClientError(format!(
                "unexpected status {status}"
            )));
        }

        let cert_response = response
            .json::<CsrResponse>()
            .await
            .map_err(|_| CrafterError::FulcioCertificatesNotProvided)?;

        let chain = cert_response
            .signed_certificate_detached_sct
            .or(cert_response.signed_certificate_embedded_sct)
            .map(|signed| signed.chain.certificates)
            .unwrap_or_default();

        let mut chain = chain
            .iter()
            .map(|cert| pem::parse(cert).map(|pem| pem.into_contents()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if chain.is_empty() {
            return Err(CrafterError::FulcioCertificatesNotProvided);
        }
        let leaf = chain.remove(0);
        debug!(
            identity = %token.identity,
            intermediates = chain.len(),
            "obtained signing certificate from fulcio"
        );

        Ok(FulcioSigner {
            signer,
            leaf,
            chain,
        })
    }
}

/// Ephemeral key plus the certificate Fulcio issued for it.
pub struct FulcioSigner {
    signer: SigStoreSigner,
    leaf: Vec<u8>,
    chain: Vec<Vec<u8>>,
}

impl FulcioSigner {
    /// DER encoded certificates above the leaf, up to the root.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }
}

impl Signer for FulcioSigner {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        self.signer.sign(msg)
    }

    fn public_key_to_der(&self) -> Result<Vec<u8>> {
        self.signer.public_key_to_der()
    }

    fn signing_scheme(&self) -> SigningScheme {
        self.signer.signing_scheme()
    }

    fn leaf_certificate(&self) -> Option<&[u8]> {
        Some(&self.leaf)
    }
}
