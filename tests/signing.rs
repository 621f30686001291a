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

//! Signing and verification of DSSE envelopes with every supported signer.

use attestation_crafter::attestation::{
    dsse::PAYLOAD_TYPE, DsseSigner, DsseVerifier, Envelope, StatementBuilder, Subject,
};
use attestation_crafter::crypto::{SigStoreSigner, Signer, SigningScheme};
use rstest::rstest;
use serde_json::json;

fn statement_payload() -> Vec<u8> {
    let statement = StatementBuilder::new()
        .subject(Subject::new(
            "myapp-1.0.tar.gz",
            "sha256",
            "01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b",
        ))
        .predicate_type("https://slsa.dev/provenance/v1")
        .predicate(json!({"buildDefinition": {"buildType": "https://example.com/build/v1"}}))
        .build()
        .unwrap();
    serde_json::to_vec(&statement).unwrap()
}

#[rstest]
#[case(SigningScheme::ECDSA_P256_SHA256_ASN1)]
#[case(SigningScheme::ECDSA_P384_SHA384_ASN1)]
#[case(SigningScheme::ED25519)]
fn envelope_survives_serialization(#[case] scheme: SigningScheme) {
    let signer = DsseSigner::new(scheme.create_signer().unwrap());
    let envelope = signer.sign_envelope(&statement_payload()).unwrap();
    assert_eq!(envelope.payload_type, PAYLOAD_TYPE);

    let parsed = Envelope::from_json(envelope.to_json().unwrap().as_bytes()).unwrap();
    let verifier = DsseVerifier::for_signer(&signer).unwrap();
    assert_eq!(verifier.verify(&parsed).unwrap(), statement_payload());
}

#[test]
fn imported_key_verifies_envelopes_of_the_original() {
    let original = SigningScheme::ECDSA_P256_SHA256_ASN1.create_signer().unwrap();
    let pem = original.private_key_to_pem().unwrap();
    let imported = SigStoreSigner::from_pem(pem.as_bytes()).unwrap();

    let envelope = DsseSigner::new(original)
        .sign_envelope(&statement_payload())
        .unwrap();
    let verifier = DsseVerifier::new(imported.to_verification_key().unwrap());
    assert!(verifier.verify(&envelope).is_ok());
}

#[test]
fn signature_from_another_key_is_rejected() {
    let envelope = DsseSigner::new(SigningScheme::ED25519.create_signer().unwrap())
        .sign_envelope(&statement_payload())
        .unwrap();
    let other = SigningScheme::ED25519.create_signer().unwrap();
    assert!(DsseVerifier::for_signer(&other)
        .unwrap()
        .verify(&envelope)
        .is_err());
}

#[test]
fn double_wrapped_signer_fails_verification() {
    let signer = DsseSigner::new(DsseSigner::new(SigningScheme::default().create_signer().unwrap()));
    let envelope = signer.sign_envelope(&statement_payload()).unwrap();
    assert!(DsseVerifier::for_signer(&signer)
        .unwrap()
        .verify(&envelope)
        .is_err());
}
