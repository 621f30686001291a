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

//! Content checks for file based material kinds.

use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use serde_json::Value;

use super::MaterialKind;
use crate::errors::{CrafterError, Result};

const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

pub(super) async fn read(name: &str, kind: MaterialKind, path: &str) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| CrafterError::MaterialValidation {
            name: name.to_string(),
            kind: kind.to_string(),
            reason: format!("cannot read {path}: {e}"),
        })
}

pub(super) fn encode_inline(content: &[u8]) -> String {
    base64.encode(content)
}

fn json(content: &[u8]) -> std::result::Result<Value, String> {
    serde_json::from_slice(content).map_err(|e| format!("not a JSON document: {e}"))
}

fn str_field<'a>(doc: &'a Value, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

/// Check `content` is a document of the given kind.
pub(super) fn validate(kind: MaterialKind, content: &[u8]) -> std::result::Result<(), String> {
    match kind {
        MaterialKind::Generic => Ok(()),
        MaterialKind::Attestation => {
            let doc = json(content)?;
            let envelope = doc.get("dsseEnvelope").unwrap_or(&doc);
            match str_field(envelope, "payloadType") {
                Some(IN_TOTO_PAYLOAD_TYPE) => {}
                Some(other) => return Err(format!("unexpected payload type {other}")),
                None => return Err("not a DSSE envelope or bundle".into()),
            }
            if str_field(envelope, "payload").is_none() {
                return Err("envelope has no payload".into());
            }
            match envelope.get("signatures").and_then(Value::as_array) {
                Some(signatures) if !signatures.is_empty() => Ok(()),
                _ => Err("envelope is not signed".into()),
            }
        }
        MaterialKind::SbomCyclonedxJson => {
            let doc = json(content)?;
            match str_field(&doc, "bomFormat") {
                Some("CycloneDX") => Ok(()),
                _ => Err("missing bomFormat CycloneDX".into()),
            }
        }
        MaterialKind::SbomSpdxJson => {
            let doc = json(content)?;
            match str_field(&doc, "spdxVersion") {
                Some(v) if v.starts_with("SPDX-") => Ok(()),
                _ => Err("missing spdxVersion".into()),
            }
        }
        MaterialKind::Sarif => {
            let doc = json(content)?;
            if str_field(&doc, "version").is_none() {
                return Err("missing SARIF version".into());
            }
            match doc.get("runs") {
                Some(Value::Array(_)) => Ok(()),
                _ => Err("missing SARIF runs".into()),
            }
        }
        MaterialKind::Openvex => {
            let doc = json(content)?;
            match str_field(&doc, "@context") {
                Some(ctx) if ctx.starts_with("https://openvex.dev/ns") => Ok(()),
                _ => Err("missing OpenVEX context".into()),
            }
        }
        MaterialKind::JunitXml => {
            let text = std::str::from_utf8(content).map_err(|_| "not UTF-8 text".to_string())?;
            match root_element(text) {
                Some(root) if root == "testsuites" || root == "testsuite" => Ok(()),
                Some(root) => Err(format!("unexpected root element <{root}>")),
                None => Err("not an XML document".into()),
            }
        }
        MaterialKind::PrInfo => {
            let doc = json(content)?;
            for field in ["platform", "type", "number", "url"] {
                if doc.get(field).map_or(true, Value::is_null) {
                    return Err(format!("missing {field}"));
                }
            }
            match str_field(&doc, "type") {
                Some("pull_request" | "merge_request") => Ok(()),
                _ => Err("type must be pull_request or merge_request".into()),
            }
        }
        MaterialKind::Evidence => {
            let doc = json(content)?;
            if str_field(&doc, "id").is_none() || doc.get("data").is_none() {
                return Err("evidence requires id and data".into());
            }
            Ok(())
        }
        MaterialKind::String | MaterialKind::ContainerImage => {
            Err(format!("{kind} is not a file based kind"))
        }
    }
}

/// Name of the first element of an XML document, skipping the prolog,
/// comments and doctype.
fn root_element(text: &str) -> Option<&str> {
    let mut rest = text.trim_start_matches('\u{feff}');
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("<?") {
            rest = &after[after.find("?>")? + 2..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = &after[after.find("-->")? + 3..];
        } else if let Some(after) = rest.strip_prefix("<!") {
            rest = &after[after.find('>')? + 1..];
        } else if let Some(after) = rest.strip_prefix('<') {
            let end = after
                .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .unwrap_or(after.len());
            let name = &after[..end];
            return (!name.is_empty()).then_some(name);
        } else {
            return None;
        }
    }
}
