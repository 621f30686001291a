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

/// A container image pinned by digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: Option<String>,
    pub sha256: String,
}

/// Parse `repository[:tag]@sha256:<hex>`.
///
/// Only digest pinned references are accepted: resolving a tag would
/// require talking to the registry.
pub fn parse_image_reference(reference: &str) -> Result<ImageReference, String> {
    let (name, digest) = reference
        .split_once('@')
        .ok_or_else(|| format!("{reference} is not pinned by digest"))?;

    let hex = digest
        .strip_prefix("sha256:")
        .ok_or_else(|| format!("unsupported digest algorithm in {digest}"))?;
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Err(format!("malformed sha256 digest {hex}"));
    }

    // A colon after the last slash separates the tag, an earlier one is a
    // registry port.
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (repository, tag) = match name[last_slash..].rfind(':') {
        Some(i) => {
            let split = last_slash + i;
            (&name[..split], Some(name[split + 1..].to_string()))
        }
        None => (name, None),
    };
    if repository.is_empty() || repository.contains(char::is_whitespace) {
        return Err(format!("invalid repository in {reference}"));
    }

    Ok(ImageReference {
        repository: repository.to_string(),
        tag,
        sha256: hex.to_string(),
    })
}
