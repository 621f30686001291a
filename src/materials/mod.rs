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

//! Materials: the pieces of evidence an attestation carries.
//!
//! [`MaterialCrafter`] turns a raw value supplied by the workflow (a string,
//! an image reference or a file path) into a typed [`Material`], checking
//! the value really is of the declared [`MaterialKind`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CrafterError, Result};

mod container_image;
mod file;

pub use container_image::{parse_image_reference, ImageReference};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialKind {
    String,
    #[serde(alias = "ARTIFACT")]
    Generic,
    ContainerImage,
    SbomCyclonedxJson,
    SbomSpdxJson,
    JunitXml,
    Openvex,
    Sarif,
    Attestation,
    Evidence,
    PrInfo,
}

impl MaterialKind {
    /// Order in which kinds are tried when the caller does not name one.
    /// Stricter kinds come first so a loose kind never shadows them.
    pub const AUTO_DETECT_ORDER: [MaterialKind; 11] = [
        MaterialKind::Attestation,
        MaterialKind::SbomCyclonedxJson,
        MaterialKind::SbomSpdxJson,
        MaterialKind::Sarif,
        MaterialKind::Openvex,
        MaterialKind::JunitXml,
        MaterialKind::PrInfo,
        MaterialKind::ContainerImage,
        MaterialKind::Evidence,
        MaterialKind::Generic,
        MaterialKind::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::String => "STRING",
            MaterialKind::Generic => "GENERIC",
            MaterialKind::ContainerImage => "CONTAINER_IMAGE",
            MaterialKind::SbomCyclonedxJson => "SBOM_CYCLONEDX_JSON",
            MaterialKind::SbomSpdxJson => "SBOM_SPDX_JSON",
            MaterialKind::JunitXml => "JUNIT_XML",
            MaterialKind::Openvex => "OPENVEX",
            MaterialKind::Sarif => "SARIF",
            MaterialKind::Attestation => "ATTESTATION",
            MaterialKind::Evidence => "EVIDENCE",
            MaterialKind::PrInfo => "PR_INFO",
        }
    }

    /// Kinds whose value is a path to a file.
    pub fn is_file_based(&self) -> bool {
        !matches!(self, MaterialKind::String | MaterialKind::ContainerImage)
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialKind {
    type Err = CrafterError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "ARTIFACT" {
            return Ok(MaterialKind::Generic);
        }
        MaterialKind::AUTO_DETECT_ORDER
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CrafterError::UnknownMaterialKind(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MaterialValue {
    #[serde(rename_all = "camelCase")]
    String { value: String },
    #[serde(rename_all = "camelCase")]
    ContainerImage {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Artifact {
        file_name: String,
        size: u64,
        /// Base64 content when the file is small enough to travel inline.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inline_content: Option<String>,
        uploaded: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub name: String,
    pub kind: MaterialKind,
    pub value: MaterialValue,
    /// Hex encoded sha256 of the material content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub output: bool,
    pub added_at: DateTime<Utc>,
}

impl Material {
    pub fn digest(&self) -> Option<&str> {
        self.sha256.as_deref()
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Stores artifacts too large to inline, e.g. in an OCI registry or a
/// content addressable store.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, file_name: &str, content: &[u8], sha256: &str) -> Result<()>;
}

/// Crafts typed materials from raw input.
#[derive(Clone)]
pub struct MaterialCrafter {
    max_inline_size: u64,
    uploader: Option<Arc<dyn ArtifactUploader>>,
}

impl MaterialCrafter {
    pub fn new(max_inline_size: u64) -> Self {
        Self {
            max_inline_size,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ArtifactUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Craft `value` as a material of the given kind.
    ///
    /// Returns [`CrafterError::MaterialValidation`] when the value is not of
    /// that kind. Upload failures and oversized files without an uploader
    /// are reported with their own variants.
    pub async fn craft(&self, kind: MaterialKind, name: &str, value: &str) -> Result<Material> {
        let (value, sha256) = match kind {
            MaterialKind::String => {
                if value.is_empty() {
                    return Err(invalid(name, kind, "empty value"));
                }
                (
                    MaterialValue::String {
                        value: value.to_string(),
                    },
                    Some(sha256_hex(value.as_bytes())),
                )
            }
            MaterialKind::ContainerImage => {
                let image = parse_image_reference(value)
                    .map_err(|reason| invalid(name, kind, &reason))?;
                (
                    MaterialValue::ContainerImage {
                        name: image.repository,
                        tag: image.tag,
                    },
                    Some(image.sha256),
                )
            }
            _ => {
                let content = file::read(name, kind, value).await?;
                file::validate(kind, &content).map_err(|reason| invalid(name, kind, &reason))?;
                self.store_artifact(name, value, &content).await?
            }
        };

        Ok(Material {
            name: name.to_string(),
            kind,
            value,
            sha256,
            annotations: BTreeMap::new(),
            output: false,
            added_at: Utc::now(),
        })
    }

    async fn store_artifact(
        &self,
        name: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(MaterialValue, Option<String>)> {
        let digest = sha256_hex(content);
        let file_name = std::path::Path::new(path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let size = content.len() as u64;

        let (inline_content, uploaded) = if size <= self.max_inline_size {
            (Some(file::encode_inline(content)), false)
        } else {
            let Some(uploader) = &self.uploader else {
                return Err(CrafterError::MaterialTooLarge {
                    name: name.to_string(),
                    size,
                    limit: self.max_inline_size,
                });
            };
            uploader
                .upload(&file_name, content, &digest)
                .await
                .map_err(|e| match e {
                    CrafterError::Upload(_) => e,
                    other => CrafterError::Upload(other.to_string()),
                })?;
            (None, true)
        };

        Ok((
            MaterialValue::Artifact {
                file_name,
                size,
                inline_content,
                uploaded,
            },
            Some(digest),
        ))
    }
}

fn invalid(name: &str, kind: MaterialKind, reason: &str) -> CrafterError {
    CrafterError::MaterialValidation {
        name: name.to_string(),
        kind: kind.to_string(),
        reason: reason.to_string(),
    }
}
