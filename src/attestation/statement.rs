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

//! In-toto attestation statements.
//!
//! Statements follow the v1 layout:
//! <https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md>

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CrafterError, Result};

/// The in-toto Statement v1 type identifier.
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// An in-toto Statement v1 attestation.
///
/// Field order matches the serialization signed into the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<Subject>,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    pub predicate: serde_json::Value,
}

impl Statement {
    /// Check the statement is well formed before it is signed.
    pub fn validate(&self) -> Result<()> {
        if self.statement_type != STATEMENT_TYPE_V1 {
            return Err(CrafterError::StatementValidation(format!(
                "unexpected statement type {}",
                self.statement_type
            )));
        }
        if self.predicate_type.is_empty() {
            return Err(CrafterError::StatementValidation(
                "missing predicate type".into(),
            ));
        }
        if self.subject.is_empty() {
            return Err(CrafterError::StatementValidation(
                "statement must have at least one subject".into(),
            ));
        }
        self.subject.iter().try_for_each(Subject::validate)
    }
}

/// A subject of an in-toto statement (an artifact being attested to).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub name: String,

    /// Algorithm -> hex-encoded digest.
    pub digest: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Subject {
    /// Creates a new subject with the given name and a single digest.
    pub fn new(
        name: impl Into<String>,
        algorithm: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            digest: BTreeMap::from([(algorithm.into(), digest.into())]),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CrafterError::StatementValidation(
                "subject without a name".into(),
            ));
        }
        if self.digest.is_empty() {
            return Err(CrafterError::StatementValidation(format!(
                "subject {} has no digest",
                self.name
            )));
        }
        for (algorithm, digest) in &self.digest {
            if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CrafterError::StatementValidation(format!(
                    "subject {} has a malformed {algorithm} digest",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Statement`].
#[derive(Default)]
pub struct StatementBuilder {
    subjects: Vec<Subject>,
    predicate_type: Option<String>,
    predicate: Option<serde_json::Value>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subjects.push(subject);
        self
    }

    pub fn subjects(mut self, subjects: impl IntoIterator<Item = Subject>) -> Self {
        self.subjects.extend(subjects);
        self
    }

    pub fn predicate_type(mut self, predicate_type: impl Into<String>) -> Self {
        self.predicate_type = Some(predicate_type.into());
        self
    }

    pub fn predicate(mut self, predicate: serde_json::Value) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Builds and validates the statement.
    pub fn build(self) -> Result<Statement> {
        let predicate_type = self.predicate_type.ok_or_else(|| {
            CrafterError::StatementValidation("statement must have a predicateType".into())
        })?;
        let predicate = self.predicate.ok_or_else(|| {
            CrafterError::StatementValidation("statement must have a predicate".into())
        })?;

        let statement = Statement {
            statement_type: STATEMENT_TYPE_V1.to_string(),
            subject: self.subjects,
            predicate_type,
            predicate,
        };
        statement.validate()?;
        Ok(statement)
    }
}
