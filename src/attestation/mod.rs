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

//! Rendering of finished crafting states into signed attestations.
//!
//! The state becomes the predicate of an in-toto statement whose subjects
//! are the hashed materials. The statement is signed into a DSSE envelope,
//! which is finally wrapped into a Sigstore bundle.

pub mod bundle;
pub mod dsse;
pub mod predicate;
pub mod renderer;
pub mod statement;

pub use bundle::Bundle;
pub use dsse::{DsseSigner, DsseVerifier, Envelope};
pub use predicate::{Predicate, PREDICATE_TYPE_V0_2};
pub use renderer::{RenderedAttestation, Renderer};
pub use statement::{Statement, StatementBuilder, Subject, STATEMENT_TYPE_V1};
