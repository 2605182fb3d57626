//! YAML content documents
//!
//! A content document describes a single top-level node and its subtree:
//!
//! ```yaml
//! name: docs
//! merge: combine
//! primary-type: nt:unstructured
//! properties:
//!   title: Documentation
//!   tags: [a, b]
//!   home: { type: reference, value: home-id }
//! children:
//!   - name: home
//!     id: home-id
//! ```

mod header;
mod import;

pub use header::{peek_header, ContentHeader};
pub use import::{BinaryResolver, ImportOptions, ImportReport, NoBinaries};
pub(crate) use import::import_document;

use crate::error::{StoreError, StoreResult};
use arbor_core::types::DeltaDirective;
use serde::Deserialize;
use std::collections::BTreeMap;

/// One node of a content document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ContentNode {
    pub name: String,
    #[serde(default)]
    pub primary_type: Option<String>,
    #[serde(default)]
    pub mixins: Vec<String>,
    /// Merge hint; only meaningful on the top-level node
    #[serde(default)]
    pub merge: Option<DeltaDirective>,
    /// Document-local identifier other nodes may reference
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, ContentValue>,
    #[serde(default)]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    /// Parse a content document
    pub fn parse(text: &str) -> StoreResult<Self> {
        let node: ContentNode = serde_yaml_ng::from_str(text)
            .map_err(|e| StoreError::content_parse(e.to_string()))?;
        if node.name.trim().is_empty() {
            return Err(StoreError::content_parse("top-level node has no name"));
        }
        Ok(node)
    }
}

/// A plain YAML scalar
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
}

/// A property value as written in a content document
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    /// `{type: .., value: ..}`, `{type: .., values: [..]}` or `{type: binary, resource: ..}`
    Typed(TypedValue),
    /// A sequence, stored as a multi-valued property
    List(Vec<Scalar>),
    /// A scalar, stored as a single-valued property
    Single(Scalar),
}

/// Explicitly typed property value
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub value: Option<Scalar>,
    #[serde(default)]
    pub values: Option<Vec<Scalar>>,
    /// Side file holding binary data
    #[serde(default)]
    pub resource: Option<String>,
}

impl Scalar {
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Boolean(v) => v.to_string(),
            Scalar::Long(v) => v.to_string(),
            Scalar::Double(v) => v.to_string(),
            Scalar::String(v) => v.clone(),
        }
    }
}
