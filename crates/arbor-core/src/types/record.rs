//! Operation record types
//!
//! An operation record describes one configuration or content action declared
//! by an extension, together with its application state.

use crate::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Application state of an operation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Must be applied by the next processing pass
    #[default]
    Pending,
    /// Applied successfully
    Done,
    /// Permanently excluded from processing and reload
    Disabled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Done => write!(f, "done"),
            Status::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "done" => Ok(Status::Done),
            "disabled" => Ok(Status::Disabled),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// How imported content merges with content already in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaDirective {
    Combine,
    Overlay,
    Replace,
}

impl DeltaDirective {
    /// `combine` and `overlay` content is never reloaded automatically
    pub fn forbids_reload(self) -> bool {
        matches!(self, DeltaDirective::Combine | DeltaDirective::Overlay)
    }
}

impl fmt::Display for DeltaDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaDirective::Combine => write!(f, "combine"),
            DeltaDirective::Overlay => write!(f, "overlay"),
            DeltaDirective::Replace => write!(f, "replace"),
        }
    }
}

impl FromStr for DeltaDirective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combine" => Ok(DeltaDirective::Combine),
            "overlay" => Ok(DeltaDirective::Overlay),
            "replace" => Ok(DeltaDirective::Replace),
            other => Err(format!("unknown delta directive '{}'", other)),
        }
    }
}

/// A payload given either as a resource reference or inline text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Reference resolved against the extension's origin
    Resource(String),
    /// Literal payload embedded in the descriptor
    Inline(String),
}

/// A namespace prefix to URI binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBinding {
    pub prefix: String,
    pub uri: String,
}

/// The distinct mutations an operation record can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Namespace,
    NodeTypes,
    ContentDelete,
    ContentImport,
    PropertyDelete,
    PropertySet,
    PropertyAdd,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Namespace => "namespace",
            OperationKind::NodeTypes => "node-types",
            OperationKind::ContentDelete => "content-delete",
            OperationKind::ContentImport => "content-import",
            OperationKind::PropertyDelete => "property-delete",
            OperationKind::PropertySet => "property-set",
            OperationKind::PropertyAdd => "property-add",
        };
        f.write_str(name)
    }
}

/// One declared configuration or content action and its state
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    /// Unique key among the records under the record root
    pub name: String,
    /// Global apply order across all extensions
    pub sequence: i64,
    pub status: Status,
    /// Version of this specific operation
    pub item_version: Option<String>,
    /// Version of the owning extension, used when `item_version` is absent
    pub module_version: Option<String>,
    pub reload_on_startup: bool,
    pub delta_directive: Option<DeltaDirective>,
    /// Subtree this operation owns; the target property path for property operations
    pub content_root: String,
    /// Name of the top-level node a content import creates
    pub context_node_name: Option<String>,
    /// Absolute paths created by the last successful import
    pub context_paths: Vec<String>,
    pub namespace: Option<NamespaceBinding>,
    pub node_types: Option<Source>,
    pub content: Option<Source>,
    pub content_delete: Option<String>,
    pub content_property_delete: Option<String>,
    pub content_property_set: Option<Vec<String>>,
    pub content_property_add: Option<Vec<String>>,
    /// Where the declaring extension was discovered
    pub origin_url: Option<String>,
    /// Last time the record was created, revisited or applied
    pub applied_at: Option<DateTime<Utc>>,
    /// Reason the last application attempt failed
    pub error_message: Option<String>,
}

impl OperationRecord {
    /// Create a pending record with no payload
    pub fn new(name: impl Into<String>, sequence: i64) -> Self {
        Self {
            name: name.into(),
            sequence,
            status: Status::Pending,
            item_version: None,
            module_version: None,
            reload_on_startup: false,
            delta_directive: None,
            content_root: path::ROOT.to_string(),
            context_node_name: None,
            context_paths: Vec::new(),
            namespace: None,
            node_types: None,
            content: None,
            content_delete: None,
            content_property_delete: None,
            content_property_set: None,
            content_property_add: None,
            origin_url: None,
            applied_at: None,
            error_message: None,
        }
    }

    /// The payload kinds this record carries, in execution order
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds = Vec::new();
        if self.namespace.is_some() {
            kinds.push(OperationKind::Namespace);
        }
        if self.node_types.is_some() {
            kinds.push(OperationKind::NodeTypes);
        }
        if self.content_delete.is_some() {
            kinds.push(OperationKind::ContentDelete);
        }
        if self.content.is_some() {
            kinds.push(OperationKind::ContentImport);
        }
        if self.content_property_delete.is_some() {
            kinds.push(OperationKind::PropertyDelete);
        }
        if self.content_property_set.is_some() {
            kinds.push(OperationKind::PropertySet);
        }
        if self.content_property_add.is_some() {
            kinds.push(OperationKind::PropertyAdd);
        }
        kinds
    }

    /// Check the one-payload rule
    ///
    /// Exactly one payload is allowed, except that a content delete may
    /// precede a content import on the same record.
    pub fn validate_payload(&self) -> Result<(), String> {
        match self.kinds().as_slice() {
            [] => Err(format!("operation '{}' declares no payload", self.name)),
            [_] => Ok(()),
            [OperationKind::ContentDelete, OperationKind::ContentImport] => Ok(()),
            kinds => Err(format!(
                "operation '{}' declares more than one payload: {}",
                self.name,
                kinds
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    /// The version used for reload decisions
    pub fn effective_version(&self) -> Option<&str> {
        self.item_version
            .as_deref()
            .or(self.module_version.as_deref())
    }

    /// The subtree this operation writes: content root joined with the context node name
    pub fn ownership_path(&self) -> String {
        match &self.context_node_name {
            Some(name) => path::join(&self.content_root, name),
            None => path::normalize(&self.content_root),
        }
    }

    /// Whether a reload of this record's content is governed by a combine/overlay directive
    pub fn reload_forbidden(&self) -> bool {
        self.delta_directive.is_some_and(DeltaDirective::forbids_reload)
    }
}
