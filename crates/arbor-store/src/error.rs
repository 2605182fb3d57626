//! Error types for arbor-store

use thiserror::Error;

/// Result type alias using the store's error type
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-level failures
#[derive(Error, Debug)]
pub enum StoreError {
    /// No item exists at the path
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// The path matches more than one same-name sibling
    #[error("Ambiguous path {path}: matches {count} same-name siblings")]
    AmbiguousPath { path: String, count: usize },

    /// An item with that name already exists and cannot be duplicated
    #[error("Item exists: {path}")]
    ItemExists { path: String },

    /// Malformed path or item name
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A node type rule rejected the change
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The operation is not supported for the target
    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    /// Prefix or URI already bound differently
    #[error("Namespace conflict: {message}")]
    NamespaceConflict { message: String },

    /// A name uses a prefix with no namespace registered
    #[error("Unknown namespace prefix: {prefix}")]
    UnknownPrefix { prefix: String },

    /// A node type with that name is already registered
    #[error("Node type already exists: {name}")]
    NodeTypeExists { name: String },

    /// A referenced node type is not registered
    #[error("Unknown node type: {name}")]
    UnknownNodeType { name: String },

    /// Malformed compact type definition
    #[error("Type definition error at line {line}: {message}")]
    TypeDefinition { line: usize, message: String },

    /// Malformed content document
    #[error("Content parse error: {message}")]
    ContentParse { message: String },

    /// Removing the item would leave references dangling
    #[error("Cannot remove {path}: still referenced by {referrer}")]
    ReferenceIntegrity { path: String, referrer: String },

    /// The session was logged out or the repository is closed
    #[error("Session is not live")]
    NotLive,

    /// Snapshot IO failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Snapshot encoding failure
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl StoreError {
    pub fn path_not_found(path: impl Into<String>) -> Self {
        Self::PathNotFound { path: path.into() }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn namespace_conflict(message: impl Into<String>) -> Self {
        Self::NamespaceConflict {
            message: message.into(),
        }
    }

    pub fn type_definition(line: usize, message: impl Into<String>) -> Self {
        Self::TypeDefinition {
            line,
            message: message.into(),
        }
    }

    pub fn content_parse(message: impl Into<String>) -> Self {
        Self::ContentParse {
            message: message.into(),
        }
    }
}
