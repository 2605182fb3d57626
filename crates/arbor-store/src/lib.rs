//! # arbor-store
//!
//! A transactional hierarchical content store:
//! - `Repository` holds committed state, in memory or file-backed
//! - `Session` works on a private copy and commits or rolls back wholesale
//! - Nodes are addressed by path or by `NodeId`; the workspace owns the only node table
//! - Namespaces and node types are registered per workspace, so they roll back too
//! - Compact type definitions and YAML content documents can be loaded into a session

pub mod cnd;
pub mod content;
pub mod error;
pub mod namespace;
pub mod node;
pub mod nodetype;
pub mod repository;
pub mod session;
pub mod value;
pub mod workspace;

pub use content::{BinaryResolver, ContentHeader, ContentNode, ImportOptions, ImportReport};
pub use error::{StoreError, StoreResult};
pub use node::{Node, NodeId};
pub use nodetype::NodeTypeDefinition;
pub use repository::Repository;
pub use session::{Checkpoint, Session};
pub use value::{Property, PropertyType, Value};
