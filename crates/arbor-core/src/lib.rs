//! # arbor-core
//!
//! Core library shared by the arbor store and bootstrap engine:
//! - Operation record types and their persisted status values
//! - Dotted/qualified version ordering
//! - Content path helpers
//! - Hierarchical bootstrap configuration
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod types;
pub mod version;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::{BootstrapConfig, CommitGrouping, OperationRecord, Status};
pub use version::{Version, VersionComparator};
