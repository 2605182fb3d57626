//! Extension-driven bootstrap for the arbor store
//!
//! This crate handles:
//! - Discovery of extension descriptors on a search path
//! - Descriptor parsing and staging of operation records
//! - Versioned reload decisions and downstream cascades
//! - Applying namespaces, node types, content and properties
//! - Sweeping records whose extension disappeared
//! - Dry runs against a scratch record tree

pub mod applier;
pub mod bundle;
pub mod cascade;
pub mod cleaner;
pub mod context;
pub mod descriptor;
pub mod discovery;
pub mod engine;
pub mod loader;
pub mod records;
pub mod reload;
pub mod resource;
pub mod transaction;

pub use applier::{ApplyOutcome, ContentApplier};
pub use cascade::DownstreamCascader;
pub use cleaner::Cleaner;
pub use context::{RunContext, RunMode};
pub use descriptor::ExtensionDescriptor;
pub use discovery::ExtensionScanner;
pub use engine::{FailedOperation, ProcessReport, ReconciliationEngine, RunSummary};
pub use loader::{ExtensionLoader, StagedExtension};
pub use records::RecordTree;
pub use reload::ReloadPolicy;
pub use resource::{LoaderRegistry, ResourceLoader};
