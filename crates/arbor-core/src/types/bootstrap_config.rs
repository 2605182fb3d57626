//! Bootstrap configuration types
//!
//! Controls where extensions are discovered, where operation records are
//! persisted and how the engine groups commits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complete bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BootstrapConfig {
    /// Directories, archives or glob patterns scanned for extension descriptors
    #[serde(default)]
    pub search_path: Vec<String>,

    /// Well-known relative descriptor names looked up in every search location
    #[serde(default = "default_descriptor_names")]
    pub descriptor_names: Vec<String>,

    /// Path of the node holding one child per operation record
    #[serde(default = "default_record_root")]
    pub record_root: String,

    /// Commit boundaries used while applying operations
    #[serde(default)]
    pub commit_grouping: CommitGrouping,

    /// Sweep records not revisited by the current run
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,

    /// Node name prefix for dry-run scratch locations
    #[serde(default = "default_scratch_prefix")]
    pub scratch_prefix: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            descriptor_names: default_descriptor_names(),
            record_root: default_record_root(),
            commit_grouping: CommitGrouping::default(),
            cleanup: default_cleanup(),
            scratch_prefix: default_scratch_prefix(),
        }
    }
}

fn default_descriptor_names() -> Vec<String> {
    vec![
        "arbor-extension.yaml".to_string(),
        "META-INF/arbor/extension.yaml".to_string(),
    ]
}

fn default_record_root() -> String {
    "/arbor:configuration/arbor:initialize".to_string()
}

fn default_cleanup() -> bool {
    true
}

fn default_scratch_prefix() -> String {
    "arbor:dryrun".to_string()
}

/// Commit grouping policy for operation application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitGrouping {
    /// Every payload of a record commits on its own
    PerOperation,
    /// A content delete followed by a content import on the same record shares one commit
    #[default]
    DeleteThenImport,
}

impl fmt::Display for CommitGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitGrouping::PerOperation => write!(f, "per-operation"),
            CommitGrouping::DeleteThenImport => write!(f, "delete-then-import"),
        }
    }
}

impl FromStr for CommitGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-operation" => Ok(CommitGrouping::PerOperation),
            "delete-then-import" => Ok(CommitGrouping::DeleteThenImport),
            other => Err(format!("unknown commit grouping '{}'", other)),
        }
    }
}
