//! Hierarchical configuration loader with precedence
//!
//! Loads the bootstrap configuration from multiple sources with the following
//! precedence (low to high):
//! 1. Embedded defaults (built into the library)
//! 2. Config file (~/.arbor/bootstrap.yaml)
//! 3. Environment variables (ARBOR_* prefix)

use crate::error::{Error, Result};
use crate::types::{BootstrapConfig, CommitGrouping};
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use tracing::debug;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const DEFAULTS_FILE: &str = "bootstrap-defaults.yaml";
const CONFIG_FILE: &str = "bootstrap.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a loader rooted at the standard config directory (~/.arbor)
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?;
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| Error::invalid_config(format!("Non UTF-8 home directory: {:?}", p)))?;
        Ok(home.join(".arbor"))
    }

    /// Load the bootstrap configuration with hierarchical precedence
    pub fn load_bootstrap_config(&self) -> Result<BootstrapConfig> {
        let mut config = Self::load_embedded_config::<BootstrapConfig>(DEFAULTS_FILE)?;

        let config_path = self.config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            debug!("Loading bootstrap config from {}", config_path);
            let file_config = self.load_yaml_file::<BootstrapConfig>(&config_path)?;
            config = Self::merge_bootstrap_config(config, file_config);
        }

        config = self.apply_env_overrides(config)?;

        Ok(config)
    }

    fn load_embedded_config<T: DeserializeOwned>(filename: &str) -> Result<T> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        let config: T = serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })?;

        Ok(config)
    }

    fn load_yaml_file<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let config: T = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))?;
        Ok(config)
    }

    /// Merge two configs; search paths accumulate, everything else is taken from the overlay
    fn merge_bootstrap_config(base: BootstrapConfig, overlay: BootstrapConfig) -> BootstrapConfig {
        let mut search_path = base.search_path;
        for entry in overlay.search_path {
            if !search_path.contains(&entry) {
                search_path.push(entry);
            }
        }

        BootstrapConfig {
            search_path,
            descriptor_names: overlay.descriptor_names,
            record_root: overlay.record_root,
            commit_grouping: overlay.commit_grouping,
            cleanup: overlay.cleanup,
            scratch_prefix: overlay.scratch_prefix,
        }
    }

    fn apply_env_overrides(&self, mut config: BootstrapConfig) -> Result<BootstrapConfig> {
        if let Some(val) = env::var_os("ARBOR_SEARCH_PATH") {
            config.search_path = env::split_paths(&val)
                .map(|p| {
                    p.into_os_string().into_string().map_err(|_| {
                        Error::invalid_config("ARBOR_SEARCH_PATH must be valid UTF-8")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }

        if let Ok(val) = env::var("ARBOR_RECORD_ROOT") {
            if !val.starts_with('/') {
                return Err(Error::invalid_config(
                    "ARBOR_RECORD_ROOT must be an absolute path",
                ));
            }
            config.record_root = val;
        }

        if let Ok(val) = env::var("ARBOR_COMMIT_GROUPING") {
            config.commit_grouping = val.parse::<CommitGrouping>().map_err(|_| {
                Error::invalid_config(
                    "ARBOR_COMMIT_GROUPING must be 'per-operation' or 'delete-then-import'",
                )
            })?;
        }

        if let Ok(val) = env::var("ARBOR_CLEANUP") {
            config.cleanup = val
                .parse()
                .map_err(|_| Error::invalid_config("ARBOR_CLEANUP must be true or false"))?;
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
