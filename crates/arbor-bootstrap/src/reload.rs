//! Deciding whether a rediscovered operation replaces its stored record

use arbor_core::types::{OperationRecord, Status};
use arbor_core::VersionComparator;
use tracing::{debug, info};

pub struct ReloadPolicy;

impl ReloadPolicy {
    /// Whether `candidate` should replace `existing` and be reapplied
    ///
    /// Reload must be requested, must not be a combine/overlay import, and the
    /// existing record must not be disabled. The item version decides when the
    /// candidate declares one; otherwise the module version does.
    pub fn should_reload(candidate: &OperationRecord, existing: &OperationRecord) -> bool {
        if !candidate.reload_on_startup {
            return false;
        }
        if candidate.reload_forbidden() {
            info!(
                "Reload of '{}' rejected: delta directive {} never reloads",
                candidate.name,
                candidate
                    .delta_directive
                    .map(|d| d.to_string())
                    .unwrap_or_default()
            );
            return false;
        }
        if existing.status == Status::Disabled {
            debug!("'{}' is disabled; not reloading", existing.name);
            return false;
        }

        let newer = match candidate.item_version.as_deref() {
            Some(version) => VersionComparator::is_newer(Some(version), existing.item_version.as_deref()),
            None => VersionComparator::is_newer(
                candidate.module_version.as_deref(),
                existing.module_version.as_deref(),
            ),
        };
        if newer {
            debug!(
                "'{}' version {:?} is newer than stored {:?}",
                candidate.name,
                candidate.effective_version(),
                existing.effective_version()
            );
        }
        newer
    }
}
