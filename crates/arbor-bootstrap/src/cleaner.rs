//! Removing records whose extension has disappeared

use crate::records::RecordTree;
use anyhow::Result;
use arbor_store::Session;
use chrono::{DateTime, Utc};
use tracing::info;

pub struct Cleaner;

impl Cleaner {
    /// Delete every record not revisited since `run_start`
    ///
    /// Must only run after a complete discovery and integration pass. The
    /// caller commits the removals as one unit.
    pub fn sweep(session: &mut Session, tree: &RecordTree, run_start: DateTime<Utc>) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for record in tree.list(session)? {
            let stale = record.applied_at.map_or(true, |at| at < run_start);
            if stale {
                info!(
                    "Removing record '{}': not declared by any extension ({})",
                    record.name,
                    record.origin_url.as_deref().unwrap_or("unknown origin")
                );
                tree.remove(session, &record.name)?;
                removed.push(record.name);
            }
        }
        Ok(removed)
    }
}
