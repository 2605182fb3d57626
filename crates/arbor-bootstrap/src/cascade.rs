//! Re-marking operations that write beneath a reloaded subtree

use crate::loader::ReloadMarker;
use crate::records::RecordTree;
use anyhow::Result;
use arbor_core::path;
use arbor_core::types::{OperationRecord, Status};
use arbor_store::Session;
use tracing::info;

pub struct DownstreamCascader;

impl DownstreamCascader {
    /// Set every record beneath a reloaded ownership path back to pending
    ///
    /// Paths match segment-wise, so a reload of `/a` re-marks `/a/b` but not
    /// `/x/a` or `/ab`. Disabled records and the reloaded records themselves are
    /// left alone. Only the status changes; applied-at stays whatever
    /// integration left it. Returns the names that were re-marked.
    pub fn mark_downstream(
        session: &mut Session,
        tree: &RecordTree,
        markers: &[ReloadMarker],
    ) -> Result<Vec<String>> {
        if markers.is_empty() {
            return Ok(Vec::new());
        }

        let mut marked = Vec::new();
        for record in tree.list(session)? {
            if record.status == Status::Disabled || markers.iter().any(|m| m.name == record.name) {
                continue;
            }
            let Some(marker) = markers.iter().find(|m| writes_beneath(&record, m)) else {
                continue;
            };
            if record.status != Status::Pending {
                info!(
                    "'{}' lies beneath reloaded '{}'; marking pending",
                    record.name, marker.name
                );
                tree.set_status(session, &record.name, Status::Pending)?;
            }
            marked.push(record.name);
        }
        Ok(marked)
    }
}

fn writes_beneath(record: &OperationRecord, marker: &ReloadMarker) -> bool {
    if !writes_content(record) {
        return false;
    }
    let ownership = record.ownership_path();
    std::iter::once(ownership.as_str())
        .chain(record.context_paths.iter().map(String::as_str))
        .any(|target| marker.roots().any(|root| path::is_same_or_descendant(target, root)))
}

fn writes_content(record: &OperationRecord) -> bool {
    record.namespace.is_none() && record.node_types.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::types::Source;
    use arbor_store::Repository;
    use chrono::{Duration, Utc};

    fn done_record(name: &str, content_root: &str) -> OperationRecord {
        let mut record = OperationRecord::new(name, 10);
        record.content = Some(Source::Inline(format!("name: {}", name)));
        record.content_root = content_root.to_string();
        record.status = Status::Done;
        record
    }

    fn marker(root: &str) -> ReloadMarker {
        ReloadMarker {
            name: "parent".to_string(),
            ownership_path: root.to_string(),
            context_paths: Vec::new(),
        }
    }

    #[test]
    fn test_cascade_matches_whole_segments() {
        let repo = Repository::in_memory();
        let mut session = repo.login();
        let tree = RecordTree::new("/arbor:init");
        tree.ensure(&mut session).unwrap();

        tree.write(&mut session, &done_record("below", "/a/b")).unwrap();
        tree.write(&mut session, &done_record("elsewhere", "/x/a")).unwrap();
        tree.write(&mut session, &done_record("sibling", "/ab")).unwrap();
        let mut disabled = done_record("disabled", "/a/c");
        disabled.status = Status::Disabled;
        tree.write(&mut session, &disabled).unwrap();

        let marked =
            DownstreamCascader::mark_downstream(&mut session, &tree, &[marker("/a")]).unwrap();
        assert_eq!(marked, vec!["below"]);

        let status = |name: &str| tree.get(&session, name).unwrap().unwrap().status;
        assert_eq!(status("below"), Status::Pending);
        assert_eq!(status("elsewhere"), Status::Done);
        assert_eq!(status("sibling"), Status::Done);
        assert_eq!(status("disabled"), Status::Disabled);
    }

    #[test]
    fn test_cascade_matches_context_paths() {
        let repo = Repository::in_memory();
        let mut session = repo.login();
        let tree = RecordTree::new("/arbor:init");
        tree.ensure(&mut session).unwrap();

        let mut record = done_record("imported", "/");
        record.context_paths = vec!["/a/docs".to_string()];
        tree.write(&mut session, &record).unwrap();

        let marked =
            DownstreamCascader::mark_downstream(&mut session, &tree, &[marker("/a")]).unwrap();
        assert_eq!(marked, vec!["imported"]);
    }

    #[test]
    fn test_cascade_keeps_applied_at() {
        let repo = Repository::in_memory();
        let mut session = repo.login();
        let tree = RecordTree::new("/arbor:init");
        tree.ensure(&mut session).unwrap();

        let stamped = Utc::now() - Duration::days(1);
        let mut record = done_record("orphan", "/a/b");
        record.applied_at = Some(stamped);
        tree.write(&mut session, &record).unwrap();

        DownstreamCascader::mark_downstream(&mut session, &tree, &[marker("/a")]).unwrap();
        let stored = tree.get(&session, "orphan").unwrap().unwrap();
        assert_eq!(stored.status, Status::Pending);
        assert_eq!(stored.applied_at, Some(stamped));
    }
}
