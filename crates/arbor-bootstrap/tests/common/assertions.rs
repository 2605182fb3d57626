//! Assertion helpers for record state

#![allow(dead_code)]

use super::constants::RECORD_ROOT;
use arbor_bootstrap::RecordTree;
use arbor_core::types::{OperationRecord, Status};
use arbor_store::Session;

pub fn record(session: &Session, name: &str) -> OperationRecord {
    RecordTree::new(RECORD_ROOT)
        .get(session, name)
        .expect("record tree readable")
        .unwrap_or_else(|| panic!("record '{}' should exist", name))
}

pub fn assert_status(session: &Session, name: &str, expected: Status) {
    let actual = record(session, name).status;
    assert_eq!(actual, expected, "status of record '{}'", name);
}

pub fn record_names(session: &Session) -> Vec<String> {
    RecordTree::new(RECORD_ROOT)
        .list(session)
        .expect("record tree readable")
        .into_iter()
        .map(|r| r.name)
        .collect()
}

/// Snapshot of every record's name and status
pub fn statuses(session: &Session) -> Vec<(String, Status)> {
    RecordTree::new(RECORD_ROOT)
        .list(session)
        .expect("record tree readable")
        .into_iter()
        .map(|r| (r.name, r.status))
        .collect()
}
