//! Partial inspection of content documents
//!
//! Reads only as many lines as needed to learn the top-level node name and the
//! merge hint, without parsing the document body.

use crate::error::{StoreError, StoreResult};
use arbor_core::types::DeltaDirective;
use std::io::BufRead;

/// Header fields of a content document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentHeader {
    /// Name of the top-level node
    pub name: Option<String>,
    /// Merge hint declared by the document
    pub merge: Option<DeltaDirective>,
}

const BODY_KEYS: [&str; 2] = ["properties", "children"];

/// Read the header of a content document
///
/// Stops as soon as both header keys are known or a body key is reached.
pub fn peek_header<R: BufRead>(reader: R) -> StoreResult<ContentHeader> {
    let mut header = ContentHeader::default();

    for line in reader.lines() {
        let line = line?;
        if line.starts_with(char::is_whitespace) || line.starts_with('#') || line.starts_with("---")
        {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = scalar(value);

        match key {
            "name" => header.name = Some(value.to_string()),
            "merge" => {
                let directive = value.parse::<DeltaDirective>().map_err(StoreError::content_parse)?;
                header.merge = Some(directive);
            }
            key if BODY_KEYS.contains(&key) => break,
            _ => {}
        }
        if header.name.is_some() && header.merge.is_some() {
            break;
        }
    }

    Ok(header)
}

fn scalar(raw: &str) -> &str {
    let raw = match raw.find(" #") {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    raw.trim().trim_matches(|c| c == '"' || c == '\'')
}
