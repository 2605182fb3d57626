//! Dotted/qualified version ordering
//!
//! Versions are split into segments on `.`, `-`, `_` and `+`, and at every
//! transition between digits and letters (`1.0rc2` is `1`, `0`, `rc`, `2`).
//! Numeric segments compare numerically, qualifiers compare lexically
//! (case-insensitive), and a number always sorts above a qualifier at the same
//! position. The shorter version is padded with zero segments, so `1.0` equals
//! `1.0.0` and `1.0-alpha` sorts below `1.0`.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Numeric(String),
    Qualifier(String),
}

impl Segment {
    fn zero() -> Self {
        Segment::Numeric(String::new())
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // digits are stored without leading zeros, so length decides first
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Qualifier(a), Segment::Qualifier(b)) => a.cmp(b),
            (Segment::Numeric(_), Segment::Qualifier(_)) => Ordering::Greater,
            (Segment::Qualifier(_), Segment::Numeric(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed, orderable version string
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    segments: Vec<Segment>,
}

impl Version {
    /// Parse a version string
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_version(raw));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut current_numeric = false;

        for c in trimmed.chars() {
            if matches!(c, '.' | '-' | '_' | '+') {
                flush_segment(&mut current, current_numeric, &mut segments);
                continue;
            }
            if !c.is_ascii_alphanumeric() {
                return Err(Error::invalid_version(raw));
            }
            let numeric = c.is_ascii_digit();
            if !current.is_empty() && numeric != current_numeric {
                flush_segment(&mut current, current_numeric, &mut segments);
            }
            current_numeric = numeric;
            current.push(c.to_ascii_lowercase());
        }
        flush_segment(&mut current, current_numeric, &mut segments);

        if segments.is_empty() {
            return Err(Error::invalid_version(raw));
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// The version string as declared
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn flush_segment(current: &mut String, numeric: bool, segments: &mut Vec<Segment>) {
    if current.is_empty() {
        return;
    }
    let text = std::mem::take(current);
    if numeric {
        segments.push(Segment::Numeric(text.trim_start_matches('0').to_string()));
    } else {
        segments.push(Segment::Qualifier(text));
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::zero();
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Compares optional version strings where a missing version is always oldest
pub struct VersionComparator;

impl VersionComparator {
    /// Compare two optional versions
    ///
    /// Returns `None` when either side is present but cannot be parsed; the
    /// condition is logged and callers treat it as "not newer".
    pub fn compare(a: Option<&str>, b: Option<&str>) -> Option<Ordering> {
        match (a, b) {
            (None, None) => Some(Ordering::Equal),
            (None, Some(_)) => Some(Ordering::Less),
            (Some(_), None) => Some(Ordering::Greater),
            (Some(a), Some(b)) => match (Version::parse(a), Version::parse(b)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Cannot compare versions '{}' and '{}': {}", a, b, e);
                    None
                }
            },
        }
    }

    /// Whether `candidate` is strictly newer than `existing`
    pub fn is_newer(candidate: Option<&str>, existing: Option<&str>) -> bool {
        Self::compare(candidate, existing) == Some(Ordering::Greater)
    }
}
