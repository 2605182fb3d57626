//! Content path helpers
//!
//! Paths are absolute and `/`-separated. Comparisons work on whole segments,
//! never on raw string prefixes: `/a/bc` is not beneath `/a/b`.

/// The store root path
pub const ROOT: &str = "/";

/// Normalize a path: ensure a leading `/`, drop empty segments and trailing `/`
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = segments(path).collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Iterate the non-empty segments of a path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Whether the path names the store root
pub fn is_root(path: &str) -> bool {
    segments(path).next().is_none()
}

/// Join a child name (or relative path) onto a base path
pub fn join(base: &str, child: &str) -> String {
    let base = normalize(base);
    let child = child.trim_matches('/');
    if child.is_empty() {
        base
    } else if base == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", base, child)
    }
}

/// Split a path into its parent path and last segment
///
/// Returns `None` for the root.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let segments: Vec<&str> = segments(path).collect();
    let (last, parents) = segments.split_last()?;
    let parent = if parents.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", parents.join("/"))
    };
    Some((parent, (*last).to_string()))
}

/// Whether `path` equals `ancestor` or lies beneath it, segment-wise
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let mut path_segments = segments(path);
    for expected in segments(ancestor) {
        match path_segments.next() {
            Some(actual) if actual == expected => continue,
            _ => return false,
        }
    }
    true
}
