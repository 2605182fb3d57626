//! Finding extension descriptors on the search path
//!
//! A search path entry is a directory, a `.jar`/`.zip` archive, or a glob
//! pattern expanding to either. Each entry is checked for every well-known
//! descriptor name.

use crate::resource::{file_origin, jar_origin};
use arbor_core::Error;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Descriptor origins found on the search path
#[derive(Debug, Default)]
pub struct Discovery {
    /// Origin URLs, sorted and free of duplicates
    pub origins: Vec<String>,
    /// Entries that could not be inspected
    pub failures: Vec<Error>,
}

pub struct ExtensionScanner<'a> {
    descriptor_names: &'a [String],
}

impl<'a> ExtensionScanner<'a> {
    pub fn new(descriptor_names: &'a [String]) -> Self {
        Self { descriptor_names }
    }

    pub fn scan(&self, search_path: &[String]) -> Discovery {
        let mut origins = BTreeSet::new();
        let mut failures = Vec::new();

        for entry in search_path {
            if is_pattern(entry) {
                match glob::glob(entry) {
                    Ok(paths) => {
                        for path in paths {
                            match path {
                                Ok(path) => self.scan_entry(&path, &mut origins, &mut failures),
                                Err(e) => failures.push(Error::discovery(entry, e.to_string())),
                            }
                        }
                    }
                    Err(e) => failures.push(Error::discovery(entry, e.to_string())),
                }
            } else {
                self.scan_entry(Path::new(entry), &mut origins, &mut failures);
            }
        }

        for failure in &failures {
            warn!("{}", failure);
        }
        debug!("Discovered {} extensions", origins.len());
        Discovery {
            origins: origins.into_iter().collect(),
            failures,
        }
    }

    fn scan_entry(&self, entry: &Path, origins: &mut BTreeSet<String>, failures: &mut Vec<Error>) {
        let label = entry.display().to_string();
        let result = if entry.is_dir() {
            self.scan_directory(entry, origins)
        } else if is_archive(entry) {
            self.scan_archive(entry, origins)
        } else if entry.exists() {
            debug!("Ignoring search path entry {}", label);
            Ok(())
        } else {
            Err(format!("{} does not exist", label))
        };
        if let Err(message) = result {
            failures.push(Error::discovery(label, message));
        }
    }

    fn scan_directory(&self, dir: &Path, origins: &mut BTreeSet<String>) -> Result<(), String> {
        let dir = dir
            .canonicalize()
            .map_err(|e| format!("cannot resolve {}: {}", dir.display(), e))?;
        for name in self.descriptor_names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                let origin = file_origin(&candidate).map_err(|e| e.to_string())?;
                debug!("Found descriptor {}", origin);
                origins.insert(origin.to_string());
            }
        }
        Ok(())
    }

    fn scan_archive(&self, archive: &Path, origins: &mut BTreeSet<String>) -> Result<(), String> {
        let archive = archive
            .canonicalize()
            .map_err(|e| format!("cannot resolve {}: {}", archive.display(), e))?;
        let file = File::open(&archive).map_err(|e| e.to_string())?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| format!("not a readable archive: {}", e))?;
        for name in self.descriptor_names {
            if zip.by_name(name).is_ok() {
                let origin = jar_origin(&archive, name).map_err(|e| e.to_string())?;
                debug!("Found descriptor {}", origin);
                origins.insert(origin.to_string());
            }
        }
        Ok(())
    }
}

fn is_pattern(entry: &str) -> bool {
    entry.contains(['*', '?', '['])
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jar") || e.eq_ignore_ascii_case("zip"))
}
