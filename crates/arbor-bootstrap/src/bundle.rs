//! Packaged content archives
//!
//! A content resource ending in `.zip`/`.jar` or `.tar.gz`/`.tgz` is a bundle:
//! exactly one `content.yaml` payload plus binary side files that the payload
//! refers to by entry name.

use crate::resource::ResourceLoader;
use anyhow::{bail, Context, Result};
use arbor_store::{BinaryResolver, StoreError, StoreResult};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tar::Archive;
use tracing::debug;

/// Entry name of the payload inside a bundle
pub const BUNDLE_MANIFEST: &str = "content.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleFormat {
    Zip,
    TarGz,
}

fn bundle_format(reference: &str) -> Option<BundleFormat> {
    let lower = reference.to_ascii_lowercase();
    if lower.ends_with(".zip") || lower.ends_with(".jar") {
        Some(BundleFormat::Zip)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(BundleFormat::TarGz)
    } else {
        None
    }
}

/// An unpacked content bundle
#[derive(Debug)]
pub struct ContentBundle {
    payload: String,
    side_files: HashMap<String, Vec<u8>>,
}

impl ContentBundle {
    /// Whether a content reference names a bundle rather than a plain document
    pub fn is_bundle(reference: &str) -> bool {
        bundle_format(reference).is_some()
    }

    /// Unpack a bundle read from `reference`
    pub fn read(reference: &str, bytes: Vec<u8>) -> Result<Self> {
        let entries = match bundle_format(reference) {
            Some(BundleFormat::Zip) => read_zip(bytes),
            Some(BundleFormat::TarGz) => read_tar_gz(bytes),
            None => bail!("'{}' is not a content bundle", reference),
        }
        .with_context(|| format!("Failed to unpack content bundle '{}'", reference))?;

        let mut payload = None;
        let mut side_files = HashMap::new();
        for (name, data) in entries {
            let name = name.trim_start_matches("./").to_string();
            if name == BUNDLE_MANIFEST {
                if payload.is_some() {
                    bail!("Bundle '{}' contains more than one {}", reference, BUNDLE_MANIFEST);
                }
                payload = Some(
                    String::from_utf8(data)
                        .with_context(|| format!("{} in '{}' is not UTF-8", BUNDLE_MANIFEST, reference))?,
                );
            } else {
                side_files.insert(name, data);
            }
        }

        let payload = payload
            .with_context(|| format!("Bundle '{}' has no {}", reference, BUNDLE_MANIFEST))?;
        debug!(
            "Unpacked bundle '{}' with {} side files",
            reference,
            side_files.len()
        );
        Ok(Self {
            payload,
            side_files,
        })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl BinaryResolver for ContentBundle {
    fn resolve(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.side_files
            .get(name.trim_start_matches('/'))
            .cloned()
            .ok_or_else(|| StoreError::path_not_found(name))
    }
}

fn read_zip(bytes: Vec<u8>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        entries.push((file.name().to_string(), data));
    }
    Ok(entries)
}

fn read_tar_gz(bytes: Vec<u8>) -> Result<Vec<(String, Vec<u8>)>> {
    let decoder = GzDecoder::new(Cursor::new(bytes));
    let mut archive = Archive::new(decoder);
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().replace('\\', "/");
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        entries.push((name, data));
    }
    Ok(entries)
}

/// Resolves binary side files through an extension's resource loader
pub struct LoaderBinaries<'a>(pub &'a dyn ResourceLoader);

impl BinaryResolver for LoaderBinaries<'_> {
    fn resolve(&self, name: &str) -> StoreResult<Vec<u8>> {
        self.0
            .read(name)
            .map_err(|e| StoreError::content_parse(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_zip_bundle() {
        let bytes = zip_bytes(&[
            ("content.yaml", b"name: gallery".as_slice()),
            ("images/logo.png", [1u8, 2, 3].as_slice()),
        ]);
        let bundle = ContentBundle::read("gallery.zip", bytes).unwrap();
        assert_eq!(bundle.payload(), "name: gallery");
        assert_eq!(bundle.resolve("images/logo.png").unwrap(), vec![1, 2, 3]);
        assert!(bundle.resolve("images/missing.png").is_err());
    }

    #[test]
    fn test_tar_gz_bundle() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in [("content.yaml", &b"name: docs"[..]), ("a.bin", &[9u8][..])] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let bundle = ContentBundle::read("docs.tar.gz", bytes).unwrap();
        assert_eq!(bundle.payload(), "name: docs");
        assert_eq!(bundle.resolve("a.bin").unwrap(), vec![9]);
    }

    #[test]
    fn test_bundle_without_payload_is_rejected() {
        let bytes = zip_bytes(&[("other.yaml", b"name: x".as_slice())]);
        let err = ContentBundle::read("x.zip", bytes).unwrap_err();
        assert!(format!("{:#}", err).contains("has no content.yaml"));
    }

    #[test]
    fn test_bundle_detection() {
        assert!(ContentBundle::is_bundle("seed.ZIP"));
        assert!(ContentBundle::is_bundle("seed.tgz"));
        assert!(!ContentBundle::is_bundle("seed.yaml"));
    }
}
