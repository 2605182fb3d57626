//! Test bed for bootstrap runs
//!
//! Owns a temporary directory laid out as a search path
//! (`extensions/<name>/arbor-extension.yaml` and `lib/*.jar`) and an
//! in-memory repository.

#![allow(dead_code)]

use super::builders::DescriptorBuilder;
use super::constants::{CONTENT_ROOT, DESCRIPTOR_NAME, RECORD_ROOT};
use arbor_bootstrap::{ReconciliationEngine, RecordTree};
use arbor_core::types::BootstrapConfig;
use arbor_store::{Repository, Session};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub struct TestBed {
    temp: TempDir,
    pub repo: Repository,
}

impl TestBed {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("extensions")).expect("extensions dir");
        fs::create_dir_all(temp.path().join("lib")).expect("lib dir");
        Self {
            temp,
            repo: Repository::in_memory(),
        }
    }

    /// A test bed whose store already holds `/content`
    pub fn with_content_root() -> Self {
        let bed = Self::new();
        let mut session = bed.session();
        let name = CONTENT_ROOT.trim_start_matches('/');
        session.add_node("/", name, None).expect("content root");
        session.save().expect("save content root");
        bed
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn extension_dir(&self, name: &str) -> PathBuf {
        self.temp.path().join("extensions").join(name)
    }

    /// Write an unpacked extension
    pub fn add_extension(&self, name: &str, descriptor: &DescriptorBuilder) -> PathBuf {
        let dir = self.extension_dir(name);
        fs::create_dir_all(&dir).expect("extension dir");
        fs::write(dir.join(DESCRIPTOR_NAME), descriptor.to_yaml()).expect("descriptor");
        dir
    }

    /// Write raw descriptor text, for malformed descriptors
    pub fn add_raw_extension(&self, name: &str, text: &str) -> PathBuf {
        let dir = self.extension_dir(name);
        fs::create_dir_all(&dir).expect("extension dir");
        fs::write(dir.join(DESCRIPTOR_NAME), text).expect("descriptor");
        dir
    }

    /// Write a side file next to an extension's descriptor
    pub fn add_file(&self, extension: &str, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.extension_dir(extension).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, contents).expect("side file");
        path
    }

    pub fn remove_extension(&self, name: &str) {
        fs::remove_dir_all(self.extension_dir(name)).expect("remove extension");
    }

    /// Write a packaged extension into `lib/`
    pub fn add_jar(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = self.temp.path().join("lib").join(format!("{}.jar", name));
        fs::write(&path, zip_bytes(entries)).expect("jar");
        path
    }

    pub fn config(&self) -> BootstrapConfig {
        BootstrapConfig {
            search_path: vec![
                format!("{}/extensions/*", self.temp.path().display()),
                format!("{}/lib/*.jar", self.temp.path().display()),
            ],
            ..BootstrapConfig::default()
        }
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(self.config())
    }

    pub fn session(&self) -> Session {
        self.repo.login()
    }

    pub fn tree(&self) -> RecordTree {
        RecordTree::new(RECORD_ROOT)
    }
}

/// Build an in-memory zip archive
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}
