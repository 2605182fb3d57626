//! Loading extension descriptors and integrating them into the record tree

use crate::bundle::ContentBundle;
use crate::descriptor::ExtensionDescriptor;
use crate::records::RecordTree;
use crate::reload::ReloadPolicy;
use crate::resource::{LoaderRegistry, ResourceLoader};
use anyhow::{Context, Result};
use arbor_core::types::{OperationRecord, Source};
use arbor_core::Error;
use arbor_store::{content::peek_header, ContentHeader, Session};
use chrono::{DateTime, Utc};
use std::io::BufReader;
use tracing::{debug, info, warn};
use url::Url;

/// Operations declared by one extension, ready to integrate
#[derive(Debug, Clone)]
pub struct StagedExtension {
    pub origin: String,
    pub module_version: Option<String>,
    pub records: Vec<OperationRecord>,
}

/// A record replaced because a newer version was discovered
#[derive(Debug, Clone)]
pub struct ReloadMarker {
    pub name: String,
    /// Ownership path of the new declaration
    pub ownership_path: String,
    /// Paths the replaced record had created
    pub context_paths: Vec<String>,
}

impl ReloadMarker {
    /// Every path whose subtree the reload rewrites
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.ownership_path.as_str()).chain(self.context_paths.iter().map(String::as_str))
    }
}

/// Outcome of integrating one extension
#[derive(Debug, Default)]
pub struct Integration {
    /// Every record name the extension declared
    pub touched: Vec<String>,
    pub created: usize,
    pub reloaded: usize,
}

pub struct ExtensionLoader<'a> {
    loaders: &'a LoaderRegistry,
}

impl<'a> ExtensionLoader<'a> {
    pub fn new(loaders: &'a LoaderRegistry) -> Self {
        Self { loaders }
    }

    /// Read and stage the descriptor at `origin`
    ///
    /// Content imports are inspected only far enough to learn the context node
    /// name and merge hint.
    pub fn load(&self, origin: &str) -> arbor_core::Result<StagedExtension> {
        let loader = self
            .loaders
            .loader_for_str(origin)
            .map_err(|e| Error::discovery(origin, format!("{:#}", e)))?;
        let text = loader
            .read_text(descriptor_reference(loader.origin()))
            .map_err(|e| Error::discovery(origin, format!("{:#}", e)))?;
        let descriptor = ExtensionDescriptor::parse(&text, origin)?;

        let mut records = Vec::with_capacity(descriptor.items.len());
        for item in &descriptor.items {
            let mut record = item.to_record(descriptor.module_version.as_deref(), origin);
            if record.content.is_some() {
                match inspect_content(loader.as_ref(), &record) {
                    Ok(header) => {
                        if record.context_node_name.is_none() {
                            record.context_node_name = header.name;
                        }
                        if record.delta_directive.is_none() {
                            record.delta_directive = header.merge;
                        }
                    }
                    Err(e) => warn!(
                        "Cannot inspect content of '{}' in {}: {:#}",
                        record.name, origin, e
                    ),
                }
            }
            records.push(record);
        }

        debug!("Staged {} operations from {}", records.len(), origin);
        Ok(StagedExtension {
            origin: origin.to_string(),
            module_version: descriptor.module_version,
            records,
        })
    }
}

fn descriptor_reference(origin: &Url) -> &str {
    origin.path().rsplit('/').next().unwrap_or_default()
}

fn inspect_content(loader: &dyn ResourceLoader, record: &OperationRecord) -> Result<ContentHeader> {
    let header = match &record.content {
        Some(Source::Inline(text)) => peek_header(text.as_bytes())?,
        Some(Source::Resource(reference)) if ContentBundle::is_bundle(reference) => {
            let bundle = ContentBundle::read(reference, loader.read(reference)?)?;
            peek_header(bundle.payload().as_bytes())?
        }
        Some(Source::Resource(reference)) => {
            let reader = loader
                .open(reference)
                .with_context(|| format!("Failed to open content '{}'", reference))?;
            peek_header(BufReader::new(reader))?
        }
        None => ContentHeader::default(),
    };
    Ok(header)
}

/// Merge staged operations into the record tree
///
/// New operations are created pending. Existing ones are replaced when the
/// reload policy allows it, otherwise only their applied-at time is refreshed.
/// The caller commits.
pub fn integrate(
    session: &mut Session,
    tree: &RecordTree,
    staged: &StagedExtension,
    now: DateTime<Utc>,
    markers: &mut Vec<ReloadMarker>,
) -> Result<Integration> {
    let mut outcome = Integration::default();

    for candidate in &staged.records {
        let mut record = candidate.clone();
        record.applied_at = Some(now);

        match tree.get(session, &candidate.name)? {
            None => {
                debug!("New operation '{}' from {}", record.name, staged.origin);
                tree.write(session, &record)?;
                outcome.created += 1;
            }
            Some(existing) if ReloadPolicy::should_reload(candidate, &existing) => {
                info!(
                    "Reloading '{}': {:?} -> {:?}",
                    record.name,
                    existing.effective_version(),
                    record.effective_version()
                );
                record.context_paths = existing.context_paths.clone();
                tree.remove(session, &existing.name)?;
                tree.write(session, &record)?;
                if candidate.content.is_some() || candidate.content_delete.is_some() {
                    markers.push(ReloadMarker {
                        name: record.name.clone(),
                        ownership_path: record.ownership_path(),
                        context_paths: existing.context_paths,
                    });
                }
                outcome.reloaded += 1;
            }
            Some(existing) => {
                debug!(
                    "'{}' unchanged (stored {:?}, status {})",
                    existing.name,
                    existing.effective_version(),
                    existing.status
                );
                tree.touch(session, &existing.name, now)?;
            }
        }
        outcome.touched.push(candidate.name.clone());
    }

    if let Some(tag) = &staged.module_version {
        tree.add_version_tag(session, tag)?;
    }
    Ok(outcome)
}
