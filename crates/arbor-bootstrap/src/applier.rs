//! Applying one operation record to the store
//!
//! Each payload kind has a handler registered once in a dispatch table. A
//! record's handlers run inside one [`Transaction`]; on failure everything the
//! record did is rolled back, the record stays pending and the reason is stored
//! on it in a separate commit.

use crate::bundle::{ContentBundle, LoaderBinaries};
use crate::context::RunContext;
use crate::records::RecordTree;
use crate::resource::{LoaderRegistry, ResourceLoader};
use crate::transaction::Transaction;
use anyhow::{anyhow, bail, Context, Result};
use arbor_core::path;
use arbor_core::types::{CommitGrouping, OperationKind, OperationRecord, Source};
use arbor_store::content::NoBinaries;
use arbor_store::{cnd, BinaryResolver, ContentNode, ImportOptions, Property, PropertyType, Session, StoreError, Value};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, info_span, warn};

/// Result of applying one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Failed(String),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Structured log entry for one handler call
#[derive(Debug)]
pub struct Invocation {
    pub operation: String,
    pub kind: OperationKind,
    pub arguments: BTreeMap<&'static str, String>,
}

impl Invocation {
    fn for_record(record: &OperationRecord, kind: OperationKind) -> Self {
        let mut arguments = BTreeMap::new();
        arguments.insert("content-root", record.content_root.clone());
        match kind {
            OperationKind::Namespace => {
                if let Some(ns) = &record.namespace {
                    arguments.insert("prefix", ns.prefix.clone());
                    arguments.insert("uri", ns.uri.clone());
                }
            }
            OperationKind::NodeTypes => {
                arguments.insert("source", describe(record.node_types.as_ref()));
            }
            OperationKind::ContentDelete => {
                arguments.insert("path", record.content_delete.clone().unwrap_or_default());
            }
            OperationKind::ContentImport => {
                arguments.insert("source", describe(record.content.as_ref()));
                if let Some(directive) = record.delta_directive {
                    arguments.insert("merge", directive.to_string());
                }
            }
            OperationKind::PropertyDelete => {
                arguments.insert("path", record.content_property_delete.clone().unwrap_or_default());
            }
            OperationKind::PropertySet => {
                arguments.insert("values", record.content_property_set.clone().unwrap_or_default().join(", "));
            }
            OperationKind::PropertyAdd => {
                arguments.insert("values", record.content_property_add.clone().unwrap_or_default().join(", "));
            }
        }
        Self {
            operation: record.name.clone(),
            kind,
            arguments,
        }
    }
}

fn describe(source: Option<&Source>) -> String {
    match source {
        Some(Source::Resource(reference)) => format!("resource:{}", reference),
        Some(Source::Inline(text)) => format!("inline({} bytes)", text.len()),
        None => String::new(),
    }
}

/// State a handler works against
pub struct Operation<'a> {
    pub session: &'a mut Session,
    pub record: &'a OperationRecord,
    pub tree: &'a RecordTree,
    loaders: &'a LoaderRegistry,
    /// Record roots besides the active tree that content must not touch
    protected: &'a [String],
    /// Paths created by a content import, stored on the record on success
    context_paths: Option<Vec<String>>,
}

impl Operation<'_> {
    fn loader(&self) -> Result<Box<dyn ResourceLoader>> {
        let origin = self
            .record
            .origin_url
            .as_deref()
            .ok_or_else(|| anyhow!("operation '{}' has no origin to resolve resources against", self.record.name))?;
        self.loaders.loader_for_str(origin)
    }

    /// Fail when `target` overlaps the active record tree or a protected root
    fn guard(&self, target: &str, action: &str) -> Result<()> {
        let roots = std::iter::once(self.tree.root()).chain(self.protected.iter().map(String::as_str));
        for root in roots {
            if overlaps(target, root) {
                bail!("refusing to {} {}: it overlaps the record tree at {}", action, target, root);
            }
        }
        Ok(())
    }

    fn read_text(&self, source: &Source) -> Result<String> {
        match source {
            Source::Inline(text) => Ok(text.clone()),
            Source::Resource(reference) => self.loader()?.read_text(reference),
        }
    }
}

pub type Handler = fn(&mut Operation<'_>) -> Result<()>;

pub struct ContentApplier {
    handlers: HashMap<OperationKind, Handler>,
    grouping: CommitGrouping,
    protected: Vec<String>,
}

impl ContentApplier {
    pub fn new(grouping: CommitGrouping) -> Self {
        let mut handlers: HashMap<OperationKind, Handler> = HashMap::new();
        handlers.insert(OperationKind::Namespace, apply_namespace);
        handlers.insert(OperationKind::NodeTypes, apply_node_types);
        handlers.insert(OperationKind::ContentDelete, apply_content_delete);
        handlers.insert(OperationKind::ContentImport, apply_content_import);
        handlers.insert(OperationKind::PropertyDelete, apply_property_delete);
        handlers.insert(OperationKind::PropertySet, apply_property_set);
        handlers.insert(OperationKind::PropertyAdd, apply_property_add);
        Self {
            handlers,
            grouping,
            protected: Vec::new(),
        }
    }

    /// Also refuse operations on `root`, whichever record tree is active
    pub fn protecting(mut self, root: impl AsRef<str>) -> Self {
        self.protected.push(path::normalize(root.as_ref()));
        self
    }

    /// Apply one record and record its outcome in the record tree
    pub fn apply(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        loaders: &LoaderRegistry,
        record: &OperationRecord,
        ctx: &RunContext,
    ) -> ApplyOutcome {
        let span = info_span!("operation", name = %record.name, sequence = record.sequence);
        let _guard = span.enter();

        let mut tx = match Transaction::begin(session, ctx.mode) {
            Ok(tx) => tx,
            Err(e) => return ApplyOutcome::Failed(format!("{:#}", e)),
        };

        let result = self.run_handlers(session, tree, loaders, record, &mut tx, stamp(record, ctx));
        match result {
            Ok(()) => {
                info!("Applied '{}'", record.name);
                ApplyOutcome::Applied
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!("Operation '{}' failed: {}", record.name, reason);
                if let Err(e) = tx.rollback(session) {
                    warn!("Rollback after '{}' failed: {:#}", record.name, e);
                }
                if let Err(e) = self.store_failure(session, tree, record, &reason, ctx, &mut tx) {
                    warn!("Cannot store failure of '{}': {:#}", record.name, e);
                }
                ApplyOutcome::Failed(reason)
            }
        }
    }

    fn run_handlers(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        loaders: &LoaderRegistry,
        record: &OperationRecord,
        tx: &mut Transaction,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        record.validate_payload().map_err(|reason| anyhow!(reason))?;
        let kinds = record.kinds();

        let mut op = Operation {
            session,
            record,
            tree,
            loaders,
            protected: &self.protected,
            context_paths: None,
        };
        for (i, kind) in kinds.iter().enumerate() {
            let handler = self
                .handlers
                .get(kind)
                .ok_or_else(|| anyhow!("no handler registered for {}", kind))?;
            let invocation = Invocation::for_record(record, *kind);
            debug!(?invocation, "Invoking {} handler", kind);
            handler(&mut op).with_context(|| format!("{} failed", kind))?;

            if self.grouping == CommitGrouping::PerOperation && i + 1 < kinds.len() {
                tx.commit(op.session)?;
            }
        }

        let Operation {
            session,
            context_paths,
            ..
        } = op;
        if let Some(paths) = context_paths {
            tree.set_context_paths(session, &record.name, &paths)?;
        }
        tree.mark_done(session, &record.name, applied_at)?;
        tx.commit(session)
    }

    fn store_failure(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        record: &OperationRecord,
        reason: &str,
        ctx: &RunContext,
        tx: &mut Transaction,
    ) -> Result<()> {
        if tree.get(session, &record.name)?.is_none() {
            return Ok(());
        }
        tree.record_failure(session, &record.name, reason, stamp(record, ctx))?;
        tx.commit(session)
    }
}

impl Default for ContentApplier {
    fn default() -> Self {
        Self::new(CommitGrouping::default())
    }
}

/// Applied-at time to store after an attempt
///
/// A record that discovery did not revisit during this run keeps its old
/// stamp, so the sweep still treats it as orphaned.
fn stamp(record: &OperationRecord, ctx: &RunContext) -> DateTime<Utc> {
    match record.applied_at {
        Some(at) if at < ctx.started_at => at,
        _ => Utc::now(),
    }
}

/// Both paths lie on one branch of the tree
fn overlaps(a: &str, b: &str) -> bool {
    path::is_same_or_descendant(a, b) || path::is_same_or_descendant(b, a)
}

fn namespace_base(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(pos) => &uri[..pos],
        None => uri,
    }
}

fn ensure_namespace(session: &mut Session, prefix: &str, uri: &str) -> Result<()> {
    match session.namespace_uri(prefix)? {
        Some(existing) if existing == uri => {
            debug!("Namespace {} already maps to {}", prefix, uri);
        }
        Some(existing) if namespace_base(&existing) == namespace_base(uri) => {
            info!(
                "Namespace {} is bound to {}; not remapping to {}",
                prefix, existing, uri
            );
        }
        _ => {
            session.register_namespace(prefix, uri)?;
            info!("Registered namespace {} -> {}", prefix, uri);
        }
    }
    Ok(())
}

fn apply_namespace(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let binding = record
        .namespace
        .as_ref()
        .ok_or_else(|| anyhow!("no namespace declared"))?;
    ensure_namespace(op.session, &binding.prefix, &binding.uri)
}

fn apply_node_types(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let source = record
        .node_types
        .as_ref()
        .ok_or_else(|| anyhow!("no node types declared"))?;
    let text = op.read_text(source)?;
    let document = cnd::parse(&text);

    let mut failed = 0usize;
    let mut units = document.errors.len();
    for e in &document.errors {
        warn!("Skipping malformed type definition: {}", e);
        failed += 1;
    }
    for (prefix, uri) in &document.namespaces {
        units += 1;
        if let Err(e) = ensure_namespace(op.session, prefix, uri) {
            warn!("Namespace {} in type definitions failed: {:#}", prefix, e);
            failed += 1;
        }
    }
    for definition in document.types {
        units += 1;
        let name = definition.name.clone();
        let result = match op.session.register_node_type(definition.clone()) {
            Err(StoreError::NodeTypeExists { .. }) => {
                debug!("Node type {} exists; re-registering", name);
                op.session.reregister_node_type(definition)
            }
            other => other,
        };
        match result {
            Ok(()) => debug!("Registered node type {}", name),
            Err(e) => {
                warn!("Node type {} failed: {}", name, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!(
            "'{}': {} of {} type definition units failed; kept the rest",
            record.name, failed, units
        );
    }
    Ok(())
}

fn apply_content_delete(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let target = record
        .content_delete
        .as_deref()
        .ok_or_else(|| anyhow!("no delete path declared"))?;
    if path::is_root(target) {
        bail!("refusing to delete the store root");
    }
    op.guard(target, "delete")?;
    if !op.session.node_exists(target)? {
        debug!("{} does not exist; nothing to delete", target);
        return Ok(());
    }
    let count = op.session.nodes_at(target)?.len();
    if count > 1 {
        bail!("{} matches {} same-name siblings", target, count);
    }
    op.session.remove(target)?;
    info!("Deleted {}", target);
    Ok(())
}

fn apply_content_import(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let source = record
        .content
        .as_ref()
        .ok_or_else(|| anyhow!("no content declared"))?;
    match source {
        Source::Inline(text) => {
            let document = ContentNode::parse(text)?;
            import(op, &document, &NoBinaries)
        }
        Source::Resource(reference) => {
            let loader = op.loader()?;
            if ContentBundle::is_bundle(reference) {
                let bundle = ContentBundle::read(reference, loader.read(reference)?)?;
                let document = ContentNode::parse(bundle.payload())?;
                import(op, &document, &bundle)
            } else {
                let text = loader.read_text(reference)?;
                let document = ContentNode::parse(&text)?;
                import(op, &document, &LoaderBinaries(loader.as_ref()))
            }
        }
    }
}

fn import(op: &mut Operation<'_>, document: &ContentNode, binaries: &dyn BinaryResolver) -> Result<()> {
    let record = op.record;
    let root = record.content_root.as_str();
    if !op.session.node_exists(root)? {
        bail!("content root {} does not exist", root);
    }
    let target = path::join(root, &document.name);
    op.guard(&target, "import over")?;

    let reloading =
        record.reload_on_startup && !record.reload_forbidden() && op.session.node_exists(&target)?;
    let mut position = None;
    if reloading {
        let count = op.session.nodes_at(&target)?.len();
        if count > 1 {
            bail!("cannot reload {}: it matches {} same-name siblings", target, count);
        }
        position = Some(op.session.child_position(&target)?);
        op.session.remove(&target)?;
        info!("Reloading {}", target);
    }

    let options = ImportOptions {
        merge: record.delta_directive,
    };
    let report = op.session.import_content(root, document, options, binaries)?;
    for skipped in &report.skipped {
        warn!("Import of '{}' skipped existing {}", record.name, skipped);
    }
    for dropped in &report.dropped_references {
        warn!("Import of '{}' dropped dangling reference {}", record.name, dropped);
    }

    if let Some(position) = position {
        match op.session.move_to_position(&target, position) {
            Ok(()) => debug!("Restored {} to position {}", target, position),
            Err(StoreError::Unsupported { message }) => {
                debug!("Not restoring position of {}: {}", target, message)
            }
            Err(e) => return Err(e.into()),
        }
    }

    op.context_paths = Some(report.context_paths);
    Ok(())
}

/// The single node owning a property path, if any
fn property_owner(op: &Operation<'_>, property_path: &str) -> Result<Option<(String, String)>> {
    let (node_path, name) = path::split_parent(property_path)
        .ok_or_else(|| anyhow!("'{}' does not name a property", property_path))?;
    op.guard(&node_path, "modify")?;
    if !op.session.node_exists(&node_path)? {
        return Ok(None);
    }
    let count = op.session.nodes_at(&node_path)?.len();
    if count > 1 {
        bail!("{} matches {} same-name siblings", node_path, count);
    }
    Ok(Some((node_path, name)))
}

fn apply_property_delete(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let target = record
        .content_property_delete
        .as_deref()
        .ok_or_else(|| anyhow!("no property path declared"))?;
    let Some((node_path, name)) = property_owner(op, target)? else {
        debug!("{} does not exist; nothing to delete", target);
        return Ok(());
    };
    if op.session.node_at(&node_path)?.property(&name).is_none() {
        debug!("{} does not exist; nothing to delete", target);
        return Ok(());
    }
    op.session.remove_property(target)?;
    info!("Deleted property {}", target);
    Ok(())
}

/// Convert declared text to the type of an existing value where it parses
fn coerce(text: &str, like: Option<PropertyType>) -> Value {
    match like {
        Some(PropertyType::Long) => text.parse().map(Value::Long).unwrap_or_else(|_| Value::from(text)),
        Some(PropertyType::Double) => text.parse().map(Value::Double).unwrap_or_else(|_| Value::from(text)),
        Some(PropertyType::Boolean) => text.parse().map(Value::Boolean).unwrap_or_else(|_| Value::from(text)),
        Some(PropertyType::Date) => DateTime::parse_from_rfc3339(text)
            .map(|d| Value::Date(d.with_timezone(&Utc)))
            .unwrap_or_else(|_| Value::from(text)),
        Some(PropertyType::Name) => Value::Name(text.to_string()),
        Some(PropertyType::Path) => Value::Path(text.to_string()),
        _ => Value::from(text),
    }
}

fn existing_type(property: &Property) -> Option<PropertyType> {
    property.values().first().map(Value::property_type)
}

fn apply_property_set(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let values = record
        .content_property_set
        .as_deref()
        .ok_or_else(|| anyhow!("no property values declared"))?;
    let target = record.content_root.as_str();
    let (node_path, name) = property_owner(op, target)?
        .ok_or_else(|| anyhow!("node owning {} does not exist", target))?;

    let property = match op.session.node_at(&node_path)?.property(&name) {
        Some(existing) if !existing.is_multiple() => {
            if values.len() != 1 {
                warn!(
                    "{} is single-valued but {} values were declared; skipping",
                    target,
                    values.len()
                );
                return Ok(());
            }
            Property::single(coerce(&values[0], existing_type(existing)))
        }
        Some(existing) => {
            let like = existing_type(existing);
            Property::multiple(values.iter().map(|v| coerce(v, like)).collect())
        }
        None if values.len() == 1 => Property::single(values[0].as_str()),
        None => Property::multiple(values.iter().map(|v| Value::from(v.as_str())).collect()),
    };
    op.session.set_property(&node_path, &name, property)?;
    info!("Set property {}", target);
    Ok(())
}

fn apply_property_add(op: &mut Operation<'_>) -> Result<()> {
    let record = op.record;
    let values = record
        .content_property_add
        .as_deref()
        .ok_or_else(|| anyhow!("no property values declared"))?;
    let target = record.content_root.as_str();
    let (node_path, name) = property_owner(op, target)?
        .ok_or_else(|| anyhow!("node owning {} does not exist", target))?;

    let merged = match op.session.node_at(&node_path)?.property(&name) {
        Some(existing) if existing.is_multiple() => {
            let like = existing_type(existing);
            let mut merged = existing.values().to_vec();
            merged.extend(values.iter().map(|v| coerce(v, like)));
            merged
        }
        Some(_) => {
            warn!("{} is single-valued; values can only be added to multi-valued properties", target);
            return Ok(());
        }
        None => {
            warn!("{} does not exist; values can only be added to existing properties", target);
            return Ok(());
        }
    };
    op.session.set_property(&node_path, &name, Property::multiple(merged))?;
    info!("Added {} values to {}", values.len(), target);
    Ok(())
}
