//! The reconciliation engine
//!
//! One run walks `discover -> load & integrate -> cascade -> apply -> cleanup`.
//! Every stage is recoverable except a store that is not live, which aborts the
//! run before any operation executes.

use crate::applier::{ApplyOutcome, ContentApplier};
use crate::cascade::DownstreamCascader;
use crate::cleaner::Cleaner;
use crate::context::{RunContext, RunMode};
use crate::discovery::ExtensionScanner;
use crate::loader::{integrate, ExtensionLoader, ReloadMarker};
use crate::records::RecordTree;
use crate::resource::LoaderRegistry;
use crate::transaction::Transaction;
use arbor_core::types::{BootstrapConfig, OperationRecord, Status};
use arbor_core::{Error, Result};
use arbor_store::{Session, StoreError};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An operation that ended the run still pending
#[derive(Debug, Clone, Serialize)]
pub struct FailedOperation {
    pub name: String,
    pub reason: String,
}

/// Outcome of applying a set of records
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub applied: Vec<String>,
    pub failed: Vec<FailedOperation>,
}

/// What one run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    /// Descriptors found on the search path
    pub discovered: usize,
    /// Origins or search path entries that could not be loaded
    pub failed_extensions: Vec<String>,
    /// Records declared by the loaded extensions
    pub touched: usize,
    pub applied: Vec<String>,
    pub failed: Vec<FailedOperation>,
    /// Records removed because no extension declares them any more
    pub swept: Vec<String>,
    /// Records still pending when the run finished
    pub pending_after: usize,
}

#[derive(Debug, Default)]
struct LoadReport {
    discovered: usize,
    failed_extensions: Vec<String>,
    touched: Vec<String>,
}

pub struct ReconciliationEngine {
    config: BootstrapConfig,
    loaders: LoaderRegistry,
    applier: ContentApplier,
}

impl ReconciliationEngine {
    pub fn new(config: BootstrapConfig) -> Self {
        let applier = ContentApplier::new(config.commit_grouping).protecting(&config.record_root);
        Self {
            config,
            loaders: LoaderRegistry::default(),
            applier,
        }
    }

    /// Replace the resource loader registry
    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The real record tree
    pub fn record_tree(&self) -> RecordTree {
        RecordTree::new(&self.config.record_root)
    }

    /// Run the whole pipeline and commit its results
    pub fn run(&self, session: &mut Session) -> Result<RunSummary> {
        let ctx = RunContext::new(RunMode::Apply);
        let span = ctx.span();
        let _guard = span.enter();
        ensure_live(session)?;

        info!("Starting bootstrap run");
        let summary = self.pass(session, &self.record_tree(), &ctx)?;
        log_summary(&summary);
        Ok(summary)
    }

    /// Discover and integrate every extension on the search path
    ///
    /// Returns the names of all records the extensions declared.
    pub fn load_extensions(&self, session: &mut Session) -> Result<Vec<String>> {
        let ctx = RunContext::new(RunMode::Apply);
        let span = ctx.span();
        let _guard = span.enter();
        ensure_live(session)?;

        let tree = self.record_tree();
        let mut tx = self.prepare(session, &tree, &ctx)?;
        let report = self.load_all(session, &tree, &mut tx)?;
        Ok(report.touched)
    }

    /// Load and integrate a single extension
    pub fn load_extension(&self, session: &mut Session, origin: &str) -> Result<Vec<String>> {
        let ctx = RunContext::new(RunMode::Apply);
        let span = ctx.span();
        let _guard = span.enter();
        ensure_live(session)?;

        let tree = self.record_tree();
        let mut tx = self.prepare(session, &tree, &ctx)?;
        let staged = ExtensionLoader::new(&self.loaders).load(origin)?;

        let mut markers = Vec::new();
        let outcome = integrate(session, &tree, &staged, Utc::now(), &mut markers)
            .map_err(|e| stage_error("integrate", e))?;
        tx.commit(session).map_err(|e| stage_error("integrate", e))?;
        self.cascade(session, &tree, &markers, &mut tx)?;
        Ok(outcome.touched)
    }

    /// Apply the named records, or every pending record when `items` is `None`
    pub fn process_initialize_items(
        &self,
        session: &mut Session,
        items: Option<&[String]>,
    ) -> Result<ProcessReport> {
        let ctx = RunContext::new(RunMode::Apply);
        let span = ctx.span();
        let _guard = span.enter();
        ensure_live(session)?;

        let tree = self.record_tree();
        self.process(session, &tree, &ctx, items)
    }

    /// Run the pipeline against a scratch record tree and discard everything
    ///
    /// Existing records are copied into the scratch tree so that reload
    /// decisions match a real run. The store is left exactly as it was.
    pub fn dry_run(&self, session: &mut Session) -> Result<RunSummary> {
        let ctx = RunContext::new(RunMode::DryRun);
        let span = ctx.span();
        let _guard = span.enter();
        ensure_live(session)?;

        let base = session
            .checkpoint()
            .map_err(|e| stage_error("dry-run", e.into()))?;
        let scratch = RecordTree::new(format!("/{}-{}", self.config.scratch_prefix, ctx.run_id));
        info!("Dry run using scratch records at {}", scratch.root());

        let result = self
            .seed_scratch(session, &scratch)
            .and_then(|()| self.pass(session, &scratch, &ctx));

        session
            .restore(&base)
            .map_err(|e| stage_error("dry-run", e.into()))?;

        let summary = result?;
        log_summary(&summary);
        Ok(summary)
    }

    fn seed_scratch(&self, session: &mut Session, scratch: &RecordTree) -> Result<()> {
        scratch
            .ensure(session)
            .map_err(|e| stage_error("dry-run", e))?;
        let real = self.record_tree();
        if !session.node_exists(real.root()).map_err(|e| stage_error("dry-run", e.into()))? {
            return Ok(());
        }
        let records = real.list(session).map_err(|e| stage_error("dry-run", e))?;
        let tags = real.version_tags(session).map_err(|e| stage_error("dry-run", e))?;
        for record in &records {
            scratch
                .write(session, record)
                .map_err(|e| stage_error("dry-run", e))?;
        }
        for tag in &tags {
            scratch
                .add_version_tag(session, tag)
                .map_err(|e| stage_error("dry-run", e))?;
        }
        debug!("Copied {} records into the scratch tree", records.len());
        Ok(())
    }

    /// Ensure the record tree exists and open the run's transaction
    fn prepare(&self, session: &mut Session, tree: &RecordTree, ctx: &RunContext) -> Result<Transaction> {
        let mut tx = Transaction::begin(session, ctx.mode).map_err(|e| stage_error("prepare", e))?;
        tree.ensure(session)
            .and_then(|()| tx.commit(session))
            .map_err(|e| stage_error("prepare", e))?;
        Ok(tx)
    }

    fn pass(&self, session: &mut Session, tree: &RecordTree, ctx: &RunContext) -> Result<RunSummary> {
        let mut tx = self.prepare(session, tree, ctx)?;
        let load = self.load_all(session, tree, &mut tx)?;
        let processed = self.process(session, tree, ctx, None)?;

        let mut tx = Transaction::begin(session, ctx.mode).map_err(|e| stage_error("cleanup", e))?;
        let swept = if !self.config.cleanup {
            Vec::new()
        } else if !load.failed_extensions.is_empty() {
            warn!(
                "Skipping cleanup: {} extensions failed to load",
                load.failed_extensions.len()
            );
            Vec::new()
        } else {
            match Cleaner::sweep(session, tree, ctx.started_at).and_then(|swept| {
                tx.commit(session)?;
                Ok(swept)
            }) {
                Ok(swept) => swept,
                Err(e) => {
                    error!("Cleanup failed: {:#}", e);
                    rollback(session, &tx);
                    Vec::new()
                }
            }
        };

        let pending_after = tree
            .pending(session)
            .map_err(|e| stage_error("summary", e))?
            .len();
        Ok(RunSummary {
            run_id: ctx.run_id,
            dry_run: ctx.is_dry_run(),
            discovered: load.discovered,
            failed_extensions: load.failed_extensions,
            touched: load.touched.len(),
            applied: processed.applied,
            failed: processed.failed,
            swept,
            pending_after,
        })
    }

    fn load_all(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        tx: &mut Transaction,
    ) -> Result<LoadReport> {
        let discovery = ExtensionScanner::new(&self.config.descriptor_names).scan(&self.config.search_path);
        let mut report = LoadReport {
            discovered: discovery.origins.len(),
            failed_extensions: discovery
                .failures
                .iter()
                .map(|e| match e {
                    Error::Discovery { origin, .. } => origin.clone(),
                    other => other.to_string(),
                })
                .collect(),
            touched: Vec::new(),
        };

        let loader = ExtensionLoader::new(&self.loaders);
        let mut markers: Vec<ReloadMarker> = Vec::new();
        for origin in &discovery.origins {
            ensure_live(session)?;
            let staged = match loader.load(origin) {
                Ok(staged) => staged,
                Err(e) => {
                    warn!("Skipping extension: {}", e);
                    report.failed_extensions.push(origin.clone());
                    continue;
                }
            };

            let mut staged_markers = Vec::new();
            let result = integrate(session, tree, &staged, Utc::now(), &mut staged_markers)
                .and_then(|outcome| tx.commit(session).map(|()| outcome));
            match result {
                Ok(outcome) => {
                    debug!(
                        "Integrated {}: {} created, {} reloaded",
                        origin, outcome.created, outcome.reloaded
                    );
                    report.touched.extend(outcome.touched);
                    markers.append(&mut staged_markers);
                }
                Err(e) => {
                    error!("Failed to integrate {}: {:#}", origin, e);
                    rollback(session, tx);
                    report.failed_extensions.push(origin.clone());
                }
            }
        }

        self.cascade(session, tree, &markers, tx)?;
        info!(
            "Integrated {} records from {} discovered extensions",
            report.touched.len(),
            report.discovered
        );
        Ok(report)
    }

    fn cascade(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        markers: &[ReloadMarker],
        tx: &mut Transaction,
    ) -> Result<()> {
        let result = DownstreamCascader::mark_downstream(session, tree, markers)
            .and_then(|marked| tx.commit(session).map(|()| marked));
        match result {
            Ok(marked) if !marked.is_empty() => {
                info!("Re-marked {} downstream records pending", marked.len());
            }
            Ok(_) => {}
            Err(e) => {
                error!("Downstream cascade failed: {:#}", e);
                rollback(session, tx);
            }
        }
        Ok(())
    }

    fn process(
        &self,
        session: &mut Session,
        tree: &RecordTree,
        ctx: &RunContext,
        items: Option<&[String]>,
    ) -> Result<ProcessReport> {
        let records = match items {
            Some(names) => self.named_records(session, tree, names)?,
            None => tree.pending(session).map_err(|e| stage_error("process", e))?,
        };
        debug!("Applying {} records", records.len());

        let mut report = ProcessReport::default();
        for record in &records {
            ensure_live(session)?;
            match self.applier.apply(session, tree, &self.loaders, record, ctx) {
                ApplyOutcome::Applied => report.applied.push(record.name.clone()),
                ApplyOutcome::Failed(reason) => report.failed.push(FailedOperation {
                    name: record.name.clone(),
                    reason,
                }),
            }
            if ctx.mode == RunMode::Apply {
                session
                    .refresh(false)
                    .map_err(|e| stage_error("process", e.into()))?;
            }
        }
        Ok(report)
    }

    fn named_records(
        &self,
        session: &Session,
        tree: &RecordTree,
        names: &[String],
    ) -> Result<Vec<OperationRecord>> {
        let mut records = Vec::with_capacity(names.len());
        for name in names {
            match tree.get(session, name).map_err(|e| stage_error("process", e))? {
                Some(record) if record.status == Status::Disabled => {
                    warn!("'{}' is disabled; not applying", name);
                }
                Some(record) => records.push(record),
                None => warn!("No record named '{}'", name),
            }
        }
        records.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }
}

fn ensure_live(session: &Session) -> Result<()> {
    if session.is_live() {
        Ok(())
    } else {
        Err(Error::store_unavailable("the session is not live"))
    }
}

fn rollback(session: &mut Session, tx: &Transaction) {
    if let Err(e) = tx.rollback(session) {
        warn!("Rollback failed: {:#}", e);
    }
}

/// Map an internal failure to the engine's error type
fn stage_error(stage: &str, e: anyhow::Error) -> Error {
    match e.downcast_ref::<StoreError>() {
        Some(StoreError::NotLive) => Error::store_unavailable(format!("{}: the session is not live", stage)),
        _ => Error::apply(stage, format!("{:#}", e)),
    }
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Bootstrap finished: {} applied, {} failed, {} swept, {} pending",
        summary.applied.len(),
        summary.failed.len(),
        summary.swept.len(),
        summary.pending_after
    );
    for failed in &summary.failed {
        warn!("Still pending: {} ({})", failed.name, failed.reason);
    }
}
