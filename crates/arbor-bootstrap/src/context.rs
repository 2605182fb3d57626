//! Per-run context threaded through every stage

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info_span, Span};
use uuid::Uuid;

/// Whether a run commits its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Apply,
    DryRun,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Apply => write!(f, "apply"),
            RunMode::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Identity and start time of one bootstrap invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
}

impl RunContext {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
        }
    }

    /// Span carrying the run identity; enter it for the duration of the run
    pub fn span(&self) -> Span {
        info_span!("bootstrap", run_id = %self.run_id, mode = %self.mode)
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == RunMode::DryRun
    }
}
