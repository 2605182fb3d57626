//! Commit boundaries for one operation
//!
//! In apply mode a commit saves the session and a rollback discards its
//! uncommitted changes. In dry-run mode nothing is ever saved: commit moves an
//! in-memory checkpoint forward and rollback returns to it.

use crate::context::RunMode;
use anyhow::Result;
use arbor_store::{Checkpoint, Session};

pub struct Transaction {
    mode: RunMode,
    checkpoint: Option<Checkpoint>,
}

impl Transaction {
    pub fn begin(session: &Session, mode: RunMode) -> Result<Self> {
        let checkpoint = match mode {
            RunMode::Apply => None,
            RunMode::DryRun => Some(session.checkpoint()?),
        };
        Ok(Self { mode, checkpoint })
    }

    pub fn commit(&mut self, session: &mut Session) -> Result<()> {
        match self.mode {
            RunMode::Apply => session.save()?,
            RunMode::DryRun => self.checkpoint = Some(session.checkpoint()?),
        }
        Ok(())
    }

    pub fn rollback(&self, session: &mut Session) -> Result<()> {
        match &self.checkpoint {
            Some(checkpoint) => session.restore(checkpoint)?,
            None => session.refresh(false)?,
        }
        Ok(())
    }
}
