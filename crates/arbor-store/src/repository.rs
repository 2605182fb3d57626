//! Committed store state shared by sessions

use crate::error::{StoreError, StoreResult};
use crate::session::Session;
use crate::workspace::Workspace;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SNAPSHOT_FILE: &str = "workspace.json";

struct Inner {
    committed: Mutex<Workspace>,
    storage: Option<PathBuf>,
}

/// A content repository
///
/// Cloning yields another handle to the same repository.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl Repository {
    /// A repository that lives only in memory
    pub fn in_memory() -> Self {
        Self::with_state(Workspace::new(), None)
    }

    /// Open a file-backed repository, creating it when the directory is empty
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let snapshot = dir.join(SNAPSHOT_FILE);
        let state = if snapshot.exists() {
            debug!("Loading repository snapshot from {}", snapshot.display());
            Workspace::from_json(&fs::read(&snapshot)?)?
        } else {
            info!("Initializing new repository at {}", dir.display());
            Workspace::new()
        };
        Ok(Self::with_state(state, Some(dir.to_path_buf())))
    }

    fn with_state(state: Workspace, storage: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                committed: Mutex::new(state),
                storage,
            }),
        }
    }

    /// Open a session on the committed state
    pub fn login(&self) -> Session {
        Session::new(self.clone(), self.snapshot())
    }

    fn lock(&self) -> MutexGuard<'_, Workspace> {
        self.inner
            .committed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Workspace {
        self.lock().clone()
    }

    /// Replace the committed state, persisting it first when file-backed
    pub(crate) fn commit(&self, state: &Workspace) -> StoreResult<()> {
        let mut committed = self.lock();
        if let Some(dir) = &self.inner.storage {
            let bytes = state.to_json()?;
            let mut file = tempfile::NamedTempFile::new_in(dir)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(dir.join(SNAPSHOT_FILE))
                .map_err(|e| StoreError::Persistence(e.error))?;
        }
        *committed = state.clone();
        Ok(())
    }
}
