//! Commit protocol.
//!
//! State machine: `Clean` → `Dirty` (on any mutation) → `Committing(level)`
//! (while a commit thumb is in flight) → `Clean`. The store rejects mutation
//! while `Committing`; starting a second durable commit while one is undone
//! is an error. There is no separate abort: closing a dirty store discards.
//!
//! `small_commit` (in `store.rs`) is the synchronous best-effort path and may
//! defer transparently. The durable levels here each fully commit
//! outstanding changes; `Compress` additionally reclaims space by dropping
//! arena rows no table holds.

use std::path::PathBuf;

use burrow_error::{BurrowError, Result};
use burrow_types::Env;
use tracing::{debug, warn};

use crate::snapshot::{self, SnapshotDoc};
use crate::store::{Shared, WeakShared, try_upgrade};
use crate::thumb::{Job, Step, Thumb};

/// Durability level of a commit thumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitLevel {
    /// Durable commit of outstanding changes.
    Large,
    /// Durable commit at a session boundary.
    Session,
    /// Durable commit that also reclaims space.
    Compress,
}

/// Store commit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum CommitState {
    #[default]
    Clean,
    Dirty,
    Committing(CommitLevel),
}

/// Transition the store into `Committing(level)` and hand back the thumb
/// that drives the write.
pub(crate) fn begin(env: &Env, shared: &Shared, level: CommitLevel) -> Result<Thumb<()>> {
    let weak = std::sync::Arc::downgrade(shared);
    let mut inner = shared.write();
    if inner.readonly {
        return Err(crate::raise(
            env,
            BurrowError::StoreReadOnly {
                reason: "snapshot port",
            },
        ));
    }
    let was_dirty = match inner.commit {
        CommitState::Committing(_) => {
            return Err(crate::raise(env, BurrowError::CommitInFlight));
        }
        CommitState::Dirty => true,
        CommitState::Clean => false,
    };
    inner.commit = CommitState::Committing(level);
    let path = inner.path.clone();
    debug!(?level, was_dirty, "commit begun");
    Ok(Thumb::new(CommitJob {
        store: weak,
        level,
        path,
        was_dirty,
        finished: false,
        phase: Phase::Collect,
        doc: None,
        bytes: None,
    }))
}

enum Phase {
    Collect,
    Encode,
    Write,
    Finish,
}

struct CommitJob {
    store: WeakShared,
    level: CommitLevel,
    path: Option<PathBuf>,
    was_dirty: bool,
    finished: bool,
    phase: Phase,
    doc: Option<SnapshotDoc>,
    bytes: Option<Vec<u8>>,
}

impl Job for CommitJob {
    type Output = ();

    fn step(&mut self, _env: &Env) -> Result<Step<()>> {
        match self.phase {
            Phase::Collect => {
                let shared = try_upgrade(&self.store)?;
                let mut inner = shared.write();
                if self.level == CommitLevel::Compress {
                    let dead = snapshot::unreferenced_rows(&inner);
                    if !dead.is_empty() {
                        debug!(count = dead.len(), "compress dropping unreferenced rows");
                        inner.rows.retain(|oid, _| !dead.contains(oid));
                    }
                }
                self.doc = Some(snapshot::encode(&inner));
                self.phase = Phase::Encode;
                Ok(Step::Progress {
                    current: 1,
                    total: 4,
                })
            }
            Phase::Encode => {
                let doc = self
                    .doc
                    .take()
                    .ok_or_else(|| BurrowError::internal("commit lost its document"))?;
                self.bytes = Some(snapshot::to_bytes(&doc)?);
                self.phase = Phase::Write;
                Ok(Step::Progress {
                    current: 2,
                    total: 4,
                })
            }
            Phase::Write => {
                let bytes = self
                    .bytes
                    .as_ref()
                    .ok_or_else(|| BurrowError::internal("commit lost its image"))?;
                if let Some(path) = &self.path {
                    std::fs::write(snapshot::temp_path(path), bytes)?;
                } else {
                    let shared = try_upgrade(&self.store)?;
                    shared.write().mem_image = self.bytes.take();
                }
                self.phase = Phase::Finish;
                Ok(Step::Progress {
                    current: 3,
                    total: 4,
                })
            }
            Phase::Finish => {
                if let Some(path) = &self.path {
                    std::fs::rename(snapshot::temp_path(path), path)?;
                }
                let shared = try_upgrade(&self.store)?;
                shared.write().commit = CommitState::Clean;
                self.finished = true;
                debug!(level = ?self.level, "commit finished");
                Ok(Step::Done(()))
            }
        }
    }
}

impl Drop for CommitJob {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Cancelled or failed mid-flight: put the store back the way the
        // thumb found it and clean up any temp file.
        if let Some(shared) = self.store.upgrade() {
            let mut inner = shared.write();
            if matches!(inner.commit, CommitState::Committing(_)) {
                inner.commit = if self.was_dirty {
                    CommitState::Dirty
                } else {
                    CommitState::Clean
                };
            }
        }
        if let Some(path) = &self.path {
            let tmp = snapshot::temp_path(path);
            if tmp.exists() {
                if let Err(e) = std::fs::remove_file(&tmp) {
                    warn!(tmp = %tmp.display(), error = %e, "could not remove commit temp file");
                }
            }
        }
    }
}
