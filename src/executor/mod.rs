//! Journaled execution of organization plans.
//!
//! Entries run strictly in plan order. Each successful action is appended
//! to the batch journal before it counts as done, so whatever happens to
//! the process afterwards, the journal describes exactly what must be
//! undone.

use colored::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::planner::{Operation, OrganizationPlan, OverwritePolicy, PlanEntry};
use crate::progress::{Phase, ProgressSink};

mod fsops;
mod journal;
mod rollback;
mod space;

pub use journal::{BatchHeader, Journal, JournalEntry, JournalSummary, PriorState};
pub use rollback::RollbackReport;
pub use space::{available_space, ensure_space};

use journal::JournalWriter;

/// Directory below the destination root that holds replaced files.
pub const BACKUP_DIR_NAME: &str = ".photo-organizer-backup";

/// Shared cancellation flag, polled between files. Clones observe the same
/// flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchState {
    Planned,
    Executing,
    Completed,
    Cancelled,
    PartiallyFailed,
    RolledBack,
}

impl BatchState {
    pub fn can_transition(self, to: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, to),
            (Planned, Executing)
                | (Executing, Completed)
                | (Executing, Cancelled)
                | (Executing, PartiallyFailed)
                | (Completed, RolledBack)
                | (Cancelled, RolledBack)
                | (PartiallyFailed, RolledBack)
        )
    }

    pub fn transition(self, to: BatchState) -> Result<BatchState> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }

    /// Execution is over; only rollback remains.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Completed
                | BatchState::Cancelled
                | BatchState::PartiallyFailed
                | BatchState::RolledBack
        )
    }
}

/// A plan or journal entry that could not be carried out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub kind: ErrorKind,
    pub reason: String,
}

impl EntryFailure {
    pub(crate) fn new(source: &Path, destination: &Path, error: &Error) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionReport {
    pub batch_id: String,
    pub completed: usize,
    pub failed: Vec<EntryFailure>,
    pub cancelled: bool,
    /// Why the batch stopped early, when it hit a batch-fatal condition.
    pub fatal: Option<String>,
    pub state: BatchState,
    pub journal: Journal,
    pub duration: Duration,
}

impl ExecutionReport {
    /// Entries never attempted because of cancellation or a fatal error.
    pub fn not_attempted(&self, plan_len: usize) -> usize {
        plan_len.saturating_sub(self.completed + self.failed.len())
    }
}

struct BatchContext<'a> {
    root: &'a Path,
    backup_dir: &'a Path,
    policy: OverwritePolicy,
    tag: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionalExecutor {
    journal_dir: Option<PathBuf>,
}

impl TransactionalExecutor {
    /// Executor whose journals live only in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist each batch journal as `<dir>/<batch-id>.jsonl`.
    pub fn with_journal_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            journal_dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    pub fn journal_dir(&self) -> Option<&Path> {
        self.journal_dir.as_deref()
    }

    /// Apply `plan`. Only failures to set up the batch (not enough free
    /// space for the copies, destination root or journal) are returned as
    /// errors; per-entry failures are collected in the report.
    pub fn execute(
        &self,
        plan: &OrganizationPlan,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionReport> {
        let start = Instant::now();
        let root = plan.destination_root();
        let total = plan.len();
        info!(
            "Executing batch {} ({} entries) into {}",
            plan.batch_id(),
            total,
            root.display()
        );

        space::ensure_space(plan, space::available_space(root))?;

        let root_created = if root.is_dir() {
            false
        } else {
            fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
            true
        };

        let header = BatchHeader {
            batch_id: plan.batch_id().to_string(),
            destination_root: root.to_path_buf(),
            backup_dir: root.join(BACKUP_DIR_NAME).join(plan.batch_id()),
            root_created,
            created_at: chrono::Local::now().to_rfc3339(),
        };
        let mut writer = JournalWriter::create(self.journal_dir.as_deref(), &header)?;
        let mut journal = Journal::new(header.clone(), writer.path());

        let mut state = BatchState::Planned.transition(BatchState::Executing)?;
        writer.append_state(state)?;
        journal.set_state(state);

        let ctx = BatchContext {
            root,
            backup_dir: &header.backup_dir,
            policy: plan.overwrite_policy(),
            tag: plan.batch_id(),
        };

        let mut failed = Vec::new();
        let mut cancelled = false;
        let mut fatal = None;

        sink.on_phase_start(Phase::Execute, total);
        for (index, entry) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Cancelled after {} of {} entries", index, total);
                cancelled = true;
                break;
            }
            if !root.is_dir() {
                let reason = format!("destination root {} is gone", root.display());
                error!("{}", reason);
                fatal = Some(reason);
                break;
            }

            let source = &entry.source().path;
            let destination = root.join(entry.destination());
            sink.on_file_start(index, total, source);

            let sequence = journal.len() as u64 + 1;
            match apply(entry, &ctx, sequence) {
                Ok(done) => {
                    if let Err(e) = writer.append_entry(&done) {
                        error!("Journal write failed, undoing {}: {}", source.display(), e);
                        if let Err(undo) = rollback::undo_entry(&done) {
                            error!("Could not undo {}: {}", source.display(), undo);
                        }
                        fsops::remove_empty_dirs(&done.created_dirs);
                        failed.push(EntryFailure::new(source, &destination, &e));
                        fatal = Some(e.to_string());
                        break;
                    }
                    journal.push(done);
                    sink.on_file_done(index, total, source);
                }
                Err(e) => {
                    sink.on_error(source, &e);
                    failed.push(EntryFailure::new(source, &destination, &e));
                    if e.is_resource_exhausted() {
                        error!("Stopping batch: {}", e);
                        fatal = Some(e.to_string());
                        break;
                    }
                    warn!("{} -> {}: {}", source.display(), destination.display(), e);
                }
            }
        }
        sink.on_phase_complete(Phase::Execute);

        let outcome = if fatal.is_some() {
            BatchState::PartiallyFailed
        } else if cancelled {
            BatchState::Cancelled
        } else if !failed.is_empty() {
            BatchState::PartiallyFailed
        } else {
            BatchState::Completed
        };
        state = state.transition(outcome)?;
        journal.set_state(state);
        if let Err(e) = writer.append_state(state) {
            warn!("Could not record final batch state: {}", e);
        }

        let duration = start.elapsed();
        info!(
            "Batch {} finished {:?}: {} done, {} failed",
            plan.batch_id(),
            state,
            journal.len(),
            failed.len()
        );
        debug!("Execution took {}", format!("{:.2?}", duration).green());

        Ok(ExecutionReport {
            batch_id: plan.batch_id().to_string(),
            completed: journal.len(),
            failed,
            cancelled,
            fatal,
            state,
            journal,
            duration,
        })
    }

    /// Undo a batch in reverse order. Safe to repeat: entries already back in
    /// their original state are skipped.
    pub fn rollback(&self, journal: &mut Journal, sink: &dyn ProgressSink) -> Result<RollbackReport> {
        rollback::rollback(journal, sink)
    }
}

/// Carry out one entry. On error, everything this call changed is put back.
fn apply(entry: &PlanEntry, ctx: &BatchContext<'_>, sequence: u64) -> Result<JournalEntry> {
    let source = &entry.source().path;
    let destination = ctx.root.join(entry.destination());

    if *source == destination {
        return Err(Error::DestinationExists(destination));
    }
    fs::symlink_metadata(source).map_err(|e| Error::io(source, e))?;

    let mut created_dirs = Vec::new();
    let result = prepare_and_run(entry, ctx, sequence, &destination, &mut created_dirs);
    match result {
        Ok(prior) => Ok(JournalEntry {
            sequence,
            source: source.clone(),
            destination,
            operation: entry.operation(),
            prior,
            created_dirs,
        }),
        Err(e) => {
            fsops::remove_empty_dirs(&created_dirs);
            Err(e)
        }
    }
}

fn prepare_and_run(
    entry: &PlanEntry,
    ctx: &BatchContext<'_>,
    sequence: u64,
    destination: &Path,
    created_dirs: &mut Vec<PathBuf>,
) -> Result<PriorState> {
    let source = &entry.source().path;

    if let Some(parent) = destination.parent() {
        fsops::ensure_dir(parent, created_dirs).map_err(|e| Error::io(parent, e))?;
    }

    let prior = if fsops::exists(destination) {
        match ctx.policy {
            OverwritePolicy::Skip | OverwritePolicy::Rename => {
                return Err(Error::DestinationExists(destination.to_path_buf()))
            }
            OverwritePolicy::Overwrite => {
                let slot = ctx.backup_dir.join(sequence.to_string());
                fsops::ensure_dir(&slot, created_dirs).map_err(|e| Error::io(&slot, e))?;
                let backup = slot.join(destination.file_name().unwrap_or_default());
                fsops::move_file(destination, &backup, ctx.tag)
                    .map_err(|e| Error::io(destination, e))?;
                debug!("Backed up {} to {}", destination.display(), backup.display());
                PriorState::Replaced { backup }
            }
        }
    } else {
        PriorState::Fresh
    };

    let outcome = match entry.operation() {
        Operation::Copy => fsops::copy_atomic(source, destination, ctx.tag),
        Operation::Move => fsops::move_file(source, destination, ctx.tag),
    };

    if let Err(e) = outcome {
        if let PriorState::Replaced { backup } = &prior {
            if let Err(restore) = fsops::move_file(backup, destination, ctx.tag) {
                error!(
                    "Could not restore {} from {}: {}",
                    destination.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(Error::io(source, e));
    }

    Ok(prior)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_transitions() {
        use BatchState::*;
        assert_eq!(Planned.transition(Executing).unwrap(), Executing);
        assert!(Executing.transition(Cancelled).is_ok());
        assert!(PartiallyFailed.transition(RolledBack).is_ok());
        assert!(matches!(
            Planned.transition(Completed),
            Err(Error::InvalidTransition { .. })
        ));
        for to in [Planned, Executing, Completed, Cancelled, PartiallyFailed, RolledBack] {
            assert!(!RolledBack.can_transition(to));
        }
        assert!(RolledBack.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Planned.is_terminal() && !Executing.is_terminal());
        assert!(!Completed.can_transition(Executing));
    }

    #[test]
    fn cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
