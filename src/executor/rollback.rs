use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

use colored::*;
use tracing::{debug, info, warn};

use super::fsops::{self, exists};
use super::journal::{Journal, JournalEntry, JournalWriter, PriorState};
use super::{BatchState, EntryFailure, BACKUP_DIR_NAME};
use crate::error::{Error, Result};
use crate::planner::Operation;
use crate::progress::{Phase, ProgressSink};

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub batch_id: String,
    pub restored: usize,
    /// Entries already in their pre-batch state.
    pub skipped: usize,
    pub failed: Vec<EntryFailure>,
    pub state: BatchState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Undo {
    Restored,
    AlreadyUndone,
}

const ROLLBACK_TAG: &str = "rollback";

fn move_back(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fsops::move_file(from, to, ROLLBACK_TAG).map_err(|e| Error::io(from, e))
}

/// Reverse one journal entry, or recognise that it already has been.
///
/// For replaced destinations the undo happens in two steps (remove or move
/// back the batch's file, then restore the backup) and the presence of the
/// backup tells which steps are still outstanding.
pub(crate) fn undo_entry(entry: &JournalEntry) -> Result<Undo> {
    let source = entry.source.as_path();
    let destination = entry.destination.as_path();

    match &entry.prior {
        PriorState::Fresh => match entry.operation {
            Operation::Copy => {
                if !exists(destination) {
                    return Ok(Undo::AlreadyUndone);
                }
                fs::remove_file(destination).map_err(|e| Error::io(destination, e))?;
                Ok(Undo::Restored)
            }
            Operation::Move => {
                if !exists(destination) {
                    if exists(source) {
                        return Ok(Undo::AlreadyUndone);
                    }
                    return Err(Error::io(
                        destination,
                        io::Error::new(io::ErrorKind::NotFound, "file missing at both ends"),
                    ));
                }
                if exists(source) {
                    return Err(Error::DestinationExists(source.to_path_buf()));
                }
                move_back(destination, source)?;
                Ok(Undo::Restored)
            }
        },
        PriorState::Replaced { backup } => {
            if !exists(backup) {
                return Ok(Undo::AlreadyUndone);
            }
            if exists(destination) {
                match entry.operation {
                    Operation::Copy => {
                        fs::remove_file(destination).map_err(|e| Error::io(destination, e))?
                    }
                    Operation::Move => {
                        if exists(source) {
                            return Err(Error::DestinationExists(source.to_path_buf()));
                        }
                        move_back(destination, source)?;
                    }
                }
            }
            move_back(backup, destination)?;
            Ok(Undo::Restored)
        }
    }
}

pub(crate) fn rollback(journal: &mut Journal, sink: &dyn ProgressSink) -> Result<RollbackReport> {
    let start = Instant::now();
    let state = journal.state();
    // A rolled-back journal replays as a no-op.
    if !state.is_terminal() {
        return Err(Error::InvalidTransition {
            from: state,
            to: BatchState::RolledBack,
        });
    }

    let total = journal.len();
    info!(
        "Rolling back batch {} ({} entries)",
        journal.batch_id(),
        total
    );

    let mut restored = 0;
    let mut skipped = 0;
    let mut failed = Vec::new();

    sink.on_phase_start(Phase::Rollback, total);
    for (index, entry) in journal.entries().iter().rev().enumerate() {
        sink.on_file_start(index, total, &entry.destination);
        match undo_entry(entry) {
            Ok(Undo::Restored) => {
                restored += 1;
                sink.on_file_done(index, total, &entry.destination);
            }
            Ok(Undo::AlreadyUndone) => {
                skipped += 1;
                sink.on_file_done(index, total, &entry.destination);
            }
            Err(e) => {
                warn!("Could not undo entry {}: {}", entry.sequence, e);
                sink.on_error(&entry.destination, &e);
                failed.push(EntryFailure::new(&entry.source, &entry.destination, &e));
                continue;
            }
        }
        fsops::remove_empty_dirs(&entry.created_dirs);
    }
    sink.on_phase_complete(Phase::Rollback);

    let header = journal.header().clone();
    let mut leftovers = vec![header.backup_dir.clone()];
    if let Some(backups) = header.backup_dir.parent() {
        if backups.file_name().is_some_and(|n| n == BACKUP_DIR_NAME) {
            leftovers.insert(0, backups.to_path_buf());
        }
    }
    if header.root_created {
        leftovers.insert(0, header.destination_root.clone());
    }
    fsops::remove_empty_dirs(&leftovers);

    let mut final_state = state;
    if failed.is_empty() && state != BatchState::RolledBack {
        final_state = state.transition(BatchState::RolledBack)?;
        journal.set_state(final_state);
        if let Some(path) = journal.path() {
            JournalWriter::reopen(path)?.append_state(final_state)?;
        }
    }

    info!(
        "Rollback of {}: {} restored, {} already undone, {} failed",
        journal.batch_id(),
        restored,
        skipped,
        failed.len()
    );
    debug!("Rollback took {}", format!("{:.2?}", start.elapsed()).green());

    Ok(RollbackReport {
        batch_id: journal.batch_id().to_string(),
        restored,
        skipped,
        failed,
        state: final_state,
    })
}
