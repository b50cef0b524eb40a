use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use crate::error::{Error, ErrorKind};

/// Pipeline phase a sink is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Analyze,
    QuickHash,
    FullHash,
    Execute,
    Rollback,
}

/// Per-file progress callbacks.
///
/// The CLI implements this with indicatif bars; library users can forward
/// events over a channel with [`ChannelSink`]. Every method defaults to a
/// no-op. Callbacks are invoked from worker threads during analysis and
/// hashing, so implementations must not block for long.
pub trait ProgressSink: Send + Sync {
    fn on_phase_start(&self, _phase: Phase, _total: usize) {}
    fn on_phase_complete(&self, _phase: Phase) {}
    /// `index` is the zero-based position of the file within the phase.
    fn on_file_start(&self, _index: usize, _total: usize, _path: &Path) {}
    fn on_file_done(&self, _index: usize, _total: usize, _path: &Path) {}
    fn on_error(&self, _path: &Path, _error: &Error) {}
}

/// Sink for callers that don't care.
pub struct SilentSink;

impl ProgressSink for SilentSink {}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStarted { phase: Phase, total: usize },
    PhaseCompleted { phase: Phase },
    FileStarted { index: usize, total: usize, path: PathBuf },
    FileDone { index: usize, total: usize, path: PathBuf },
    Failed { path: PathBuf, kind: ErrorKind, message: String },
}

/// Forwards every callback as a [`ProgressEvent`]. Sending never blocks; a
/// dropped receiver silently discards events.
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        self.send(ProgressEvent::PhaseStarted { phase, total });
    }

    fn on_phase_complete(&self, phase: Phase) {
        self.send(ProgressEvent::PhaseCompleted { phase });
    }

    fn on_file_start(&self, index: usize, total: usize, path: &Path) {
        self.send(ProgressEvent::FileStarted {
            index,
            total,
            path: path.to_path_buf(),
        });
    }

    fn on_file_done(&self, index: usize, total: usize, path: &Path) {
        self.send(ProgressEvent::FileDone {
            index,
            total,
            path: path.to_path_buf(),
        });
    }

    fn on_error(&self, path: &Path, error: &Error) {
        self.send(ProgressEvent::Failed {
            path: path.to_path_buf(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.on_phase_start(Phase::Execute, 2);
        sink.on_file_done(0, 2, Path::new("/a.jpg"));
        sink.on_error(Path::new("/b.jpg"), &Error::DestinationExists("/b.jpg".into()));
        drop(sink);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            ProgressEvent::FileDone {
                index: 0,
                total: 2,
                path: PathBuf::from("/a.jpg")
            }
        );
        assert!(matches!(
            events[2],
            ProgressEvent::Failed {
                kind: ErrorKind::DestinationExists,
                ..
            }
        ));
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelSink::new(tx).on_phase_complete(Phase::Analyze);
    }
}
