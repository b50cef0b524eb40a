use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::BatchState;
use crate::error::{Error, Result};
use crate::planner::Operation;

/// What occupied the destination before the action ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorState {
    Fresh,
    /// An existing file was moved aside to `backup`.
    Replaced { backup: PathBuf },
}

/// One committed action and everything needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence: u64,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub operation: Operation,
    pub prior: PriorState,
    /// Directories created for this action, outermost first.
    #[serde(default)]
    pub created_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub batch_id: String,
    pub destination_root: PathBuf,
    pub backup_dir: PathBuf,
    /// The executor created the destination root itself.
    pub root_created: bool,
    pub created_at: String,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "kebab-case")]
enum Record {
    Batch(BatchHeader),
    Entry(JournalEntry),
    State { state: BatchState },
}

/// Ordered record of a batch: header, committed entries and current state.
#[derive(Debug, Clone)]
pub struct Journal {
    header: BatchHeader,
    entries: Vec<JournalEntry>,
    state: BatchState,
    path: Option<PathBuf>,
}

impl Journal {
    pub(crate) fn new(header: BatchHeader, path: Option<PathBuf>) -> Self {
        Self {
            header,
            entries: Vec::new(),
            state: BatchState::Planned,
            path,
        }
    }

    /// `<dir>/<batch-id>.jsonl`
    pub fn path_for(dir: &Path, batch_id: &str) -> PathBuf {
        dir.join(format!("{}.jsonl", batch_id))
    }

    pub fn header(&self) -> &BatchHeader {
        &self.header
    }

    pub fn batch_id(&self) -> &str {
        &self.header.batch_id
    }

    pub fn destination_root(&self) -> &Path {
        &self.header.destination_root
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// File backing this journal, if it was persisted.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn set_state(&mut self, state: BatchState) {
        self.state = state;
    }

    /// Read a journal back. A malformed final line is what an interrupted
    /// write leaves behind and is dropped; malformed lines elsewhere are
    /// errors. A batch that never recorded a terminal state was interrupted
    /// and loads as `PartiallyFailed`, header-only journals included.
    pub fn load(path: &Path) -> Result<Journal> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let mut header = None;
        let mut entries: Vec<JournalEntry> = Vec::new();
        let mut state = BatchState::Planned;

        for (position, (line_no, line)) in lines.iter().enumerate() {
            let record = match serde_json::from_str::<Record>(line) {
                Ok(record) => record,
                Err(e) if position + 1 == lines.len() => {
                    warn!(
                        "Dropping truncated record at {}:{}: {}",
                        path.display(),
                        line_no + 1,
                        e
                    );
                    break;
                }
                Err(e) => {
                    return Err(Error::Journal(format!(
                        "{}:{}: {}",
                        path.display(),
                        line_no + 1,
                        e
                    )))
                }
            };

            match record {
                Record::Batch(h) if header.is_none() => header = Some(h),
                Record::Batch(_) => {
                    return Err(Error::Journal(format!(
                        "{}: more than one batch header",
                        path.display()
                    )))
                }
                Record::Entry(entry) => {
                    if header.is_none() {
                        return Err(Error::Journal(format!(
                            "{}: entry before batch header",
                            path.display()
                        )));
                    }
                    if entries.last().is_some_and(|last| last.sequence >= entry.sequence) {
                        return Err(Error::Journal(format!(
                            "{}: sequence {} out of order",
                            path.display(),
                            entry.sequence
                        )));
                    }
                    entries.push(entry);
                }
                Record::State { state: s } => state = s,
            }
        }

        let header = header
            .ok_or_else(|| Error::Journal(format!("{}: missing batch header", path.display())))?;

        // A persisted journal that never reached a terminal state belongs to
        // a process that died, even before its first entry.
        if matches!(state, BatchState::Planned | BatchState::Executing) {
            warn!(
                "Batch {} was interrupted after {} entries",
                header.batch_id,
                entries.len()
            );
            state = BatchState::PartiallyFailed;
        }

        debug!(
            "Loaded journal {} with {} entries ({:?})",
            header.batch_id,
            entries.len(),
            state
        );
        Ok(Journal {
            header,
            entries,
            state,
            path: Some(path.to_path_buf()),
        })
    }
}

/// One line of batch history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalSummary {
    pub batch_id: String,
    pub created_at: String,
    pub destination_root: PathBuf,
    pub entries: usize,
    pub state: BatchState,
    pub path: PathBuf,
}

impl From<&Journal> for JournalSummary {
    fn from(journal: &Journal) -> Self {
        Self {
            batch_id: journal.header.batch_id.clone(),
            created_at: journal.header.created_at.clone(),
            destination_root: journal.header.destination_root.clone(),
            entries: journal.entries.len(),
            state: journal.state,
            path: journal.path.clone().unwrap_or_default(),
        }
    }
}

fn journal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    let mut files = Vec::new();
    for item in read {
        let path = item.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    Ok(files)
}

impl Journal {
    /// Every readable journal under `dir`, newest first. Unreadable files
    /// are logged and left out.
    pub fn list(dir: &Path) -> Result<Vec<JournalSummary>> {
        let mut summaries: Vec<JournalSummary> = journal_files(dir)?
            .iter()
            .filter_map(|path| match Journal::load(path) {
                Ok(journal) => Some(JournalSummary::from(&journal)),
                Err(e) => {
                    warn!("Skipping journal {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.batch_id.cmp(&a.batch_id))
        });
        Ok(summaries)
    }

    /// Load the journal of `batch_id` from `dir`.
    pub fn find(dir: &Path, batch_id: &str) -> Result<Journal> {
        let path = Journal::path_for(dir, batch_id);
        if !path.is_file() {
            return Err(Error::Journal(format!(
                "no batch {} in {}",
                batch_id,
                dir.display()
            )));
        }
        Journal::load(&path)
    }

    /// Remove the journal of `batch_id`. Returns false when there was none.
    pub fn delete(dir: &Path, batch_id: &str) -> Result<bool> {
        let path = Journal::path_for(dir, batch_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted journal {}", batch_id);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    /// Delete journals of batches created before `cutoff`, returning their
    /// ids. Batches with an unparseable creation time are kept.
    pub fn prune(dir: &Path, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for summary in Journal::list(dir)? {
            let Ok(created) = DateTime::parse_from_rfc3339(&summary.created_at) else {
                warn!(
                    "Keeping {}: unreadable creation time '{}'",
                    summary.batch_id, summary.created_at
                );
                continue;
            };
            if created.with_timezone(&Utc) < cutoff {
                fs::remove_file(&summary.path).map_err(|e| Error::io(&summary.path, e))?;
                removed.push(summary.batch_id);
            }
        }
        info!("Pruned {} journals from {}", removed.len(), dir.display());
        Ok(removed)
    }
}

/// Single writer for a batch's journal file. Every record is flushed and
/// synced before `append_*` returns. Without a directory the writer only
/// validates and discards.
pub(crate) struct JournalWriter {
    out: Option<(PathBuf, BufWriter<File>)>,
}

impl JournalWriter {
    pub(crate) fn create(dir: Option<&Path>, header: &BatchHeader) -> Result<Self> {
        let Some(dir) = dir else {
            return Ok(Self { out: None });
        };
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = Journal::path_for(dir, &header.batch_id);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        let mut writer = Self {
            out: Some((path, BufWriter::new(file))),
        };
        writer.write(&Record::Batch(header.clone()))?;
        Ok(writer)
    }

    /// Reopen an existing journal to record a later state change.
    pub(crate) fn reopen(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        Ok(Self {
            out: Some((path.to_path_buf(), BufWriter::new(file))),
        })
    }

    pub(crate) fn path(&self) -> Option<PathBuf> {
        self.out.as_ref().map(|(path, _)| path.clone())
    }

    pub(crate) fn append_entry(&mut self, entry: &JournalEntry) -> Result<()> {
        self.write(&Record::Entry(entry.clone()))
    }

    pub(crate) fn append_state(&mut self, state: BatchState) -> Result<()> {
        self.write(&Record::State { state })
    }

    fn write(&mut self, record: &Record) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| Error::Journal(e.to_string()))?;
        let Some((path, writer)) = self.out.as_mut() else {
            return Ok(());
        };
        writeln!(writer, "{}", line).map_err(|e| Error::io(&*path, e))?;
        writer.flush().map_err(|e| Error::io(&*path, e))?;
        writer.get_ref().sync_data().map_err(|e| Error::io(&*path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn header(id: &str) -> BatchHeader {
        BatchHeader {
            batch_id: id.to_string(),
            destination_root: PathBuf::from("/out"),
            backup_dir: PathBuf::from("/out/.backup"),
            root_created: false,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    fn entry(sequence: u64) -> JournalEntry {
        JournalEntry {
            sequence,
            source: PathBuf::from(format!("/in/{}.jpg", sequence)),
            destination: PathBuf::from(format!("/out/{}.jpg", sequence)),
            operation: Operation::Move,
            prior: if sequence % 2 == 0 {
                PriorState::Fresh
            } else {
                PriorState::Replaced {
                    backup: PathBuf::from("/out/.backup/1.jpg"),
                }
            },
            created_dirs: vec![PathBuf::from("/out/2024")],
        }
    }

    #[test]
    fn written_journal_loads_back() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(Some(dir.path()), &header("b1")).unwrap();
        writer.append_state(BatchState::Executing).unwrap();
        writer.append_entry(&entry(1)).unwrap();
        writer.append_entry(&entry(2)).unwrap();
        writer.append_state(BatchState::Completed).unwrap();
        let path = writer.path().unwrap();
        drop(writer);

        let journal = Journal::load(&path).unwrap();
        assert_eq!(journal.batch_id(), "b1");
        assert_eq!(journal.entries(), &[entry(1), entry(2)]);
        assert_eq!(journal.state(), BatchState::Completed);
        assert_eq!(path, Journal::path_for(dir.path(), "b1"));
    }

    #[test]
    fn truncated_tail_is_dropped() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::create(Some(dir.path()), &header("b2")).unwrap();
        writer.append_state(BatchState::Executing).unwrap();
        writer.append_entry(&entry(1)).unwrap();
        let path = writer.path().unwrap();
        drop(writer);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"record":"entry","sequence":2,"sour"#).unwrap();
        drop(file);

        let journal = Journal::load(&path).unwrap();
        assert_eq!(journal.len(), 1);
        // no terminal state was recorded
        assert_eq!(journal.state(), BatchState::PartiallyFailed);
    }

    #[test]
    fn corruption_in_the_middle_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        let head = serde_json::to_string(&Record::Batch(header("b3"))).unwrap();
        let good = serde_json::to_string(&Record::Entry(entry(2))).unwrap();
        fs::write(&path, format!("{}\nnot json\n{}\n", head, good)).unwrap();
        assert!(matches!(Journal::load(&path), Err(Error::Journal(_))));
    }

    fn header_at(id: &str, created_at: &str) -> BatchHeader {
        BatchHeader {
            created_at: created_at.to_string(),
            ..header(id)
        }
    }

    fn write_journal(dir: &Path, header: &BatchHeader, entries: u64, end: BatchState) {
        let mut writer = JournalWriter::create(Some(dir), header).unwrap();
        writer.append_state(BatchState::Executing).unwrap();
        for sequence in 1..=entries {
            writer.append_entry(&entry(sequence)).unwrap();
        }
        writer.append_state(end).unwrap();
    }

    #[test]
    fn header_only_journal_is_interrupted() {
        let dir = tempdir().unwrap();
        let writer = JournalWriter::create(Some(dir.path()), &header("b5")).unwrap();
        let path = writer.path().unwrap();
        drop(writer);

        let mut journal = Journal::load(&path).unwrap();
        assert_eq!(journal.state(), BatchState::PartiallyFailed);
        assert!(journal.is_empty());

        let report =
            super::super::rollback::rollback(&mut journal, &crate::progress::SilentSink).unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(report.state, BatchState::RolledBack);
        assert_eq!(Journal::load(&path).unwrap().state(), BatchState::RolledBack);
    }

    #[test]
    fn list_find_and_delete() {
        let dir = tempdir().unwrap();
        write_journal(
            dir.path(),
            &header_at("older", "2024-01-01T00:00:00+00:00"),
            2,
            BatchState::Completed,
        );
        write_journal(
            dir.path(),
            &header_at("newer", "2024-03-01T00:00:00+00:00"),
            1,
            BatchState::Cancelled,
        );
        fs::write(dir.path().join("notes.txt"), "not a journal").unwrap();
        fs::write(dir.path().join("garbage.jsonl"), "nonsense\nmore nonsense\n").unwrap();

        let list = Journal::list(dir.path()).unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(list[0].entries, 1);
        assert_eq!(list[0].state, BatchState::Cancelled);
        assert_eq!(list[1].entries, 2);
        assert_eq!(list[1].path, Journal::path_for(dir.path(), "older"));

        assert_eq!(Journal::find(dir.path(), "older").unwrap().len(), 2);
        assert!(matches!(
            Journal::find(dir.path(), "missing"),
            Err(Error::Journal(_))
        ));

        assert!(Journal::delete(dir.path(), "older").unwrap());
        assert!(!Journal::delete(dir.path(), "older").unwrap());
        assert_eq!(Journal::list(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn prune_removes_only_old_batches() {
        let dir = tempdir().unwrap();
        write_journal(
            dir.path(),
            &header_at("jan", "2024-01-10T12:00:00+02:00"),
            1,
            BatchState::Completed,
        );
        write_journal(
            dir.path(),
            &header_at("jun", "2024-06-10T12:00:00+02:00"),
            1,
            BatchState::Completed,
        );
        write_journal(dir.path(), &header_at("odd", "yesterday"), 1, BatchState::Completed);

        let cutoff = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Journal::prune(dir.path(), cutoff).unwrap(), vec!["jan"]);

        let mut left: Vec<String> = Journal::list(dir.path())
            .unwrap()
            .into_iter()
            .map(|s| s.batch_id)
            .collect();
        left.sort();
        assert_eq!(left, vec!["jun", "odd"]);
    }

    #[test]
    fn listing_a_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        assert!(Journal::list(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn writer_without_directory_keeps_nothing() {
        let mut writer = JournalWriter::create(None, &header("b4")).unwrap();
        writer.append_entry(&entry(1)).unwrap();
        assert!(writer.path().is_none());
    }
}
