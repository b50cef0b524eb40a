//! Exact-duplicate detection.
//!
//! Files are narrowed in three passes: equal size, then equal quick hash,
//! then equal full hash. Only the last pass reads whole files, and only for
//! files that survived the first two.

use chrono::NaiveDateTime;
use colored::*;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::hasher::{ContentHash, HashCache};
use crate::model::FileIdentity;
use crate::planner::{OrganizationPlan, Operation, OverwritePolicy, PlanBuilder};
use crate::progress::{Phase, ProgressSink};

/// Two or more files with identical content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    pub size: u64,
    /// The copy to keep.
    pub primary: FileIdentity,
    /// All members including the primary, sorted by path.
    pub members: Vec<FileIdentity>,
}

impl DuplicateGroup {
    /// Members other than the primary.
    pub fn redundant(&self) -> impl Iterator<Item = &FileIdentity> {
        self.members.iter().filter(move |m| m.path != self.primary.path)
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.members.len() as u64 - 1)
    }
}

#[derive(Debug, Default)]
pub struct DuplicateReport {
    /// Sorted by primary path.
    pub groups: Vec<DuplicateGroup>,
    /// Files that could not be hashed; they take no part in grouping.
    pub failures: Vec<(FileIdentity, Error)>,
}

impl DuplicateReport {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.members.len() - 1).sum()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.groups.iter().map(DuplicateGroup::wasted_bytes).sum()
    }
}

pub struct DuplicateDetector<'a> {
    hashes: &'a HashCache,
    pool: &'a ThreadPool,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(hashes: &'a HashCache, pool: &'a ThreadPool) -> Self {
        Self { hashes, pool }
    }

    /// Group `files` by content. `capture_time` supplies the timestamp used
    /// to choose each group's primary: earliest wins, then smallest path.
    pub fn find<F>(
        &self,
        files: &[FileIdentity],
        capture_time: F,
        sink: &dyn ProgressSink,
    ) -> DuplicateReport
    where
        F: Fn(&FileIdentity) -> Option<NaiveDateTime>,
    {
        let start = Instant::now();
        let mut report = DuplicateReport::default();

        // One identity per path, in path order.
        let mut by_path: BTreeMap<&Path, &FileIdentity> = BTreeMap::new();
        for file in files {
            by_path.entry(file.path.as_path()).or_insert(file);
        }

        let mut by_size: BTreeMap<u64, Vec<&FileIdentity>> = BTreeMap::new();
        for file in by_path.into_values() {
            by_size.entry(file.size).or_default().push(file);
        }
        let candidates: Vec<&FileIdentity> = by_size
            .into_values()
            .filter(|bucket| bucket.len() > 1)
            .flatten()
            .collect();
        debug!(
            "{} of {} files share a size with another file",
            candidates.len(),
            files.len()
        );

        // Stage 1: quick hash
        let quick = self.hash_all(&candidates, Phase::QuickHash, sink, |id| {
            self.hashes.quick(id)
        });
        let mut by_quick: BTreeMap<(u64, u64), Vec<&FileIdentity>> = BTreeMap::new();
        for (file, result) in quick {
            match result {
                Ok(hash) => by_quick.entry((file.size, hash)).or_default().push(file),
                Err(e) => report.failures.push((file.clone(), e)),
            }
        }
        let candidates: Vec<&FileIdentity> = by_quick
            .into_values()
            .filter(|bucket| bucket.len() > 1)
            .flatten()
            .collect();

        // Stage 2: full hash
        let full = self.hash_all(&candidates, Phase::FullHash, sink, |id| {
            self.hashes.full(id)
        });
        let mut by_full: BTreeMap<(u64, ContentHash), Vec<&FileIdentity>> = BTreeMap::new();
        for (file, result) in full {
            match result {
                Ok(hash) => by_full.entry((file.size, hash)).or_default().push(file),
                Err(e) => report.failures.push((file.clone(), e)),
            }
        }

        for ((size, hash), members) in by_full {
            if members.len() < 2 {
                continue;
            }
            let mut members: Vec<FileIdentity> = members.into_iter().cloned().collect();
            members.sort_by(|a, b| a.path.cmp(&b.path));
            let Some(primary) = choose_primary(&members, &capture_time) else {
                continue;
            };
            report.groups.push(DuplicateGroup {
                hash,
                size,
                primary,
                members,
            });
        }
        report
            .groups
            .sort_by(|a, b| a.primary.path.cmp(&b.primary.path));
        report
            .failures
            .sort_by(|a, b| a.0.path.cmp(&b.0.path));

        info!(
            "Found {} duplicate groups ({} redundant files)",
            report.groups.len(),
            report.duplicate_files()
        );
        debug!(
            "Duplicate detection took {}",
            format!("{:.2?}", start.elapsed()).green()
        );
        report
    }

    fn hash_all<'f, T, H>(
        &self,
        files: &[&'f FileIdentity],
        phase: Phase,
        sink: &dyn ProgressSink,
        hash: H,
    ) -> Vec<(&'f FileIdentity, crate::error::Result<T>)>
    where
        T: Send,
        H: Fn(&FileIdentity) -> crate::error::Result<T> + Sync,
    {
        let total = files.len();
        sink.on_phase_start(phase, total);
        let done = AtomicUsize::new(0);

        let results = self.pool.install(|| {
            files
                .par_iter()
                .enumerate()
                .map(|(index, file)| {
                    sink.on_file_start(index, total, &file.path);
                    let result = hash(*file);
                    match &result {
                        Ok(_) => {
                            let n = done.fetch_add(1, Ordering::Relaxed);
                            sink.on_file_done(n, total, &file.path);
                        }
                        Err(e) => {
                            warn!("Could not hash {}: {}", file.path.display(), e);
                            sink.on_error(&file.path, e);
                        }
                    }
                    (*file, result)
                })
                .collect()
        });

        sink.on_phase_complete(phase);
        results
    }
}

fn choose_primary<F>(members: &[FileIdentity], capture_time: &F) -> Option<FileIdentity>
where
    F: Fn(&FileIdentity) -> Option<NaiveDateTime>,
{
    members
        .iter()
        .map(|m| (capture_time(m), m))
        // undated files lose to dated ones
        .min_by(|(ta, a), (tb, b)| {
            ta.is_none()
                .cmp(&tb.is_none())
                .then_with(|| ta.cmp(tb))
                .then_with(|| a.path.cmp(&b.path))
        })
        .map(|(_, m)| m.clone())
}

/// Path of `source` below a quarantine root: the absolute path with its
/// root and drive prefix removed.
fn quarantine_dir(source: &Path) -> PathBuf {
    source
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Plan that moves (or copies) every non-primary member into
/// `quarantine_root`, mirroring its original directory.
pub fn removal_plan(
    groups: &[DuplicateGroup],
    quarantine_root: &Path,
    operation: Operation,
) -> OrganizationPlan {
    let mut builder = PlanBuilder::new(quarantine_root, operation, OverwritePolicy::Rename);
    for group in groups {
        for member in group.redundant() {
            builder.push(member, &quarantine_dir(&member.path));
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn identity(path: &str) -> FileIdentity {
        FileIdentity {
            path: PathBuf::from(path),
            size: 42,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
        }
    }

    fn when(day: u32) -> Option<NaiveDateTime> {
        chrono::NaiveDate::from_ymd_opt(2020, 1, day)?.and_hms_opt(0, 0, 0)
    }

    #[test]
    fn primary_prefers_earliest_then_path() {
        let members = vec![identity("/a/1.jpg"), identity("/b/2.jpg"), identity("/c/3.jpg")];

        let primary = choose_primary(&members, &|m: &FileIdentity| match m.path.to_str() {
            Some("/c/3.jpg") => when(1),
            _ => when(2),
        })
        .unwrap();
        assert_eq!(primary.path, PathBuf::from("/c/3.jpg"));

        let primary = choose_primary(&members, &|_: &FileIdentity| when(5)).unwrap();
        assert_eq!(primary.path, PathBuf::from("/a/1.jpg"));

        let primary = choose_primary(&members, &|m: &FileIdentity| match m.path.to_str() {
            Some("/a/1.jpg") => None,
            _ => when(9),
        })
        .unwrap();
        assert_eq!(primary.path, PathBuf::from("/b/2.jpg"));
    }

    #[test]
    fn removal_plan_mirrors_paths() {
        let group = DuplicateGroup {
            hash: ContentHash::from([7u8; 32]),
            size: 42,
            primary: identity("/photos/a.jpg"),
            members: vec![
                identity("/backup/a.jpg"),
                identity("/photos/a.jpg"),
                identity("/phone/DCIM/a.jpg"),
            ],
        };
        let plan = removal_plan(&[group], Path::new("/quarantine"), Operation::Move);
        let dests: Vec<_> = plan.iter().map(|e| e.destination().to_path_buf()).collect();
        assert_eq!(
            dests,
            vec![PathBuf::from("backup/a.jpg"), PathBuf::from("phone/DCIM/a.jpg")]
        );
        assert!(plan.iter().all(|e| e.operation() == Operation::Move));
        assert_eq!(plan.destination_root(), Path::new("/quarantine"));
    }
}
