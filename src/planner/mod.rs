//! Deterministic destination planning.
//!
//! Every criterion turns a file into one directory segment; the segments are
//! joined outermost first and the original file name is kept. Planning never
//! fails: missing attributes fall back to sentinel segments and colliding
//! names get a numeric suffix in input order.

use serde::{Deserialize, Serialize};
use ahash::AHashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use colored::*;
use tracing::{debug, info};

use crate::model::{FileIdentity, MetadataRecord};

mod allocate;
pub mod criteria;
pub mod location;

use allocate::NameAllocator;
pub use allocate::sanitize_segment;
pub use criteria::{parse_criteria, Criterion, DateGranularity, LocationPolicy};

pub const UNKNOWN_DEVICE: &str = "Unknown-Device";
pub const UNKNOWN_LOCATION: &str = "Unknown-Location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Copy,
    Move,
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Operation::Copy),
            "move" => Ok(Operation::Move),
            other => Err(format!("unknown operation '{}'", other)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Copy => f.write_str("copy"),
            Operation::Move => f.write_str("move"),
        }
    }
}

/// What to do when a destination is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Leave the existing file alone and record the entry as failed.
    Skip,
    /// Pick a free name at planning time.
    Rename,
    /// Back the existing file up, then replace it.
    Overwrite,
}

impl FromStr for OverwritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(OverwritePolicy::Skip),
            "rename" => Ok(OverwritePolicy::Rename),
            "overwrite" => Ok(OverwritePolicy::Overwrite),
            other => Err(format!("unknown overwrite policy '{}'", other)),
        }
    }
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverwritePolicy::Skip => f.write_str("skip"),
            OverwritePolicy::Rename => f.write_str("rename"),
            OverwritePolicy::Overwrite => f.write_str("overwrite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    source: FileIdentity,
    destination: PathBuf,
    operation: Operation,
}

impl PlanEntry {
    pub fn source(&self) -> &FileIdentity {
        &self.source
    }

    /// Relative to the plan's destination root.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

/// Ordered, collision-free list of file operations. Only the planner and
/// the dedup removal planner can build one.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationPlan {
    batch_id: String,
    destination_root: PathBuf,
    overwrite_policy: OverwritePolicy,
    entries: Vec<PlanEntry>,
}

impl OrganizationPlan {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    pub fn overwrite_policy(&self) -> OverwritePolicy {
        self.overwrite_policy
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
        self.entries.iter()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.source.size).sum()
    }

    /// Bytes the batch adds to the destination volume. Moves are counted as
    /// free: on the same volume they are renames.
    pub fn copy_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.operation == Operation::Copy)
            .map(|e| e.source.size)
            .sum()
    }
}

/// `YYYYMMDD-HHMMSS-xxxxxxxx`, sortable by creation time.
pub fn new_batch_id() -> String {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", stamp, &unique[..8])
}

/// Accumulates entries while keeping destinations unique and each source
/// identity planned at most once.
pub(crate) struct PlanBuilder {
    destination_root: PathBuf,
    overwrite_policy: OverwritePolicy,
    operation: Operation,
    allocator: NameAllocator,
    seen: AHashSet<FileIdentity>,
    entries: Vec<PlanEntry>,
}

impl PlanBuilder {
    pub(crate) fn new(
        destination_root: &Path,
        operation: Operation,
        overwrite_policy: OverwritePolicy,
    ) -> Self {
        let existing_root = (overwrite_policy == OverwritePolicy::Rename)
            .then(|| destination_root.to_path_buf());
        Self {
            destination_root: destination_root.to_path_buf(),
            overwrite_policy,
            operation,
            allocator: NameAllocator::new(existing_root),
            seen: AHashSet::new(),
            entries: Vec::new(),
        }
    }

    /// Returns false when the identity was already planned.
    pub(crate) fn push(&mut self, source: &FileIdentity, dir: &Path) -> bool {
        if !self.seen.insert(source.clone()) {
            return false;
        }
        let file_name = source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let destination = self.allocator.allocate(dir, &file_name);
        self.entries.push(PlanEntry {
            source: source.clone(),
            destination,
            operation: self.operation,
        });
        true
    }

    pub(crate) fn finish(self) -> OrganizationPlan {
        OrganizationPlan {
            batch_id: new_batch_id(),
            destination_root: self.destination_root,
            overwrite_policy: self.overwrite_policy,
            entries: self.entries,
        }
    }
}

/// Maps (identity, record) pairs to destination paths.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    criteria: Vec<Criterion>,
    operation: Operation,
    overwrite_policy: OverwritePolicy,
}

impl PathPlanner {
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self {
            criteria,
            operation: Operation::Copy,
            overwrite_policy: OverwritePolicy::Rename,
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite_policy = policy;
        self
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Plan `files` in the order given. Callers wanting reproducible plans
    /// pass files sorted by path.
    pub fn plan<'a, I>(&self, files: I, destination_root: &Path) -> OrganizationPlan
    where
        I: IntoIterator<Item = (&'a FileIdentity, &'a MetadataRecord)>,
    {
        let start = Instant::now();

        let mut seen = AHashSet::new();
        let files: Vec<(&FileIdentity, &MetadataRecord)> = files
            .into_iter()
            .filter(|(identity, _)| seen.insert(*identity))
            .collect();

        // Zone numbers depend on every file's position, so they are fixed
        // before any segment is built.
        let zones: Vec<Option<Vec<Option<usize>>>> = self
            .criteria
            .iter()
            .map(|criterion| match criterion {
                Criterion::ByLocation(LocationPolicy::Cluster { radius_km }) => {
                    let mut index = location::ZoneIndex::new(*radius_km);
                    Some(
                        files
                            .iter()
                            .map(|(_, record)| record.location.map(|loc| index.assign(loc)))
                            .collect(),
                    )
                }
                _ => None,
            })
            .collect();

        let mut builder = PlanBuilder::new(destination_root, self.operation, self.overwrite_policy);
        for (position, (identity, record)) in files.iter().enumerate() {
            let dir: PathBuf = self
                .criteria
                .iter()
                .enumerate()
                .map(|(i, criterion)| {
                    let zone = zones[i].as_ref().and_then(|z| z[position]);
                    segment(criterion, identity, record, zone)
                })
                .collect();
            builder.push(identity, &dir);
        }
        let plan = builder.finish();

        info!(
            "Planned {} files into {}",
            plan.len(),
            destination_root.display()
        );
        debug!(
            "Planning took {}",
            format!("{:.2?}", start.elapsed()).green()
        );
        plan
    }
}

/// Directory segment for one criterion. `zone` is only consulted for
/// cluster location policies.
pub fn segment(
    criterion: &Criterion,
    identity: &FileIdentity,
    record: &MetadataRecord,
    zone: Option<usize>,
) -> String {
    match criterion {
        Criterion::ByDate(granularity) => {
            let when = record
                .captured_at()
                .unwrap_or_else(|| identity.modified_local());
            when.format(granularity.format()).to_string()
        }
        Criterion::ByDevice => record
            .device
            .as_ref()
            .and_then(|d| d.display_name())
            .and_then(|name| sanitize_segment(&name))
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
        Criterion::ByLocation(LocationPolicy::Grid { decimals }) => record
            .location
            .map(|loc| location::grid_cell(&loc, *decimals))
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
        Criterion::ByLocation(LocationPolicy::Cluster { .. }) => zone
            .map(location::zone_name)
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaptureTime, Device, GpsCoordinate, MediaKind, TimestampSource};
    use chrono::NaiveDate;
    use std::time::{Duration, SystemTime};

    fn identity(path: &str) -> FileIdentity {
        FileIdentity {
            path: PathBuf::from(path),
            size: 10,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000),
        }
    }

    fn record(day: u32, make: Option<&str>, location: Option<(f64, f64)>) -> MetadataRecord {
        let timestamp = NaiveDate::from_ymd_opt(2023, 6, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        MetadataRecord {
            kind: MediaKind::Image,
            capture_time: Some(CaptureTime {
                timestamp,
                source: TimestampSource::Embedded("DateTimeOriginal".into()),
            }),
            device: make.map(|m| Device {
                make: Some(m.to_string()),
                model: Some("X100".to_string()),
            }),
            location: location.and_then(|(lat, lon)| GpsCoordinate::new(lat, lon)),
            dimensions: None,
        }
    }

    #[test]
    fn date_then_device() {
        let files = vec![
            (identity("/in/a.jpg"), record(15, Some("Fujifilm"), None)),
            (identity("/in/b.jpg"), record(16, None, None)),
        ];
        let planner = PathPlanner::new(vec![
            Criterion::ByDate(DateGranularity::Day),
            Criterion::ByDevice,
        ]);
        let plan = planner.plan(files.iter().map(|(i, r)| (i, r)), Path::new("/out"));

        let dests: Vec<_> = plan.iter().map(|e| e.destination().to_path_buf()).collect();
        assert_eq!(
            dests,
            vec![
                PathBuf::from("2023-06-15/Fujifilm X100/a.jpg"),
                PathBuf::from("2023-06-16/Unknown-Device/b.jpg"),
            ]
        );
        assert_eq!(plan.destination_root(), Path::new("/out"));
    }

    #[test]
    fn collisions_and_duplicate_identities() {
        let files = vec![
            (identity("/in/x/IMG.jpg"), record(15, None, None)),
            (identity("/in/y/IMG.jpg"), record(15, None, None)),
            (identity("/in/x/IMG.jpg"), record(15, None, None)),
        ];
        let planner = PathPlanner::new(vec![Criterion::ByDate(DateGranularity::Month)]);
        let plan = planner.plan(files.iter().map(|(i, r)| (i, r)), Path::new("/out"));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries()[0].destination(), Path::new("2023-06/IMG.jpg"));
        assert_eq!(plan.entries()[1].destination(), Path::new("2023-06/IMG_1.jpg"));
    }

    #[test]
    fn location_policies() {
        let files = vec![
            (identity("/in/1.jpg"), record(1, None, Some((48.8584, 2.2945)))),
            (identity("/in/2.jpg"), record(1, None, Some((48.8606, 2.3376)))),
            (identity("/in/3.jpg"), record(1, None, Some((48.8616, 2.2893)))),
            (identity("/in/4.jpg"), record(1, None, None)),
        ];
        let cluster = PathPlanner::new(vec!["location:cluster:1".parse().unwrap()]);
        let plan = cluster.plan(files.iter().map(|(i, r)| (i, r)), Path::new("/out"));
        let dirs: Vec<_> = plan
            .iter()
            .map(|e| e.destination().parent().unwrap().to_path_buf())
            .collect();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("Zone-001"),
                PathBuf::from("Zone-002"),
                PathBuf::from("Zone-001"),
                PathBuf::from(UNKNOWN_LOCATION),
            ]
        );

        let grid = PathPlanner::new(vec!["location:grid:1".parse().unwrap()]);
        let plan = grid.plan(files.iter().map(|(i, r)| (i, r)), Path::new("/out"));
        assert_eq!(plan.entries()[0].destination(), Path::new("48.9,2.3/1.jpg"));
    }

    #[test]
    fn date_falls_back_to_mtime() {
        let id = identity("/in/scan.png");
        let rec = MetadataRecord::empty(MediaKind::Image);
        let seg = segment(&Criterion::ByDate(DateGranularity::Year), &id, &rec, None);
        assert_eq!(seg, id.modified_local().format("%Y").to_string());
    }

    #[test]
    fn operation_and_policy_parse() {
        assert_eq!("MOVE".parse::<Operation>().unwrap(), Operation::Move);
        assert_eq!(
            "overwrite".parse::<OverwritePolicy>().unwrap(),
            OverwritePolicy::Overwrite
        );
        assert!("shred".parse::<Operation>().is_err());
    }
}
