use chrono::{Datelike, NaiveDateTime};
use colored::*;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::error::Error;
use crate::executor::CancellationToken;
use crate::metadata::MetadataExtractor;
use crate::model::{FileIdentity, MediaKind, MetadataRecord, TimestampSource};
use crate::progress::{Phase, ProgressSink};
use crate::scanner::ScannedFile;

/// Outcome for one file: its record, or why it has none.
#[derive(Debug)]
pub struct AnalyzedFile {
    pub identity: FileIdentity,
    pub kind: MediaKind,
    pub result: Result<MetadataRecord, Error>,
}

impl AnalyzedFile {
    pub fn record(&self) -> Option<&MetadataRecord> {
        self.result.as_ref().ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisStats {
    pub total_files: usize,
    pub total_bytes: u64,
    pub analyzed: usize,
    pub failed: usize,
    pub by_kind: BTreeMap<MediaKind, usize>,
    pub with_capture_time: usize,
    /// Dates taken from file names rather than embedded tags.
    pub dated_from_filename: usize,
    pub with_device: usize,
    pub with_location: usize,
    pub devices: BTreeMap<String, usize>,
    pub by_year: BTreeMap<i32, usize>,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration: Duration,
}

impl AnalysisStats {
    fn collect(files: &[AnalyzedFile]) -> Self {
        let mut stats = AnalysisStats {
            total_files: files.len(),
            ..Default::default()
        };
        let mut dates = BTreeSet::new();

        for file in files {
            stats.total_bytes += file.identity.size;
            *stats.by_kind.entry(file.kind).or_default() += 1;

            let Some(record) = file.record() else {
                stats.failed += 1;
                continue;
            };
            stats.analyzed += 1;

            if let Some(capture) = &record.capture_time {
                stats.with_capture_time += 1;
                if matches!(capture.source, TimestampSource::Filename(_)) {
                    stats.dated_from_filename += 1;
                }
                *stats.by_year.entry(capture.timestamp.year()).or_default() += 1;
                dates.insert(capture.timestamp);
            }
            if let Some(name) = record.device.as_ref().and_then(|d| d.display_name()) {
                stats.with_device += 1;
                *stats.devices.entry(name).or_default() += 1;
            }
            if record.location.is_some() {
                stats.with_location += 1;
            }
        }

        stats.earliest = dates.first().copied();
        stats.latest = dates.last().copied();
        stats
    }
}

#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub roots: Vec<PathBuf>,
    /// Sorted by path.
    pub files: Vec<AnalyzedFile>,
    /// Directory entries the scanner could not read.
    pub scan_failures: Vec<(PathBuf, Error)>,
    pub stats: AnalysisStats,
    pub cancelled: bool,
}

impl AnalysisReport {
    /// (identity, record) pairs of every successfully analyzed file, in
    /// path order.
    pub fn records(&self) -> impl Iterator<Item = (&FileIdentity, &MetadataRecord)> {
        self.files
            .iter()
            .filter_map(|f| f.record().map(|r| (&f.identity, r)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&FileIdentity, &Error)> {
        self.files
            .iter()
            .filter_map(|f| f.result.as_ref().err().map(|e| (&f.identity, e)))
    }
}

/// Record for one file, from the cache when its identity is unchanged.
pub fn analyze_file(
    file: &ScannedFile,
    extractor: &MetadataExtractor,
    cache: &MetadataCache,
) -> (Result<MetadataRecord, Error>, bool) {
    if let Some(record) = cache.get(&file.identity) {
        return (Ok(record), true);
    }
    let result = extractor.extract(&file.identity.path, file.kind);
    if let Ok(record) = &result {
        cache.put(file.identity.clone(), record.clone());
    }
    (result, false)
}

/// Analyze `files` on `pool`. Files not yet started when `cancel` fires are
/// left out of the report.
pub fn analyze_files(
    files: Vec<ScannedFile>,
    extractor: &MetadataExtractor,
    cache: &MetadataCache,
    pool: &ThreadPool,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> (Vec<AnalyzedFile>, usize, bool) {
    let start = Instant::now();
    let total = files.len();
    let done = AtomicUsize::new(0);
    let hits = AtomicUsize::new(0);

    sink.on_phase_start(Phase::Analyze, total);
    let analyzed: Vec<AnalyzedFile> = pool.install(|| {
        files
            .into_par_iter()
            .enumerate()
            .filter_map(|(index, file)| {
                if cancel.is_cancelled() {
                    return None;
                }
                sink.on_file_start(index, total, &file.identity.path);
                let (result, hit) = analyze_file(&file, extractor, cache);
                if hit {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                match &result {
                    Ok(_) => {
                        let n = done.fetch_add(1, Ordering::Relaxed);
                        sink.on_file_done(n, total, &file.identity.path);
                    }
                    Err(e) => {
                        warn!("{}", e);
                        sink.on_error(&file.identity.path, e);
                    }
                }
                Some(AnalyzedFile {
                    identity: file.identity,
                    kind: file.kind,
                    result,
                })
            })
            .collect()
    });
    sink.on_phase_complete(Phase::Analyze);

    let cancelled = cancel.is_cancelled() && analyzed.len() < total;
    debug!(
        "Analyzed {} files in {}",
        analyzed.len(),
        format!("{:.2?}", start.elapsed()).green()
    );
    (analyzed, hits.into_inner(), cancelled)
}

pub(crate) fn build_report(
    roots: Vec<PathBuf>,
    files: Vec<AnalyzedFile>,
    scan_failures: Vec<(PathBuf, Error)>,
    cache_hits: usize,
    cancelled: bool,
    duration: Duration,
) -> AnalysisReport {
    let mut stats = AnalysisStats::collect(&files);
    stats.cache_hits = cache_hits;
    stats.cache_misses = files.len() - cache_hits;
    stats.duration = duration;
    info!(
        "Analyzed {} files: {} with dates, {} with devices, {} with GPS, {} failed",
        stats.total_files,
        stats.with_capture_time,
        stats.with_device,
        stats.with_location,
        stats.failed
    );
    AnalysisReport {
        roots,
        files,
        scan_failures,
        stats,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaptureTime, Device};
    use std::time::SystemTime;

    fn analyzed(name: &str, record: Option<MetadataRecord>) -> AnalyzedFile {
        AnalyzedFile {
            identity: FileIdentity {
                path: PathBuf::from(name),
                size: 100,
                modified: SystemTime::UNIX_EPOCH,
            },
            kind: MediaKind::Image,
            result: record.ok_or_else(|| Error::UnsupportedFormat(PathBuf::from(name))),
        }
    }

    #[test]
    fn stats_summarize_records() {
        let timestamp = chrono::NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        let mut dated = MetadataRecord::empty(MediaKind::Image);
        dated.capture_time = Some(CaptureTime {
            timestamp,
            source: TimestampSource::Filename("pixel".into()),
        });
        dated.device = Some(Device {
            make: Some("Google".into()),
            model: Some("Pixel".into()),
        });

        let files = vec![
            analyzed("/a.jpg", Some(dated)),
            analyzed("/b.jpg", Some(MetadataRecord::empty(MediaKind::Image))),
            analyzed("/c.jpg", None),
        ];
        let stats = AnalysisStats::collect(&files);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.total_bytes, 300);
        assert_eq!(stats.analyzed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.with_capture_time, 1);
        assert_eq!(stats.dated_from_filename, 1);
        assert_eq!(stats.devices.get("Google Pixel"), Some(&1));
        assert_eq!(stats.by_year.get(&2021), Some(&1));
        assert_eq!(stats.earliest, Some(timestamp));
    }
}
