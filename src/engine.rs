use config::ConfigError;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::analysis::{self, AnalysisReport};
use crate::cache::MetadataCache;
use crate::config::{AppConfig, OrganizeOptions};
use crate::dedup::{self, DuplicateDetector, DuplicateGroup, DuplicateReport};
use crate::error::{Error, Result};
use crate::executor::{
    CancellationToken, ExecutionReport, Journal, JournalEntry, JournalSummary, RollbackReport,
    TransactionalExecutor,
};
use crate::hasher::HashCache;
use crate::metadata::{ExtractorOptions, MetadataExtractor};
use crate::model::{FileIdentity, MediaKind, MetadataRecord};
use crate::planner::{Criterion, Operation, OrganizationPlan, OverwritePolicy, PathPlanner};
use crate::progress::ProgressSink;
use crate::scanner::{self, ScanOptions, ScanOutcome};

/// Entry point for callers: owns the worker pool, the metadata and hash
/// caches, and the executor, and wires them together per operation.
pub struct Organizer {
    config: AppConfig,
    pool: ThreadPool,
    cache: MetadataCache,
    hashes: HashCache,
    extractor: MetadataExtractor,
    executor: TransactionalExecutor,
}

impl Organizer {
    /// Build from configuration. The metadata cache is persistent when
    /// `cache_path` is set.
    pub fn new(config: AppConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("organizer-worker-{}", i))
            .build()
            .map_err(|e| Error::Config(ConfigError::Message(e.to_string())))?;

        let cache = match &config.cache_path {
            Some(path) => MetadataCache::open_snapshot(path),
            None => MetadataCache::in_memory(),
        };
        let extractor = MetadataExtractor::with_options(ExtractorOptions {
            infer_from_filename: config.organize.infer_from_filename,
        });
        let executor = TransactionalExecutor::with_journal_dir(&config.journal_dir);

        debug!(
            "Organizer ready with {} workers, journals in {}",
            pool.current_num_threads(),
            config.journal_dir
        );
        Ok(Self {
            config,
            pool,
            cache,
            hashes: HashCache::new(),
            extractor,
            executor,
        })
    }

    pub fn with_cache(mut self, cache: MetadataCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_extractor_options(mut self, options: ExtractorOptions) -> Self {
        self.extractor = MetadataExtractor::with_options(options);
        self
    }

    /// Keep journals in memory only.
    pub fn without_journal_files(mut self) -> Self {
        self.executor = TransactionalExecutor::new();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn hash_cache(&self) -> &HashCache {
        &self.hashes
    }

    pub fn journal_dir(&self) -> Option<&Path> {
        self.executor.journal_dir()
    }

    fn scan_options(&self, recursive: bool, include_kinds: &[MediaKind]) -> ScanOptions {
        ScanOptions {
            recursive,
            include_kinds: include_kinds.to_vec(),
            ignore_patterns: self.config.ignore_patterns.clone(),
        }
    }

    /// Extract (or recall) metadata for every media file under `root`.
    /// Read-only: nothing is written outside the cache.
    pub fn analyze_directory(
        &self,
        root: &Path,
        recursive: bool,
        include_kinds: &[MediaKind],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisReport> {
        info!("Analyzing {}", root.display());
        let outcome = scanner::scan(root, &self.scan_options(recursive, include_kinds))?;
        Ok(self.analyze_scanned(vec![root.to_path_buf()], outcome, cancel, sink))
    }

    /// Analyze several roots as one collection. Nested roots are scanned
    /// once.
    pub fn analyze_paths(
        &self,
        roots: &[PathBuf],
        recursive: bool,
        include_kinds: &[MediaKind],
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisReport> {
        let names: Vec<String> = roots
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect();
        info!("Analyzing roots: {:?}", names);
        let outcome = scanner::scan_roots(&names, &self.scan_options(recursive, include_kinds))?;
        Ok(self.analyze_scanned(roots.to_vec(), outcome, cancel, sink))
    }

    /// Analyze every configured root, using the `[organize]` options.
    pub fn analyze_configured_roots(
        &self,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<AnalysisReport> {
        let roots: Vec<PathBuf> = self.config.root_paths.iter().map(PathBuf::from).collect();
        let options = &self.config.organize;
        self.analyze_paths(&roots, options.recursive, &options.include_kinds, cancel, sink)
    }

    fn analyze_scanned(
        &self,
        roots: Vec<PathBuf>,
        outcome: ScanOutcome,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> AnalysisReport {
        let start = Instant::now();
        let (files, hits, cancelled) = analysis::analyze_files(
            outcome.files,
            &self.extractor,
            &self.cache,
            &self.pool,
            cancel,
            sink,
        );
        analysis::build_report(
            roots,
            files,
            outcome.failures,
            hits,
            cancelled,
            start.elapsed(),
        )
    }

    /// Plan `files` under `destination`. Input is sorted by identity first,
    /// so the same set of files always yields the same plan.
    pub fn build_organization_plan<'a, I>(
        &self,
        files: I,
        criteria: &[Criterion],
        operation: Operation,
        conflict_policy: OverwritePolicy,
        destination: &Path,
    ) -> OrganizationPlan
    where
        I: IntoIterator<Item = (&'a FileIdentity, &'a MetadataRecord)>,
    {
        let mut files: Vec<_> = files.into_iter().collect();
        files.sort_by(|a, b| a.0.cmp(b.0));
        PathPlanner::new(criteria.to_vec())
            .with_operation(operation)
            .with_overwrite_policy(conflict_policy)
            .plan(files, destination)
    }

    /// Plan every file of an analysis report. Files whose metadata could not
    /// be read are planned with an empty record, so they land in the
    /// fallback folders instead of being left behind.
    pub fn plan_report(
        &self,
        report: &AnalysisReport,
        options: &OrganizeOptions,
        destination: &Path,
    ) -> OrganizationPlan {
        let records: Vec<MetadataRecord> = report
            .files
            .iter()
            .map(|file| {
                file.record()
                    .cloned()
                    .unwrap_or_else(|| MetadataRecord::empty(file.kind))
            })
            .collect();
        self.build_organization_plan(
            report.files.iter().map(|f| &f.identity).zip(records.iter()),
            &options.criteria_order,
            options.operation_mode,
            options.overwrite_policy,
            destination,
        )
    }

    /// Run `plan`. Cached metadata of files the batch moved away is dropped.
    pub fn execute(
        &self,
        plan: &OrganizationPlan,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionReport> {
        let report = self.executor.execute(plan, cancel, sink)?;
        self.forget_moved(&report.journal, |entry| &entry.source);
        Ok(report)
    }

    fn forget_moved<F>(&self, journal: &Journal, vacated: F)
    where
        F: Fn(&JournalEntry) -> &PathBuf,
    {
        let dropped = journal
            .entries()
            .iter()
            .filter(|entry| entry.operation == Operation::Move)
            .filter(|entry| self.cache.invalidate(vacated(entry)))
            .count();
        if dropped > 0 {
            debug!("Dropped {} cache entries for moved files", dropped);
        }
    }

    /// Group exact duplicates among `identities`, optionally restricted to
    /// one media kind. Primaries are chosen by capture time, falling back to
    /// the modification time for files without one.
    pub fn find_duplicates(
        &self,
        identities: &[FileIdentity],
        kind_filter: Option<MediaKind>,
        sink: &dyn ProgressSink,
    ) -> DuplicateReport {
        let files: Vec<FileIdentity> = identities
            .iter()
            .filter(|id| match kind_filter {
                Some(kind) => MediaKind::from_path(&id.path) == Some(kind),
                None => true,
            })
            .cloned()
            .collect();

        DuplicateDetector::new(&self.hashes, &self.pool).find(
            &files,
            |id| {
                self.capture_time(id)
                    .or_else(|| Some(id.modified_local()))
            },
            sink,
        )
    }

    fn capture_time(&self, identity: &FileIdentity) -> Option<chrono::NaiveDateTime> {
        if let Some(record) = self.cache.get(identity) {
            return record.captured_at();
        }
        let kind = MediaKind::from_path(&identity.path)?;
        match analysis::analyze_file(
            &scanner::ScannedFile {
                identity: identity.clone(),
                kind,
            },
            &self.extractor,
            &self.cache,
        ) {
            (Ok(record), _) => record.captured_at(),
            (Err(e), _) => {
                trace!("No capture time for {}: {}", identity.path.display(), e);
                None
            }
        }
    }

    /// Plan that sets every non-primary duplicate aside under `quarantine`.
    pub fn removal_plan(
        &self,
        groups: &[DuplicateGroup],
        quarantine: &Path,
        operation: Operation,
    ) -> OrganizationPlan {
        dedup::removal_plan(groups, quarantine, operation)
    }

    pub fn load_journal(&self, path: &Path) -> Result<Journal> {
        Journal::load(path)
    }

    /// Batch history from the journal directory, newest first.
    pub fn list_journals(&self) -> Result<Vec<JournalSummary>> {
        match self.journal_dir() {
            Some(dir) => Journal::list(dir),
            None => Ok(Vec::new()),
        }
    }

    pub fn find_journal(&self, batch_id: &str) -> Result<Journal> {
        let dir = self.persisted_journals()?;
        Journal::find(dir, batch_id)
    }

    pub fn delete_journal(&self, batch_id: &str) -> Result<bool> {
        let dir = self.persisted_journals()?;
        Journal::delete(dir, batch_id)
    }

    /// Delete journals of batches older than `max_age`.
    pub fn prune_journals(&self, max_age: chrono::Duration) -> Result<Vec<String>> {
        let dir = self.persisted_journals()?;
        Journal::prune(dir, chrono::Utc::now() - max_age)
    }

    fn persisted_journals(&self) -> Result<&Path> {
        self.journal_dir()
            .ok_or_else(|| Error::Journal("journals are kept in memory only".to_string()))
    }

    pub fn rollback(&self, journal: &mut Journal, sink: &dyn ProgressSink) -> Result<RollbackReport> {
        let report = self.executor.rollback(journal, sink)?;
        self.forget_moved(journal, |entry| &entry.destination);
        Ok(report)
    }

    /// Persist the metadata cache, if it has a store.
    pub fn flush_cache(&self) -> Result<()> {
        self.cache.flush()
    }
}
