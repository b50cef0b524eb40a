use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::WalkDir;

use crate::config::non_overlapping_directories;
use crate::error::{Error, Result};
use crate::model::{FileIdentity, MediaKind};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub recursive: bool,
    /// Empty means every media kind.
    pub include_kinds: Vec<MediaKind>,
    pub ignore_patterns: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include_kinds: MediaKind::ALL.to_vec(),
            ignore_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub identity: FileIdentity,
    pub kind: MediaKind,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Sorted by path.
    pub files: Vec<ScannedFile>,
    /// Entries that could not be read while walking.
    pub failures: Vec<(PathBuf, Error)>,
}

fn compile_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| Error::io(path, e))?;
    Ok(cwd.join(path))
}

/// Enumerate media files below `root`. Symlinks and empty files are skipped,
/// as is anything whose extension is not a known media kind.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ScanOutcome> {
    let root = absolute(root)?;
    if !root.is_dir() {
        return Err(Error::io(
            &root,
            io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let patterns = compile_patterns(&options.ignore_patterns);
    let ignored = |path: &Path| patterns.iter().any(|p| p.matches_path(path));

    let mut walker = WalkDir::new(&root).follow_links(false);
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut outcome = ScanOutcome::default();
    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !ignored(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                warn!("Skipping {}: {}", path.display(), err);
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                outcome.failures.push((path.clone(), Error::io(path, source)));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = MediaKind::from_path(entry.path()) else {
            continue;
        };
        if !options.include_kinds.is_empty() && !options.include_kinds.contains(&kind) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                let path = entry.path().to_path_buf();
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata"));
                outcome.failures.push((path.clone(), Error::io(path, source)));
                continue;
            }
        };
        if metadata.len() == 0 {
            continue;
        }

        let path = entry.into_path();
        match FileIdentity::from_metadata(path.clone(), &metadata) {
            Ok(identity) => outcome.files.push(ScannedFile { identity, kind }),
            Err(e) => {
                warn!("{}", e);
                outcome.failures.push((path, e));
            }
        }
    }

    outcome
        .files
        .sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
    Ok(outcome)
}

/// Scan several roots, dropping roots nested in other roots first.
pub fn scan_roots(roots: &[String], options: &ScanOptions) -> Result<ScanOutcome> {
    let mut combined = ScanOutcome::default();
    for root in non_overlapping_directories(roots.to_vec()) {
        let outcome = scan(Path::new(&root), options)?;
        combined.files.extend(outcome.files);
        combined.failures.extend(outcome.failures);
    }
    combined
        .files
        .sort_by(|a, b| a.identity.path.cmp(&b.identity.path));
    combined.files.dedup_by(|a, b| a.identity.path == b.identity.path);
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_tree(root: &Path) {
        fs::create_dir_all(root.join("2019/raw")).unwrap();
        fs::create_dir_all(root.join(".thumbnails")).unwrap();
        fs::write(root.join("b.jpg"), b"jpeg").unwrap();
        fs::write(root.join("a.MOV"), b"mov").unwrap();
        fs::write(root.join("notes.txt"), b"text").unwrap();
        fs::write(root.join("empty.jpg"), b"").unwrap();
        fs::write(root.join("2019/c.png"), b"png").unwrap();
        fs::write(root.join("2019/raw/d.nef"), b"nef").unwrap();
        fs::write(root.join(".thumbnails/t.jpg"), b"thumb").unwrap();
    }

    fn names(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .files
            .iter()
            .map(|f| f.identity.file_name().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_recursive_scan_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        create_test_tree(dir.path());
        let options = ScanOptions {
            ignore_patterns: vec!["*/.thumbnails".to_string()],
            ..ScanOptions::default()
        };

        let outcome = scan(dir.path(), &options).unwrap();
        assert_eq!(names(&outcome), vec!["c.png", "d.nef", "a.MOV", "b.jpg"]);
        assert!(outcome.failures.is_empty());
        assert!(outcome.files.iter().all(|f| f.identity.path.is_absolute()));
    }

    #[test]
    fn test_non_recursive_scan() {
        let dir = tempdir().unwrap();
        create_test_tree(dir.path());
        let options = ScanOptions {
            recursive: false,
            ..ScanOptions::default()
        };
        let outcome = scan(dir.path(), &options).unwrap();
        assert_eq!(names(&outcome), vec!["a.MOV", "b.jpg"]);
    }

    #[test]
    fn test_include_kinds() {
        let dir = tempdir().unwrap();
        create_test_tree(dir.path());
        let options = ScanOptions {
            include_kinds: vec![MediaKind::RawImage, MediaKind::Video],
            ignore_patterns: vec!["*/.thumbnails".to_string()],
            ..ScanOptions::default()
        };
        let outcome = scan(dir.path(), &options).unwrap();
        assert_eq!(names(&outcome), vec!["d.nef", "a.MOV"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(scan(&dir.path().join("nope"), &ScanOptions::default()).is_err());
    }

    #[test]
    fn test_nested_roots_scanned_once() {
        let dir = tempdir().unwrap();
        create_test_tree(dir.path());
        let roots = vec![
            dir.path().join("2019").to_string_lossy().into_owned(),
            dir.path().to_string_lossy().into_owned(),
        ];
        let options = ScanOptions {
            ignore_patterns: vec!["*/.thumbnails".to_string()],
            ..ScanOptions::default()
        };
        let outcome = scan_roots(&roots, &options).unwrap();
        assert_eq!(outcome.files.len(), 4);
    }
}
