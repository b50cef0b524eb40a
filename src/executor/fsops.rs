use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// `rename` refused because source and destination are on different
/// filesystems (EXDEV / ERROR_NOT_SAME_DEVICE).
fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(18) => cfg!(unix),
        Some(17) => cfg!(windows),
        _ => false,
    }
}

pub(crate) fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Create `dir` and any missing ancestors, appending each directory actually
/// created to `created`, outermost first.
pub(crate) fn ensure_dir(dir: &Path, created: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.as_os_str().is_empty() || path.is_dir() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }

    for path in missing.into_iter().rev() {
        match fs::create_dir(&path) {
            Ok(()) => created.push(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove the given directories, innermost first, as long as they are
/// empty. Returns how many were removed.
pub(crate) fn remove_empty_dirs(dirs: &[PathBuf]) -> usize {
    dirs.iter()
        .rev()
        .filter(|dir| fs::remove_dir(dir).is_ok())
        .count()
}

fn partial_path(dest: &Path, tag: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.partial", name, tag))
}

/// Copy into a hidden sibling of `dest`, then rename into place, so `dest`
/// is either absent or complete. The source's modification time is kept.
pub(crate) fn copy_atomic(src: &Path, dest: &Path, tag: &str) -> io::Result<()> {
    let partial = partial_path(dest, tag);
    let result = (|| {
        fs::copy(src, &partial)?;
        let modified = fs::metadata(src)?.modified()?;
        File::options()
            .write(true)
            .open(&partial)?
            .set_modified(modified)?;
        fs::rename(&partial, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

/// Rename, or copy then delete when the rename crosses filesystems.
pub(crate) fn move_file(src: &Path, dest: &Path, tag: &str) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            trace!(
                "Cross-device move of {}, copying instead",
                src.display()
            );
            copy_atomic(src, dest, tag)?;
            if let Err(e) = fs::remove_file(src) {
                let _ = fs::remove_file(dest);
                return Err(e);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn ensure_dir_records_created_dirs() {
        let root = tempdir().unwrap();
        let target = root.path().join("a/b/c");
        let mut created = Vec::new();
        ensure_dir(&target, &mut created).unwrap();
        assert_eq!(
            created,
            vec![root.path().join("a"), root.path().join("a/b"), target.clone()]
        );

        let mut again = Vec::new();
        ensure_dir(&target, &mut again).unwrap();
        assert!(again.is_empty());

        assert_eq!(remove_empty_dirs(&created), 3);
        assert!(!root.path().join("a").exists());
    }

    #[test]
    fn remove_empty_dirs_keeps_populated_ones() {
        let root = tempdir().unwrap();
        let mut created = Vec::new();
        ensure_dir(&root.path().join("x/y"), &mut created).unwrap();
        fs::write(root.path().join("x/keep.txt"), b"k").unwrap();
        assert_eq!(remove_empty_dirs(&created), 1);
        assert!(root.path().join("x").is_dir());
    }

    #[test]
    fn copy_keeps_content_and_mtime() {
        let root = tempdir().unwrap();
        let src = root.path().join("src.jpg");
        let dest = root.path().join("dest.jpg");
        fs::write(&src, b"pixels").unwrap();
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(old)
            .unwrap();

        copy_atomic(&src, &dest, "t").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"pixels");
        assert_eq!(fs::metadata(&dest).unwrap().modified().unwrap(), old);
        assert!(!partial_path(&dest, "t").exists());
        assert!(src.exists());
    }

    #[test]
    fn move_renames() {
        let root = tempdir().unwrap();
        let src = root.path().join("a.jpg");
        let dest = root.path().join("b.jpg");
        fs::write(&src, b"a").unwrap();
        move_file(&src, &dest, "t").unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"a");
    }
}
