use ahash::AHashSet;
use std::path::{Path, PathBuf};

const MAX_SEGMENT_LEN: usize = 80;

/// Make `raw` safe as a single directory name on any common filesystem.
/// Returns `None` when nothing usable is left.
pub fn sanitize_segment(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_SEGMENT_LEN)
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.' || c == '_') {
        return None;
    }
    Some(trimmed.to_string())
}

/// Hands out destination paths that are unique, ignoring case, among each
/// other and optionally against files already on disk.
#[derive(Debug)]
pub(crate) struct NameAllocator {
    taken: AHashSet<String>,
    existing_root: Option<PathBuf>,
}

fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

fn split_name(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rfind('.') {
        Some(0) | None => (file_name, None),
        Some(pos) => (&file_name[..pos], Some(&file_name[pos + 1..])),
    }
}

impl NameAllocator {
    /// With `existing_root`, names that already exist below that root are
    /// treated as taken.
    pub(crate) fn new(existing_root: Option<PathBuf>) -> Self {
        Self {
            taken: AHashSet::new(),
            existing_root,
        }
    }

    fn is_free(&self, candidate: &Path) -> bool {
        if self.taken.contains(&collision_key(candidate)) {
            return false;
        }
        match &self.existing_root {
            Some(root) => std::fs::symlink_metadata(root.join(candidate)).is_err(),
            None => true,
        }
    }

    /// `dir/file_name`, or `dir/stem_N.ext` with the smallest free N.
    pub(crate) fn allocate(&mut self, dir: &Path, file_name: &str) -> PathBuf {
        let mut candidate = dir.join(file_name);
        let (stem, ext) = split_name(file_name);
        let mut counter = 1;
        while !self.is_free(&candidate) {
            let name = match ext {
                Some(ext) => format!("{}_{}.{}", stem, counter, ext),
                None => format!("{}_{}", stem, counter),
            };
            candidate = dir.join(name);
            counter += 1;
        }
        self.taken.insert(collision_key(&candidate));
        candidate
    }
}
