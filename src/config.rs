use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::MediaKind;
use crate::planner::{Criterion, DateGranularity, Operation, OverwritePolicy};

/// Options of an organize run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeOptions {
    /// Outermost first.
    pub criteria_order: Vec<Criterion>,
    pub operation_mode: Operation,
    pub overwrite_policy: OverwritePolicy,
    pub recursive: bool,
    pub include_kinds: Vec<MediaKind>,
    /// Infer missing dates and devices from camera file naming conventions.
    pub infer_from_filename: bool,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            criteria_order: vec![
                Criterion::ByDate(DateGranularity::Year),
                Criterion::ByDate(DateGranularity::Month),
            ],
            operation_mode: Operation::Copy,
            overwrite_policy: OverwritePolicy::Rename,
            recursive: true,
            include_kinds: MediaKind::ALL.to_vec(),
            infer_from_filename: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub destination: Option<String>,
    /// Metadata cache snapshot. Without one the cache lives in memory.
    pub cache_path: Option<String>,
    pub journal_dir: String,
    /// 0 lets rayon pick one worker per core.
    pub worker_threads: usize,
    pub organize: OrganizeOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: vec!["*/.photo-organizer-backup".to_string()],
            destination: None,
            cache_path: None,
            journal_dir: "journals".to_string(),
            worker_threads: 0,
            organize: OrganizeOptions::default(),
        }
    }
}

/// `Config.toml` in the working directory (optional) overlaid with
/// `ORGANIZER_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    load_configuration_from(None)
}

/// Like [`load_configuration`] but reading `path` instead of `Config.toml`.
/// An explicit file must exist.
pub fn load_configuration_from(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("ORGANIZER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn destination_path(&self) -> Option<PathBuf> {
        self.destination.as_ref().map(PathBuf::from)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}
