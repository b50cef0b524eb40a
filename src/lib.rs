//! Metadata-driven photo and video organization.
//!
//! [`Organizer`] ties the pieces together: scanning, metadata extraction
//! behind a concurrent cache, destination planning, duplicate detection, and
//! a journaled executor whose batches can be rolled back.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod executor;
pub mod hasher;
pub mod metadata;
pub mod model;
pub mod planner;
pub mod progress;
pub mod scanner;

pub use analysis::{AnalysisReport, AnalysisStats, AnalyzedFile};
pub use cache::MetadataCache;
pub use config::{AppConfig, OrganizeOptions};
pub use dedup::{DuplicateGroup, DuplicateReport};
pub use engine::Organizer;
pub use error::{Error, ErrorKind, Result};
pub use executor::{
    BatchState, CancellationToken, ExecutionReport, Journal, RollbackReport, TransactionalExecutor,
};
pub use metadata::MetadataExtractor;
pub use model::{FileIdentity, MediaKind, MetadataRecord};
pub use planner::{Criterion, Operation, OrganizationPlan, OverwritePolicy, PathPlanner};
pub use progress::{ChannelSink, Phase, ProgressEvent, ProgressSink, SilentSink};
