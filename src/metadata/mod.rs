//! Embedded provenance extraction.
//!
//! A file's container is identified by [`detect`], which picks one of a closed
//! set of [`FormatHandler`]s. Every handler fills the same [`MetadataRecord`];
//! adding a format means adding a handler, not another branch in callers.

use std::path::Path;
use tracing::trace;

use crate::error::Result;
use crate::model::{CaptureTime, MediaKind, MetadataRecord, TimestampSource};

pub mod detect;
pub mod device;
mod exif_reader;
pub mod filename;
mod quicktime;

pub use detect::ContainerFormat;

/// Reader selected for a container family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHandler {
    /// EXIF in JPEG, TIFF (and TIFF-based raw), HEIF, PNG, WebP.
    Exif,
    /// ISO base media boxes (MP4, MOV, CR3).
    QuickTime,
    /// Known format without embedded provenance we can read.
    Bare,
}

impl FormatHandler {
    fn read(&self, path: &Path, record: &mut MetadataRecord) -> Result<()> {
        match self {
            FormatHandler::Exif => exif_reader::read(path, record),
            FormatHandler::QuickTime => quicktime::read(path, record),
            FormatHandler::Bare => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractorOptions {
    /// Fill a missing timestamp or device from camera naming conventions.
    pub infer_from_filename: bool,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            infer_from_filename: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor {
    options: ExtractorOptions,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ExtractorOptions) -> Self {
        Self { options }
    }

    /// Read and normalize the provenance of one file.
    ///
    /// A file without metadata is not an error: its record simply has empty
    /// fields. Errors are reserved for unknown formats, unparseable
    /// containers and unreadable files.
    pub fn extract(&self, path: &Path, kind: MediaKind) -> Result<MetadataRecord> {
        let format = detect::detect(path)?;
        let handler = format.handler();
        trace!("{} detected as {:?} ({:?})", path.display(), format, handler);

        let mut record = MetadataRecord::empty(kind);
        handler.read(path, &mut record)?;

        record.device = record.device.as_ref().and_then(device::normalize);

        if self.options.infer_from_filename
            && (record.capture_time.is_none() || record.device.is_none())
        {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let hints = filename::hints(name);
                if record.capture_time.is_none() {
                    record.capture_time = hints.timestamp.map(|(timestamp, convention)| {
                        CaptureTime {
                            timestamp,
                            source: TimestampSource::Filename(convention.to_string()),
                        }
                    });
                }
                if record.device.is_none() {
                    record.device = hints.device.as_ref().and_then(device::normalize);
                }
            }
        }

        Ok(record)
    }
}
