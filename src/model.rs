use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;

use crate::error::{Error, Result};

/// One physical file at one point in time.
///
/// Two identities are equal only when path, size and modification time all
/// match, so a file that changed on disk gets a new identity instead of an
/// updated one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileIdentity {
    /// Stat the file and build its identity. The path is made absolute but
    /// symlinks are not resolved.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| Error::io(path, e))?
                .join(path)
        };
        let metadata = fs::metadata(&absolute).map_err(|e| Error::io(&absolute, e))?;
        Self::from_metadata(absolute, &metadata)
    }

    pub fn from_metadata(path: PathBuf, metadata: &fs::Metadata) -> Result<Self> {
        let modified = metadata.modified().map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            size: metadata.len(),
            modified,
        })
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Filesystem modification time in local time, used as the date fallback.
    pub fn modified_local(&self) -> NaiveDateTime {
        DateTime::<Local>::from(self.modified).naive_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    Image,
    RawImage,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jfif", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "avif",
    "jp2",
];

const RAW_EXTENSIONS: &[&str] = &[
    "raw", "arw", "cr2", "cr3", "nef", "orf", "rw2", "dng", "3fr", "raf", "pef", "srw", "sr2",
    "x3f", "mef", "iiq", "rwl",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "3gp", "m4v", "mpg", "mpeg", "mts", "ts",
    "vob",
];

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Image, MediaKind::RawImage, MediaKind::Video];

    /// Classify by extension alone. Returns `None` for unknown extensions.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        if IMAGE_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Image)
        } else if RAW_EXTENSIONS.contains(&ext) {
            Some(MediaKind::RawImage)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::RawImage => "raw-image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Ok(MediaKind::Image),
            "raw" | "raw-image" | "raw_image" => Ok(MediaKind::RawImage),
            "video" | "videos" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind '{}'", other)),
        }
    }
}

/// Where a capture timestamp came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampSource {
    /// An embedded tag, e.g. `DateTimeOriginal` or `mvhd`.
    Embedded(String),
    /// A camera/app file naming convention.
    Filename(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTime {
    pub timestamp: NaiveDateTime,
    pub source: TimestampSource,
}

/// Canonical make/model pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub make: Option<String>,
    pub model: Option<String>,
}

impl Device {
    /// `"Make Model"`, or whichever half is known.
    pub fn display_name(&self) -> Option<String> {
        match (&self.make, &self.model) {
            (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
            (Some(make), None) => Some(make.clone()),
            (None, Some(model)) => Some(model.clone()),
            (None, None) => None,
        }
    }
}

/// Signed decimal degrees, south and west negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

impl GpsCoordinate {
    /// Returns `None` when either value falls outside the valid range.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GpsCoordinate) -> f64 {
        let (lat1, lon1) = (self.latitude.to_radians(), self.longitude.to_radians());
        let (lat2, lon2) = (other.latitude.to_radians(), other.longitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Normalized, format-independent provenance of one file. Every attribute
/// that the source did not provide is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub kind: MediaKind,
    pub capture_time: Option<CaptureTime>,
    pub device: Option<Device>,
    pub location: Option<GpsCoordinate>,
    pub dimensions: Option<Dimensions>,
}

impl MetadataRecord {
    pub fn empty(kind: MediaKind) -> Self {
        Self {
            kind,
            capture_time: None,
            device: None,
            location: None,
            dimensions: None,
        }
    }

    pub fn captured_at(&self) -> Option<NaiveDateTime> {
        self.capture_time.as_ref().map(|c| c.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(
            MediaKind::from_path(Path::new("/a/IMG_0001.JPG")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("b.nef")),
            Some(MediaKind::RawImage)
        );
        assert_eq!(
            MediaKind::from_path(Path::new("c.MoV")),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn gps_rejects_out_of_range() {
        assert!(GpsCoordinate::new(91.0, 0.0).is_none());
        assert!(GpsCoordinate::new(0.0, -180.5).is_none());
        assert!(GpsCoordinate::new(f64::NAN, 0.0).is_none());
        assert!(GpsCoordinate::new(-33.86, 151.2).is_some());
    }

    #[test]
    fn haversine_paris_london() {
        let paris = GpsCoordinate::new(48.8566, 2.3522).unwrap();
        let london = GpsCoordinate::new(51.5074, -0.1278).unwrap();
        let d = paris.distance_km(&london);
        assert!((d - 343.5).abs() < 2.0, "distance was {}", d);
    }

    #[test]
    fn identity_equality_uses_all_fields() {
        let now = SystemTime::now();
        let a = FileIdentity {
            path: PathBuf::from("/x/a.jpg"),
            size: 10,
            modified: now,
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.size = 11;
        assert_ne!(a, b);
    }

    #[test]
    fn device_display_name() {
        let d = Device {
            make: Some("Canon".into()),
            model: Some("EOS 5D".into()),
        };
        assert_eq!(d.display_name().as_deref(), Some("Canon EOS 5D"));
        let d = Device {
            make: None,
            model: None,
        };
        assert_eq!(d.display_name(), None);
    }
}
