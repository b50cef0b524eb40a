use chrono::NaiveDateTime;
use exif::{In, Tag, Value};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::trace;

use crate::error::{Error, Result};
use crate::model::{CaptureTime, Device, Dimensions, GpsCoordinate, MetadataRecord, TimestampSource};

/// Divisors for degrees, minutes and seconds.
const DMS_DIVISION: [f64; 3] = [1.0, 60.0, 3600.0];

/// Tags tried for the capture timestamp, in priority order.
const DATE_TAGS: [Tag; 3] = [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime];

const DATE_FORMATS: [&str; 6] = [
    "%Y:%m:%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y:%m:%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Read EXIF from any container kamadak-exif understands (JPEG, TIFF and
/// TIFF-based raw, HEIF, PNG, WebP) into `record`.
pub(crate) fn read(path: &Path, record: &mut MetadataRecord) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_))
        | Err(exif::Error::NotSupported(_))
        | Err(exif::Error::BlankValue(_)) => {
            trace!("No EXIF in {}", path.display());
            return Ok(());
        }
        Err(exif::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::corrupt(path, "truncated container"));
        }
        Err(exif::Error::Io(e)) => return Err(Error::io(path, e)),
        Err(e) => return Err(Error::corrupt(path, e.to_string())),
    };

    apply(&exif, record);
    Ok(())
}

fn apply(exif: &exif::Exif, record: &mut MetadataRecord) {
    record.capture_time = DATE_TAGS.iter().find_map(|tag| {
        ascii(exif, *tag)
            .and_then(|raw| parse_datetime(&raw))
            .map(|timestamp| CaptureTime {
                timestamp,
                source: TimestampSource::Embedded(tag.to_string()),
            })
    });

    let make = ascii(exif, Tag::Make);
    let model = ascii(exif, Tag::Model);
    if make.is_some() || model.is_some() {
        record.device = Some(Device { make, model });
    }

    record.location = gps(exif);

    let width = uint(exif, Tag::PixelXDimension).or_else(|| uint(exif, Tag::ImageWidth));
    let height = uint(exif, Tag::PixelYDimension).or_else(|| uint(exif, Tag::ImageLength));
    if let (Some(width), Some(height)) = (width, height) {
        record.dimensions = Some(Dimensions { width, height });
    }
}

fn ascii(exif: &exif::Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string()
            })
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn uint(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?
        .value
        .get_uint(0)
        .filter(|v| *v > 0)
}

pub(crate) fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

/// Degrees/minutes/seconds rationals to unsigned decimal degrees.
fn dms(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(parts) if !parts.is_empty() => parts
            .iter()
            .zip(DMS_DIVISION.iter())
            .map(|(r, div)| match (r.num, r.denom) {
                (0, 0) => Some(0.0),
                (_, 0) => None,
                _ => Some(r.to_f64() / div),
            })
            .sum(),
        _ => None,
    }
}

fn gps(exif: &exif::Exif) -> Option<GpsCoordinate> {
    let mut latitude = dms(exif, Tag::GPSLatitude)?;
    let mut longitude = dms(exif, Tag::GPSLongitude)?;

    if hemisphere(exif, Tag::GPSLatitudeRef) == Some('S') {
        latitude = -latitude;
    }
    if hemisphere(exif, Tag::GPSLongitudeRef) == Some('W') {
        longitude = -longitude;
    }

    GpsCoordinate::new(latitude, longitude)
}

fn hemisphere(exif: &exif::Exif, tag: Tag) -> Option<char> {
    ascii(exif, tag)?
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
}
