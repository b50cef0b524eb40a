use chrono::DateTime;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::model::{CaptureTime, Dimensions, GpsCoordinate, MetadataRecord, TimestampSource};

/// Seconds between 1904-01-01 (QuickTime epoch) and 1970-01-01.
const QUICKTIME_EPOCH_OFFSET: u64 = 2_082_844_800;

const XYZ: [u8; 4] = [0xA9, b'x', b'y', b'z'];

/// One ISO-BMFF box: payload spans `start..end`.
#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: [u8; 4],
    start: u64,
    end: u64,
}

fn corrupt_on_eof(path: &Path, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::corrupt(path, "truncated box")
    } else {
        Error::io(path, err)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// List the direct children of the region `start..end`.
fn children<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    start: u64,
    end: u64,
) -> Result<Vec<BoxHeader>> {
    let mut boxes = Vec::new();
    let mut offset = start;

    while end.saturating_sub(offset) >= 8 {
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io(path, e))?;
        let size = read_u32(reader).map_err(|e| corrupt_on_eof(path, e))? as u64;
        let mut kind = [0u8; 4];
        reader
            .read_exact(&mut kind)
            .map_err(|e| corrupt_on_eof(path, e))?;

        let (header_len, box_len) = match size {
            0 => (8, end - offset),
            1 => {
                let large = read_u64(reader).map_err(|e| corrupt_on_eof(path, e))?;
                (16, large)
            }
            n => (8, n),
        };

        let box_end = offset
            .checked_add(box_len)
            .filter(|e| box_len >= header_len && *e <= end);
        let Some(box_end) = box_end else {
            return Err(Error::corrupt(
                path,
                format!(
                    "box '{}' at offset {} overruns its parent",
                    String::from_utf8_lossy(&kind),
                    offset
                ),
            ));
        };

        boxes.push(BoxHeader {
            kind,
            start: offset + header_len,
            end: box_end,
        });
        offset = box_end;
    }

    Ok(boxes)
}

fn find(boxes: &[BoxHeader], kind: &[u8; 4]) -> Option<BoxHeader> {
    boxes.iter().find(|b| &b.kind == kind).copied()
}

fn read_payload<R: Read + Seek>(
    reader: &mut R,
    path: &Path,
    header: &BoxHeader,
    limit: u64,
) -> Result<Vec<u8>> {
    let len = (header.end - header.start).min(limit) as usize;
    reader
        .seek(SeekFrom::Start(header.start))
        .map_err(|e| Error::io(path, e))?;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| corrupt_on_eof(path, e))?;
    Ok(buf)
}

/// Read `mvhd` creation time, `©xyz` location and the first visual track's
/// dimensions from an MP4/MOV/CR3 file.
pub(crate) fn read(path: &Path, record: &mut MetadataRecord) -> Result<()> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();
    let mut reader = BufReader::new(file);

    let top = children(&mut reader, path, 0, len)?;
    let Some(moov) = find(&top, b"moov") else {
        return Ok(());
    };
    let moov_children = children(&mut reader, path, moov.start, moov.end)?;

    if let Some(mvhd) = find(&moov_children, b"mvhd") {
        let payload = read_payload(&mut reader, path, &mvhd, 32)?;
        record.capture_time = creation_time(&payload).map(|timestamp| CaptureTime {
            timestamp,
            source: TimestampSource::Embedded("mvhd".to_string()),
        });
    }

    if let Some(udta) = find(&moov_children, b"udta") {
        let udta_children = children(&mut reader, path, udta.start, udta.end)?;
        if let Some(xyz) = find(&udta_children, &XYZ) {
            let payload = read_payload(&mut reader, path, &xyz, 256)?;
            record.location = payload
                .get(4..)
                .map(String::from_utf8_lossy)
                .and_then(|s| parse_iso6709(&s));
        }
    }

    for trak in moov_children.iter().filter(|b| &b.kind == b"trak") {
        let trak_children = children(&mut reader, path, trak.start, trak.end)?;
        if let Some(tkhd) = find(&trak_children, b"tkhd") {
            let payload = read_payload(&mut reader, path, &tkhd, 96)?;
            if let Some(dimensions) = track_dimensions(&payload) {
                record.dimensions = Some(dimensions);
                break;
            }
        }
    }

    Ok(())
}

fn creation_time(mvhd: &[u8]) -> Option<chrono::NaiveDateTime> {
    let version = *mvhd.first()?;
    let seconds = match version {
        0 => u32::from_be_bytes(mvhd.get(4..8)?.try_into().ok()?) as u64,
        1 => u64::from_be_bytes(mvhd.get(4..12)?.try_into().ok()?),
        _ => return None,
    };
    // Zero means "unset"; anything before 1970 is treated the same way.
    let unix = seconds.checked_sub(QUICKTIME_EPOCH_OFFSET).filter(|s| *s > 0)?;
    DateTime::from_timestamp(i64::try_from(unix).ok()?, 0).map(|dt| dt.naive_utc())
}

fn track_dimensions(tkhd: &[u8]) -> Option<Dimensions> {
    let offset = match tkhd.first()? {
        0 => 76,
        1 => 88,
        _ => return None,
    };
    // 16.16 fixed point
    let width = u32::from_be_bytes(tkhd.get(offset..offset + 4)?.try_into().ok()?) >> 16;
    let height = u32::from_be_bytes(tkhd.get(offset + 4..offset + 8)?.try_into().ok()?) >> 16;
    (width > 0 && height > 0).then_some(Dimensions { width, height })
}

/// `+48.8584+002.2945+035.000/` style strings.
fn parse_iso6709(raw: &str) -> Option<GpsCoordinate> {
    static ISO6709: OnceLock<Regex> = OnceLock::new();
    let re = ISO6709.get_or_init(|| {
        Regex::new(r"^([+-]\d+(?:\.\d+)?)([+-]\d+(?:\.\d+)?)").expect("static regex")
    });
    let caps = re.captures(raw.trim())?;
    let latitude = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let longitude = caps.get(2)?.as_str().parse::<f64>().ok()?;
    GpsCoordinate::new(latitude, longitude)
}
