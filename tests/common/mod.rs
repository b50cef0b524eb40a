#![allow(dead_code)]

use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use photo_organizer::{AppConfig, Organizer};

/// Tags to embed in a synthesized JPEG.
#[derive(Default)]
pub struct ExifFixture<'a> {
    pub taken: Option<&'a str>,
    pub make: Option<&'a str>,
    pub model: Option<&'a str>,
    /// Signed decimal degrees.
    pub gps: Option<(f64, f64)>,
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn dms(tag: Tag, degrees: f64) -> Field {
    let degrees = degrees.abs();
    let whole = degrees.trunc();
    let minutes = ((degrees - whole) * 60.0).trunc();
    let seconds = ((degrees - whole) * 60.0 - minutes) * 60.0;
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![
            Rational::from((whole as u32, 1)),
            Rational::from((minutes as u32, 1)),
            Rational::from(((seconds * 1000.0).round() as u32, 1000)),
        ]),
    }
}

/// A minimal JPEG: SOI, one APP1 Exif segment, EOI.
pub fn exif_jpeg(fixture: &ExifFixture) -> Vec<u8> {
    let mut fields = Vec::new();
    if let Some(taken) = fixture.taken {
        fields.push(ascii(Tag::DateTimeOriginal, taken));
    }
    if let Some(make) = fixture.make {
        fields.push(ascii(Tag::Make, make));
    }
    if let Some(model) = fixture.model {
        fields.push(ascii(Tag::Model, model));
    }
    if let Some((lat, lon)) = fixture.gps {
        fields.push(ascii(Tag::GPSLatitudeRef, if lat < 0.0 { "S" } else { "N" }));
        fields.push(dms(Tag::GPSLatitude, lat));
        fields.push(ascii(Tag::GPSLongitudeRef, if lon < 0.0 { "W" } else { "E" }));
        fields.push(dms(Tag::GPSLongitude, lon));
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// JPEG markers only, no metadata at all.
pub fn bare_jpeg() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xD9]
}

pub fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

pub fn set_mtime(path: &Path, secs_since_epoch: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_since_epoch))
        .unwrap();
}

/// Relative path → contents of every file below `root`.
pub fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

pub fn organizer(journal_dir: &Path) -> Organizer {
    let config = AppConfig {
        journal_dir: journal_dir.to_string_lossy().into_owned(),
        worker_threads: 2,
        ..AppConfig::default()
    };
    Organizer::new(config).unwrap()
}
