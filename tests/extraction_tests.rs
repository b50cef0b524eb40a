mod common;

use chrono::NaiveDate;
use tempfile::tempdir;

use common::{bare_jpeg, exif_jpeg, write_file, ExifFixture};
use photo_organizer::model::TimestampSource;
use photo_organizer::{ErrorKind, MediaKind, MetadataExtractor};
use photo_organizer::metadata::ExtractorOptions;

#[test]
fn test_reads_date_device_and_signed_gps() {
    let tmp = tempdir().unwrap();
    let path = write_file(
        &tmp.path().join("DSC_0001.jpg"),
        &exif_jpeg(&ExifFixture {
            taken: Some("2019:07:14 16:20:05"),
            make: Some("NIKON CORPORATION"),
            model: Some("NIKON D750"),
            gps: Some((-33.8568, -70.6483)),
        }),
    );

    let record = MetadataExtractor::new()
        .extract(&path, MediaKind::Image)
        .unwrap();

    let capture = record.capture_time.unwrap();
    assert_eq!(
        capture.timestamp,
        NaiveDate::from_ymd_opt(2019, 7, 14)
            .unwrap()
            .and_hms_opt(16, 20, 5)
            .unwrap()
    );
    assert!(matches!(capture.source, TimestampSource::Embedded(_)));

    let device = record.device.unwrap();
    assert_eq!(device.display_name().as_deref(), Some("Nikon D750"));

    let location = record.location.unwrap();
    assert!((location.latitude + 33.8568).abs() < 1e-4);
    assert!((location.longitude + 70.6483).abs() < 1e-4);
}

#[test]
fn test_missing_metadata_is_not_an_error() {
    let tmp = tempdir().unwrap();
    let path = write_file(&tmp.path().join("scan.jpg"), &bare_jpeg());

    let record = MetadataExtractor::new()
        .extract(&path, MediaKind::Image)
        .unwrap();
    assert_eq!(record.kind, MediaKind::Image);
    assert!(record.capture_time.is_none());
    assert!(record.device.is_none());
    assert!(record.location.is_none());
}

#[test]
fn test_filename_fills_missing_date() {
    let tmp = tempdir().unwrap();
    let path = write_file(&tmp.path().join("PXL_20220102_030405123.jpg"), &bare_jpeg());

    let record = MetadataExtractor::new()
        .extract(&path, MediaKind::Image)
        .unwrap();
    let capture = record.capture_time.unwrap();
    assert!(matches!(capture.source, TimestampSource::Filename(_)));
    assert_eq!(capture.timestamp.date(), NaiveDate::from_ymd_opt(2022, 1, 2).unwrap());

    let strict = MetadataExtractor::with_options(ExtractorOptions {
        infer_from_filename: false,
    });
    assert!(strict
        .extract(&path, MediaKind::Image)
        .unwrap()
        .capture_time
        .is_none());
}

#[test]
fn test_unknown_format_is_unsupported() {
    let tmp = tempdir().unwrap();
    let path = write_file(&tmp.path().join("notes.dat"), b"just some text here");

    let err = MetadataExtractor::new()
        .extract(&path, MediaKind::Image)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
}

#[test]
fn test_truncated_container_is_corrupt() {
    let tmp = tempdir().unwrap();
    // APP1 announces 256 bytes but the file ends right after the header.
    let path = write_file(
        &tmp.path().join("broken.jpg"),
        &[0xFF, 0xD8, 0xFF, 0xE1, 0x01, 0x00, b'E', b'x', b'i', b'f'],
    );

    let err = MetadataExtractor::new()
        .extract(&path, MediaKind::Image)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptMetadata);
}

#[test]
fn test_unreadable_file_is_io_failure() {
    let tmp = tempdir().unwrap();
    let err = MetadataExtractor::new()
        .extract(&tmp.path().join("gone.jpg"), MediaKind::Image)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
}

#[test]
fn test_panasonic_and_olympus_raws_are_not_corrupt() {
    let tmp = tempdir().unwrap();
    // Minimal little-endian header with an empty IFD, under each vendor magic.
    let ifd = [0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    for (name, magic) in [
        ("P1000001.RW2", b"IIU\0"),
        ("P2000001.ORF", b"IIRO"),
        ("P3000001.ORF", b"IIRS"),
    ] {
        let mut data = magic.to_vec();
        data.extend_from_slice(&ifd);
        let path = write_file(&tmp.path().join(name), &data);

        let record = MetadataExtractor::new()
            .extract(&path, MediaKind::RawImage)
            .unwrap();
        assert_eq!(record.kind, MediaKind::RawImage);
        assert!(record.device.is_none());
    }
}
