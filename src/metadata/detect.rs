use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::MediaKind;

use super::FormatHandler;

const SNIFF_LENGTH: usize = 16;

/// Container family of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Jpeg,
    Png,
    Tiff,
    Heif,
    Webp,
    /// ISO base media (MP4, MOV, 3GP, M4V).
    IsoMedia,
    /// Canon CR3, an ISO base media file with a `crx ` brand.
    Cr3,
    Gif,
    Bmp,
    Avi,
    Matroska,
    /// Recognized by extension, but we carry no reader for it.
    Opaque,
}

impl ContainerFormat {
    pub fn handler(&self) -> FormatHandler {
        match self {
            ContainerFormat::Jpeg
            | ContainerFormat::Png
            | ContainerFormat::Tiff
            | ContainerFormat::Heif
            | ContainerFormat::Webp => FormatHandler::Exif,
            ContainerFormat::IsoMedia | ContainerFormat::Cr3 => FormatHandler::QuickTime,
            ContainerFormat::Gif
            | ContainerFormat::Bmp
            | ContainerFormat::Avi
            | ContainerFormat::Matroska
            | ContainerFormat::Opaque => FormatHandler::Bare,
        }
    }

    /// Media kind implied by content alone, used when the extension says nothing.
    pub fn media_kind(&self) -> MediaKind {
        match self {
            ContainerFormat::IsoMedia | ContainerFormat::Avi | ContainerFormat::Matroska => {
                MediaKind::Video
            }
            ContainerFormat::Cr3 => MediaKind::RawImage,
            _ => MediaKind::Image,
        }
    }
}

/// Maps an extension to its format. The flag marks extensions whose
/// container varies in the wild and must be confirmed by sniffing.
fn from_extension(ext: &str) -> Option<(ContainerFormat, bool)> {
    let format = match ext {
        "jpg" | "jpeg" | "jfif" => (ContainerFormat::Jpeg, false),
        "png" => (ContainerFormat::Png, false),
        "tif" | "tiff" => (ContainerFormat::Tiff, true),
        "heic" | "heif" | "avif" => (ContainerFormat::Heif, true),
        "webp" => (ContainerFormat::Webp, false),
        "gif" => (ContainerFormat::Gif, false),
        "bmp" => (ContainerFormat::Bmp, false),
        // TIFF-based raw formats
        "arw" | "cr2" | "nef" | "dng" | "3fr" | "pef" | "srw" | "sr2" | "mef" | "iiq" | "rwl" => {
            (ContainerFormat::Tiff, false)
        }
        // Panasonic (IIU) and Olympus (IIRO, IIRS, MMOR) change the TIFF magic,
        // which the EXIF reader refuses.
        "rw2" | "orf" => (ContainerFormat::Opaque, false),
        "cr3" => (ContainerFormat::Cr3, false),
        "raw" | "x3f" | "raf" => (ContainerFormat::Opaque, true),
        "mp4" | "mov" | "m4v" | "3gp" => (ContainerFormat::IsoMedia, false),
        "avi" => (ContainerFormat::Avi, false),
        "mkv" | "webm" => (ContainerFormat::Matroska, false),
        "jp2" | "wmv" | "flv" | "mpg" | "mpeg" | "mts" | "ts" | "vob" => {
            (ContainerFormat::Opaque, false)
        }
        _ => return None,
    };
    Some(format)
}

/// Identify a container from its leading bytes.
pub fn sniff(header: &[u8]) -> Option<ContainerFormat> {
    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ContainerFormat::Jpeg);
    }
    if header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ContainerFormat::Png);
    }
    if header.starts_with(b"II*\0") || header.starts_with(b"MM\0*") {
        return Some(ContainerFormat::Tiff);
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return Some(match &header[8..12] {
            b"heic" | b"heix" | b"hevc" | b"heim" | b"heis" | b"hevm" | b"hevs" | b"mif1"
            | b"msf1" | b"avif" => ContainerFormat::Heif,
            b"crx " => ContainerFormat::Cr3,
            _ => ContainerFormat::IsoMedia,
        });
    }
    if header.len() >= 12 && header.starts_with(b"RIFF") {
        return match &header[8..12] {
            b"WEBP" => Some(ContainerFormat::Webp),
            b"AVI " => Some(ContainerFormat::Avi),
            _ => None,
        };
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(ContainerFormat::Matroska);
    }
    if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        return Some(ContainerFormat::Gif);
    }
    if header.starts_with(b"BM") && header.len() >= 14 {
        return Some(ContainerFormat::Bmp);
    }
    None
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut buffer = vec![0; SNIFF_LENGTH];
    let mut filled = 0;
    while filled < SNIFF_LENGTH {
        let n = f.read(&mut buffer[filled..]).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Extension first; content sniffing for ambiguous or unknown extensions.
pub fn detect(path: &Path) -> Result<ContainerFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref().and_then(from_extension) {
        Some((format, false)) => Ok(format),
        Some((format, true)) => {
            let header = read_header(path)?;
            Ok(sniff(&header).unwrap_or(format))
        }
        None => {
            let header = read_header(path)?;
            sniff(&header).ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

/// Media kind for a path: extension when known, otherwise sniffed content.
pub fn media_kind(path: &Path) -> Option<MediaKind> {
    MediaKind::from_path(path).or_else(|| {
        read_header(path)
            .ok()
            .and_then(|header| sniff(&header))
            .map(|format| format.media_kind())
    })
}
