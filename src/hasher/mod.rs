//! Staged content fingerprints.
//!
//! The quick hash samples a file and is only good for ruling files out; the
//! full hash reads everything and is what duplicate groups are built on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use twox_hash::XxHash64;

use crate::error::{Error, Result};

mod cache;

pub use cache::HashCache;

/// Bytes read from each of the head, middle and tail of a file.
pub const SAMPLE_SIZE: u64 = 8 * 1024;

const FULL_HASH_BUFFER: usize = 64 * 1024;

/// BLAKE3 digest of a whole file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

/// XxHash64 over head, middle and tail samples plus the file size. Files no
/// larger than three samples are hashed whole.
pub fn quick_hash(path: &Path) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let len = file.metadata().map_err(|e| Error::io(path, e))?.len();

    let mut hasher = XxHash64::with_seed(0);
    if len <= SAMPLE_SIZE * 3 {
        let mut buffer = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buffer)
            .map_err(|e| Error::io(path, e))?;
        hasher.write(&buffer);
    } else {
        let mut buffer = vec![0u8; SAMPLE_SIZE as usize];
        for offset in [0, len / 2 - SAMPLE_SIZE / 2, len - SAMPLE_SIZE] {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io(path, e))?;
            file.read_exact(&mut buffer)
                .map_err(|e| Error::io(path, e))?;
            hasher.write(&buffer);
        }
    }
    hasher.write_u64(len);

    Ok(hasher.finish())
}

/// Streaming BLAKE3 over the entire file.
pub fn full_hash(path: &Path) -> Result<ContentHash> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = BufReader::with_capacity(FULL_HASH_BUFFER, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; FULL_HASH_BUFFER];

    loop {
        let n = reader.read(&mut buffer).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentHash(*hasher.finalize().as_bytes()))
}
