// src/engine/io.rs
//
// Input sources and ICC profile extraction.

use crate::error::IngestError;
use img_parts::{jpeg::Jpeg, png::Png, webp::WebP, Bytes, ImageICC};
use memmap2::Mmap;
use std::path::PathBuf;

/// Where the raw bytes come from. Memory for buffers already in hand,
/// Mapped for zero-copy file access.
#[derive(Debug)]
pub enum Source {
    /// In-memory image data
    Memory(Vec<u8>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Mmap),
}

impl Source {
    /// Open a file as a memory map, falling back to a plain read when the
    /// platform refuses to map it (empty files, some network mounts).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let path = path.into();
        let display_path = path.to_string_lossy().to_string();
        let file = std::fs::File::open(&path)
            .map_err(|e| IngestError::file_read_failed(display_path.clone(), e))?;
        // Safety: the map is read-only and we never hand out mutable views.
        match unsafe { Mmap::map(&file) } {
            Ok(mmap) => Ok(Source::Mapped(mmap)),
            Err(mmap_err) => {
                tracing::debug!(path = %display_path, error = %mmap_err, "mmap failed, reading into memory");
                let data = std::fs::read(&path)
                    .map_err(|e| IngestError::file_read_failed(display_path, e))?;
                Ok(Source::Memory(data))
            }
        }
    }

    /// Byte length without loading.
    pub fn len(&self) -> u64 {
        match self {
            Source::Memory(data) => data.len() as u64,
            Source::Mapped(mmap) => mmap.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the bytes.
    pub fn load(self) -> Result<LoadedBytes, IngestError> {
        match self {
            Source::Memory(data) => Ok(LoadedBytes::Owned(data)),
            Source::Mapped(mmap) => Ok(LoadedBytes::Mapped(mmap)),
        }
    }
}

/// Bytes materialized from a `Source`, borrowable as a slice either way.
#[derive(Debug)]
pub enum LoadedBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl AsRef<[u8]> for LoadedBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            LoadedBytes::Owned(data) => data,
            LoadedBytes::Mapped(mmap) => mmap,
        }
    }
}

/// Extract the ICC profile from image data so color survives re-encoding.
/// Supports JPEG (APP2 marker), PNG (iCCP chunk), and WebP (ICCP chunk).
pub fn extract_icc_profile(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 12 {
        return None;
    }

    let icc = if data[0] == 0xFF && data[1] == 0xD8 {
        Jpeg::from_bytes(Bytes::copy_from_slice(data))
            .ok()?
            .icc_profile()?
            .to_vec()
    } else if data[0..4] == [0x89, 0x50, 0x4E, 0x47] {
        Png::from_bytes(Bytes::copy_from_slice(data))
            .ok()?
            .icc_profile()?
            .to_vec()
    } else if &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        WebP::from_bytes(Bytes::copy_from_slice(data))
            .ok()?
            .icc_profile()?
            .to_vec()
    } else {
        return None;
    };

    if validate_icc_profile(&icc) {
        Some(icc)
    } else {
        // Malformed profile - drop it rather than embed garbage
        None
    }
}

/// Validate the 128-byte ICC header: size field must match the payload and
/// the signature fields must be printable ASCII.
pub(crate) fn validate_icc_profile(icc: &[u8]) -> bool {
    if icc.len() < 128 {
        return false;
    }

    let declared = u32::from_be_bytes([icc[0], icc[1], icc[2], icc[3]]) as usize;
    if declared != icc.len() {
        return false;
    }

    // CMM type, profile class, color space, PCS: all four-byte ASCII tags
    for range in [4..8, 12..16, 16..20, 20..24] {
        if !icc[range]
            .iter()
            .all(|&b| b == 0 || (32..=126).contains(&b))
        {
            return false;
        }
    }

    // Major version is 2, 4 or 5 in the wild; anything large is garbage
    icc[8] <= 10
}
