// src/engine/sniffer.rs
//
// Format classification from magic bytes. Reported MIME types are frequently
// wrong or absent (Android, HEIC), so the signature always wins; the caller's
// hint is consulted only when no signature matches.

use crate::error::{IngestError, Result};

/// Image format established from leading byte signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Jpeg,
    Png,
    WebP,
    Heic,
    Heif,
    Avif,
}

impl DetectedFormat {
    /// Canonical MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Heic => "image/heic",
            Self::Heif => "image/heif",
            Self::Avif => "image/avif",
        }
    }

    /// True for container formats the raster layer cannot decode directly;
    /// these go through the legacy codec bridge first.
    pub fn needs_bridge(&self) -> bool {
        matches!(self, Self::Heic | Self::Heif | Self::Avif)
    }

    /// Classify raw bytes by signature alone. `None` when nothing matches.
    ///
    /// Checks run in fixed priority order: JPEG SOI, PNG, RIFF/WebP, then
    /// ISO-BMFF `ftyp` brand inspection.
    pub fn from_signature(bytes: &[u8]) -> Option<Self> {
        if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
            return Some(Self::Jpeg);
        }
        if bytes.len() >= 4 && bytes[0..4] == [0x89, 0x50, 0x4E, 0x47] {
            return Some(Self::Png);
        }
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(Self::WebP);
        }
        Self::from_ftyp_brand(bytes)
    }

    /// Inspect an ISO-BMFF `ftyp` box for HEIC/HEIF/AVIF brand substrings.
    /// The scan is bounded by the declared box size and the buffer length.
    fn from_ftyp_brand(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
            return None;
        }
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        // Malformed sizes must not push the scan past the buffer
        let end = declared.clamp(12, bytes.len().min(64));
        let box_bytes = &bytes[8..end];

        let has = |brand: &[u8]| box_bytes.windows(brand.len()).any(|w| w == brand);

        if has(b"heic") || has(b"heix") {
            Some(Self::Heic)
        } else if has(b"heif") {
            Some(Self::Heif)
        } else if has(b"avif") {
            Some(Self::Avif)
        } else {
            None
        }
    }

    /// Last-resort classification from a caller-supplied MIME hint.
    fn from_mime(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            "image/heic" => Some(Self::Heic),
            "image/heif" => Some(Self::Heif),
            "image/avif" => Some(Self::Avif),
            _ => None,
        }
    }
}

/// Classify the input, preferring byte signatures over the untrusted hint.
///
/// Truncated headers and unrecognized bytes surface as `UnsupportedFormat`,
/// never a panic.
pub fn sniff_format(bytes: &[u8], mime_hint: Option<&str>) -> Result<DetectedFormat> {
    if let Some(format) = DetectedFormat::from_signature(bytes) {
        tracing::debug!(format = ?format, "format sniffed from signature");
        return Ok(format);
    }

    if let Some(hint) = mime_hint {
        if let Some(format) = DetectedFormat::from_mime(hint) {
            tracing::debug!(format = ?format, hint, "no signature match, trusting MIME hint");
            return Ok(format);
        }
    }

    Err(IngestError::unsupported_format(
        mime_hint
            .map(|h| h.to_string())
            .unwrap_or_else(|| "no signature match, no MIME hint".to_string()),
    ))
}
