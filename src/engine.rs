// src/engine.rs
//
// The core of imgingest. One synchronous pipeline run per input:
// 1. Gate raw size, sniff the true format from magic bytes
// 2. Bridge legacy containers (HEIC/HEIF/AVIF) to JPEG
// 3. Resolve EXIF orientation, render an upright clamped surface
// 4. Search quality then resolution until the artifact fits the byte budget
//
// This file is a facade that delegates to the decomposed modules in engine/

// =============================================================================
// DEFAULT BUDGETS
// =============================================================================

/// Default raw-input ceiling. Anything larger is rejected before sniffing.
pub const UPLOAD_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default encoded-artifact budget. 3.5 MB, chosen so the ~33% base64
/// expansion of a data URL stays under a 4.5 MB transport ceiling.
pub const TARGET_MAX_BYTES: u64 = 7 * 1024 * 1024 / 2;

/// Default canvas clamp. Neither output axis ever exceeds this.
pub const MAX_DIMENSION: u32 = 4096;

/// Fixed quality for legacy-container conversion to JPEG.
pub const BRIDGE_QUALITY: u8 = 90;

// =============================================================================
// SECURITY LIMITS (not configuration - decompression bomb guards)
// =============================================================================

/// Maximum dimension accepted from a decoder's header, on either axis.
/// Larger claims are rejected before pixel allocation.
pub const DECODE_MAX_DIMENSION: u32 = 16384;

/// Maximum total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA. Beyond this is likely malicious.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod bridge;
mod common;
mod decoder;
mod encoder;
mod exif;
mod io;
mod optimizer;
mod pipeline;
mod renderer;
mod sniffer;

pub use bridge::{LegacyDecoder, Rav1dBridge};
pub use decoder::{check_dimensions, decode_bytes};
pub use encoder::{embed_icc_jpeg, embed_icc_png, encode_jpeg, encode_png, encode_surface};
pub use exif::orientation_from_jpeg;
pub use io::{extract_icc_profile, Source};
pub use optimizer::{optimize, EncodedArtifact, OptimizerConfig};
pub use pipeline::{Pipeline, PipelineConfig, ProcessedImage, RawInput};
pub use renderer::{clamp_dimensions, render_upright, CanvasSurface};
pub use sniffer::{sniff_format, DetectedFormat};
