// lib.rs
//
// imgingest: canonical ingest for untrusted image uploads
//
// Takes arbitrary bytes from any device and produces an upright,
// size-bounded artifact ready for upload or canvas editing:
// - Format established from magic bytes, never from the caller's MIME
// - HEIC/HEIF/AVIF bridged to JPEG through a pluggable decode capability
// - EXIF orientation resolved by a bounds-checked byte walk, applied once
// - Output bounded by a two-phase quality-then-resolution search

pub mod engine;
pub mod error;

pub use engine::{
    LegacyDecoder, Pipeline, PipelineConfig, ProcessedImage, RawInput, Source,
};
pub use error::{ErrorCategory, IngestError, Result};

/// Process one in-memory upload with default budgets.
pub fn process(input: RawInput) -> Result<ProcessedImage> {
    Pipeline::default().process(input)
}

/// Process one on-disk file with default budgets.
pub fn process_file(path: impl AsRef<std::path::Path>) -> Result<ProcessedImage> {
    Pipeline::default().process_file(path)
}
