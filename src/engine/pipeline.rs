// src/engine/pipeline.rs
//
// The orchestrator. One synchronous run per input: size gate, sniff, bridge,
// orientation, decode, render, optimize, assemble. Every step can abort the
// run; no partial artifact ever escapes.

use crate::engine::bridge::{bridge_to_jpeg, LegacyDecoder, Rav1dBridge};
use crate::engine::decoder::decode_bytes;
use crate::engine::exif::orientation_from_jpeg;
use crate::engine::io::{extract_icc_profile, Source};
use crate::engine::optimizer::{optimize, OptimizerConfig};
use crate::engine::renderer::render_upright;
use crate::engine::sniffer::{sniff_format, DetectedFormat};
use crate::error::{IngestError, Result};
use base64::{engine::general_purpose, Engine as _};
use std::borrow::Cow;
use std::path::Path;

/// Budgets for one pipeline run. Defaults mirror the engine constants.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Raw-input ceiling, checked before anything else touches the bytes.
    pub upload_max: u64,
    /// Encoded-artifact byte budget handed to the optimizer.
    pub target_max: usize,
    /// Output canvas clamp on either axis.
    pub max_dimension: u32,
    /// JPEG quality for legacy-container conversion.
    pub bridge_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_max: crate::engine::UPLOAD_MAX_BYTES,
            target_max: crate::engine::TARGET_MAX_BYTES as usize,
            max_dimension: crate::engine::MAX_DIMENSION,
            bridge_quality: crate::engine::BRIDGE_QUALITY,
        }
    }
}

/// One untrusted upload: bytes, the caller's filename, and an untrusted MIME
/// hint. Consumed by a single run.
#[derive(Debug)]
pub struct RawInput {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_hint: Option<String>,
}

impl RawInput {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime_hint: None,
        }
    }

    pub fn with_mime_hint(mut self, hint: impl Into<String>) -> Self {
        self.mime_hint = Some(hint.into());
        self
    }
}

/// The only artifact that escapes a run.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Final encoded bytes.
    pub bytes: Vec<u8>,
    /// Input filename with its extension rewritten for the canonical MIME.
    pub file_name: String,
    /// Canonical MIME of `bytes`.
    pub mime: String,
    /// `data:<mime>;base64,<payload>` rendering of `bytes`.
    pub data_url: String,
    pub width: u32,
    pub height: u32,
    /// Set only when a legacy container was converted; carries the source MIME.
    pub original_format: Option<String>,
}

/// The ingest pipeline. Construct once, run many times; runs share no state.
pub struct Pipeline {
    config: PipelineConfig,
    legacy_decoder: Box<dyn LegacyDecoder>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            legacy_decoder: Box::new(Rav1dBridge),
        }
    }

    /// Swap the legacy-container decode capability, e.g. for a platform
    /// decoder that handles HEVC payloads.
    pub fn with_legacy_decoder(mut self, decoder: Box<dyn LegacyDecoder>) -> Self {
        self.legacy_decoder = decoder;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline over an on-disk file.
    pub fn process_file(&self, path: impl AsRef<Path>) -> Result<ProcessedImage> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        let source = Source::open(path)?;

        // Reject oversized files before loading costs anything
        if source.len() > self.config.upload_max {
            return Err(IngestError::too_large(source.len(), self.config.upload_max));
        }

        let loaded = source.load()?;
        self.run(loaded.as_ref(), &file_name, None)
    }

    /// Run the pipeline over in-memory bytes.
    pub fn process(&self, input: RawInput) -> Result<ProcessedImage> {
        self.run(&input.bytes, &input.file_name, input.mime_hint.as_deref())
    }

    fn run(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_hint: Option<&str>,
    ) -> Result<ProcessedImage> {
        let raw_len = bytes.len() as u64;
        if raw_len > self.config.upload_max {
            return Err(IngestError::too_large(raw_len, self.config.upload_max));
        }

        let format = sniff_format(bytes, mime_hint)?;
        tracing::debug!(format = ?format, size = raw_len, file = %file_name, "input sniffed");

        // Bridge legacy containers to JPEG working bytes
        let (working, working_format, original_format): (Cow<'_, [u8]>, _, _) =
            if format.needs_bridge() {
                let jpeg = bridge_to_jpeg(
                    bytes,
                    format,
                    self.legacy_decoder.as_ref(),
                    self.config.bridge_quality,
                )?;
                tracing::debug!(
                    from = format.mime_type(),
                    bridged_size = jpeg.len(),
                    "legacy container bridged"
                );
                (
                    Cow::Owned(jpeg),
                    DetectedFormat::Jpeg,
                    Some(format.mime_type().to_string()),
                )
            } else {
                (Cow::Borrowed(bytes), format, None)
            };

        // EXIF is advisory and JPEG-only; everything else renders as-is
        let orientation = match working_format {
            DetectedFormat::Jpeg => orientation_from_jpeg(&working),
            _ => 1,
        };

        let icc = extract_icc_profile(&working);
        let img = decode_bytes(&working, working_format)?;
        let surface = render_upright(img, orientation, self.config.max_dimension)?;

        let mime = canonical_mime(working_format);
        let optimizer_config = OptimizerConfig {
            target_max: self.config.target_max,
            ..OptimizerConfig::default()
        };
        let artifact = optimize(&surface, mime, &optimizer_config, icc.as_deref())?;

        let data_url = format!(
            "data:{};base64,{}",
            artifact.mime,
            general_purpose::STANDARD.encode(&artifact.bytes)
        );

        tracing::info!(
            file = %file_name,
            mime = %artifact.mime,
            width = artifact.width,
            height = artifact.height,
            size = artifact.len(),
            orientation,
            "pipeline run complete"
        );

        Ok(ProcessedImage {
            file_name: rewrite_extension(file_name, mime),
            mime: artifact.mime.clone(),
            data_url,
            width: artifact.width,
            height: artifact.height,
            original_format,
            bytes: artifact.bytes,
        })
    }
}

/// The output MIME for a sniffed working format. PNG stays PNG to keep
/// transparency; every lossy or legacy source re-encodes as JPEG.
fn canonical_mime(format: DetectedFormat) -> &'static str {
    match format {
        DetectedFormat::Png => "image/png",
        _ => "image/jpeg",
    }
}

/// Replace the filename extension to match the canonical MIME.
fn rewrite_extension(file_name: &str, mime: &str) -> String {
    let ext = match mime {
        "image/png" => "png",
        _ => "jpg",
    };
    let stem = match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    };
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn png_input(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 77])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn jpeg_input(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 90, 60]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn test_too_large_rejected_before_sniffing() {
        let pipeline = Pipeline::new(PipelineConfig {
            upload_max: 100,
            ..PipelineConfig::default()
        });
        // Not even a valid image: the size gate must fire first
        let err = pipeline
            .process(RawInput::new(vec![0u8; 101], "big.bin"))
            .unwrap_err();
        match err {
            IngestError::TooLarge { size, max } => {
                assert_eq!(size, 101);
                assert_eq!(max, 100);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_png_stays_png() {
        let out = Pipeline::default()
            .process(RawInput::new(png_input(20, 10), "photo.png"))
            .unwrap();
        assert_eq!(out.mime, "image/png");
        assert_eq!(out.file_name, "photo.png");
        assert_eq!((out.width, out.height), (20, 10));
        assert_eq!(out.original_format, None);
        assert!(out.data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_jpeg_passthrough_unset_original_format() {
        let out = Pipeline::default()
            .process(RawInput::new(jpeg_input(16, 16), "shot.jpeg"))
            .unwrap();
        assert_eq!(out.mime, "image/jpeg");
        assert_eq!(out.file_name, "shot.jpg");
        assert_eq!(out.original_format, None);
        assert_eq!(&out.bytes[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_webp_reencodes_as_jpeg() {
        let rgb: Vec<u8> = std::iter::repeat([200u8, 100, 50])
            .take(12 * 8)
            .flatten()
            .collect();
        let bytes = webp::Encoder::from_rgb(&rgb, 12, 8).encode_lossless().to_vec();
        let out = Pipeline::default()
            .process(RawInput::new(bytes, "sticker.webp"))
            .unwrap();
        assert_eq!(out.mime, "image/jpeg");
        assert_eq!(out.file_name, "sticker.jpg");
    }

    #[test]
    fn test_oriented_jpeg_swaps_dimensions() {
        let jpeg = crate::engine::exif::tests::jpeg_with_orientation_and_size(6, 40, 30, false);
        let out = Pipeline::default()
            .process(RawInput::new(jpeg, "rotated.jpg"))
            .unwrap();
        assert_eq!((out.width, out.height), (30, 40));
    }

    #[test]
    fn test_bridged_heic_sets_original_format() {
        struct StubDecoder;
        impl crate::engine::bridge::LegacyDecoder for StubDecoder {
            fn decode(&self, _bytes: &[u8]) -> crate::error::Result<image::DynamicImage> {
                Ok(image::DynamicImage::ImageRgb8(RgbImage::from_fn(
                    24,
                    18,
                    |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 50]),
                )))
            }
        }

        let mut bytes = vec![0u8; 64];
        bytes[3] = 64;
        bytes[4..8].copy_from_slice(b"ftyp");
        bytes[8..12].copy_from_slice(b"heic");

        let out = Pipeline::default()
            .with_legacy_decoder(Box::new(StubDecoder))
            .process(RawInput::new(bytes, "photo.heic"))
            .unwrap();
        assert_eq!(out.original_format.as_deref(), Some("image/heic"));
        assert_eq!(out.mime, "image/jpeg");
        assert_eq!(out.file_name, "photo.jpg");
        assert_eq!((out.width, out.height), (24, 18));
    }

    #[test]
    fn test_unbridgeable_heic_escalates() {
        // ftyp box claiming heic, nothing decodable inside
        let mut bytes = vec![0u8; 64];
        bytes[3] = 64;
        bytes[4..8].copy_from_slice(b"ftyp");
        bytes[8..12].copy_from_slice(b"heic");
        let err = Pipeline::default()
            .process(RawInput::new(bytes, "photo.heic"))
            .unwrap_err();
        match err {
            IngestError::ConversionFailed { format } => assert_eq!(format, "image/heic"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let err = Pipeline::default()
            .process(RawInput::new(b"not an image at all".to_vec(), "x.txt"))
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_rewrite_extension() {
        assert_eq!(rewrite_extension("a.heic", "image/jpeg"), "a.jpg");
        assert_eq!(rewrite_extension("noext", "image/png"), "noext.png");
        assert_eq!(rewrite_extension(".hidden", "image/jpeg"), ".hidden.jpg");
        assert_eq!(rewrite_extension("two.dots.png", "image/png"), "two.dots.png");
    }

    #[test]
    fn test_process_file_roundtrip() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::with_suffix(".png").unwrap();
        tmp.write_all(&png_input(8, 8)).unwrap();
        tmp.flush().unwrap();
        let out = Pipeline::default().process_file(tmp.path()).unwrap();
        assert_eq!(out.mime, "image/png");
        assert_eq!((out.width, out.height), (8, 8));
    }
}
