// src/engine/encoder.rs
//
// Encode targets for the ingest pipeline: JPEG via mozjpeg, PNG via the image
// crate recompressed with oxipng. ICC profiles are embedded with img-parts.

use crate::engine::common::run_with_panic_policy;
use crate::error::{IngestError, Result};
use image::{DynamicImage, ImageFormat};
use img_parts::{jpeg::Jpeg, png::Png, ImageICC};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;

/// Encode a surface for the target MIME. Quality applies to JPEG only; PNG is
/// lossless. Unknown target MIMEs are an internal invariant violation - the
/// orchestrator only routes canonical MIMEs here.
pub fn encode_surface(
    img: &DynamicImage,
    mime: &str,
    quality: u8,
    icc: Option<&[u8]>,
) -> Result<Vec<u8>> {
    match mime {
        "image/jpeg" => encode_jpeg(img, quality, icc),
        "image/png" => encode_png(img, icc),
        other => Err(IngestError::internal(format!(
            "no encoder for target MIME {other}"
        ))),
    }
}

/// Encode to JPEG using mozjpeg with web-optimized settings: progressive,
/// optimized coding, 4:2:0 chroma subsampling.
pub fn encode_jpeg(img: &DynamicImage, quality: u8, icc: Option<&[u8]>) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let quality = quality.min(100);

        // Avoid conversion when already RGB8
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        if w == 0 || h == 0 {
            return Err(IngestError::encode_failed("jpeg", "zero-sized surface"));
        }
        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(IngestError::encode_failed("jpeg", "pixel buffer mismatch"));
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality as f32);
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);

        let estimated = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated);
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                IngestError::encode_failed("jpeg", format!("start compress failed: {e:?}"))
            })?;
            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    IngestError::encode_failed("jpeg", format!("scanline write failed: {e:?}"))
                })?;
            }
            writer.finish().map_err(|e| {
                IngestError::encode_failed("jpeg", format!("finish failed: {e:?}"))
            })?;
        }

        if let Some(icc_data) = icc {
            embed_icc_jpeg(output, icc_data)
        } else {
            Ok(output)
        }
    })
}

/// Embed an ICC profile into JPEG as an APP2 ICC_PROFILE segment.
pub fn embed_icc_jpeg(jpeg_data: Vec<u8>, icc: &[u8]) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg:embed_icc", || {
        use img_parts::jpeg::{markers::APP2, JpegSegment};
        use img_parts::Bytes;

        let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg_data))
            .map_err(|e| IngestError::encode_failed("jpeg", format!("reparse for ICC: {e}")))?;

        let mut marker_data = Vec::with_capacity(14 + icc.len());
        marker_data.extend_from_slice(b"ICC_PROFILE\0");
        marker_data.push(1); // chunk index
        marker_data.push(1); // chunk count
        marker_data.extend_from_slice(icc);

        let segment = JpegSegment::new_with_contents(APP2, Bytes::from(marker_data));
        jpeg.segments_mut().insert(0, segment);

        let mut output = Vec::new();
        jpeg.encoder()
            .write_to(&mut output)
            .map_err(|e| IngestError::encode_failed("jpeg", format!("write with ICC: {e}")))?;
        Ok(output)
    })
}

/// Encode to PNG, then recompress losslessly with oxipng.
pub fn encode_png(img: &DynamicImage, icc: Option<&[u8]>) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| IngestError::encode_failed("png", format!("encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(2);
        options.strip = oxipng::StripChunks::None;

        let optimized = oxipng::optimize_from_memory(&buf, &options)
            .map_err(|e| IngestError::encode_failed("png", format!("oxipng failed: {e}")))?;

        if let Some(icc_data) = icc {
            embed_icc_png(optimized, icc_data)
        } else {
            Ok(optimized)
        }
    })
}

/// Embed an ICC profile into PNG as an iCCP chunk.
pub fn embed_icc_png(png_data: Vec<u8>, icc: &[u8]) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png:embed_icc", || {
        use img_parts::Bytes;

        let mut png = Png::from_bytes(Bytes::from(png_data))
            .map_err(|e| IngestError::encode_failed("png", format!("reparse for ICC: {e}")))?;
        png.set_icc_profile(Some(Bytes::copy_from_slice(icc)));

        let mut output = Vec::new();
        png.encoder()
            .write_to(&mut output)
            .map_err(|e| IngestError::encode_failed("png", format!("write with ICC: {e}")))?;
        Ok(output)
    })
}
