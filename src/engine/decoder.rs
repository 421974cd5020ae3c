// src/engine/decoder.rs
//
// Raster decode routing: JPEG via mozjpeg, PNG via zune-png, WebP via libwebp,
// with the image crate as the general fallback. Dimension guards run on header
// metadata before pixels are allocated.

use crate::engine::common::run_with_panic_policy;
use crate::engine::sniffer::DetectedFormat;
use crate::engine::{DECODE_MAX_DIMENSION, MAX_PIXELS};
use crate::error::{IngestError, Result};
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use mozjpeg::Decompress;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// Decode working bytes whose format was already established by the sniffer.
/// Legacy containers must be bridged to JPEG before they get here.
pub fn decode_bytes(bytes: &[u8], format: DetectedFormat) -> Result<DynamicImage> {
    match format {
        DetectedFormat::Jpeg => decode_jpeg_mozjpeg(bytes),
        DetectedFormat::Png => decode_png_zune(bytes),
        DetectedFormat::WebP => decode_webp_libwebp(bytes),
        DetectedFormat::Heic | DetectedFormat::Heif | DetectedFormat::Avif => Err(
            IngestError::internal("legacy container reached the raster layer unbridged"),
        ),
    }
}

/// Reject decompression bombs before pixel allocation.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(IngestError::decode_failed("image has a zero dimension"));
    }
    if width > DECODE_MAX_DIMENSION || height > DECODE_MAX_DIMENSION {
        return Err(IngestError::decode_failed(format!(
            "image dimension {} exceeds maximum {}",
            width.max(height),
            DECODE_MAX_DIMENSION
        )));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(IngestError::decode_failed(format!(
            "image pixel count {pixels} exceeds maximum {MAX_PIXELS}"
        )));
    }
    Ok(())
}

/// Decode JPEG using mozjpeg (libjpeg-turbo). Much faster than pure Rust.
fn decode_jpeg_mozjpeg(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:jpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(IngestError::decode_failed("jpeg: missing EOI marker"));
        }

        let decompress = Decompress::new_mem(data)
            .map_err(|e| IngestError::decode_failed(format!("jpeg: init failed: {e:?}")))?;
        let mut decompress = decompress
            .rgb()
            .map_err(|e| IngestError::decode_failed(format!("jpeg: rgb conversion failed: {e:?}")))?;

        let width = decompress.width() as u32;
        let height = decompress.height() as u32;
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress
            .read_scanlines()
            .map_err(|e| IngestError::decode_failed(format!("jpeg: scanline read failed: {e:?}")))?;
        let flat: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| IngestError::decode_failed("jpeg: raw buffer size mismatch"))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
fn decode_png_zune(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(data, options);
        let pixels = decoder
            .decode()
            .map_err(|e| IngestError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .get_info()
            .ok_or_else(|| IngestError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => return Err(IngestError::decode_failed("png: unexpected non-U8 buffer")),
        };

        let colorspace = decoder
            .get_colorspace()
            .ok_or_else(|| IngestError::decode_failed("png: missing colorspace"))?;

        match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| IngestError::decode_failed("png: failed to build RGB image")),
            ColorSpace::RGBA | ColorSpace::YCbCr | ColorSpace::BGRA | ColorSpace::ARGB => {
                RgbaImage::from_raw(width, height, buf)
                    .map(DynamicImage::ImageRgba8)
                    .ok_or_else(|| IngestError::decode_failed("png: failed to build RGBA image"))
            }
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| IngestError::decode_failed("png: failed to build Luma image")),
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| IngestError::decode_failed("png: failed to build LumaA image")),
            other => Err(IngestError::decode_failed(format!(
                "png: unsupported colorspace {other:?}"
            ))),
        }
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate
/// (first frame), since the simple libwebp decoder has no animation support.
fn decode_webp_libwebp(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        let features = BitstreamFeatures::new(data)
            .ok_or_else(|| IngestError::decode_failed("webp: unreadable bitstream header"))?;

        if features.has_animation() {
            return decode_with_image_crate(data);
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| IngestError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// General decode through the image crate. Used for animated WebP and as the
/// bridge's last-resort path.
pub(crate) fn decode_with_image_crate(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        let img = image::load_from_memory(data)
            .map_err(|e| IngestError::decode_failed(format!("decode failed: {e}")))?;
        check_dimensions(img.width(), img.height())?;
        Ok(img)
    })
}
