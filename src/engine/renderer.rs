// src/engine/renderer.rs
//
// Turns a decoded image into an upright, dimension-clamped surface. The clamp
// runs before the orientation transform, so codes 5-8 swap the already-clamped
// axes. Resampling goes through fast_image_resize, with the image crate as a
// fallback for pixel layouts fir does not handle.

use crate::error::{IngestError, Result};
use fast_image_resize::{self as fir, images::Image as FirImage, MulDiv, PixelType, ResizeOptions};
use image::DynamicImage;

/// An exclusively-owned pixel buffer for one pipeline run. Never shared
/// across concurrent runs.
#[derive(Debug)]
pub struct CanvasSurface {
    image: DynamicImage,
}

impl CanvasSurface {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }
}

/// Scale (width, height) so that neither axis exceeds `max_dimension`,
/// preserving aspect ratio. Dimensions already within bounds pass through.
pub fn clamp_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height);
    }
    let factor = max_dimension as f64 / longest as f64;
    let w = ((width as f64 * factor).round() as u32).max(1);
    let h = ((height as f64 * factor).round() as u32).max(1);
    (w, h)
}

/// Produce the upright surface: clamp first, then apply the EXIF orientation
/// transform. Codes outside 1-8 are treated as 1, matching the resolver's
/// advisory contract.
pub fn render_upright(
    img: DynamicImage,
    orientation: u16,
    max_dimension: u32,
) -> Result<CanvasSurface> {
    let (w, h) = (img.width(), img.height());
    let (clamped_w, clamped_h) = clamp_dimensions(w, h, max_dimension);

    let clamped = if (clamped_w, clamped_h) == (w, h) {
        img
    } else {
        tracing::debug!(from = ?(w, h), to = ?(clamped_w, clamped_h), "clamping oversized input");
        resample(&img, clamped_w, clamped_h, fir::FilterType::Lanczos3)?
    };

    let oriented = match orientation {
        2 => clamped.fliph(),
        3 => clamped.rotate180(),
        4 => clamped.flipv(),
        5 => clamped.rotate90().fliph(), // transpose
        6 => clamped.rotate90(),
        7 => clamped.rotate270().fliph(), // transverse
        8 => clamped.rotate270(),
        _ => clamped,
    };

    Ok(CanvasSurface { image: oriented })
}

/// Resize to exact target dimensions. RGB8/RGBA8 go through fast_image_resize;
/// other layouts (and fir errors) fall back to the image crate.
pub(crate) fn resample(
    img: &DynamicImage,
    dst_width: u32,
    dst_height: u32,
    filter: fir::FilterType,
) -> Result<DynamicImage> {
    if dst_width == 0 || dst_height == 0 {
        return Err(IngestError::internal("resample to zero dimensions"));
    }

    let attempt = match img {
        DynamicImage::ImageRgb8(rgb) => fir_resize(
            img.width(),
            img.height(),
            rgb.as_raw(),
            PixelType::U8x3,
            dst_width,
            dst_height,
            filter,
        )
        .and_then(|buf| {
            image::RgbImage::from_raw(dst_width, dst_height, buf).map(DynamicImage::ImageRgb8)
        }),
        DynamicImage::ImageRgba8(rgba) => fir_resize(
            img.width(),
            img.height(),
            rgba.as_raw(),
            PixelType::U8x4,
            dst_width,
            dst_height,
            filter,
        )
        .and_then(|buf| {
            image::RgbaImage::from_raw(dst_width, dst_height, buf).map(DynamicImage::ImageRgba8)
        }),
        _ => None,
    };

    if let Some(resized) = attempt {
        return Ok(resized);
    }

    // Exotic layouts and fir failures take the slower portable path
    let image_filter = match filter {
        fir::FilterType::Bilinear => image::imageops::FilterType::Triangle,
        _ => image::imageops::FilterType::Lanczos3,
    };
    Ok(img.resize_exact(dst_width, dst_height, image_filter))
}

fn fir_resize(
    src_width: u32,
    src_height: u32,
    src_pixels: &[u8],
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    filter: fir::FilterType,
) -> Option<Vec<u8>> {
    let mut src =
        FirImage::from_vec_u8(src_width, src_height, src_pixels.to_vec(), pixel_type).ok()?;
    let mut dst = FirImage::new(dst_width, dst_height, pixel_type);

    // Alpha must be premultiplied before convolution to keep edges clean
    let has_alpha = pixel_type == PixelType::U8x4;
    let mul_div = MulDiv::default();
    if has_alpha {
        mul_div.multiply_alpha_inplace(&mut src).ok()?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(filter)),
        )
        .ok()?;

    if has_alpha {
        mul_div.divide_alpha_inplace(&mut dst).ok()?;
    }

    Some(dst.into_vec())
}
