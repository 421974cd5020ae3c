// src/engine/bridge.rs
//
// Legacy codec bridge: converts containers the raster layer cannot decode
// (HEIC/HEIF/AVIF) into a JPEG byte stream. The decode capability is a trait
// so hosts can plug in a platform decoder; the default uses avif-parse for the
// ISO-BMFF container and rav1d for the AV1 payload. The image crate's "avif"
// feature is encode-only, and real HEVC (HEIC/HEIF) decode has no pure-Rust
// implementation, so HEIC takes the escalation path unless the host supplies
// a capable decoder.

use crate::engine::common::run_with_panic_policy;
use crate::engine::decoder::{check_dimensions, decode_with_image_crate};
use crate::engine::encoder::encode_jpeg;
use crate::engine::sniffer::DetectedFormat;
use crate::error::{IngestError, Result};
use image::DynamicImage;

/// Collaborator capability: decode a legacy container to raw pixels.
pub trait LegacyDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage>;
}

/// Default bridge decoder: AVIF via avif-parse + rav1d.
#[derive(Debug, Default)]
pub struct Rav1dBridge;

impl LegacyDecoder for Rav1dBridge {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        run_with_panic_policy("bridge:rav1d", || decode_avif(bytes))
    }
}

/// Convert legacy-container bytes to JPEG at the fixed conversion quality.
///
/// Two-step escalation: the capability decoder first, then one last-resort
/// pass through the image crate's general loader. Only when both are
/// exhausted does the terminal `ConversionFailed` surface.
pub(crate) fn bridge_to_jpeg(
    bytes: &[u8],
    format: DetectedFormat,
    decoder: &dyn LegacyDecoder,
    quality: u8,
) -> Result<Vec<u8>> {
    let img = match decoder.decode(bytes) {
        Ok(img) => img,
        Err(primary) => {
            tracing::debug!(
                format = ?format,
                error = %primary,
                "bridge decoder failed, trying general loader"
            );
            let fallback = decode_with_image_crate(bytes)
                .map_err(|_| IngestError::conversion_failed(format.mime_type()))?;
            // Some loaders "succeed" on unsupported variants by handing back an
            // empty frame. A corrupted artifact is worse than a clean failure.
            if looks_blank(&fallback) {
                tracing::warn!(format = ?format, "fallback decode produced a blank frame");
                return Err(IngestError::conversion_failed(format.mime_type()));
            }
            fallback
        }
    };

    check_dimensions(img.width(), img.height())?;
    encode_jpeg(&img, quality, None)
}

/// Near-uniform output detection for the fallback path. Samples a pixel grid
/// and reports true when every sampled channel sits within a 2-level band.
fn looks_blank(img: &DynamicImage) -> bool {
    let (w, h) = (img.width(), img.height());
    if w * h <= 1 {
        return false;
    }
    let rgb = img.to_rgb8();
    let step_x = (w / 16).max(1);
    let step_y = (h / 16).max(1);

    let mut min = [u8::MAX; 3];
    let mut max = [u8::MIN; 3];
    for y in (0..h).step_by(step_y as usize) {
        for x in (0..w).step_by(step_x as usize) {
            let p = rgb.get_pixel(x, y).0;
            for c in 0..3 {
                min[c] = min[c].min(p[c]);
                max[c] = max[c].max(p[c]);
            }
        }
    }
    (0..3).all(|c| max[c] - min[c] <= 2)
}

/// Decode an AVIF byte buffer using avif-parse (container) + rav1d (AV1).
fn decode_avif(bytes: &[u8]) -> Result<DynamicImage> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::headers::{
        DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
        DAV1D_PIXEL_LAYOUT_I444,
    };
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut std::io::Cursor::new(bytes))
        .map_err(|e| IngestError::decode_failed(format!("avif: container parse failed: {e:?}")))?;
    let av1_bytes: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe {
        rav1d::src::lib::dav1d_default_settings(NonNull::new(settings.as_mut_ptr()).unwrap())
    };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc =
        unsafe { rav1d::src::lib::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(IngestError::decode_failed(format!(
            "avif: rav1d open failed ({})",
            rc.0
        )));
    }

    let mut data = Dav1dData::default();
    let buf_ptr =
        unsafe { rav1d::src::lib::dav1d_data_create(NonNull::new(&mut data), av1_bytes.len()) };
    if buf_ptr.is_null() {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(IngestError::decode_failed("avif: rav1d data_create failed"));
    }
    unsafe { std::ptr::copy_nonoverlapping(av1_bytes.as_ptr(), buf_ptr, av1_bytes.len()) };

    let rc = unsafe { rav1d::src::lib::dav1d_send_data(ctx, NonNull::new(&mut data)) };
    if rc.0 != 0 {
        unsafe {
            rav1d::src::lib::dav1d_data_unref(NonNull::new(&mut data));
            rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
        }
        return Err(IngestError::decode_failed(format!(
            "avif: rav1d send_data failed ({})",
            rc.0
        )));
    }

    let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
    let rc = unsafe { rav1d::src::lib::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
    if rc.0 != 0 {
        unsafe { rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx)) };
        return Err(IngestError::decode_failed(format!(
            "avif: rav1d get_picture failed ({})",
            rc.0
        )));
    }

    let w = pic.p.w as u32;
    let h = pic.p.h as u32;
    let bpc = pic.p.bpc as u32;
    let layout = pic.p.layout;
    let y_stride = pic.stride[0];
    let uv_stride = pic.stride[1];
    let y_ptr = pic.data[0].unwrap().as_ptr() as *const u8;

    let rgb = if layout == DAV1D_PIXEL_LAYOUT_I400 {
        YuvPlanes {
            y_ptr,
            u_ptr: y_ptr,
            v_ptr: y_ptr,
            y_stride,
            uv_stride: 0,
            width: w,
            height: h,
            bpc,
            ss_x: false,
            ss_y: false,
            monochrome: true,
        }
        .to_rgb()
    } else {
        let u_ptr = pic.data[1].unwrap().as_ptr() as *const u8;
        let v_ptr = pic.data[2].unwrap().as_ptr() as *const u8;
        let (ss_x, ss_y) = match layout {
            DAV1D_PIXEL_LAYOUT_I420 => (true, true),
            DAV1D_PIXEL_LAYOUT_I422 => (true, false),
            DAV1D_PIXEL_LAYOUT_I444 => (false, false),
            _ => {
                unsafe {
                    rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
                    rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
                }
                return Err(IngestError::decode_failed(format!(
                    "avif: unsupported pixel layout {layout}"
                )));
            }
        };
        YuvPlanes {
            y_ptr,
            u_ptr,
            v_ptr,
            y_stride,
            uv_stride,
            width: w,
            height: h,
            bpc,
            ss_x,
            ss_y,
            monochrome: false,
        }
        .to_rgb()
    };

    unsafe {
        rav1d::src::lib::dav1d_picture_unref(NonNull::new(&mut pic));
        rav1d::src::lib::dav1d_close(NonNull::new(&mut ctx));
    }

    image::RgbImage::from_raw(w, h, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| IngestError::decode_failed("avif: decoded buffer size mismatch"))
}

/// Decoded YUV plane pointers from rav1d, ready for RGB conversion.
struct YuvPlanes {
    y_ptr: *const u8,
    u_ptr: *const u8,
    v_ptr: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling: horizontal, vertical (I420 = true, true)
    ss_x: bool,
    ss_y: bool,
    monochrome: bool,
}

impl YuvPlanes {
    /// Interleave to RGB8 using BT.601 coefficients, scaling 10/12-bit down.
    fn to_rgb(&self) -> Vec<u8> {
        let max_val = ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let scale = 255.0 / max_val;

        let mut rgb = vec![0u8; (self.width * self.height * 3) as usize];

        for row in 0..self.height {
            for col in 0..self.width {
                let y_val = read_plane(self.y_ptr, self.y_stride, col, row, self.bpc);

                let (r, g, b) = if self.monochrome {
                    let v = (y_val * scale).clamp(0.0, 255.0);
                    (v, v, v)
                } else {
                    let u_col = if self.ss_x { col / 2 } else { col };
                    let u_row = if self.ss_y { row / 2 } else { row };
                    let cb = read_plane(self.u_ptr, self.uv_stride, u_col, u_row, self.bpc);
                    let cr = read_plane(self.v_ptr, self.uv_stride, u_col, u_row, self.bpc);

                    let cb_f = cb - center;
                    let cr_f = cr - center;

                    (
                        ((y_val + 1.402 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val - 0.344136 * cb_f - 0.714136 * cr_f) * scale).clamp(0.0, 255.0),
                        ((y_val + 1.772 * cb_f) * scale).clamp(0.0, 255.0),
                    )
                };

                let idx = ((row * self.width + col) * 3) as usize;
                rgb[idx] = r as u8;
                rgb[idx + 1] = g as u8;
                rgb[idx + 2] = b as u8;
            }
        }

        rgb
    }
}

/// Read one sample from a YUV plane, handling 8-bit and 16-bit storage.
#[inline]
fn read_plane(ptr: *const u8, stride: isize, x: u32, y: u32, bpc: u32) -> f32 {
    if bpc <= 8 {
        (unsafe { *ptr.offset(y as isize * stride + x as isize) }) as f32
    } else {
        // 10-bit and 12-bit samples are stored as u16
        let byte_offset = y as isize * stride + x as isize * 2;
        (unsafe { *(ptr.offset(byte_offset) as *const u16) }) as f32
    }
}
