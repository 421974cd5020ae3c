// src/engine/optimizer.rs
//
// Bounded two-phase size search. Phase A lowers JPEG quality on the same
// surface; Phase B redraws at shrinking scales with bilinear resampling and a
// fixed quality. Quality goes first since it costs less fidelity than losing
// pixels. Both phases have hard iteration caps, and the smallest artifact
// found is returned even when it still misses the budget.

use crate::engine::encoder::encode_surface;
use crate::engine::renderer::{resample, CanvasSurface};
use crate::error::Result;
use fast_image_resize as fir;
use image::DynamicImage;

/// Hard cap on quality-phase re-encodes, independent of the configured step.
const MAX_QUALITY_STEPS: u32 = 4;

/// Hard cap on scale-phase redraws, independent of the configured step.
const MAX_SCALE_STEPS: u32 = 5;

/// Search parameters. Defaults mirror the engine constants; tests and hosts
/// can tighten the budget without touching the engine.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Encoded byte budget the search aims for.
    pub target_max: usize,
    /// Opening quality for the quality phase.
    pub start_quality: u8,
    /// Quality floor; the search never encodes below this.
    pub min_quality: u8,
    pub quality_step: u8,
    /// Fixed quality used for every encode in the scale phase.
    pub scale_quality: u8,
    /// Opening scale factor for the scale phase.
    pub start_scale: f32,
    /// Scale floor, exclusive: scales at or below this are not attempted.
    pub min_scale: f32,
    pub scale_step: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            target_max: crate::engine::TARGET_MAX_BYTES as usize,
            start_quality: 90,
            min_quality: 50,
            quality_step: 10,
            scale_quality: 80,
            start_scale: 0.9,
            min_scale: 0.4,
            scale_step: 0.1,
        }
    }
}

/// One encoded candidate from the search.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

impl EncodedArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Run the size search for `surface` against the target MIME.
///
/// The baseline encode at the opening quality counts as iteration zero; a
/// surface already under budget returns immediately with no further encodes.
/// PNG has no quality knob, so PNG targets skip straight to the scale phase.
pub fn optimize(
    surface: &CanvasSurface,
    mime: &str,
    config: &OptimizerConfig,
    icc: Option<&[u8]>,
) -> Result<EncodedArtifact> {
    optimize_with(surface, mime, config, |img, quality| {
        encode_surface(img, mime, quality, icc)
    })
}

/// The search itself, generic over the encode step so tests can observe it.
///
/// Each phase runs under a hard iteration cap, so the search terminates for
/// every configuration, including degenerate zero steps.
fn optimize_with<F>(
    surface: &CanvasSurface,
    mime: &str,
    config: &OptimizerConfig,
    mut encode: F,
) -> Result<EncodedArtifact>
where
    F: FnMut(&DynamicImage, u8) -> Result<Vec<u8>>,
{
    let img = surface.image();
    let lossless = mime == "image/png";

    let baseline = encode(img, config.start_quality)?;
    let mut best = EncodedArtifact {
        bytes: baseline,
        mime: mime.to_string(),
        width: surface.width(),
        height: surface.height(),
    };
    if best.len() <= config.target_max {
        return Ok(best);
    }

    // Phase A: quality only, same pixels
    if !lossless {
        let mut quality = config.start_quality;
        for _ in 0..MAX_QUALITY_STEPS {
            if best.len() <= config.target_max || quality <= config.min_quality {
                break;
            }
            quality = quality.saturating_sub(config.quality_step).max(config.min_quality);
            let candidate = encode(img, quality)?;
            tracing::debug!(quality, size = candidate.len(), "quality phase encode");
            if candidate.len() < best.len() {
                best.bytes = candidate;
            }
        }
        if best.len() <= config.target_max {
            return Ok(best);
        }
    }

    // Phase B: shrink the canvas, fixed quality
    let mut scale = config.start_scale;
    for _ in 0..MAX_SCALE_STEPS {
        if best.len() <= config.target_max || scale <= config.min_scale + f32::EPSILON {
            break;
        }
        let dst_w = ((surface.width() as f32 * scale).round() as u32).max(1);
        let dst_h = ((surface.height() as f32 * scale).round() as u32).max(1);
        let shrunk = resample(img, dst_w, dst_h, fir::FilterType::Bilinear)?;
        let candidate = encode(&shrunk, config.scale_quality)?;
        tracing::debug!(scale, size = candidate.len(), "scale phase encode");
        if candidate.len() < best.len() {
            best = EncodedArtifact {
                bytes: candidate,
                mime: mime.to_string(),
                width: dst_w,
                height: dst_h,
            };
        }
        scale -= config.scale_step;
    }

    if best.len() > config.target_max {
        tracing::warn!(
            size = best.len(),
            target = config.target_max,
            "accepting over-budget artifact at floor parameters"
        );
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::renderer::render_upright;
    use image::{DynamicImage, Rgb, RgbImage};

    fn surface(width: u32, height: u32) -> CanvasSurface {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                (x * 7 % 256) as u8,
                (y * 13 % 256) as u8,
                ((x + y) * 3 % 256) as u8,
            ])
        }));
        render_upright(img, 1, 8192).unwrap()
    }

    #[test]
    fn test_small_input_is_single_encode() {
        let s = surface(64, 64);
        let out = optimize(&s, "image/jpeg", &OptimizerConfig::default(), None).unwrap();
        assert!(out.len() <= OptimizerConfig::default().target_max);
        assert_eq!((out.width, out.height), (64, 64));
        // Identical to a direct baseline encode: no search ran
        let direct = crate::engine::encoder::encode_jpeg(s.image(), 90, None).unwrap();
        assert_eq!(out.bytes, direct);
    }

    #[test]
    fn test_quality_phase_meets_tight_budget() {
        let s = surface(300, 300);
        let baseline = crate::engine::encoder::encode_jpeg(s.image(), 90, None).unwrap();
        let floor = crate::engine::encoder::encode_jpeg(s.image(), 50, None).unwrap();
        // A budget between the floor and the baseline is reachable by quality alone
        let config = OptimizerConfig {
            target_max: (floor.len() + baseline.len()) / 2,
            ..OptimizerConfig::default()
        };
        let out = optimize(&s, "image/jpeg", &config, None).unwrap();
        assert!(out.len() <= config.target_max);
        assert_eq!((out.width, out.height), (300, 300));
    }

    #[test]
    fn test_scale_phase_shrinks_dimensions() {
        let s = surface(400, 400);
        // Impossible budget: both phases run to the floor, best effort wins
        let config = OptimizerConfig {
            target_max: 1,
            ..OptimizerConfig::default()
        };
        let out = optimize(&s, "image/jpeg", &config, None).unwrap();
        assert!(out.width < 400 && out.height < 400);
        // Floor scale is exclusive at 0.4, so 0.5 is the smallest canvas
        assert!(out.width >= 200 && out.height >= 200);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_png_skips_quality_phase() {
        let s = surface(200, 200);
        let config = OptimizerConfig {
            target_max: 1,
            ..OptimizerConfig::default()
        };
        let out = optimize(&s, "image/png", &config, None).unwrap();
        assert_eq!(out.mime, "image/png");
        assert_eq!(&out.bytes[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        assert!(out.width < 200);
    }

    /// Encode stub that never fits the budget, counting every invocation.
    fn oversized_encode(counter: &std::cell::Cell<u32>) -> impl FnMut(&DynamicImage, u8) -> crate::error::Result<Vec<u8>> + '_ {
        move |_img, _quality| {
            counter.set(counter.get() + 1);
            Ok(vec![0u8; 1_000_000])
        }
    }

    #[test]
    fn test_iteration_bound_observed() {
        // Unreachable budget: both phases run to their caps.
        // 1 baseline + 4 quality re-encodes + 5 scale redraws.
        let s = surface(64, 64);
        let config = OptimizerConfig {
            target_max: 1,
            ..OptimizerConfig::default()
        };
        let encodes = std::cell::Cell::new(0u32);
        optimize_with(&s, "image/jpeg", &config, oversized_encode(&encodes)).unwrap();
        assert_eq!(encodes.get(), 10);
    }

    #[test]
    fn test_zero_steps_still_terminate() {
        // Degenerate config: neither quality nor scale ever advances, so the
        // per-phase caps are the only thing ending the search
        let s = surface(64, 64);
        let config = OptimizerConfig {
            target_max: 1,
            quality_step: 0,
            scale_step: 0.0,
            ..OptimizerConfig::default()
        };
        let encodes = std::cell::Cell::new(0u32);
        let out = optimize_with(&s, "image/jpeg", &config, oversized_encode(&encodes)).unwrap();
        assert_eq!(encodes.get(), 10);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_fitting_encode_stops_the_search() {
        // The second encode fits: no further iterations after it
        let s = surface(64, 64);
        let config = OptimizerConfig {
            target_max: 100,
            ..OptimizerConfig::default()
        };
        let encodes = std::cell::Cell::new(0u32);
        let out = optimize_with(&s, "image/jpeg", &config, |_img, _quality| {
            encodes.set(encodes.get() + 1);
            let size = if encodes.get() >= 2 { 50 } else { 1_000 };
            Ok(vec![0u8; size])
        })
        .unwrap();
        assert_eq!(encodes.get(), 2);
        assert_eq!(out.len(), 50);
    }
}
