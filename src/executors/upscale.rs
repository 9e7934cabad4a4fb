//! Upscale executor: learned 2× RGB super-resolution with an independently
//! bilinearly-upscaled alpha channel.
//!
//! The SR capability operates on RGB only, so alpha travels separately: the
//! source alpha becomes a grayscale image, is bilinearly scaled 2×, and is
//! merged back over the SR result's RGB.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbaImage};

use crate::capability::{Capabilities, SrConfig, SrContentType, SrModel};
use crate::dsl::{parse_str, NodeDef};
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;
use crate::gpu::GpuContext;

use super::single_input;

pub(crate) fn execute(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
    gpu: Option<&GpuContext>,
    caps: &mut Capabilities,
) -> Result<ImageFrame> {
    let source = single_input(inputs)?;
    ctx.check_cancelled()?;

    let model = match parse_str(&node.params, "model").unwrap_or("cnn-2x-m") {
        "cnn-2x-s" => SrModel::Cnn2xS,
        "cnn-2x-m" => SrModel::Cnn2xM,
        "cnn-2x-l" => SrModel::Cnn2xL,
        other => bail!("unsupported upscale model: {other}"),
    };
    let content_type = match parse_str(&node.params, "contentType").unwrap_or("rl") {
        "rl" => SrContentType::Rl,
        "an" => SrContentType::An,
        "3d" => SrContentType::ThreeD,
        other => bail!("unsupported upscale content type: {other}"),
    };
    let config = SrConfig {
        model,
        content_type,
    };

    ctx.progress(0.05);
    ctx.status_message(Some("preparing super-resolution model"));
    let download = |ratio: Option<f32>| ctx.download_progress(ratio);
    let resolver = caps.super_resolver.get(config, &download)?;
    if resolver.requires_gpu() && gpu.is_none() {
        bail!("Upscale requires a GPU device");
    }
    ctx.check_cancelled()?;
    ctx.progress(0.2);

    ctx.status_message(Some("rendering 2x"));
    let sr = resolver.render(source.bitmap())?;
    ctx.check_cancelled()?;
    ctx.progress(0.7);

    let (w, h) = (source.width(), source.height());
    let (ow, oh) = (w * 2, h * 2);
    if sr.dimensions() != (ow, oh) {
        bail!(
            "super-resolution returned {}x{}, expected {ow}x{oh}",
            sr.width(),
            sr.height()
        );
    }

    // Alpha channel: grayscale at source resolution, bilinear 2x.
    let alpha = GrayImage::from_fn(w, h, |x, y| {
        image::Luma([source.bitmap().get_pixel(x, y).0[3]])
    });
    let alpha2x = imageops::resize(&alpha, ow, oh, FilterType::Triangle);
    ctx.progress(0.9);

    let mut out = RgbaImage::new(ow, oh);
    for (x, y, p) in out.enumerate_pixels_mut() {
        let rgb = sr.get_pixel(x, y).0;
        *p = image::Rgba([rgb[0], rgb[1], rgb[2], alpha2x.get_pixel(x, y).0[0]]);
    }

    ctx.status_message(None);
    ctx.progress(1.0);
    Ok(ImageFrame::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{SegmentProvider, SrProvider, SuperResolver};
    use crate::events::RunOptions;
    use std::collections::HashMap;

    /// Deterministic stand-in: nearest-neighbor 2x of the RGB channels with
    /// alpha forced opaque (real SR kernels do not see alpha either).
    struct Nearest2x;

    impl SuperResolver for Nearest2x {
        fn switch(&mut self, _config: SrConfig) -> Result<()> {
            Ok(())
        }

        fn render(&mut self, bitmap: &RgbaImage) -> Result<RgbaImage> {
            let (w, h) = bitmap.dimensions();
            Ok(RgbaImage::from_fn(w * 2, h * 2, |x, y| {
                let p = bitmap.get_pixel(x / 2, y / 2).0;
                image::Rgba([p[0], p[1], p[2], 255])
            }))
        }

        fn requires_gpu(&self) -> bool {
            false
        }
    }

    fn caps() -> Capabilities {
        Capabilities {
            super_resolver: SrProvider::new(Box::new(|_, _| Ok(Box::new(Nearest2x)))),
            segmenter: SegmentProvider::unavailable(),
        }
    }

    fn node(params_json: &str) -> NodeDef {
        NodeDef {
            id: "up".to_string(),
            kind: crate::dsl::NodeKind::Upscale,
            position: Default::default(),
            params: serde_json::from_str::<HashMap<_, _>>(params_json).unwrap(),
            label: None,
        }
    }

    fn gradient_alpha_source(w: u32, h: u32) -> ImageFrame {
        ImageFrame::new(RgbaImage::from_fn(w, h, |x, y| {
            image::Rgba([40, 80, 120, ((x + y) * 8).min(255) as u8])
        }))
    }

    #[test]
    fn doubles_both_dimensions() {
        let mut caps = caps();
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("up", &options);
        let out = execute(&node("{}"), &[gradient_alpha_source(12, 7)], &ctx, None, &mut caps)
            .unwrap();
        assert_eq!((out.width(), out.height()), (24, 14));
    }

    #[test]
    fn alpha_matches_bilinear_upscale_of_source_alpha() {
        let mut caps = caps();
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("up", &options);
        let source = gradient_alpha_source(16, 16);

        let expected_alpha = {
            let gray = GrayImage::from_fn(16, 16, |x, y| {
                image::Luma([source.bitmap().get_pixel(x, y).0[3]])
            });
            imageops::resize(&gray, 32, 32, FilterType::Triangle)
        };

        let out = execute(&node("{}"), &[source], &ctx, None, &mut caps).unwrap();
        for (x, y, p) in out.bitmap().enumerate_pixels() {
            let want = expected_alpha.get_pixel(x, y).0[0] as i32;
            let got = p.0[3] as i32;
            assert!((want - got).abs() <= 1, "alpha off at ({x},{y}): {got} vs {want}");
        }
    }

    #[test]
    fn rgb_comes_from_the_sr_result() {
        let mut caps = caps();
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("up", &options);
        let src = ImageFrame::new(RgbaImage::from_pixel(4, 4, image::Rgba([9, 8, 7, 0])));
        let out = execute(&node("{}"), &[src], &ctx, None, &mut caps).unwrap();
        let p = out.bitmap().get_pixel(3, 3).0;
        assert_eq!([p[0], p[1], p[2]], [9, 8, 7]);
        assert_eq!(p[3], 0, "alpha stays transparent");
    }

    #[test]
    fn gpu_requirement_is_enforced_for_gpu_backed_providers() {
        struct NeedsGpu;
        impl SuperResolver for NeedsGpu {
            fn switch(&mut self, _config: SrConfig) -> Result<()> {
                Ok(())
            }
            fn render(&mut self, _bitmap: &RgbaImage) -> Result<RgbaImage> {
                unreachable!("render must not be reached without a device")
            }
        }

        let mut caps = Capabilities {
            super_resolver: SrProvider::new(Box::new(|_, _| Ok(Box::new(NeedsGpu)))),
            segmenter: SegmentProvider::unavailable(),
        };
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("up", &options);
        let src = ImageFrame::new(RgbaImage::new(4, 4));
        let err = execute(&node("{}"), &[src], &ctx, None, &mut caps).unwrap_err();
        assert!(err.to_string().contains("requires a GPU device"));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let mut caps = caps();
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("up", &options);
        let src = ImageFrame::new(RgbaImage::new(4, 4));
        let err = execute(&node(r#"{"model": "cnn-4x"}"#), &[src], &ctx, None, &mut caps)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported upscale model"));
    }
}
