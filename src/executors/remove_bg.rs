//! RemoveBg executor: delegated segmentation + alpha composite.
//!
//! `device: auto` resolves to `webgpu` when a device is present, else `wasm`.
//! A `webgpu` failure is recovered by retrying once under `wasm`; only a
//! `wasm` failure is reported.

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use tracing::warn;

use crate::capability::{
    Capabilities, SegmentBackend, SegmentConfig, SegmentDevice, SegmentDtype, SegmentMask,
};
use crate::dsl::{parse_f32, parse_str, NodeDef};
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;
use crate::gpu::GpuContext;

use super::single_input;

const DEFAULT_THRESHOLD: f32 = 0.5;

pub(crate) fn execute(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
    gpu: Option<&GpuContext>,
    caps: &mut Capabilities,
) -> Result<ImageFrame> {
    let source = single_input(inputs)?;
    ctx.check_cancelled()?;

    let device = match parse_str(&node.params, "device").unwrap_or("auto") {
        "auto" => SegmentDevice::Auto,
        "webgpu" => SegmentDevice::Webgpu,
        "wasm" => SegmentDevice::Wasm,
        other => bail!("unsupported segmentation device: {other}"),
    };
    let dtype = match parse_str(&node.params, "dtype").unwrap_or("fp32") {
        "fp32" => SegmentDtype::Fp32,
        "fp16" => SegmentDtype::Fp16,
        "q8" => SegmentDtype::Q8,
        other => bail!("unsupported segmentation dtype: {other}"),
    };
    let threshold = parse_f32(&node.params, "threshold").unwrap_or(DEFAULT_THRESHOLD);

    let backend = match device {
        SegmentDevice::Webgpu => SegmentBackend::Webgpu,
        SegmentDevice::Wasm => SegmentBackend::Wasm,
        SegmentDevice::Auto => {
            if gpu.is_some() {
                SegmentBackend::Webgpu
            } else {
                SegmentBackend::Wasm
            }
        }
    };

    ctx.progress(0.05);
    let mask = match segment_with(backend, dtype, source.bitmap(), threshold, ctx, caps) {
        Ok(mask) => mask,
        Err(e) if backend == SegmentBackend::Webgpu => {
            if e.is::<crate::error::Abort>() {
                return Err(e);
            }
            warn!(error = %format!("{e:#}"), "webgpu segmentation failed; retrying under wasm");
            ctx.status_message(Some("retrying with wasm backend"));
            caps.segmenter.evict();
            segment_with(SegmentBackend::Wasm, dtype, source.bitmap(), threshold, ctx, caps)?
        }
        Err(e) => return Err(e),
    };
    ctx.check_cancelled()?;
    ctx.progress(0.85);

    let (mw, mh) = mask.dimensions();
    if (mw, mh) != (source.width(), source.height()) {
        bail!(
            "segmentation mask is {mw}x{mh} but the input is {}x{}",
            source.width(),
            source.height()
        );
    }

    // The mask replaces the alpha channel; RGB is preserved.
    let mut out = RgbaImage::new(source.width(), source.height());
    for (x, y, p) in out.enumerate_pixels_mut() {
        let src = source.bitmap().get_pixel(x, y).0;
        *p = image::Rgba([src[0], src[1], src[2], mask.value(x, y)]);
    }

    ctx.status_message(None);
    ctx.progress(1.0);
    Ok(ImageFrame::new(out))
}

fn segment_with(
    backend: SegmentBackend,
    dtype: SegmentDtype,
    image: &RgbaImage,
    threshold: f32,
    ctx: &ExecutionContext<'_>,
    caps: &mut Capabilities,
) -> Result<SegmentMask> {
    ctx.status_message(Some(&format!("segmenting ({})", backend.as_str())));
    let download = |ratio: Option<f32>| ctx.download_progress(ratio);
    let segmenter = caps
        .segmenter
        .get(SegmentConfig { backend, dtype }, &download)
        .with_context(|| format!("{} segmentation backend unavailable", backend.as_str()))?;
    ctx.check_cancelled()?;
    segmenter.segment(image, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{SegmentProvider, Segmenter, SrProvider};
    use crate::events::RunOptions;
    use image::GrayImage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct HalfMask;

    impl Segmenter for HalfMask {
        fn segment(&mut self, image: &RgbaImage, _threshold: f32) -> Result<SegmentMask> {
            // Left half foreground, right half background.
            let (w, h) = image.dimensions();
            let mask = GrayImage::from_fn(w, h, |x, _| {
                image::Luma([if x < w / 2 { 255 } else { 0 }])
            });
            Ok(SegmentMask::Gray(mask))
        }
    }

    fn caps_with(factory: crate::capability::SegmentFactory) -> Capabilities {
        Capabilities {
            super_resolver: SrProvider::unavailable(),
            segmenter: SegmentProvider::new(factory),
        }
    }

    fn node(params_json: &str) -> NodeDef {
        NodeDef {
            id: "bg".to_string(),
            kind: crate::dsl::NodeKind::RemoveBg,
            position: Default::default(),
            params: serde_json::from_str::<HashMap<_, _>>(params_json).unwrap(),
            label: None,
        }
    }

    #[test]
    fn mask_replaces_alpha_and_preserves_rgb() {
        let mut caps = caps_with(Box::new(|_, _| Ok(Box::new(HalfMask))));
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("bg", &options);

        let src = ImageFrame::new(RgbaImage::from_pixel(8, 4, image::Rgba([10, 20, 30, 255])));
        let out = execute(&node(r#"{"device": "wasm"}"#), &[src], &ctx, None, &mut caps).unwrap();

        let left = out.bitmap().get_pixel(1, 1).0;
        let right = out.bitmap().get_pixel(6, 1).0;
        assert_eq!(left, [10, 20, 30, 255]);
        assert_eq!(right, [10, 20, 30, 0]);
    }

    #[test]
    fn webgpu_failure_retries_once_under_wasm() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut caps = caps_with(Box::new(move |config, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            match config.backend {
                SegmentBackend::Webgpu => bail!("shader compilation exploded"),
                SegmentBackend::Wasm => Ok(Box::new(HalfMask) as Box<dyn Segmenter>),
            }
        }));

        let options = RunOptions::default();
        let ctx = ExecutionContext::new("bg", &options);
        let src = ImageFrame::new(RgbaImage::new(4, 4));
        let out = execute(&node(r#"{"device": "webgpu"}"#), &[src], &ctx, None, &mut caps).unwrap();
        assert_eq!(out.width(), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wasm_failure_is_reported() {
        let mut caps = caps_with(Box::new(|_, _| bail!("weights corrupt")));
        let options = RunOptions::default();
        let ctx = ExecutionContext::new("bg", &options);
        let src = ImageFrame::new(RgbaImage::new(4, 4));
        let err = execute(&node(r#"{"device": "wasm"}"#), &[src], &ctx, None, &mut caps)
            .unwrap_err();
        assert!(format!("{err:#}").contains("weights corrupt"));
    }

    #[test]
    fn auto_resolves_to_wasm_without_gpu() {
        let chosen: Arc<std::sync::Mutex<Vec<SegmentBackend>>> = Arc::default();
        let sink = chosen.clone();
        let mut caps = caps_with(Box::new(move |config, _| {
            sink.lock().unwrap().push(config.backend);
            Ok(Box::new(HalfMask) as Box<dyn Segmenter>)
        }));

        let options = RunOptions::default();
        let ctx = ExecutionContext::new("bg", &options);
        let src = ImageFrame::new(RgbaImage::new(4, 4));
        execute(&node(r#"{"device": "auto"}"#), &[src], &ctx, None, &mut caps).unwrap();
        assert_eq!(*chosen.lock().unwrap(), vec![SegmentBackend::Wasm]);
    }
}
