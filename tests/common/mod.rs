//! Shared fixtures: pipeline constructors and deterministic capability stubs.
#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::Result;
use image::{GrayImage, Rgba, RgbaImage};
use pipemagic_core::capability::{SegmentProvider, SrProvider};
use pipemagic_core::{
    Capabilities, EdgeDef, ImageFrame, NodeDef, NodeKind, PipelineDefinition, SegmentMask,
    Segmenter, SrConfig, SuperResolver,
};

pub fn node(id: &str, kind: NodeKind, params_json: &str) -> NodeDef {
    NodeDef {
        id: id.to_string(),
        kind,
        position: Default::default(),
        params: serde_json::from_str::<HashMap<_, _>>(params_json).unwrap(),
        label: None,
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> EdgeDef {
    EdgeDef {
        id: id.to_string(),
        source: source.to_string(),
        source_handle: "image".to_string(),
        target: target.to_string(),
        target_handle: "image".to_string(),
    }
}

pub fn pipeline(nodes: Vec<NodeDef>, edges: Vec<EdgeDef>) -> PipelineDefinition {
    PipelineDefinition {
        version: 1,
        nodes,
        edges,
    }
}

/// input → remove-bg → normalize → outline → output.
pub fn sticker_pipeline() -> PipelineDefinition {
    pipeline(
        vec![
            node("in", NodeKind::Input, r#"{"maxSize": 128}"#),
            node("bg", NodeKind::RemoveBg, r#"{"device": "wasm"}"#),
            node("norm", NodeKind::Normalize, r#"{"size": 96, "padding": 8}"#),
            node(
                "line",
                NodeKind::Outline,
                r##"{"thickness": 4, "color": "#ff0000", "opacity": 1.0, "position": "outside"}"##,
            ),
            node("out", NodeKind::Output, r#"{"format": "png"}"#),
        ],
        vec![
            edge("e1", "in", "bg"),
            edge("e2", "bg", "norm"),
            edge("e3", "norm", "line"),
            edge("e4", "line", "out"),
        ],
    )
}

/// Keeps a centered disc as foreground; deterministic and model-free.
pub struct DiscSegmenter;

impl Segmenter for DiscSegmenter {
    fn segment(&mut self, image: &RgbaImage, _threshold: f32) -> Result<SegmentMask> {
        let (w, h) = image.dimensions();
        let (cx, cy) = (w as f32 / 2.0, h as f32 / 2.0);
        let r = w.min(h) as f32 / 3.0;
        let mask = GrayImage::from_fn(w, h, |x, y| {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            image::Luma([if (dx * dx + dy * dy).sqrt() <= r { 255 } else { 0 }])
        });
        Ok(SegmentMask::Gray(mask))
    }
}

/// Nearest-neighbor 2x on RGB, opaque alpha; mirrors what a real SR kernel
/// exposes (RGB only) without GPU or weights.
pub struct Nearest2x;

impl SuperResolver for Nearest2x {
    fn switch(&mut self, _config: SrConfig) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, bitmap: &RgbaImage) -> Result<RgbaImage> {
        let (w, h) = bitmap.dimensions();
        Ok(RgbaImage::from_fn(w * 2, h * 2, |x, y| {
            let p = bitmap.get_pixel(x / 2, y / 2).0;
            Rgba([p[0], p[1], p[2], 255])
        }))
    }

    fn requires_gpu(&self) -> bool {
        false
    }
}

pub fn stub_capabilities() -> Capabilities {
    Capabilities {
        super_resolver: SrProvider::new(Box::new(|_, _| Ok(Box::new(Nearest2x)))),
        segmenter: SegmentProvider::new(Box::new(|_, _| Ok(Box::new(DiscSegmenter)))),
    }
}

/// Opaque white canvas: segmentation decides the silhouette.
pub fn white_input(w: u32, h: u32) -> ImageFrame {
    ImageFrame::new(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])))
}
