//! Normalize executor: alpha-bbox crop + centered fit into a square canvas.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::dsl::{parse_u32, NodeDef};
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;

use super::single_input;

const DEFAULT_SIZE: u32 = 1024;

/// Alpha above this (out of 255) counts as content for the bbox scan.
const ALPHA_CONTENT_THRESHOLD: u8 = 10;

pub(crate) fn execute(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
) -> Result<ImageFrame> {
    let source = single_input(inputs)?;
    ctx.check_cancelled()?;

    let size = parse_u32(&node.params, "size").unwrap_or(DEFAULT_SIZE);
    let padding = parse_u32(&node.params, "padding").unwrap_or(0);
    if size == 0 {
        bail!("normalize size must be positive");
    }
    if 2 * padding >= size {
        bail!("normalize padding {padding} leaves no room in a {size}px canvas");
    }

    ctx.progress(0.1);
    let Some(bbox) = alpha_bbox(source.bitmap()) else {
        // Nothing visible: a fully transparent canvas.
        return Ok(ImageFrame::new(RgbaImage::new(size, size)));
    };
    ctx.progress(0.4);

    let (bx, by, bw, bh) = bbox;
    let avail = size - 2 * padding;
    let scale = (avail as f32 / bw as f32).min(avail as f32 / bh as f32);
    let sw = ((bw as f32 * scale).round() as u32).clamp(1, avail);
    let sh = ((bh as f32 * scale).round() as u32).clamp(1, avail);

    let cropped = imageops::crop_imm(source.bitmap(), bx, by, bw, bh).to_image();
    let scaled = imageops::resize(&cropped, sw, sh, FilterType::Triangle);
    ctx.check_cancelled()?;
    ctx.progress(0.8);

    let mut canvas = RgbaImage::new(size, size);
    let ox = ((size as f32 - sw as f32) / 2.0).round() as i64;
    let oy = ((size as f32 - sh as f32) / 2.0).round() as i64;
    imageops::overlay(&mut canvas, &scaled, ox, oy);

    ctx.progress(1.0);
    Ok(ImageFrame::new(canvas))
}

/// Tightest box `(x, y, w, h)` around pixels with alpha > 10, or `None` when
/// the image is effectively transparent.
fn alpha_bbox(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
    let (mut max_x, mut max_y) = (0u32, 0u32);
    let mut found = false;

    for (x, y, p) in image.enumerate_pixels() {
        if p.0[3] > ALPHA_CONTENT_THRESHOLD {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}
