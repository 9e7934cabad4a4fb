//! Input executor: fits the run's source image to the node's size limit.
//!
//! `maxSize` bounds the longest axis; `fit` picks the strategy:
//! - `contain` (default): scale down so the longest axis is `maxSize`,
//!   preserving aspect. Never upscales.
//! - `cover`: scale so the shortest axis is `maxSize`, then center-crop to a
//!   `maxSize × maxSize` square.

use anyhow::{bail, Result};
use image::imageops::{self, FilterType};

use crate::dsl::{parse_str, parse_u32, NodeDef};
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;

use super::single_input;

pub(crate) fn execute(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
) -> Result<ImageFrame> {
    let source = single_input(inputs)?;
    ctx.check_cancelled()?;

    let Some(max_size) = parse_u32(&node.params, "maxSize").filter(|s| *s > 0) else {
        // No size limit: the source frame passes through untouched, keeping
        // its revision so downstream keys stay stable across runs.
        return Ok(source.clone());
    };
    let fit = parse_str(&node.params, "fit").unwrap_or("contain");

    let (w, h) = (source.width(), source.height());
    let bitmap = match fit {
        "contain" => {
            if w.max(h) <= max_size {
                return Ok(source.clone());
            }
            let scale = max_size as f32 / w.max(h) as f32;
            let nw = ((w as f32 * scale).round() as u32).max(1);
            let nh = ((h as f32 * scale).round() as u32).max(1);
            imageops::resize(source.bitmap(), nw, nh, FilterType::Triangle)
        }
        "cover" => {
            let scale = max_size as f32 / w.min(h) as f32;
            let nw = ((w as f32 * scale).round() as u32).max(max_size);
            let nh = ((h as f32 * scale).round() as u32).max(max_size);
            let scaled = imageops::resize(source.bitmap(), nw, nh, FilterType::Triangle);
            let x = (nw - max_size) / 2;
            let y = (nh - max_size) / 2;
            imageops::crop_imm(&scaled, x, y, max_size, max_size).to_image()
        }
        other => bail!("unsupported fit mode: {other}"),
    };

    ctx.progress(1.0);
    Ok(ImageFrame::new(bitmap))
}
