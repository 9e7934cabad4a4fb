//! CPU outline fallback: two-pass chamfer distance + the shared composite.

use anyhow::Result;
use image::RgbaImage;

use crate::events::ExecutionContext;
use crate::frame::ImageFrame;

use super::{outline_band, OutlineParams, ALPHA_EDGE};

const ORTHO: f32 = 1.0;
const DIAG: f32 = 1.414;

pub(super) fn run(
    source: &ImageFrame,
    params: &OutlineParams,
    ctx: &ExecutionContext<'_>,
) -> Result<RgbaImage> {
    let bitmap = source.bitmap();
    let (w, h) = (source.width() as usize, source.height() as usize);
    ctx.status_message(Some("computing distance field (cpu)"));
    ctx.progress(0.1);

    let foreground: Vec<bool> = bitmap
        .pixels()
        .map(|p| p.0[3] as f32 / 255.0 > ALPHA_EDGE)
        .collect();

    // Distance to the silhouette from outside (foreground seeds) and from
    // inside (background seeds).
    let outer = chamfer(&foreground, w, h, true);
    ctx.check_cancelled()?;
    ctx.progress(0.4);
    let inner = chamfer(&foreground, w, h, false);
    ctx.check_cancelled()?;
    ctx.progress(0.6);

    let mut out = RgbaImage::new(w as u32, h as u32);
    for (i, (src, dst)) in bitmap.pixels().zip(out.pixels_mut()).enumerate() {
        let inside = foreground[i];
        let signed_dist = if inside { -inner[i] } else { outer[i] } + params.threshold;
        let band = outline_band(params, signed_dist);
        let a = band * params.opacity;

        let mix = |orig: u8, target: f32| -> u8 {
            let o = orig as f32 / 255.0;
            ((o + (target - o) * a) * 255.0).round().clamp(0.0, 255.0) as u8
        };
        let src_a = src.0[3] as f32 / 255.0;
        dst.0 = [
            mix(src.0[0], params.color[0]),
            mix(src.0[1], params.color[1]),
            mix(src.0[2], params.color[2]),
            ((src_a.max(a)) * 255.0).round() as u8,
        ];
    }

    ctx.progress(0.9);
    Ok(out)
}

/// Two-pass chamfer sweep. `seed_value` selects which mask state seeds the
/// field (distance is measured from pixels where `mask == seed_value`).
///
/// Border pixels keep their initial value; the interior still converges
/// because the forward and backward sweeps both propagate across it.
fn chamfer(mask: &[bool], w: usize, h: usize, seed_value: bool) -> Vec<f32> {
    let mut dist: Vec<f32> = mask
        .iter()
        .map(|&m| if m == seed_value { 0.0 } else { f32::INFINITY })
        .collect();

    if w < 3 || h < 3 {
        return dist;
    }

    // Forward: left/top neighbors.
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let mut d = dist[i];
            d = d.min(dist[i - 1] + ORTHO);
            d = d.min(dist[i - w] + ORTHO);
            d = d.min(dist[i - w - 1] + DIAG);
            d = d.min(dist[i - w + 1] + DIAG);
            dist[i] = d;
        }
    }

    // Backward: right/bottom neighbors.
    for y in (1..h - 1).rev() {
        for x in (1..w - 1).rev() {
            let i = y * w + x;
            let mut d = dist[i];
            d = d.min(dist[i + 1] + ORTHO);
            d = d.min(dist[i + w] + ORTHO);
            d = d.min(dist[i + w + 1] + DIAG);
            d = d.min(dist[i + w - 1] + DIAG);
            dist[i] = d;
        }
    }

    dist
}
