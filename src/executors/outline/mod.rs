//! Outline executor: a colored band around the non-transparent silhouette.
//!
//! Two independent implementations share one composite formula. The GPU path
//! builds a signed distance field with jump flooding; the CPU path is a
//! two-pass chamfer sweep and is the authoritative oracle where GPU output
//! is compared against it. Any GPU failure (other than cancellation) falls
//! back to the CPU path within the same node invocation.

mod cpu;
mod gpu;

use anyhow::{bail, Result};
use tracing::warn;

use crate::dsl::{parse_f32, parse_str, NodeDef};
use crate::error::Abort;
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;
use crate::gpu::GpuContext;

use super::single_input;

/// Alpha predicate shared by seeding, compositing, and both backends.
pub(crate) const ALPHA_EDGE: f32 = 0.1;

#[derive(Debug, Clone, Copy)]
pub(crate) struct OutlineParams {
    pub thickness: f32,
    /// Outline color, 0..1 per channel. Alpha is fixed at 1 (`#rrggbb`).
    pub color: [f32; 3],
    pub opacity: f32,
    /// `outside` → 1.0, `center` → 0.5, `inside` → 0.0.
    pub position_value: f32,
    /// Signed offset applied to the signed distance before banding.
    pub threshold: f32,
}

impl OutlineParams {
    fn from_node(node: &NodeDef) -> Result<Self> {
        let thickness = parse_f32(&node.params, "thickness").unwrap_or(10.0);
        if !thickness.is_finite() || thickness < 0.0 {
            bail!("outline thickness must be a non-negative number");
        }

        let color = parse_hex_color(parse_str(&node.params, "color").unwrap_or("#000000"))?;
        let opacity = parse_f32(&node.params, "opacity").unwrap_or(1.0).clamp(0.0, 1.0);
        let position_value = match parse_str(&node.params, "position").unwrap_or("outside") {
            "outside" => 1.0,
            "center" => 0.5,
            "inside" => 0.0,
            other => bail!("unsupported outline position: {other}"),
        };
        let threshold = parse_f32(&node.params, "threshold").unwrap_or(0.0);

        // `quality` is accepted but advisory: the flood step schedule is the
        // exact log2 schedule regardless.
        if let Some(q) = parse_str(&node.params, "quality") {
            if !matches!(q, "low" | "medium" | "high") {
                bail!("unsupported outline quality: {q}");
            }
        }

        Ok(Self {
            thickness,
            color,
            opacity,
            position_value,
            threshold,
        })
    }
}

pub(crate) fn execute(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
    gpu: Option<&GpuContext>,
) -> Result<ImageFrame> {
    let source = single_input(inputs)?;
    ctx.check_cancelled()?;
    let params = OutlineParams::from_node(node)?;

    // Zero thickness composites to the identity; skip the distance fields.
    if params.thickness == 0.0 {
        ctx.progress(1.0);
        return Ok(source.restamp());
    }

    if let Some(device) = gpu {
        match gpu::run(device, source, &params, ctx) {
            Ok(bitmap) => {
                ctx.set_device_used("webgpu");
                ctx.progress(1.0);
                return Ok(ImageFrame::new(bitmap));
            }
            Err(e) if e.is::<Abort>() => return Err(e),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "gpu outline failed; falling back to cpu");
                ctx.status_message(Some("falling back to cpu"));
            }
        }
    }

    let bitmap = cpu::run(source, &params, ctx)?;
    ctx.set_device_used("cpu");
    ctx.progress(1.0);
    Ok(ImageFrame::new(bitmap))
}

pub(crate) fn parse_hex_color(s: &str) -> Result<[f32; 3]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("outline color must be #rrggbb, got {s:?}");
    }
    let channel = |i: usize| -> f32 {
        u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0) as f32 / 255.0
    };
    Ok([channel(0), channel(2), channel(4)])
}

/// Hermite smoothstep, matching the WGSL builtin.
pub(crate) fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// The band weight for a signed distance, shared verbatim by both backends.
pub(crate) fn outline_band(params: &OutlineParams, signed_dist: f32) -> f32 {
    let inner_edge = params.thickness * params.position_value;
    let outer_edge = params.thickness * (1.0 - params.position_value);
    smoothstep(-outer_edge - 0.5, -outer_edge + 0.5, signed_dist)
        * (1.0 - smoothstep(inner_edge - 0.5, inner_edge + 0.5, signed_dist))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#ff0000").unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(parse_hex_color("00ff00").unwrap(), [0.0, 1.0, 0.0]);
        let [r, g, b] = parse_hex_color("#336699").unwrap();
        assert!((r - 0.2).abs() < 0.01);
        assert!((g - 0.4).abs() < 0.01);
        assert!((b - 0.6).abs() < 0.01);
        assert!(parse_hex_color("#f00").is_err());
        assert!(parse_hex_color("#zzzzzz").is_err());
    }

    #[test]
    fn smoothstep_matches_hermite_shape() {
        assert_eq!(smoothstep(0.0, 1.0, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 1.0, 2.0), 1.0);
        assert_eq!(smoothstep(0.0, 1.0, 0.5), 0.5);
        assert!(smoothstep(0.0, 1.0, 0.25) < 0.25);
        // Infinite distances collapse to the saturated ends.
        assert_eq!(smoothstep(-0.5, 0.5, f32::NEG_INFINITY), 0.0);
        assert_eq!(smoothstep(-0.5, 0.5, f32::INFINITY), 1.0);
    }

    #[test]
    fn band_is_centered_on_the_configured_edge() {
        let params = OutlineParams {
            thickness: 4.0,
            color: [1.0, 0.0, 0.0],
            opacity: 1.0,
            position_value: 1.0, // outside
            threshold: 0.0,
        };
        // Fully inside the band.
        assert_eq!(outline_band(&params, 2.0), 1.0);
        // Far outside and deep inside are both zero.
        assert_eq!(outline_band(&params, 10.0), 0.0);
        assert_eq!(outline_band(&params, -10.0), 0.0);
    }
}
