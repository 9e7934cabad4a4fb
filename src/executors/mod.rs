//! Node executors, one per [`NodeKind`].
//!
//! Executors are pure with respect to scheduler state: they receive gathered
//! upstream frames plus a per-node [`ExecutionContext`] and return a new
//! frame or fail. The scheduler owns status bookkeeping and the error
//! policy.

pub mod input;
pub mod normalize;
pub mod outline;
pub mod output;
pub mod remove_bg;
pub mod upscale;

use anyhow::{anyhow, Result};

use crate::capability::Capabilities;
use crate::dsl::{NodeDef, NodeKind};
use crate::events::ExecutionContext;
use crate::frame::ImageFrame;
use crate::gpu::GpuContext;

pub(crate) fn execute_node(
    node: &NodeDef,
    inputs: &[ImageFrame],
    ctx: &ExecutionContext<'_>,
    gpu: Option<&GpuContext>,
    caps: &mut Capabilities,
) -> Result<ImageFrame> {
    match node.kind {
        NodeKind::Input => input::execute(node, inputs, ctx),
        NodeKind::Output => output::execute(inputs),
        NodeKind::RemoveBg => remove_bg::execute(node, inputs, ctx, gpu, caps),
        NodeKind::Normalize => normalize::execute(node, inputs, ctx),
        NodeKind::Outline => outline::execute(node, inputs, ctx, gpu),
        NodeKind::Upscale => upscale::execute(node, inputs, ctx, gpu, caps),
    }
}

/// The single upstream frame every processing node requires.
pub(crate) fn single_input(inputs: &[ImageFrame]) -> Result<&ImageFrame> {
    inputs.first().ok_or_else(|| anyhow!("No input image"))
}
