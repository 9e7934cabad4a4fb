//! Output executor: a passthrough.
//!
//! The output node's `format`/`quality` params are consumed by the
//! scheduler's finalize step, which encodes the frame recorded here.

use anyhow::Result;

use crate::frame::ImageFrame;

use super::single_input;

pub(crate) fn execute(inputs: &[ImageFrame]) -> Result<ImageFrame> {
    Ok(single_input(inputs)?.clone())
}
