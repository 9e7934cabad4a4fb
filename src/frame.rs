//! Immutable image frames and the revision clock.
//!
//! A frame's `revision` is the only thing cache keys ever see of its pixels:
//! producers construct a new frame (with a fresh revision) instead of mutating
//! an existing one, which keeps revision-based invalidation sound without
//! hashing bitmaps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

static REVISION_CLOCK: AtomicU64 = AtomicU64::new(0);

/// Next value of the process-wide monotonic revision clock.
pub fn next_revision() -> u64 {
    REVISION_CLOCK.fetch_add(1, Ordering::Relaxed) + 1
}

/// Immutable RGBA image value produced by a node.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    bitmap: Arc<RgbaImage>,
    width: u32,
    height: u32,
    revision: u64,
}

impl ImageFrame {
    /// Wrap a bitmap into a frame, stamping a fresh revision.
    pub fn new(bitmap: RgbaImage) -> Self {
        let (width, height) = bitmap.dimensions();
        Self {
            bitmap: Arc::new(bitmap),
            width,
            height,
            revision: next_revision(),
        }
    }

    /// Re-stamp an existing bitmap as a new frame without copying pixels.
    ///
    /// Used by executors whose output is pixel-identical to their input but
    /// must still count as a distinct production (e.g. a zero-thickness
    /// outline).
    pub fn restamp(&self) -> Self {
        Self {
            bitmap: Arc::clone(&self.bitmap),
            width: self.width,
            height: self.height,
            revision: next_revision(),
        }
    }

    pub fn bitmap(&self) -> &RgbaImage {
        &self.bitmap
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
