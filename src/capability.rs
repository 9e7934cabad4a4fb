//! External capabilities: background segmentation and super-resolution.
//!
//! The engine never links an ML framework. Both capabilities are narrow
//! traits whose implementations are injected via [`Capabilities`]; the
//! providers here own one live instance apiece, keyed by its configuration
//! tuple. Requesting a different key reconfigures the live instance in place
//! (switching networks is much cheaper than rebuilding GPU state);
//! requesting the same key reuses it untouched.

use anyhow::{bail, Result};
use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ── Super-resolution ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SrModel {
    #[serde(rename = "cnn-2x-s")]
    Cnn2xS,
    #[serde(rename = "cnn-2x-m")]
    Cnn2xM,
    #[serde(rename = "cnn-2x-l")]
    Cnn2xL,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SrContentType {
    #[serde(rename = "rl")]
    Rl,
    #[serde(rename = "an")]
    An,
    #[serde(rename = "3d")]
    ThreeD,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrConfig {
    pub model: SrModel,
    pub content_type: SrContentType,
}

/// Learned 2× RGB super-resolution.
pub trait SuperResolver {
    /// Re-point the instance at a different weights table without rebuilding.
    fn switch(&mut self, config: SrConfig) -> Result<()>;

    /// 2× upscale. The result's alpha channel is unspecified; callers own
    /// alpha reconstruction.
    fn render(&mut self, bitmap: &RgbaImage) -> Result<RgbaImage>;

    /// Whether this implementation needs a live GPU device. Real providers
    /// do; deterministic test stubs do not.
    fn requires_gpu(&self) -> bool {
        true
    }
}

pub type SrFactory =
    Box<dyn FnMut(SrConfig, &dyn Fn(Option<f32>)) -> Result<Box<dyn SuperResolver>> + Send>;

/// Owns at most one live [`SuperResolver`], keyed by [`SrConfig`].
pub struct SrProvider {
    factory: SrFactory,
    live: Option<(SrConfig, Box<dyn SuperResolver>)>,
}

impl SrProvider {
    pub fn new(factory: SrFactory) -> Self {
        Self {
            factory,
            live: None,
        }
    }

    /// No provider installed; any use fails with a clear message.
    pub fn unavailable() -> Self {
        Self::new(Box::new(|_, _| {
            bail!("no super-resolution provider installed")
        }))
    }

    /// Build on first use, switch on key change, reuse otherwise.
    ///
    /// `download` observes weight-fetch progress during a build; `None`
    /// signals the end of the download phase.
    pub fn get(
        &mut self,
        config: SrConfig,
        download: &dyn Fn(Option<f32>),
    ) -> Result<&mut dyn SuperResolver> {
        if self.live.is_none() {
            let instance = (self.factory)(config, download)?;
            return Ok(self.live.insert((config, instance)).1.as_mut());
        }

        let (key, instance) = self.live.as_mut().unwrap();
        if *key != config {
            debug!(from = ?key, to = ?config, "switching super-resolution network");
            instance.switch(config)?;
            *key = config;
        }
        Ok(instance.as_mut())
    }
}

// ── Background segmentation ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentDevice {
    Auto,
    Webgpu,
    Wasm,
}

/// A [`SegmentDevice`] with `auto` already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentBackend {
    Webgpu,
    Wasm,
}

impl SegmentBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentBackend::Webgpu => "webgpu",
            SegmentBackend::Wasm => "wasm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentDtype {
    Fp32,
    Fp16,
    Q8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentConfig {
    pub backend: SegmentBackend,
    pub dtype: SegmentDtype,
}

/// A segmentation mask. Providers may return a single-channel matte or a
/// full RGBA image; in the latter case the red channel carries the matte.
pub enum SegmentMask {
    Gray(GrayImage),
    Rgba(RgbaImage),
}

impl SegmentMask {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SegmentMask::Gray(m) => m.dimensions(),
            SegmentMask::Rgba(m) => m.dimensions(),
        }
    }

    /// Matte value at a pixel, 0..255.
    pub fn value(&self, x: u32, y: u32) -> u8 {
        match self {
            SegmentMask::Gray(m) => m.get_pixel(x, y).0[0],
            SegmentMask::Rgba(m) => m.get_pixel(x, y).0[0],
        }
    }
}

/// Foreground segmentation: `segment(image, threshold) → mask`.
pub trait Segmenter {
    fn segment(&mut self, image: &RgbaImage, threshold: f32) -> Result<SegmentMask>;
}

pub type SegmentFactory =
    Box<dyn FnMut(SegmentConfig, &dyn Fn(Option<f32>)) -> Result<Box<dyn Segmenter>> + Send>;

/// Owns at most one live [`Segmenter`], keyed by [`SegmentConfig`].
///
/// Unlike super-resolution there is no cheap in-place switch for the
/// segmentation runtimes; a key change rebuilds.
pub struct SegmentProvider {
    factory: SegmentFactory,
    live: Option<(SegmentConfig, Box<dyn Segmenter>)>,
}

impl SegmentProvider {
    pub fn new(factory: SegmentFactory) -> Self {
        Self {
            factory,
            live: None,
        }
    }

    pub fn unavailable() -> Self {
        Self::new(Box::new(|_, _| bail!("no segmentation provider installed")))
    }

    pub fn get(
        &mut self,
        config: SegmentConfig,
        download: &dyn Fn(Option<f32>),
    ) -> Result<&mut dyn Segmenter> {
        let reuse = matches!(&self.live, Some((key, _)) if *key == config);
        if !reuse {
            debug!(?config, "building segmentation backend");
            let instance = (self.factory)(config, download)?;
            return Ok(self.live.insert((config, instance)).1.as_mut());
        }
        let (_, instance) = self.live.as_mut().unwrap();
        Ok(instance.as_mut())
    }

    /// Drop the live instance (used when a backend proves unusable and the
    /// executor retries under another one).
    pub fn evict(&mut self) {
        self.live = None;
    }
}

// ── Injection bundle ─────────────────────────────────────────────────────

/// Everything the runner needs that the engine does not implement itself.
pub struct Capabilities {
    pub super_resolver: SrProvider,
    pub segmenter: SegmentProvider,
}

impl Capabilities {
    /// No capabilities installed; pipelines touching `remove-bg` or
    /// `upscale` will fail on those nodes with clear errors.
    pub fn unavailable() -> Self {
        Self {
            super_resolver: SrProvider::unavailable(),
            segmenter: SegmentProvider::unavailable(),
        }
    }
}

// ── Download progress aggregation ────────────────────────────────────────

/// Folds per-file `(loaded, total)` load events into one ratio: the progress
/// of the single largest file observed so far. Small sidecar files finish
/// almost instantly; the largest file is the honest signal.
pub struct DownloadTracker<'a> {
    sink: &'a dyn Fn(Option<f32>),
    largest_total: std::cell::Cell<u64>,
}

impl<'a> DownloadTracker<'a> {
    pub fn new(sink: &'a dyn Fn(Option<f32>)) -> Self {
        Self {
            sink,
            largest_total: std::cell::Cell::new(0),
        }
    }

    pub fn event(&self, loaded: u64, total: u64) {
        if total == 0 || total < self.largest_total.get() {
            return;
        }
        self.largest_total.set(total);
        (self.sink)(Some((loaded as f32 / total as f32).clamp(0.0, 1.0)));
    }

    pub fn finish(&self) {
        (self.sink)(None);
    }
}
