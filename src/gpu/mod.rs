//! GPU device acquisition and the process-wide device singleton.
//!
//! The device is cached behind a single initialization guard; a `lost` event
//! clears the cache so subsequent [`device`] calls return `None` until
//! [`init`] runs again. Callers must tolerate `None` by taking CPU fallback
//! paths where the executor defines one.

pub mod transfer;

use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}

fn cell() -> &'static Mutex<Option<Arc<GpuContext>>> {
    static CELL: OnceLock<Mutex<Option<Arc<GpuContext>>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(None))
}

/// Acquire (or return the cached) GPU device.
///
/// The guard mutex is held across creation, so concurrent first calls result
/// in exactly one device request.
pub fn init() -> Result<Arc<GpuContext>> {
    let mut slot = cell().lock().map_err(|_| anyhow!("gpu cache poisoned"))?;
    if let Some(ctx) = slot.as_ref() {
        return Ok(ctx.clone());
    }

    let ctx = Arc::new(create_context()?);
    debug!(adapter = %ctx.adapter_info.name, "gpu device acquired");
    *slot = Some(ctx.clone());
    Ok(ctx)
}

/// The cached device, if any. Never triggers initialization.
pub fn device() -> Option<Arc<GpuContext>> {
    cell().lock().ok().and_then(|slot| slot.clone())
}

/// Drop the cached device. Called from the device-lost hook; also useful in
/// tests.
pub fn invalidate() {
    if let Ok(mut slot) = cell().lock() {
        *slot = None;
    }
}

fn create_context() -> Result<GpuContext> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;

        let adapter_info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("pipemagic gpu device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                    ..Default::default()
                },
                None,
            )
            .await
            .context("gpu device request failed")?;

        device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, message, "gpu device lost; dropping cached device");
            invalidate();
        });

        Ok(GpuContext {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
        })
    })
}
