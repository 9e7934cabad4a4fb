//! Bitmap ↔ texture transfer.
//!
//! Readback goes through a staging buffer whose row stride is padded up to
//! `COPY_BYTES_PER_ROW_ALIGNMENT` (256); rows are compacted after mapping.

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

use super::GpuContext;

/// Upload an RGBA8 bitmap into a freshly-created texture.
pub fn bitmap_to_texture(
    gpu: &GpuContext,
    bitmap: &RgbaImage,
    label: &str,
    extra_usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    let (width, height) = bitmap.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | extra_usage,
        view_formats: &[],
    });

    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bitmap.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );

    texture
}

/// Read an RGBA8 texture back into a bitmap.
///
/// The staging buffer is destroyed on every path out of this function.
pub fn texture_to_bitmap(gpu: &GpuContext, texture: &wgpu::Texture) -> Result<RgbaImage> {
    let width = texture.width();
    let height = texture.height();

    let unpadded_bytes_per_row = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(align) * align;

    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let result = map_and_compact(
        gpu,
        &staging,
        width,
        height,
        unpadded_bytes_per_row as usize,
        padded_bytes_per_row as usize,
    );
    staging.destroy();
    result
}

fn map_and_compact(
    gpu: &GpuContext,
    staging: &wgpu::Buffer,
    width: u32,
    height: u32,
    unpadded: usize,
    padded: usize,
) -> Result<RgbaImage> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    gpu.device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| anyhow!("readback map channel closed"))?
        .context("readback map failed")?;

    let data = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity(unpadded * height as usize);
    for row in data.chunks(padded) {
        pixels.extend_from_slice(&row[..unpadded]);
    }
    drop(data);
    staging.unmap();

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("readback produced a malformed pixel buffer"))
}

#[cfg(test)]
mod tests {
    #[test]
    fn padded_stride_rounds_up_to_256() {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        for (width, expected) in [(1u32, 256u32), (64, 256), (65, 512), (640, 2560)] {
            let padded = (4 * width).div_ceil(align) * align;
            assert_eq!(padded, expected, "width {width}");
        }
    }
}
