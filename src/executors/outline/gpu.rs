//! GPU outline: jump-flooding signed distance field, four compute stages.
//!
//! seed → ⌈log₂(max(w,h))⌉ flood steps per direction → distance → composite.
//! Every pass runs at 8×8 workgroups; seed maps ping-pong between two
//! rg32float textures per direction. All textures and buffers are destroyed
//! on every exit path via [`GpuResources`].

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

use crate::events::ExecutionContext;
use crate::frame::ImageFrame;
use crate::gpu::{transfer, GpuContext};

use super::OutlineParams;

const WORKGROUP: u32 = 8;

const SEED_WGSL: &str = r#"
@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var seed_out: texture_storage_2d<rg32float, write>;
struct SeedParams { invert: u32 };
@group(0) @binding(2) var<uniform> params: SeedParams;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3u) {
    let dims = textureDimensions(src_tex);
    if (gid.x >= dims.x || gid.y >= dims.y) { return; }
    let alpha = textureLoad(src_tex, vec2i(gid.xy), 0).a;
    let is_seed = select(alpha > 0.1, alpha <= 0.1, params.invert == 1u);
    let coord = select(vec2f(-1.0, -1.0), vec2f(gid.xy), is_seed);
    textureStore(seed_out, vec2i(gid.xy), vec4f(coord, 0.0, 0.0));
}
"#;

const FLOOD_WGSL: &str = r#"
@group(0) @binding(0) var seed_in: texture_2d<f32>;
@group(0) @binding(1) var seed_out: texture_storage_2d<rg32float, write>;
struct FloodParams { step: i32 };
@group(0) @binding(2) var<uniform> params: FloodParams;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3u) {
    let dims = vec2i(textureDimensions(seed_in));
    let pos = vec2i(gid.xy);
    if (pos.x >= dims.x || pos.y >= dims.y) { return; }

    var best = vec2f(-1.0, -1.0);
    var best_d = 1e20;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let sample_pos = pos + vec2i(dx, dy) * params.step;
            if (sample_pos.x < 0 || sample_pos.y < 0
                || sample_pos.x >= dims.x || sample_pos.y >= dims.y) {
                continue;
            }
            let cand = textureLoad(seed_in, sample_pos, 0).xy;
            if (cand.x < 0.0) { continue; }
            let d = distance(cand, vec2f(pos));
            if (d < best_d) {
                best_d = d;
                best = cand;
            }
        }
    }
    textureStore(seed_out, pos, vec4f(best, 0.0, 0.0));
}
"#;

const DISTANCE_WGSL: &str = r#"
@group(0) @binding(0) var seed_in: texture_2d<f32>;
@group(0) @binding(1) var dist_out: texture_storage_2d<r32float, write>;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3u) {
    let dims = vec2i(textureDimensions(seed_in));
    let pos = vec2i(gid.xy);
    if (pos.x >= dims.x || pos.y >= dims.y) { return; }

    let seed = textureLoad(seed_in, pos, 0).xy;
    var d = 1e20;
    if (seed.x >= 0.0) {
        d = distance(seed, vec2f(pos));
    }
    textureStore(dist_out, pos, vec4f(d, 0.0, 0.0, 0.0));
}
"#;

const COMPOSITE_WGSL: &str = r#"
@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var outer_dist: texture_2d<f32>;
@group(0) @binding(2) var inner_dist: texture_2d<f32>;
@group(0) @binding(3) var out_tex: texture_storage_2d<rgba8unorm, write>;
struct CompositeParams {
    color: vec4f,
    thickness: f32,
    position_value: f32,
    threshold: f32,
    opacity: f32,
};
@group(0) @binding(4) var<uniform> params: CompositeParams;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3u) {
    let dims = vec2i(textureDimensions(src_tex));
    let pos = vec2i(gid.xy);
    if (pos.x >= dims.x || pos.y >= dims.y) { return; }

    let src = textureLoad(src_tex, pos, 0);
    let inside = src.a > 0.1;
    let base = select(textureLoad(outer_dist, pos, 0).r,
                      -textureLoad(inner_dist, pos, 0).r,
                      inside);
    let signed_dist = base + params.threshold;

    let inner_edge = params.thickness * params.position_value;
    let outer_edge = params.thickness * (1.0 - params.position_value);
    let band = smoothstep(-outer_edge - 0.5, -outer_edge + 0.5, signed_dist)
        * (1.0 - smoothstep(inner_edge - 0.5, inner_edge + 0.5, signed_dist));
    let a = band * params.opacity;

    let rgb = mix(src.rgb, params.color.rgb, a);
    let out_a = max(src.a, a * params.color.a);
    textureStore(out_tex, pos, vec4f(rgb, out_a));
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SeedUniform {
    invert: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FloodUniform {
    step: i32,
    _pad: [i32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CompositeUniform {
    color: [f32; 4],
    thickness: f32,
    position_value: f32,
    threshold: f32,
    opacity: f32,
}

/// Owns every texture and buffer the pipeline allocates; `Drop` releases
/// them, so the abort and error paths clean up exactly like success.
#[derive(Default)]
struct GpuResources {
    textures: Vec<wgpu::Texture>,
    buffers: Vec<wgpu::Buffer>,
}

impl GpuResources {
    fn track_texture(&mut self, t: wgpu::Texture) -> wgpu::Texture {
        self.textures.push(t.clone());
        t
    }

    fn track_buffer(&mut self, b: wgpu::Buffer) -> wgpu::Buffer {
        self.buffers.push(b.clone());
        b
    }
}

impl Drop for GpuResources {
    fn drop(&mut self) {
        for t in &self.textures {
            t.destroy();
        }
        for b in &self.buffers {
            b.destroy();
        }
    }
}

pub(super) fn run(
    gpu: &GpuContext,
    source: &ImageFrame,
    params: &OutlineParams,
    ctx: &ExecutionContext<'_>,
) -> Result<RgbaImage> {
    let (w, h) = (source.width(), source.height());
    let mut resources = GpuResources::default();

    ctx.status_message(Some("computing distance field (gpu)"));

    let pipelines = Pipelines::create(gpu)?;
    let src_tex = resources.track_texture(transfer::bitmap_to_texture(
        gpu,
        source.bitmap(),
        "outline src",
        wgpu::TextureUsages::empty(),
    ));

    let make_field = |format: wgpu::TextureFormat, label: &str| {
        gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        })
    };

    let seed_a = resources.track_texture(make_field(wgpu::TextureFormat::Rg32Float, "jfa seed a"));
    let seed_b = resources.track_texture(make_field(wgpu::TextureFormat::Rg32Float, "jfa seed b"));
    let outer_dist =
        resources.track_texture(make_field(wgpu::TextureFormat::R32Float, "jfa outer dist"));
    let inner_dist =
        resources.track_texture(make_field(wgpu::TextureFormat::R32Float, "jfa inner dist"));

    let out_tex = resources.track_texture(gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("outline out"),
        size: wgpu::Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }));

    let seed_uniform = resources.track_buffer(gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("seed params"),
        size: std::mem::size_of::<SeedUniform>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    }));
    let flood_uniform = resources.track_buffer(gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("flood params"),
        size: std::mem::size_of::<FloodUniform>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    }));
    let composite_uniform =
        resources.track_buffer(gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite params"),
            size: std::mem::size_of::<CompositeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

    ctx.check_cancelled()?;
    ctx.progress(0.1);

    // Flood schedule: N = ceil(log2(max(w, h))), step halving down to 1.
    let longest = w.max(h);
    let mut steps = 0u32;
    while (1u32 << steps) < longest {
        steps += 1;
    }

    // Outer direction: seeds are the foreground.
    let outer_final = flood_direction(
        gpu,
        &pipelines,
        &src_tex,
        (&seed_a, &seed_b),
        &seed_uniform,
        &flood_uniform,
        false,
        steps,
        (w, h),
        ctx,
        (0.2, 0.35),
    )?;
    dispatch_distance(gpu, &pipelines, outer_final, &outer_dist, (w, h));
    ctx.check_cancelled()?;

    // Inner direction: seeds are the background.
    let inner_final = flood_direction(
        gpu,
        &pipelines,
        &src_tex,
        (&seed_a, &seed_b),
        &seed_uniform,
        &flood_uniform,
        true,
        steps,
        (w, h),
        ctx,
        (0.35, 0.5),
    )?;
    dispatch_distance(gpu, &pipelines, inner_final, &inner_dist, (w, h));
    ctx.check_cancelled()?;
    ctx.progress(0.8);

    // Composite.
    gpu.queue.write_buffer(
        &composite_uniform,
        0,
        bytemuck::bytes_of(&CompositeUniform {
            color: [params.color[0], params.color[1], params.color[2], 1.0],
            thickness: params.thickness,
            position_value: params.position_value,
            threshold: params.threshold,
            opacity: params.opacity,
        }),
    );
    let (src_view, outer_view, inner_view, out_view) = (
        view(&src_tex),
        view(&outer_dist),
        view(&inner_dist),
        view(&out_tex),
    );
    let composite_bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("composite bind"),
        layout: &pipelines.composite_layout,
        entries: &[
            tex_entry(0, &src_view),
            tex_entry(1, &outer_view),
            tex_entry(2, &inner_view),
            tex_entry(3, &out_view),
            wgpu::BindGroupEntry {
                binding: 4,
                resource: composite_uniform.as_entire_binding(),
            },
        ],
    });
    dispatch(gpu, &pipelines.composite, &composite_bind, (w, h));
    ctx.check_cancelled()?;
    ctx.progress(0.95);

    let bitmap = transfer::texture_to_bitmap(gpu, &out_tex).context("outline readback failed")?;
    ctx.check_cancelled()?;
    ctx.status_message(None);
    Ok(bitmap)
}

struct Pipelines {
    seed: wgpu::ComputePipeline,
    seed_layout: wgpu::BindGroupLayout,
    flood: wgpu::ComputePipeline,
    flood_layout: wgpu::BindGroupLayout,
    distance: wgpu::ComputePipeline,
    distance_layout: wgpu::BindGroupLayout,
    composite: wgpu::ComputePipeline,
    composite_layout: wgpu::BindGroupLayout,
}

impl Pipelines {
    fn create(gpu: &GpuContext) -> Result<Self> {
        let device = &gpu.device;

        let texture_binding = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let storage_binding = |binding: u32, format: wgpu::TextureFormat| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }
        };
        let uniform_binding = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let build = |label: &str,
                     source: &str,
                     entries: &[wgpu::BindGroupLayoutEntry]|
         -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            });
            let pipeline_layout =
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
            (pipeline, layout)
        };

        let (seed, seed_layout) = build(
            "jfa seed",
            SEED_WGSL,
            &[
                texture_binding(0),
                storage_binding(1, wgpu::TextureFormat::Rg32Float),
                uniform_binding(2),
            ],
        );
        let (flood, flood_layout) = build(
            "jfa flood",
            FLOOD_WGSL,
            &[
                texture_binding(0),
                storage_binding(1, wgpu::TextureFormat::Rg32Float),
                uniform_binding(2),
            ],
        );
        let (distance, distance_layout) = build(
            "jfa distance",
            DISTANCE_WGSL,
            &[
                texture_binding(0),
                storage_binding(1, wgpu::TextureFormat::R32Float),
            ],
        );
        let (composite, composite_layout) = build(
            "outline composite",
            COMPOSITE_WGSL,
            &[
                texture_binding(0),
                texture_binding(1),
                texture_binding(2),
                storage_binding(3, wgpu::TextureFormat::Rgba8Unorm),
                uniform_binding(4),
            ],
        );

        Ok(Self {
            seed,
            seed_layout,
            flood,
            flood_layout,
            distance,
            distance_layout,
            composite,
            composite_layout,
        })
    }
}

fn view(texture: &wgpu::Texture) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn tex_entry<'a>(binding: u32, view: &'a wgpu::TextureView) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

/// Seed + full flood schedule for one direction; returns the texture holding
/// the final seed map.
#[allow(clippy::too_many_arguments)]
fn flood_direction<'a>(
    gpu: &GpuContext,
    pipelines: &Pipelines,
    src_tex: &wgpu::Texture,
    (seed_a, seed_b): (&'a wgpu::Texture, &'a wgpu::Texture),
    seed_uniform: &wgpu::Buffer,
    flood_uniform: &wgpu::Buffer,
    invert: bool,
    steps: u32,
    (w, h): (u32, u32),
    ctx: &ExecutionContext<'_>,
    (progress_from, progress_to): (f32, f32),
) -> Result<&'a wgpu::Texture> {
    gpu.queue.write_buffer(
        seed_uniform,
        0,
        bytemuck::bytes_of(&SeedUniform {
            invert: u32::from(invert),
            _pad: [0; 3],
        }),
    );
    let src_view = view(src_tex);
    let view_a = view(seed_a);
    let view_b = view(seed_b);

    let seed_bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("seed bind"),
        layout: &pipelines.seed_layout,
        entries: &[
            tex_entry(0, &src_view),
            tex_entry(1, &view_a),
            wgpu::BindGroupEntry {
                binding: 2,
                resource: seed_uniform.as_entire_binding(),
            },
        ],
    });
    dispatch(gpu, &pipelines.seed, &seed_bind, (w, h));
    ctx.check_cancelled()?;
    ctx.progress(progress_from);

    let flood_ab = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("flood a->b"),
        layout: &pipelines.flood_layout,
        entries: &[
            tex_entry(0, &view_a),
            tex_entry(1, &view_b),
            wgpu::BindGroupEntry {
                binding: 2,
                resource: flood_uniform.as_entire_binding(),
            },
        ],
    });
    let flood_ba = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("flood b->a"),
        layout: &pipelines.flood_layout,
        entries: &[
            tex_entry(0, &view_b),
            tex_entry(1, &view_a),
            wgpu::BindGroupEntry {
                binding: 2,
                resource: flood_uniform.as_entire_binding(),
            },
        ],
    });

    let mut current_is_a = true;
    for i in 0..steps {
        // Largest jump first; the final iteration reaches step 1.
        let step = 1i32 << (steps - 1 - i);
        gpu.queue.write_buffer(
            flood_uniform,
            0,
            bytemuck::bytes_of(&FloodUniform {
                step,
                _pad: [0; 3],
            }),
        );
        let bind = if current_is_a { &flood_ab } else { &flood_ba };
        dispatch(gpu, &pipelines.flood, bind, (w, h));
        current_is_a = !current_is_a;

        ctx.check_cancelled()?;
        ctx.status_message(Some(&format!("flooding {}/{steps}", i + 1)));
        let t = (i + 1) as f32 / steps.max(1) as f32;
        ctx.progress(progress_from + (progress_to - progress_from) * t);
    }

    ctx.progress(progress_to);
    Ok(if current_is_a { seed_a } else { seed_b })
}

fn dispatch_distance(
    gpu: &GpuContext,
    pipelines: &Pipelines,
    seed_tex: &wgpu::Texture,
    dist_tex: &wgpu::Texture,
    (w, h): (u32, u32),
) {
    let seed_view = view(seed_tex);
    let dist_view = view(dist_tex);
    let bind = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("distance bind"),
        layout: &pipelines.distance_layout,
        entries: &[tex_entry(0, &seed_view), tex_entry(1, &dist_view)],
    });
    dispatch(gpu, &pipelines.distance, &bind, (w, h));
}

fn dispatch(
    gpu: &GpuContext,
    pipeline: &wgpu::ComputePipeline,
    bind: &wgpu::BindGroup,
    (w, h): (u32, u32),
) {
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("outline pass"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("outline pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.dispatch_workgroups(w.div_ceil(WORKGROUP), h.div_ceil(WORKGROUP), 1);
    }
    gpu.queue.submit(std::iter::once(encoder.finish()));
}
