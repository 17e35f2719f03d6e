//! GPU compositor using wgpu shaders.
//!
//! The background, drop shadow, rounded/zoomed video layer and border are
//! evaluated in a single fragment pass (SDF-based, like the CPU path).
//! Camera overlay and annotations are composited on the CPU after readback,
//! keeping the shader small and the two implementations pixel-compatible.

use std::sync::Arc;

use wgpu::{Device, Queue};

use crate::error::{ExportError, ExportResult};
use crate::render::annotations::AnnotationPainter;
use crate::render::camera::draw_camera;
use crate::render::types::DecodedFrame;
use crate::render::{Compositor, RenderMode, Scene};
use crate::zoom::ZoomAnimator;

/// WGSL shader: background + shadow + rounded/zoomed video layer + border.
const COMPOSITOR_SHADER: &str = r#"
struct Uniforms {
    output_size: vec4<f32>,   // width, height, 0, 0
    content_rect: vec4<f32>,  // x, y, width, height in pixels
    radius_border: vec4<f32>, // corner_radius_px, border_width_px, 0, 0
    border_color: vec4<f32>,  // r, g, b, a
    shadow: vec4<f32>,        // offset_y, spread, blur, opacity
    zoom: vec4<f32>,          // scale, focus_x, focus_y, 0
    crop: vec4<f32>,          // x, y, width, height (normalized)
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var video_texture: texture_2d<f32>;
@group(0) @binding(2) var background_texture: texture_2d<f32>;
@group(0) @binding(3) var layer_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0)
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0)
    );

    var output: VertexOutput;
    output.position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
    output.uv = uvs[vertex_index];
    return output;
}

// Signed distance function for a rounded rectangle; negative inside.
fn sdf_rounded_rect(p: vec2<f32>, half_size: vec2<f32>, radius: f32) -> f32 {
    let r = min(radius, min(half_size.x, half_size.y));
    let d = abs(p) - half_size + vec2<f32>(r);
    return length(max(d, vec2<f32>(0.0))) + min(max(d.x, d.y), 0.0) - r;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel_pos = input.uv * uniforms.output_size.xy;

    let rect_pos = uniforms.content_rect.xy;
    let rect_size = uniforms.content_rect.zw;
    let rect_center = rect_pos + rect_size * 0.5;
    let half_size = rect_size * 0.5;
    let radius = uniforms.radius_border.x;
    let border_width = uniforms.radius_border.y;

    var color = textureSample(background_texture, layer_sampler, input.uv);

    // Drop shadow behind the video layer.
    let shadow_opacity = uniforms.shadow.w;
    if (shadow_opacity > 0.0) {
        let offset = vec2<f32>(0.0, uniforms.shadow.x);
        let spread = uniforms.shadow.y;
        let blur = max(uniforms.shadow.z, 0.5);
        let shadow_dist = sdf_rounded_rect(
            pixel_pos - rect_center - offset,
            half_size + vec2<f32>(spread),
            radius + spread
        );
        let shadow_alpha = (1.0 - smoothstep(-blur, blur, shadow_dist)) * shadow_opacity;
        color = mix(color, vec4<f32>(0.0, 0.0, 0.0, 1.0), shadow_alpha);
    }

    let rel = pixel_pos - rect_center;
    let dist = sdf_rounded_rect(rel, half_size, radius);

    // Video layer with zoom-toward-focus sampling.
    if (dist <= 0.5) {
        let frame_uv = (pixel_pos - rect_pos) / rect_size;
        var video_uv = frame_uv;
        let scale = uniforms.zoom.x;
        if (scale > 1.0) {
            video_uv = uniforms.zoom.yz + (frame_uv - vec2<f32>(0.5)) / scale;
        }
        video_uv = clamp(video_uv, vec2<f32>(0.0), vec2<f32>(1.0));
        video_uv = uniforms.crop.xy + video_uv * uniforms.crop.zw;

        let video_color = textureSample(video_texture, layer_sampler, video_uv);
        let coverage = clamp(0.5 - dist, 0.0, 1.0);
        color = mix(color, vec4<f32>(video_color.rgb, 1.0), coverage);
    }

    // Border ring outside the layer edge.
    if (border_width > 0.0 && dist > 0.0 && dist <= border_width) {
        let fade_out = clamp(border_width - dist + 0.5, 0.0, 1.0);
        let fade_in = clamp(dist + 0.5, 0.0, 1.0);
        let ring = min(fade_out, fade_in) * uniforms.border_color.a;
        color = mix(color, vec4<f32>(uniforms.border_color.rgb, 1.0), ring);
    }

    return vec4<f32>(color.rgb, 1.0);
}
"#;

/// Uniform block matching the WGSL layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    output_size: [f32; 4],
    content_rect: [f32; 4],
    radius_border: [f32; 4],
    border_color: [f32; 4],
    shadow: [f32; 4],
    zoom: [f32; 4],
    crop: [f32; 4],
}

/// GPU implementation of the frame pipeline.
pub struct GpuCompositor {
    scene: Arc<Scene>,
    animator: ZoomAnimator,
    painter: AnnotationPainter,
    device: Device,
    queue: Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    background_view: wgpu::TextureView,
    output_texture: wgpu::Texture,
    readback_buffer: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl GpuCompositor {
    pub fn new(scene: Arc<Scene>) -> ExportResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| ExportError::Gpu(format!("no GPU adapter: {}", e)))?;

        log::info!("[RENDER] GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("ReelForge Compositor"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| ExportError::Gpu(format!("device request failed: {}", e)))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Compositor Shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITOR_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compositor Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compositor Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Compositor Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Compositor Uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Layer Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // The background never changes: upload it once.
        let background_texture = create_rgba_texture(
            &device,
            &queue,
            &scene.background,
            scene.out_w,
            scene.out_h,
            "Background Layer",
        );
        let background_view =
            background_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let output_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width: scene.out_w,
                height: scene.out_h,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        // wgpu requires row alignment to 256 bytes for texture -> buffer copies.
        let bytes_per_row = 4 * scene.out_w;
        let padded_bytes_per_row = (bytes_per_row + 255) & !255;
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded_bytes_per_row * scene.out_h) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let animator = ZoomAnimator::new(&scene.zoom_regions);
        let painter = AnnotationPainter::new(&scene.annotations, scene.preview_scale);

        Ok(Self {
            scene,
            animator,
            painter,
            device,
            queue,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler,
            background_view,
            output_texture,
            readback_buffer,
            padded_bytes_per_row,
        })
    }

    fn uniforms(&self, zoom: &crate::zoom::ZoomSample) -> Uniforms {
        let scene = &self.scene;
        let rect = scene.layout.content;
        let min_dim = rect.w.min(rect.h);
        let strength = (scene.shadow_intensity / 100.0).clamp(0.0, 1.0);

        let (border_px, border_color) = match scene.border {
            Some((width, color)) => (
                width,
                [
                    color[0] as f32 / 255.0,
                    color[1] as f32 / 255.0,
                    color[2] as f32 / 255.0,
                    color[3] as f32 / 255.0,
                ],
            ),
            None => (0.0, [0.0; 4]),
        };

        Uniforms {
            output_size: [scene.out_w as f32, scene.out_h as f32, 0.0, 0.0],
            content_rect: [rect.x, rect.y, rect.w, rect.h],
            radius_border: [scene.radius_px, border_px, 0.0, 0.0],
            border_color,
            shadow: [
                0.012 * min_dim * strength,
                0.008 * min_dim * strength,
                0.035 * min_dim * strength,
                0.65 * strength,
            ],
            zoom: [zoom.scale, zoom.focus_x, zoom.focus_y, 0.0],
            crop: [
                scene.crop.x,
                scene.crop.y,
                scene.crop.width,
                scene.crop.height,
            ],
        }
    }

    /// Copy the rendered texture back to the CPU, stripping row padding.
    fn read_output(&self) -> ExportResult<Vec<u8>> {
        let out_w = self.scene.out_w;
        let out_h = self.scene.out_h;
        let bytes_per_row = 4 * out_w;

        let buffer_slice = self.readback_buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);
        rx.recv()
            .map_err(|_| ExportError::Gpu("readback channel closed".to_string()))?
            .map_err(|e| ExportError::Gpu(format!("buffer map failed: {:?}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let mut result = Vec::with_capacity((bytes_per_row * out_h) as usize);
        if self.padded_bytes_per_row == bytes_per_row {
            result.extend_from_slice(&data);
        } else {
            for row in 0..out_h {
                let start = (row * self.padded_bytes_per_row) as usize;
                result.extend_from_slice(&data[start..start + bytes_per_row as usize]);
            }
        }
        drop(data);
        self.readback_buffer.unmap();
        Ok(result)
    }
}

impl Compositor for GpuCompositor {
    fn compose(
        &mut self,
        screen: &DecodedFrame,
        camera: Option<&DecodedFrame>,
        effective_ms: u64,
    ) -> ExportResult<Vec<u8>> {
        let zoom = self.animator.tick(effective_ms);

        let video_texture = create_rgba_texture(
            &self.device,
            &self.queue,
            &screen.data,
            screen.width,
            screen.height,
            "Video Frame",
        );
        let video_view = video_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let output_view = self
            .output_texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = self.uniforms(&zoom);
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compositor Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&video_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.background_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compositor Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Compositor Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.output_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.scene.out_h),
                },
            },
            wgpu::Extent3d {
                width: self.scene.out_w,
                height: self.scene.out_h,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(Some(encoder.finish()));

        let mut output = self.read_output()?;

        // Camera overlay and annotations run on the CPU after readback,
        // identical to the software path.
        if let (Some(placement), Some(camera_frame)) = (&self.scene.camera, camera) {
            draw_camera(
                &mut output,
                self.scene.out_w,
                self.scene.out_h,
                placement,
                camera_frame,
            );
        }
        self.painter
            .paint(&mut output, self.scene.out_w, self.scene.out_h, effective_ms);

        Ok(output)
    }

    fn settle_animation(&mut self, effective_ms: u64) {
        self.animator.settle_at(effective_ms);
    }

    fn mode(&self) -> RenderMode {
        RenderMode::Gpu
    }
}

/// Upload an RGBA buffer as a sampleable texture.
fn create_rgba_texture(
    device: &Device,
    queue: &Queue,
    data: &[u8],
    width: u32,
    height: u32,
    label: &str,
) -> wgpu::Texture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    texture
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::tests_support::minimal_config;

    /// GPU pixel test; skipped when no adapter is present (CI).
    #[test]
    fn test_gpu_compose_matches_layer_geometry() {
        let mut config = minimal_config();
        config.output.width = 256;
        config.output.height = 144;
        config.source_width = 256;
        config.source_height = 144;
        config.preview_width = 256;
        config.preview_height = 144;
        config.style.padding_percent = 10.0;
        config.style.wallpaper = crate::project::WallpaperSpec::Css {
            value: "#203040".to_string(),
        };
        let scene = Arc::new(Scene::build(&config).unwrap());

        let mut compositor = match GpuCompositor::new(scene) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("[SKIP] GPU not available: {}", e);
                return;
            }
        };

        let mut frame = DecodedFrame::empty(256, 144);
        frame
            .data
            .chunks_exact_mut(4)
            .for_each(|px| px.copy_from_slice(&[255, 255, 255, 255]));

        let output = compositor.compose(&frame, None, 0).unwrap();
        assert_eq!(output.len(), 256 * 144 * 4);

        // Padded corner shows the background color.
        assert_eq!(&output[0..3], &[0x20, 0x30, 0x40]);
        // Center shows the white video layer.
        let idx = ((72 * 256 + 128) * 4) as usize;
        assert!(output[idx] > 240);
    }
}
