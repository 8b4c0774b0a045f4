//! The renderer abstraction (§4.4.4): exactly one of two conforming
//! backends is selected at `open` and used for the rest of the session.

use wgpu::*;
use winit::window::Window;

use crate::video::frame::DecodedVideoFrame;

use super::shader::{compile_shader, FitUniform, RGBA_FRAGMENT_SHADER, VERTEX_SHADER, YUV_FRAGMENT_SHADER};
use super::srv_cache::{SrvCache, SrvCacheStats, SurfaceKey};
use super::texture::{cpu_fields, PixelScaler, Texture};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("wgpu adapter/device request failed: {0}")]
    Wgpu(String),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("renderer used before init()")]
    NotInitialized,
}

/// Common contract both backends implement. `render_frame` returns `false`
/// on a per-frame failure (§7: logged and skipped by the caller, never
/// propagated as a session error).
pub trait Renderer {
    fn init(&mut self, window: &Window, width: u32, height: u32) -> Result<(), RenderError>;
    fn resize(&mut self, width: u32, height: u32);
    fn clear(&mut self);
    fn render_frame(&mut self, frame: &DecodedVideoFrame) -> bool;
    fn present(&mut self);
    /// Drops every cached GPU view/texture tied to the previous stream.
    /// Must run before the decoder recycles its surfaces (seek, stop).
    fn clear_caches(&mut self);
    fn cleanup(&mut self);
}

struct GpuContext {
    device: Device,
    queue: Queue,
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
}

impl GpuContext {
    fn new(window: &Window) -> Result<Self, RenderError> {
        let instance = Instance::new(InstanceDescriptor { backends: Backends::all(), ..Default::default() });

        // SAFETY: the surface is owned by this struct for its entire
        // lifetime; it never outlives the window it was created from in
        // practice because the renderer and the window share the session's
        // lifetime.
        let surface_raw = instance.create_surface(window).map_err(|e| RenderError::Surface(e.to_string()))?;
        let surface: Surface<'static> = unsafe { std::mem::transmute(surface_raw) };

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RenderError::Wgpu("no adapter found".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor { label: None, required_features: Features::empty(), required_limits: Limits::default() },
            None,
        ))
        .map_err(|e| RenderError::Wgpu(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps.formats.iter().copied().find(|f| f.is_srgb()).unwrap_or(caps.formats[0]);
        let size = window.inner_size();
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: caps.present_modes[0],
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        Ok(Self { device, queue, surface, surface_config })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn uniform_buffer(&self) -> Buffer {
        self.device.create_buffer(&BufferDescriptor {
            label: Some("fit-uniform"),
            size: std::mem::size_of::<FitUniform>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn write_uniform(&self, buffer: &Buffer, fit: FitUniform) {
        let bytes =
            unsafe { std::slice::from_raw_parts(&fit as *const FitUniform as *const u8, std::mem::size_of::<FitUniform>()) };
        self.queue.write_buffer(buffer, 0, bytes);
    }
}

fn uniform_plus_textures_bind_group_layout(device: &Device, texture_count: u32, label: &str) -> BindGroupLayout {
    let mut entries = vec![BindGroupLayoutEntry {
        binding: 0,
        visibility: ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Buffer { ty: BufferBindingType::Uniform, has_dynamic_offset: false, min_binding_size: None },
        count: None,
    }];
    for i in 0..texture_count {
        entries.push(BindGroupLayoutEntry {
            binding: 1 + i,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                multisampled: false,
                view_dimension: TextureViewDimension::D2,
                sample_type: TextureSampleType::Float { filterable: true },
            },
            count: None,
        });
    }
    entries.push(BindGroupLayoutEntry {
        binding: 1 + texture_count,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    });
    device.create_bind_group_layout(&BindGroupLayoutDescriptor { label: Some(label), entries: &entries })
}

fn build_pipeline(device: &Device, layout: &BindGroupLayout, format: TextureFormat, fragment_source: &str) -> RenderPipeline {
    let vertex_shader = compile_shader(device, VERTEX_SHADER);
    let fragment_shader = compile_shader(device, fragment_source);
    let pipeline_layout =
        device.create_pipeline_layout(&PipelineLayoutDescriptor { label: None, bind_group_layouts: &[layout], push_constant_ranges: &[] });

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: None,
        layout: Some(&pipeline_layout),
        vertex: VertexState { module: &vertex_shader, entry_point: "vs_main", buffers: &[], compilation_options: Default::default() },
        fragment: Some(FragmentState {
            module: &fragment_shader,
            entry_point: "fs_main",
            targets: &[Some(ColorTargetState { format, blend: Some(BlendState::REPLACE), write_mask: ColorWrites::ALL })],
            compilation_options: Default::default(),
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
        multiview: None,
    })
}

/// Creates the pair of shader-resource-views a hardware-decoded surface
/// needs (luma, chroma) from the decoder's shared GPU device. A real
/// platform backend implements this against the decoder's `device_handle()`
/// and its surface pool; it is the seam `negotiate_hw_context` exists to
/// satisfy on the decode side.
pub trait SurfaceViewProvider: Send {
    fn create_views(&self, surface_handle: u64, array_slice: u32) -> (TextureView, TextureView);
}

/// Zero-copy backend (§4.4.4). Binds directly to surfaces produced by a
/// hardware decoder sharing this renderer's GPU device; never reads pixels
/// back to the CPU.
pub struct GpuRenderer {
    ctx: Option<GpuContext>,
    pipeline: Option<RenderPipeline>,
    bind_group_layout: Option<BindGroupLayout>,
    uniform_buffer: Option<Buffer>,
    sampler: Option<Sampler>,
    views: SrvCache<(TextureView, TextureView)>,
    view_provider: Box<dyn SurfaceViewProvider>,
}

impl GpuRenderer {
    pub fn new(view_provider: Box<dyn SurfaceViewProvider>) -> Self {
        Self {
            ctx: None,
            pipeline: None,
            bind_group_layout: None,
            uniform_buffer: None,
            sampler: None,
            views: SrvCache::new(),
            view_provider,
        }
    }

    pub fn srv_cache_stats(&self) -> SrvCacheStats {
        self.views.stats()
    }

    pub fn srv_pool_len(&self) -> usize {
        self.views.len()
    }
}

impl Renderer for GpuRenderer {
    fn init(&mut self, window: &Window, width: u32, height: u32) -> Result<(), RenderError> {
        let ctx = GpuContext::new(window)?;
        let layout = uniform_plus_textures_bind_group_layout(&ctx.device, 2, "gpu-renderer-bind-group-layout");
        let pipeline = build_pipeline(&ctx.device, &layout, ctx.surface_config.format, YUV_FRAGMENT_SHADER);
        let uniform_buffer = ctx.uniform_buffer();
        let sampler = ctx.device.create_sampler(&SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });
        self.uniform_buffer = Some(uniform_buffer);
        self.sampler = Some(sampler);
        self.bind_group_layout = Some(layout);
        self.pipeline = Some(pipeline);
        self.ctx = Some(ctx);
        self.resize(width, height);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.resize(width, height);
        }
    }

    fn clear(&mut self) {
        let Some(ctx) = self.ctx.as_ref() else { return };
        let Ok(output) = ctx.surface.get_current_texture() else { return };
        let view = output.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let _pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::BLACK), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    fn render_frame(&mut self, frame: &DecodedVideoFrame) -> bool {
        let DecodedVideoFrame::GpuSurface { surface_handle, array_slice, width, height, .. } = frame else {
            // Render path selection picked this backend at open; a CPU
            // frame showing up here means decode fell back to software
            // mid-stream, which §4.4.5 says must not happen.
            return false;
        };
        let (Some(ctx), Some(pipeline), Some(layout), Some(uniform_buffer), Some(sampler)) = (
            self.ctx.as_ref(),
            self.pipeline.as_ref(),
            self.bind_group_layout.as_ref(),
            self.uniform_buffer.as_ref(),
            self.sampler.as_ref(),
        ) else {
            return false;
        };

        let Ok(output) = ctx.surface.get_current_texture() else { return false };
        let target_view = output.texture.create_view(&TextureViewDescriptor::default());

        let key = SurfaceKey { surface_handle: *surface_handle, array_slice: *array_slice };
        let provider = &self.view_provider;
        let (luma, chroma) = self.views.get_or_create(key, || provider.create_views(*surface_handle, *array_slice));

        ctx.write_uniform(
            uniform_buffer,
            FitUniform::letterboxed((ctx.surface_config.width, ctx.surface_config.height), (*width, *height)),
        );

        let bind_group = ctx.device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: BindingResource::TextureView(luma) },
                BindGroupEntry { binding: 2, resource: BindingResource::TextureView(chroma) },
                BindGroupEntry { binding: 3, resource: BindingResource::Sampler(sampler) },
            ],
        });

        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::BLACK), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        true
    }

    fn present(&mut self) {
        // Presentation happens inline in `render_frame`/`clear`; nothing
        // further to flush.
    }

    fn clear_caches(&mut self) {
        self.views.clear();
    }

    fn cleanup(&mut self) {
        self.views.clear();
        self.ctx = None;
        self.pipeline = None;
    }
}

/// CPU-fallback backend (§4.4.4): converts whatever pixel format the
/// software decoder produced to RGBA8 and uploads it into a single
/// streaming texture every frame.
pub struct CpuRenderer {
    ctx: Option<GpuContext>,
    pipeline: Option<RenderPipeline>,
    bind_group_layout: Option<BindGroupLayout>,
    uniform_buffer: Option<Buffer>,
    texture: Option<Texture>,
    scaler: PixelScaler,
}

impl CpuRenderer {
    pub fn new() -> Self {
        Self { ctx: None, pipeline: None, bind_group_layout: None, uniform_buffer: None, texture: None, scaler: PixelScaler::new() }
    }
}

impl Default for CpuRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for CpuRenderer {
    fn init(&mut self, window: &Window, width: u32, height: u32) -> Result<(), RenderError> {
        let ctx = GpuContext::new(window)?;
        let layout = uniform_plus_textures_bind_group_layout(&ctx.device, 1, "cpu-renderer-bind-group-layout");
        let pipeline = build_pipeline(&ctx.device, &layout, ctx.surface_config.format, RGBA_FRAGMENT_SHADER);
        let uniform_buffer = ctx.uniform_buffer();
        self.uniform_buffer = Some(uniform_buffer);
        self.bind_group_layout = Some(layout);
        self.pipeline = Some(pipeline);
        self.ctx = Some(ctx);
        self.resize(width, height);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.resize(width, height);
        }
    }

    fn clear(&mut self) {
        let Some(ctx) = self.ctx.as_ref() else { return };
        let Ok(output) = ctx.surface.get_current_texture() else { return };
        let view = output.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let _pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::BLACK), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    fn render_frame(&mut self, frame: &DecodedVideoFrame) -> bool {
        let Some((planes, format, width, height)) = cpu_fields(frame) else { return false };
        let Some(ctx) = self.ctx.as_ref() else { return false };
        let rgba = self.scaler.convert(planes, format, width, height);

        match &mut self.texture {
            Some(tex) if tex.width == width && tex.height == height => tex.update_rgba(&ctx.queue, rgba),
            _ => self.texture = Some(Texture::from_rgba(&ctx.device, &ctx.queue, width, height, rgba)),
        }
        let texture = self.texture.as_ref().unwrap();

        let (Some(pipeline), Some(layout), Some(uniform_buffer)) =
            (self.pipeline.as_ref(), self.bind_group_layout.as_ref(), self.uniform_buffer.as_ref())
        else {
            return false;
        };
        let Ok(output) = ctx.surface.get_current_texture() else { return false };
        let target_view = output.texture.create_view(&TextureViewDescriptor::default());

        ctx.write_uniform(uniform_buffer, FitUniform::letterboxed((ctx.surface_config.width, ctx.surface_config.height), (width, height)));

        let bind_group = ctx.device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout,
            entries: &[
                BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() },
                BindGroupEntry { binding: 1, resource: BindingResource::TextureView(&texture.view) },
                BindGroupEntry { binding: 2, resource: BindingResource::Sampler(&texture.sampler) },
            ],
        });

        let mut encoder = ctx.device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: None,
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Clear(Color::BLACK), store: StoreOp::Store },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        true
    }

    fn present(&mut self) {}

    fn clear_caches(&mut self) {
        self.texture = None;
    }

    fn cleanup(&mut self) {
        self.texture = None;
        self.ctx = None;
        self.pipeline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_fit_preserves_wider_than_output_aspect() {
        let fit = FitUniform::letterboxed((800, 600), (1600, 600));
        assert!((fit.scale[0] - 1.0).abs() < 1e-6);
        assert!(fit.scale[1] < 1.0);
    }

    #[test]
    fn letterbox_fit_preserves_taller_than_output_aspect() {
        let fit = FitUniform::letterboxed((800, 600), (400, 600));
        assert!(fit.scale[0] < 1.0);
        assert!((fit.scale[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gpu_render_frame_rejects_cpu_frame_without_touching_gpu_state() {
        struct NoopProvider;
        impl SurfaceViewProvider for NoopProvider {
            fn create_views(&self, _surface_handle: u64, _array_slice: u32) -> (TextureView, TextureView) {
                unreachable!("not exercised without a real GPU context");
            }
        }
        let mut renderer = GpuRenderer::new(Box::new(NoopProvider));
        let cpu_frame = DecodedVideoFrame::Cpu {
            planes: vec![],
            format: crate::video::frame::PixelFormat::Rgba,
            width: 1,
            height: 1,
            pts_ms: 0.0,
        };
        assert!(!renderer.render_frame(&cpu_frame));
    }

    #[test]
    fn cpu_render_frame_rejects_gpu_surface_frame() {
        let mut renderer = CpuRenderer::new();
        let gpu_frame = DecodedVideoFrame::GpuSurface { surface_handle: 1, array_slice: 0, width: 4, height: 4, pts_ms: 0.0 };
        assert!(!renderer.render_frame(&gpu_frame));
    }
}
