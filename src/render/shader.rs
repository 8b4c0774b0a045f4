//! Shaders for the two render backends. Both share one vertex stage that
//! draws a full-screen quad and letterboxes it within the window by scaling
//! and centering according to a host-computed `FitUniform` — the same
//! position/scale/output-size/frame-size shape this corpus's compositor used
//! for per-layer transforms, here reused with position fixed at center and
//! scale carrying the letterbox fit factor instead of an editor-authored
//! transform.

use wgpu::*;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FitUniform {
    pub position: [f32; 2],
    pub scale: [f32; 2],
    pub _padding: [f32; 2],
    pub output_size: [f32; 2],
    pub frame_size: [f32; 2],
}

impl FitUniform {
    /// `scale` that letterboxes `frame_size` within `output_size` while
    /// preserving aspect ratio; `position` stays centered.
    pub fn letterboxed(output_size: (u32, u32), frame_size: (u32, u32)) -> Self {
        let (ow, oh) = (output_size.0.max(1) as f32, output_size.1.max(1) as f32);
        let (fw, fh) = (frame_size.0.max(1) as f32, frame_size.1.max(1) as f32);
        let output_aspect = ow / oh;
        let frame_aspect = fw / fh;
        let (scale_x, scale_y) = if frame_aspect > output_aspect {
            (1.0, output_aspect / frame_aspect)
        } else {
            (frame_aspect / output_aspect, 1.0)
        };
        Self {
            position: [0.5, 0.5],
            scale: [scale_x, scale_y],
            _padding: [0.0, 0.0],
            output_size: [ow, oh],
            frame_size: [fw, fh],
        }
    }
}

pub const VERTEX_SHADER: &str = r#"
    struct FitUniform {
        position: vec2<f32>,
        scale: vec2<f32>,
        _padding: vec2<f32>,
        output_size: vec2<f32>,
        frame_size: vec2<f32>,
    };

    @group(0) @binding(0) var<uniform> fit: FitUniform;

    struct VertexOutput {
        @location(0) tex_coords: vec2<f32>,
        @builtin(position) clip_position: vec4<f32>,
    };

    @vertex
    fn vs_main(@builtin(vertex_index) in_vertex_index: u32) -> VertexOutput {
        var out: VertexOutput;

        var x = f32((in_vertex_index << 1u) & 2u) * 2.0 - 1.0;
        var y = f32(in_vertex_index & 2u) * 2.0 - 1.0;

        out.tex_coords = vec2<f32>((x + 1.0) * 0.5, 1.0 - (y + 1.0) * 0.5);

        x *= fit.scale.x;
        y *= fit.scale.y;
        x += (fit.position.x - 0.5) * 2.0;
        y -= (fit.position.y - 0.5) * 2.0;

        out.clip_position = vec4<f32>(x, y, 0.0, 1.0);
        return out;
    }
"#;

/// Straight RGBA sample, used by the CPU-fallback backend after it has
/// already done format conversion host-side.
pub const RGBA_FRAGMENT_SHADER: &str = r#"
    @group(0) @binding(1) var t_texture: texture_2d<f32>;
    @group(0) @binding(2) var s_sampler: sampler;

    struct VertexOutput {
        @location(0) tex_coords: vec2<f32>,
        @builtin(position) clip_position: vec4<f32>,
    };

    @fragment
    fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
        return textureSample(t_texture, s_sampler, in.tex_coords);
    }
"#;

/// Samples luma and chroma planes directly from the decoder's surfaces and
/// converts BT.601 YUV to RGB in-shader — this is what makes the GPU path
/// zero-copy: no CPU-side conversion pass ever touches the pixel data.
pub const YUV_FRAGMENT_SHADER: &str = r#"
    @group(0) @binding(1) var t_luma: texture_2d<f32>;
    @group(0) @binding(2) var t_chroma: texture_2d<f32>;
    @group(0) @binding(3) var s_sampler: sampler;

    struct VertexOutput {
        @location(0) tex_coords: vec2<f32>,
        @builtin(position) clip_position: vec4<f32>,
    };

    @fragment
    fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
        let y = textureSample(t_luma, s_sampler, in.tex_coords).r;
        let uv = textureSample(t_chroma, s_sampler, in.tex_coords).rg - vec2<f32>(0.5, 0.5);

        let r = y + 1.402 * uv.y;
        let g = y - 0.344136 * uv.x - 0.714136 * uv.y;
        let b = y + 1.772 * uv.x;

        return vec4<f32>(r, g, b, 1.0);
    }
"#;

pub fn compile_shader(device: &Device, source: &str) -> ShaderModule {
    device.create_shader_module(ShaderModuleDescriptor { label: None, source: ShaderSource::Wgsl(source.into()) })
}
