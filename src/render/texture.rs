//! A streaming RGBA texture the CPU-fallback backend re-uploads into every
//! frame, plus the host-side pixel scaler that gets it into RGBA8 first.
//! Grounded in this corpus's texture-cache-per-layer approach: same
//! recreate-on-size-change / update-in-place split, narrowed to one texture
//! since the player renders a single stream rather than a layer stack.

use wgpu::*;

use crate::video::frame::{DecodedVideoFrame, PixelFormat, Plane};

pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    pub fn from_rgba(device: &Device, queue: &Queue, width: u32, height: u32, rgba: &[u8]) -> Self {
        let size = Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 };
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("cpu-frame-texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if !rgba.is_empty() {
            queue.write_texture(
                ImageCopyTexture { texture: &texture, mip_level: 0, origin: Origin3d::ZERO, aspect: TextureAspect::All },
                rgba,
                ImageDataLayout { offset: 0, bytes_per_row: Some(4 * size.width), rows_per_image: Some(size.height) },
                size,
            );
        }
        let view = texture.create_view(&TextureViewDescriptor::default());
        let sampler = device.create_sampler(&SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });
        Self { texture, view, sampler, width: size.width, height: size.height }
    }

    pub fn update_rgba(&self, queue: &Queue, rgba: &[u8]) {
        queue.write_texture(
            ImageCopyTexture { texture: &self.texture, mip_level: 0, origin: Origin3d::ZERO, aspect: TextureAspect::All },
            rgba,
            ImageDataLayout { offset: 0, bytes_per_row: Some(4 * self.width), rows_per_image: Some(self.height) },
            Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
    }
}

/// Converts a CPU-decoded frame to tightly-packed RGBA8, reusing its output
/// buffer across calls and only reallocating when the source resolution or
/// format changes — this is the "scaler kept between frames" §4.4.4 calls
/// for.
#[derive(Default)]
pub struct PixelScaler {
    last_format: Option<(PixelFormat, u32, u32)>,
    buffer: Vec<u8>,
}

impl PixelScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an RGBA8-packed view of `frame`. For `PixelFormat::Rgba` this
    /// is close to a direct copy; planar/semi-planar formats are converted
    /// in software.
    pub fn convert(&mut self, planes: &[Plane], format: PixelFormat, width: u32, height: u32) -> &[u8] {
        let key = (format, width, height);
        if self.last_format != Some(key) {
            self.buffer.clear();
            self.buffer.resize(width as usize * height as usize * 4, 0);
            self.last_format = Some(key);
        }
        match format {
            PixelFormat::Rgba => copy_rgba(planes, width, height, &mut self.buffer),
            PixelFormat::Yuv420p => convert_yuv420p(planes, width, height, &mut self.buffer),
            PixelFormat::Nv12 => convert_nv12(planes, width, height, &mut self.buffer),
        }
        &self.buffer
    }
}

fn copy_rgba(planes: &[Plane], width: u32, height: u32, out: &mut [u8]) {
    let Some(plane) = planes.first() else { return };
    let row_bytes = width as usize * 4;
    for row in 0..height as usize {
        let src = &plane.data[row * plane.stride..row * plane.stride + row_bytes.min(plane.stride)];
        let dst = &mut out[row * row_bytes..row * row_bytes + src.len()];
        dst.copy_from_slice(src);
    }
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    [r, g, b, 255]
}

fn convert_yuv420p(planes: &[Plane], width: u32, height: u32, out: &mut [u8]) {
    if planes.len() < 3 {
        return;
    }
    let (w, h) = (width as usize, height as usize);
    for row in 0..h {
        for col in 0..w {
            let y = planes[0].data[row * planes[0].stride + col];
            let u = planes[1].data[(row / 2) * planes[1].stride + col / 2];
            let v = planes[2].data[(row / 2) * planes[2].stride + col / 2];
            out[(row * w + col) * 4..(row * w + col) * 4 + 4].copy_from_slice(&yuv_to_rgba(y, u, v));
        }
    }
}

fn convert_nv12(planes: &[Plane], width: u32, height: u32, out: &mut [u8]) {
    if planes.len() < 2 {
        return;
    }
    let (w, h) = (width as usize, height as usize);
    for row in 0..h {
        for col in 0..w {
            let y = planes[0].data[row * planes[0].stride + col];
            let chroma_row = (row / 2) * planes[1].stride;
            let u = planes[1].data[chroma_row + (col / 2) * 2];
            let v = planes[1].data[chroma_row + (col / 2) * 2 + 1];
            out[(row * w + col) * 4..(row * w + col) * 4 + 4].copy_from_slice(&yuv_to_rgba(y, u, v));
        }
    }
}

/// Extracts `(planes, format, width, height)` from a CPU-resident frame;
/// `None` for a `GpuSurface` frame, which has no CPU pixel data to scale.
pub fn cpu_fields(frame: &DecodedVideoFrame) -> Option<(&[Plane], PixelFormat, u32, u32)> {
    match frame {
        DecodedVideoFrame::Cpu { planes, format, width, height, .. } => Some((planes, *format, *width, *height)),
        DecodedVideoFrame::GpuSurface { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_passthrough_preserves_pixel_values() {
        let mut scaler = PixelScaler::new();
        let plane = Plane { data: vec![10, 20, 30, 255, 40, 50, 60, 255], stride: 8 };
        let out = scaler.convert(&[plane], PixelFormat::Rgba, 2, 1).to_vec();
        assert_eq!(out, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn yuv420p_full_white_converts_near_white() {
        let mut scaler = PixelScaler::new();
        let y = Plane { data: vec![235; 4], stride: 2 };
        let u = Plane { data: vec![128], stride: 1 };
        let v = Plane { data: vec![128], stride: 1 };
        let out = scaler.convert(&[y, u, v], PixelFormat::Yuv420p, 2, 2).to_vec();
        for px in out.chunks(4) {
            assert!(px[0] > 200 && px[1] > 200 && px[2] > 200);
        }
    }

    #[test]
    fn reinitializes_buffer_on_resolution_change() {
        let mut scaler = PixelScaler::new();
        let plane = Plane { data: vec![0; 16], stride: 4 };
        scaler.convert(&[plane.clone()], PixelFormat::Rgba, 2, 2);
        assert_eq!(scaler.buffer.len(), 2 * 2 * 4);
        let bigger = Plane { data: vec![0; 64], stride: 16 };
        scaler.convert(&[bigger], PixelFormat::Rgba, 4, 4);
        assert_eq!(scaler.buffer.len(), 4 * 4 * 4);
    }
}
