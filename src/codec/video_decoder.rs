//! Video decoder wrapping an FFmpeg codec context. Software path only; see
//! [`crate::video::hw_decoder`] for the hardware-surface negotiation this
//! decoder attaches to when a hardware decoder context is supplied.

use ffmpeg_next::codec::{self, decoder::Video as FfmpegVideoDecoder};
use ffmpeg_next::ffi;
use ffmpeg_next::util::frame::video::Video as FfmpegVideoFrame;

use crate::error::{EngineError, ErrorKind};
use crate::video::frame::{DecodedVideoFrame, PixelFormat, Plane};

fn pixel_format_from_ffmpeg(format: ffmpeg_next::format::Pixel) -> Option<PixelFormat> {
    use ffmpeg_next::format::Pixel;
    match format {
        Pixel::YUV420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        _ => None,
    }
}

fn plane_count(format: PixelFormat) -> usize {
    match format {
        PixelFormat::Yuv420p => 3,
        PixelFormat::Nv12 => 2,
        PixelFormat::Rgba => 1,
    }
}

/// The video decode worker's view of a decoder: feed packets, drain frames,
/// flush at a seek boundary. A seam for exercising scheduler/queue behavior
/// in tests without a real codec context.
#[cfg_attr(test, mockall::automock)]
pub trait VideoFrameDecoder: Send {
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedVideoFrame>, EngineError>;
    fn flush(&mut self) -> Result<Vec<DecodedVideoFrame>, EngineError>;
    fn reset(&mut self);
}

pub struct VideoDecoderFfmpeg {
    decoder: FfmpegVideoDecoder,
    time_base: (i32, i32),
    is_hw_accelerated: bool,
}

impl VideoDecoderFfmpeg {
    pub fn new(parameters: ffmpeg_next::codec::Parameters, time_base: (i32, i32)) -> Result<Self, EngineError> {
        let context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| EngineError::new(ErrorKind::DecoderInitFailed, format!("video decoder context: {e}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| EngineError::new(ErrorKind::DecoderInitFailed, format!("video decoder open: {e}")))?;
        Ok(Self { decoder, time_base, is_hw_accelerated: false })
    }

    pub fn is_hw_accelerated(&self) -> bool {
        self.is_hw_accelerated
    }

    fn pts_to_ms(&self, pts: i64) -> f64 {
        let (num, den) = self.time_base;
        if den == 0 {
            return 0.0;
        }
        pts as f64 * num as f64 * 1000.0 / den as f64
    }

    /// Sends one encoded packet and drains every frame it unblocks. A single
    /// packet may yield zero frames (B-frame reordering) or several.
    pub fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedVideoFrame>, EngineError> {
        let mut packet = ffmpeg_next::Packet::copy(data);
        if let Some(pts) = pts {
            unsafe { (*packet.as_mut_ptr()).pts = pts };
        }

        match self.decoder.send_packet(&packet) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::EAGAIN => {
                let mut frames = self.receive_frames()?;
                if self.decoder.send_packet(&packet).is_ok() {
                    frames.extend(self.receive_frames()?);
                }
                return Ok(frames);
            }
            Err(e) => return Err(EngineError::new(ErrorKind::DecodeFailed, format!("send_packet: {e}"))),
        }

        self.receive_frames()
    }

    pub fn flush(&mut self) -> Result<Vec<DecodedVideoFrame>, EngineError> {
        let mut frames = self.receive_frames()?;
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg_next::Error::Eof) => {}
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::EAGAIN => {
                frames.extend(self.receive_frames()?);
                let _ = self.decoder.send_eof();
            }
            Err(e) => return Err(EngineError::new(ErrorKind::DecodeFailed, format!("send_eof: {e}"))),
        }
        frames.extend(self.receive_frames()?);
        Ok(frames)
    }

    /// Called after a seek: discards internally buffered frames so stale
    /// pre-seek frames never reach the video frame queue.
    pub fn reset(&mut self) {
        self.decoder.flush();
    }

    fn receive_frames(&mut self) -> Result<Vec<DecodedVideoFrame>, EngineError> {
        let mut out = Vec::new();
        let mut frame = FfmpegVideoFrame::empty();
        loop {
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => match self.convert_frame(&frame) {
                    Ok(decoded) => out.push(decoded),
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable video frame"),
                },
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffi::EAGAIN => break,
                Err(ffmpeg_next::Error::Eof) => break,
                Err(e) => {
                    if out.is_empty() {
                        return Err(EngineError::new(ErrorKind::DecodeFailed, format!("receive_frame: {e}")));
                    }
                    break;
                }
            }
        }
        Ok(out)
    }

    fn convert_frame(&self, frame: &FfmpegVideoFrame) -> Result<DecodedVideoFrame, EngineError> {
        let width = frame.width();
        let height = frame.height();
        if width == 0 || height == 0 {
            return Err(EngineError::new(ErrorKind::DecodeFailed, "frame has zero dimensions"));
        }
        let format = pixel_format_from_ffmpeg(frame.format())
            .ok_or_else(|| EngineError::new(ErrorKind::DecodeFailed, format!("unsupported pixel format {:?}", frame.format())))?;

        let mut planes = Vec::with_capacity(plane_count(format));
        for i in 0..plane_count(format) {
            planes.push(Plane { data: frame.data(i).to_vec(), stride: frame.stride(i) });
        }

        let pts_ms = frame.pts().map(|p| self.pts_to_ms(p)).unwrap_or(0.0);
        Ok(DecodedVideoFrame::Cpu { planes, format, width, height, pts_ms })
    }
}

impl VideoFrameDecoder for VideoDecoderFfmpeg {
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedVideoFrame>, EngineError> {
        VideoDecoderFfmpeg::decode(self, data, pts)
    }

    fn flush(&mut self) -> Result<Vec<DecodedVideoFrame>, EngineError> {
        VideoDecoderFfmpeg::flush(self)
    }

    fn reset(&mut self) {
        VideoDecoderFfmpeg::reset(self)
    }
}
