//! Audio decoder wrapping an FFmpeg codec context. Emits frames in whatever
//! layout FFmpeg decoded (planar or packed) and leaves interleaving and
//! format conversion to [`crate::audio::resampler::AudioResampler`].

use ffmpeg_next::codec::{self, decoder::Audio as FfmpegAudioDecoder};
use ffmpeg_next::ffi;
use ffmpeg_next::util::frame::audio::Audio as FfmpegAudioFrame;

use crate::audio::frame::{DecodedAudioData, DecodedAudioFrame};
use crate::config::SampleFormat;
use crate::error::{EngineError, ErrorKind};

fn sample_format_from_ffmpeg(format: ffmpeg_next::format::Sample) -> Option<SampleFormat> {
    use ffmpeg_next::format::Sample;
    match format {
        Sample::I16(_) => Some(SampleFormat::S16),
        Sample::I32(_) => Some(SampleFormat::S32),
        Sample::F32(_) => Some(SampleFormat::F32),
        _ => None,
    }
}

fn bytes_per_sample(format: SampleFormat) -> usize {
    match format {
        SampleFormat::S16 => 2,
        SampleFormat::S32 | SampleFormat::F32 => 4,
    }
}

/// The audio decode worker's view of a decoder; mirrors [`crate::video::hw_decoder`]'s
/// sibling video seam so both decode workers can be driven in tests.
#[cfg_attr(test, mockall::automock)]
pub trait AudioFrameDecoder: Send {
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedAudioFrame>, EngineError>;
    fn flush(&mut self) -> Result<Vec<DecodedAudioFrame>, EngineError>;
    fn reset(&mut self);
}

pub struct AudioDecoderFfmpeg {
    decoder: FfmpegAudioDecoder,
    time_base: (i32, i32),
}

impl AudioDecoderFfmpeg {
    pub fn new(parameters: ffmpeg_next::codec::Parameters, time_base: (i32, i32)) -> Result<Self, EngineError> {
        let context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| EngineError::new(ErrorKind::DecoderInitFailed, format!("audio decoder context: {e}")))?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| EngineError::new(ErrorKind::DecoderInitFailed, format!("audio decoder open: {e}")))?;
        Ok(Self { decoder, time_base })
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels() as u16
    }

    fn pts_to_ms(&self, pts: i64) -> f64 {
        let (num, den) = self.time_base;
        if den == 0 {
            return 0.0;
        }
        pts as f64 * num as f64 * 1000.0 / den as f64
    }

    pub fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedAudioFrame>, EngineError> {
        let mut packet = if data.is_empty() { ffmpeg_next::Packet::empty() } else { ffmpeg_next::Packet::copy(data) };
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

    pub fn flush(&mut self) -> Result<Vec<DecodedAudioFrame>, EngineError> {
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

    pub fn reset(&mut self) {
        self.decoder.flush();
    }

    fn receive_frames(&mut self) -> Result<Vec<DecodedAudioFrame>, EngineError> {
        let mut out = Vec::new();
        let mut frame = FfmpegAudioFrame::empty();
        loop {
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => match self.convert_frame(&frame) {
                    Ok(decoded) => out.push(decoded),
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable audio frame"),
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

    /// Copies decoded PCM straight out of the frame's planes without
    /// interleaving; per-channel layout matters only if FFmpeg reports
    /// `is_planar()`, since a handful of codecs produce packed audio instead.
    fn convert_frame(&self, frame: &FfmpegAudioFrame) -> Result<DecodedAudioFrame, EngineError> {
        let sample_count = frame.samples();
        if sample_count == 0 {
            return Err(EngineError::new(ErrorKind::DecodeFailed, "audio frame has zero samples"));
        }
        if frame.planes() == 0 {
            return Err(EngineError::new(ErrorKind::DecodeFailed, "audio frame has no data planes"));
        }

        let format = sample_format_from_ffmpeg(frame.format())
            .ok_or_else(|| EngineError::new(ErrorKind::AudioFormatUnsupported, format!("unsupported sample format {:?}", frame.format())))?;
        let channels = frame.channels() as u16;
        let bps = bytes_per_sample(format);
        let pts_ms = frame.pts().map(|p| self.pts_to_ms(p)).unwrap_or(0.0);

        let data = if frame.is_planar() && frame.planes() >= channels as usize {
            let plane_bytes = sample_count * bps;
            let mut planes = Vec::with_capacity(channels as usize);
            for ch in 0..channels as usize {
                let plane = frame.data(ch);
                if plane.len() < plane_bytes {
                    return Err(EngineError::new(ErrorKind::DecodeFailed, "audio plane smaller than expected"));
                }
                planes.push(plane[..plane_bytes].to_vec());
            }
            DecodedAudioData::Planar(planes)
        } else {
            let total_bytes = sample_count * channels as usize * bps;
            let plane = frame.data(0);
            if plane.len() < total_bytes {
                return Err(EngineError::new(ErrorKind::DecodeFailed, "packed audio data shorter than expected"));
            }
            DecodedAudioData::Interleaved(plane[..total_bytes].to_vec())
        };

        Ok(DecodedAudioFrame { data, format, channels, sample_rate: frame.rate(), sample_count, pts_ms })
    }
}

impl AudioFrameDecoder for AudioDecoderFfmpeg {
    fn decode(&mut self, data: &[u8], pts: Option<i64>) -> Result<Vec<DecodedAudioFrame>, EngineError> {
        AudioDecoderFfmpeg::decode(self, data, pts)
    }

    fn flush(&mut self) -> Result<Vec<DecodedAudioFrame>, EngineError> {
        AudioDecoderFfmpeg::flush(self)
    }

    fn reset(&mut self) {
        AudioDecoderFfmpeg::reset(self)
    }
}
