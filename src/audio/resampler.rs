//! Off-hot-path PCM format conversion (C3.1).
//!
//! Converts decoder-native PCM (rate/channels/format discovered from the
//! first frame) to the audio player's fixed target format. Lazily
//! initializes its FFmpeg resampler context from the first frame and reuses
//! one scratch buffer across the session, growing it only if a larger output
//! is ever required.

use ffmpeg_next::format::sample::{Sample as FfmpegSample, Type as FfmpegSampleType};
use ffmpeg_next::software::resampling::context::Context as ResamplerContext;
use ffmpeg_next::util::channel_layout::ChannelLayout as FfmpegChannelLayout;
use ffmpeg_next::util::frame::audio::Audio as FfmpegAudioFrame;

use crate::audio::frame::{DecodedAudioData, DecodedAudioFrame, ResampledAudioFrame};
use crate::config::SampleFormat;
use crate::error::{EngineError, ErrorKind};

#[derive(Debug, Clone, Copy)]
pub struct ResamplerConfig {
    pub target_sample_rate: u32,
    pub target_channels: u16,
    pub target_format: SampleFormat,
}

impl ResamplerConfig {
    pub fn bytes_per_sample(&self) -> usize {
        match self.target_format {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl From<crate::config::AudioConfig> for ResamplerConfig {
    fn from(cfg: crate::config::AudioConfig) -> Self {
        Self {
            target_sample_rate: cfg.target_sample_rate,
            target_channels: cfg.target_channels,
            target_format: cfg.target_format,
        }
    }
}

fn to_ffmpeg_sample(format: SampleFormat) -> FfmpegSample {
    match format {
        SampleFormat::S16 => FfmpegSample::I16(FfmpegSampleType::Packed),
        SampleFormat::S32 => FfmpegSample::I32(FfmpegSampleType::Packed),
        SampleFormat::F32 => FfmpegSample::F32(FfmpegSampleType::Packed),
    }
}

fn to_ffmpeg_layout(channels: u16) -> FfmpegChannelLayout {
    FfmpegChannelLayout::default(channels as i32)
}

struct SourceFormat {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
}

pub struct AudioResampler {
    config: ResamplerConfig,
    context: Option<ResamplerContext>,
    source: Option<SourceFormat>,
    scratch: Vec<u8>,
}

impl AudioResampler {
    pub fn new(config: ResamplerConfig) -> Self {
        Self { config, context: None, source: None, scratch: Vec::new() }
    }

    pub fn set_target(&mut self, config: ResamplerConfig) {
        self.config = config;
        self.context = None; // force re-init against the new target
    }

    pub fn is_initialized(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_format_matching(&self, frame: &DecodedAudioFrame) -> bool {
        frame.sample_rate == self.config.target_sample_rate
            && frame.channels == self.config.target_channels
            && frame.format == self.config.target_format
            && matches!(frame.data, DecodedAudioData::Interleaved(_))
    }

    fn ensure_initialized(&mut self, frame: &DecodedAudioFrame) -> Result<(), EngineError> {
        let needs_init = match &self.source {
            None => true,
            Some(src) => {
                src.sample_rate != frame.sample_rate || src.channels != frame.channels || src.format != frame.format
            }
        };
        if !needs_init {
            return Ok(());
        }
        if !self.is_format_matching(frame) {
            let context = ResamplerContext::get(
                to_ffmpeg_sample(frame.format),
                to_ffmpeg_layout(frame.channels),
                frame.sample_rate,
                to_ffmpeg_sample(self.config.target_format),
                to_ffmpeg_layout(self.config.target_channels),
                self.config.target_sample_rate,
            )
            .map_err(|e| EngineError::new(ErrorKind::ResampleFailed, format!("resampler init failed: {e}")))?;
            self.context = Some(context);
        } else {
            self.context = None;
        }
        self.source = Some(SourceFormat { sample_rate: frame.sample_rate, channels: frame.channels, format: frame.format });
        Ok(())
    }

    /// Converts a decoded frame to the target format. Fast path: if the
    /// source already matches the target layout, performs a layout-only
    /// copy (planar -> interleaved if needed) with no format conversion.
    pub fn resample(&mut self, frame: &DecodedAudioFrame, pts_ms: f64) -> Result<ResampledAudioFrame, EngineError> {
        self.ensure_initialized(frame)?;

        if self.is_format_matching(frame) {
            return Ok(self.copy_without_resampling(frame, pts_ms));
        }

        self.do_resample(frame, pts_ms)
    }

    fn copy_without_resampling(&mut self, frame: &DecodedAudioFrame, pts_ms: f64) -> ResampledAudioFrame {
        let bytes_per_sample = self.config.bytes_per_sample();
        let pcm_data = match &frame.data {
            DecodedAudioData::Interleaved(bytes) => bytes.clone(),
            DecodedAudioData::Planar(planes) => interleave_planes(planes, frame.sample_count, bytes_per_sample),
        };
        ResampledAudioFrame::new(pcm_data, pts_ms, frame.sample_count, frame.sample_rate, frame.channels, bytes_per_sample)
    }

    fn do_resample(&mut self, frame: &DecodedAudioFrame, pts_ms: f64) -> Result<ResampledAudioFrame, EngineError> {
        let context = self
            .context
            .as_mut()
            .expect("resampler context must be initialized by ensure_initialized");

        let mut src_frame = FfmpegAudioFrame::new(to_ffmpeg_sample(frame.format), frame.sample_count, to_ffmpeg_layout(frame.channels));
        src_frame.set_rate(frame.sample_rate);
        copy_into_ffmpeg_frame(&mut src_frame, frame);

        let bytes_per_sample = self.config.bytes_per_sample();
        // Deterministic output sample count is within +-1 of in*out_rate/in_rate (§4.3.1 invariant).
        let estimated_out_samples =
            (frame.sample_count as u64 * self.config.target_sample_rate as u64 / frame.sample_rate as u64) as usize + 2;
        let mut dst_frame = FfmpegAudioFrame::new(to_ffmpeg_sample(self.config.target_format), estimated_out_samples, to_ffmpeg_layout(self.config.target_channels));
        dst_frame.set_rate(self.config.target_sample_rate);

        context
            .run(&src_frame, &mut dst_frame)
            .map_err(|e| EngineError::new(ErrorKind::ResampleFailed, format!("resample failed: {e}")))?;

        let out_samples = dst_frame.samples();
        let needed = out_samples * self.config.target_channels as usize * bytes_per_sample;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0);
        }
        let plane = dst_frame.data(0);
        self.scratch[..needed].copy_from_slice(&plane[..needed]);

        Ok(ResampledAudioFrame::new(
            self.scratch[..needed].to_vec(),
            pts_ms,
            out_samples,
            self.config.target_sample_rate,
            self.config.target_channels,
            bytes_per_sample,
        ))
    }

    pub fn reset(&mut self) {
        self.context = None;
        self.source = None;
    }
}

fn interleave_planes(planes: &[Vec<u8>], sample_count: usize, bytes_per_sample: usize) -> Vec<u8> {
    let channels = planes.len();
    let mut out = vec![0u8; sample_count * channels * bytes_per_sample];
    for (ch, plane) in planes.iter().enumerate() {
        for s in 0..sample_count {
            let src = s * bytes_per_sample;
            let dst = (s * channels + ch) * bytes_per_sample;
            if src + bytes_per_sample <= plane.len() {
                out[dst..dst + bytes_per_sample].copy_from_slice(&plane[src..src + bytes_per_sample]);
            }
        }
    }
    out
}

fn copy_into_ffmpeg_frame(dst: &mut FfmpegAudioFrame, frame: &DecodedAudioFrame) {
    match &frame.data {
        DecodedAudioData::Interleaved(bytes) => {
            let plane = dst.data_mut(0);
            let n = plane.len().min(bytes.len());
            plane[..n].copy_from_slice(&bytes[..n]);
        }
        DecodedAudioData::Planar(planes) => {
            for (i, src_plane) in planes.iter().enumerate() {
                let plane = dst.data_mut(i);
                let n = plane.len().min(src_plane.len());
                plane[..n].copy_from_slice(&src_plane[..n]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matching_config() -> ResamplerConfig {
        ResamplerConfig { target_sample_rate: 44_100, target_channels: 2, target_format: SampleFormat::F32 }
    }

    #[test]
    fn fast_path_detects_matching_format() {
        let resampler = AudioResampler::new(matching_config());
        let frame = DecodedAudioFrame {
            data: DecodedAudioData::Interleaved(vec![0u8; 8]),
            format: SampleFormat::F32,
            channels: 2,
            sample_rate: 44_100,
            sample_count: 1,
            pts_ms: 0.0,
        };
        assert!(resampler.is_format_matching(&frame));
    }

    #[test]
    fn mismatched_rate_is_not_fast_path() {
        let resampler = AudioResampler::new(matching_config());
        let frame = DecodedAudioFrame {
            data: DecodedAudioData::Interleaved(vec![0u8; 8]),
            format: SampleFormat::F32,
            channels: 2,
            sample_rate: 48_000,
            sample_count: 1,
            pts_ms: 0.0,
        };
        assert!(!resampler.is_format_matching(&frame));
    }

    #[test]
    fn fast_path_copy_passes_through_pts_and_sample_count() {
        let mut resampler = AudioResampler::new(matching_config());
        let frame = DecodedAudioFrame {
            data: DecodedAudioData::Interleaved(vec![1, 2, 3, 4, 5, 6, 7, 8]),
            format: SampleFormat::F32,
            channels: 2,
            sample_rate: 44_100,
            sample_count: 1,
            pts_ms: 123.0,
        };
        let out = resampler.resample(&frame, 123.0).unwrap();
        assert_eq!(out.pts_ms, 123.0);
        assert_eq!(out.pcm_data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(out.read_cursor, 0);
    }

    #[test]
    fn interleave_planes_packs_channels_sample_major() {
        let left = vec![1u8, 2, 3, 4]; // 2 samples, 2 bytes each
        let right = vec![9u8, 9, 8, 8];
        let out = interleave_planes(&[left, right], 2, 2);
        assert_eq!(out, vec![1, 2, 9, 9, 3, 4, 8, 8]);
    }

    #[test]
    fn reset_forces_reinitialization() {
        let mut resampler = AudioResampler::new(matching_config());
        let frame = DecodedAudioFrame {
            data: DecodedAudioData::Interleaved(vec![0u8; 8]),
            format: SampleFormat::F32,
            channels: 2,
            sample_rate: 44_100,
            sample_count: 1,
            pts_ms: 0.0,
        };
        resampler.resample(&frame, 0.0).unwrap();
        assert!(resampler.is_initialized());
        resampler.reset();
        assert!(!resampler.is_initialized());
    }
}
