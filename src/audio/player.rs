//! Audio device output and the device callback (C3.2). cpal owns the actual
//! OS-specific backend (WASAPI/ALSA/CoreAudio) behind one cross-platform API,
//! so unlike the renderer side there is a single `AudioPlayer` rather than a
//! family of per-platform backends.
//!
//! The callback itself is the engine's master clock in the default
//! (audio-master) sync mode: it never allocates, never logs, and never takes
//! a lock for longer than a queue pop or a frame-cursor read.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat as CpalSampleFormat, StreamConfig};

use crate::audio::frame::ResampledAudioFrame;
use crate::config::SampleFormat;
use crate::error::{EngineError, ErrorKind};
use crate::queue::{BoundedQueue, PushError};

const PUSH_TIMEOUT_DEFAULT_MS: u64 = 100;

fn to_cpal_sample_format(format: SampleFormat) -> CpalSampleFormat {
    match format {
        SampleFormat::S16 => CpalSampleFormat::I16,
        SampleFormat::S32 => CpalSampleFormat::I32,
        SampleFormat::F32 => CpalSampleFormat::F32,
    }
}

/// State shared between the producer (decode worker calling `push_frame`)
/// and the device-driver thread running the callback.
struct Shared {
    queue: BoundedQueue<ResampledAudioFrame>,
    current_frame: Mutex<Option<ResampledAudioFrame>>,
    base_pts_seconds: Mutex<f64>,
    samples_played_since_base: AtomicU64,
    target_sample_rate: AtomicU64,
    volume: AtomicU64, // f32 bits, so it can live in an atomic
    is_paused: AtomicBool,
    is_stopped: AtomicBool,
    bytes_per_sample: usize,
    channels: u16,
}

impl Shared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed) as u32)
    }

    fn set_volume(&self, v: f32) {
        self.volume.store(v.to_bits() as u64, Ordering::Relaxed);
    }
}

/// Fills `out` per the device-callback contract: drain the current partial
/// frame first, then pop new frames until full or underrun; zero-fill any
/// remainder. A free function so it can be unit tested without a live audio
/// device.
fn fill_buffer(shared: &Shared, out: &mut [u8]) {
    if shared.is_stopped.load(Ordering::Relaxed) || shared.is_paused.load(Ordering::Relaxed) {
        out.fill(0);
        return;
    }

    let mut filled = 0usize;
    let mut current = shared.current_frame.lock().unwrap();

    while filled < out.len() {
        if current.is_none() {
            match shared.queue.try_pop() {
                Ok(frame) => *current = Some(frame),
                Err(_) => break, // underrun: queue empty or closed
            }
        }

        let frame = current.as_mut().unwrap();
        let n = frame.consume_into(&mut out[filled..]);
        filled += n;

        if frame.is_retired() {
            let retired = current.take().unwrap();
            *shared.base_pts_seconds.lock().unwrap() = retired.pts_ms / 1000.0;
            shared.samples_played_since_base.store(0, Ordering::Relaxed);
        } else {
            let frame_size = shared.bytes_per_sample.max(1) * shared.channels.max(1) as usize;
            shared.samples_played_since_base.fetch_add((n / frame_size) as u64, Ordering::Relaxed);
        }
    }

    if filled < out.len() {
        out[filled..].fill(0);
    }

    apply_volume_in_place(&mut out[..filled], shared.bytes_per_sample, shared.volume());
}

/// Volume is the one audio adjustment this engine supports; applying it
/// here, in-place on bytes already headed to the device, avoids a second
/// PCM buffer.
fn apply_volume_in_place(buf: &mut [u8], bytes_per_sample: usize, volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    match bytes_per_sample {
        2 => {
            for chunk in buf.chunks_exact_mut(2) {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                let scaled = (sample as f32 * volume).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        4 => {
            for chunk in buf.chunks_exact_mut(4) {
                let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let scaled = (sample * volume).clamp(-1.0, 1.0);
                chunk.copy_from_slice(&scaled.to_le_bytes());
            }
        }
        _ => {}
    }
}

/// The playback controller's view of the audio output device: push resampled
/// PCM, transport control, and the master-clock read. A seam so the
/// controller's orchestration can be driven in tests without a live device.
#[cfg_attr(test, mockall::automock)]
pub trait AudioSink: Send {
    fn start(&mut self) -> Result<(), EngineError>;
    fn stop(&mut self);
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_volume(&self, volume: f32);
    fn get_volume(&self) -> f32;
    fn push_frame(&self, frame: ResampledAudioFrame) -> Result<(), PushError>;
    fn clear_frames(&self);
    fn flush(&self);
    fn current_playback_pts_ms(&self) -> Option<f64>;
}

pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub pcm_queue_capacity: usize,
}

/// Audio output and the master clock for the default (audio-master) sync
/// mode. Owns the cpal device exclusively (§5 shared-resource policy).
pub struct AudioPlayer {
    _host: Host,
    device: Device,
    config: StreamConfig,
    cpal_format: CpalSampleFormat,
    stream: Option<cpal::Stream>,
    shared: Arc<Shared>,
}

impl AudioPlayer {
    pub fn init(spec: AudioSpec) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::new(ErrorKind::AudioDeviceNotFound, "no default output device"))?;

        let bytes_per_sample = match spec.format {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        };

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(spec.pcm_queue_capacity),
            current_frame: Mutex::new(None),
            base_pts_seconds: Mutex::new(0.0),
            samples_played_since_base: AtomicU64::new(0),
            target_sample_rate: AtomicU64::new(spec.sample_rate as u64),
            volume: AtomicU64::new(1.0f32.to_bits() as u64),
            is_paused: AtomicBool::new(true),
            is_stopped: AtomicBool::new(true),
            bytes_per_sample,
            channels: spec.channels,
        });

        Ok(Self {
            _host: host,
            device,
            config,
            cpal_format: to_cpal_sample_format(spec.format),
            stream: None,
            shared,
        })
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let err_shared = self.shared.clone();

        let stream = self
            .device
            .build_output_stream_raw(
                &self.config,
                self.cpal_format,
                move |data: &mut cpal::Data, _info: &cpal::OutputCallbackInfo| {
                    fill_buffer(&shared, data.as_bytes_mut());
                },
                move |err| {
                    tracing::warn!(error = %err, "audio stream error");
                    err_shared.is_stopped.store(true, Ordering::Relaxed);
                },
                None,
            )
            .map_err(|e| EngineError::new(ErrorKind::AudioDeviceInitFailed, format!("build_output_stream failed: {e}")))?;

        stream
            .play()
            .map_err(|e| EngineError::new(ErrorKind::AudioDeviceInitFailed, format!("stream play failed: {e}")))?;

        self.shared.is_stopped.store(false, Ordering::Relaxed);
        self.shared.is_paused.store(false, Ordering::Relaxed);
        self.stream = Some(stream);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shared.is_stopped.store(true, Ordering::Relaxed);
        self.stream = None;
        self.flush();
    }

    pub fn pause(&mut self) {
        self.shared.is_paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&mut self) {
        self.shared.is_paused.store(false, Ordering::Relaxed);
    }

    pub fn is_playing(&self) -> bool {
        self.stream.is_some()
            && !self.shared.is_paused.load(Ordering::Relaxed)
            && !self.shared.is_stopped.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn get_volume(&self) -> f32 {
        self.shared.volume()
    }

    pub fn push_frame(&self, frame: ResampledAudioFrame) -> Result<(), PushError> {
        self.shared.queue.push(frame, Duration::from_millis(PUSH_TIMEOUT_DEFAULT_MS))
    }

    pub fn push_frame_with_timeout(&self, frame: ResampledAudioFrame, timeout_ms: u64) -> Result<(), PushError> {
        self.shared.queue.push(frame, Duration::from_millis(timeout_ms))
    }

    pub fn clear_frames(&self) {
        self.shared.queue.clear();
        *self.shared.current_frame.lock().unwrap() = None;
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Per §4.3.2: the caller must pause the device before flushing. Clears
    /// the PCM queue, discards any partial frame, and zeroes the playback
    /// accumulator so `current_playback_pts_ms` reports `None` again.
    pub fn flush(&self) {
        self.clear_frames();
        self.reset_timestamps();
    }

    pub fn reset_timestamps(&self) {
        *self.shared.base_pts_seconds.lock().unwrap() = 0.0;
        self.shared.samples_played_since_base.store(0, Ordering::Relaxed);
    }

    /// `base_pts + samples_played * 1000 / target_sample_rate`. `None` until
    /// at least one frame has been retired, so the caller doesn't feed a
    /// spurious zero into the sync controller before playback has begun.
    pub fn current_playback_pts_ms(&self) -> Option<f64> {
        let base = *self.shared.base_pts_seconds.lock().unwrap();
        let samples = self.shared.samples_played_since_base.load(Ordering::Relaxed) as f64;
        if base == 0.0 && samples == 0.0 {
            return None;
        }
        let rate = self.shared.target_sample_rate.load(Ordering::Relaxed) as f64;
        Some(base * 1000.0 + samples * 1000.0 / rate)
    }
}

impl AudioSink for AudioPlayer {
    fn start(&mut self) -> Result<(), EngineError> {
        AudioPlayer::start(self)
    }

    fn stop(&mut self) {
        AudioPlayer::stop(self)
    }

    fn pause(&mut self) {
        AudioPlayer::pause(self)
    }

    fn resume(&mut self) {
        AudioPlayer::resume(self)
    }

    fn set_volume(&self, volume: f32) {
        AudioPlayer::set_volume(self, volume)
    }

    fn get_volume(&self) -> f32 {
        AudioPlayer::get_volume(self)
    }

    fn push_frame(&self, frame: ResampledAudioFrame) -> Result<(), PushError> {
        AudioPlayer::push_frame(self, frame)
    }

    fn clear_frames(&self) {
        AudioPlayer::clear_frames(self)
    }

    fn flush(&self) {
        AudioPlayer::flush(self)
    }

    fn current_playback_pts_ms(&self) -> Option<f64> {
        AudioPlayer::current_playback_pts_ms(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_shared(bytes_per_sample: usize, channels: u16) -> Shared {
        Shared {
            queue: BoundedQueue::new(8),
            current_frame: Mutex::new(None),
            base_pts_seconds: Mutex::new(0.0),
            samples_played_since_base: AtomicU64::new(0),
            target_sample_rate: AtomicU64::new(44_100),
            volume: AtomicU64::new(1.0f32.to_bits() as u64),
            is_paused: AtomicBool::new(false),
            is_stopped: AtomicBool::new(false),
            bytes_per_sample,
            channels,
        }
    }

    #[test]
    fn silence_when_stopped() {
        let shared = test_shared(2, 2);
        shared.is_stopped.store(true, Ordering::Relaxed);
        let mut out = [0xFFu8; 8];
        fill_buffer(&shared, &mut out);
        assert_eq!(out, [0u8; 8]);
    }

    #[test]
    fn underrun_zero_fills_remainder() {
        let shared = test_shared(2, 1);
        let mut out = [0xAAu8; 8];
        fill_buffer(&shared, &mut out);
        assert_eq!(out, [0u8; 8]);
    }

    #[test]
    fn drains_current_partial_frame_first() {
        let shared = test_shared(2, 1);
        let frame = ResampledAudioFrame::new(vec![1, 2, 3, 4], 0.0, 2, 44_100, 1, 2);
        *shared.current_frame.lock().unwrap() = Some(frame);
        let mut out = [0u8; 2];
        fill_buffer(&shared, &mut out);
        assert_eq!(out, [1, 2]);
        assert!(shared.current_frame.lock().unwrap().is_some());
    }

    #[test]
    fn retiring_a_frame_updates_base_pts() {
        let shared = test_shared(2, 1);
        let frame = ResampledAudioFrame::new(vec![1, 2, 3, 4], 500.0, 2, 44_100, 1, 2);
        shared.queue.try_push(frame).unwrap();
        let mut out = [0u8; 4];
        fill_buffer(&shared, &mut out);
        assert_eq!(*shared.base_pts_seconds.lock().unwrap(), 0.5);
        assert_eq!(shared.samples_played_since_base.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pulls_multiple_frames_to_fill_buffer() {
        let shared = test_shared(2, 1);
        shared.queue.try_push(ResampledAudioFrame::new(vec![1, 1], 0.0, 1, 44_100, 1, 2)).unwrap();
        shared.queue.try_push(ResampledAudioFrame::new(vec![2, 2], 10.0, 1, 44_100, 1, 2)).unwrap();
        let mut out = [0u8; 4];
        fill_buffer(&shared, &mut out);
        assert_eq!(out, [1, 1, 2, 2]);
    }

    #[test]
    fn volume_scaling_attenuates_s16_samples() {
        let mut buf = 1000i16.to_le_bytes().to_vec();
        apply_volume_in_place(&mut buf, 2, 0.5);
        let scaled = i16::from_le_bytes([buf[0], buf[1]]);
        assert_eq!(scaled, 500);
    }

    #[test]
    fn volume_one_is_a_no_op() {
        let original = vec![1, 2, 3, 4];
        let mut buf = original.clone();
        apply_volume_in_place(&mut buf, 2, 1.0);
        assert_eq!(buf, original);
    }

    #[test]
    fn playback_pts_is_none_before_first_frame_retires() {
        let player_shared = test_shared(2, 1);
        let base = *player_shared.base_pts_seconds.lock().unwrap();
        let samples = player_shared.samples_played_since_base.load(Ordering::Relaxed);
        assert_eq!(base, 0.0);
        assert_eq!(samples, 0);
    }
}
