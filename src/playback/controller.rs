//! The top-level playback orchestrator (§5): owns the session's FSM, sync
//! controller, and queues, and spawns/tears down the five worker threads
//! (demux, video decode, audio decode+resample, render scheduler, sync
//! monitor) around them.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{AudioFrameDecoder, AudioPlayer, AudioResampler, AudioSink, AudioSpec, ResamplerConfig};
use crate::codec::{MediaInfo, MediaSource, Packet, PacketSource, StreamKind, VideoFrameDecoder};
use crate::config::Config;
use crate::error::{EngineError, ErrorKind};
use crate::queue::BoundedQueue;
use crate::render::{Renderer, ThreadAffineRenderer, UiThreadMarshal};
use crate::state::{PlayerState, StateManager};
use crate::sync::{AVSyncController, SyncMode, SyncParams};
use crate::video::frame::DecodedVideoFrame;
use crate::video::hw_decoder::negotiate_hw_context;
use crate::video::{FramePresenter, RenderScheduler};

const WORKER_POLL: Duration = Duration::from_millis(100);
const SYNC_MONITOR_TICK: Duration = Duration::from_millis(10);

/// Blocks the calling worker while `state` is `Paused`. Returns `false` once
/// the session should exit (`Stopped`/`Idle`/`Error`), `true` once it's safe
/// to resume the worker's own loop.
fn park_if_paused(state: &StateManager) -> bool {
    loop {
        if state.should_stop() {
            return false;
        }
        if state.current() != PlayerState::Paused {
            return true;
        }
        if !state.wait_for_resume(WORKER_POLL) && state.should_stop() {
            return false;
        }
    }
}

struct RendererPresenter {
    renderer: Arc<Mutex<Box<dyn Renderer>>>,
}

impl FramePresenter for RendererPresenter {
    fn present(&mut self, frame: &DecodedVideoFrame) -> bool {
        let mut renderer = self.renderer.lock().unwrap();
        if renderer.render_frame(frame) {
            renderer.present();
            true
        } else {
            false
        }
    }
}

/// An opened session's decode/output resources. Replaced wholesale on every
/// `open()`; torn down on `close()`.
struct Session {
    source: Arc<Mutex<Box<dyn PacketSource>>>,
    video_decoder: Option<Arc<Mutex<Box<dyn VideoFrameDecoder>>>>,
    audio_decoder: Option<Arc<Mutex<Box<dyn AudioFrameDecoder>>>>,
    resampler: Option<Arc<Mutex<AudioResampler>>>,
    audio_sink: Option<Arc<Mutex<Box<dyn AudioSink>>>>,
    renderer: Option<Arc<Mutex<Box<dyn Renderer>>>>,
    media_info: MediaInfo,
    has_video: bool,
    has_audio: bool,
}

/// The Player API (§6). One instance per playback session; `open` replaces
/// whatever the previous session held.
pub struct PlaybackController {
    config: Config,
    state: Arc<StateManager>,
    sync: Arc<AVSyncController>,
    scheduler: Arc<RenderScheduler>,
    video_packet_queue: Arc<BoundedQueue<Packet>>,
    audio_packet_queue: Arc<BoundedQueue<Packet>>,
    video_frame_queue: Arc<BoundedQueue<DecodedVideoFrame>>,
    session: Option<Session>,
    workers: Vec<JoinHandle<()>>,
}

impl PlaybackController {
    pub fn new(config: Config) -> Self {
        let sync_mode = SyncMode::AudioMaster;
        let sync = Arc::new(AVSyncController::new(sync_mode));
        sync.set_sync_params(SyncParams::from(config.sync));
        Self {
            video_packet_queue: Arc::new(BoundedQueue::new(config.queues.packet_capacity)),
            audio_packet_queue: Arc::new(BoundedQueue::new(config.queues.packet_capacity)),
            video_frame_queue: Arc::new(BoundedQueue::new(config.queues.video_frame_capacity)),
            config,
            state: Arc::new(StateManager::new()),
            sync,
            scheduler: Arc::new(RenderScheduler::new()),
            session: None,
            workers: Vec::new(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state.current()
    }

    pub fn duration_ms(&self) -> f64 {
        self.session.as_ref().map(|s| s.media_info.duration_ms).unwrap_or(0.0)
    }

    pub fn current_time_ms(&self) -> f64 {
        self.sync.master_clock(Instant::now())
    }

    /// Sync-quality diagnostics (§4.1 `sync_stats`); observable independent
    /// of any renderer so a host can surface drift even with no window open.
    pub fn sync_stats(&self) -> crate::sync::SyncStats {
        self.sync.sync_stats()
    }

    /// Scheduler pop/present/drop/repeat counters (§8 invariant 4); a host
    /// diagnostics panel reads these the same way it reads `sync_stats`.
    pub fn scheduler_counters(&self) -> &crate::video::SchedulerCounters {
        self.scheduler.counters()
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(sink) = self.session.as_ref().and_then(|s| s.audio_sink.as_ref()) {
            sink.lock().unwrap().set_volume(volume);
        }
    }

    pub fn get_volume(&self) -> f32 {
        self.session
            .as_ref()
            .and_then(|s| s.audio_sink.as_ref())
            .map(|sink| sink.lock().unwrap().get_volume())
            .unwrap_or(1.0)
    }

    /// Opens a new media source. Builds the decoders and the audio output
    /// device, but not the renderer: that needs a window, which arrives
    /// separately via `set_render_window`.
    pub fn open(&mut self, location: &str) -> Result<(), EngineError> {
        if let Err(msg) = self.config.validate() {
            return Err(EngineError::new(ErrorKind::InvalidParam, msg));
        }
        if !self.state.transition_to(PlayerState::Opening) {
            return Err(EngineError::wrong_state("open", self.state.current()));
        }
        match self.open_inner(location) {
            Ok(session) => {
                self.session = Some(session);
                self.state.transition_to(PlayerState::Stopped);
                Ok(())
            }
            Err(e) => {
                self.state.transition_to(PlayerState::Error);
                Err(e)
            }
        }
    }

    fn open_inner(&mut self, location: &str) -> Result<Session, EngineError> {
        let mut source = MediaSource::open(location)?;
        let media_info = source.media_info();

        let video_decoder = source
            .video_codec_parameters()
            .zip(media_info.video_time_base)
            .map(|(params, tb)| crate::codec::VideoDecoderFfmpeg::new(params, tb))
            .transpose()?
            .map(|d| Arc::new(Mutex::new(Box::new(d) as Box<dyn VideoFrameDecoder>)));

        let (audio_decoder, resampler, audio_sink) = if let (Some(params), Some(tb)) =
            (source.audio_codec_parameters(), media_info.audio_time_base)
        {
            let decoder = crate::codec::AudioDecoderFfmpeg::new(params, tb)?;
            let resampler_config = ResamplerConfig {
                target_sample_rate: self.config.audio.target_sample_rate,
                target_channels: self.config.audio.target_channels,
                target_format: self.config.audio.target_format,
            };
            let mut player = AudioPlayer::init(AudioSpec {
                sample_rate: resampler_config.target_sample_rate,
                channels: resampler_config.target_channels,
                format: resampler_config.target_format,
                pcm_queue_capacity: self.config.queues.pcm_capacity,
            })?;
            player.set_volume(1.0);
            (
                Some(Arc::new(Mutex::new(Box::new(decoder) as Box<dyn AudioFrameDecoder>))),
                Some(Arc::new(Mutex::new(AudioResampler::new(resampler_config)))),
                Some(Arc::new(Mutex::new(Box::new(player) as Box<dyn AudioSink>))),
            )
        } else {
            (None, None, None)
        };

        if video_decoder.is_none() && audio_decoder.is_none() {
            return Err(EngineError::new(ErrorKind::StreamNotFound, "no decodable stream in source"));
        }

        let has_video = video_decoder.is_some();
        let has_audio = audio_decoder.is_some();

        Ok(Session {
            source: Arc::new(Mutex::new(Box::new(source) as Box<dyn PacketSource>)),
            video_decoder,
            audio_decoder,
            resampler,
            audio_sink,
            renderer: None,
            media_info,
            has_video,
            has_audio,
        })
    }

    /// Builds the render backend against a live window. Per §4.4.5: tries
    /// hardware acceleration if the config requests it, falling back to the
    /// CPU backend (the only backend with a real surface source in this
    /// build, since no platform `HwDecoderContext` is wired in) only when
    /// `allow_fallback` permits it; otherwise hardware-unavailable is a
    /// session error (§4.4.5, §7).
    pub fn set_render_window(
        &mut self,
        window: &winit::window::Window,
        width: u32,
        height: u32,
        marshal: Box<dyn UiThreadMarshal>,
    ) -> Result<(), EngineError> {
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::wrong_state("set_render_window", self.state.current()));
        };

        match negotiate_hw_context(&self.config.render) {
            Some(hw) => {
                tracing::warn!(kind = ?hw.kind(), "hardware decode context negotiated but no zero-copy surface source is wired in; using the CPU backend");
            }
            None if self.config.render.use_hardware_acceleration && !self.config.render.allow_fallback => {
                return Err(EngineError::new(
                    ErrorKind::RenderContextFailed,
                    "hardware acceleration requested but unavailable, and render.allow_fallback is disabled",
                ));
            }
            None => {}
        }

        let mut renderer: Box<dyn Renderer> =
            Box::new(ThreadAffineRenderer::new(crate::render::CpuRenderer::new(), marshal));
        renderer
            .init(window, width, height)
            .map_err(|e| EngineError::new(ErrorKind::RenderContextFailed, e.to_string()))?;
        session.renderer = Some(Arc::new(Mutex::new(renderer)));
        Ok(())
    }

    pub fn play(&mut self) -> Result<(), EngineError> {
        match self.state.current() {
            PlayerState::Stopped => {
                if !self.state.transition_to(PlayerState::Playing) {
                    return Err(EngineError::wrong_state("play", self.state.current()));
                }
                self.sync.reset();
                self.spawn_workers()?;
                if let Some(sink) = self.session.as_ref().and_then(|s| s.audio_sink.as_ref()) {
                    sink.lock().unwrap().start()?;
                }
            }
            PlayerState::Paused => {
                if !self.state.transition_to(PlayerState::Playing) {
                    return Err(EngineError::wrong_state("play", self.state.current()));
                }
                self.sync.resume(Instant::now());
                if let Some(sink) = self.session.as_ref().and_then(|s| s.audio_sink.as_ref()) {
                    sink.lock().unwrap().resume();
                }
            }
            other => return Err(EngineError::wrong_state("play", other)),
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        if !self.state.transition_to(PlayerState::Paused) {
            return Err(EngineError::wrong_state("pause", self.state.current()));
        }
        self.sync.pause(Instant::now());
        if let Some(sink) = self.session.as_ref().and_then(|s| s.audio_sink.as_ref()) {
            sink.lock().unwrap().pause();
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), EngineError> {
        let from = self.state.current();
        if from == PlayerState::Idle {
            return Ok(());
        }
        if !self.state.transition_to(PlayerState::Stopped) {
            return Err(EngineError::wrong_state("stop", from));
        }
        self.shutdown_workers();
        if let Some(sink) = self.session.as_ref().and_then(|s| s.audio_sink.as_ref()) {
            sink.lock().unwrap().stop();
        }
        self.sync.reset();
        Ok(())
    }

    /// Seeks within the open source. Performs the full §5 seek protocol:
    /// demuxer-backend seek, flush of every queue, decoder reset, sync
    /// landing, and renderer cache invalidation, returning to whichever of
    /// `Playing`/`Paused` originated the seek.
    pub fn seek(&mut self, target_ms: f64, _backward: bool) -> Result<(), EngineError> {
        let origin = self.state.current();
        if !matches!(origin, PlayerState::Playing | PlayerState::Paused) {
            return Err(EngineError::wrong_state("seek", origin));
        }
        if !self.state.transition_to(PlayerState::Seeking) {
            return Err(EngineError::wrong_state("seek", origin));
        }

        let result = self.seek_inner(target_ms, origin);
        self.state.finish_seek();
        result
    }

    /// `origin` is the state the seek started from (`Playing` or `Paused`,
    /// per the `seek` guard above). Flushing the audio device per §4.3.2
    /// requires it to be paused first, so a seek out of `Playing` pauses the
    /// sink for the duration of the flush and resumes it before returning.
    fn seek_inner(&mut self, target_ms: f64, origin: PlayerState) -> Result<(), EngineError> {
        let Some(session) = self.session.as_ref() else {
            return Err(EngineError::new(ErrorKind::NotInitialized, "seek with no open source"));
        };

        session.source.lock().unwrap().seek(target_ms)?;

        self.video_packet_queue.clear();
        self.audio_packet_queue.clear();
        self.video_frame_queue.clear();

        if let Some(sink) = &session.audio_sink {
            let mut sink = sink.lock().unwrap();
            sink.pause();
            sink.clear_frames();
            sink.flush();
            if origin == PlayerState::Playing {
                sink.resume();
            }
        }
        if let Some(dec) = &session.video_decoder {
            dec.lock().unwrap().reset();
        }
        if let Some(dec) = &session.audio_decoder {
            dec.lock().unwrap().reset();
        }
        if let Some(resampler) = &session.resampler {
            resampler.lock().unwrap().reset();
        }

        self.sync.reset_for_seek(target_ms, Instant::now());

        if let Some(renderer) = &session.renderer {
            renderer.lock().unwrap().clear_caches();
        }

        Ok(())
    }

    /// Tears the session down entirely and returns to `Idle`, ready for a
    /// fresh `open()`.
    pub fn close(&mut self) -> Result<(), EngineError> {
        if self.state.current() != PlayerState::Idle {
            self.stop()?;
            if !self.state.transition_to(PlayerState::Idle) {
                return Err(EngineError::wrong_state("close", self.state.current()));
            }
        }
        self.session = None;
        Ok(())
    }

    fn shutdown_workers(&mut self) {
        self.video_packet_queue.close();
        self.audio_packet_queue.close();
        self.video_frame_queue.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.video_packet_queue.clear();
        self.audio_packet_queue.clear();
        self.video_frame_queue.clear();
        // Closed queues stay closed; a fresh set is needed for the next play().
        self.video_packet_queue = Arc::new(BoundedQueue::new(self.config.queues.packet_capacity));
        self.audio_packet_queue = Arc::new(BoundedQueue::new(self.config.queues.packet_capacity));
        self.video_frame_queue = Arc::new(BoundedQueue::new(self.config.queues.video_frame_capacity));
    }

    fn spawn_workers(&mut self) -> Result<(), EngineError> {
        let session = self.session.as_ref().ok_or_else(|| EngineError::new(ErrorKind::NotInitialized, "play with no open source"))?;

        let source = session.source.clone();
        let video_packet_queue = self.video_packet_queue.clone();
        let audio_packet_queue = self.audio_packet_queue.clone();
        let state = self.state.clone();
        let has_video = session.has_video;
        let has_audio = session.has_audio;
        self.workers.push(thread::spawn(move || {
            demux_worker(source, video_packet_queue, audio_packet_queue, state, has_video, has_audio)
        }));

        if let Some(video_decoder) = session.video_decoder.clone() {
            let packet_queue = self.video_packet_queue.clone();
            let frame_queue = self.video_frame_queue.clone();
            let state = self.state.clone();
            self.workers.push(thread::spawn(move || video_decode_worker(video_decoder, packet_queue, frame_queue, state)));
        }

        if let (Some(audio_decoder), Some(resampler), Some(audio_sink)) =
            (session.audio_decoder.clone(), session.resampler.clone(), session.audio_sink.clone())
        {
            let packet_queue = self.audio_packet_queue.clone();
            let state = self.state.clone();
            self.workers
                .push(thread::spawn(move || audio_decode_worker(audio_decoder, resampler, audio_sink, packet_queue, state)));
        }

        if let Some(renderer) = session.renderer.clone() {
            let frame_queue = self.video_frame_queue.clone();
            let sync = self.sync.clone();
            let state = self.state.clone();
            let scheduler = self.scheduler.clone();
            self.workers.push(thread::spawn(move || {
                let mut presenter = RendererPresenter { renderer };
                scheduler.run(&frame_queue, &sync, &state, &mut presenter, |d| thread::sleep(d));
            }));
        }

        if let Some(audio_sink) = session.audio_sink.clone() {
            let sync = self.sync.clone();
            let state = self.state.clone();
            self.workers.push(thread::spawn(move || sync_monitor_worker(audio_sink, sync, state)));
        }

        Ok(())
    }
}

fn demux_worker(
    source: Arc<Mutex<Box<dyn PacketSource>>>,
    video_packet_queue: Arc<BoundedQueue<Packet>>,
    audio_packet_queue: Arc<BoundedQueue<Packet>>,
    state: Arc<StateManager>,
    has_video: bool,
    has_audio: bool,
) {
    loop {
        if !park_if_paused(&state) {
            break;
        }
        if state.current() == PlayerState::Seeking {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let next = source.lock().unwrap().next_packet();
        match next {
            Ok(Some(packet)) => {
                let queue = match packet.kind {
                    StreamKind::Video if has_video => &video_packet_queue,
                    StreamKind::Audio if has_audio => &audio_packet_queue,
                    _ => continue,
                };
                if queue.push(packet, WORKER_POLL).is_err() && state.should_stop() {
                    break;
                }
            }
            Ok(None) => {
                // End of stream: stop pulling, let downstream drain what's queued.
                thread::sleep(WORKER_POLL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "demux worker stopping after read error");
                break;
            }
        }
    }
}

fn video_decode_worker(
    decoder: Arc<Mutex<Box<dyn VideoFrameDecoder>>>,
    packet_queue: Arc<BoundedQueue<Packet>>,
    frame_queue: Arc<BoundedQueue<DecodedVideoFrame>>,
    state: Arc<StateManager>,
) {
    loop {
        if !park_if_paused(&state) {
            break;
        }
        if state.current() == PlayerState::Seeking {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let packet = match packet_queue.pop(WORKER_POLL) {
            Ok(p) => p,
            Err(crate::queue::PopError::Closed) => break,
            Err(crate::queue::PopError::Timeout) => continue,
            Err(crate::queue::PopError::Empty) => continue,
        };

        let frames = decoder.lock().unwrap().decode(&packet.data, packet.pts);
        match frames {
            Ok(frames) => {
                for frame in frames {
                    if frame_queue.push(frame, WORKER_POLL).is_err() && state.should_stop() {
                        return;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "dropping undecodable video packet"),
        }
    }
}

fn audio_decode_worker(
    decoder: Arc<Mutex<Box<dyn AudioFrameDecoder>>>,
    resampler: Arc<Mutex<AudioResampler>>,
    audio_sink: Arc<Mutex<Box<dyn AudioSink>>>,
    packet_queue: Arc<BoundedQueue<Packet>>,
    state: Arc<StateManager>,
) {
    loop {
        if !park_if_paused(&state) {
            break;
        }
        if state.current() == PlayerState::Seeking {
            thread::sleep(Duration::from_millis(5));
            continue;
        }

        let packet = match packet_queue.pop(WORKER_POLL) {
            Ok(p) => p,
            Err(crate::queue::PopError::Closed) => break,
            Err(crate::queue::PopError::Timeout) => continue,
            Err(crate::queue::PopError::Empty) => continue,
        };

        let decoded = decoder.lock().unwrap().decode(&packet.data, packet.pts);
        let decoded = match decoded {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable audio packet");
                continue;
            }
        };

        for frame in decoded {
            let resampled = {
                let mut r = resampler.lock().unwrap();
                r.resample(&frame, frame.pts_ms)
            };
            match resampled {
                Ok(resampled) => {
                    let sink = audio_sink.lock().unwrap();
                    if sink.push_frame(resampled).is_err() && state.should_stop() {
                        return;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "dropping frame that failed to resample"),
            }
        }
    }
}

/// Periodically samples the audio device's playback position into the sync
/// controller's audio clock and rolls the running sync statistics forward,
/// per §5's 10ms monitor tick.
fn sync_monitor_worker(audio_sink: Arc<Mutex<Box<dyn AudioSink>>>, sync: Arc<AVSyncController>, state: Arc<StateManager>) {
    loop {
        if state.should_stop() {
            return;
        }
        if state.current() == PlayerState::Playing {
            if let Some(pts_ms) = audio_sink.lock().unwrap().current_playback_pts_ms() {
                sync.update_audio_clock(pts_ms, Instant::now());
            }
            sync.sync_stats();
        }
        thread::sleep(SYNC_MONITOR_TICK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let controller = PlaybackController::new(Config::default());
        assert_eq!(controller.state(), PlayerState::Idle);
        assert_eq!(controller.duration_ms(), 0.0);
        assert_eq!(controller.get_volume(), 1.0);
    }

    #[test]
    fn play_before_open_is_rejected() {
        let mut controller = PlaybackController::new(Config::default());
        assert!(controller.play().is_err());
    }

    #[test]
    fn pause_before_playing_is_rejected() {
        let mut controller = PlaybackController::new(Config::default());
        assert!(controller.pause().is_err());
    }

    #[test]
    fn seek_outside_playing_or_paused_is_rejected() {
        let mut controller = PlaybackController::new(Config::default());
        assert_eq!(controller.state(), PlayerState::Idle);
        assert!(controller.seek(1000.0, false).is_err());
    }

    #[test]
    fn close_on_idle_is_a_no_op() {
        let mut controller = PlaybackController::new(Config::default());
        assert!(controller.close().is_ok());
        assert_eq!(controller.state(), PlayerState::Idle);
    }

    #[test]
    fn open_requires_idle_state() {
        let mut controller = PlaybackController::new(Config::default());
        controller.state.transition_to(PlayerState::Opening);
        controller.state.transition_to(PlayerState::Stopped);
        assert!(controller.open("/nonexistent/path/to/media.mp4").is_err());
    }

    #[test]
    fn open_rejects_invalid_config_before_touching_state() {
        let mut config = Config::default();
        config.audio.target_channels = 0;
        let mut controller = PlaybackController::new(config);
        assert!(controller.open("/nonexistent/path/to/media.mp4").is_err());
        // Validation failed before the Idle -> Opening transition ran.
        assert_eq!(controller.state(), PlayerState::Idle);
    }

    #[test]
    fn diagnostics_are_observable_with_no_session_open() {
        let controller = PlaybackController::new(Config::default());
        let stats = controller.sync_stats();
        assert_eq!(stats.corrections, 0);
        let (popped, presented, dropped, repeated) = controller.scheduler_counters().snapshot();
        assert_eq!((popped, presented, dropped, repeated), (0, 0, 0, 0));
    }
}
