//! Master clock and A/V sync decisions.
//!
//! Grounded in the sync controller this engine's design was distilled from:
//! three clock samples (audio/video/external), each normalized against the
//! first PTS its stream ever produced, with a smoothed drift term and a
//! pause/resume scheme that shifts sample wall-clock times forward instead of
//! subtracting accumulated pause duration from every read.

use std::sync::Mutex;
use std::time::Instant;

use crate::core::timestamp::NormalizationBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    AudioMaster,
    VideoMaster,
    ExternalMaster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SyncQuality {
    fn from_avg_err_ms(avg_err_ms: f64) -> Self {
        if avg_err_ms < 20.0 {
            SyncQuality::Excellent
        } else if avg_err_ms < 40.0 {
            SyncQuality::Good
        } else if avg_err_ms < 80.0 {
            SyncQuality::Fair
        } else {
            SyncQuality::Poor
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncParams {
    pub max_video_delay_ms: f64,
    pub max_video_speedup_ms: f64,
    pub drop_frame_threshold_ms: f64,
    pub repeat_frame_threshold_ms: f64,
    pub enable_frame_drop: bool,
    pub enable_frame_repeat: bool,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            max_video_delay_ms: 100.0,
            max_video_speedup_ms: 100.0,
            drop_frame_threshold_ms: 80.0,
            repeat_frame_threshold_ms: 20.0,
            enable_frame_drop: true,
            enable_frame_repeat: true,
        }
    }
}

impl From<crate::config::SyncConfig> for SyncParams {
    fn from(cfg: crate::config::SyncConfig) -> Self {
        Self {
            max_video_delay_ms: cfg.max_video_delay_ms,
            max_video_speedup_ms: cfg.max_video_speedup_ms,
            drop_frame_threshold_ms: cfg.drop_threshold_ms,
            repeat_frame_threshold_ms: cfg.repeat_threshold_ms,
            enable_frame_drop: cfg.enable_frame_drop,
            enable_frame_repeat: cfg.enable_frame_repeat,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncStats {
    pub audio_ms: f64,
    pub video_ms: f64,
    pub offset_ms: f64,
    pub avg_err_ms: f64,
    pub max_err_ms: f64,
    pub corrections: u64,
    pub quality: SyncQuality,
}

#[derive(Debug, Clone, Copy)]
struct ClockInfo {
    pts_ms: f64,
    system_time: Instant,
    drift: f64,
}

impl ClockInfo {
    fn new(now: Instant) -> Self {
        Self { pts_ms: 0.0, system_time: now, drift: 0.0 }
    }

    /// `current_media_time = pts_ms + (now - sample_time) + drift` (§3 invariant).
    fn current_time(&self, now: Instant) -> f64 {
        self.pts_ms + now.saturating_duration_since(self.system_time).as_secs_f64() * 1000.0 + self.drift
    }
}

struct Clocks {
    audio: ClockInfo,
    video: ClockInfo,
    external: ClockInfo,
    audio_base: NormalizationBase,
    video_base: NormalizationBase,
}

impl Clocks {
    fn new(now: Instant) -> Self {
        Self {
            audio: ClockInfo::new(now),
            video: ClockInfo::new(now),
            external: ClockInfo::new(now),
            audio_base: NormalizationBase::new(),
            video_base: NormalizationBase::new(),
        }
    }
}

#[derive(Default)]
struct StatsState {
    avg_err_ms: f64,
    max_err_ms: f64,
    corrections: u64,
    history_len: u32,
}

struct PauseState {
    is_paused: bool,
    pause_began_at: Option<Instant>,
}

/// The master clock and sync-decision engine. All public methods are safe to
/// call from any worker thread; the clock samples/normalization bases share a
/// short-critical-section mutex distinct from the one guarding statistics and
/// the one guarding pause bookkeeping, so a worker updating stats never
/// blocks a concurrent pause()/resume() from the controller thread.
pub struct AVSyncController {
    mode: Mutex<SyncMode>,
    clocks: Mutex<Clocks>,
    stats: Mutex<StatsState>,
    pause: Mutex<PauseState>,
    params: Mutex<SyncParams>,
}

impl AVSyncController {
    pub fn new(mode: SyncMode) -> Self {
        let now = Instant::now();
        Self {
            mode: Mutex::new(mode),
            clocks: Mutex::new(Clocks::new(now)),
            stats: Mutex::new(StatsState::default()),
            pause: Mutex::new(PauseState { is_paused: false, pause_began_at: None }),
            params: Mutex::new(SyncParams::default()),
        }
    }

    pub fn set_sync_params(&self, params: SyncParams) {
        *self.params.lock().unwrap() = params;
    }

    pub fn sync_mode(&self) -> SyncMode {
        *self.mode.lock().unwrap()
    }

    fn update_clock(clock: &mut ClockInfo, base: &mut NormalizationBase, raw_pts_ms: f64, now: Instant) {
        let normalized = base.normalize(raw_pts_ms);
        if base.is_initialized() {
            // `predicted` folds in the previous drift estimate, so assigning
            // drift <- 0.1*(observed-predicted) acts as a low-pass filter
            // across successive calls rather than reacting to raw jitter.
            let predicted = clock.current_time(now);
            let observed = normalized;
            clock.drift = 0.1 * (observed - predicted);
        }
        clock.pts_ms = normalized;
        clock.system_time = now;
    }

    pub fn update_audio_clock(&self, raw_pts_ms: f64, now: Instant) {
        let mut clocks = self.clocks.lock().unwrap();
        let (audio, base) = (&mut clocks.audio, &mut clocks.audio_base);
        Self::update_clock(audio, base, raw_pts_ms, now);
    }

    pub fn update_video_clock(&self, raw_pts_ms: f64, now: Instant) {
        let mut clocks = self.clocks.lock().unwrap();
        let (video, base) = (&mut clocks.video, &mut clocks.video_base);
        Self::update_clock(video, base, raw_pts_ms, now);
    }

    pub fn master_clock(&self, now: Instant) -> f64 {
        let clocks = self.clocks.lock().unwrap();
        match *self.mode.lock().unwrap() {
            SyncMode::AudioMaster => clocks.audio.current_time(now),
            SyncMode::VideoMaster => clocks.video.current_time(now),
            SyncMode::ExternalMaster => clocks.external.current_time(now),
        }
    }

    /// `normalized_video_pts - master_clock(now)`, clamped to
    /// `[-max_speedup, +max_delay]`. Positive = render later.
    pub fn video_delay(&self, video_pts_ms: f64, now: Instant) -> f64 {
        let params = *self.params.lock().unwrap();
        let master = self.master_clock(now);
        let raw_delay = video_pts_ms - master;
        raw_delay.clamp(-params.max_video_speedup_ms, params.max_video_delay_ms)
    }

    pub fn should_drop_video(&self, video_pts_ms: f64, now: Instant) -> bool {
        let params = *self.params.lock().unwrap();
        if !params.enable_frame_drop {
            return false;
        }
        self.video_delay(video_pts_ms, now) < -params.drop_frame_threshold_ms
    }

    pub fn should_repeat_video(&self, video_pts_ms: f64, now: Instant) -> bool {
        let params = *self.params.lock().unwrap();
        if !params.enable_frame_repeat {
            return false;
        }
        self.video_delay(video_pts_ms, now) > params.repeat_frame_threshold_ms
    }

    /// Only meaningful in video-master mode: a small corrective offset
    /// (clamped to +-50ms) the audio path can apply to stay in lockstep
    /// with a video master. `None` in audio-master/external-master mode.
    pub fn calculate_audio_adjustment(&self, now: Instant) -> Option<f64> {
        if self.sync_mode() != SyncMode::VideoMaster {
            return None;
        }
        let clocks = self.clocks.lock().unwrap();
        let master = clocks.video.current_time(now);
        let audio = clocks.audio.current_time(now);
        Some((master - audio).clamp(-50.0, 50.0))
    }

    /// Full clear, including both normalization bases. Used on stop.
    pub fn reset(&self) {
        let now = Instant::now();
        *self.clocks.lock().unwrap() = Clocks::new(now);
        *self.stats.lock().unwrap() = StatsState::default();
        let mut pause = self.pause.lock().unwrap();
        pause.is_paused = false;
        pause.pause_began_at = None;
    }

    /// Sets all clock samples to `target_pts_ms` at `now`; preserves
    /// normalization bases since the stream is still the same stream.
    pub fn reset_for_seek(&self, target_pts_ms: f64, now: Instant) {
        let mut clocks = self.clocks.lock().unwrap();
        clocks.audio = ClockInfo { pts_ms: target_pts_ms, system_time: now, drift: 0.0 };
        clocks.video = ClockInfo { pts_ms: target_pts_ms, system_time: now, drift: 0.0 };
        clocks.external = ClockInfo { pts_ms: target_pts_ms, system_time: now, drift: 0.0 };
    }

    pub fn pause(&self, now: Instant) {
        let mut pause = self.pause.lock().unwrap();
        if !pause.is_paused {
            pause.is_paused = true;
            pause.pause_began_at = Some(now);
        }
    }

    /// Advances every clock sample's wall-clock time (and the external
    /// stream) forward by the elapsed pause duration, so `current_time`'s
    /// read path never needs a separate pause-duration subtraction.
    pub fn resume(&self, now: Instant) {
        let mut pause = self.pause.lock().unwrap();
        if let Some(began_at) = pause.pause_began_at.take() {
            let elapsed = now.saturating_duration_since(began_at);
            let mut clocks = self.clocks.lock().unwrap();
            clocks.audio.system_time += elapsed;
            clocks.video.system_time += elapsed;
            clocks.external.system_time += elapsed;
        }
        pause.is_paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.pause.lock().unwrap().is_paused
    }

    pub fn sync_stats(&self) -> SyncStats {
        let now = Instant::now();
        let clocks = self.clocks.lock().unwrap();
        let audio_ms = clocks.audio.current_time(now);
        let video_ms = clocks.video.current_time(now);
        let offset_ms = video_ms - audio_ms;
        drop(clocks);

        let mut stats = self.stats.lock().unwrap();
        let err = offset_ms.abs();
        stats.history_len += 1;
        let n = stats.history_len as f64;
        stats.avg_err_ms += (err - stats.avg_err_ms) / n;
        if err > stats.max_err_ms {
            stats.max_err_ms = err;
        }
        if err > 40.0 {
            stats.corrections += 1;
        }

        SyncStats {
            audio_ms,
            video_ms,
            offset_ms,
            avg_err_ms: stats.avg_err_ms,
            max_err_ms: stats.max_err_ms,
            corrections: stats.corrections,
            quality: SyncQuality::from_avg_err_ms(stats.avg_err_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_sample_normalizes_to_zero() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let now = Instant::now();
        c.update_audio_clock(12_345.0, now);
        assert_eq!(c.master_clock(now), 0.0);
    }

    #[test]
    fn subsequent_samples_offset_from_first() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let t0 = Instant::now();
        c.update_audio_clock(1000.0, t0);
        let t1 = t0 + Duration::from_millis(40);
        c.update_audio_clock(1040.0, t1);
        // predicted at t1 = 0 + 40ms + 0 drift = 40, observed = 40 -> drift ~ 0
        let now = t1 + Duration::from_millis(10);
        assert!((c.master_clock(now) - 50.0).abs() < 1.0);
    }

    #[test]
    fn video_delay_is_clamped() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let now = Instant::now();
        c.update_audio_clock(0.0, now);
        // video is way ahead of master: delay should clamp to +100ms default
        let delay = c.video_delay(10_000.0, now);
        assert_eq!(delay, 100.0);
        let delay_behind = c.video_delay(-10_000.0, now);
        assert_eq!(delay_behind, -100.0);
    }

    #[test]
    fn drop_and_repeat_thresholds() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let now = Instant::now();
        c.update_audio_clock(1000.0, now);
        // video_pts far behind master -> should drop
        assert!(c.should_drop_video(1000.0 - 200.0, now));
        // video_pts far ahead of master -> should repeat
        assert!(c.should_repeat_video(1000.0 + 200.0, now));
    }

    #[test]
    fn pause_resume_preserves_media_time() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let t0 = Instant::now();
        c.update_audio_clock(1000.0, t0);
        let before_pause = c.master_clock(t0);
        c.pause(t0);
        let resume_at = t0 + Duration::from_secs(2);
        c.resume(resume_at);
        // No intervening frames: clock should read the same value it did
        // right before pausing, since system_time shifted forward by 2s.
        let after_resume = c.master_clock(resume_at);
        assert!((after_resume - before_pause).abs() < 1.0);
    }

    #[test]
    fn reset_for_seek_lands_on_target() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let now = Instant::now();
        c.update_audio_clock(500.0, now);
        c.reset_for_seek(4000.0, now);
        assert!((c.master_clock(now) - 4000.0).abs() < 1.0);
    }

    #[test]
    fn reset_for_seek_preserves_normalization_base() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let t0 = Instant::now();
        c.update_audio_clock(10_000.0, t0); // base latched at 10_000
        c.reset_for_seek(4_000.0, t0);
        let t1 = t0 + Duration::from_millis(10);
        // next raw pts is still normalized against the original base (10_000)
        c.update_audio_clock(10_000.0 + 4_100.0, t1);
        assert!((c.master_clock(t1) - 4_100.0).abs() < 2.0);
    }

    #[test]
    fn reset_clears_normalization_base() {
        let c = AVSyncController::new(SyncMode::AudioMaster);
        let now = Instant::now();
        c.update_audio_clock(5000.0, now);
        c.reset();
        // after reset, the next sample re-latches as the new base (-> 0)
        assert_eq!(c.master_clock(now), 0.0);
    }

    #[test]
    fn video_master_audio_adjustment_present_only_in_video_master() {
        let audio_master = AVSyncController::new(SyncMode::AudioMaster);
        assert!(audio_master.calculate_audio_adjustment(Instant::now()).is_none());

        let video_master = AVSyncController::new(SyncMode::VideoMaster);
        assert!(video_master.calculate_audio_adjustment(Instant::now()).is_some());
    }

    #[test]
    fn sync_stats_quality_buckets() {
        assert_eq!(SyncQuality::from_avg_err_ms(10.0), SyncQuality::Excellent);
        assert_eq!(SyncQuality::from_avg_err_ms(30.0), SyncQuality::Good);
        assert_eq!(SyncQuality::from_avg_err_ms(60.0), SyncQuality::Fair);
        assert_eq!(SyncQuality::from_avg_err_ms(200.0), SyncQuality::Poor);
    }
}
