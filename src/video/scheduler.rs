//! The render scheduler (C4.3): paces frame presentation against the master
//! clock and is the sole call site for `should_drop_video`/`should_repeat_video`
//! — the video decode worker must never make that decision itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::queue::{BoundedQueue, PopError};
use crate::state::StateManager;
use crate::sync::controller::AVSyncController;
use crate::video::frame::DecodedVideoFrame;

const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// What happened to one popped frame. Exactly one of these is recorded per
/// frame the scheduler pops, satisfying the invariant that
/// `presented + dropped + repeated == popped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOutcome {
    Presented,
    Dropped,
    Repeated,
    /// Nothing was popped: the queue was empty (timeout) or closed.
    NoFrame,
}

#[derive(Debug, Default)]
pub struct SchedulerCounters {
    pub frames_popped: AtomicU64,
    pub frames_presented: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub frames_repeated: AtomicU64,
}

impl SchedulerCounters {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.frames_popped.load(Ordering::Relaxed),
            self.frames_presented.load(Ordering::Relaxed),
            self.frames_dropped.load(Ordering::Relaxed),
            self.frames_repeated.load(Ordering::Relaxed),
        )
    }
}

/// Anything that can display a decoded video frame. Implemented by
/// [`crate::render::renderer::Renderer`] backends; kept as a narrow trait
/// here so the scheduler's pacing logic is testable without a real GPU.
pub trait FramePresenter {
    fn present(&mut self, frame: &DecodedVideoFrame) -> bool;
}

/// Owns the pacing decision loop. One instance per session, driven by the
/// render scheduler worker thread.
pub struct RenderScheduler {
    counters: SchedulerCounters,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self { counters: SchedulerCounters::default() }
    }

    pub fn counters(&self) -> &SchedulerCounters {
        &self.counters
    }

    /// Runs the loop described in §4.4.3 until the state manager says to
    /// stop. `sleep` is injected so tests can run this without real waits.
    pub fn run(
        &self,
        queue: &BoundedQueue<DecodedVideoFrame>,
        sync: &AVSyncController,
        state: &StateManager,
        presenter: &mut dyn FramePresenter,
        sleep: impl Fn(Duration),
    ) {
        loop {
            if !state.wait_for_resume(POP_TIMEOUT) && state.should_stop() {
                return;
            }
            if state.should_stop() {
                return;
            }

            match self.step(queue, sync, state, presenter, &sleep) {
                SchedulerOutcome::NoFrame if state.should_stop() => return,
                _ => {}
            }
        }
    }

    /// One iteration: pop, decide drop/repeat/present, pace, update the
    /// video clock. Exposed separately from `run` so unit tests can drive it
    /// deterministically frame-by-frame.
    pub fn step(
        &self,
        queue: &BoundedQueue<DecodedVideoFrame>,
        sync: &AVSyncController,
        state: &StateManager,
        presenter: &mut dyn FramePresenter,
        sleep: &impl Fn(Duration),
    ) -> SchedulerOutcome {
        let frame = match queue.pop(POP_TIMEOUT) {
            Ok(frame) => frame,
            Err(PopError::Closed) | Err(PopError::Timeout) => return SchedulerOutcome::NoFrame,
        };
        self.counters.frames_popped.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let pts = frame.pts_ms();

        if sync.should_drop_video(pts, now) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return SchedulerOutcome::Dropped;
        }

        if sync.should_repeat_video(pts, now) {
            // The frame is far enough ahead of the master clock that we
            // present it immediately rather than sleep the full delay out;
            // the renderer's last bound surface carries the visual gap.
            let completion = Instant::now();
            presenter.present(&frame);
            sync.update_video_clock(pts, completion);
            self.counters.frames_repeated.fetch_add(1, Ordering::Relaxed);
            return SchedulerOutcome::Repeated;
        }

        let delay_ms = sync.video_delay(pts, now);
        if delay_ms > 0.0 {
            sleep(Duration::from_secs_f64(delay_ms / 1000.0));
        }

        if state.should_stop() {
            return SchedulerOutcome::NoFrame;
        }

        presenter.present(&frame);
        let completion = Instant::now();
        sync.update_video_clock(pts, completion);
        self.counters.frames_presented.fetch_add(1, Ordering::Relaxed);
        SchedulerOutcome::Presented
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::controller::SyncMode;
    use std::time::Duration;

    struct CountingPresenter {
        calls: u32,
    }

    impl FramePresenter for CountingPresenter {
        fn present(&mut self, _frame: &DecodedVideoFrame) -> bool {
            self.calls += 1;
            true
        }
    }

    fn frame_at(pts_ms: f64) -> DecodedVideoFrame {
        DecodedVideoFrame::Cpu {
            planes: vec![],
            format: crate::video::frame::PixelFormat::Rgba,
            width: 1,
            height: 1,
            pts_ms,
        }
    }

    fn no_sleep(_d: Duration) {}

    #[test]
    fn on_time_frame_is_presented() {
        let scheduler = RenderScheduler::new();
        let queue = BoundedQueue::new(4);
        let sync = AVSyncController::new(SyncMode::AudioMaster);
        let state = StateManager::new();
        state.transition_to(crate::state::PlayerState::Opening);
        state.transition_to(crate::state::PlayerState::Stopped);
        state.transition_to(crate::state::PlayerState::Playing);

        sync.update_audio_clock(1000.0, Instant::now());
        queue.try_push(frame_at(1000.0)).unwrap();

        let mut presenter = CountingPresenter { calls: 0 };
        let outcome = scheduler.step(&queue, &sync, &state, &mut presenter, &no_sleep);
        assert_eq!(outcome, SchedulerOutcome::Presented);
        assert_eq!(presenter.calls, 1);
        let (popped, presented, dropped, repeated) = scheduler.counters().snapshot();
        assert_eq!((popped, presented, dropped, repeated), (1, 1, 0, 0));
    }

    #[test]
    fn badly_late_frame_is_dropped_not_presented() {
        let scheduler = RenderScheduler::new();
        let queue = BoundedQueue::new(4);
        let sync = AVSyncController::new(SyncMode::AudioMaster);
        let state = StateManager::new();
        state.transition_to(crate::state::PlayerState::Opening);
        state.transition_to(crate::state::PlayerState::Stopped);
        state.transition_to(crate::state::PlayerState::Playing);

        sync.update_audio_clock(1000.0, Instant::now());
        // 200ms behind master -> should_drop_video is true (default threshold 80ms).
        queue.try_push(frame_at(800.0)).unwrap();

        let mut presenter = CountingPresenter { calls: 0 };
        let outcome = scheduler.step(&queue, &sync, &state, &mut presenter, &no_sleep);
        assert_eq!(outcome, SchedulerOutcome::Dropped);
        assert_eq!(presenter.calls, 0);
        let (popped, presented, dropped, _) = scheduler.counters().snapshot();
        assert_eq!((popped, presented, dropped), (1, 0, 1));
    }

    #[test]
    fn far_ahead_frame_is_repeated() {
        let scheduler = RenderScheduler::new();
        let queue = BoundedQueue::new(4);
        let sync = AVSyncController::new(SyncMode::AudioMaster);
        let state = StateManager::new();
        state.transition_to(crate::state::PlayerState::Opening);
        state.transition_to(crate::state::PlayerState::Stopped);
        state.transition_to(crate::state::PlayerState::Playing);

        sync.update_audio_clock(1000.0, Instant::now());
        // 200ms ahead of master -> should_repeat_video is true (default threshold 20ms).
        queue.try_push(frame_at(1200.0)).unwrap();

        let mut presenter = CountingPresenter { calls: 0 };
        let outcome = scheduler.step(&queue, &sync, &state, &mut presenter, &no_sleep);
        assert_eq!(outcome, SchedulerOutcome::Repeated);
        assert_eq!(presenter.calls, 1);
        let (popped, _, _, repeated) = scheduler.counters().snapshot();
        assert_eq!((popped, repeated), (1, 1));
    }

    #[test]
    fn empty_queue_times_out_without_spinning() {
        let scheduler = RenderScheduler::new();
        let queue: BoundedQueue<DecodedVideoFrame> = BoundedQueue::new(4);
        let sync = AVSyncController::new(SyncMode::AudioMaster);
        let state = StateManager::new();
        state.transition_to(crate::state::PlayerState::Opening);
        state.transition_to(crate::state::PlayerState::Stopped);
        state.transition_to(crate::state::PlayerState::Playing);

        let mut presenter = CountingPresenter { calls: 0 };
        let start = Instant::now();
        let outcome = scheduler.step(&queue, &sync, &state, &mut presenter, &no_sleep);
        assert_eq!(outcome, SchedulerOutcome::NoFrame);
        assert!(start.elapsed() >= Duration::from_millis(POP_TIMEOUT.as_millis() as u64 - 5));
        assert_eq!(presenter.calls, 0);
    }

    #[test]
    fn sum_of_outcomes_equals_frames_popped() {
        let scheduler = RenderScheduler::new();
        let queue = BoundedQueue::new(8);
        let sync = AVSyncController::new(SyncMode::AudioMaster);
        let state = StateManager::new();
        state.transition_to(crate::state::PlayerState::Opening);
        state.transition_to(crate::state::PlayerState::Stopped);
        state.transition_to(crate::state::PlayerState::Playing);

        sync.update_audio_clock(1000.0, Instant::now());
        queue.try_push(frame_at(1000.0)).unwrap(); // presented
        queue.try_push(frame_at(800.0)).unwrap(); // dropped
        queue.try_push(frame_at(1300.0)).unwrap(); // repeated

        let mut presenter = CountingPresenter { calls: 0 };
        for _ in 0..3 {
            scheduler.step(&queue, &sync, &state, &mut presenter, &no_sleep);
        }
        let (popped, presented, dropped, repeated) = scheduler.counters().snapshot();
        assert_eq!(popped, presented + dropped + repeated);
    }
}
