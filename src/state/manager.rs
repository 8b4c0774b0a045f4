use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Opening,
    Stopped,
    Playing,
    Paused,
    Seeking,
    Error,
}

fn is_allowed(from: PlayerState, to: PlayerState) -> bool {
    use PlayerState::*;
    if to == Error {
        return true; // Error reachable from any state.
    }
    match (from, to) {
        (Idle, Opening) => true,
        (Opening, Idle) => true,
        (Opening, Stopped) => true,
        (Stopped, Playing) => true,
        (Stopped, Idle) => true,
        (Playing, Paused) => true,
        (Playing, Stopped) => true,
        (Playing, Seeking) => true,
        (Paused, Playing) => true,
        (Paused, Stopped) => true,
        (Paused, Seeking) => true,
        // Seeking returns to whichever state started it; the caller is
        // expected to use `finish_seek` rather than a raw transition_to for
        // the return arc, but a direct Stopped escape (e.g. `stop()` issued
        // mid-seek) is also valid.
        (Seeking, Stopped) => true,
        (Error, Idle) => true,
        _ => false,
    }
}

struct Inner {
    state: PlayerState,
    seek_origin: Option<PlayerState>,
}

/// Holds the player FSM plus the condition variable every worker's main loop
/// suspends on. A transition away from `Paused` wakes *every* waiter, not
/// just ones resuming into `Playing` — a worker parked in `wait_for_resume`
/// while the controller calls `stop()` must not wait out its full timeout.
pub struct StateManager {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { state: PlayerState::Idle, seek_origin: None }),
            condvar: Condvar::new(),
        }
    }

    pub fn current(&self) -> PlayerState {
        self.inner.lock().unwrap().state
    }

    pub fn transition_to(&self, target: PlayerState) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !is_allowed(inner.state, target) {
            return false;
        }
        if target == PlayerState::Seeking {
            inner.seek_origin = Some(inner.state);
        }
        inner.state = target;
        self.condvar.notify_all();
        true
    }

    /// Returns seeking to whichever state (`Playing` or `Paused`) originated
    /// it.
    pub fn finish_seek(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != PlayerState::Seeking {
            return false;
        }
        let target = inner.seek_origin.take().unwrap_or(PlayerState::Stopped);
        inner.state = target;
        self.condvar.notify_all();
        true
    }

    pub fn should_stop(&self) -> bool {
        matches!(
            self.inner.lock().unwrap().state,
            PlayerState::Stopped | PlayerState::Idle | PlayerState::Error
        )
    }

    /// Blocks while state is `Paused`; returns once state becomes anything
    /// else, or the timeout expires. Returns `true` if woken by a
    /// transition, `false` on timeout (caller re-checks `current()`/
    /// `should_stop()` either way).
    pub fn wait_for_resume(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();
        while inner.state == PlayerState::Paused {
            let (guard, timeout_result) = self.condvar.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if timeout_result.timed_out() && inner.state == PlayerState::Paused {
                return false;
            }
        }
        true
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn legal_transitions_succeed() {
        let m = StateManager::new();
        assert!(m.transition_to(PlayerState::Opening));
        assert!(m.transition_to(PlayerState::Stopped));
        assert!(m.transition_to(PlayerState::Playing));
        assert!(m.transition_to(PlayerState::Paused));
    }

    #[test]
    fn illegal_transition_rejected() {
        let m = StateManager::new();
        // Idle -> Playing is not a direct arc.
        assert!(!m.transition_to(PlayerState::Playing));
        assert_eq!(m.current(), PlayerState::Idle);
    }

    #[test]
    fn error_reachable_from_any_state() {
        let m = StateManager::new();
        m.transition_to(PlayerState::Opening);
        m.transition_to(PlayerState::Stopped);
        m.transition_to(PlayerState::Playing);
        assert!(m.transition_to(PlayerState::Error));
        assert!(m.transition_to(PlayerState::Idle));
    }

    #[test]
    fn seek_returns_to_originating_state() {
        let m = StateManager::new();
        m.transition_to(PlayerState::Opening);
        m.transition_to(PlayerState::Stopped);
        m.transition_to(PlayerState::Playing);
        m.transition_to(PlayerState::Paused);
        assert!(m.transition_to(PlayerState::Seeking));
        assert!(m.finish_seek());
        assert_eq!(m.current(), PlayerState::Paused);
    }

    #[test]
    fn should_stop_covers_terminal_states() {
        let m = StateManager::new();
        assert!(m.should_stop()); // Idle
        m.transition_to(PlayerState::Opening);
        assert!(!m.should_stop());
        m.transition_to(PlayerState::Stopped);
        assert!(m.should_stop());
    }

    #[test]
    fn wake_on_stop_while_paused() {
        // S5: a worker parked in wait_for_resume must wake promptly on stop,
        // not merely on a transition back into Playing.
        let m = Arc::new(StateManager::new());
        m.transition_to(PlayerState::Opening);
        m.transition_to(PlayerState::Stopped);
        m.transition_to(PlayerState::Playing);
        m.transition_to(PlayerState::Paused);

        let m2 = m.clone();
        let start = std::time::Instant::now();
        let handle = thread::spawn(move || {
            let woken = m2.wait_for_resume(Duration::from_millis(5000));
            (woken, m2.should_stop())
        });
        thread::sleep(Duration::from_millis(50));
        assert!(m.transition_to(PlayerState::Stopped));
        let (woken, stopped) = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(woken);
        assert!(stopped);
    }

    #[test]
    fn wait_for_resume_returns_immediately_when_not_paused() {
        let m = StateManager::new();
        assert!(m.wait_for_resume(Duration::from_millis(10)));
    }
}
