//! Bounded, closeable FIFO queue (C2) used for every producer/consumer edge
//! in the pipeline: packet queues, the PCM queue, the video frame queue.
//!
//! This replaces two queue shapes that used to coexist side by side (an
//! unbounded thread-safe queue with a timeout-based pop, and a separately
//! maintained bounded/blocking queue) with one abstraction, because every
//! use site in this pipeline needs backpressure.

pub mod bounded;

pub use bounded::{BoundedQueue, PopError, PushError};
