//! The top-level Player API (§5/§6): the controller that owns a session's
//! state machine and spawns/tears down its worker threads.

pub mod controller;

pub use controller::PlaybackController;
