//! zenplay-core: the playback engine at the center of a desktop media
//! player. Demuxes and decodes audio/video in parallel, keeps them in sync
//! against a master clock, and drives a pluggable renderer — everything
//! below the host application's UI chrome.

pub mod audio;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod playback;
pub mod queue;
pub mod render;
pub mod state;
pub mod sync;
pub mod video;

pub use config::Config;
pub use error::{EngineError, ErrorKind, Result};
pub use playback::PlaybackController;
pub use state::PlayerState;
