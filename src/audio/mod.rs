//! Audio decode-adjacent, resample, and output stages (C3).

pub mod frame;
pub mod player;
pub mod resampler;

pub use frame::{DecodedAudioData, DecodedAudioFrame, ResampledAudioFrame};
pub use player::{AudioPlayer, AudioSink, AudioSpec};
pub use resampler::{AudioResampler, ResamplerConfig};

#[cfg(test)]
pub use player::MockAudioSink;
