//! Engine configuration surface. Parsing this from a file or environment is
//! out of scope for the core; this type is what `open`/`set_render_window`
//! consult once the caller has populated it however it likes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    S16,
    S32,
    F32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub use_hardware_acceleration: bool,
    #[serde(default)]
    pub allow_fallback: bool,
    /// Per-hardware-decoder-kind whitelist (`d3d11`, `vaapi`, `videotoolbox`, ...).
    /// Absent entries default to allowed, matching `allow_<kind>: bool = true`.
    #[serde(default)]
    pub allowed_hw_kinds: std::collections::HashSet<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            use_hardware_acceleration: false,
            allow_fallback: false,
            allowed_hw_kinds: std::collections::HashSet::new(),
        }
    }
}

impl RenderConfig {
    pub fn allows_hw_kind(&self, kind: &str) -> bool {
        self.allowed_hw_kinds.is_empty() || self.allowed_hw_kinds.contains(kind)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_max_video_delay_ms")]
    pub max_video_delay_ms: f64,
    #[serde(default = "default_max_video_speedup_ms")]
    pub max_video_speedup_ms: f64,
    #[serde(default = "default_drop_threshold_ms")]
    pub drop_threshold_ms: f64,
    #[serde(default = "default_repeat_threshold_ms")]
    pub repeat_threshold_ms: f64,
    #[serde(default = "default_true")]
    pub enable_frame_drop: bool,
    #[serde(default = "default_true")]
    pub enable_frame_repeat: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_video_delay_ms: default_max_video_delay_ms(),
            max_video_speedup_ms: default_max_video_speedup_ms(),
            drop_threshold_ms: default_drop_threshold_ms(),
            repeat_threshold_ms: default_repeat_threshold_ms(),
            enable_frame_drop: true,
            enable_frame_repeat: true,
        }
    }
}

fn default_max_video_delay_ms() -> f64 {
    100.0
}
fn default_max_video_speedup_ms() -> f64 {
    100.0
}
fn default_drop_threshold_ms() -> f64 {
    80.0
}
fn default_repeat_threshold_ms() -> f64 {
    20.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub target_sample_rate: u32,
    #[serde(default = "default_channels")]
    pub target_channels: u16,
    #[serde(default = "default_format")]
    pub target_format: SampleFormat,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: default_sample_rate(),
            target_channels: default_channels(),
            target_format: default_format(),
        }
    }
}

fn default_sample_rate() -> u32 {
    44_100
}
fn default_channels() -> u16 {
    2
}
fn default_format() -> SampleFormat {
    SampleFormat::S16
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_video_frame_capacity")]
    pub video_frame_capacity: usize,
    #[serde(default = "default_pcm_capacity")]
    pub pcm_capacity: usize,
    #[serde(default = "default_packet_capacity")]
    pub packet_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            video_frame_capacity: default_video_frame_capacity(),
            pcm_capacity: default_pcm_capacity(),
            packet_capacity: default_packet_capacity(),
        }
    }
}

fn default_video_frame_capacity() -> usize {
    30
}
fn default_pcm_capacity() -> usize {
    50
}
fn default_packet_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub queues: QueueConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.sync.max_video_delay_ms < 0.0 || self.sync.max_video_speedup_ms < 0.0 {
            return Err("sync delay/speedup clamps must be non-negative".into());
        }
        if self.audio.target_channels == 0 {
            return Err("audio.target_channels must be > 0".into());
        }
        if self.queues.video_frame_capacity == 0
            || self.queues.pcm_capacity == 0
            || self.queues.packet_capacity == 0
        {
            return Err("queue capacities must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.target_sample_rate, 44_100);
        assert_eq!(config.queues.pcm_capacity, 50);
    }

    #[test]
    fn rejects_zero_channels() {
        let mut config = Config::default();
        config.audio.target_channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn hw_kind_whitelist_defaults_to_allow_all() {
        let config = RenderConfig::default();
        assert!(config.allows_hw_kind("d3d11"));
    }

    #[test]
    fn json_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.audio.target_sample_rate, config.audio.target_sample_rate);
    }
}
