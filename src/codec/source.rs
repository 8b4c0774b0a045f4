//! The demuxer: reads one media source (file or URL) and produces encoded
//! packets in file order, interleaved between streams. This is the "packet
//! source" the demux worker drives.

use std::path::Path;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::media::Type as FfmpegMediaType;
use ffmpeg_next::Rational;

use crate::error::{EngineError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// One encoded packet plus enough timing metadata for the decoder and the
/// sync controller; PTS is left in the stream's native timebase units and
/// converted to milliseconds by the caller using `time_base`.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_keyframe: bool,
    pub kind: StreamKind,
}

#[derive(Debug, Clone, Copy)]
pub struct MediaInfo {
    pub duration_ms: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_time_base: Option<(i32, i32)>,
    pub audio_time_base: Option<(i32, i32)>,
}

fn rational_to_pair(r: Rational) -> (i32, i32) {
    (r.numerator(), r.denominator())
}

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("rtmp://")
}

/// The demux worker's view of a source: read packets in order, seek. Exists
/// so the demux loop can be driven against a fake source in tests instead of
/// a real file.
#[cfg_attr(test, mockall::automock)]
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError>;
    fn seek(&mut self, target_ms: f64) -> Result<(), EngineError>;
}

/// Opens a local file or network URL and demuxes it. Network initialization
/// inside FFmpeg runs exactly once process-wide (`ffmpeg_next::init`), per
/// §6 "process-wide state".
pub struct MediaSource {
    input: Input,
    info: MediaInfo,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    buffered_packet: Option<Packet>,
}

impl MediaSource {
    pub fn open(location: &str) -> Result<Self, EngineError> {
        ffmpeg_next::init().map_err(|e| EngineError::new(ErrorKind::IoError, format!("ffmpeg init failed: {e}")))?;

        let input = if is_url(location) {
            ffmpeg_next::format::input(&location)
        } else {
            let path = Path::new(location);
            if !path.exists() {
                return Err(EngineError::new(ErrorKind::IoError, format!("file not found: {location}")));
            }
            ffmpeg_next::format::input(&path)
        }
        .map_err(|e| EngineError::new(ErrorKind::IoError, format!("failed to open '{location}': {e}")))?;

        let video_stream_index = input.streams().best(FfmpegMediaType::Video).map(|s| s.index());
        let audio_stream_index = input.streams().best(FfmpegMediaType::Audio).map(|s| s.index());

        if video_stream_index.is_none() && audio_stream_index.is_none() {
            return Err(EngineError::new(ErrorKind::StreamNotFound, "no video or audio stream found"));
        }

        let video_time_base = video_stream_index.map(|i| rational_to_pair(input.stream(i).unwrap().time_base()));
        let audio_time_base = audio_stream_index.map(|i| rational_to_pair(input.stream(i).unwrap().time_base()));

        let duration_ms = if input.duration() > 0 {
            input.duration() as f64 * 1000.0 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
        } else {
            0.0
        };

        Ok(Self {
            input,
            info: MediaInfo {
                duration_ms,
                has_video: video_stream_index.is_some(),
                has_audio: audio_stream_index.is_some(),
                video_time_base,
                audio_time_base,
            },
            video_stream_index,
            audio_stream_index,
            buffered_packet: None,
        })
    }

    pub fn media_info(&self) -> MediaInfo {
        self.info
    }

    pub fn video_stream_index(&self) -> Option<usize> {
        self.video_stream_index
    }

    pub fn audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    pub fn video_codec_parameters(&self) -> Option<ffmpeg_next::codec::Parameters> {
        self.video_stream_index.map(|i| self.input.stream(i).unwrap().parameters())
    }

    pub fn audio_codec_parameters(&self) -> Option<ffmpeg_next::codec::Parameters> {
        self.audio_stream_index.map(|i| self.input.stream(i).unwrap().parameters())
    }

    /// Reads the next packet belonging to the video or audio stream,
    /// skipping packets from any other stream (subtitles, data streams).
    pub fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        if let Some(packet) = self.buffered_packet.take() {
            return Ok(Some(packet));
        }
        self.read_next_packet_internal()
    }

    fn read_next_packet_internal(&mut self) -> Result<Option<Packet>, EngineError> {
        loop {
            let next = self.input.packets().next();
            let (stream, ffmpeg_packet) = match next {
                Some(pair) => pair,
                None => return Ok(None),
            };

            let index = stream.index();
            let kind = if Some(index) == self.video_stream_index {
                StreamKind::Video
            } else if Some(index) == self.audio_stream_index {
                StreamKind::Audio
            } else {
                continue;
            };

            let data = ffmpeg_packet.data().map(|d| d.to_vec()).unwrap_or_default();
            return Ok(Some(Packet {
                data,
                pts: ffmpeg_packet.pts(),
                dts: ffmpeg_packet.dts(),
                duration: ffmpeg_packet.duration(),
                is_keyframe: ffmpeg_packet.is_key(),
                kind,
            }));
        }
    }

    /// Seeks to the nearest keyframe at or before `target_ms`, per §5 the
    /// demuxer performs the backend seek; downstream queue flush and clock
    /// reset are the controller's responsibility.
    pub fn seek(&mut self, target_ms: f64) -> Result<(), EngineError> {
        let target_ts = (target_ms / 1000.0 * f64::from(ffmpeg_next::ffi::AV_TIME_BASE)) as i64;
        self.input
            .seek(target_ts, ..target_ts)
            .map_err(|e| EngineError::new(ErrorKind::DemuxError, format!("seek failed: {e}")))?;
        self.buffered_packet = None;
        Ok(())
    }
}

impl PacketSource for MediaSource {
    fn next_packet(&mut self) -> Result<Option<Packet>, EngineError> {
        MediaSource::next_packet(self)
    }

    fn seek(&mut self, target_ms: f64) -> Result<(), EngineError> {
        MediaSource::seek(self, target_ms)
    }
}
