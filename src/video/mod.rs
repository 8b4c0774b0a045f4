//! Video decode-adjacent types and the render scheduler (C4).

pub mod frame;
pub mod hw_decoder;
pub mod scheduler;

pub use frame::{DecodedVideoFrame, PixelFormat, Plane};
pub use hw_decoder::{negotiate_hw_context, HwDecoderContext, HwKind};
pub use scheduler::{FramePresenter, RenderScheduler, SchedulerCounters, SchedulerOutcome};
