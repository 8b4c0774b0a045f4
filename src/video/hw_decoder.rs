//! Hardware decoder context negotiation (C4.1).
//!
//! The real platform backends (D3D11VA, VAAPI, VideoToolbox) each need a
//! vendor-specific device/context handshake with the renderer before a
//! decoder can hand it GPU surfaces instead of copying pixels to the CPU.
//! That handshake is behind this trait so the render path selection logic in
//! [`crate::playback::controller`] doesn't care which platform it's running on.
//! Only the negotiation itself is platform-specific; `FallbackHwContext`
//! below always reports itself unavailable, which is the conservative
//! choice when no platform backend is wired in.

use crate::config::RenderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwKind {
    D3d11,
    Vaapi,
    VideoToolbox,
}

impl HwKind {
    pub fn as_config_key(&self) -> &'static str {
        match self {
            HwKind::D3d11 => "d3d11",
            HwKind::Vaapi => "vaapi",
            HwKind::VideoToolbox => "videotoolbox",
        }
    }
}

/// Negotiates a hardware decode device/context appropriate to the running
/// platform. A concrete implementation owns whatever vendor handle backs
/// `device_handle()`; the decoder attaches it to the FFmpeg codec context,
/// and surfaces the decoder produces are looked up by the renderer via
/// `device_handle()`'s associated shader-resource-view cache.
pub trait HwDecoderContext: Send {
    fn kind(&self) -> HwKind;
    /// `true` once a real device/context has been created and is usable.
    fn is_available(&self) -> bool;
    /// Opaque handle the renderer's surface cache correlates against the
    /// `surface_handle` field of `DecodedVideoFrame::GpuSurface`. `None`
    /// until `is_available()`.
    fn device_handle(&self) -> Option<u64>;
}

/// The only `HwDecoderContext` this build ships: reports itself permanently
/// unavailable, so `negotiate_hw_context` always falls through to software
/// decode. A real platform backend would replace this per-target, but none
/// of this corpus's dependencies provide one.
pub struct FallbackHwContext {
    kind: HwKind,
}

impl FallbackHwContext {
    pub fn new(kind: HwKind) -> Self {
        Self { kind }
    }
}

impl HwDecoderContext for FallbackHwContext {
    fn kind(&self) -> HwKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        false
    }

    fn device_handle(&self) -> Option<u64> {
        None
    }
}

fn platform_default_kind() -> HwKind {
    if cfg!(target_os = "windows") {
        HwKind::D3d11
    } else if cfg!(target_os = "macos") {
        HwKind::VideoToolbox
    } else {
        HwKind::Vaapi
    }
}

/// Render path selection per §4.4.5: tries a hardware context only if the
/// config both enables hardware acceleration and whitelists this platform's
/// kind; otherwise (or on negotiation failure with `allow_fallback` set)
/// returns `None` and the caller proceeds entirely in software.
pub fn negotiate_hw_context(config: &RenderConfig) -> Option<Box<dyn HwDecoderContext>> {
    if !config.use_hardware_acceleration {
        return None;
    }
    let kind = platform_default_kind();
    if !config.allows_hw_kind(kind.as_config_key()) {
        return None;
    }
    let ctx = FallbackHwContext::new(kind);
    if ctx.is_available() {
        Some(Box::new(ctx))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_context_is_never_available() {
        let ctx = FallbackHwContext::new(HwKind::D3d11);
        assert!(!ctx.is_available());
        assert!(ctx.device_handle().is_none());
    }

    #[test]
    fn negotiation_disabled_by_default_config() {
        let config = RenderConfig::default();
        assert!(negotiate_hw_context(&config).is_none());
    }

    #[test]
    fn negotiation_returns_none_even_when_enabled_without_a_real_backend() {
        let mut config = RenderConfig::default();
        config.use_hardware_acceleration = true;
        assert!(negotiate_hw_context(&config).is_none());
    }
}
