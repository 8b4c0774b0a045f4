//! Rendering (C4.4): a renderer trait with two conforming backends (GPU
//! zero-copy, CPU fallback), the shader-resource-view cache the GPU backend
//! relies on, and the UI-thread marshaling proxy every backend runs behind.

pub mod marshal;
pub mod renderer;
pub mod shader;
pub mod srv_cache;
pub mod texture;

pub use marshal::{ThreadAffineRenderer, UiThreadMarshal};
pub use renderer::{CpuRenderer, GpuRenderer, RenderError, Renderer, SurfaceViewProvider};
pub use srv_cache::{SrvCache, SrvCacheStats, SurfaceKey};

#[cfg(test)]
pub use marshal::MockUiThreadMarshal;
