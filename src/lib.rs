//! Zero-copy rendering of DRM PRIME video frames
//!
//! Hardware decoders hand out frames as DMA-buf descriptors. This library
//! puts them on screen without copying, by one of two paths:
//!
//! - [`GlesRenderer`] imports each layer as an EGL image, samples it as a
//!   GLES texture and draws a textured quad through the host's render
//!   system, with colour conversion and tone parameters applied by the
//!   shader.
//! - [`ScanoutRenderer`] turns the frame into a KMS framebuffer and stages it
//!   on a dedicated video plane, together with the plane colour properties
//!   and HDR output metadata.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Video player (decoder + render loop)           │
//! └─────────────────────────────────────────────────────────────┘
//!                  │ VideoPicture (Arc<dyn PrimeBuffer>)
//!          ┌───────┴──────────────────────┐
//!          ▼                              ▼
//! ┌─────────────────────┐      ┌─────────────────────────────┐
//! │ GlesRenderer        │      │ ScanoutRenderer             │
//! │  BufferPool         │      │  VideoLayerBridge           │
//! │  ColorTransform     │      │  PlaneColorState / HdrBlob  │
//! └─────────────────────┘      └─────────────────────────────┘
//!          │                              │
//!   GpuBackend (EGL/GLES)          AtomicDisplay + KmsDevice
//!          │                              │
//! ┌─────────────────────┐      ┌─────────────────────────────┐
//! │ EGL dma-buf import  │      │ DRM control, atomic request │
//! └─────────────────────┘      └─────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use drm_prime_render::{GlesRenderer, RendererConfig, VideoBuffer};
//!
//! let gpu = unsafe { drm_prime_render::egl::EglBackend::from_current()? };
//! let mut renderer = GlesRenderer::create(&picture.buffer, &gpu, RendererConfig::default())
//!     .ok_or("format not importable")?;
//! renderer.configure(&gpu, &picture, 25.0, 0);
//! renderer.add_frame(0, &picture);
//! renderer.render_update(&mut frame, 0, true, 0, 255);
//! ```

pub mod bridge;
pub mod buffer;
pub mod color;
pub mod config;
pub mod display;
pub mod drm_device;
pub mod edid;
#[cfg(feature = "egl")]
pub mod egl;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod hdr;
pub mod matrix;
pub mod pool;
pub mod renderer;
pub mod scanout;

#[cfg(test)]
mod testing;

pub use bridge::VideoLayerBridge;
pub use buffer::{FrameDescriptor, PrimeBuffer, VideoBuffer, VideoPicture};
pub use config::RendererConfig;
pub use display::{AtomicDisplay, KmsObject};
pub use drm_device::{DrmCard, KmsDevice};
pub use error::Error;
pub use renderer::GlesRenderer;
pub use scanout::ScanoutRenderer;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
