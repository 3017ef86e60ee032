//! GPU capabilities used by the composited path
//!
//! The renderer never talks to EGL or GLES directly. It goes through these
//! traits so the slot lifecycle can run against the EGL implementation in
//! [`crate::egl`] or against test doubles.

use crate::buffer::PrimeBuffer;
use crate::geometry::Point;
use crate::Result;

/// GPU-side sync object guarding one buffer slot.
///
/// A fence that was never created, or has been destroyed, reads as signaled.
pub trait CompletionFence {
    /// Insert a fence after all commands issued so far, replacing any
    /// previous one
    fn create(&mut self);

    fn destroy(&mut self);

    /// Non-blocking poll
    fn is_signaled(&self) -> bool;
}

/// Per-slot import of a frame's layers as sampleable textures
pub trait PlaneTextures {
    /// Import the buffer's layers. Succeeds immediately when already mapped.
    fn map(&mut self, buffer: &dyn PrimeBuffer) -> Result<()>;

    /// Drop the textures and images; a no-op when nothing is mapped
    fn unmap(&mut self);

    fn is_mapped(&self) -> bool;

    /// Texture name of plane 0 (Y), 1 (U or interleaved UV) or 2 (V)
    fn texture(&self, plane: usize) -> Option<u32>;

    /// GL texture target the names are bound to
    fn target(&self) -> u32;

    /// Storage bits per component of the luma texture
    fn bits(&self) -> u8;
}

/// Factory for the per-slot GPU resources
pub trait GpuBackend {
    type Fence: CompletionFence;
    type Textures: PlaneTextures;

    fn create_fence(&self) -> Self::Fence;

    fn create_textures(&self) -> Self::Textures;

    /// Whether a DMA-buf with this fourcc and modifier can be imported
    fn supports_format_and_modifier(&self, format: u32, modifier: u64) -> bool;
}

/// Blending state for the next draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    Disabled,
    /// `SRC_ALPHA, ONE_MINUS_SRC_ALPHA`
    SrcOver,
}

/// Shader programs provided by the host render system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shader {
    /// Flat color, used for letterbox bars
    Solid,
    /// Samples Y/U/V textures and applies the color matrices
    Yuv2Rgb,
}

/// Vertex layout of the video quad
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TexturedVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub u: f32,
    pub v: f32,
}

/// Shader and draw capability of the host GUI renderer.
///
/// Matrices are handed over as-is: the YUV matrix column-major, the primary
/// matrix row-major.
pub trait RenderSystem {
    fn set_blend(&mut self, blend: Blend);

    fn clear(&mut self, rgba: [f32; 4]);

    fn enable_shader(&mut self, shader: Shader);

    fn disable_shader(&mut self);

    fn set_uniform_color(&mut self, rgba: [f32; 4]);

    /// Draw a triangle list in window coordinates
    fn draw_triangles(&mut self, vertices: &[Point]);

    fn bind_texture(&mut self, unit: u32, target: u32, texture: u32);

    /// Number of planes the YUV shader samples (1 to 3)
    fn set_layers(&mut self, layers: u32);

    fn set_alpha(&mut self, alpha: f32);

    fn set_yuv_matrix(&mut self, matrix: &[[f32; 4]; 4]);

    fn set_color_conversion(&mut self, enabled: bool);

    fn set_primary_matrix(&mut self, matrix: &[[f32; 3]; 3]);

    fn set_gamma_src(&mut self, gamma: f32);

    fn set_gamma_dst_inv(&mut self, gamma: f32);

    /// Draw a triangle strip using `indices` into `vertices`
    fn draw_textured_strip(&mut self, vertices: &[TexturedVertex; 4], indices: &[u8; 4]);
}
