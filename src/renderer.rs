//! GLES renderer for DRM PRIME frames
//!
//! Draws a slot of the [`BufferPool`] through the host render system: the
//! frame's layers are sampled as textures, converted to RGB by the YUV shader
//! and a completion fence is inserted behind the draw so the decoder knows
//! when the slot may be recycled.
//!
//! Per slot the lifecycle is `Empty -> Mapped -> Drawn -> Signaled -> Empty`.

use crate::buffer::{VideoBuffer, VideoPicture};
use crate::config::RendererConfig;
use crate::geometry::{bar_vertices, fit_dest_rect, rotated_corners, Orientation, Point, Rect};
use crate::gpu::{Blend, CompletionFence, GpuBackend, PlaneTextures, RenderSystem, Shader, TexturedVertex};
use crate::matrix::ColorTransform;
use crate::pool::BufferPool;
use tracing::{debug, error, trace, warn};

/// Triangle strip order over top-left, top-right, bottom-right, bottom-left
const QUAD_INDICES: [u8; 4] = [0, 1, 3, 2];

/// Texture coordinates matching the corner order of the rotated quad
const QUAD_UVS: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

/// Optional renderer capabilities queried by the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFeature {
    Stretch,
    Zoom,
    VerticalShift,
    PixelRatio,
    Rotation,
    Brightness,
    Contrast,
    Gamma,
    Noise,
    Sharpness,
    NonLinearStretch,
}

/// Video scaling filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingMethod {
    Nearest,
    Linear,
    Cubic,
    Lanczos2,
    Lanczos3,
    Spline36,
}

/// What the renderer asks of the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderInfo {
    /// Frames that may be queued at once
    pub max_buffer_size: usize,
}

/// State of the display at draw time
pub struct FrameContext<'a> {
    /// `None` when the host has no usable GLES render system
    pub render_system: Option<&'a mut dyn RenderSystem>,
    /// Full drawable area of the window
    pub window: Rect,
    /// Output is limited (16-235) range
    pub limited_color: bool,
}

pub struct GlesRenderer<G: GpuBackend> {
    config: RendererConfig,
    pool: BufferPool<G>,
    configured: bool,
    source_width: u32,
    source_height: u32,
    frame_aspect: f32,
    window: Rect,
    dest_rect: Rect,
    rotated: [Point; 4],
}

impl<G: GpuBackend> GlesRenderer<G> {
    /// Name the renderer registers under
    pub const NAME: &'static str = "drm_prime_gles";

    pub fn new(config: RendererConfig) -> Self {
        let pool = BufferPool::new(config.buffer_count);
        Self {
            config,
            pool,
            configured: false,
            source_width: 0,
            source_height: 0,
            frame_aspect: 1.0,
            window: Rect::default(),
            dest_rect: Rect::default(),
            rotated: [Point::default(); 4],
        }
    }

    /// Build a renderer if `buffer` is a DRM PRIME frame the GPU can import
    pub fn create(buffer: &VideoBuffer, gpu: &G, config: RendererConfig) -> Option<Self> {
        let buffer = buffer.as_prime()?;
        let descriptor = buffer.descriptor()?;
        let format = descriptor.primary_format()?;
        let modifier = descriptor.primary_modifier()?;

        if descriptor.layers.len() == 1 && descriptor.layers[0].planes.len() > 1 {
            debug!(
                "Format 0x{:08x} has {} planes in one layer, only one plane per texture is sampled",
                format,
                descriptor.layers[0].planes.len()
            );
            return None;
        }

        if !gpu.supports_format_and_modifier(format, modifier) {
            debug!(
                "GPU cannot import format 0x{:08x} modifier 0x{:016x}",
                format, modifier
            );
            return None;
        }

        Some(Self::new(config))
    }

    /// Prepare for a stream described by its first picture
    pub fn configure(&mut self, gpu: &G, picture: &VideoPicture, fps: f32, orientation: u32) -> bool {
        let orientation = Orientation::from_degrees(orientation);
        self.source_width = picture.width;
        self.source_height = picture.height;

        let (dw, dh) = if picture.display_width > 0 && picture.display_height > 0 {
            (picture.display_width, picture.display_height)
        } else {
            (picture.width, picture.height)
        };
        self.frame_aspect = dw as f32 / dh.max(1) as f32;

        debug!(
            "Configure {}x{} (display {}x{}) @ {:.3} fps, chroma position {}, stereo '{}'",
            picture.width,
            picture.height,
            dw,
            dh,
            fps,
            picture.chroma_position,
            picture.stereo_mode
        );

        self.configured = self.pool.configure(
            gpu,
            picture.buffer.format(),
            picture.width,
            picture.height,
            orientation,
        );
        if self.configured {
            self.manage_render_area();
        }
        self.configured
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Queue a decoded frame into slot `index`
    pub fn add_frame(&mut self, index: usize, picture: &VideoPicture) {
        if let Err(e) = self.pool.submit(index, picture) {
            error!("Dropping frame for slot {}: {}", index, e);
        }
    }

    pub fn flush(&mut self, keep: bool) -> bool {
        self.pool.flush(keep)
    }

    pub fn release_buffer(&mut self, index: usize) {
        self.pool.release(index);
    }

    /// True while the GPU may still sample slot `index`
    pub fn needs_buffer(&self, index: usize) -> bool {
        !self.pool.can_reuse(index)
    }

    pub fn render_info(&self) -> RenderInfo {
        RenderInfo {
            max_buffer_size: self.pool.len(),
        }
    }

    /// A new picture with a different pixel format needs a reconfigure
    pub fn config_changed(&self, picture: &VideoPicture) -> bool {
        picture.buffer.format() != self.pool.format()
    }

    pub fn supports_feature(&self, feature: RenderFeature) -> bool {
        matches!(
            feature,
            RenderFeature::Stretch
                | RenderFeature::Zoom
                | RenderFeature::VerticalShift
                | RenderFeature::PixelRatio
                | RenderFeature::Rotation
        )
    }

    pub fn supports_scaling_method(&self, method: ScalingMethod) -> bool {
        method == ScalingMethod::Linear
    }

    pub fn pool(&self) -> &BufferPool<G> {
        &self.pool
    }

    pub fn dest_rect(&self) -> Rect {
        self.dest_rect
    }

    /// Track window changes between draws
    pub fn update(&mut self, window: Rect) {
        if !self.configured {
            return;
        }
        self.window = window;
        self.manage_render_area();
    }

    fn manage_render_area(&mut self) {
        let orientation = self.pool.orientation();
        self.dest_rect = fit_dest_rect(&self.window, self.frame_aspect, orientation, &self.config.view);
        self.rotated = rotated_corners(&self.dest_rect, orientation);
    }

    fn draw_black_bars(&self, rs: &mut dyn RenderSystem, colour: f32) {
        let bars = self.window.subtract(&self.dest_rect);
        if bars.is_empty() {
            return;
        }

        rs.set_blend(Blend::Disabled);
        rs.enable_shader(Shader::Solid);
        rs.set_uniform_color([colour, colour, colour, 1.0]);
        rs.draw_triangles(&bar_vertices(&bars));
        rs.disable_shader();
    }

    /// Draw slot `index`.
    ///
    /// Any failure skips this frame only; slot occupancy is never changed
    /// here and the next call retries from scratch.
    pub fn render_update(
        &mut self,
        ctx: &mut FrameContext<'_>,
        index: usize,
        clear: bool,
        flags: u32,
        alpha: u8,
    ) {
        if !self.configured {
            return;
        }

        trace!("render_update slot={} clear={} flags=0x{:x} alpha={}", index, clear, flags, alpha);

        self.window = ctx.window;
        self.manage_render_area();

        let Some(rs) = ctx.render_system.as_deref_mut() else {
            warn!("No render system, skipping frame");
            return;
        };

        let clear_colour = if ctx.limited_color { 16.0 / 255.0 } else { 0.0 };

        if clear {
            if alpha == u8::MAX {
                self.draw_black_bars(rs, clear_colour);
            } else {
                rs.clear([clear_colour, clear_colour, clear_colour, 0.0]);
            }
        }

        let shader_alpha = if alpha < u8::MAX {
            rs.set_blend(Blend::SrcOver);
            alpha as f32 / 255.0
        } else {
            rs.set_blend(Blend::Disabled);
            1.0
        };

        let contrast = self.config.contrast;
        let black = self.config.black_level;
        let rotated = self.rotated;

        let Some(slot) = self.pool.slot_mut(index) else {
            error!("render_update on slot {} out of range", index);
            return;
        };

        let Some(buffer) = slot.buffer.clone() else {
            return;
        };
        if !buffer.is_valid() {
            warn!("Slot {} holds an invalid buffer", index);
            return;
        }

        let Some(textures) = slot.textures.as_mut() else {
            return;
        };
        if let Err(e) = textures.map(buffer.as_ref()) {
            warn!("Failed to map slot {}: {}", index, e);
            return;
        }

        let Some(texture_y) = textures.texture(0) else {
            error!("Slot {} mapped without a luma texture", index);
            return;
        };

        rs.enable_shader(Shader::Yuv2Rgb);

        let target = textures.target();
        rs.bind_texture(0, target, texture_y);
        debug!("Y={}", texture_y);

        if let Some(texture_u) = textures.texture(1) {
            rs.bind_texture(1, target, texture_u);
            debug!("U={}", texture_u);
            rs.set_layers(2);
        }

        if let Some(texture_v) = textures.texture(2) {
            rs.bind_texture(2, target, texture_v);
            debug!("V={}", texture_v);
            rs.set_layers(3);
        }

        rs.set_alpha(shader_alpha);

        let texture_bits = textures.bits();
        let source = slot.source;
        let transform = ColorTransform::for_source(&source, texture_bits, contrast, black, ctx.limited_color);

        debug!(
            "source primaries {:?} colorspace {:?} bits {} limited {} texture bits {}",
            source.primaries, source.colorspace, source.bits, !source.full_range, texture_bits
        );
        debug!("YUV matrix: {:?}", transform.yuv);

        rs.set_yuv_matrix(&transform.yuv);
        rs.set_color_conversion(false);

        if let Some(conversion) = transform.conversion {
            rs.set_color_conversion(true);
            rs.set_primary_matrix(&conversion.matrix);
            rs.set_gamma_src(conversion.gamma_src);
            rs.set_gamma_dst_inv(conversion.gamma_dst_inv);
            debug!(
                "primary matrix: {:?} gamma src {} gamma dst inv {}",
                conversion.matrix, conversion.gamma_src, conversion.gamma_dst_inv
            );
        }

        let mut vertices = [TexturedVertex::default(); 4];
        for ((vertex, corner), (u, v)) in vertices.iter_mut().zip(rotated.iter()).zip(QUAD_UVS) {
            *vertex = TexturedVertex {
                x: corner.x,
                y: corner.y,
                z: 0.0,
                u,
                v,
            };
        }

        rs.draw_textured_strip(&vertices, &QUAD_INDICES);
        rs.disable_shader();

        if let Some(fence) = slot.fence.as_mut() {
            fence.create();
        }

        rs.set_blend(Blend::SrcOver);
    }
}
