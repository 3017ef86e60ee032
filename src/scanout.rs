//! Direct-scanout renderer
//!
//! Presents queued frames on the video plane through a
//! [`VideoLayerBridge`]. No GPU is involved, so slots carry no fences: a
//! slot is busy only while its frame is the one on screen.

use crate::bridge::{scanout_format, VideoLayerBridge};
use crate::buffer::{VideoBuffer, VideoPicture};
use crate::config::RendererConfig;
use crate::display::AtomicDisplay;
use crate::geometry::{fit_dest_rect, Orientation, Rect};
use crate::hdr::PlaneColorState;
use crate::renderer::{RenderFeature, RenderInfo, ScalingMethod};
use tracing::{debug, error, info, trace, warn};

pub struct ScanoutRenderer<D: AtomicDisplay> {
    config: RendererConfig,
    bridge: VideoLayerBridge<D>,
    slots: Vec<Option<VideoPicture>>,
    configured: bool,
    format: u32,
    frame_aspect: f32,
    window: Rect,
    dest_rect: Rect,
    last_rendered: Option<usize>,
    color_state: Option<PlaneColorState>,
}

impl<D: AtomicDisplay> ScanoutRenderer<D> {
    pub const NAME: &'static str = "drm_prime_scanout";

    pub fn new(display: D, config: RendererConfig) -> Self {
        let slots = vec![None; config.buffer_count];
        Self {
            config,
            bridge: VideoLayerBridge::new(display),
            slots,
            configured: false,
            format: 0,
            frame_aspect: 1.0,
            window: Rect::default(),
            dest_rect: Rect::default(),
            last_rendered: None,
            color_state: None,
        }
    }

    /// Build a renderer if the video plane can scan out `buffer` directly
    pub fn create(buffer: &VideoBuffer, display: D, config: RendererConfig) -> Option<Self> {
        let descriptor = buffer.as_prime()?.descriptor()?;
        let format = scanout_format(descriptor);
        let modifier = descriptor.primary_modifier()?;

        if !display.has_video_plane() {
            debug!("No video plane available for direct scanout");
            return None;
        }
        if !display.supports_format_and_modifier(format, modifier) {
            debug!(
                "Video plane cannot scan out format 0x{:08x} modifier 0x{:016x}",
                format, modifier
            );
            return None;
        }

        Some(Self::new(display, config))
    }

    pub fn bridge(&self) -> &VideoLayerBridge<D> {
        &self.bridge
    }

    pub fn configure(&mut self, picture: &VideoPicture, fps: f32, orientation: u32) -> bool {
        if picture.width == 0 || picture.height == 0 {
            error!("Refusing to configure for {}x{} frames", picture.width, picture.height);
            self.configured = false;
            return false;
        }
        if Orientation::from_degrees(orientation) != Orientation::Deg0 {
            warn!("Video plane cannot rotate, ignoring {} degrees", orientation);
        }

        self.format = picture.buffer.format();
        let (dw, dh) = if picture.display_width > 0 && picture.display_height > 0 {
            (picture.display_width, picture.display_height)
        } else {
            (picture.width, picture.height)
        };
        self.frame_aspect = dw as f32 / dh as f32;

        self.flush(false);
        self.manage_render_area();

        info!(
            "Configured scanout for {}x{} format=0x{:08x} @ {:.3} fps",
            picture.width, picture.height, self.format, fps
        );
        self.configured = true;
        true
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn add_frame(&mut self, index: usize, picture: &VideoPicture) {
        let Some(slot) = self.slots.get_mut(index) else {
            error!("add_frame on slot {} of {}", index, self.slots.len());
            return;
        };
        if slot.is_some() {
            error!("Unreleased video buffer in slot {}, releasing it", index);
        }
        *slot = Some(picture.clone());
        // a new picture in the slot has not been shown yet
        if self.last_rendered == Some(index) {
            self.last_rendered = None;
        }
    }

    pub fn release_buffer(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
        if self.last_rendered == Some(index) {
            self.last_rendered = None;
        }
    }

    /// `keep == false` drops every queued frame and turns the plane off
    pub fn flush(&mut self, keep: bool) -> bool {
        if !keep {
            self.slots.iter_mut().for_each(|slot| *slot = None);
            self.last_rendered = None;
            self.color_state = None;
            self.bridge.disable();
        }
        keep
    }

    /// The frame on screen must not be recycled
    pub fn needs_buffer(&self, index: usize) -> bool {
        self.last_rendered == Some(index)
    }

    pub fn render_info(&self) -> RenderInfo {
        RenderInfo {
            max_buffer_size: self.slots.len(),
        }
    }

    pub fn config_changed(&self, picture: &VideoPicture) -> bool {
        picture.buffer.format() != self.format
    }

    pub fn supports_feature(&self, feature: RenderFeature) -> bool {
        matches!(
            feature,
            RenderFeature::Stretch
                | RenderFeature::Zoom
                | RenderFeature::VerticalShift
                | RenderFeature::PixelRatio
        )
    }

    pub fn supports_scaling_method(&self, method: ScalingMethod) -> bool {
        method == ScalingMethod::Linear
    }

    pub fn dest_rect(&self) -> Rect {
        self.dest_rect
    }

    pub fn update(&mut self, window: Rect) {
        if !self.configured {
            return;
        }
        self.window = window;
        self.manage_render_area();
    }

    fn manage_render_area(&mut self) {
        self.dest_rect = fit_dest_rect(
            &self.window,
            self.frame_aspect,
            Orientation::Deg0,
            &self.config.view,
        );
    }

    /// Put slot `index` on the video plane.
    ///
    /// `clear` and `alpha` are accepted for interface parity; the plane is
    /// composited by the display controller.
    pub fn render_update(&mut self, window: Rect, index: usize, clear: bool, flags: u32, alpha: u8) {
        if !self.configured {
            return;
        }

        trace!("render_update slot={} clear={} flags=0x{:x} alpha={}", index, clear, flags, alpha);

        if window != self.window {
            self.window = window;
            self.manage_render_area();
        }

        if self.last_rendered == Some(index) {
            self.bridge.update_plane();
            return;
        }

        let Some(picture) = self.slots.get(index).and_then(Option::as_ref) else {
            return;
        };
        let Some(buffer) = picture.buffer.as_prime() else {
            return;
        };
        if !buffer.is_valid() {
            warn!("Slot {} holds an invalid buffer", index);
            return;
        }

        let state = PlaneColorState::from_picture(picture);
        if self.color_state != Some(state) {
            debug!("Plane color state changed: {:?}", state);
            self.bridge.configure(picture);
            self.color_state = Some(state);
        }

        match self.bridge.set_plane(buffer, &self.dest_rect) {
            Ok(()) => self.last_rendered = Some(index),
            Err(e) => warn!("Failed to put slot {} on the video plane: {}", index, e),
        }
    }
}

impl<D: AtomicDisplay> Drop for ScanoutRenderer<D> {
    fn drop(&mut self) {
        self.flush(false);
    }
}
