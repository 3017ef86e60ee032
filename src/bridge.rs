//! Display-plane bridge for direct scanout
//!
//! Puts DRM PRIME frames on the hardware video plane by importing them as
//! KMS framebuffers and staging plane and connector properties into the
//! windowing layer's atomic request.
//!
//! # Buffer lifetime
//!
//! The bridge holds the frame on screen (`current`) and the one it replaced
//! (`previous`). The previous frame is only released when the next frame is
//! acquired, since the hardware may still scan it out until the pending
//! commit takes effect. This assumes a pipeline depth of one frame.
//!
//! # Threading
//!
//! Like the pool, the bridge must only be driven from the thread that owns
//! the atomic request.

use crate::buffer::{FrameDescriptor, PrimeBuffer, VideoPicture, MAX_PLANES};
use crate::display::{AtomicDisplay, KmsObject};
use crate::drm_device::{FramebufferLayout, KmsDevice};
use crate::edid::SinkCapabilities;
use crate::geometry::Rect;
use crate::hdr::{HdrBlob, PlaneColorState};
use crate::{Error, Result};
use drm::control::FbCmd2Flags;
use drm_fourcc::{DrmFourcc, DrmModifier};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Canonical framebuffer fourcc for a decoder's per-plane layer formats
pub fn scanout_format(descriptor: &FrameDescriptor) -> u32 {
    let r8 = DrmFourcc::R8 as u32;
    let r16 = DrmFourcc::R16 as u32;
    let gr88 = DrmFourcc::Gr88 as u32;
    let gr1616 = DrmFourcc::Gr1616 as u32;

    let formats: Vec<u32> = descriptor.layers.iter().map(|l| l.format).collect();
    match formats.as_slice() {
        [y, uv] if *y == r8 && *uv == gr88 => DrmFourcc::Nv12 as u32,
        [y, uv] if *y == r16 && *uv == gr1616 => DrmFourcc::P010 as u32,
        [y, u, v] if *y == r8 && *u == r8 && *v == r8 => DrmFourcc::Yuv420 as u32,
        [first, ..] => *first,
        [] => 0,
    }
}

/// Compose the `ADDFB2` layout for a frame whose objects were imported as
/// `handles` (indexed like the descriptor's objects)
pub fn framebuffer_layout(
    descriptor: &FrameDescriptor,
    handles: &[u32; MAX_PLANES],
    width: u32,
    height: u32,
) -> FramebufferLayout {
    let mut layout = FramebufferLayout {
        width,
        height,
        format: scanout_format(descriptor),
        ..Default::default()
    };

    let split_layers = descriptor.layers.len() > 1;
    for (layer_index, layer) in descriptor.layers.iter().enumerate() {
        for (plane_index, plane) in layer.planes.iter().enumerate() {
            // one plane per layer: the layer is the plane
            let index = if split_layers && layer.planes.len() == 1 {
                layer_index
            } else {
                plane_index
            };
            if index >= MAX_PLANES {
                continue;
            }
            let Some(object) = descriptor.objects.get(plane.object_index) else {
                continue;
            };
            layout.handles[index] = handles[plane.object_index];
            layout.pitches[index] = plane.pitch;
            layout.offsets[index] = plane.offset;
            layout.modifiers[index] = object.format_modifier;
        }
    }

    let modifier = layout.modifiers[0];
    if modifier != 0 && modifier != u64::from(DrmModifier::Invalid) {
        layout.flags = FbCmd2Flags::MODIFIERS.bits();
    }
    layout
}

/// A frame imported into KMS
struct MappedFrame {
    buffer: Arc<dyn PrimeBuffer>,
    fb_id: u32,
    handles: [u32; MAX_PLANES],
}

impl MappedFrame {
    fn holds(&self, buffer: &Arc<dyn PrimeBuffer>) -> bool {
        Arc::as_ptr(&self.buffer) as *const () == Arc::as_ptr(buffer) as *const ()
    }
}

fn close_handles<K: KmsDevice>(device: &K, handles: &[u32]) {
    for &handle in handles.iter().filter(|&&h| h != 0) {
        if let Err(e) = device.close_handle(handle) {
            warn!("Failed to close GEM handle {}: {}", handle, e);
        }
    }
}

pub struct VideoLayerBridge<D: AtomicDisplay> {
    display: D,
    current: Option<MappedFrame>,
    previous: Option<MappedFrame>,
    hdr_blob: HdrBlob,
}

impl<D: AtomicDisplay> VideoLayerBridge<D> {
    pub fn new(display: D) -> Self {
        Self {
            display,
            current: None,
            previous: None,
            hdr_blob: HdrBlob::Absent,
        }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn hdr_blob(&self) -> HdrBlob {
        self.hdr_blob
    }

    /// Framebuffer id of the frame on screen
    pub fn current_fb(&self) -> Option<u32> {
        self.current.as_ref().map(|f| f.fb_id)
    }

    /// Number of frames the bridge keeps alive
    pub fn held_buffers(&self) -> usize {
        self.current.iter().chain(self.previous.iter()).count()
    }

    pub fn is_mapped(&self, buffer: &Arc<dyn PrimeBuffer>) -> bool {
        self.current
            .iter()
            .chain(self.previous.iter())
            .any(|f| f.holds(buffer))
    }

    /// Import `buffer` as a framebuffer and make it the current frame.
    ///
    /// Does nothing for a buffer that is already mapped. On failure every
    /// handle imported so far is closed and the bridge is unchanged.
    pub fn map(&mut self, buffer: &Arc<dyn PrimeBuffer>) -> Result<()> {
        if self.is_mapped(buffer) {
            return Ok(());
        }

        let descriptor = buffer.descriptor().ok_or(Error::NoDescriptor)?;
        descriptor.validate()?;

        let device = self.display.device();
        let mut handles = [0u32; MAX_PLANES];
        for (index, object) in descriptor.objects.iter().enumerate() {
            match device.prime_fd_to_handle(object.fd) {
                Ok(handle) => handles[index] = handle,
                Err(e) => {
                    error!("Failed to import prime fd {}: {}", object.fd, e);
                    close_handles(device, &handles);
                    return Err(e);
                }
            }
        }

        let layout = framebuffer_layout(descriptor, &handles, buffer.width(), buffer.height());
        let fb_id = match device.add_fb(&layout) {
            Ok(fb_id) => fb_id,
            Err(e) => {
                error!(
                    "Failed to add {}x{} framebuffer format=0x{:08x}: {}",
                    layout.width, layout.height, layout.format, e
                );
                close_handles(device, &handles);
                return Err(e);
            }
        };

        debug!(
            "Mapped {}x{} format=0x{:08x} modifier=0x{:016x} as fb {}",
            layout.width, layout.height, layout.format, layout.modifiers[0], fb_id
        );

        self.acquire(MappedFrame {
            buffer: Arc::clone(buffer),
            fb_id,
            handles,
        });
        Ok(())
    }

    /// Drop the framebuffer, handles and reference of a mapped buffer
    pub fn unmap(&mut self, buffer: &Arc<dyn PrimeBuffer>) {
        if self.current.as_ref().is_some_and(|f| f.holds(buffer)) {
            let frame = self.current.take();
            self.release(frame);
        } else if self.previous.as_ref().is_some_and(|f| f.holds(buffer)) {
            let frame = self.previous.take();
            self.release(frame);
        }
    }

    fn acquire(&mut self, frame: MappedFrame) {
        let superseded = self.previous.take();
        self.release(superseded);
        self.previous = self.current.replace(frame);
    }

    fn release(&self, frame: Option<MappedFrame>) {
        let Some(frame) = frame else {
            return;
        };
        let device = self.display.device();
        if let Err(e) = device.remove_fb(frame.fb_id) {
            warn!("Failed to remove fb {}: {}", frame.fb_id, e);
        }
        close_handles(device, &frame.handles);
    }

    /// Stage color encoding, range, colorimetry and HDR metadata for the
    /// stream `picture` belongs to
    pub fn configure(&mut self, picture: &VideoPicture) {
        let state = PlaneColorState::from_picture(picture);

        let plane = if self.display.has_video_plane() {
            KmsObject::VideoPlane
        } else {
            KmsObject::GuiPlane
        };

        if let Some(value) = self
            .display
            .property_enum_value(plane, "COLOR_ENCODING", state.encoding)
        {
            self.display.add_property(plane, "COLOR_ENCODING", value);
        }
        if let Some(value) = self.display.property_enum_value(plane, "COLOR_RANGE", state.range) {
            self.display.add_property(plane, "COLOR_RANGE", value);
        }

        let sink = self
            .display
            .edid()
            .map(|raw| SinkCapabilities::parse(&raw))
            .unwrap_or_default();

        if let Some(value) =
            self.display
                .property_enum_value(KmsObject::Connector, "Colorspace", state.colorimetry)
        {
            if sink.supports_colorimetry(state.colorimetry) {
                debug!("Setting connector colorspace to {}", state.colorimetry);
                self.display.add_property(KmsObject::Connector, "Colorspace", value);
            } else {
                warn!("Sink does not support colorimetry {}", state.colorimetry);
            }
        }

        if self
            .display
            .supports_property(KmsObject::Connector, "HDR_OUTPUT_METADATA")
        {
            if sink.supports_eotf(state.eotf) {
                match self.hdr_blob.replace(self.display.device(), &state.metadata) {
                    Ok(blob_id) => {
                        debug!("HDR metadata blob {} eotf={}", blob_id, state.eotf);
                        self.display.add_property(
                            KmsObject::Connector,
                            "HDR_OUTPUT_METADATA",
                            blob_id as u64,
                        );
                    }
                    Err(e) => error!("Failed to create HDR metadata blob: {}", e),
                }
            } else {
                warn!("Sink does not support EOTF {}", state.eotf);
            }
        }

        self.display.set_active(true);
    }

    /// Map `buffer` and place it at `dest` on the video plane.
    ///
    /// If mapping fails the plane is left as it was.
    pub fn set_plane(&mut self, buffer: &Arc<dyn PrimeBuffer>, dest: &Rect) -> Result<()> {
        self.map(buffer)?;

        let Some(fb_id) = self
            .current
            .iter()
            .chain(self.previous.iter())
            .find(|f| f.holds(buffer))
            .map(|f| f.fb_id)
        else {
            return Err(Error::InvalidBuffer("mapped buffer not held".into()));
        };

        let crtc_id = self.display.crtc_id();
        let plane = KmsObject::VideoPlane;
        let props: [(&str, u64); 10] = [
            ("FB_ID", fb_id as u64),
            ("CRTC_ID", crtc_id as u64),
            ("SRC_X", 0),
            ("SRC_Y", 0),
            ("SRC_W", (buffer.width() as u64) << 16),
            ("SRC_H", (buffer.height() as u64) << 16),
            ("CRTC_X", (dest.x1 as i32 & !1) as i64 as u64),
            ("CRTC_Y", (dest.y1 as i32 & !1) as i64 as u64),
            ("CRTC_W", ((dest.width() as u32).saturating_add(1) & !1) as u64),
            ("CRTC_H", ((dest.height() as u32).saturating_add(1) & !1) as u64),
        ];
        for (name, value) in props {
            self.display.add_property(plane, name, value);
        }
        Ok(())
    }

    /// Re-stage the current frame without recomputing metadata
    pub fn update_plane(&mut self) {
        let Some(fb_id) = self.current_fb() else {
            return;
        };

        let superseded = self.previous.take();
        self.release(superseded);

        let crtc_id = self.display.crtc_id();
        self.display.add_property(KmsObject::VideoPlane, "FB_ID", fb_id as u64);
        self.display.add_property(KmsObject::VideoPlane, "CRTC_ID", crtc_id as u64);
    }

    /// Turn the video plane off and reset connector color state
    pub fn disable(&mut self) {
        if self.display.has_video_plane() {
            self.display.add_property(KmsObject::VideoPlane, "FB_ID", 0);
            self.display.add_property(KmsObject::VideoPlane, "CRTC_ID", 0);
        }

        if let Some(value) =
            self.display
                .property_enum_value(KmsObject::Connector, "Colorspace", "Default")
        {
            debug!("Setting connector colorspace to Default");
            self.display.add_property(KmsObject::Connector, "Colorspace", value);
        }

        if self
            .display
            .supports_property(KmsObject::Connector, "HDR_OUTPUT_METADATA")
        {
            self.display
                .add_property(KmsObject::Connector, "HDR_OUTPUT_METADATA", 0);
            self.display.set_active(true);
        }

        self.hdr_blob.destroy(self.display.device());
    }
}

impl<D: AtomicDisplay> Drop for VideoLayerBridge<D> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        self.release(previous);
        let current = self.current.take();
        self.release(current);
    }
}
