//! Decoded frame buffers handed over by the hardware decoder
//!
//! A DRM PRIME frame is described the same way libavutil's
//! `AVDRMFrameDescriptor` does: a list of DMA-buf objects and a list of
//! layers whose planes point into those objects.

use crate::color::{ColorPrimaries, ColorRange, ColorSpace, TransferCharacteristic};
use crate::{Error, Result};
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Maximum number of objects, layers or planes in a descriptor
pub const MAX_PLANES: usize = 4;

/// One DMA-buf object backing one or more planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmObject {
    pub fd: RawFd,
    pub size: usize,
    pub format_modifier: u64,
}

/// A plane inside a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmPlane {
    pub object_index: usize,
    pub offset: u32,
    pub pitch: u32,
}

/// A layer: one DRM fourcc format made of one or more planes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmLayer {
    pub format: u32,
    pub planes: Vec<DrmPlane>,
}

/// Memory layout of a decoded frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub objects: Vec<DrmObject>,
    pub layers: Vec<DrmLayer>,
}

impl FrameDescriptor {
    /// Check the descriptor is internally consistent before touching the kernel
    pub fn validate(&self) -> Result<()> {
        if self.objects.is_empty() || self.objects.len() > MAX_PLANES {
            return Err(Error::InvalidBuffer(format!(
                "{} objects in descriptor",
                self.objects.len()
            )));
        }
        if self.layers.is_empty() || self.layers.len() > MAX_PLANES {
            return Err(Error::InvalidBuffer(format!(
                "{} layers in descriptor",
                self.layers.len()
            )));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.planes.is_empty() || layer.planes.len() > MAX_PLANES {
                return Err(Error::InvalidBuffer(format!(
                    "layer {} has {} planes",
                    index,
                    layer.planes.len()
                )));
            }
            if let Some(plane) = layer.planes.iter().find(|p| p.object_index >= self.objects.len()) {
                return Err(Error::InvalidBuffer(format!(
                    "layer {} references object {}",
                    index, plane.object_index
                )));
            }
        }
        Ok(())
    }

    /// Fourcc of the first layer
    pub fn primary_format(&self) -> Option<u32> {
        self.layers.first().map(|l| l.format)
    }

    /// Modifier of the first object
    pub fn primary_modifier(&self) -> Option<u64> {
        self.objects.first().map(|o| o.format_modifier)
    }
}

/// A reference-counted hardware frame.
///
/// Holding an `Arc<dyn PrimeBuffer>` keeps the decoder from recycling the
/// underlying surface; dropping the last clone returns it.
pub trait PrimeBuffer: Send + Sync {
    /// Memory layout, or `None` when the decoder can no longer export it
    fn descriptor(&self) -> Option<&FrameDescriptor>;

    /// Whether the frame still refers to live decoder memory
    fn is_valid(&self) -> bool {
        self.descriptor().is_some()
    }

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Pixel format tag, compared across frames to detect reconfiguration
    fn format(&self) -> u32;
}

/// Buffer produced by a decoder backend.
///
/// The backend kind is inspected once, when a renderer is created or a frame
/// is queued, never per draw.
#[derive(Clone)]
pub enum VideoBuffer {
    DrmPrime(Arc<dyn PrimeBuffer>),
    /// Frames from a backend neither output path can consume
    Other { format: u32 },
}

impl VideoBuffer {
    pub fn as_prime(&self) -> Option<&Arc<dyn PrimeBuffer>> {
        match self {
            VideoBuffer::DrmPrime(buffer) => Some(buffer),
            VideoBuffer::Other { .. } => None,
        }
    }

    pub fn format(&self) -> u32 {
        match self {
            VideoBuffer::DrmPrime(buffer) => buffer.format(),
            VideoBuffer::Other { format } => *format,
        }
    }
}

impl fmt::Debug for VideoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoBuffer::DrmPrime(buffer) => f
                .debug_struct("DrmPrime")
                .field("width", &buffer.width())
                .field("height", &buffer.height())
                .field("format", &format_args!("0x{:08x}", buffer.format()))
                .finish(),
            VideoBuffer::Other { format } => f
                .debug_struct("Other")
                .field("format", &format_args!("0x{:08x}", format))
                .finish(),
        }
    }
}

/// SMPTE ST 2086 mastering display color volume.
///
/// Chromaticities are CIE 1931 xy, luminance in cd/m².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MasteringDisplay {
    /// Red, green, blue as `[x, y]`
    pub display_primaries: [[f64; 2]; 3],
    pub white_point: [f64; 2],
    pub min_luminance: f64,
    pub max_luminance: f64,
    pub has_primaries: bool,
    pub has_luminance: bool,
}

/// CTA-861.3 content light level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLight {
    pub max_cll: u16,
    pub max_fall: u16,
}

/// Per-frame metadata delivered with each decoded buffer
#[derive(Debug, Clone)]
pub struct VideoPicture {
    pub buffer: VideoBuffer,
    pub width: u32,
    pub height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub color_primaries: ColorPrimaries,
    pub color_space: ColorSpace,
    pub color_transfer: TransferCharacteristic,
    pub color_range: ColorRange,
    pub color_bits: u8,
    pub chroma_position: u32,
    pub stereo_mode: String,
    pub mastering_display: Option<MasteringDisplay>,
    pub content_light: Option<ContentLight>,
}

impl VideoPicture {
    /// Picture with SDR defaults for the given buffer
    pub fn new(buffer: VideoBuffer, width: u32, height: u32) -> Self {
        Self {
            buffer,
            width,
            height,
            display_width: width,
            display_height: height,
            color_primaries: ColorPrimaries::Unspecified,
            color_space: ColorSpace::Unspecified,
            color_transfer: TransferCharacteristic::Unspecified,
            color_range: ColorRange::Unspecified,
            color_bits: 8,
            chroma_position: 0,
            stereo_mode: String::new(),
            mastering_display: None,
            content_light: None,
        }
    }

    pub fn is_full_range(&self) -> bool {
        self.color_range == ColorRange::Full
    }
}
