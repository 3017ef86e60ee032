//! KMS device access for the scanout path
//!
//! [`KmsDevice`] is the narrow set of kernel calls the display-plane bridge
//! needs: importing DMA-bufs, registering framebuffers and managing property
//! blobs. [`DrmCard`] implements it on a `/dev/dri/card*` node through the
//! `drm` crate's control device.

use crate::hdr::HDR_OUTPUT_METADATA_SIZE;
use crate::{Error, Result};
use drm::buffer::{self, PlanarBuffer};
use drm::control::{framebuffer, property, Device as ControlDevice, FbCmd2Flags};
use drm_fourcc::{DrmFourcc, DrmModifier};
use std::fs::{File, OpenOptions};
use std::num::NonZeroU32;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use tracing::{debug, info};

/// Four-plane framebuffer description passed to `ADDFB2`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramebufferLayout {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    /// GEM handles, 0 for unused planes
    pub handles: [u32; 4],
    pub pitches: [u32; 4],
    pub offsets: [u32; 4],
    pub modifiers: [u64; 4],
    /// `FbCmd2Flags` bits
    pub flags: u32,
}

impl FramebufferLayout {
    pub fn has_modifiers(&self) -> bool {
        FbCmd2Flags::from_bits_truncate(self.flags).contains(FbCmd2Flags::MODIFIERS)
    }
}

/// Kernel calls used to put a DMA-buf on a display plane
pub trait KmsDevice {
    /// Import a DMA-buf, returning a GEM handle owned by the caller
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<u32>;

    fn close_handle(&self, handle: u32) -> Result<()>;

    /// Returns the framebuffer id
    fn add_fb(&self, layout: &FramebufferLayout) -> Result<u32>;

    fn remove_fb(&self, fb_id: u32) -> Result<()>;

    /// Upload a `struct hdr_output_metadata`, returning the blob id
    fn create_blob(&self, data: &[u8; HDR_OUTPUT_METADATA_SIZE]) -> Result<u32>;

    fn destroy_blob(&self, blob_id: u32) -> Result<()>;
}

/// [`FramebufferLayout`] with its fourcc resolved, as `drm` wants it
struct PlanarLayout<'a> {
    layout: &'a FramebufferLayout,
    format: DrmFourcc,
}

impl PlanarBuffer for PlanarLayout<'_> {
    fn size(&self) -> (u32, u32) {
        (self.layout.width, self.layout.height)
    }

    fn format(&self) -> DrmFourcc {
        self.format
    }

    fn modifier(&self) -> Option<DrmModifier> {
        self.layout
            .has_modifiers()
            .then(|| DrmModifier::from(self.layout.modifiers[0]))
    }

    fn pitches(&self) -> [u32; 4] {
        self.layout.pitches
    }

    fn handles(&self) -> [Option<buffer::Handle>; 4] {
        self.layout
            .handles
            .map(|handle| NonZeroU32::new(handle).map(buffer::Handle::from))
    }

    fn offsets(&self) -> [u32; 4] {
        self.layout.offsets
    }
}

/// An open DRM card node
pub struct DrmCard {
    file: File,
}

impl DrmCard {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)?;
        info!("Opened DRM device {:?}", path);
        Ok(Self { file })
    }
}

impl AsFd for DrmCard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for DrmCard {}
impl ControlDevice for DrmCard {}

fn kernel(op: &'static str) -> impl FnOnce(std::io::Error) -> Error {
    move |source| Error::Kernel { op, source }
}

fn invalid_handle(op: &'static str) -> Error {
    Error::Kernel {
        op,
        source: std::io::Error::from_raw_os_error(libc::EINVAL),
    }
}

impl KmsDevice for DrmCard {
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<u32> {
        // SAFETY: the caller's buffer keeps `fd` open for the duration of the call
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let handle = self
            .prime_fd_to_buffer(fd)
            .map_err(kernel("PRIME_FD_TO_HANDLE"))?;
        Ok(u32::from(handle))
    }

    fn close_handle(&self, handle: u32) -> Result<()> {
        let handle = NonZeroU32::new(handle).ok_or_else(|| invalid_handle("GEM_CLOSE"))?;
        self.close_buffer(buffer::Handle::from(handle))
            .map_err(kernel("GEM_CLOSE"))
    }

    fn add_fb(&self, layout: &FramebufferLayout) -> Result<u32> {
        let format = DrmFourcc::try_from(layout.format)
            .map_err(|_| Error::Unsupported(format!("fourcc 0x{:08x}", layout.format)))?;
        let planar = PlanarLayout { layout, format };
        let fb = self
            .add_planar_framebuffer(&planar, FbCmd2Flags::from_bits_truncate(layout.flags))
            .map_err(kernel("ADDFB2"))?;
        debug!("ADDFB2 {}x{} {:?} -> fb {:?}", layout.width, layout.height, format, fb);
        Ok(u32::from(fb))
    }

    fn remove_fb(&self, fb_id: u32) -> Result<()> {
        let fb = NonZeroU32::new(fb_id).ok_or_else(|| invalid_handle("RMFB"))?;
        self.destroy_framebuffer(framebuffer::Handle::from(fb))
            .map_err(kernel("RMFB"))
    }

    fn create_blob(&self, data: &[u8; HDR_OUTPUT_METADATA_SIZE]) -> Result<u32> {
        match self
            .create_property_blob(data)
            .map_err(kernel("CREATEPROPBLOB"))?
        {
            property::Value::Blob(id) => Ok(id as u32),
            other => Err(Error::Unsupported(format!("blob creation returned {:?}", other))),
        }
    }

    fn destroy_blob(&self, blob_id: u32) -> Result<()> {
        self.destroy_property_blob(blob_id as u64)
            .map_err(kernel("DESTROYPROPBLOB"))
    }
}
