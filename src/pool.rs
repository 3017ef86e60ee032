//! Fixed-size ring of buffer slots between the decoder and the GPU
//!
//! Each slot holds at most one strong reference to a decoded frame, the
//! textures imported from it and the fence guarding GPU reads. Frames enter
//! through [`BufferPool::submit`] and leave through [`BufferPool::release`]
//! or [`BufferPool::flush`]; nothing else drops a buffer reference.
//!
//! # Threading
//!
//! The pool has no internal locking. All mutation (`submit`, `release`,
//! `flush`, `configure`) must come from the single thread that owns the GPU
//! context. The decoder may run elsewhere but must only recycle a slot once
//! [`BufferPool::can_reuse`] reports it.

use crate::buffer::{PrimeBuffer, VideoPicture};
use crate::color::{infer_colorspace, SourceColor};
use crate::geometry::Orientation;
use crate::gpu::{CompletionFence, GpuBackend, PlaneTextures};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

/// One pool entry
pub struct BufferSlot<F, T> {
    pub(crate) buffer: Option<Arc<dyn PrimeBuffer>>,
    pub(crate) textures: Option<T>,
    pub(crate) fence: Option<F>,
    pub(crate) source: SourceColor,
}

impl<F, T> Default for BufferSlot<F, T> {
    fn default() -> Self {
        Self {
            buffer: None,
            textures: None,
            fence: None,
            source: SourceColor::default(),
        }
    }
}

impl<F: CompletionFence, T: PlaneTextures> BufferSlot<F, T> {
    pub fn buffer(&self) -> Option<&Arc<dyn PrimeBuffer>> {
        self.buffer.as_ref()
    }

    pub fn source(&self) -> &SourceColor {
        &self.source
    }

    pub fn is_occupied(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.textures.as_ref().is_some_and(|t| t.is_mapped())
    }

    /// Fence first, then textures, then the buffer reference
    fn release(&mut self) {
        if let Some(fence) = self.fence.as_mut() {
            fence.destroy();
        }
        if let Some(textures) = self.textures.as_mut() {
            textures.unmap();
        }
        self.buffer = None;
    }
}

/// Ring buffer pool for the composited path
pub struct BufferPool<G: GpuBackend> {
    slots: Vec<BufferSlot<G::Fence, G::Textures>>,
    format: u32,
    width: u32,
    height: u32,
    orientation: Orientation,
    configured: bool,
}

impl<G: GpuBackend> BufferPool<G> {
    /// Create `count` empty slots
    pub fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, BufferSlot::default);
        Self {
            slots,
            format: 0,
            width: 0,
            height: 0,
            orientation: Orientation::Deg0,
            configured: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Prepare the pool for a new stream.
    ///
    /// All slots are released; fences and texture importers are created for
    /// slots that do not have them yet.
    pub fn configure(
        &mut self,
        gpu: &G,
        format: u32,
        width: u32,
        height: u32,
        orientation: Orientation,
    ) -> bool {
        if width == 0 || height == 0 {
            error!("Refusing to configure pool for {}x{} frames", width, height);
            self.configured = false;
            return false;
        }

        self.format = format;
        self.width = width;
        self.height = height;
        self.orientation = orientation;

        self.flush(false);

        for slot in &mut self.slots {
            if slot.fence.is_none() {
                slot.textures = Some(gpu.create_textures());
                slot.fence = Some(gpu.create_fence());
            }
        }

        info!(
            "Configured {} slots for {}x{} format=0x{:08x} {:?}",
            self.slots.len(),
            width,
            height,
            format,
            orientation
        );
        self.configured = true;
        true
    }

    /// Place a decoded frame in a slot.
    ///
    /// A slot still holding a frame is a decoder protocol violation: the old
    /// frame is logged and force-released before the new one is accepted.
    pub fn submit(&mut self, index: usize, picture: &VideoPicture) -> Result<()> {
        let buffer = picture.buffer.as_prime().cloned().ok_or_else(|| {
            Error::InvalidBuffer(format!("{:?} is not a DRM PRIME buffer", picture.buffer))
        })?;

        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::SlotOutOfRange(index))?;

        if slot.buffer.is_some() {
            error!("Unreleased video buffer in slot {}, releasing it", index);
            slot.release();
        }

        slot.buffer = Some(buffer);
        slot.source = SourceColor {
            primaries: picture.color_primaries,
            colorspace: infer_colorspace(picture.color_space, picture.width, picture.height),
            bits: picture.color_bits,
            full_range: picture.is_full_range(),
        };

        debug!("Slot {} <- {}x{} {:?}", index, picture.width, picture.height, slot.source);
        Ok(())
    }

    /// Whether the GPU is done sampling the slot
    pub fn can_reuse(&self, index: usize) -> bool {
        match self.slots.get(index) {
            Some(slot) => slot.fence.as_ref().map_or(true, |f| f.is_signaled()),
            None => {
                error!("can_reuse on slot {} of {}", index, self.slots.len());
                false
            }
        }
    }

    /// Destroy the fence, unmap textures and drop the frame of one slot
    pub fn release(&mut self, index: usize) {
        match self.slots.get_mut(index) {
            Some(slot) => slot.release(),
            None => error!("release on slot {} of {}", index, self.slots.len()),
        }
    }

    /// `keep == false` releases every slot; `keep == true` preserves them.
    ///
    /// Returns `keep`. Never waits on pending fences.
    pub fn flush(&mut self, keep: bool) -> bool {
        if !keep {
            for slot in &mut self.slots {
                slot.release();
            }
        }
        keep
    }

    pub fn slot(&self, index: usize) -> Option<&BufferSlot<G::Fence, G::Textures>> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(
        &mut self,
        index: usize,
    ) -> Option<&mut BufferSlot<G::Fence, G::Textures>> {
        self.slots.get_mut(index)
    }
}

impl<G: GpuBackend> Drop for BufferPool<G> {
    fn drop(&mut self) {
        debug!("Releasing buffer pool");
        self.flush(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorPrimaries, ColorRange, ColorSpace};
    use crate::testing::{nv12_buffer, picture, MockGpu};

    fn configured_pool(gpu: &MockGpu) -> BufferPool<MockGpu> {
        let mut pool = BufferPool::new(4);
        assert!(pool.configure(gpu, 0x3231564e, 1920, 1080, Orientation::Deg0));
        pool
    }

    #[test]
    fn test_configure_creates_resources() {
        let gpu = MockGpu::default();
        let pool = configured_pool(&gpu);
        assert_eq!(gpu.fences_created(), 4);
        assert!(pool.is_configured());
        assert!((0..4).all(|i| pool.can_reuse(i)));
    }

    #[test]
    fn test_configure_rejects_empty_frames() {
        let gpu = MockGpu::default();
        let mut pool = BufferPool::<MockGpu>::new(2);
        assert!(!pool.configure(&gpu, 0, 0, 1080, Orientation::Deg0));
        assert!(!pool.is_configured());
    }

    #[test]
    fn test_reconfigure_keeps_fences() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        pool.configure(&gpu, 0x3231564e, 1280, 720, Orientation::Deg90);
        assert_eq!(gpu.fences_created(), 4);
        assert_eq!(pool.dimensions(), (1280, 720));
    }

    #[test]
    fn test_submit_acquires_reference() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(1920, 1080);
        pool.submit(0, &picture(&buffer, 1920, 1080)).unwrap();
        assert_eq!(Arc::strong_count(&buffer), 2);
        assert!(pool.slot(0).unwrap().is_occupied());
    }

    #[test]
    fn test_repeated_submit_never_leaks() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let mut previous = Vec::new();
        for _ in 0..5 {
            let buffer = nv12_buffer(1920, 1080);
            pool.submit(1, &picture(&buffer, 1920, 1080)).unwrap();
            // leave the fence unsignaled to model an in-flight slot
            pool.slot_mut(1).unwrap().fence.as_mut().unwrap().create();
            previous.push(buffer);
        }
        let (last, older) = previous.split_last().unwrap();
        assert_eq!(Arc::strong_count(last), 2);
        assert!(older.iter().all(|b| Arc::strong_count(b) == 1));
    }

    #[test]
    fn test_forced_release_destroys_fence() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let first = nv12_buffer(1920, 1080);
        pool.submit(2, &picture(&first, 1920, 1080)).unwrap();
        pool.slot_mut(2).unwrap().fence.as_mut().unwrap().create();
        assert!(!pool.can_reuse(2));

        let second = nv12_buffer(1920, 1080);
        pool.submit(2, &picture(&second, 1920, 1080)).unwrap();
        assert!(pool.can_reuse(2));
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_submit_rejects_foreign_buffer() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let mut pic = picture(&nv12_buffer(64, 64), 64, 64);
        pic.buffer = crate::buffer::VideoBuffer::Other { format: 0 };
        assert!(matches!(pool.submit(0, &pic), Err(Error::InvalidBuffer(_))));
        assert!(!pool.slot(0).unwrap().is_occupied());
    }

    #[test]
    fn test_submit_out_of_range() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(64, 64);
        assert!(matches!(
            pool.submit(9, &picture(&buffer, 64, 64)),
            Err(Error::SlotOutOfRange(9))
        ));
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_can_reuse_follows_fence() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(1920, 1080);
        pool.submit(0, &picture(&buffer, 1920, 1080)).unwrap();
        pool.slot_mut(0).unwrap().fence.as_mut().unwrap().create();
        assert!(!pool.can_reuse(0));
        gpu.signal_all();
        assert!(pool.can_reuse(0));
    }

    #[test]
    fn test_source_color_inference() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let cases = [
            (1920, 1080, ColorSpace::Bt709),
            (720, 480, ColorSpace::Bt470Bg),
            (1025, 500, ColorSpace::Bt709),
            (800, 600, ColorSpace::Bt709),
        ];
        for (width, height, expected) in cases {
            let buffer = nv12_buffer(width, height);
            pool.submit(0, &picture(&buffer, width, height)).unwrap();
            assert_eq!(pool.slot(0).unwrap().source().colorspace, expected);
        }
    }

    #[test]
    fn test_source_color_fields() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(3840, 2160);
        let mut pic = picture(&buffer, 3840, 2160);
        pic.color_primaries = ColorPrimaries::Bt2020;
        pic.color_space = ColorSpace::Bt2020Ncl;
        pic.color_range = ColorRange::Full;
        pic.color_bits = 10;
        pool.submit(3, &pic).unwrap();
        let source = pool.slot(3).unwrap().source();
        assert_eq!(source.primaries, ColorPrimaries::Bt2020);
        assert_eq!(source.colorspace, ColorSpace::Bt2020Ncl);
        assert!(source.full_range);
        assert_eq!(source.bits, 10);
    }

    #[test]
    fn test_flush() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(1920, 1080);
        pool.submit(0, &picture(&buffer, 1920, 1080)).unwrap();
        pool.submit(1, &picture(&buffer, 1920, 1080)).unwrap();

        assert!(pool.flush(true));
        assert_eq!(Arc::strong_count(&buffer), 3);

        assert!(!pool.flush(false));
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_flush_with_pending_fence() {
        let gpu = MockGpu::default();
        let mut pool = configured_pool(&gpu);
        let buffer = nv12_buffer(1920, 1080);
        pool.submit(0, &picture(&buffer, 1920, 1080)).unwrap();
        pool.slot_mut(0).unwrap().fence.as_mut().unwrap().create();
        pool.flush(false);
        assert!(pool.can_reuse(0));
        assert_eq!(Arc::strong_count(&buffer), 1);
    }

    #[test]
    fn test_drop_releases() {
        let gpu = MockGpu::default();
        let buffer = nv12_buffer(1920, 1080);
        {
            let mut pool = configured_pool(&gpu);
            pool.submit(0, &picture(&buffer, 1920, 1080)).unwrap();
        }
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
