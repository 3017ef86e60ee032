//! EGL/GLES implementation of the GPU capabilities
//!
//! DMA-buf layers are imported with `EGL_EXT_image_dma_buf_import` and bound
//! to `GL_TEXTURE_2D` through `GL_OES_EGL_image`. Fences are EGL 1.5 sync
//! objects polled without blocking.
//!
//! Everything here must stay on the thread whose EGL context was current when
//! [`EglBackend::from_current`] was called.

use crate::buffer::{FrameDescriptor, PrimeBuffer};
use crate::gpu::{CompletionFence, GpuBackend, PlaneTextures};
use crate::{Error, Result};
use drm_fourcc::{DrmFourcc, DrmModifier};
use glow::HasContext;
use khronos_egl as egl;
use std::os::raw::c_void;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

// EGL_EXT_image_dma_buf_import
const LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const LINUX_DRM_FOURCC_EXT: egl::Attrib = 0x3271;
const DMA_BUF_PLANE_FD_EXT: [egl::Attrib; 3] = [0x3272, 0x3275, 0x3278];
const DMA_BUF_PLANE_OFFSET_EXT: [egl::Attrib; 3] = [0x3273, 0x3276, 0x3279];
const DMA_BUF_PLANE_PITCH_EXT: [egl::Attrib; 3] = [0x3274, 0x3277, 0x327a];

// EGL_EXT_image_dma_buf_import_modifiers
const DMA_BUF_PLANE_MODIFIER_LO_EXT: [egl::Attrib; 3] = [0x3443, 0x3445, 0x3447];
const DMA_BUF_PLANE_MODIFIER_HI_EXT: [egl::Attrib; 3] = [0x3444, 0x3446, 0x3448];

const MAX_IMAGE_PLANES: usize = 3;

type ImageTargetTexture2dOes = unsafe extern "system" fn(target: u32, image: *const c_void);
type QueryDmaBufFormatsExt =
    unsafe extern "system" fn(*mut c_void, i32, *mut i32, *mut i32) -> u32;
type QueryDmaBufModifiersExt =
    unsafe extern "system" fn(*mut c_void, i32, i32, *mut u64, *mut u32, *mut i32) -> u32;

struct EglShared {
    egl: egl::DynamicInstance<egl::EGL1_5>,
    display: egl::Display,
    gl: glow::Context,
    image_target_texture: ImageTargetTexture2dOes,
    query_formats: Option<QueryDmaBufFormatsExt>,
    query_modifiers: Option<QueryDmaBufModifiersExt>,
    /// EGL_EXT_image_dma_buf_import_modifiers is present
    explicit_modifiers: bool,
}

impl EglShared {
    fn formats(&self) -> Option<Vec<i32>> {
        let query = self.query_formats?;
        let display = self.display.as_ptr();
        let mut count = 0;
        // SAFETY: count query with a null output array
        if unsafe { query(display, 0, std::ptr::null_mut(), &mut count) } == 0 {
            return None;
        }
        let mut formats = vec![0i32; count.max(0) as usize];
        if unsafe { query(display, count, formats.as_mut_ptr(), &mut count) } == 0 {
            return None;
        }
        formats.truncate(count.max(0) as usize);
        Some(formats)
    }

    fn modifiers(&self, format: u32) -> Option<Vec<u64>> {
        let query = self.query_modifiers?;
        let display = self.display.as_ptr();
        let mut count = 0;
        // SAFETY: count query with null output arrays
        if unsafe {
            query(
                display,
                format as i32,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut count,
            )
        } == 0
        {
            return None;
        }
        let mut modifiers = vec![0u64; count.max(0) as usize];
        if unsafe {
            query(
                display,
                format as i32,
                count,
                modifiers.as_mut_ptr(),
                std::ptr::null_mut(),
                &mut count,
            )
        } == 0
        {
            return None;
        }
        modifiers.truncate(count.max(0) as usize);
        Some(modifiers)
    }
}

/// GPU backend bound to the current EGL display and GLES context
#[derive(Clone)]
pub struct EglBackend {
    shared: Rc<EglShared>,
}

impl EglBackend {
    /// Attach to the EGL display and context current on this thread.
    ///
    /// # Safety
    ///
    /// A GLES 2+ context must be current and must outlive the backend and
    /// every fence and texture set it creates.
    pub unsafe fn from_current() -> Result<Self> {
        let egl = egl::DynamicInstance::<egl::EGL1_5>::load_required()
            .map_err(|e| Error::Egl(format!("failed to load EGL 1.5: {:?}", e)))?;

        let display = egl
            .get_current_display()
            .ok_or_else(|| Error::Egl("no current EGL display".into()))?;

        let extensions = egl
            .query_string(Some(display), egl::EXTENSIONS)
            .map_err(|e| Error::Egl(format!("eglQueryString failed: {:?}", e)))?
            .to_string_lossy()
            .into_owned();
        if !extensions.split(' ').any(|e| e == "EGL_EXT_image_dma_buf_import") {
            return Err(Error::Unsupported("EGL_EXT_image_dma_buf_import".into()));
        }

        let image_target_texture = egl
            .get_proc_address("glEGLImageTargetTexture2DOES")
            .map(|f| std::mem::transmute::<extern "system" fn(), ImageTargetTexture2dOes>(f))
            .ok_or_else(|| Error::Unsupported("glEGLImageTargetTexture2DOES".into()))?;

        let explicit_modifiers = extensions
            .split(' ')
            .any(|e| e == "EGL_EXT_image_dma_buf_import_modifiers");
        let (query_formats, query_modifiers) = if explicit_modifiers {
            (
                egl.get_proc_address("eglQueryDmaBufFormatsEXT")
                    .map(|f| std::mem::transmute::<extern "system" fn(), QueryDmaBufFormatsExt>(f)),
                egl.get_proc_address("eglQueryDmaBufModifiersEXT")
                    .map(|f| std::mem::transmute::<extern "system" fn(), QueryDmaBufModifiersExt>(f)),
            )
        } else {
            warn!("EGL_EXT_image_dma_buf_import_modifiers missing, only linear buffers importable");
            (None, None)
        };

        let gl = glow::Context::from_loader_function(|name| {
            egl.get_proc_address(name)
                .map_or(std::ptr::null(), |f| f as *const c_void)
        });

        info!("EGL DMA-buf import ready");

        Ok(Self {
            shared: Rc::new(EglShared {
                egl,
                display,
                gl,
                image_target_texture,
                query_formats,
                query_modifiers,
                explicit_modifiers,
            }),
        })
    }
}

impl GpuBackend for EglBackend {
    type Fence = EglFence;
    type Textures = EglPlaneTextures;

    fn create_fence(&self) -> EglFence {
        EglFence {
            shared: Rc::clone(&self.shared),
            sync: None,
        }
    }

    fn create_textures(&self) -> EglPlaneTextures {
        EglPlaneTextures {
            shared: Rc::clone(&self.shared),
            images: Vec::new(),
            textures: Vec::new(),
            bits: 8,
        }
    }

    fn supports_format_and_modifier(&self, format: u32, modifier: u64) -> bool {
        let plain = modifier == u64::from(DrmModifier::Invalid)
            || modifier == u64::from(DrmModifier::Linear);

        let Some(formats) = self.shared.formats() else {
            return plain;
        };
        if !formats.contains(&(format as i32)) {
            debug!("EGL cannot import format 0x{:08x}", format);
            return false;
        }
        if modifier == u64::from(DrmModifier::Invalid) {
            return true;
        }
        self.shared
            .modifiers(format)
            .is_some_and(|modifiers| modifiers.contains(&modifier))
    }
}

/// EGL 1.5 fence sync
pub struct EglFence {
    shared: Rc<EglShared>,
    sync: Option<egl::Sync>,
}

impl CompletionFence for EglFence {
    fn create(&mut self) {
        self.destroy();
        let shared = &self.shared;
        // SAFETY: the display is initialized and owned by `shared`; the attrib list is terminated
        let result = unsafe {
            shared
                .egl
                .create_sync(shared.display, egl::SYNC_FENCE as egl::Enum, &[egl::ATTRIB_NONE])
        };
        match result {
            Ok(sync) => self.sync = Some(sync),
            Err(e) => error!("eglCreateSync failed: {:?}", e),
        }
    }

    fn destroy(&mut self) {
        if let Some(sync) = self.sync.take() {
            // SAFETY: `sync` came from create_sync on this display and is destroyed once
            let result = unsafe { self.shared.egl.destroy_sync(self.shared.display, sync) };
            if let Err(e) = result {
                warn!("eglDestroySync failed: {:?}", e);
            }
        }
    }

    fn is_signaled(&self) -> bool {
        let Some(sync) = self.sync else {
            return true;
        };
        // SAFETY: `sync` is live until destroy() takes it out of `self.sync`
        let status = unsafe { self.shared.egl.client_wait_sync(self.shared.display, sync, 0, 0) };
        matches!(status, Ok(egl::CONDITION_SATISFIED))
    }
}

impl Drop for EglFence {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Width and height of layer `index`; chroma layers of multi-layer frames
/// are 4:2:0 subsampled
pub fn layer_size(descriptor: &FrameDescriptor, index: usize, width: u32, height: u32) -> (u32, u32) {
    if index > 0 && descriptor.layers.len() > 1 {
        (width.div_ceil(2), height.div_ceil(2))
    } else {
        (width, height)
    }
}

/// `eglCreateImage` attributes for one layer. Modifiers are only passed when
/// `explicit_modifiers` is set, otherwise the driver uses the implicit layout.
pub fn dmabuf_image_attribs(
    descriptor: &FrameDescriptor,
    index: usize,
    width: u32,
    height: u32,
    explicit_modifiers: bool,
) -> Result<Vec<egl::Attrib>> {
    let layer = descriptor
        .layers
        .get(index)
        .ok_or_else(|| Error::InvalidBuffer(format!("no layer {}", index)))?;
    if layer.planes.len() > MAX_IMAGE_PLANES {
        return Err(Error::Unsupported(format!(
            "{} planes in one layer",
            layer.planes.len()
        )));
    }

    let mut attribs = vec![
        egl::WIDTH as egl::Attrib,
        width as egl::Attrib,
        egl::HEIGHT as egl::Attrib,
        height as egl::Attrib,
        LINUX_DRM_FOURCC_EXT,
        layer.format as egl::Attrib,
    ];

    for (p, plane) in layer.planes.iter().enumerate() {
        let object = descriptor
            .objects
            .get(plane.object_index)
            .ok_or_else(|| Error::InvalidBuffer(format!("no object {}", plane.object_index)))?;

        attribs.extend_from_slice(&[
            DMA_BUF_PLANE_FD_EXT[p],
            object.fd as egl::Attrib,
            DMA_BUF_PLANE_OFFSET_EXT[p],
            plane.offset as egl::Attrib,
            DMA_BUF_PLANE_PITCH_EXT[p],
            plane.pitch as egl::Attrib,
        ]);

        if explicit_modifiers && object.format_modifier != u64::from(DrmModifier::Invalid) {
            attribs.extend_from_slice(&[
                DMA_BUF_PLANE_MODIFIER_LO_EXT[p],
                (object.format_modifier & 0xffff_ffff) as egl::Attrib,
                DMA_BUF_PLANE_MODIFIER_HI_EXT[p],
                (object.format_modifier >> 32) as egl::Attrib,
            ]);
        }
    }

    attribs.push(egl::ATTRIB_NONE);
    Ok(attribs)
}

/// One EGL image and one `GL_TEXTURE_2D` per layer
pub struct EglPlaneTextures {
    shared: Rc<EglShared>,
    images: Vec<egl::Image>,
    textures: Vec<glow::Texture>,
    bits: u8,
}

impl EglPlaneTextures {
    fn import_layer(&mut self, descriptor: &FrameDescriptor, index: usize, width: u32, height: u32) -> Result<()> {
        let (w, h) = layer_size(descriptor, index, width, height);
        let attribs =
            dmabuf_image_attribs(descriptor, index, w, h, self.shared.explicit_modifiers)?;
        let shared = Rc::clone(&self.shared);

        // SAFETY: EGL_LINUX_DMA_BUF_EXT takes no context and no client buffer
        let image = unsafe {
            shared.egl.create_image(
                shared.display,
                egl::Context::from_ptr(egl::NO_CONTEXT),
                LINUX_DMA_BUF_EXT,
                egl::ClientBuffer::from_ptr(std::ptr::null_mut()),
                &attribs,
            )
        }
        .map_err(|e| Error::Egl(format!("eglCreateImage for layer {} failed: {:?}", index, e)))?;
        self.images.push(image);

        let gl = &shared.gl;
        // SAFETY: the context is current on this thread
        unsafe {
            let texture = gl.create_texture().map_err(Error::Gl)?;
            self.textures.push(texture);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            (shared.image_target_texture)(glow::TEXTURE_2D, image.as_ptr() as *const c_void);
            gl.bind_texture(glow::TEXTURE_2D, None);

            let err = gl.get_error();
            if err != glow::NO_ERROR {
                return Err(Error::Gl(format!(
                    "binding layer {} image failed: 0x{:04x}",
                    index, err
                )));
            }
        }

        debug!("Imported layer {} as {}x{} format 0x{:08x}", index, w, h, descriptor.layers[index].format);
        Ok(())
    }
}

impl PlaneTextures for EglPlaneTextures {
    fn map(&mut self, buffer: &dyn PrimeBuffer) -> Result<()> {
        if self.is_mapped() {
            return Ok(());
        }

        let descriptor = buffer.descriptor().ok_or(Error::NoDescriptor)?;
        descriptor.validate()?;
        if descriptor.layers.len() > MAX_IMAGE_PLANES {
            return Err(Error::Unsupported(format!("{} layers", descriptor.layers.len())));
        }
        if descriptor.layers.len() == 1 && descriptor.layers[0].planes.len() > 1 {
            return Err(Error::Unsupported(
                "multi-planar single layer needs an external texture target".into(),
            ));
        }

        for index in 0..descriptor.layers.len() {
            if let Err(e) = self.import_layer(descriptor, index, buffer.width(), buffer.height()) {
                self.unmap();
                return Err(e);
            }
        }

        self.bits = match descriptor.primary_format() {
            Some(format) if format == DrmFourcc::R16 as u32 => 16,
            _ => 8,
        };
        Ok(())
    }

    fn unmap(&mut self) {
        let shared = Rc::clone(&self.shared);
        for texture in self.textures.drain(..) {
            // SAFETY: the context is current on this thread
            unsafe { shared.gl.delete_texture(texture) };
        }
        for image in self.images.drain(..) {
            if let Err(e) = shared.egl.destroy_image(shared.display, image) {
                warn!("eglDestroyImage failed: {:?}", e);
            }
        }
    }

    fn is_mapped(&self) -> bool {
        !self.textures.is_empty()
    }

    fn texture(&self, plane: usize) -> Option<u32> {
        self.textures.get(plane).map(|t| t.0.get())
    }

    fn target(&self) -> u32 {
        glow::TEXTURE_2D
    }

    fn bits(&self) -> u8 {
        self.bits
    }
}

impl Drop for EglPlaneTextures {
    fn drop(&mut self) {
        self.unmap();
    }
}
