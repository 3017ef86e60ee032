//! Test doubles for the GPU, the render system and KMS

use crate::buffer::{DrmLayer, DrmObject, DrmPlane, FrameDescriptor, PrimeBuffer, VideoBuffer, VideoPicture};
use crate::display::{AtomicDisplay, KmsObject};
use crate::drm_device::{FramebufferLayout, KmsDevice};
use crate::geometry::Point;
use crate::hdr::HDR_OUTPUT_METADATA_SIZE;
use crate::gpu::{Blend, CompletionFence, GpuBackend, PlaneTextures, RenderSystem, Shader, TexturedVertex};
use crate::{Error, Result};
use drm_fourcc::DrmFourcc;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

/// Texture target reported by [`MockTextures`]
pub const MOCK_TARGET: u32 = 0x0DE1;

pub struct MockBuffer {
    descriptor: Option<FrameDescriptor>,
    width: u32,
    height: u32,
    format: u32,
}

impl MockBuffer {
    pub fn new(descriptor: FrameDescriptor, width: u32, height: u32, format: DrmFourcc) -> Self {
        Self {
            descriptor: Some(descriptor),
            width,
            height,
            format: format as u32,
        }
    }

    /// A frame the decoder can no longer export
    pub fn invalid(width: u32, height: u32) -> Self {
        Self {
            descriptor: None,
            width,
            height,
            format: DrmFourcc::Nv12 as u32,
        }
    }
}

impl PrimeBuffer for MockBuffer {
    fn descriptor(&self) -> Option<&FrameDescriptor> {
        self.descriptor.as_ref()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> u32 {
        self.format
    }
}

fn layer(format: DrmFourcc, object_index: usize, offset: u32, pitch: u32) -> DrmLayer {
    DrmLayer {
        format: format as u32,
        planes: vec![DrmPlane { object_index, offset, pitch }],
    }
}

/// NV12 exported as an R8 luma layer and a GR88 chroma layer
pub fn nv12_buffer(width: u32, height: u32) -> Arc<MockBuffer> {
    let luma = width * height;
    let descriptor = FrameDescriptor {
        objects: vec![DrmObject { fd: 20, size: (luma * 3 / 2) as usize, format_modifier: 0 }],
        layers: vec![
            layer(DrmFourcc::R8, 0, 0, width),
            layer(DrmFourcc::Gr88, 0, luma, width),
        ],
    };
    Arc::new(MockBuffer::new(descriptor, width, height, DrmFourcc::Nv12))
}

/// NV12 exported as one layer carrying both planes
pub fn nv12_single_layer_buffer(width: u32, height: u32) -> Arc<MockBuffer> {
    let luma = width * height;
    let descriptor = FrameDescriptor {
        objects: vec![DrmObject { fd: 22, size: (luma * 3 / 2) as usize, format_modifier: 0 }],
        layers: vec![DrmLayer {
            format: DrmFourcc::Nv12 as u32,
            planes: vec![
                DrmPlane { object_index: 0, offset: 0, pitch: width },
                DrmPlane { object_index: 0, offset: luma, pitch: width },
            ],
        }],
    };
    Arc::new(MockBuffer::new(descriptor, width, height, DrmFourcc::Nv12))
}

/// Three R8 layers in one object
pub fn yuv420_buffer(width: u32, height: u32) -> Arc<MockBuffer> {
    let luma = width * height;
    let descriptor = FrameDescriptor {
        objects: vec![DrmObject { fd: 21, size: (luma * 3 / 2) as usize, format_modifier: 0 }],
        layers: vec![
            layer(DrmFourcc::R8, 0, 0, width),
            layer(DrmFourcc::R8, 0, luma, width / 2),
            layer(DrmFourcc::R8, 0, luma * 5 / 4, width / 2),
        ],
    };
    Arc::new(MockBuffer::new(descriptor, width, height, DrmFourcc::Yuv420))
}

/// Three R8 layers, each in its own object
pub fn multi_object_buffer(width: u32, height: u32) -> Arc<MockBuffer> {
    let luma = width * height;
    let descriptor = FrameDescriptor {
        objects: (0..3)
            .map(|i| DrmObject { fd: 30 + i, size: luma as usize, format_modifier: 0 })
            .collect(),
        layers: vec![
            layer(DrmFourcc::R8, 0, 0, width),
            layer(DrmFourcc::R8, 1, 0, width / 2),
            layer(DrmFourcc::R8, 2, 0, width / 2),
        ],
    };
    Arc::new(MockBuffer::new(descriptor, width, height, DrmFourcc::Yuv420))
}

pub fn picture(buffer: &Arc<MockBuffer>, width: u32, height: u32) -> VideoPicture {
    let buffer: Arc<dyn PrimeBuffer> = buffer.clone();
    VideoPicture::new(VideoBuffer::DrmPrime(buffer), width, height)
}

#[derive(Default)]
struct GpuState {
    fences: Vec<Rc<Cell<bool>>>,
    fail_maps: bool,
    unsupported: bool,
    maps: usize,
}

/// GPU whose fences are signalled by the test
#[derive(Default, Clone)]
pub struct MockGpu {
    state: Rc<RefCell<GpuState>>,
}

impl MockGpu {
    pub fn fences_created(&self) -> usize {
        self.state.borrow().fences.len()
    }

    pub fn signal_all(&self) {
        for pending in &self.state.borrow().fences {
            pending.set(false);
        }
    }

    pub fn fail_maps(&self, fail: bool) {
        self.state.borrow_mut().fail_maps = fail;
    }

    pub fn set_supported(&self, supported: bool) {
        self.state.borrow_mut().unsupported = !supported;
    }

    /// Successful texture imports so far
    pub fn maps(&self) -> usize {
        self.state.borrow().maps
    }
}

pub struct MockFence {
    pending: Rc<Cell<bool>>,
}

impl CompletionFence for MockFence {
    fn create(&mut self) {
        self.pending.set(true);
    }

    fn destroy(&mut self) {
        self.pending.set(false);
    }

    fn is_signaled(&self) -> bool {
        !self.pending.get()
    }
}

pub struct MockTextures {
    state: Rc<RefCell<GpuState>>,
    layers: usize,
    bits: u8,
    mapped: bool,
}

impl PlaneTextures for MockTextures {
    fn map(&mut self, buffer: &dyn PrimeBuffer) -> Result<()> {
        if self.mapped {
            return Ok(());
        }
        if self.state.borrow().fail_maps {
            return Err(Error::Egl("mock import failure".into()));
        }
        let descriptor = buffer.descriptor().ok_or(Error::NoDescriptor)?;
        self.layers = descriptor.layers.len();
        self.bits = match descriptor.primary_format() {
            Some(format) if format == DrmFourcc::R16 as u32 => 16,
            _ => 8,
        };
        self.mapped = true;
        self.state.borrow_mut().maps += 1;
        Ok(())
    }

    fn unmap(&mut self) {
        self.mapped = false;
        self.layers = 0;
    }

    fn is_mapped(&self) -> bool {
        self.mapped
    }

    fn texture(&self, plane: usize) -> Option<u32> {
        (self.mapped && plane < self.layers).then(|| 100 + plane as u32)
    }

    fn target(&self) -> u32 {
        MOCK_TARGET
    }

    fn bits(&self) -> u8 {
        self.bits
    }
}

impl GpuBackend for MockGpu {
    type Fence = MockFence;
    type Textures = MockTextures;

    fn create_fence(&self) -> MockFence {
        let pending = Rc::new(Cell::new(false));
        self.state.borrow_mut().fences.push(Rc::clone(&pending));
        MockFence { pending }
    }

    fn create_textures(&self) -> MockTextures {
        MockTextures {
            state: Rc::clone(&self.state),
            layers: 0,
            bits: 8,
            mapped: false,
        }
    }

    fn supports_format_and_modifier(&self, _format: u32, _modifier: u64) -> bool {
        !self.state.borrow().unsupported
    }
}

/// One call made on [`RecordingRenderSystem`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Blend(Blend),
    Clear([f32; 4]),
    EnableShader(Shader),
    DisableShader,
    Color([f32; 4]),
    Triangles(Vec<Point>),
    BindTexture(u32, u32, u32),
    Layers(u32),
    Alpha(f32),
    YuvMatrix([[f32; 4]; 4]),
    ColorConversion(bool),
    PrimaryMatrix([[f32; 3]; 3]),
    GammaSrc(f32),
    GammaDstInv(f32),
    Strip([TexturedVertex; 4], [u8; 4]),
}

#[derive(Default)]
pub struct RecordingRenderSystem {
    pub calls: Vec<Call>,
}

impl RecordingRenderSystem {
    /// The textured strip drawn, if any
    pub fn strip(&self) -> Option<([TexturedVertex; 4], [u8; 4])> {
        self.calls.iter().find_map(|c| match c {
            Call::Strip(vertices, indices) => Some((*vertices, *indices)),
            _ => None,
        })
    }
}

impl RenderSystem for RecordingRenderSystem {
    fn set_blend(&mut self, blend: Blend) {
        self.calls.push(Call::Blend(blend));
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        self.calls.push(Call::Clear(rgba));
    }

    fn enable_shader(&mut self, shader: Shader) {
        self.calls.push(Call::EnableShader(shader));
    }

    fn disable_shader(&mut self) {
        self.calls.push(Call::DisableShader);
    }

    fn set_uniform_color(&mut self, rgba: [f32; 4]) {
        self.calls.push(Call::Color(rgba));
    }

    fn draw_triangles(&mut self, vertices: &[Point]) {
        self.calls.push(Call::Triangles(vertices.to_vec()));
    }

    fn bind_texture(&mut self, unit: u32, target: u32, texture: u32) {
        self.calls.push(Call::BindTexture(unit, target, texture));
    }

    fn set_layers(&mut self, layers: u32) {
        self.calls.push(Call::Layers(layers));
    }

    fn set_alpha(&mut self, alpha: f32) {
        self.calls.push(Call::Alpha(alpha));
    }

    fn set_yuv_matrix(&mut self, matrix: &[[f32; 4]; 4]) {
        self.calls.push(Call::YuvMatrix(*matrix));
    }

    fn set_color_conversion(&mut self, enabled: bool) {
        self.calls.push(Call::ColorConversion(enabled));
    }

    fn set_primary_matrix(&mut self, matrix: &[[f32; 3]; 3]) {
        self.calls.push(Call::PrimaryMatrix(*matrix));
    }

    fn set_gamma_src(&mut self, gamma: f32) {
        self.calls.push(Call::GammaSrc(gamma));
    }

    fn set_gamma_dst_inv(&mut self, gamma: f32) {
        self.calls.push(Call::GammaDstInv(gamma));
    }

    fn draw_textured_strip(&mut self, vertices: &[TexturedVertex; 4], indices: &[u8; 4]) {
        self.calls.push(Call::Strip(*vertices, *indices));
    }
}

/// One kernel call made on [`MockKms`]
#[derive(Debug, Clone, PartialEq)]
pub enum KmsCall {
    Import(RawFd),
    Close(u32),
    AddFb(FramebufferLayout),
    RemoveFb(u32),
    CreateBlob(u32),
    DestroyBlob(u32),
}

#[derive(Default)]
struct KmsState {
    calls: Vec<KmsCall>,
    last_id: u32,
    handles: Vec<u32>,
    framebuffers: Vec<u32>,
    blobs: Vec<(u32, Vec<u8>)>,
    import_budget: Option<usize>,
    fail_framebuffers: bool,
    fail_blobs: bool,
}

impl KmsState {
    fn next_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }
}

fn kernel_error(op: &'static str) -> Error {
    Error::Kernel {
        op,
        source: std::io::Error::from_raw_os_error(libc::ENOMEM),
    }
}

/// In-memory KMS device tracking live kernel objects
#[derive(Default, Clone)]
pub struct MockKms {
    state: Rc<RefCell<KmsState>>,
}

impl MockKms {
    pub fn count(&self, pred: impl Fn(&KmsCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn live_handles(&self) -> Vec<u32> {
        self.state.borrow().handles.clone()
    }

    pub fn framebuffers(&self) -> Vec<u32> {
        self.state.borrow().framebuffers.clone()
    }

    pub fn live_blobs(&self) -> Vec<u32> {
        self.state.borrow().blobs.iter().map(|(id, _)| *id).collect()
    }

    pub fn blob(&self, id: u32) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .blobs
            .iter()
            .find(|(blob_id, _)| *blob_id == id)
            .map(|(_, data)| data.clone())
    }

    /// Let `imports` more prime imports succeed, then fail
    pub fn fail_import_after(&self, imports: usize) {
        self.state.borrow_mut().import_budget = Some(imports);
    }

    pub fn fail_framebuffers(&self, fail: bool) {
        self.state.borrow_mut().fail_framebuffers = fail;
    }

    pub fn fail_blobs(&self, fail: bool) {
        self.state.borrow_mut().fail_blobs = fail;
    }
}

impl KmsDevice for MockKms {
    fn prime_fd_to_handle(&self, fd: RawFd) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.calls.push(KmsCall::Import(fd));
        if let Some(budget) = state.import_budget.as_mut() {
            if *budget == 0 {
                return Err(kernel_error("PRIME_FD_TO_HANDLE"));
            }
            *budget -= 1;
        }
        let handle = state.next_id();
        state.handles.push(handle);
        Ok(handle)
    }

    fn close_handle(&self, handle: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(KmsCall::Close(handle));
        state.handles.retain(|&h| h != handle);
        Ok(())
    }

    fn add_fb(&self, layout: &FramebufferLayout) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.calls.push(KmsCall::AddFb(*layout));
        if state.fail_framebuffers {
            return Err(kernel_error("ADDFB2"));
        }
        let fb_id = state.next_id();
        state.framebuffers.push(fb_id);
        Ok(fb_id)
    }

    fn remove_fb(&self, fb_id: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(KmsCall::RemoveFb(fb_id));
        state.framebuffers.retain(|&id| id != fb_id);
        Ok(())
    }

    fn create_blob(&self, data: &[u8; HDR_OUTPUT_METADATA_SIZE]) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        if state.fail_blobs {
            return Err(kernel_error("CREATEPROPBLOB"));
        }
        let blob_id = state.next_id();
        state.calls.push(KmsCall::CreateBlob(blob_id));
        state.blobs.push((blob_id, data.to_vec()));
        Ok(blob_id)
    }

    fn destroy_blob(&self, blob_id: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(KmsCall::DestroyBlob(blob_id));
        state.blobs.retain(|(id, _)| *id != blob_id);
        Ok(())
    }
}

/// Base EDID block plus one CTA-861 extension with a Colorimetry block
/// (`c0`, `c1` payload bytes) and an HDR Static Metadata block (`eotfs`)
pub fn cta_edid(c0: u8, c1: u8, eotfs: u8) -> Vec<u8> {
    let mut edid = vec![0u8; 256];
    edid[..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
    edid[126] = 1;

    let cta = &mut edid[128..];
    cta[0] = 0x02;
    cta[1] = 0x03;
    cta[2] = 12;
    cta[4..8].copy_from_slice(&[0xe3, 0x05, c0, c1]);
    cta[8..12].copy_from_slice(&[0xe3, 0x06, eotfs, 0x01]);
    edid
}

/// Atomic request recorder with a configurable property set
pub struct MockDisplay {
    device: MockKms,
    video_plane: bool,
    scanout_supported: bool,
    properties: HashSet<(KmsObject, String)>,
    enums: HashMap<(KmsObject, String), Vec<(String, u64)>>,
    edid: Option<Vec<u8>>,
    staged: Vec<(KmsObject, String, u64)>,
    active: bool,
}

impl MockDisplay {
    pub const CRTC_ID: u32 = 42;

    const PLANE_PROPERTIES: [&'static str; 10] = [
        "FB_ID", "CRTC_ID", "SRC_X", "SRC_Y", "SRC_W", "SRC_H", "CRTC_X", "CRTC_Y", "CRTC_W",
        "CRTC_H",
    ];

    /// Video and GUI planes with color properties, a connector with
    /// `Colorspace` and `HDR_OUTPUT_METADATA`, and a BT.2020/PQ/HLG sink
    pub fn hdr_capable() -> Self {
        let mut display = Self {
            device: MockKms::default(),
            video_plane: true,
            scanout_supported: true,
            properties: HashSet::new(),
            enums: HashMap::new(),
            edid: Some(cta_edid(0x80, 0x00, 0x0d)),
            staged: Vec::new(),
            active: false,
        };

        for plane in [KmsObject::VideoPlane, KmsObject::GuiPlane] {
            for name in Self::PLANE_PROPERTIES {
                display.properties.insert((plane, name.to_string()));
            }
            display.add_enum(
                plane,
                "COLOR_ENCODING",
                &["ITU-R BT.601 YCbCr", "ITU-R BT.709 YCbCr", "ITU-R BT.2020 YCbCr"],
            );
            display.add_enum(plane, "COLOR_RANGE", &["YCbCr limited range", "YCbCr full range"]);
        }
        display.add_enum(
            KmsObject::Connector,
            "Colorspace",
            &["Default", "SMPTE_170M_YCC", "BT709_YCC", "BT2020_RGB", "BT2020_YCC"],
        );
        display
            .properties
            .insert((KmsObject::Connector, "HDR_OUTPUT_METADATA".to_string()));
        display
    }

    fn add_enum(&mut self, object: KmsObject, name: &str, values: &[&str]) {
        self.properties.insert((object, name.to_string()));
        let values = values
            .iter()
            .enumerate()
            .map(|(i, v)| (v.to_string(), i as u64))
            .collect();
        self.enums.insert((object, name.to_string()), values);
    }

    pub fn set_edid(&mut self, edid: Option<Vec<u8>>) {
        self.edid = edid;
    }

    pub fn remove_video_plane(&mut self) {
        self.video_plane = false;
        self.properties.retain(|(object, _)| *object != KmsObject::VideoPlane);
        self.enums.retain(|(object, _), _| *object != KmsObject::VideoPlane);
    }

    pub fn set_scanout_supported(&mut self, supported: bool) {
        self.scanout_supported = supported;
    }

    /// Last value staged for a property
    pub fn staged(&self, object: KmsObject, name: &str) -> Option<u64> {
        self.staged
            .iter()
            .rev()
            .find(|(o, n, _)| *o == object && n == name)
            .map(|(_, _, value)| *value)
    }

    pub fn staged_all(&self) -> &[(KmsObject, String, u64)] {
        &self.staged
    }

    pub fn clear_staged(&mut self) {
        self.staged.clear();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl AtomicDisplay for MockDisplay {
    type Device = MockKms;

    fn device(&self) -> &MockKms {
        &self.device
    }

    fn has_video_plane(&self) -> bool {
        self.video_plane
    }

    fn supports_format_and_modifier(&self, _format: u32, _modifier: u64) -> bool {
        self.video_plane && self.scanout_supported
    }

    fn crtc_id(&self) -> u32 {
        Self::CRTC_ID
    }

    fn supports_property(&self, object: KmsObject, name: &str) -> bool {
        self.properties.contains(&(object, name.to_string()))
    }

    fn property_enum_value(&self, object: KmsObject, name: &str, value: &str) -> Option<u64> {
        self.enums
            .get(&(object, name.to_string()))?
            .iter()
            .find(|(n, _)| n == value)
            .map(|(_, v)| *v)
    }

    fn edid(&self) -> Option<Vec<u8>> {
        self.edid.clone()
    }

    fn add_property(&mut self, object: KmsObject, name: &str, value: u64) -> bool {
        if !self.supports_property(object, name) {
            return false;
        }
        self.staged.push((object, name.to_string(), value));
        true
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}
