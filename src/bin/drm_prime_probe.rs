//! Probe a DRM device for the scanout path
//!
//! Allocates an NV12 frame as a dumb buffer, hands it around as a DMA-buf the
//! way a decoder would, and checks that it can be imported, wrapped in a
//! framebuffer and given an HDR metadata blob.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use drm::buffer::Buffer;
use drm::control::Device as ControlDevice;
use drm_fourcc::{DrmFourcc, DrmModifier};
use drm_prime_render::bridge::{framebuffer_layout, scanout_format};
use drm_prime_render::buffer::{
    ContentLight, DrmLayer, DrmObject, DrmPlane, FrameDescriptor, MasteringDisplay, PrimeBuffer,
    VideoBuffer, VideoPicture,
};
use drm_prime_render::color::{ColorPrimaries, ColorSpace, TransferCharacteristic};
use drm_prime_render::hdr::{self, HdrOutputMetadata};
use drm_prime_render::{DrmCard, KmsDevice, RendererConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "drm_prime_probe")]
#[command(about = "Check DMA-buf import and framebuffer creation on a DRM device", long_about = None)]
struct Args {
    /// DRM card node
    #[arg(long, default_value = "/dev/dri/card0")]
    device: PathBuf,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Renderer config to validate
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also create an HDR10 output metadata blob
    #[arg(long)]
    hdr: bool,

    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,
}

/// NV12 frame exported from a dumb buffer
struct ProbeFrame {
    descriptor: FrameDescriptor,
    width: u32,
    height: u32,
    _fd: OwnedFd,
}

impl ProbeFrame {
    fn new(fd: OwnedFd, size: u64, pitch: u32, width: u32, height: u32) -> Self {
        let plane = |offset| vec![DrmPlane { object_index: 0, offset, pitch }];
        let descriptor = FrameDescriptor {
            objects: vec![DrmObject {
                fd: fd.as_raw_fd(),
                size: size as usize,
                format_modifier: u64::from(DrmModifier::Linear),
            }],
            layers: vec![
                DrmLayer { format: DrmFourcc::R8 as u32, planes: plane(0) },
                DrmLayer { format: DrmFourcc::Gr88 as u32, planes: plane(pitch * height) },
            ],
        };
        Self { descriptor, width, height, _fd: fd }
    }
}

impl PrimeBuffer for ProbeFrame {
    fn descriptor(&self) -> Option<&FrameDescriptor> {
        Some(&self.descriptor)
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> u32 {
        DrmFourcc::Nv12 as u32
    }
}

fn probe_framebuffer(card: &DrmCard, frame: &ProbeFrame) -> Result<()> {
    let object = frame.descriptor.objects[0];
    let handle = card
        .prime_fd_to_handle(object.fd)
        .context("DMA-buf import failed")?;
    info!("Imported DMA-buf fd {} as GEM handle {}", object.fd, handle);

    let layout = framebuffer_layout(&frame.descriptor, &[handle, 0, 0, 0], frame.width, frame.height);
    let result = card.add_fb(&layout);
    match &result {
        Ok(fb_id) => {
            info!(
                "Framebuffer {} created, format 0x{:08x}",
                fb_id,
                scanout_format(&frame.descriptor)
            );
            if let Err(e) = card.remove_fb(*fb_id) {
                warn!("Failed to remove framebuffer {}: {}", fb_id, e);
            }
        }
        Err(e) => warn!("NV12 framebuffer rejected: {}", e),
    }

    if let Err(e) = card.close_handle(handle) {
        warn!("Failed to close GEM handle {}: {}", handle, e);
    }
    result.map(|_| ()).context("NV12 framebuffer rejected")
}

fn probe_hdr_blob(card: &DrmCard, frame: Arc<ProbeFrame>) -> Result<()> {
    let (width, height) = (frame.width, frame.height);
    let mut picture = VideoPicture::new(VideoBuffer::DrmPrime(frame), width, height);
    picture.color_primaries = ColorPrimaries::Bt2020;
    picture.color_space = ColorSpace::Bt2020Ncl;
    picture.color_transfer = TransferCharacteristic::Smpte2084;
    picture.mastering_display = Some(MasteringDisplay {
        display_primaries: [[0.708, 0.292], [0.170, 0.797], [0.131, 0.046]],
        white_point: [0.3127, 0.3290],
        min_luminance: 0.005,
        max_luminance: 1000.0,
        has_primaries: true,
        has_luminance: true,
    });
    picture.content_light = Some(ContentLight { max_cll: 1000, max_fall: 400 });

    let metadata = HdrOutputMetadata::from_picture(&picture, hdr::eotf(&picture));
    let blob_id = card
        .create_blob(&metadata.to_bytes())
        .context("HDR metadata blob rejected")?;
    info!("HDR output metadata blob {} created ({:?})", blob_id, metadata);
    card.destroy_blob(blob_id)
        .with_context(|| format!("Failed to destroy blob {}", blob_id))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "debug"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &args.config {
        let config = RendererConfig::load(path)
            .with_context(|| format!("Invalid config {:?}", path))?;
        info!("Config: {:?}", config);
    }

    let width = args.width & !1;
    let height = args.height & !1;

    let card = DrmCard::open(&args.device)
        .with_context(|| format!("Failed to open {:?}", args.device))?;

    // luma rows followed by half as many interleaved chroma rows
    let rows = height * 3 / 2;
    let dumb = card
        .create_dumb_buffer((width, rows), DrmFourcc::R8, 8)
        .context("Failed to allocate dumb buffer")?;
    let pitch = dumb.pitch();
    let exported = card
        .buffer_to_prime_fd(dumb.handle(), (libc::O_CLOEXEC | libc::O_RDWR) as u32);
    // the DMA-buf keeps the memory alive, like a decoder surface
    if let Err(e) = card.destroy_dumb_buffer(dumb) {
        warn!("Failed to release dumb buffer: {}", e);
    }
    let fd = exported.context("Failed to export dumb buffer")?;

    let size = u64::from(pitch) * u64::from(rows);
    let frame = Arc::new(ProbeFrame::new(fd, size, pitch, width, height));
    frame.descriptor.validate().context("Bad descriptor")?;

    probe_framebuffer(&card, &frame)?;

    if args.hdr {
        probe_hdr_blob(&card, frame)?;
    }

    info!("Probe of {:?} passed", args.device);
    Ok(())
}
