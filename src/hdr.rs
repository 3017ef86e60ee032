//! HDR output metadata and plane color properties
//!
//! Values follow CTA-861-G static metadata type 1 and the kernel's
//! `struct hdr_output_metadata`.

use crate::buffer::VideoPicture;
use crate::color::{infer_colorspace, ColorSpace, TransferCharacteristic};
use crate::drm_device::KmsDevice;
use crate::Result;
use tracing::{debug, warn};

/// `HDMI_STATIC_METADATA_TYPE1`
pub const STATIC_METADATA_TYPE1: u8 = 0;

pub const EOTF_TRADITIONAL_GAMMA_SDR: u8 = 0;
pub const EOTF_TRADITIONAL_GAMMA_HDR: u8 = 1;
pub const EOTF_SMPTE_ST2084: u8 = 2;
pub const EOTF_BT2100_HLG: u8 = 3;

/// Size of `struct hdr_output_metadata`
pub const HDR_OUTPUT_METADATA_SIZE: usize = 32;

/// Chromaticity in units of 0.00002
pub fn encode_chromaticity(value: f64) -> u16 {
    (value * 50000.0).round() as u16
}

/// Max mastering luminance in whole cd/m²
pub fn encode_max_luminance(value: f64) -> u16 {
    value.round() as u16
}

/// Min mastering luminance in units of 0.0001 cd/m²
pub fn encode_min_luminance(value: f64) -> u16 {
    (value * 10000.0).round() as u16
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdrOutputMetadata {
    pub eotf: u8,
    /// Red, green, blue as `[x, y]`
    pub display_primaries: [[u16; 2]; 3],
    pub white_point: [u16; 2],
    pub max_display_mastering_luminance: u16,
    pub min_display_mastering_luminance: u16,
    pub max_cll: u16,
    pub max_fall: u16,
}

impl HdrOutputMetadata {
    /// Metadata for `picture`; absent blocks stay zero
    pub fn from_picture(picture: &VideoPicture, eotf: u8) -> Self {
        let mut metadata = Self {
            eotf,
            ..Default::default()
        };

        if let Some(mastering) = picture.mastering_display.as_ref() {
            if mastering.has_primaries {
                for (out, xy) in metadata
                    .display_primaries
                    .iter_mut()
                    .zip(mastering.display_primaries.iter())
                {
                    *out = [encode_chromaticity(xy[0]), encode_chromaticity(xy[1])];
                }
                metadata.white_point = [
                    encode_chromaticity(mastering.white_point[0]),
                    encode_chromaticity(mastering.white_point[1]),
                ];
                debug!(
                    "display_primaries={:?} white_point={:?}",
                    metadata.display_primaries, metadata.white_point
                );
            }
            if mastering.has_luminance {
                metadata.max_display_mastering_luminance =
                    encode_max_luminance(mastering.max_luminance);
                metadata.min_display_mastering_luminance =
                    encode_min_luminance(mastering.min_luminance);
                debug!(
                    "mastering luminance max={} min={}",
                    metadata.max_display_mastering_luminance,
                    metadata.min_display_mastering_luminance
                );
            }
        }

        if let Some(light) = picture.content_light {
            metadata.max_cll = light.max_cll;
            metadata.max_fall = light.max_fall;
            debug!("max_cll={} max_fall={}", light.max_cll, light.max_fall);
        }

        metadata
    }

    /// Native-endian `struct hdr_output_metadata`
    pub fn to_bytes(&self) -> [u8; HDR_OUTPUT_METADATA_SIZE] {
        let mut out = [0u8; HDR_OUTPUT_METADATA_SIZE];
        out[0..4].copy_from_slice(&(STATIC_METADATA_TYPE1 as u32).to_ne_bytes());
        out[4] = self.eotf;
        out[5] = STATIC_METADATA_TYPE1;

        let words = self
            .display_primaries
            .iter()
            .flatten()
            .chain(self.white_point.iter())
            .chain([
                &self.max_display_mastering_luminance,
                &self.min_display_mastering_luminance,
                &self.max_cll,
                &self.max_fall,
            ]);
        for (chunk, word) in out[6..30].chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        out
    }
}

/// Kernel-resident metadata blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HdrBlob {
    #[default]
    Absent,
    Present(u32),
}

impl HdrBlob {
    pub fn id(&self) -> Option<u32> {
        match self {
            HdrBlob::Absent => None,
            HdrBlob::Present(id) => Some(*id),
        }
    }

    /// Destroy the old blob, if any, then upload `metadata`.
    ///
    /// On failure the state is `Absent`.
    pub fn replace<D: KmsDevice>(&mut self, device: &D, metadata: &HdrOutputMetadata) -> Result<u32> {
        self.destroy(device);
        let id = device.create_blob(&metadata.to_bytes())?;
        *self = HdrBlob::Present(id);
        Ok(id)
    }

    pub fn destroy<D: KmsDevice>(&mut self, device: &D) {
        if let HdrBlob::Present(id) = std::mem::take(self) {
            if let Err(e) = device.destroy_blob(id) {
                warn!("Failed to destroy HDR metadata blob {}: {}", id, e);
            }
        }
    }
}

/// Plane and connector color properties for one picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneColorState {
    /// Plane `COLOR_ENCODING` enum name
    pub encoding: &'static str,
    /// Plane `COLOR_RANGE` enum name
    pub range: &'static str,
    /// Connector `Colorspace` enum name
    pub colorimetry: &'static str,
    pub eotf: u8,
    pub metadata: HdrOutputMetadata,
}

impl PlaneColorState {
    pub fn from_picture(picture: &VideoPicture) -> Self {
        let eotf = eotf(picture);
        Self {
            encoding: color_encoding(picture),
            range: color_range(picture),
            colorimetry: colorimetry(picture),
            eotf,
            metadata: HdrOutputMetadata::from_picture(picture, eotf),
        }
    }
}

pub fn color_encoding(picture: &VideoPicture) -> &'static str {
    match infer_colorspace(picture.color_space, picture.width, picture.height) {
        ColorSpace::Bt2020Cl | ColorSpace::Bt2020Ncl => "ITU-R BT.2020 YCbCr",
        ColorSpace::Smpte170M | ColorSpace::Bt470Bg | ColorSpace::Fcc => "ITU-R BT.601 YCbCr",
        _ => "ITU-R BT.709 YCbCr",
    }
}

pub fn color_range(picture: &VideoPicture) -> &'static str {
    if picture.is_full_range() {
        "YCbCr full range"
    } else {
        "YCbCr limited range"
    }
}

pub fn colorimetry(picture: &VideoPicture) -> &'static str {
    if picture.color_space.is_bt2020() {
        "BT2020_RGB"
    } else {
        "Default"
    }
}

pub fn eotf(picture: &VideoPicture) -> u8 {
    match picture.color_transfer {
        TransferCharacteristic::Smpte2084 => EOTF_SMPTE_ST2084,
        TransferCharacteristic::AribStdB67 | TransferCharacteristic::Bt2020_10 => EOTF_BT2100_HLG,
        _ => EOTF_TRADITIONAL_GAMMA_SDR,
    }
}
