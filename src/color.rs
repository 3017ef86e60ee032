//! Color metadata carried by decoded pictures
//!
//! Enumerations follow the ITU-T H.273 code points that hardware decoders
//! report, so values can be converted straight from the bitstream.

/// Chromaticity of the source primaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorPrimaries {
    Bt709,
    #[default]
    Unspecified,
    Bt470M,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
    Film,
    Bt2020,
    Smpte428,
    Smpte431,
    Smpte432,
    Ebu3213,
}

impl ColorPrimaries {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Bt709,
            4 => Self::Bt470M,
            5 => Self::Bt470Bg,
            6 => Self::Smpte170M,
            7 => Self::Smpte240M,
            8 => Self::Film,
            9 => Self::Bt2020,
            10 => Self::Smpte428,
            11 => Self::Smpte431,
            12 => Self::Smpte432,
            22 => Self::Ebu3213,
            _ => Self::Unspecified,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Bt709 => 1,
            Self::Unspecified => 2,
            Self::Bt470M => 4,
            Self::Bt470Bg => 5,
            Self::Smpte170M => 6,
            Self::Smpte240M => 7,
            Self::Film => 8,
            Self::Bt2020 => 9,
            Self::Smpte428 => 10,
            Self::Smpte431 => 11,
            Self::Smpte432 => 12,
            Self::Ebu3213 => 22,
        }
    }
}

/// Matrix coefficients used to derive Y'CbCr from R'G'B'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    Rgb,
    Bt709,
    #[default]
    Unspecified,
    Fcc,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
    YCgCo,
    Bt2020Ncl,
    Bt2020Cl,
}

impl ColorSpace {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Rgb,
            1 => Self::Bt709,
            4 => Self::Fcc,
            5 => Self::Bt470Bg,
            6 => Self::Smpte170M,
            7 => Self::Smpte240M,
            8 => Self::YCgCo,
            9 => Self::Bt2020Ncl,
            10 => Self::Bt2020Cl,
            _ => Self::Unspecified,
        }
    }

    pub fn is_bt2020(self) -> bool {
        matches!(self, Self::Bt2020Ncl | Self::Bt2020Cl)
    }
}

/// Opto-electronic transfer characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferCharacteristic {
    Bt709,
    #[default]
    Unspecified,
    Bt2020_10,
    Bt2020_12,
    Smpte2084,
    AribStdB67,
    Other(u32),
}

impl TransferCharacteristic {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Bt709,
            2 => Self::Unspecified,
            14 => Self::Bt2020_10,
            15 => Self::Bt2020_12,
            16 => Self::Smpte2084,
            18 => Self::AribStdB67,
            other => Self::Other(other),
        }
    }
}

/// Quantization range of the source samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorRange {
    #[default]
    Unspecified,
    /// Studio swing (16-235 for 8-bit luma)
    Limited,
    /// Full swing (0-255 for 8-bit)
    Full,
}

impl ColorRange {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Limited,
            2 => Self::Full,
            _ => Self::Unspecified,
        }
    }
}

/// Color description of the frame held by a buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColor {
    pub primaries: ColorPrimaries,
    pub colorspace: ColorSpace,
    pub bits: u8,
    pub full_range: bool,
}

impl Default for SourceColor {
    fn default() -> Self {
        Self {
            primaries: ColorPrimaries::Bt709,
            colorspace: ColorSpace::Bt709,
            bits: 8,
            full_range: false,
        }
    }
}

/// Resolve an unspecified colorspace from the frame size.
///
/// HD content defaults to BT.709 and SD content to BT.470BG. The width test
/// is strict while the height test is inclusive.
pub fn infer_colorspace(colorspace: ColorSpace, width: u32, height: u32) -> ColorSpace {
    if colorspace != ColorSpace::Unspecified {
        return colorspace;
    }

    if width > 1024 || height >= 600 {
        ColorSpace::Bt709
    } else {
        ColorSpace::Bt470Bg
    }
}
