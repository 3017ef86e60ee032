//! YUV to RGB conversion and primaries/gamma correction matrices
//!
//! Everything here is pure arithmetic on the source color description, so
//! the renderer recomputes it for every draw.

use crate::color::{ColorPrimaries, ColorSpace, SourceColor};

type Mat3 = [[f64; 3]; 3];

/// Gamma assumed for display referred output
const GAMMA_DST: f32 = 2.2;

/// Bradford cone response matrix
const BRADFORD: Mat3 = [
    [0.8951, 0.2664, -0.1614],
    [-0.7502, 1.7135, 0.0367],
    [0.0389, -0.0685, 1.0296],
];

/// CIE xy chromaticities of red, green, blue and white
struct Chromaticities {
    primaries: [[f64; 2]; 3],
    white: [f64; 2],
}

const D65: [f64; 2] = [0.3127, 0.3290];
const ILLUMINANT_C: [f64; 2] = [0.310, 0.316];
const DCI_WHITE: [f64; 2] = [0.314, 0.351];
const ILLUMINANT_E: [f64; 2] = [1.0 / 3.0, 1.0 / 3.0];

fn chromaticities(primaries: ColorPrimaries) -> Chromaticities {
    let (primaries, white) = match primaries {
        ColorPrimaries::Bt709 | ColorPrimaries::Unspecified => {
            ([[0.640, 0.330], [0.300, 0.600], [0.150, 0.060]], D65)
        }
        ColorPrimaries::Bt470M => ([[0.670, 0.330], [0.210, 0.710], [0.140, 0.080]], ILLUMINANT_C),
        ColorPrimaries::Bt470Bg => ([[0.640, 0.330], [0.290, 0.600], [0.150, 0.060]], D65),
        ColorPrimaries::Smpte170M | ColorPrimaries::Smpte240M => {
            ([[0.630, 0.340], [0.310, 0.595], [0.155, 0.070]], D65)
        }
        ColorPrimaries::Film => ([[0.681, 0.319], [0.243, 0.692], [0.145, 0.049]], ILLUMINANT_C),
        ColorPrimaries::Bt2020 => ([[0.708, 0.292], [0.170, 0.797], [0.131, 0.046]], D65),
        // CIE XYZ primaries; handled separately since y is zero for red/blue
        ColorPrimaries::Smpte428 => ([[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]], ILLUMINANT_E),
        ColorPrimaries::Smpte431 => ([[0.680, 0.320], [0.265, 0.690], [0.150, 0.060]], DCI_WHITE),
        ColorPrimaries::Smpte432 => ([[0.680, 0.320], [0.265, 0.690], [0.150, 0.060]], D65),
        ColorPrimaries::Ebu3213 => ([[0.630, 0.340], [0.295, 0.605], [0.155, 0.077]], D65),
    };
    Chromaticities { primaries, white }
}

/// Luma coefficients (Kr, Kb)
fn luma_coefficients(colorspace: ColorSpace) -> (f64, f64) {
    match colorspace {
        ColorSpace::Bt709 => (0.2126, 0.0722),
        ColorSpace::Smpte240M => (0.212, 0.087),
        ColorSpace::Fcc => (0.30, 0.11),
        ColorSpace::Bt2020Ncl | ColorSpace::Bt2020Cl => (0.2627, 0.0593),
        _ => (0.299, 0.114),
    }
}

fn xy_to_xyz(xy: [f64; 2]) -> [f64; 3] {
    [xy[0] / xy[1], 1.0, (1.0 - xy[0] - xy[1]) / xy[1]]
}

fn mul3(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn mul3_vec(a: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        a[0][0] * v[0] + a[0][1] * v[1] + a[0][2] * v[2],
        a[1][0] * v[0] + a[1][1] * v[1] + a[1][2] * v[2],
        a[2][0] * v[0] + a[2][1] * v[1] + a[2][2] * v[2],
    ]
}

fn invert3(m: &Mat3) -> Mat3 {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    let inv = 1.0 / det;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv,
        ],
    ]
}

fn diag(v: [f64; 3]) -> Mat3 {
    [[v[0], 0.0, 0.0], [0.0, v[1], 0.0], [0.0, 0.0, v[2]]]
}

/// Linear RGB to CIE XYZ for a set of primaries
fn rgb_to_xyz(primaries: ColorPrimaries) -> Mat3 {
    if primaries == ColorPrimaries::Smpte428 {
        return diag([1.0, 1.0, 1.0]);
    }

    let c = chromaticities(primaries);
    let r = xy_to_xyz(c.primaries[0]);
    let g = xy_to_xyz(c.primaries[1]);
    let b = xy_to_xyz(c.primaries[2]);
    let p = [[r[0], g[0], b[0]], [r[1], g[1], b[1]], [r[2], g[2], b[2]]];
    let s = mul3_vec(&invert3(&p), xy_to_xyz(c.white));
    mul3(&p, &diag(s))
}

/// Bradford adaptation from one white point to another
fn adaptation(src_white: [f64; 2], dst_white: [f64; 2]) -> Mat3 {
    let src = mul3_vec(&BRADFORD, xy_to_xyz(src_white));
    let dst = mul3_vec(&BRADFORD, xy_to_xyz(dst_white));
    let scale = diag([dst[0] / src[0], dst[1] / src[1], dst[2] / src[2]]);
    mul3(&invert3(&BRADFORD), &mul3(&scale, &BRADFORD))
}

/// Builder for the shader's color conversion parameters
#[derive(Debug, Clone, Copy)]
pub struct ConversionMatrix {
    target: ColorPrimaries,
    source: ColorPrimaries,
    colorspace: ColorSpace,
    source_bits: u8,
    limited_source: bool,
    texture_bits: u8,
    contrast: f32,
    black: f32,
    limited_output: bool,
}

impl Default for ConversionMatrix {
    fn default() -> Self {
        Self {
            target: ColorPrimaries::Bt709,
            source: ColorPrimaries::Bt709,
            colorspace: ColorSpace::Bt709,
            source_bits: 8,
            limited_source: true,
            texture_bits: 8,
            contrast: 1.0,
            black: 0.0,
            limited_output: false,
        }
    }
}

impl ConversionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_primaries(&mut self, target: ColorPrimaries, source: ColorPrimaries) -> &mut Self {
        self.target = target;
        self.source = source;
        self
    }

    pub fn set_color_params(
        &mut self,
        colorspace: ColorSpace,
        source_bits: u8,
        limited_source: bool,
        texture_bits: u8,
    ) -> &mut Self {
        self.colorspace = colorspace;
        self.source_bits = source_bits.clamp(8, 16);
        self.limited_source = limited_source;
        self.texture_bits = texture_bits.clamp(8, 16);
        self
    }

    pub fn set_output(&mut self, contrast: f32, black: f32, limited_output: bool) -> &mut Self {
        self.contrast = contrast;
        self.black = black;
        self.limited_output = limited_output;
        self
    }

    /// Sample to source-normalized value scale and the bit depth the range
    /// offsets are expressed in.
    ///
    /// Deeper samples are stored MSB-aligned, so a 10-bit code lands in a
    /// 16-bit texel shifted left by six.
    fn depth_scale(&self) -> (f64, u8) {
        let sb = self.source_bits;
        let tb = self.texture_bits;
        if tb <= sb {
            return (1.0, tb);
        }
        let texture_max = ((1u32 << tb) - 1) as f64;
        let source_max = ((1u32 << sb) - 1) as f64;
        let shift = (1u32 << (tb - sb)) as f64;
        (texture_max / (shift * source_max), sb)
    }

    /// YUV to RGB as a column-major 4x4 matrix (`m[column][row]`)
    pub fn yuv_matrix(&self) -> [[f32; 4]; 4] {
        let (scale, bits) = self.depth_scale();
        let max = ((1u32 << bits) - 1) as f64;
        let step = (1u32 << (bits - 8)) as f64;

        // per channel affine: normalized = a * sample + b
        let (a_y, b_y, a_c, b_c) = if self.limited_source {
            let y_lo = 16.0 * step / max;
            let y_hi = 235.0 * step / max;
            let c_mid = 128.0 * step / max;
            let c_range = 224.0 * step / max;
            (
                scale / (y_hi - y_lo),
                -y_lo / (y_hi - y_lo),
                scale / c_range,
                -c_mid / c_range,
            )
        } else {
            let c_mid = (1u32 << (bits - 1)) as f64 / max;
            (scale, 0.0, scale, -c_mid)
        };

        let (kr, kb) = luma_coefficients(self.colorspace);
        let kg = 1.0 - kr - kb;
        let k: Mat3 = [
            [1.0, 0.0, 2.0 * (1.0 - kr)],
            [1.0, -2.0 * kb * (1.0 - kb) / kg, -2.0 * kr * (1.0 - kr) / kg],
            [1.0, 2.0 * (1.0 - kb), 0.0],
        ];

        let (gain, offset) = if self.limited_output {
            let range = 219.0 / 255.0;
            (
                self.contrast as f64 * range,
                self.black as f64 * range + 16.0 / 255.0,
            )
        } else {
            (self.contrast as f64, self.black as f64)
        };

        let column_scale = [a_y, a_c, a_c];
        let bias = mul3_vec(&k, [b_y, b_c, b_c]);

        let mut out = [[0.0f32; 4]; 4];
        for row in 0..3 {
            for col in 0..3 {
                out[col][row] = (gain * k[row][col] * column_scale[col]) as f32;
            }
            out[3][row] = (gain * bias[row] + offset) as f32;
        }
        out[3][3] = 1.0;
        out
    }

    /// Source to target primaries in linear light, row-major.
    ///
    /// `None` when no conversion is needed.
    pub fn primary_matrix(&self) -> Option<[[f32; 3]; 3]> {
        if self.source == self.target {
            return None;
        }

        let src_white = chromaticities(self.source).white;
        let dst_white = chromaticities(self.target).white;
        let xyz_to_dst = invert3(&rgb_to_xyz(self.target));
        let m = mul3(
            &xyz_to_dst,
            &mul3(&adaptation(src_white, dst_white), &rgb_to_xyz(self.source)),
        );

        let mut out = [[0.0f32; 3]; 3];
        for (row, values) in m.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                out[row][col] = *value as f32;
            }
        }
        Some(out)
    }

    /// Decoding gamma of the source
    pub fn gamma_src(&self) -> f32 {
        match self.source {
            ColorPrimaries::Bt470Bg => 2.8,
            _ => 2.2,
        }
    }

    /// Encoding gamma of the target
    pub fn gamma_dst(&self) -> f32 {
        GAMMA_DST
    }
}

/// Primaries correction uploaded alongside the YUV matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryConversion {
    pub matrix: [[f32; 3]; 3],
    pub gamma_src: f32,
    pub gamma_dst_inv: f32,
}

/// Full set of shader color parameters for one draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTransform {
    pub yuv: [[f32; 4]; 4],
    /// Present only when the source primaries differ from the target
    pub conversion: Option<PrimaryConversion>,
}

impl ColorTransform {
    /// Output is always BT.709.
    pub fn for_source(
        source: &SourceColor,
        texture_bits: u8,
        contrast: f32,
        black: f32,
        limited_output: bool,
    ) -> Self {
        let mut matrix = ConversionMatrix::new();
        matrix
            .set_primaries(ColorPrimaries::Bt709, source.primaries)
            .set_color_params(source.colorspace, source.bits, !source.full_range, texture_bits)
            .set_output(contrast, black, limited_output);

        let conversion = matrix.primary_matrix().map(|primaries| PrimaryConversion {
            matrix: primaries,
            gamma_src: matrix.gamma_src(),
            gamma_dst_inv: 1.0 / matrix.gamma_dst(),
        });

        Self {
            yuv: matrix.yuv_matrix(),
            conversion,
        }
    }
}
