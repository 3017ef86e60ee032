//! Sink capabilities from the connector's EDID
//!
//! Only the CTA-861 extension data blocks that gate HDR output are read: the
//! Colorimetry block and the HDR Static Metadata block.

use tracing::{debug, warn};

const EDID_BLOCK_SIZE: usize = 128;
const EDID_HEADER: [u8; 8] = [0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];
const EDID_EXTENSION_COUNT: usize = 126;

const CTA_EXTENSION_TAG: u8 = 0x02;
const CTA_DATA_BLOCK_OFFSET: usize = 4;
const CTA_TAG_EXTENDED: u8 = 7;
const CTA_EXT_COLORIMETRY: u8 = 5;
const CTA_EXT_HDR_STATIC_METADATA: u8 = 6;

/// Connector `Colorspace` names and the colorimetry bit each one needs
const COLORIMETRY_BITS: [(&str, u16); 10] = [
    ("XVYCC_601", 1 << 0),
    ("XVYCC_709", 1 << 1),
    ("SYCC_601", 1 << 2),
    ("opYCC_601", 1 << 3),
    ("opRGB", 1 << 4),
    ("BT2020_CYCC", 1 << 5),
    ("BT2020_YCC", 1 << 6),
    ("BT2020_RGB", 1 << 7),
    ("DCI-P3_RGB_D65", 1 << 15),
    ("DCI-P3_RGB_Theater", 1 << 15),
];

/// What the attached sink can display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCapabilities {
    colorimetry: u16,
    eotfs: u8,
}

impl SinkCapabilities {
    /// Parse raw EDID bytes. Anything unreadable yields no capabilities.
    pub fn parse(edid: &[u8]) -> Self {
        let mut caps = Self::default();

        if edid.len() < EDID_BLOCK_SIZE || edid[..8] != EDID_HEADER {
            warn!("Ignoring malformed EDID ({} bytes)", edid.len());
            return caps;
        }

        let extensions = edid[EDID_EXTENSION_COUNT] as usize;
        for block in edid.chunks_exact(EDID_BLOCK_SIZE).skip(1).take(extensions) {
            if block[0] == CTA_EXTENSION_TAG {
                caps.parse_cta(block);
            }
        }

        debug!(
            "EDID colorimetry=0x{:04x} eotfs=0x{:02x}",
            caps.colorimetry, caps.eotfs
        );
        caps
    }

    fn parse_cta(&mut self, block: &[u8]) {
        let end = match block[2] as usize {
            0 => return,
            dtd if dtd < CTA_DATA_BLOCK_OFFSET => return,
            dtd => dtd.min(EDID_BLOCK_SIZE - 1),
        };

        let mut pos = CTA_DATA_BLOCK_OFFSET;
        while pos < end {
            let header = block[pos];
            let tag = header >> 5;
            let len = (header & 0x1f) as usize;
            let payload_end = pos + 1 + len;
            if payload_end > end {
                warn!("CTA data block at {} overruns the block", pos);
                return;
            }
            let payload = &block[pos + 1..payload_end];

            if tag == CTA_TAG_EXTENDED && !payload.is_empty() {
                match payload[0] {
                    CTA_EXT_COLORIMETRY if payload.len() >= 3 => {
                        self.colorimetry = payload[1] as u16 | ((payload[2] & 0x80) as u16) << 8;
                    }
                    CTA_EXT_HDR_STATIC_METADATA if payload.len() >= 2 => {
                        self.eotfs = payload[1] & 0x3f;
                    }
                    _ => {}
                }
            }
            pos = payload_end;
        }
    }

    /// `name` is a connector `Colorspace` enum name; `Default` always passes
    pub fn supports_colorimetry(&self, name: &str) -> bool {
        if name == "Default" {
            return true;
        }
        COLORIMETRY_BITS
            .iter()
            .find(|(n, _)| *n == name)
            .is_some_and(|(_, bit)| self.colorimetry & bit != 0)
    }

    /// `eotf` is the CTA-861 EOTF code (0 SDR, 1 HDR gamma, 2 PQ, 3 HLG)
    pub fn supports_eotf(&self, eotf: u8) -> bool {
        eotf < 6 && self.eotfs & (1 << eotf) != 0
    }
}
