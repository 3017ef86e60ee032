//! Atomic modesetting context owned by the windowing layer
//!
//! The bridge never builds or commits an atomic request itself. It stages
//! properties into the request the windowing layer is assembling for the next
//! page flip.

use crate::drm_device::KmsDevice;

/// KMS objects the bridge stages properties on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsObject {
    VideoPlane,
    GuiPlane,
    Connector,
    Crtc,
}

pub trait AtomicDisplay {
    type Device: KmsDevice;

    fn device(&self) -> &Self::Device;

    /// A dedicated overlay plane is available for video
    fn has_video_plane(&self) -> bool;

    /// Whether the video plane can scan out this fourcc and modifier
    fn supports_format_and_modifier(&self, format: u32, modifier: u64) -> bool;

    fn crtc_id(&self) -> u32;

    fn supports_property(&self, object: KmsObject, name: &str) -> bool;

    /// Numeric value of a named entry of an enum property
    fn property_enum_value(&self, object: KmsObject, name: &str, value: &str) -> Option<u64>;

    /// Raw EDID of the active connector
    fn edid(&self) -> Option<Vec<u8>>;

    /// Stage a property for the next commit. Returns false if the object
    /// does not have it.
    fn add_property(&mut self, object: KmsObject, name: &str, value: u64) -> bool;

    /// Flag the next commit as a full modeset
    fn set_active(&mut self, active: bool);
}
