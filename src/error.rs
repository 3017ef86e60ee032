//! Error types for the DRM PRIME renderer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{op} failed: {source}")]
    Kernel {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("EGL error: {0}")]
    Egl(String),

    #[error("GL error: {0}")]
    Gl(String),

    #[error("invalid video buffer: {0}")]
    InvalidBuffer(String),

    #[error("buffer has no DRM frame descriptor")]
    NoDescriptor,

    #[error("buffer slot {0} out of range")]
    SlotOutOfRange(usize),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
