use std::io;

use thiserror::Error;

pub type CrackResult<T> = std::result::Result<T, CrackError>;

#[derive(Error, Debug)]
pub enum CrackError {
    #[error(
        "Unable to access the file at the given path. Make sure the right permissions are available"
    )]
    Io(#[from] io::Error),

    #[error("Failed to serialize the probability tables")]
    Serialize,

    #[error("Failed to deserialize the probability tables. Is the file corrupted?")]
    Deserialize,

    #[error("Only keyspaces up to 2^64 are supported, but the requested one needs at least 2^{0}")]
    Space(u8),

    #[error("The start index {start} is greater than the end index {end}")]
    StartAfterEnd { start: u64, end: u64 },

    #[error("No value was provided for {0}")]
    MissingParameter(&'static str),

    #[error("Invalid node {min}-{max}/{count}")]
    Node { min: u32, max: u32, count: u32 },

    #[error("{ciphertext} is not a valid {format} ciphertext")]
    InvalidCiphertext {
        format: &'static str,
        ciphertext: String,
    },

    #[error("Malformed statistics at line {line}: {reason}")]
    Stats { line: usize, reason: String },

    #[error("Malformed session state: {0}")]
    State(String),

    #[error("Unknown format {0}")]
    UnknownFormat(String),

    #[error("The format is used before being initialized")]
    NotInitialized,

    #[error("The digest buffer does not match the digest size of {0}")]
    DigestSize(&'static str),

    #[error("The compute device failed: {0}")]
    Device(String),

    #[error("The cracking thread panicked")]
    Panicked,

    #[error("No compatible GPU was found")]
    NoGpu,

    #[error("Self test failed for {format}: {reason}")]
    SelfTest {
        format: &'static str,
        reason: String,
    },

    #[cfg(feature = "wgpu")]
    #[error("Failed to map a device buffer")]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    #[cfg(feature = "wgpu")]
    #[error("Failed to open the wgpu device")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}
