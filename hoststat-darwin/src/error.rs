//! Error types for the kernel decoders.

use thiserror::Error;

/// Result type alias using [`StatError`].
pub type Result<T> = std::result::Result<T, StatError>;

/// Errors surfaced by the decoders.
///
/// Every public read operation is all-or-nothing: it either returns a fully
/// decoded value or one of these.
#[derive(Error, Debug)]
pub enum StatError {
    /// The kernel does not know the named attribute.
    #[error("sysctl attribute not found: {name}")]
    AttributeNotFound { name: String },

    /// The kernel rejected the attribute query for another reason.
    #[error("sysctl {name} failed: {source}")]
    Sysctl {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The kernel returned fewer bytes than the destination shape needs.
    #[error("buffer too short for {shape}: need {needed} bytes, got {actual}")]
    BufferTooShort {
        shape: &'static str,
        needed: usize,
        actual: usize,
    },

    /// A decode routine read a field its layout does not declare at that position.
    #[error("layout {layout} has no field {field} at this position")]
    LayoutMismatch {
        layout: &'static str,
        field: &'static str,
    },

    /// A kernel struct carries a version this decoder was not written for.
    #[error("{layout} version {found:#x} is not the supported {expected:#x}")]
    LayoutVersion {
        layout: &'static str,
        expected: u32,
        found: u32,
    },

    /// A Mach introspection or statistics call returned a non-success status.
    #[error("{call} failed with kern_return_t {code}")]
    KernelCallFailed { call: &'static str, code: i32 },

    /// `getfsstat` reported an error.
    #[error("filesystem statistics collection failed: {0}")]
    StatCollectionFailed(#[source] std::io::Error),

    /// A usage percentage would divide by a zero total.
    #[error("invalid memory total: 0 bytes ({0})")]
    InvalidMemoryTotal(&'static str),

    /// Boot time could not be read, so host identity cannot be assembled.
    #[error("boot time unavailable: {0}")]
    BootTimeUnavailable(#[source] Box<StatError>),

    /// The process hostname could not be determined.
    #[error("hostname lookup failed: {0}")]
    Hostname(#[source] std::io::Error),

    /// An external tool could not be run or did not succeed.
    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// The facility is not available on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl StatError {
    /// Create a buffer-too-short error.
    pub fn too_short(shape: &'static str, needed: usize, actual: usize) -> Self {
        Self::BufferTooShort {
            shape,
            needed,
            actual,
        }
    }

    /// Whether the error names a missing sysctl attribute.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AttributeNotFound { .. })
    }
}
