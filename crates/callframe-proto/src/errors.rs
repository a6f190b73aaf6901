//! Error types for media frame header encoding and parsing.

use thiserror::Error;

/// Result alias for wire format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural errors raised while encoding or decoding a frame header.
///
/// None of these errors carry key material or payload bytes, so they are safe
/// to log verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Output buffer cannot hold the encoded header
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required for the encoded header
        needed: usize,
        /// Bytes available in the destination buffer
        available: usize,
    },

    /// Input ended before the header (or one of its extensions) was complete
    #[error("header truncated: need {needed} bytes, have {actual}")]
    HeaderTruncated {
        /// Bytes required to finish parsing the current field
        needed: usize,
        /// Bytes actually supplied
        actual: usize,
    },

    /// Version bits in the first header byte are not recognized
    #[error("unsupported header version: {0}")]
    UnsupportedVersion(u8),
}

impl ProtocolError {
    /// Returns true if the input was malformed (sender or network fault).
    ///
    /// `BufferTooSmall` is a local sizing mistake by the caller instead.
    pub fn is_malformed_input(&self) -> bool {
        match self {
            Self::HeaderTruncated { .. } | Self::UnsupportedVersion(_) => true,
            Self::BufferTooSmall { .. } => false,
        }
    }
}
