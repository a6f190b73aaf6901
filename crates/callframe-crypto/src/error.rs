//! Error types for key bookkeeping and frame protection

use callframe_proto::ProtocolError;
use thiserror::Error;

/// Errors from [`crate::KeyStore`] operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyStoreError {
    /// Caller passed unusable input (empty salt, empty secret)
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the input
        reason: &'static str,
    },

    /// Write rejected: the generation is in the past, or the identical key
    /// is already stored
    #[error("key for generation {generation} already set (current {current})")]
    AlreadySet {
        /// Generation the caller tried to write
        generation: u64,
        /// Current generation at the time of the write
        current: u64,
    },

    /// Generation was purged or never set
    #[error("no key for generation {generation}")]
    NotFound {
        /// Requested generation
        generation: u64,
    },

    /// The store has not received any key material yet
    #[error("keystore holds no keys")]
    NoKeys,

    /// Ratchet disabled and no explicit next key is known
    #[error("no more keys after generation {current}")]
    NoMoreKeys {
        /// Generation that stays current
        current: u64,
    },
}

impl KeyStoreError {
    /// Returns true if this error is fatal to the call.
    ///
    /// Only programmer errors are fatal. Bookkeeping conflicts and missing
    /// keys are logged and the call continues.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidArgument { .. } => true,

            Self::AlreadySet { .. }
            | Self::NotFound { .. }
            | Self::NoKeys
            | Self::NoMoreKeys { .. } => false,
        }
    }
}

/// Errors from [`crate::FrameEncryptor`] and [`crate::FrameDecryptor`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameCryptoError {
    /// Key material or source identity is not available yet.
    ///
    /// Drop the frame and try again with the next one.
    #[error("not ready: {reason}")]
    NotReady {
        /// What is missing
        reason: &'static str,
    },

    /// Authentication tag mismatch. The frame was forged, corrupted, or
    /// protected under a different key.
    #[error("integrity check failed for frame {frame_id} (generation {generation})")]
    IntegrityFailure {
        /// Frame counter from the header
        frame_id: u64,
        /// Key generation from the header
        generation: u64,
    },

    /// Frame ends before the authentication tag
    #[error("frame too short: need at least {minimum} bytes, got {actual}")]
    FrameTooShort {
        /// Header length plus tag length
        minimum: usize,
        /// Bytes received
        actual: usize,
    },

    /// AEAD refused to seal the frame
    #[error("encryption failed for generation {generation}")]
    EncryptionFailed {
        /// Generation of the discarded cipher
        generation: u64,
    },

    /// Header could not be encoded or parsed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Key bookkeeping failure
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

impl FrameCryptoError {
    /// Returns true if the next frame may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady { .. } => true,
            Self::KeyStore(err) => !err.is_fatal(),

            Self::IntegrityFailure { .. }
            | Self::FrameTooShort { .. }
            | Self::EncryptionFailed { .. }
            | Self::Protocol(_) => false,
        }
    }

    /// Returns true for failures that indicate tampering.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::IntegrityFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_is_fatal() {
        let err = KeyStoreError::InvalidArgument { reason: "empty salt" };
        assert!(err.is_fatal());
    }

    #[test]
    fn bookkeeping_errors_are_not_fatal() {
        assert!(!KeyStoreError::AlreadySet { generation: 0, current: 1 }.is_fatal());
        assert!(!KeyStoreError::NotFound { generation: 3 }.is_fatal());
        assert!(!KeyStoreError::NoKeys.is_fatal());
        assert!(!KeyStoreError::NoMoreKeys { current: 2 }.is_fatal());
    }

    #[test]
    fn not_ready_is_retryable() {
        let err = FrameCryptoError::NotReady { reason: "no key" };
        assert!(err.is_retryable());
        assert!(!err.is_integrity_failure());
    }

    #[test]
    fn integrity_failure_is_not_retryable() {
        let err = FrameCryptoError::IntegrityFailure { frame_id: 9, generation: 2 };
        assert!(!err.is_retryable());
        assert!(err.is_integrity_failure());
    }

    #[test]
    fn malformed_header_is_not_retryable() {
        let err: FrameCryptoError =
            ProtocolError::HeaderTruncated { needed: 3, actual: 1 }.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = KeyStoreError::AlreadySet { generation: 0, current: 1 };
        assert_eq!(err.to_string(), "key for generation 0 already set (current 1)");

        let err = FrameCryptoError::IntegrityFailure { frame_id: 7, generation: 3 };
        assert_eq!(err.to_string(), "integrity check failed for frame 7 (generation 3)");
    }
}
