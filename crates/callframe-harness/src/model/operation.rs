//! Operations for model-based testing.
//!
//! Operations are the signaling-side calls a keystore receives during a
//! call. They are generated randomly by proptest and applied to both the
//! model and the real [`callframe_crypto::KeyStore`].

use arbitrary::Arbitrary;

/// Key generation (u8 keeps the search space small and collisions frequent).
pub type ModelGeneration = u8;

/// Operations that can be applied to a keystore.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Signaling delivers a session key.
    SetKey {
        /// Target generation.
        generation: ModelGeneration,
        /// Key fill byte (the raw key is 32 copies of it).
        key: u8,
    },

    /// Advance to the next generation.
    Rotate,

    /// Jump to a stored generation.
    SetCurrent {
        /// Target generation.
        generation: ModelGeneration,
    },

    /// Pick the newest key at least `lag_millis` old.
    RotateByTime {
        /// Distance of the cutoff behind the current time.
        lag_millis: u16,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },

    /// Drop all keys, keep the salt.
    ResetKeys,

    /// Drop all keys and the salt.
    Reset,
}

impl Operation {
    /// Raw session key for a fill byte.
    pub fn raw_key(key: u8) -> [u8; 32] {
        [key; 32]
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Rotation moved to this generation.
    Rotated(u64),

    /// `rotate_by_time` return value.
    KeepPolling(bool),

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Past generation, or identical key already stored.
    AlreadySet,

    /// Generation not stored.
    NotFound,

    /// Store is empty.
    NoKeys,

    /// No next key and ratchet disabled.
    NoMoreKeys,

    /// Caller passed unusable input.
    InvalidArgument,
}

impl OperationError {
    /// Map a real keystore error onto its model counterpart.
    pub fn from_store(err: &callframe_crypto::KeyStoreError) -> Self {
        use callframe_crypto::KeyStoreError;

        match err {
            KeyStoreError::AlreadySet { .. } => Self::AlreadySet,
            KeyStoreError::NotFound { .. } => Self::NotFound,
            KeyStoreError::NoKeys => Self::NoKeys,
            KeyStoreError::NoMoreKeys { .. } => Self::NoMoreKeys,
            KeyStoreError::InvalidArgument { .. } => Self::InvalidArgument,
        }
    }

    /// Whether the real error class is fatal to the call.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::InvalidArgument)
    }
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}
