//! Point-in-time view of a keystore.

use callframe_crypto::{DecryptState, Environment, KeyStore};

/// Observable keystore state, taken under the store's own locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreSnapshot {
    /// Current generation.
    pub current: Option<u64>,
    /// Stored generations, ascending.
    pub generations: Vec<u64>,
    /// Highest stored generation.
    pub max_known: Option<u64>,
    /// Decrypt telemetry.
    pub decrypt: DecryptState,
}

impl KeyStoreSnapshot {
    /// Capture the state of `store`.
    pub fn from_store<E: Environment>(store: &KeyStore<E>) -> Self {
        Self {
            current: store.current().map(|(generation, _)| generation),
            generations: store.generations(),
            max_known: store.max_known_generation(),
            decrypt: store.decrypt_state(),
        }
    }
}
