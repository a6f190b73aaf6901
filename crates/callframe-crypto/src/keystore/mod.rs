//! Group keystore for one call.
//!
//! Holds every known key generation, decides which one is current, and
//! hands out media keys and IV seeds to the encryptors and decryptors of the
//! call.
//!
//! ```text
//! signaling ──set_session_key(g, key)──▶ slots[g] = (key, HKDF(key, "media_key"))
//!                                             │
//!                  rotate() ──────────────────┤ next explicit slot, or
//!                                             │ HKDF(current, "session_key")
//!                                             ▼
//!                                  current ──▶ FrameEncryptor / FrameDecryptor
//! ```

mod listeners;
mod slot;

use std::{collections::BTreeMap, fmt, sync::Arc};

pub use listeners::{KeyChangeCallback, ListenerId};
use listeners::Listeners;
use parking_lot::{Mutex, RwLock};
use slot::KeySlot;
pub use slot::{MediaKey, SessionKey};
use zeroize::Zeroize;

use crate::{
    derivation::{KEY_SIZE, derive_fresh_session_key, derive_iv_seed},
    env::Environment,
    error::KeyStoreError,
    iv::IvSeed,
    media::MediaType,
};

/// Keystore behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStoreConfig {
    /// Ratchet the current session key forward when `rotate` finds no
    /// explicit next key. When false, every generation must be delivered by
    /// signaling.
    pub forward_secure: bool,
}

impl KeyStoreConfig {
    /// Only explicitly delivered keys are ever used.
    #[must_use]
    pub fn explicit_only() -> Self {
        Self { forward_secure: false }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self { forward_secure: true }
    }
}

/// Call-health telemetry. Both flags only ever go from false to true, until
/// the store is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptState {
    /// A decryptor bound a remote source to this store
    pub attempted: bool,
    /// A decryptor recovered at least one frame
    pub succeeded: bool,
}

struct KeyState<I> {
    slots: BTreeMap<u64, KeySlot<I>>,
    current: Option<u64>,
    salt: Vec<u8>,
    decrypt: DecryptState,
    /// Last revision handed to a slot. Survives resets.
    revision: u64,
}

impl<I: Copy> KeyState<I> {
    fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            current: None,
            salt: Vec::new(),
            decrypt: DecryptState::default(),
            revision: 0,
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision = self.revision.wrapping_add(1);
        self.revision
    }

    fn clear_keys(&mut self) {
        self.slots.clear();
        self.current = None;
        self.decrypt = DecryptState::default();
    }

    /// Drop every slot older than the one immediately preceding `current`.
    fn purge_history(&mut self) {
        let Some(current) = self.current else {
            return;
        };

        let keep_from = self.slots.range(..current).next_back().map_or(current, |(&g, _)| g);
        let kept = self.slots.split_off(&keep_from);
        let purged = std::mem::replace(&mut self.slots, kept);

        if !purged.is_empty() {
            tracing::debug!(purged = purged.len(), keep_from, "purged old key generations");
        }
    }

    fn current_slot(&self) -> Result<(u64, &KeySlot<I>), KeyStoreError> {
        let current = self.current.ok_or(KeyStoreError::NoKeys)?;
        let slot = self.slots.get(&current).ok_or(KeyStoreError::NotFound { generation: current })?;
        Ok((current, slot))
    }

    /// Lowest known generation above `current`.
    fn next_explicit(&self, current: u64) -> Option<(u64, &KeySlot<I>)> {
        let from = current.checked_add(1)?;
        self.slots.range(from..).next().map(|(&g, slot)| (g, slot))
    }
}

/// Key material and rotation state for one call.
///
/// Shared through `Arc` by every encryptor and decryptor of the call.
///
/// # Invariants
///
/// - `current` is `None` exactly when no slot is stored
/// - Only `current`, the closest generation below it, and generations above
///   it are ever retained
/// - A generation below `current` is never written again
/// - Listeners run after the internal locks are released, once per change
///   of `current`
pub struct KeyStore<E: Environment> {
    env: E,
    config: KeyStoreConfig,
    state: RwLock<KeyState<E::Instant>>,
    listeners: Mutex<Listeners>,
}

impl<E: Environment> KeyStore<E> {
    /// Create an empty store.
    pub fn new(env: E, config: KeyStoreConfig) -> Self {
        Self { env, config, state: RwLock::new(KeyState::new()), listeners: Mutex::default() }
    }

    /// Create an empty store behind an `Arc`, ready to share.
    pub fn shared(env: E, config: KeyStoreConfig) -> Arc<Self> {
        Arc::new(Self::new(env, config))
    }

    /// Configuration the store was built with.
    pub fn config(&self) -> KeyStoreConfig {
        self.config
    }

    /// Environment used for timestamps.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Set the call salt mixed into every derivation.
    ///
    /// Keys already stored keep the media keys derived under the previous
    /// salt. Set the salt before the first key.
    pub fn set_salt(&self, salt: &[u8]) -> Result<(), KeyStoreError> {
        if salt.is_empty() {
            return Err(KeyStoreError::InvalidArgument { reason: "salt is empty" });
        }

        let mut state = self.state.write();
        state.salt.zeroize();
        state.salt = salt.to_vec();
        tracing::info!(salt_len = salt.len(), "keystore salt set");
        Ok(())
    }

    /// Store the session key of `generation`.
    ///
    /// The first key of an empty store becomes current. Later generations are
    /// kept until `rotate` reaches them. Writing a different key to an
    /// existing generation repairs it in place and gives it a new revision,
    /// which makes every cached cipher for it rebuild.
    ///
    /// # Errors
    ///
    /// - `AlreadySet` if `generation` is older than current, or the same key
    ///   is already stored for it
    pub fn set_session_key(
        &self,
        generation: u64,
        session_key: &[u8; KEY_SIZE],
    ) -> Result<(), KeyStoreError> {
        if session_key.iter().all(|&b| b == 0) {
            tracing::warn!(generation, "session key is all zeroes");
        }

        let became_current = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let now = self.env.now();

            if let Some(current) = state.current
                && generation < current
            {
                tracing::info!(generation, current, "ignoring key for past generation");
                return Err(KeyStoreError::AlreadySet { generation, current });
            }

            if let Some(slot) = state.slots.get(&generation)
                && slot.holds(session_key)
            {
                let current = state.current.unwrap_or(generation);
                return Err(KeyStoreError::AlreadySet { generation, current });
            }

            let revision = state.next_revision();
            if let Some(slot) = state.slots.get_mut(&generation) {
                slot.rekey(session_key, &state.salt, now, revision);
                tracing::warn!(generation, revision, "session key replaced");
                false
            } else {
                let slot = KeySlot::new(session_key, &state.salt, now, revision);
                state.slots.insert(generation, slot);
                let first = state.current.is_none();
                if first {
                    state.current = Some(generation);
                }
                tracing::info!(generation, current = ?state.current, "session key set");
                first
            }
        };

        if became_current {
            self.notify(generation);
        }
        Ok(())
    }

    /// Hash a freshly negotiated secret into the session key of `generation`.
    ///
    /// Uses `salt` for this derivation only. The store salt is untouched.
    pub fn set_fresh_session_key(
        &self,
        generation: u64,
        secret: &[u8],
        salt: &[u8],
    ) -> Result<(), KeyStoreError> {
        if secret.is_empty() {
            return Err(KeyStoreError::InvalidArgument { reason: "secret is empty" });
        }
        if salt.is_empty() {
            return Err(KeyStoreError::InvalidArgument { reason: "salt is empty" });
        }

        let mut session_key = derive_fresh_session_key(secret, salt);
        let result = self.set_session_key(generation, &session_key);
        session_key.zeroize();
        result
    }

    /// Advance `current` one step and return the new generation.
    ///
    /// Jumps to the lowest known generation above current if there is one
    /// (this also covers jumps into a new era, e.g. 1 to 1000). Otherwise the
    /// ratchet derives `current + 1` when forward secrecy is enabled.
    ///
    /// # Errors
    ///
    /// - `NoKeys` before any key was set
    /// - `NoMoreKeys` if no next key exists and the ratchet is disabled
    pub fn rotate(&self) -> Result<u64, KeyStoreError> {
        let (previous, generation) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let (current, _) = state.current_slot()?;

            let next = match state.next_explicit(current).map(|(next, _)| next) {
                Some(next) => next,
                None if self.config.forward_secure => {
                    let next =
                        current.checked_add(1).ok_or(KeyStoreError::NoMoreKeys { current })?;
                    let revision = state.next_revision();
                    let (_, slot) = state.current_slot()?;
                    let derived = slot.ratchet(&state.salt, self.env.now(), revision);
                    state.slots.insert(next, derived);
                    next
                },
                None => {
                    tracing::debug!(current, "rotate: no next key and ratchet disabled");
                    return Err(KeyStoreError::NoMoreKeys { current });
                },
            };

            state.current = Some(next);
            state.purge_history();
            (current, next)
        };

        tracing::info!(previous, generation, "rotated key");
        self.notify(generation);
        Ok(generation)
    }

    /// Make an already known generation current.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the generation is not stored
    pub fn set_current(&self, generation: u64) -> Result<(), KeyStoreError> {
        {
            let mut state = self.state.write();
            if !state.slots.contains_key(&generation) {
                return Err(KeyStoreError::NotFound { generation });
            }
            if state.current == Some(generation) {
                return Ok(());
            }
            state.current = Some(generation);
            state.purge_history();
        }

        tracing::info!(generation, "current key set");
        self.notify(generation);
        Ok(())
    }

    /// Move `current` to the newest known generation stamped at or before
    /// `min_ts`. Never selects a key stamped after `min_ts`.
    ///
    /// Returns true while the caller should keep polling: no key yet, no key
    /// old enough yet, or a newer generation still waiting.
    pub fn rotate_by_time(&self, min_ts: E::Instant) -> bool {
        let (changed, more) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let Some(current) = state.current else {
                return true;
            };

            let latest = state
                .slots
                .range(current..)
                .rev()
                .find(|(_, slot)| slot.created_at() <= min_ts)
                .map(|(&g, _)| g);
            let Some(latest) = latest else {
                return true;
            };

            let more = state.next_explicit(latest).is_some();
            let changed = latest != current;
            if changed {
                state.current = Some(latest);
                state.purge_history();
            }
            (changed.then_some(latest), more)
        };

        if let Some(generation) = changed {
            tracing::info!(generation, min_ts = ?min_ts, "rotated key by time");
            self.notify(generation);
        }
        more
    }

    /// Current generation and the time its key was stored.
    pub fn current(&self) -> Option<(u64, E::Instant)> {
        let state = self.state.read();
        state.current_slot().ok().map(|(g, slot)| (g, slot.created_at()))
    }

    /// Media key of the current generation.
    pub fn current_media_key(&self) -> Result<MediaKey, KeyStoreError> {
        let state = self.state.read();
        let (generation, slot) = state.current_slot()?;
        Ok(slot.media_key(generation))
    }

    /// Media key of a specific generation.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the generation was purged or never set
    pub fn media_key(&self, generation: u64) -> Result<MediaKey, KeyStoreError> {
        let state = self.state.read();
        state
            .slots
            .get(&generation)
            .map(|slot| slot.media_key(generation))
            .ok_or(KeyStoreError::NotFound { generation })
    }

    /// Timestamp of a stored generation. Changes when the key is repaired.
    pub fn key_created_at(&self, generation: u64) -> Option<E::Instant> {
        self.state.read().slots.get(&generation).map(KeySlot::created_at)
    }

    /// Revision of a stored generation's key material.
    ///
    /// Strictly increases whenever the generation is stored or repaired,
    /// including repairs within one clock tick and slots recreated after a
    /// reset. Cached ciphers compare it to decide whether to rebuild.
    pub fn key_revision(&self, generation: u64) -> Option<u64> {
        self.state.read().slots.get(&generation).map(KeySlot::revision)
    }

    /// Current generation and the revision of its key material.
    pub fn current_revision(&self) -> Option<(u64, u64)> {
        let state = self.state.read();
        state.current_slot().ok().map(|(g, slot)| (g, slot.revision()))
    }

    /// Media key of the generation `rotate` would move to, without rotating.
    ///
    /// Lets a receiver decrypt frames from a sender that already rotated
    /// before the local rotation arrived. The ratcheted key is computed on
    /// the fly and not stored.
    pub fn next_media_key(&self) -> Result<MediaKey, KeyStoreError> {
        let state = self.state.read();
        let (current, slot) = state.current_slot()?;

        if let Some((next, next_slot)) = state.next_explicit(current) {
            return Ok(next_slot.media_key(next));
        }

        let next = current.checked_add(1).ok_or(KeyStoreError::NoMoreKeys { current })?;
        if !self.config.forward_secure {
            return Err(KeyStoreError::NotFound { generation: next });
        }
        Ok(MediaKey::new(next, slot.peek_next_media_key(&state.salt)))
    }

    /// Session key of the current generation.
    pub fn current_session_key(&self) -> Result<SessionKey, KeyStoreError> {
        let state = self.state.read();
        let (generation, slot) = state.current_slot()?;
        Ok(slot.session_key(generation))
    }

    /// Session key of the next explicitly delivered generation.
    pub fn next_session_key(&self) -> Result<SessionKey, KeyStoreError> {
        let state = self.state.read();
        let current = state.current.ok_or(KeyStoreError::NoKeys)?;
        state
            .next_explicit(current)
            .map(|(g, slot)| slot.session_key(g))
            .ok_or(KeyStoreError::NotFound { generation: current.saturating_add(1) })
    }

    /// Highest generation currently stored.
    pub fn max_known_generation(&self) -> Option<u64> {
        self.state.read().slots.keys().next_back().copied()
    }

    /// True once any key is stored.
    pub fn has_keys(&self) -> bool {
        !self.state.read().slots.is_empty()
    }

    /// Number of generations currently stored.
    pub fn retained_generations(&self) -> usize {
        self.state.read().slots.len()
    }

    /// Stored generations, ascending.
    pub fn generations(&self) -> Vec<u64> {
        self.state.read().slots.keys().copied().collect()
    }

    /// IV seed of one participant's stream.
    ///
    /// Deterministic in (salt, participant, media type) for the life of the
    /// salt.
    pub fn generate_iv(&self, participant_id: &[u8], media: MediaType) -> IvSeed {
        let state = self.state.read();
        IvSeed::from_bytes(derive_iv_seed(&state.salt, participant_id, media.iv_label()))
    }

    /// Record that a decryptor bound a remote source.
    pub fn mark_decrypt_attempted(&self) {
        let mut state = self.state.write();
        if !state.decrypt.attempted {
            state.decrypt.attempted = true;
            tracing::info!("first decrypt attempted");
        }
    }

    /// Record that a decryptor recovered a frame.
    pub fn mark_decrypt_succeeded(&self) {
        let mut state = self.state.write();
        if !state.decrypt.succeeded {
            state.decrypt.succeeded = true;
            tracing::info!("first decrypt succeeded");
        }
    }

    /// Current call-health telemetry.
    pub fn decrypt_state(&self) -> DecryptState {
        self.state.read().decrypt
    }

    /// Register a callback for changes of the current generation.
    pub fn add_listener(&self, callback: impl Fn(u64) + Send + Sync + 'static) -> ListenerId {
        self.listeners.lock().add(Arc::new(callback))
    }

    /// Unregister a callback. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.lock().remove(id)
    }

    /// Drop all keys, the salt, and telemetry.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.clear_keys();
        state.salt.zeroize();
        state.salt.clear();
        tracing::info!("keystore reset");
    }

    /// Drop all keys and telemetry but keep the salt.
    pub fn reset_keys(&self) {
        self.state.write().clear_keys();
        tracing::info!("keystore keys reset");
    }

    fn notify(&self, generation: u64) {
        let callbacks = self.listeners.lock().snapshot();
        for callback in callbacks {
            callback(generation);
        }
    }
}

impl<E: Environment> fmt::Debug for KeyStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("KeyStore")
            .field("current", &state.current)
            .field("generations", &state.slots.keys().collect::<Vec<_>>())
            .field("forward_secure", &self.config.forward_secure)
            .field("decrypt", &state.decrypt)
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::env::testing::ManualEnv;

    const SALT: &[u8] = b"CALL_ID";
    const B1: [u8; KEY_SIZE] = [0xAA; KEY_SIZE];
    const B2: [u8; KEY_SIZE] = [0xBB; KEY_SIZE];
    const B3: [u8; KEY_SIZE] = [0xCC; KEY_SIZE];

    fn store(config: KeyStoreConfig) -> KeyStore<ManualEnv> {
        let store = KeyStore::new(ManualEnv::default(), config);
        store.set_salt(SALT).unwrap();
        store
    }

    fn current_generation(store: &KeyStore<ManualEnv>) -> u64 {
        store.current().unwrap().0
    }

    #[test]
    fn set_single_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();

        let session = ks.current_session_key().unwrap();
        assert_eq!(session.generation(), 0);
        assert_eq!(session.key(), &B1);
        assert!(ks.media_key(0).is_ok());
        assert_ne!(ks.media_key(0).unwrap().key(), &B1, "media key is derived");
    }

    #[test]
    fn empty_store_has_nothing() {
        let ks = store(KeyStoreConfig::default());

        assert!(!ks.has_keys());
        assert_eq!(ks.current(), None);
        assert_eq!(ks.max_known_generation(), None);
        assert_eq!(ks.rotate(), Err(KeyStoreError::NoKeys));
        assert_eq!(ks.current_media_key().unwrap_err(), KeyStoreError::NoKeys);
        assert_eq!(ks.next_media_key().unwrap_err(), KeyStoreError::NoKeys);
    }

    #[test]
    fn reset_allows_generation_zero_again() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(1, &B1).unwrap();
        assert_eq!(ks.rotate(), Ok(1));

        ks.reset();
        assert!(!ks.has_keys());

        ks.set_session_key(0, &B1).unwrap();
        let session = ks.current_session_key().unwrap();
        assert_eq!(session.generation(), 0);
        assert_eq!(session.key(), &B1);
    }

    #[test]
    fn rotate_one() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();

        assert_eq!(ks.rotate(), Ok(1));
        assert_eq!(current_generation(&ks), 1);
    }

    #[test]
    fn change_era() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        assert_eq!(ks.rotate(), Ok(1));

        ks.set_session_key(1000, &B1).unwrap();
        assert_eq!(current_generation(&ks), 1, "future key must not become current");
        assert_eq!(ks.max_known_generation(), Some(1000));

        assert_eq!(ks.rotate(), Ok(1000));
        assert_eq!(ks.current_session_key().unwrap().key(), &B1);
    }

    #[test]
    fn simple_sync() {
        let ks1 = store(KeyStoreConfig::default());
        let ks2 = store(KeyStoreConfig::default());
        ks1.set_session_key(0, &B1).unwrap();
        ks2.set_session_key(0, &B1).unwrap();

        for i in 1..10 {
            assert_eq!(ks1.rotate(), Ok(i));
            assert_eq!(ks2.rotate(), Ok(i));

            assert_eq!(
                ks1.current_session_key().unwrap().key(),
                ks2.current_session_key().unwrap().key()
            );
            assert_eq!(ks1.media_key(i).unwrap().key(), ks2.media_key(i).unwrap().key());
        }
    }

    #[test]
    fn offset_sync() {
        let ks1 = store(KeyStoreConfig::default());
        let ks2 = store(KeyStoreConfig::default());
        ks1.set_session_key(0, &B1).unwrap();
        ks1.rotate().unwrap();
        ks1.rotate().unwrap();

        let session = ks1.current_session_key().unwrap();
        ks2.set_session_key(session.generation(), session.key()).unwrap();

        for _ in 1..10 {
            let a = ks1.current_session_key().unwrap();
            let b = ks2.current_session_key().unwrap();
            assert_eq!(a.generation(), b.generation());
            assert_eq!(a.key(), b.key());

            ks1.rotate().unwrap();
            ks2.rotate().unwrap();
        }
    }

    #[test]
    fn overwrite_current_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        let (_, ts1) = ks.current().unwrap();
        let media1 = ks.current_media_key().unwrap();

        ks.env().advance(Duration::from_millis(100));
        ks.set_session_key(0, &B2).unwrap();

        let (generation, ts2) = ks.current().unwrap();
        assert_eq!(generation, 0);
        assert_ne!(ts1, ts2, "repair must refresh the timestamp");
        assert_eq!(ks.current_session_key().unwrap().key(), &B2);
        assert_ne!(ks.current_media_key().unwrap().key(), media1.key());
    }

    #[test]
    fn repair_within_one_tick_changes_revision() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        let (_, ts1) = ks.current().unwrap();
        let (_, rev1) = ks.current_revision().unwrap();

        ks.set_session_key(0, &B2).unwrap();

        let (_, ts2) = ks.current().unwrap();
        let (generation, rev2) = ks.current_revision().unwrap();
        assert_eq!(ts1, ts2);
        assert_eq!(generation, 0);
        assert!(rev2 > rev1);
        assert_eq!(ks.key_revision(0), Some(rev2));
        assert_eq!(ks.current_media_key().unwrap().revision(), Some(rev2));
    }

    #[test]
    fn revisions_are_never_reused_after_reset() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.rotate().unwrap();
        let (_, before) = ks.current_revision().unwrap();

        ks.reset_keys();
        ks.set_session_key(1, &B1).unwrap();

        let (_, after) = ks.current_revision().unwrap();
        assert!(after > before);
        assert_eq!(ks.key_revision(0), None);
    }

    #[test]
    fn overwrite_future_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(100, &B2).unwrap();
        assert_eq!(current_generation(&ks), 0);

        ks.env().advance(Duration::from_millis(100));
        ks.set_session_key(1, &B3).unwrap();
        assert_eq!(current_generation(&ks), 0);

        assert_eq!(ks.rotate(), Ok(1));
        assert_eq!(ks.current_session_key().unwrap().key(), &B3);
    }

    #[test]
    fn set_same_key_is_rejected() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        let media = ks.current_media_key().unwrap();

        assert_eq!(
            ks.set_session_key(0, &B1),
            Err(KeyStoreError::AlreadySet { generation: 0, current: 0 })
        );
        assert_eq!(ks.current_session_key().unwrap().key(), &B1);
        assert_eq!(ks.current_media_key().unwrap().key(), media.key());
    }

    #[test]
    fn ignore_old_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(1, &B2).unwrap();
        assert_eq!(current_generation(&ks), 0);

        assert_eq!(ks.rotate(), Ok(1));
        assert_eq!(ks.current_session_key().unwrap().key(), &B2);

        assert_eq!(
            ks.set_session_key(0, &B3),
            Err(KeyStoreError::AlreadySet { generation: 0, current: 1 })
        );
        assert_eq!(current_generation(&ks), 1);
    }

    #[test]
    fn retention_keeps_one_previous_generation() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();

        ks.rotate().unwrap();
        assert!(ks.media_key(0).is_ok(), "previous generation is retained");

        ks.rotate().unwrap();
        assert_eq!(ks.media_key(0).unwrap_err(), KeyStoreError::NotFound { generation: 0 });
        assert!(ks.media_key(1).is_ok());
        assert!(ks.media_key(2).is_ok());
        assert_eq!(ks.retained_generations(), 2);
    }

    #[test]
    fn era_jump_retains_previous_era_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.rotate().unwrap();
        ks.set_session_key(1000, &B2).unwrap();
        ks.rotate().unwrap();

        assert!(ks.media_key(1).is_ok());
        assert!(ks.media_key(0).is_err());
    }

    #[test]
    fn explicit_only_runs_out_of_keys() {
        let ks = store(KeyStoreConfig::explicit_only());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(1, &B2).unwrap();
        ks.set_session_key(2, &B3).unwrap();

        assert_eq!(ks.rotate(), Ok(1));
        assert_eq!(ks.rotate(), Ok(2));
        assert_eq!(ks.rotate(), Err(KeyStoreError::NoMoreKeys { current: 2 }));
        assert_eq!(current_generation(&ks), 2);
    }

    #[test]
    fn next_media_key_matches_rotation() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(5, &B1).unwrap();

        let peeked = ks.next_media_key().unwrap();
        assert_eq!(peeked.generation(), 6);
        assert_eq!(ks.max_known_generation(), Some(5), "peek must not store");

        ks.rotate().unwrap();
        assert_eq!(ks.current_media_key().unwrap().key(), peeked.key());
    }

    #[test]
    fn next_media_key_prefers_explicit_key() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(7, &B2).unwrap();

        let next = ks.next_media_key().unwrap();
        assert_eq!(next.generation(), 7);
        assert_eq!(next.key(), ks.media_key(7).unwrap().key());
    }

    #[test]
    fn next_media_key_without_ratchet() {
        let ks = store(KeyStoreConfig::explicit_only());
        ks.set_session_key(0, &B1).unwrap();

        assert_eq!(ks.next_media_key().unwrap_err(), KeyStoreError::NotFound { generation: 1 });
    }

    #[test]
    fn next_session_key_only_reports_explicit_keys() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        assert!(ks.next_session_key().is_err());

        ks.set_session_key(3, &B2).unwrap();
        let next = ks.next_session_key().unwrap();
        assert_eq!(next.generation(), 3);
        assert_eq!(next.key(), &B2);
    }

    #[test]
    fn set_current_jumps_to_known_generation() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(4, &B2).unwrap();
        ks.set_session_key(9, &B3).unwrap();

        ks.set_current(9).unwrap();
        assert_eq!(current_generation(&ks), 9);
        assert!(ks.media_key(0).is_err(), "only one generation below current survives");
        assert!(ks.media_key(4).is_ok());

        assert_eq!(ks.set_current(5), Err(KeyStoreError::NotFound { generation: 5 }));
    }

    #[test]
    fn fresh_session_key_is_hashed() {
        let ks = store(KeyStoreConfig::default());
        ks.set_fresh_session_key(0, b"negotiated secret", b"conv-id").unwrap();

        let session = ks.current_session_key().unwrap();
        assert_eq!(session.key(), &derive_fresh_session_key(b"negotiated secret", b"conv-id"));
    }

    #[test]
    fn fresh_session_key_rejects_empty_input() {
        let ks = store(KeyStoreConfig::default());

        assert!(ks.set_fresh_session_key(0, b"", b"salt").unwrap_err().is_fatal());
        assert!(ks.set_fresh_session_key(0, b"secret", b"").unwrap_err().is_fatal());
        assert!(!ks.has_keys());
    }

    #[test]
    fn empty_salt_is_rejected() {
        let ks = store(KeyStoreConfig::default());
        assert!(matches!(ks.set_salt(b""), Err(KeyStoreError::InvalidArgument { .. })));
    }

    #[test]
    fn rotate_by_time_respects_min_ts() {
        let ks = store(KeyStoreConfig::default());
        assert!(ks.rotate_by_time(Duration::ZERO), "empty store keeps polling");

        ks.set_session_key(0, &B1).unwrap();
        ks.env().advance(Duration::from_secs(1));
        ks.set_session_key(1, &B2).unwrap();
        ks.env().advance(Duration::from_secs(1));
        ks.set_session_key(2, &B3).unwrap();

        assert!(ks.rotate_by_time(Duration::from_millis(500)), "newer keys are waiting");
        assert_eq!(current_generation(&ks), 0);

        assert!(ks.rotate_by_time(Duration::from_millis(1500)));
        assert_eq!(current_generation(&ks), 1);

        assert!(!ks.rotate_by_time(Duration::from_secs(5)), "nothing newer left");
        assert_eq!(current_generation(&ks), 2);
    }

    #[test]
    fn rotate_by_time_can_skip_generations() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(1, &B2).unwrap();
        ks.set_session_key(2, &B3).unwrap();

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        ks.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!ks.rotate_by_time(ks.env().now()));
        assert_eq!(current_generation(&ks), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_fire_once_per_change() {
        let ks = store(KeyStoreConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = ks.add_listener(move |generation| sink.lock().push(generation));

        ks.set_session_key(0, &B1).unwrap();
        ks.set_session_key(3, &B2).unwrap();
        ks.set_session_key(0, &B2).unwrap();
        let _ = ks.set_session_key(0, &B2);
        ks.rotate().unwrap();
        ks.set_current(3).unwrap();

        assert_eq!(*seen.lock(), vec![0, 3]);

        assert!(ks.remove_listener(id));
        ks.rotate().unwrap();
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn listener_can_reenter_store() {
        let ks = Arc::new(store(KeyStoreConfig::default()));
        let observed = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&ks);
        let sink = Arc::clone(&observed);
        ks.add_listener(move |_| {
            if let Some(ks) = weak.upgrade() {
                *sink.lock() = ks.current_media_key().ok().map(|k| k.generation());
            }
        });

        ks.set_session_key(0, &B1).unwrap();
        ks.rotate().unwrap();

        assert_eq!(*observed.lock(), Some(1));
    }

    #[test]
    fn decrypt_state_is_sticky_until_reset() {
        let ks = store(KeyStoreConfig::default());
        assert_eq!(ks.decrypt_state(), DecryptState::default());

        ks.mark_decrypt_attempted();
        ks.mark_decrypt_succeeded();
        ks.mark_decrypt_attempted();
        assert_eq!(ks.decrypt_state(), DecryptState { attempted: true, succeeded: true });

        ks.reset_keys();
        assert_eq!(ks.decrypt_state(), DecryptState::default());
    }

    #[test]
    fn reset_keys_keeps_salt() {
        let ks = store(KeyStoreConfig::default());
        let iv_before = ks.generate_iv(b"alice", MediaType::Audio);
        ks.set_session_key(0, &B1).unwrap();
        let media_before = ks.current_media_key().unwrap();

        ks.reset_keys();
        assert!(!ks.has_keys());
        assert_eq!(ks.generate_iv(b"alice", MediaType::Audio), iv_before);

        ks.set_session_key(0, &B1).unwrap();
        assert_eq!(ks.current_media_key().unwrap().key(), media_before.key());

        ks.reset();
        assert_ne!(ks.generate_iv(b"alice", MediaType::Audio), iv_before, "reset drops salt");
    }

    #[test]
    fn iv_seeds_differ_per_stream_and_participant() {
        let ks = store(KeyStoreConfig::default());

        let audio = ks.generate_iv(b"alice", MediaType::Audio);
        assert_eq!(audio, ks.generate_iv(b"alice", MediaType::Audio));
        assert_ne!(audio, ks.generate_iv(b"alice", MediaType::Video));
        assert_ne!(audio, ks.generate_iv(b"bob", MediaType::Audio));
    }

    #[test]
    fn debug_lists_generations_only() {
        let ks = store(KeyStoreConfig::default());
        ks.set_session_key(2, &B1).unwrap();

        let rendered = format!("{ks:?}");
        assert!(rendered.contains("current: Some(2)"));
        assert!(!rendered.contains("170"), "key bytes must not be printed");
    }
}
