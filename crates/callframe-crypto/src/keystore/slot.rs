//! Key material for one generation.

use std::fmt;

use zeroize::Zeroize;

use crate::derivation::{KEY_SIZE, derive_media_key, derive_next_session_key};

/// Session key and derived media key of one generation.
///
/// Both keys are zeroized when the slot is purged or the store is dropped.
///
/// `revision` identifies the key material: the store hands out a new,
/// strictly larger revision whenever a slot is created or repaired.
pub(crate) struct KeySlot<I> {
    session_key: [u8; KEY_SIZE],
    media_key: [u8; KEY_SIZE],
    created_at: I,
    revision: u64,
}

impl<I: Copy> KeySlot<I> {
    pub(crate) fn new(
        session_key: &[u8; KEY_SIZE],
        salt: &[u8],
        created_at: I,
        revision: u64,
    ) -> Self {
        Self {
            session_key: *session_key,
            media_key: derive_media_key(session_key, salt),
            created_at,
            revision,
        }
    }

    /// Replace the key material in place (key repair).
    pub(crate) fn rekey(
        &mut self,
        session_key: &[u8; KEY_SIZE],
        salt: &[u8],
        now: I,
        revision: u64,
    ) {
        debug_assert!(revision > self.revision);
        self.session_key.zeroize();
        self.media_key.zeroize();
        self.session_key = *session_key;
        self.media_key = derive_media_key(session_key, salt);
        self.created_at = now;
        self.revision = revision;
    }

    /// Slot one ratchet step ahead.
    pub(crate) fn ratchet(&self, salt: &[u8], now: I, revision: u64) -> Self {
        let mut next = derive_next_session_key(&self.session_key, salt);
        let slot = Self::new(&next, salt, now, revision);
        next.zeroize();
        slot
    }

    /// Media key one ratchet step ahead, without keeping the session key.
    pub(crate) fn peek_next_media_key(&self, salt: &[u8]) -> [u8; KEY_SIZE] {
        let mut next = derive_next_session_key(&self.session_key, salt);
        let media_key = derive_media_key(&next, salt);
        next.zeroize();
        media_key
    }

    pub(crate) fn holds(&self, session_key: &[u8; KEY_SIZE]) -> bool {
        self.session_key == *session_key
    }

    pub(crate) fn created_at(&self) -> I {
        self.created_at
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn media_key(&self, generation: u64) -> MediaKey {
        MediaKey { generation, revision: Some(self.revision), key: self.media_key }
    }

    pub(crate) fn session_key(&self, generation: u64) -> SessionKey {
        SessionKey { generation, key: self.session_key }
    }
}

impl<I> Drop for KeySlot<I> {
    fn drop(&mut self) {
        self.session_key.zeroize();
        self.media_key.zeroize();
    }
}

/// AEAD key of one generation, as handed to encryptors and decryptors.
#[derive(Clone)]
pub struct MediaKey {
    generation: u64,
    revision: Option<u64>,
    key: [u8; KEY_SIZE],
}

impl MediaKey {
    /// Key that is not stored in any slot (ratchet look-ahead).
    pub(crate) fn new(generation: u64, key: [u8; KEY_SIZE]) -> Self {
        Self { generation, revision: None, key }
    }

    /// Generation this key belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Revision of the slot the key was read from; `None` for look-ahead keys.
    pub(crate) fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// 32-byte AES-256-GCM key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for MediaKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaKey").field("generation", &self.generation).finish_non_exhaustive()
    }
}

/// Session key of one generation, exported for redistribution by signaling.
#[derive(Clone)]
pub struct SessionKey {
    generation: u64,
    key: [u8; KEY_SIZE],
}

impl SessionKey {
    /// Generation this key belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Raw 32-byte session key.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey").field("generation", &self.generation).finish_non_exhaustive()
    }
}
