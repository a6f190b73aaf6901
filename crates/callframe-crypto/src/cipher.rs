//! AES-256-GCM cipher cached per stream.

use aes_gcm::{
    Aes256Gcm, Key, KeyInit,
    aead::{AeadInPlace, generic_array::GenericArray},
};

use crate::{derivation::IV_SIZE, keystore::MediaKey};

/// GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Cipher keyed to one generation.
///
/// `revision` is the key slot's revision when the key was fetched, or
/// `None` for a look-ahead key that is not stored yet. A cipher is reused
/// only while generation and revision still match the store, so a repaired
/// key is picked up on the next frame.
pub(crate) struct FrameCipher {
    generation: u64,
    revision: Option<u64>,
    aead: Aes256Gcm,
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("generation", &self.generation)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl FrameCipher {
    pub(crate) fn new(key: &MediaKey) -> Self {
        let aead = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.key()));
        Self { generation: key.generation(), revision: key.revision(), aead }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn matches(&self, generation: u64, revision: u64) -> bool {
        self.generation == generation && self.revision == Some(revision)
    }

    /// Encrypt `buffer` in place and return the detached tag.
    pub(crate) fn seal(
        &self,
        iv: &[u8; IV_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], aes_gcm::Error> {
        let tag = self.aead.encrypt_in_place_detached(GenericArray::from_slice(iv), aad, buffer)?;
        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify `tag` and decrypt `buffer` in place. `buffer` is left as
    /// ciphertext when verification fails.
    pub(crate) fn open(
        &self,
        iv: &[u8; IV_SIZE],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), aes_gcm::Error> {
        if tag.len() != TAG_SIZE {
            return Err(aes_gcm::Error);
        }
        self.aead.decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            aad,
            buffer,
            GenericArray::from_slice(tag),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::testing::ManualEnv,
        keystore::{KeyStore, KeyStoreConfig},
    };

    fn cipher(byte: u8) -> FrameCipher {
        FrameCipher::new(&MediaKey::new(3, [byte; 32]))
    }

    #[test]
    fn seal_then_open() {
        let cipher = cipher(0x42);
        let iv = [7u8; IV_SIZE];
        let mut buffer = b"frame payload".to_vec();

        let tag = cipher.seal(&iv, b"header", &mut buffer).unwrap();
        assert_ne!(buffer, b"frame payload");

        cipher.open(&iv, b"header", &mut buffer, &tag).unwrap();
        assert_eq!(buffer, b"frame payload");
    }

    #[test]
    fn open_rejects_modified_aad() {
        let cipher = cipher(0x42);
        let iv = [7u8; IV_SIZE];
        let mut buffer = b"frame payload".to_vec();
        let tag = cipher.seal(&iv, b"header", &mut buffer).unwrap();
        let sealed = buffer.clone();

        assert!(cipher.open(&iv, b"headez", &mut buffer, &tag).is_err());
        assert_eq!(buffer, sealed, "failed open must not touch the buffer");
    }

    #[test]
    fn open_rejects_wrong_key() {
        let iv = [1u8; IV_SIZE];
        let mut buffer = vec![0u8; 32];
        let tag = cipher(0x01).seal(&iv, &[], &mut buffer).unwrap();

        assert!(cipher(0x02).open(&iv, &[], &mut buffer, &tag).is_err());
    }

    #[test]
    fn open_rejects_short_tag() {
        let mut buffer = vec![0u8; 4];
        assert!(cipher(0x01).open(&[0; IV_SIZE], &[], &mut buffer, &[0; 8]).is_err());
    }

    #[test]
    fn matches_generation_and_revision() {
        let store = KeyStore::new(ManualEnv::default(), KeyStoreConfig::default());
        store.set_salt(b"CALL_ID").unwrap();
        store.set_session_key(3, &[0x01; 32]).unwrap();
        let (_, revision) = store.current_revision().unwrap();

        let cipher = FrameCipher::new(&store.current_media_key().unwrap());
        assert!(cipher.matches(3, revision));
        assert!(!cipher.matches(3, revision + 1));
        assert!(!cipher.matches(4, revision));
    }

    #[test]
    fn look_ahead_cipher_never_matches() {
        let cipher = cipher(0x01);
        assert!(!cipher.matches(3, 0));
        assert!(!cipher.matches(3, 1));
    }
}
