//! Outbound frame protection.

use std::sync::Arc;

use callframe_proto::FrameHeader;

use crate::{
    cipher::{FrameCipher, TAG_SIZE},
    env::Environment,
    error::{FrameCryptoError, KeyStoreError},
    iv::IvSeed,
    keystore::KeyStore,
    media::MediaType,
};

/// Encrypts the frames of one local media stream.
///
/// Each frame gets a fresh 32-bit counter value (random start, wrapping) and
/// is sealed under the store's current generation:
///
/// ```text
/// header(frame_id, generation, source?) || AES-256-GCM(plaintext, aad = header) || tag
/// ```
///
/// The cached cipher is rebuilt whenever the current generation changes or
/// its key is repaired.
pub struct FrameEncryptor<E: Environment> {
    store: Arc<KeyStore<E>>,
    media: MediaType,
    participant_id: String,
    iv_seed: IvSeed,
    cipher: Option<FrameCipher>,
    frame_id: u32,
    attempted: bool,
    succeeded: bool,
}

impl<E: Environment> FrameEncryptor<E> {
    /// Create an encryptor for the local participant's stream.
    ///
    /// The IV seed is derived from the store salt at this point. Call
    /// [`Self::rebind`] if the salt changes afterwards.
    pub fn new(store: Arc<KeyStore<E>>, participant_id: impl Into<String>, media: MediaType) -> Self {
        let participant_id = participant_id.into();
        let iv_seed = store.generate_iv(participant_id.as_bytes(), media);
        let frame_id = store.env().random_u32();

        Self {
            store,
            media,
            participant_id,
            iv_seed,
            cipher: None,
            frame_id,
            attempted: false,
            succeeded: false,
        }
    }

    /// Re-derive the IV seed for `participant_id` under the current salt.
    pub fn rebind(&mut self, participant_id: impl Into<String>) {
        self.participant_id = participant_id.into();
        self.iv_seed = self.store.generate_iv(self.participant_id.as_bytes(), self.media);
        tracing::debug!(media = %self.media, "encryptor rebound");
    }

    /// Stream kind.
    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Participant id hash the IV seed is bound to.
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Counter value of the most recent frame.
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// Upper bound of the protected size of a `plaintext_len` byte frame.
    pub fn max_output_size(&self, plaintext_len: usize) -> usize {
        FrameHeader::MAX_SIZE + plaintext_len + TAG_SIZE
    }

    /// Protect one frame.
    ///
    /// `source_id` is embedded in the header for receivers that cannot learn
    /// it from the transport.
    ///
    /// # Errors
    ///
    /// - `NotReady` before the store has a current key, or if the current
    ///   key was replaced concurrently
    /// - `EncryptionFailed` if the AEAD refused the frame; the cached cipher
    ///   is discarded
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        source_id: Option<u32>,
    ) -> Result<Vec<u8>, FrameCryptoError> {
        if !self.attempted {
            self.attempted = true;
            tracing::info!(media = %self.media, "first frame encryption attempted");
        }

        self.frame_id = self.frame_id.wrapping_add(1);

        let Some((generation, revision)) = self.store.current_revision() else {
            tracing::debug!(media = %self.media, "no current key, dropping frame");
            return Err(FrameCryptoError::NotReady { reason: "no current key" });
        };

        let cipher = self.cipher_for(generation, revision)?;

        let mut header = FrameHeader::new(u64::from(self.frame_id), generation);
        if let Some(source_id) = source_id {
            header = header.with_source_id(source_id);
        }
        let header_len = header.encoded_len();

        let mut frame = Vec::with_capacity(header_len + plaintext.len() + TAG_SIZE);
        header.encode(&mut frame)?;
        frame.extend_from_slice(plaintext);

        let iv = self.iv_seed.frame_iv(self.frame_id, generation);
        let (aad, body) = frame.split_at_mut(header_len);
        let Ok(tag) = cipher.seal(&iv, aad, body) else {
            tracing::warn!(media = %self.media, generation, "frame encryption failed");
            return Err(FrameCryptoError::EncryptionFailed { generation });
        };
        frame.extend_from_slice(&tag);
        self.cipher = Some(cipher);

        if !self.succeeded {
            self.succeeded = true;
            tracing::info!(media = %self.media, generation, "first frame encrypted");
        }

        Ok(frame)
    }

    /// Cached cipher if it still holds `revision` of `generation`, else a
    /// fresh one from the store.
    fn cipher_for(&mut self, generation: u64, revision: u64) -> Result<FrameCipher, FrameCryptoError> {
        if let Some(cipher) = self.cipher.take()
            && cipher.matches(generation, revision)
        {
            return Ok(cipher);
        }

        match self.store.media_key(generation) {
            Ok(key) => {
                tracing::debug!(media = %self.media, generation, "encryptor cipher rebuilt");
                Ok(FrameCipher::new(&key))
            },
            // Rotated past and purged after `current_revision` was read
            Err(KeyStoreError::NotFound { .. }) => {
                tracing::debug!(media = %self.media, generation, "current key purged");
                Err(FrameCryptoError::NotReady { reason: "current key purged" })
            },
            Err(err) => Err(err.into()),
        }
    }
}

impl<E: Environment> std::fmt::Debug for FrameEncryptor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncryptor")
            .field("media", &self.media)
            .field("frame_id", &self.frame_id)
            .field("generation", &self.cipher.as_ref().map(FrameCipher::generation))
            .finish_non_exhaustive()
    }
}
