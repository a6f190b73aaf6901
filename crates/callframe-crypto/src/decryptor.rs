//! Inbound frame verification and decryption.

use std::sync::Arc;

use callframe_proto::FrameHeader;

use crate::{
    cipher::{FrameCipher, TAG_SIZE},
    env::Environment,
    error::FrameCryptoError,
    iv::IvSeed,
    keystore::KeyStore,
    media::MediaType,
    resolver::UserResolver,
};

/// Remote participant a decryptor currently derives IVs for.
#[derive(Debug, Clone)]
struct SourceBinding {
    /// `None` when bound directly through `bind_participant`
    source_id: Option<u32>,
    participant_id: String,
    iv_seed: IvSeed,
}

/// Decrypts the frames of one remote media stream.
///
/// The sender is identified by a source id, taken from the transport or
/// from the frame header. The [`UserResolver`] maps it to a participant,
/// whose id hash selects the IV seed. A frame is only returned after its tag
/// verifies over both the header and the ciphertext.
pub struct FrameDecryptor<E: Environment, R: UserResolver> {
    store: Arc<KeyStore<E>>,
    resolver: R,
    media: MediaType,
    binding: Option<SourceBinding>,
    cipher: Option<FrameCipher>,
    attempted: bool,
    succeeded: bool,
}

impl<E: Environment, R: UserResolver> FrameDecryptor<E, R> {
    /// Create a decryptor with no source bound yet.
    pub fn new(store: Arc<KeyStore<E>>, media: MediaType, resolver: R) -> Self {
        Self {
            store,
            resolver,
            media,
            binding: None,
            cipher: None,
            attempted: false,
            succeeded: false,
        }
    }

    /// Bind to a known participant without a resolver lookup.
    ///
    /// Frames that carry no source id are then decrypted with this
    /// participant's IV seed. A frame naming a source still triggers a
    /// lookup.
    pub fn bind_participant(&mut self, participant_id: impl Into<String>) {
        self.bind(None, participant_id.into());
    }

    /// Participant id hash of the bound sender.
    pub fn participant_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.participant_id.as_str())
    }

    /// Stream kind.
    pub fn media(&self) -> MediaType {
        self.media
    }

    /// Upper bound of the plaintext size of a `frame_len` byte frame.
    pub fn max_plaintext_size(&self, frame_len: usize) -> usize {
        frame_len.saturating_sub(FrameHeader::MIN_SIZE + TAG_SIZE)
    }

    /// Verify and decrypt one frame.
    ///
    /// `source_override` takes precedence over a source id embedded in the
    /// header.
    ///
    /// # Errors
    ///
    /// - `Protocol` if the header is malformed
    /// - `FrameTooShort` if the frame ends before the tag
    /// - `NotReady` if the sender or the key generation is not known yet
    /// - `IntegrityFailure` if the tag does not verify
    pub fn decrypt(
        &mut self,
        frame: &[u8],
        source_override: Option<u32>,
    ) -> Result<Vec<u8>, FrameCryptoError> {
        if !self.attempted {
            self.attempted = true;
            tracing::info!(media = %self.media, "first frame decryption attempted");
        }

        let (header, header_len) = FrameHeader::decode(frame)?;
        let minimum = header_len + TAG_SIZE;
        if frame.len() < minimum {
            return Err(FrameCryptoError::FrameTooShort { minimum, actual: frame.len() });
        }

        let iv_seed = self.bound_seed(source_override.or(header.source_id()))?;

        let generation = header.key_id();
        let frame_id = header.frame_id();
        let cipher = self.cipher_for(generation)?;

        let (aad, rest) = frame.split_at(header_len);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);
        let iv = iv_seed.frame_iv(frame_id as u32, generation);

        let mut plaintext = ciphertext.to_vec();
        if cipher.open(&iv, aad, &mut plaintext, tag).is_err() {
            tracing::warn!(media = %self.media, frame_id, generation, "frame failed integrity check");
            return Err(FrameCryptoError::IntegrityFailure { frame_id, generation });
        }
        self.cipher = Some(cipher);

        if !self.succeeded {
            self.succeeded = true;
            self.store.mark_decrypt_succeeded();
            tracing::info!(media = %self.media, generation, "first frame decrypted");
        }

        Ok(plaintext)
    }

    fn bind(&mut self, source_id: Option<u32>, participant_id: String) {
        let iv_seed = self.store.generate_iv(participant_id.as_bytes(), self.media);
        self.binding = Some(SourceBinding { source_id, participant_id, iv_seed });
        self.store.mark_decrypt_attempted();
        tracing::info!(media = %self.media, source_id = ?source_id, "decryptor bound to sender");
    }

    /// IV seed for `source`, resolving and rebinding if the source changed.
    /// A failed lookup keeps the previous binding.
    fn bound_seed(&mut self, source: Option<u32>) -> Result<IvSeed, FrameCryptoError> {
        if let Some(source_id) = source
            && self.binding.as_ref().is_none_or(|b| b.source_id != Some(source_id))
        {
            match self.resolver.resolve(source_id, self.media.is_video()) {
                Ok(participant_id) => self.bind(Some(source_id), participant_id),
                Err(err) => {
                    tracing::debug!(media = %self.media, source_id, error = %err, "sender not resolved");
                    return Err(FrameCryptoError::NotReady { reason: "sender not resolved" });
                },
            }
        }

        self.binding
            .as_ref()
            .map(|b| b.iv_seed)
            .ok_or(FrameCryptoError::NotReady { reason: "no sender bound" })
    }

    /// Cipher for `generation`, reusing the cached one while the stored key
    /// is unchanged.
    ///
    /// A generation the store does not hold yet may still be the ratchet
    /// step after current, when the sender rotated first. That look-ahead
    /// key is derived again for every frame, so it cannot outlive a reset or
    /// an explicit key for the same generation.
    fn cipher_for(&mut self, generation: u64) -> Result<FrameCipher, FrameCryptoError> {
        let cached = self.cipher.take();

        if let Some(revision) = self.store.key_revision(generation) {
            if let Some(cipher) = cached
                && cipher.matches(generation, revision)
            {
                return Ok(cipher);
            }
            if let Ok(key) = self.store.media_key(generation) {
                tracing::debug!(media = %self.media, generation, "decryptor cipher rebuilt");
                return Ok(FrameCipher::new(&key));
            }
        }

        match self.store.next_media_key() {
            Ok(key) if key.generation() == generation => Ok(FrameCipher::new(&key)),
            _ => {
                tracing::debug!(media = %self.media, generation, "no key for generation, dropping frame");
                Err(FrameCryptoError::NotReady { reason: "key generation not available" })
            },
        }
    }
}

impl<E: Environment, R: UserResolver> std::fmt::Debug for FrameDecryptor<E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecryptor")
            .field("media", &self.media)
            .field("source_id", &self.binding.as_ref().and_then(|b| b.source_id))
            .field("generation", &self.cipher.as_ref().map(FrameCipher::generation))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encryptor::FrameEncryptor,
        env::testing::ManualEnv,
        keystore::KeyStoreConfig,
        resolver::{ResolveError, StaticResolver},
    };

    fn store() -> Arc<KeyStore<ManualEnv>> {
        let store = KeyStore::shared(ManualEnv::default(), KeyStoreConfig::default());
        store.set_salt(b"CALL_ID").unwrap();
        store.set_session_key(0, &[0x11; 32]).unwrap();
        store
    }

    fn resolver() -> StaticResolver {
        let resolver = StaticResolver::new();
        resolver.insert(42, MediaType::Audio, "alice");
        resolver
    }

    #[test]
    fn round_trip_with_embedded_source() {
        let store = store();
        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver());

        let frame = enc.encrypt(b"opus frame", Some(42)).unwrap();
        assert_eq!(dec.decrypt(&frame, None).unwrap(), b"opus frame");
        assert_eq!(dec.participant_id(), Some("alice"));

        let state = store.decrypt_state();
        assert!(state.attempted);
        assert!(state.succeeded);
    }

    #[test]
    fn override_beats_embedded_source() {
        let store = store();
        let resolver = resolver();
        resolver.insert(7, MediaType::Audio, "mallory");

        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver);

        let frame = enc.encrypt(b"opus frame", Some(7)).unwrap();
        assert_eq!(dec.decrypt(&frame, Some(42)).unwrap(), b"opus frame");
    }

    #[test]
    fn no_binding_is_not_ready() {
        let store = store();
        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver());

        let frame = enc.encrypt(b"x", None).unwrap();
        let err = dec.decrypt(&frame, None).unwrap_err();
        assert_eq!(err, FrameCryptoError::NotReady { reason: "no sender bound" });
        assert!(!store.decrypt_state().attempted);
    }

    #[test]
    fn bind_participant_without_resolver() {
        let store = store();
        let resolver = |source_id: u32, _: bool| -> Result<String, ResolveError> {
            Err(ResolveError::NotReady { source_id })
        };

        let mut enc = FrameEncryptor::new(Arc::clone(&store), "bob", MediaType::Video);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Video, resolver);
        dec.bind_participant("bob");

        let frame = enc.encrypt(b"vp8", None).unwrap();
        assert_eq!(dec.decrypt(&frame, None).unwrap(), b"vp8");
    }

    #[test]
    fn failed_lookup_keeps_previous_binding() {
        let store = store();
        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver());

        let first = enc.encrypt(b"one", Some(42)).unwrap();
        dec.decrypt(&first, None).unwrap();

        let unknown = enc.encrypt(b"two", Some(99)).unwrap();
        assert!(matches!(dec.decrypt(&unknown, None), Err(FrameCryptoError::NotReady { .. })));
        assert_eq!(dec.participant_id(), Some("alice"));

        let third = enc.encrypt(b"three", Some(42)).unwrap();
        assert_eq!(dec.decrypt(&third, None).unwrap(), b"three");
    }

    #[test]
    fn wrong_participant_fails_integrity() {
        let store = store();
        let resolver = StaticResolver::new();
        resolver.insert(42, MediaType::Audio, "not-alice");

        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver);

        let frame = enc.encrypt(b"x", Some(42)).unwrap();
        assert!(dec.decrypt(&frame, None).unwrap_err().is_integrity_failure());
        assert!(!store.decrypt_state().succeeded);
    }

    #[test]
    fn truncated_frames() {
        let store = store();
        let mut dec = FrameDecryptor::new(store, MediaType::Audio, resolver());
        dec.bind_participant("alice");

        assert!(matches!(dec.decrypt(&[], None), Err(FrameCryptoError::Protocol(_))));

        let header = FrameHeader::new(1, 0).to_bytes();
        let mut short = header.clone();
        short.extend_from_slice(&[0; TAG_SIZE - 1]);
        assert_eq!(
            dec.decrypt(&short, None),
            Err(FrameCryptoError::FrameTooShort { minimum: header.len() + TAG_SIZE, actual: short.len() })
        );
    }

    #[test]
    fn unknown_generation_is_not_ready() {
        let store = store();
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver());
        dec.bind_participant("alice");

        let mut frame = FrameHeader::new(1, 5).to_bytes();
        frame.extend_from_slice(&[0; 32]);
        let err = dec.decrypt(&frame, None).unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_integrity_failure());
    }

    #[test]
    fn max_plaintext_size_bounds_output() {
        let store = store();
        let mut enc = FrameEncryptor::new(Arc::clone(&store), "alice", MediaType::Audio);
        let mut dec = FrameDecryptor::new(Arc::clone(&store), MediaType::Audio, resolver());

        let frame = enc.encrypt(&[7; 100], Some(42)).unwrap();
        let plaintext = dec.decrypt(&frame, None).unwrap();
        assert!(plaintext.len() <= dec.max_plaintext_size(frame.len()));
        assert_eq!(dec.max_plaintext_size(3), 0);
    }
}
