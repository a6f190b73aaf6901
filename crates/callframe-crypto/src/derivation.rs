//! Key derivation for the group keystore using HKDF-SHA256
//!
//! Every derivation uses the call salt and a distinct info label, so a key
//! derived for one purpose never equals a key derived for another, even
//! from the same input.

use hkdf::Hkdf;
use sha2::Sha256;

/// Size of session keys and media keys (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV
pub const IV_SIZE: usize = 12;

/// Label for ratcheting a session key to the next generation
const SESSION_KEY_LABEL: &[u8] = b"session_key";

/// Label for deriving the AEAD key from a session key
const MEDIA_KEY_LABEL: &[u8] = b"media_key";

/// Label for hashing a freshly negotiated secret into a session key
const FRESH_KEY_LABEL: &[u8] = b"cs";

fn expand<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> [u8; N] {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = [0u8; N];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("32 and 12 bytes are valid HKDF-SHA256 output lengths");
    };

    okm
}

/// Derive the AEAD key for one generation from its session key.
///
/// # Security
///
/// - The session key itself never keys the cipher, so a leaked media key
///   does not expose the ratchet state
pub fn derive_media_key(session_key: &[u8; KEY_SIZE], salt: &[u8]) -> [u8; KEY_SIZE] {
    expand(salt, session_key, MEDIA_KEY_LABEL)
}

/// Ratchet a session key one generation forward.
///
/// # Security
///
/// - One-way: the previous session key cannot be recovered from the output
/// - Deterministic: every participant holding the same session key and salt
///   computes the same next key
pub fn derive_next_session_key(session_key: &[u8; KEY_SIZE], salt: &[u8]) -> [u8; KEY_SIZE] {
    expand(salt, session_key, SESSION_KEY_LABEL)
}

/// Hash a freshly negotiated secret of any length into a session key.
pub fn derive_fresh_session_key(secret: &[u8], salt: &[u8]) -> [u8; KEY_SIZE] {
    expand(salt, secret, FRESH_KEY_LABEL)
}

/// Derive the IV seed of one (participant, stream) pair.
pub fn derive_iv_seed(salt: &[u8], participant_id: &[u8], label: &[u8]) -> [u8; IV_SIZE] {
    expand(salt, participant_id, label)
}
