//! Callframe Frame Protection
//!
//! End-to-end protection of real-time media frames in a group call. Every
//! participant shares one [`KeyStore`] per call; each outbound stream owns a
//! [`FrameEncryptor`] and each inbound stream a [`FrameDecryptor`].
//!
//! # Key Lifecycle
//!
//! Signaling delivers session keys per generation. Each session key yields
//! the AES-256-GCM media key of its generation. When signaling has no next
//! key yet, the store ratchets the current session key forward, so every
//! participant arrives at the same next generation without a round trip.
//!
//! ```text
//! signaling secret
//!        │
//!        ▼
//! HKDF(salt, secret, "cs") ──▶ Session Key (generation g)
//!        │                          │
//!        │                          ├──▶ HKDF(salt, key, "media_key") ──▶ AES-256-GCM key
//!        │                          │
//!        │                          ▼
//!        │              HKDF(salt, key, "session_key") ──▶ Session Key (g + 1)
//!        ▼
//! HKDF(salt, participant, "audio_iv" | "video_iv") ──▶ IV seed per stream
//! ```
//!
//! # Security
//!
//! Nonce uniqueness:
//! - Frame IV = seed with its first 8 bytes XORed by (`frame_id` || `generation`)
//! - Audio and video of one participant use distinct seeds
//! - Repairing a key gives it a new revision, which rebuilds cached ciphers
//!
//! Authenticity:
//! - The clear header is the AEAD associated data, so neither the frame
//!   counter nor the generation can be altered in transit
//! - A failed tag check yields no plaintext
//!
//! Forward secrecy:
//! - The ratchet is one-way and old generations are purged on rotation
//! - Key bytes are zeroized when slots, keys and ciphers are dropped

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
pub mod decryptor;
pub mod derivation;
pub mod encryptor;
pub mod env;
pub mod error;
pub mod iv;
pub mod keystore;
pub mod media;
pub mod resolver;

pub use cipher::TAG_SIZE;
pub use decryptor::FrameDecryptor;
pub use derivation::{IV_SIZE, KEY_SIZE};
pub use encryptor::FrameEncryptor;
pub use env::{Environment, SystemEnv};
pub use error::{FrameCryptoError, KeyStoreError};
pub use iv::IvSeed;
pub use keystore::{
    DecryptState, KeyChangeCallback, KeyStore, KeyStoreConfig, ListenerId, MediaKey, SessionKey,
};
pub use media::MediaType;
pub use resolver::{ResolveError, StaticResolver, UserResolver};
