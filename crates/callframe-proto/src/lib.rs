//! Callframe wire format
//!
//! Byte layout of protected media frames. A protected frame is the clear
//! [`FrameHeader`] followed by the AEAD ciphertext and its 16-byte tag:
//!
//! ```text
//! +-------------------+-----------------------------+----------+
//! | FrameHeader (3-23)| ciphertext (= plaintext len)| tag (16) |
//! +-------------------+-----------------------------+----------+
//! ```
//!
//! The header is authenticated as AEAD associated data but never encrypted:
//! relays can read the frame counter and key generation, and receivers use
//! them to pick the key and IV before decryption.
//!
//! This crate does no cryptography. It only encodes and parses headers.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod header;

pub use errors::{ProtocolError, Result};
pub use header::{FrameHeader, MAX_EXTENSIONS};
