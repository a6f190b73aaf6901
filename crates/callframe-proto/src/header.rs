//! Compact variable-length media frame header.
//!
//! Every protected media frame starts with this header in the clear. It tells
//! the receiver which frame counter and key generation the sender used, so the
//! receiver can rebuild the IV and select the key before touching the
//! ciphertext. The header bytes are also the AEAD associated data, so any
//! modification in transit fails authentication.
//!
//! ```text
//!                      1 1 1 1 1 1
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | V=0 |E|  RES  |R| FLEN|X| KEY |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   KEY ID... (KEY+1 bytes, X=1)|
//! +-------------------------------+
//! |   FRAME ID... (FLEN+1 bytes)  |
//! +-------------------------------+
//!
//! Extension (repeated while M=1):
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+---------------------------+
//! |M| ELEN|  EID  |  VALUE... (ELEN+1 bytes)  |
//! +-+-+-+-+-+-+-+-+---------------------------+
//! ```

use bytes::BufMut;

use crate::errors::{ProtocolError, Result};

/// Maximum number of extensions parsed before decoding stops.
pub const MAX_EXTENSIONS: usize = 16;

/// Extension id carrying the 32-bit media source id.
const EXT_SOURCE_ID: u8 = 0x01;

/// Payload length of the source id extension.
const SOURCE_ID_LEN: usize = 4;

const HAS_EXTENSION: u8 = 0x10;
const KEY_EXTERNAL: u8 = 0x08;
const EXT_MORE: u8 = 0x80;

/// Decoded media frame header.
///
/// Encoding is always minimal: the frame id uses the fewest big-endian bytes
/// that represent it (one byte for zero), and key ids up to
/// [`Self::INLINE_KEY_MAX`] live in the second header byte without any
/// external key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    frame_id: u64,
    key_id: u64,
    source_id: Option<u32>,
}

impl FrameHeader {
    /// Current header version.
    pub const VERSION: u8 = 0;

    /// Smallest possible header (both fixed bytes plus one frame id byte).
    pub const MIN_SIZE: usize = 3;

    /// Largest header this implementation emits: fixed bytes, 8-byte key id,
    /// 8-byte frame id and the source id extension.
    pub const MAX_SIZE: usize = 2 + 8 + 8 + 1 + SOURCE_ID_LEN;

    /// Largest key id carried inline in the 3-bit key field.
    pub const INLINE_KEY_MAX: u64 = 7;

    /// Header without a source id extension.
    #[must_use]
    pub fn new(frame_id: u64, key_id: u64) -> Self {
        Self { frame_id, key_id, source_id: None }
    }

    /// Attach a source id, emitted as extension 1.
    #[must_use]
    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Per-stream frame counter.
    #[must_use]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Key generation used to protect the frame.
    #[must_use]
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    /// Media source id, if the sender embedded one.
    #[must_use]
    pub fn source_id(&self) -> Option<u32> {
        self.source_id
    }

    /// Exact number of bytes [`Self::encode`] writes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let key_len = if self.key_id > Self::INLINE_KEY_MAX { byte_len(self.key_id) } else { 0 };
        let ext_len = if self.source_id.is_some() { 1 + SOURCE_ID_LEN } else { 0 };
        2 + key_len + byte_len(self.frame_id) + ext_len
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::BufferTooSmall` if `dst` cannot take
    ///   [`Self::encoded_len`] more bytes. Nothing is written in that case.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let needed = self.encoded_len();
        if dst.remaining_mut() < needed {
            return Err(ProtocolError::BufferTooSmall { needed, available: dst.remaining_mut() });
        }

        let frame_len = byte_len(self.frame_id);
        let (key_external, key_field) = if self.key_id > Self::INLINE_KEY_MAX {
            (KEY_EXTERNAL, (byte_len(self.key_id) - 1) as u8)
        } else {
            (0, self.key_id as u8)
        };
        let has_extension = if self.source_id.is_some() { HAS_EXTENSION } else { 0 };

        dst.put_u8((Self::VERSION << 5) | has_extension);
        dst.put_u8((((frame_len - 1) as u8) << 4) | key_external | key_field);
        if key_external != 0 {
            dst.put_uint(self.key_id, usize::from(key_field) + 1);
        }
        dst.put_uint(self.frame_id, frame_len);

        if let Some(source_id) = self.source_id {
            // more=0, len-1=3, id=1
            dst.put_u8((((SOURCE_ID_LEN - 1) as u8) << 4) | EXT_SOURCE_ID);
            dst.put_u32(source_id);
        }

        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        let Ok(()) = self.encode(&mut buf) else {
            unreachable!("Vec grows to fit any header");
        };
        buf
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// Returns the header and the number of bytes it occupies; the AEAD
    /// payload starts right after.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::HeaderTruncated` if a field or extension runs past
    ///   the end of `bytes`
    /// - `ProtocolError::UnsupportedVersion` if the version bits are not zero
    ///
    /// # Security
    ///
    /// - Bounded Reads: every field is taken through a checked slice, so
    ///   arbitrary input can never read past `bytes.len()`.
    ///
    /// - Bounded Work: at most [`MAX_EXTENSIONS`] extensions are walked. A
    ///   chain that keeps its continuation bit set beyond that is cut off and
    ///   the remaining bytes are left to the payload.
    ///
    /// - Forward Compatibility: unknown extension ids, and a source id
    ///   extension with an unexpected length, are skipped rather than
    ///   rejected.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut reader = Reader { bytes, pos: 0 };

        let first = reader.byte()?;
        let version = first >> 5;
        if version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let mut more = first & HAS_EXTENSION != 0;

        let second = reader.byte()?;
        let frame_len = usize::from((second >> 4) & 0x07) + 1;
        let key_field = second & 0x07;
        let key_id = if second & KEY_EXTERNAL != 0 {
            read_be(reader.take(usize::from(key_field) + 1)?)
        } else {
            u64::from(key_field)
        };
        let frame_id = read_be(reader.take(frame_len)?);

        let mut source_id = None;
        let mut parsed = 0;
        while more && parsed < MAX_EXTENSIONS {
            let ext = reader.byte()?;
            let len = usize::from((ext >> 4) & 0x07) + 1;
            let value = reader.take(len)?;

            if ext & 0x0f == EXT_SOURCE_ID && len == SOURCE_ID_LEN {
                source_id = Some(read_be(value) as u32);
            }

            more = ext & EXT_MORE != 0;
            parsed += 1;
        }

        Ok((Self { frame_id, key_id, source_id }, reader.pos))
    }
}

/// Checked cursor over the input.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ProtocolError::HeaderTruncated { needed: end, actual: self.bytes.len() })?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        let byte = self.bytes.get(self.pos).copied().ok_or(ProtocolError::HeaderTruncated {
            needed: self.pos + 1,
            actual: self.bytes.len(),
        })?;
        self.pos += 1;
        Ok(byte)
    }
}

/// Minimal big-endian length of `value` (one byte for zero).
fn byte_len(value: u64) -> usize {
    if value == 0 { 1 } else { 8 - value.leading_zeros() as usize / 8 }
}

fn read_be(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
