//! Media stream kinds.

use std::fmt;

/// Kind of media carried by a protected stream.
///
/// Audio and video streams of the same participant use distinct IV seeds,
/// so their frame counters can overlap safely under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Audio frames
    Audio,
    /// Video frames
    Video,
}

impl MediaType {
    /// HKDF info label for this stream's IV seed.
    #[must_use]
    pub fn iv_label(self) -> &'static [u8] {
        match self {
            Self::Audio => b"audio_iv",
            Self::Video => b"video_iv",
        }
    }

    /// Lowercase name for logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// True for video streams.
    #[must_use]
    pub fn is_video(self) -> bool {
        self == Self::Video
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
