//! Fuzz target for FrameHeader::decode
//!
//! Feeds arbitrary bytes to the header parser to find:
//! - Parser crashes or panics
//! - Reads past the end of the input
//! - Extension chains that escape the extension cap
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use callframe_proto::{FrameHeader, ProtocolError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match FrameHeader::decode(data) {
        Ok((header, consumed)) => {
            // INVARIANT 1: Never consumes more than was given
            assert!(consumed <= data.len(), "consumed {consumed} of {} bytes", data.len());
            assert!(consumed >= FrameHeader::MIN_SIZE);

            // INVARIANT 2: Re-encoding a parsed header round-trips its fields
            let encoded = header.to_bytes();
            assert!(encoded.len() <= FrameHeader::MAX_SIZE);
            let (again, len) = FrameHeader::decode(&encoded).expect("re-encoded header must decode");
            assert_eq!(again, header);
            assert_eq!(len, encoded.len());
        },
        Err(err) => {
            // INVARIANT 3: Only structural errors come out of decode
            assert!(
                matches!(
                    err,
                    ProtocolError::HeaderTruncated { .. } | ProtocolError::UnsupportedVersion(_)
                ),
                "unexpected error {err:?}"
            );
        },
    }
});
