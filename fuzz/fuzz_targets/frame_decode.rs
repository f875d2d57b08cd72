//! Fuzz target for Frame::decode and GroupEnvelope::decode
//!
//! Arbitrary bytes through both JSON decoders. Looks for:
//! - Parser panics on malformed JSON or unknown frame types
//! - Base64 fields that decode to the wrong length and slip through
//! - Frames that decode but fail to re-encode
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quorum_core::{ErrorKind, Frame, GroupEnvelope};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let encoded = frame.encode().expect("decoded frame must re-encode");
        assert_eq!(Frame::decode(&encoded).expect("re-encoded frame must decode"), frame);
    }

    match GroupEnvelope::decode(data) {
        Ok(envelope) => {
            let encoded = envelope.encode().expect("decoded envelope must re-encode");
            assert_eq!(GroupEnvelope::decode(&encoded).expect("re-encoded envelope"), envelope);
        },
        Err(error) => assert_eq!(error.kind(), ErrorKind::Codec),
    }
});
