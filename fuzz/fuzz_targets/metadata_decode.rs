//! Fuzz target for EkMetadata::decode_canonical
//!
//! # Invariants
//!
//! - NEVER panic on malformed CBOR
//! - Anything accepted is canonical: re-encoding gives the input bytes

#![no_main]

use ephemera_client::EkMetadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(metadata) = EkMetadata::decode_canonical(data) {
        let encoded = metadata.encode_canonical().expect("decoded metadata re-encodes");
        assert_eq!(encoded, data, "accepted non-canonical metadata encoding");
    }
});
