//! Fuzz target for verify_and_extract
//!
//! Feeds arbitrary strings to the signed-packet decoder: bad base64, bad
//! CBOR, wrong versions, short keys and signatures, oversized input.
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use ephemera_crypto::verify_and_extract;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let packet = String::from_utf8_lossy(data);
    let _ = verify_and_extract(&packet);
});
