//! Fuzz target for tampered signed EK records
//!
//! Signs well-formed metadata, then flips, truncates or extends the wire
//! string.
//!
//! # Invariants
//!
//! - NEVER panic
//! - A tampered record either fails verification or yields exactly the
//!   signed key and payload

#![no_main]

use arbitrary::Arbitrary;
use ephemera_client::{
    DeviceSigningKey, Generation, IdentitySigner, MerkleRoot, SignedEkRecord, build_and_sign,
};
use ephemera_crypto::Kid;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    signing_key: [u8; 32],
    kid: [u8; 32],
    generation: u64,
    seqno: u64,
    ctime: u64,
    mutation: Mutation,
}

#[derive(Debug, Arbitrary)]
enum Mutation {
    Replace { position: u16, byte: u8 },
    Truncate { keep: u16 },
    Append { suffix: Vec<u8> },
}

fuzz_target!(|input: Input| {
    let signer = DeviceSigningKey::from_bytes(&input.signing_key);
    let root = MerkleRoot {
        hash: [0x5a; 32],
        seqno: input.seqno,
        ctime: input.ctime,
        fetched_at: input.ctime,
    };
    let Ok((metadata, record)) =
        build_and_sign(Kid::from_bytes(input.kid), Generation::new(input.generation), &root, &signer)
    else {
        return;
    };
    let Ok(expected_key) = signer.verifying_key() else {
        return;
    };

    let mut wire = record.into_wire().into_bytes();
    match input.mutation {
        Mutation::Replace { position, byte } => {
            if wire.is_empty() {
                return;
            }
            let index = position as usize % wire.len();
            wire[index] = byte;
        }
        Mutation::Truncate { keep } => wire.truncate(keep as usize),
        Mutation::Append { suffix } => wire.extend_from_slice(&suffix),
    }

    let tampered = SignedEkRecord::from_wire(String::from_utf8_lossy(&wire).into_owned());
    if let Ok((key, payload)) = tampered.verify() {
        assert_eq!(key, expected_key, "tampered record verified under another key");
        assert_eq!(
            payload,
            metadata.encode_canonical().expect("signed metadata encodes"),
            "tampered record verified with another payload"
        );
    }
});
