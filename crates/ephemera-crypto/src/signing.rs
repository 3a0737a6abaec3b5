//! Signed packets: Ed25519 signatures over opaque payloads.
//!
//! A signed packet carries the signer's public key, the payload, and the
//! signature, so a verifier can check it without knowing the signer in
//! advance. Identity binding (is this signer one of our devices?) is the
//! caller's job.
//!
//! # Format
//!
//! ```text
//! base64( CBOR { version: u8, signer: [u8; 32], payload: bytes, signature: bytes } )
//! ```
//!
//! The signature covers `SIGNATURE_CONTEXT || payload`, never the bare
//! payload, so these signatures cannot be replayed as signatures in some
//! other protocol using the same identity key.
//!
//! Decoding is strict: the CBOR must be exactly what [`sign_to_string`]
//! would produce for the same fields. Trailing bytes, unknown fields and
//! alternative encodings are malformed, so each `(signer, payload,
//! signature)` has a single packet string.

use base64::{Engine, engine::general_purpose::STANDARD};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::SignatureError;

/// Packet format version produced by this build
pub const PACKET_VERSION: u8 = 1;

/// Context prefix signed ahead of every payload
pub const SIGNATURE_CONTEXT: &[u8] = b"ephemera signed packet v1\0";

/// Maximum accepted encoded packet length (base64 characters)
pub const MAX_PACKET_LEN: usize = 64 * 1024;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignedPacket {
    version: u8,
    signer: [u8; 32],
    payload: Vec<u8>,
    signature: Vec<u8>,
}

/// Sign a payload and encode the result as a packet string.
pub fn sign_to_string(key: &SigningKey, payload: &[u8]) -> String {
    let signature = key.sign(&signed_message(payload));

    let packet = SignedPacket {
        version: PACKET_VERSION,
        signer: key.verifying_key().to_bytes(),
        payload: payload.to_vec(),
        signature: signature.to_bytes().to_vec(),
    };

    STANDARD.encode(encode_packet(&packet))
}

fn encode_packet(packet: &SignedPacket) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(packet.payload.len() + 128);
    let Ok(()) = ciborium::into_writer(packet, &mut bytes) else {
        unreachable!("CBOR encoding into a Vec cannot fail");
    };
    bytes
}

/// Verify a packet string and extract `(signer, payload)`.
///
/// # Errors
///
/// - `TooLarge` if the packet exceeds [`MAX_PACKET_LEN`]
/// - `Malformed` if the packet is not valid base64 or CBOR, or not in
///   canonical form
/// - `UnsupportedVersion` for unknown packet versions
/// - `InvalidSignerKey` if the embedded key is not a valid Ed25519 point
/// - `VerificationFailed` if the signature does not verify
pub fn verify_and_extract(packet: &str) -> Result<(VerifyingKey, Vec<u8>), SignatureError> {
    if packet.len() > MAX_PACKET_LEN {
        return Err(SignatureError::TooLarge { size: packet.len(), max: MAX_PACKET_LEN });
    }

    let bytes = STANDARD.decode(packet).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let decoded: SignedPacket = ciborium::from_reader(bytes.as_slice())
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if encode_packet(&decoded) != bytes {
        return Err(SignatureError::Malformed("non-canonical packet encoding".to_string()));
    }

    if decoded.version != PACKET_VERSION {
        return Err(SignatureError::UnsupportedVersion(decoded.version));
    }

    let signer = VerifyingKey::from_bytes(&decoded.signer)
        .map_err(|e| SignatureError::InvalidSignerKey(e.to_string()))?;

    let signature = Signature::from_slice(&decoded.signature)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    signer
        .verify_strict(&signed_message(&decoded.payload), &signature)
        .map_err(|_| SignatureError::VerificationFailed)?;

    Ok((signer, decoded.payload))
}

fn signed_message(payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNATURE_CONTEXT.len() + payload.len());
    message.extend_from_slice(SIGNATURE_CONTEXT);
    message.extend_from_slice(payload);
    message
}
