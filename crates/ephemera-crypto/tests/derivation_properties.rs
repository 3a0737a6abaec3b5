//! Property-based tests for key derivation and signed packets.
//!
//! # Properties
//!
//! - Determinism: the same seed and tag always derive the same keypair
//! - Domain separation: different tags derive unrelated keys
//! - Seed separation: different seeds derive different keys
//! - Packet round trip: verify(sign(payload)) returns the signer and payload
//! - Sealing: a sealed seed opens only in its own slot

use ephemera_crypto::{
    DEVICE_EK_ENCRYPTION, DomainTag, EphemeralSeed, SigningKey, StoreKey, derive_dh_keypair,
    open_seed, seal_seed, sign_to_string, verify_and_extract,
};
use proptest::prelude::*;

const OTHER_PURPOSE: DomainTag = DomainTag::new(b"device-ek-signing");

proptest! {
    #[test]
    fn prop_derivation_is_deterministic(seed in any::<[u8; 32]>()) {
        let seed = EphemeralSeed::from_bytes(seed);

        let first = derive_dh_keypair(&seed, DEVICE_EK_ENCRYPTION);
        let second = derive_dh_keypair(&seed, DEVICE_EK_ENCRYPTION);

        prop_assert_eq!(first.kid(), second.kid());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_domain_separation(seed in any::<[u8; 32]>()) {
        let seed = EphemeralSeed::from_bytes(seed);

        let device = derive_dh_keypair(&seed, DEVICE_EK_ENCRYPTION);
        let other = derive_dh_keypair(&seed, OTHER_PURPOSE);

        prop_assert_ne!(device.kid(), other.kid());
    }

    #[test]
    fn prop_distinct_seeds_distinct_keys(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        prop_assume!(a != b);

        let first = derive_dh_keypair(&EphemeralSeed::from_bytes(a), DEVICE_EK_ENCRYPTION);
        let second = derive_dh_keypair(&EphemeralSeed::from_bytes(b), DEVICE_EK_ENCRYPTION);

        prop_assert_ne!(first.kid(), second.kid());
    }

    #[test]
    fn prop_packet_round_trip(
        key in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let key = SigningKey::from_bytes(&key);

        let packet = sign_to_string(&key, &payload);
        let (signer, extracted) = verify_and_extract(&packet).unwrap();

        prop_assert_eq!(signer, key.verifying_key());
        prop_assert_eq!(extracted, payload);
    }

    #[test]
    fn prop_seal_binds_slot(
        key in any::<[u8; 32]>(),
        seed in any::<[u8; 32]>(),
        nonce in any::<[u8; 24]>(),
        slot in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let key = StoreKey::from_bytes(key);
        let seed = EphemeralSeed::from_bytes(seed);

        let sealed = seal_seed(&key, &slot, &seed, nonce);
        prop_assert_eq!(open_seed(&key, &slot, &sealed).unwrap(), seed);

        let mut other_slot = slot.clone();
        other_slot[0] ^= 0x01;
        prop_assert!(open_seed(&key, &other_slot, &sealed).is_err());
    }
}

#[test]
fn fixed_seed_scenario() {
    // Seed 0x01..01 under the device tag always yields the same KID.
    let seed = EphemeralSeed::from_bytes([0x01; 32]);

    let first = derive_dh_keypair(&seed, DEVICE_EK_ENCRYPTION).kid();
    let second = derive_dh_keypair(&seed.clone(), DEVICE_EK_ENCRYPTION).kid();

    assert_eq!(first, second);
    assert_eq!(first.to_hex().len(), 64);
}
