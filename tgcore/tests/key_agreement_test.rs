// Integration test: both halves of the committed Diffie-Hellman exchange run
// against each other the way two phones would, using only the public API.

use num_bigint::BigUint;
use tgcore::bigint;
use tgcore::dh::{self, DhConfig, DhError, FingerprintScheme, KeyExchangeState};
use tgcore::visualization;

fn salted_config() -> DhConfig {
    DhConfig::relay_default().with_random((0..=255u8).collect())
}

// Helper: run the exchange to completion, returning (caller, callee)
fn agree(scheme: FingerprintScheme) -> (KeyExchangeState, KeyExchangeState) {
    let config = salted_config();
    let mut caller = KeyExchangeState::new_initiator(&config, scheme).unwrap();
    let commitment = caller.commitment().unwrap().to_vec();
    let mut callee = KeyExchangeState::new_responder(&config, commitment, scheme).unwrap();

    let g_b = callee.own_public_wire().unwrap();
    let fingerprint = caller.accept_peer_public(&g_b).unwrap();

    let g_a = caller.own_public_wire().unwrap();
    callee.verify_peer_commitment(&g_a).unwrap();
    assert_eq!(callee.accept_peer_public(&g_a).unwrap(), fingerprint);
    callee.verify_fingerprint(fingerprint).unwrap();

    (caller, callee)
}

#[test]
fn test_both_sides_derive_the_same_key() {
    let _ = env_logger::builder().is_test(true).try_init();

    for scheme in [FingerprintScheme::Sha256, FingerprintScheme::LegacySha1] {
        let (caller, callee) = agree(scheme);

        let a = caller.shared_secret().unwrap();
        let b = callee.shared_secret().unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), 256);
        assert_eq!(caller.key_fingerprint(), callee.key_fingerprint());
        assert_eq!(
            caller.key_fingerprint(),
            Some(dh::fingerprint(a.as_bytes(), scheme))
        );

        // Exponents are single-use.
        assert!(!caller.has_private_exponent());
        assert!(!callee.has_private_exponent());
    }
}

#[test]
fn test_visualization_matches_on_both_phones() {
    let (caller, callee) = agree(FingerprintScheme::Sha256);

    let ours = caller.visualization().unwrap().unwrap();
    let theirs = callee.visualization().unwrap().unwrap();
    assert_eq!(ours, theirs);
    assert!(ours.iter().all(|&i| i < visualization::TABLE_SIZE));

    let secret = caller.shared_secret().unwrap();
    let g_a = caller.initiator_public_wire().unwrap().unwrap();
    assert_eq!(visualization::derive(secret.as_bytes(), &g_a), ours);
    assert_eq!(
        visualization::emojis(ours),
        visualization::emojis(theirs)
    );
}

#[test]
fn test_independent_exchanges_differ() {
    let (first, _) = agree(FingerprintScheme::Sha256);
    let (second, _) = agree(FingerprintScheme::Sha256);
    assert_ne!(
        first.shared_secret().unwrap().as_bytes(),
        second.shared_secret().unwrap().as_bytes()
    );
}

#[test]
fn test_trivial_peer_values_are_rejected() {
    let config = DhConfig::relay_default();
    let p = config.p().clone();
    let p_minus_1 = bigint::to_padded_vec(&(&p - 1u32), 256).unwrap();

    for bad in [vec![0u8], vec![1u8], p_minus_1, bigint::to_padded_vec(&p, 256).unwrap()] {
        let mut caller =
            KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        assert!(matches!(
            caller.accept_peer_public(&bad),
            Err(DhError::InvalidParameter(_))
        ));
        assert!(caller.shared_secret().is_none());
    }
}

#[test]
fn test_values_inside_the_safety_margin_are_rejected() {
    let p = DhConfig::relay_default().p().clone();
    let margin = BigUint::from(1u32) << dh::SAFETY_MARGIN_BITS;

    assert!(dh::validate(&margin, &p).is_err());
    assert!(dh::validate(&(&p - &margin), &p).is_err());
    assert!(dh::validate(&(&margin + 1u32), &p).is_ok());
}

#[test]
fn test_substituted_g_a_fails_the_commitment() {
    let config = salted_config();
    let caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
    let impostor = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
    let callee = KeyExchangeState::new_responder(
        &config,
        caller.commitment().unwrap().to_vec(),
        FingerprintScheme::Sha256,
    )
    .unwrap();

    assert_eq!(
        callee.verify_peer_commitment(&impostor.own_public_wire().unwrap()),
        Err(DhError::CommitmentMismatch)
    );
    assert!(
        callee
            .verify_peer_commitment(&caller.own_public_wire().unwrap())
            .is_ok()
    );
}

#[test]
fn test_public_values_are_validated_and_padded() {
    let config = salted_config();
    for _ in 0..8 {
        let state = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        assert!(dh::validate(state.own_public(), config.p()).is_ok());
        let wire = state.own_public_wire().unwrap();
        assert_eq!(wire.len(), 256);
        assert_eq!(
            dh::commit(state.own_public()).unwrap(),
            state.commitment().unwrap()
        );
    }
}
