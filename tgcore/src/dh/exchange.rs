use num_bigint::BigUint;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{DhConfig, DhError, FingerprintScheme, fingerprint, validate};
use crate::bigint::{self, DH_WIRE_LEN};
use crate::visualization;

/// Attempts at drawing an exponent whose public value passes [`validate`].
const MAX_KEYGEN_ATTEMPTS: usize = 16;

/// The agreed key, always in its 256-byte wire form.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; DH_WIRE_LEN]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; DH_WIRE_LEN] {
        &self.0
    }

    /// Copy of the key that wipes itself when dropped.
    pub fn to_zeroizing_vec(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.to_vec())
    }

    pub fn fingerprint(&self, scheme: FingerprintScheme) -> i64 {
        fingerprint(&self.0, scheme)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// A private exponent, held as its 256-byte big-endian encoding.
///
/// `BigUint` has no way to wipe its limbs, so the exponent only lives here
/// and is widened into a transient integer for each `modpow`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateExponent([u8; DH_WIRE_LEN]);

impl PrivateExponent {
    pub fn as_bytes(&self) -> &[u8; DH_WIRE_LEN] {
        &self.0
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }
}

impl std::fmt::Debug for PrivateExponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateExponent(..)")
    }
}

/// Draw a private exponent uniformly from `(2, p - 1)`.
///
/// Local randomness is XORed with the relay salt, as the relay requires.
pub fn generate_exponent(config: &DhConfig) -> PrivateExponent {
    let two = BigUint::from(2u32);
    let upper = config.p() - 1u32;
    let mut rng = rand::rng();
    loop {
        let mut candidate = PrivateExponent([0u8; DH_WIRE_LEN]);
        rng.fill_bytes(&mut candidate.0);
        for (byte, salt) in candidate.0.iter_mut().zip(config.random()) {
            *byte ^= salt;
        }
        let value = candidate.to_biguint();
        if value > two && value < upper {
            return candidate;
        }
    }
}

/// `generator^exponent mod modulus`.
pub fn compute_public(
    exponent: &PrivateExponent,
    generator: &BigUint,
    modulus: &BigUint,
) -> BigUint {
    generator.modpow(&exponent.to_biguint(), modulus)
}

/// SHA-256 over the 256-byte wire encoding of `value`.
pub fn commit(value: &BigUint) -> Result<[u8; 32], DhError> {
    let wire = bigint::to_padded_vec(value, DH_WIRE_LEN)?;
    Ok(Sha256::digest(&wire).into())
}

/// Validate the peer value, then raise it to our exponent.
pub fn derive_shared_secret(
    peer_value: &BigUint,
    own_exponent: &PrivateExponent,
    modulus: &BigUint,
) -> Result<SharedSecret, DhError> {
    validate(peer_value, modulus)?;
    let secret = peer_value.modpow(&own_exponent.to_biguint(), modulus);
    let minimal = Zeroizing::new(secret.to_bytes_be());
    if minimal.len() > DH_WIRE_LEN {
        return Err(bigint::BigIntError::TooWide {
            needed: minimal.len(),
            width: DH_WIRE_LEN,
        }
        .into());
    }
    let mut out = SharedSecret([0u8; DH_WIRE_LEN]);
    out.0[DH_WIRE_LEN - minimal.len()..].copy_from_slice(&minimal);
    Ok(out)
}

/// Key exchange material owned by exactly one call.
pub struct KeyExchangeState {
    is_initiator: bool,
    scheme: FingerprintScheme,
    modulus: BigUint,
    private_exponent: Option<PrivateExponent>,
    own_public: BigUint,
    own_commitment: Option<[u8; 32]>,
    peer_commitment: Option<Vec<u8>>,
    peer_public: Option<BigUint>,
    shared_secret: Option<SharedSecret>,
    key_fingerprint: Option<i64>,
}

impl KeyExchangeState {
    /// Caller side: draws `a`, computes `g_a` and its commitment.
    pub fn new_initiator(config: &DhConfig, scheme: FingerprintScheme) -> Result<Self, DhError> {
        let mut state = Self::generate(config, scheme, true)?;
        state.own_commitment = Some(commit(&state.own_public)?);
        Ok(state)
    }

    /// Callee side: draws `b`, computes `g_b`, and keeps the caller's
    /// commitment for the check in [`Self::verify_peer_commitment`].
    pub fn new_responder(
        config: &DhConfig,
        peer_commitment: Vec<u8>,
        scheme: FingerprintScheme,
    ) -> Result<Self, DhError> {
        let mut state = Self::generate(config, scheme, false)?;
        state.peer_commitment = Some(peer_commitment);
        Ok(state)
    }

    fn generate(
        config: &DhConfig,
        scheme: FingerprintScheme,
        is_initiator: bool,
    ) -> Result<Self, DhError> {
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            let exponent = generate_exponent(config);
            let own_public = compute_public(&exponent, config.g(), config.p());
            if validate(&own_public, config.p()).is_err() {
                continue;
            }
            return Ok(Self {
                is_initiator,
                scheme,
                modulus: config.p().clone(),
                private_exponent: Some(exponent),
                own_public,
                own_commitment: None,
                peer_commitment: None,
                peer_public: None,
                shared_secret: None,
                key_fingerprint: None,
            });
        }
        Err(DhError::InvalidParameter("could not generate a valid public value"))
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn own_public(&self) -> &BigUint {
        &self.own_public
    }

    /// Our public value as sent on the wire (256 bytes, left-padded).
    pub fn own_public_wire(&self) -> Result<Vec<u8>, DhError> {
        Ok(bigint::to_padded_vec(&self.own_public, DH_WIRE_LEN)?)
    }

    pub fn commitment(&self) -> Option<[u8; 32]> {
        self.own_commitment
    }

    /// Responder check: the revealed `g_a` must hash to the commitment that
    /// arrived with the call request.
    pub fn verify_peer_commitment(&self, revealed: &[u8]) -> Result<(), DhError> {
        let expected = self
            .peer_commitment
            .as_deref()
            .ok_or(DhError::CommitmentMismatch)?;
        let digest = Sha256::digest(revealed);
        if expected.len() == digest.len() && bool::from(digest.as_slice().ct_eq(expected)) {
            Ok(())
        } else {
            Err(DhError::CommitmentMismatch)
        }
    }

    /// Validate the peer's public value and derive the shared secret.
    ///
    /// Consumes the private exponent. Receiving the same value again returns
    /// the existing fingerprint; a different value is rejected.
    pub fn accept_peer_public(&mut self, peer_bytes: &[u8]) -> Result<i64, DhError> {
        let peer = bigint::from_bytes_be(peer_bytes);

        if let (Some(existing), Some(fp)) = (&self.peer_public, self.key_fingerprint) {
            return if *existing == peer {
                Ok(fp)
            } else {
                Err(DhError::SecretAlreadyDerived)
            };
        }

        validate(&peer, &self.modulus)?;
        let exponent = self
            .private_exponent
            .take()
            .ok_or(DhError::ExponentConsumed)?;
        let secret = derive_shared_secret(&peer, &exponent, &self.modulus);
        drop(exponent);
        let secret = secret?;

        let fp = secret.fingerprint(self.scheme);
        self.peer_public = Some(peer);
        self.shared_secret = Some(secret);
        self.key_fingerprint = Some(fp);
        Ok(fp)
    }

    /// Compare our fingerprint with the one the peer claims, without
    /// branching on individual bytes.
    pub fn verify_fingerprint(&self, claimed: i64) -> Result<(), DhError> {
        let ours = self.key_fingerprint.ok_or(DhError::FingerprintMismatch)?;
        if bool::from(ours.ct_eq(&claimed)) {
            Ok(())
        } else {
            Err(DhError::FingerprintMismatch)
        }
    }

    /// Whether `peer_bytes` is the value the secret was derived from.
    /// `None` until a secret exists.
    pub fn matches_peer_public(&self, peer_bytes: &[u8]) -> Option<bool> {
        self.peer_public
            .as_ref()
            .map(|existing| *existing == bigint::from_bytes_be(peer_bytes))
    }

    pub fn key_fingerprint(&self) -> Option<i64> {
        self.key_fingerprint
    }

    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        self.shared_secret.as_ref()
    }

    pub fn has_private_exponent(&self) -> bool {
        self.private_exponent.is_some()
    }

    /// The caller's public value in wire form; both sides feed this into the
    /// visualization.
    pub fn initiator_public_wire(&self) -> Result<Option<Vec<u8>>, DhError> {
        let value = if self.is_initiator {
            Some(&self.own_public)
        } else {
            self.peer_public.as_ref()
        };
        value
            .map(|v| bigint::to_padded_vec(v, DH_WIRE_LEN).map_err(DhError::from))
            .transpose()
    }

    /// Emoji indices for out-of-band comparison, once the secret exists.
    pub fn visualization(&self) -> Result<Option<[usize; 4]>, DhError> {
        let Some(secret) = &self.shared_secret else {
            return Ok(None);
        };
        Ok(self
            .initiator_public_wire()?
            .map(|g_a| visualization::derive(secret.as_bytes(), &g_a)))
    }

    /// Move the shared secret out, leaving nothing behind.
    pub fn take_shared_secret(&mut self) -> Option<SharedSecret> {
        self.shared_secret.take()
    }

    /// Drop every secret this state still holds.
    pub fn wipe(&mut self) {
        self.private_exponent.zeroize();
        self.shared_secret.zeroize();
    }
}

impl std::fmt::Debug for KeyExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeState")
            .field("is_initiator", &self.is_initiator)
            .field("scheme", &self.scheme)
            .field("has_private_exponent", &self.private_exponent.is_some())
            .field("has_peer_public", &self.peer_public.is_some())
            .field("has_shared_secret", &self.shared_secret.is_some())
            .field("key_fingerprint", &self.key_fingerprint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dh() -> DhConfig {
        DhConfig::relay_default()
    }

    #[test]
    fn test_exponent_in_range() {
        let config = dh();
        let upper = config.p() - 1u32;
        for _ in 0..8 {
            let a = generate_exponent(&config).to_biguint();
            assert!(a > BigUint::from(2u32));
            assert!(a < upper);
        }
    }

    #[test]
    fn test_relay_salt_is_mixed_in() {
        let config = dh().with_random(vec![0xaa; 256]);
        let a = generate_exponent(&config).to_biguint();
        assert!(a < config.p() - 1u32);
    }

    #[test]
    fn test_dh_agreement() {
        let config = dh();
        let a = generate_exponent(&config);
        let b = generate_exponent(&config);
        let g_a = compute_public(&a, config.g(), config.p());
        let g_b = compute_public(&b, config.g(), config.p());

        let s1 = derive_shared_secret(&g_a, &b, config.p()).unwrap();
        let s2 = derive_shared_secret(&g_b, &a, config.p()).unwrap();
        assert_eq!(s1.as_bytes(), s2.as_bytes());
    }

    #[test]
    fn test_derive_rejects_invalid_peer_value() {
        let config = dh();
        let a = generate_exponent(&config);
        assert_eq!(
            derive_shared_secret(&BigUint::from(1u32), &a, config.p()).unwrap_err(),
            DhError::InvalidParameter("1 < g_x < p - 1 is false")
        );
    }

    #[test]
    fn test_commitment_covers_wire_encoding() {
        let value = BigUint::from(0x1234u32);
        let mut wire = vec![0u8; 256];
        wire[254] = 0x12;
        wire[255] = 0x34;
        let expected: [u8; 32] = Sha256::digest(&wire).into();
        assert_eq!(commit(&value).unwrap(), expected);
    }

    #[test]
    fn test_full_exchange_between_states() {
        let config = dh();
        let mut caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let commitment = caller.commitment().unwrap().to_vec();
        let mut callee =
            KeyExchangeState::new_responder(&config, commitment, FingerprintScheme::Sha256)
                .unwrap();

        let g_b = callee.own_public_wire().unwrap();
        let fp_caller = caller.accept_peer_public(&g_b).unwrap();
        assert!(!caller.has_private_exponent());

        let g_a = caller.own_public_wire().unwrap();
        callee.verify_peer_commitment(&g_a).unwrap();
        let fp_callee = callee.accept_peer_public(&g_a).unwrap();
        callee.verify_fingerprint(fp_caller).unwrap();

        assert_eq!(fp_caller, fp_callee);
        assert_eq!(
            caller.shared_secret().unwrap().as_bytes(),
            callee.shared_secret().unwrap().as_bytes()
        );
        assert_eq!(
            caller.visualization().unwrap(),
            callee.visualization().unwrap()
        );
    }

    #[test]
    fn test_commitment_mismatch_detected() {
        let config = dh();
        let callee = KeyExchangeState::new_responder(&config, vec![0u8; 32], FingerprintScheme::Sha256)
            .unwrap();
        let caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        assert_eq!(
            callee.verify_peer_commitment(&caller.own_public_wire().unwrap()),
            Err(DhError::CommitmentMismatch)
        );
    }

    #[test]
    fn test_rederive_with_other_value_is_rejected() {
        let config = dh();
        let mut caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let first = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let second = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();

        let fp = caller.accept_peer_public(&first.own_public_wire().unwrap()).unwrap();
        assert_eq!(
            caller.accept_peer_public(&first.own_public_wire().unwrap()),
            Ok(fp)
        );
        assert_eq!(
            caller.accept_peer_public(&second.own_public_wire().unwrap()),
            Err(DhError::SecretAlreadyDerived)
        );
    }

    #[test]
    fn test_fingerprint_mismatch_detected() {
        let config = dh();
        let mut caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let peer = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let fp = caller.accept_peer_public(&peer.own_public_wire().unwrap()).unwrap();

        assert!(caller.verify_fingerprint(fp).is_ok());
        assert_eq!(
            caller.verify_fingerprint(fp.wrapping_add(1)),
            Err(DhError::FingerprintMismatch)
        );
    }

    #[test]
    fn test_wipe_drops_secrets() {
        let config = dh();
        let mut caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let peer = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        caller.accept_peer_public(&peer.own_public_wire().unwrap()).unwrap();

        caller.wipe();
        assert!(!caller.has_private_exponent());
        assert!(caller.shared_secret().is_none());
        assert!(caller.visualization().unwrap().is_none());
    }

    /// Test that exponent storage is wiped in place rather than just freed
    #[test]
    fn test_exponent_storage_is_zeroized() {
        fn wiped_on_drop<T: ZeroizeOnDrop>(_: &T) {}

        let mut exponent = generate_exponent(&dh());
        wiped_on_drop(&exponent);
        assert!(exponent.as_bytes().iter().any(|&b| b != 0));
        exponent.zeroize();
        assert!(exponent.as_bytes().iter().all(|&b| b == 0));
    }

    /// Test that both wipe() and a derivation leave no exponent behind
    #[test]
    fn test_exponent_released_by_wipe_and_derivation() {
        let config = dh();
        let peer = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        let g_peer = peer.own_public_wire().unwrap();

        let mut idle = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        assert!(idle.has_private_exponent());
        idle.wipe();
        assert!(!idle.has_private_exponent());
        assert_eq!(
            idle.accept_peer_public(&g_peer),
            Err(DhError::ExponentConsumed)
        );

        let mut caller = KeyExchangeState::new_initiator(&config, FingerprintScheme::Sha256).unwrap();
        caller.accept_peer_public(&g_peer).unwrap();
        assert!(!caller.has_private_exponent());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let state = KeyExchangeState::new_initiator(&dh(), FingerprintScheme::Sha256).unwrap();
        let rendered = format!("{:?}", state);
        assert!(rendered.contains("has_private_exponent: true"));
        assert!(!rendered.contains("own_public"));
    }
}
