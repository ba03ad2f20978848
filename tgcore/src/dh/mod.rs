//! Diffie-Hellman key agreement for call setup.
//!
//! # Protocol Overview
//!
//! 1. Caller draws `a`, computes `g_a = g^a mod p` and sends `SHA-256(g_a)`
//! 2. Callee draws `b` and answers with `g_b`
//! 3. Caller validates `g_b`, derives `g_b^a`, and reveals `g_a` plus the key
//!    fingerprint
//! 4. Callee checks `g_a` against the hash from step 1, derives `g_a^b` and
//!    compares fingerprints
//!
//! Every value received from the network goes through [`validate`] before it
//! touches any arithmetic.

mod exchange;
mod fingerprint;
mod validate;

pub use exchange::{
    KeyExchangeState, PrivateExponent, SharedSecret, commit, compute_public,
    derive_shared_secret, generate_exponent,
};
pub use fingerprint::{FingerprintScheme, fingerprint};
pub use validate::{SAFETY_MARGIN_BITS, validate};

use num_bigint::BigUint;
use thiserror::Error;

use crate::bigint::BigIntError;

/// Width of every modulus accepted from the signaling peer.
pub const MODULUS_BITS: u64 = 2048;

/// The 2048-bit safe prime served by the signaling relay (generator 3).
pub const RELAY_DH_PRIME_HEX: &str = concat!(
    "c71caeb9c6b1c9048e6c522f70f13f73980d40238e3e21c14934d037563d930f",
    "48198a0aa7c14058229493d22530f4dbfa336f6e0ac925139543aed44cce7c37",
    "20fd51f69458705ac68cd4fe6b6b13abdc9746512969328454f18faf8c595f64",
    "2477fe96bb2a941d5bcd1d4ac8cc49880708fa9b378e3c4f3a9060bee67cf9a4",
    "a4a695811051907e162753b56b0f6b410dba74d8a84b2a14b3144e0ef1284754",
    "fd17ed950d5965b4b9dd46582db1178d169c6bc465b0d6ff9ca3928fef5b9ae4",
    "e418fc15e83ebea0f87fa9ff5eed70050ded2849f47bf959d956850ce929851f",
    "0d8115f635b105ee2e4e15d04b2454bf6f4fadf034b10403119cd8e3b92fcc5b",
);

pub const RELAY_DH_GENERATOR: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DhError {
    #[error("DH value outside the safe range: {0}")]
    InvalidParameter(&'static str),

    #[error("peer public value does not match its commitment")]
    CommitmentMismatch,

    #[error("key fingerprint mismatch")]
    FingerprintMismatch,

    #[error("shared secret already derived from a different peer value")]
    SecretAlreadyDerived,

    #[error("private exponent already consumed")]
    ExponentConsumed,

    #[error("weak domain parameters: {0}")]
    WeakDomain(&'static str),

    #[error("codec error: {0}")]
    Codec(#[from] BigIntError),
}

/// Domain parameters for one exchange attempt.
///
/// Fetched from the relay at the start of every exchange and never mutated
/// afterwards; share it by cloning into an `Arc`.
#[derive(Clone, PartialEq, Eq)]
pub struct DhConfig {
    p: BigUint,
    g: BigUint,
    random: Vec<u8>,
    version: i32,
}

impl DhConfig {
    /// Build domain parameters from the relay's answer.
    ///
    /// `random` is the relay-provided salt mixed into local randomness; it
    /// may be empty.
    pub fn new(p: &[u8], g: u32, random: Vec<u8>, version: i32) -> Result<Self, DhError> {
        let p = BigUint::from_bytes_be(p);
        if p.bits() != MODULUS_BITS {
            return Err(DhError::WeakDomain("modulus must be exactly 2048 bits"));
        }
        if g < 2 {
            return Err(DhError::WeakDomain("generator must be at least 2"));
        }
        Ok(Self {
            p,
            g: BigUint::from(g),
            random,
            version,
        })
    }

    /// The parameters the relay serves by default.
    pub fn relay_default() -> Self {
        let p = hex::decode(RELAY_DH_PRIME_HEX).unwrap_or_default();
        Self {
            p: BigUint::from_bytes_be(&p),
            g: BigUint::from(RELAY_DH_GENERATOR),
            random: Vec::new(),
            version: 1,
        }
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn g(&self) -> &BigUint {
        &self.g
    }

    pub fn random(&self) -> &[u8] {
        &self.random
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Copy of these parameters carrying a fresh relay salt.
    pub fn with_random(&self, random: Vec<u8>) -> Self {
        Self {
            random,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for DhConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhConfig")
            .field("p_bits", &self.p.bits())
            .field("g", &self.g)
            .field("random_len", &self.random.len())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_default_is_2048_bits() {
        let dh = DhConfig::relay_default();
        assert_eq!(dh.p().bits(), 2048);
        assert_eq!(dh.g(), &BigUint::from(3u32));
    }

    #[test]
    fn test_short_modulus_rejected() {
        let p = [0xffu8; 128];
        assert_eq!(
            DhConfig::new(&p, 3, Vec::new(), 1),
            Err(DhError::WeakDomain("modulus must be exactly 2048 bits"))
        );
    }

    /// Test that a modulus wider than the 256-byte wire fields is refused up front
    #[test]
    fn test_wide_modulus_rejected() {
        let mut p = vec![0x01u8];
        p.extend(hex::decode(RELAY_DH_PRIME_HEX).unwrap());
        assert_eq!(
            DhConfig::new(&p, 3, Vec::new(), 1),
            Err(DhError::WeakDomain("modulus must be exactly 2048 bits"))
        );
    }

    #[test]
    fn test_trivial_generator_rejected() {
        let p = hex::decode(RELAY_DH_PRIME_HEX).unwrap();
        assert!(DhConfig::new(&p, 1, Vec::new(), 1).is_err());
        assert!(DhConfig::new(&p, 3, Vec::new(), 1).is_ok());
    }

    #[test]
    fn test_debug_does_not_dump_modulus() {
        let rendered = format!("{:?}", DhConfig::relay_default());
        assert!(rendered.contains("p_bits: 2048"));
        assert!(!rendered.contains("c71caeb9"));
    }
}
