use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Hash used to turn the shared secret into the exchanged 64-bit fingerprint.
///
/// Both peers must agree on the scheme for a given protocol version; there is
/// no in-band negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FingerprintScheme {
    #[default]
    Sha256,
    /// Older clients: SHA-1 of the secret.
    LegacySha1,
}

/// Last 8 bytes of the digest, read as a little-endian signed integer.
pub fn fingerprint(secret: &[u8], scheme: FingerprintScheme) -> i64 {
    let mut tail = [0u8; 8];
    match scheme {
        FingerprintScheme::Sha256 => {
            let digest = Sha256::digest(secret);
            tail.copy_from_slice(&digest[digest.len() - 8..]);
        }
        FingerprintScheme::LegacySha1 => {
            let digest = Sha1::digest(secret);
            tail.copy_from_slice(&digest[digest.len() - 8..]);
        }
    }
    i64::from_le_bytes(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let secret = [0x42u8; 256];
        assert_eq!(
            fingerprint(&secret, FingerprintScheme::Sha256),
            fingerprint(&secret, FingerprintScheme::Sha256)
        );
    }

    #[test]
    fn test_fingerprint_reads_tail_little_endian() {
        let secret = b"abc";
        let digest = Sha256::digest(secret);
        let expected = i64::from_le_bytes(digest[24..32].try_into().unwrap());
        assert_eq!(fingerprint(secret, FingerprintScheme::Sha256), expected);

        let digest = Sha1::digest(secret);
        let expected = i64::from_le_bytes(digest[12..20].try_into().unwrap());
        assert_eq!(fingerprint(secret, FingerprintScheme::LegacySha1), expected);
    }

    #[test]
    fn test_known_vector() {
        // SHA-256("abc") ends in ...b410ff61f20015ad
        assert_eq!(
            fingerprint(b"abc", FingerprintScheme::Sha256),
            i64::from_le_bytes([0xb4, 0x10, 0xff, 0x61, 0xf2, 0x00, 0x15, 0xad])
        );
    }

    #[test]
    fn test_schemes_disagree() {
        let secret = [7u8; 256];
        assert_ne!(
            fingerprint(&secret, FingerprintScheme::Sha256),
            fingerprint(&secret, FingerprintScheme::LegacySha1)
        );
    }
}
