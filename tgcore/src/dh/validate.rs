use num_bigint::BigUint;
use num_traits::One;

use super::DhError;

/// Exchanged values must stay this many bits away from both ends of the
/// group, i.e. inside `(2^1984, p - 2^1984)` for a 2048-bit modulus.
pub const SAFETY_MARGIN_BITS: usize = 1984;

/// Range check applied to every public DH value.
pub fn validate(value: &BigUint, modulus: &BigUint) -> Result<(), DhError> {
    let one = BigUint::one();
    if modulus <= &one || !(value > &one && value < &(modulus - &one)) {
        return Err(DhError::InvalidParameter("1 < g_x < p - 1 is false"));
    }

    let margin = one << SAFETY_MARGIN_BITS;
    if modulus <= &margin || !(value > &margin && value < &(modulus - &margin)) {
        return Err(DhError::InvalidParameter(
            "2^1984 < g_x < p - 2^1984 is false",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dh::DhConfig;
    use rand::RngCore;

    fn modulus() -> BigUint {
        DhConfig::relay_default().p().clone()
    }

    #[test]
    fn test_rejects_edges_of_the_group() {
        let p = modulus();
        let one = BigUint::one();
        for value in [
            BigUint::from(0u32),
            one.clone(),
            &p - &one,
            p.clone(),
            &p + &one,
        ] {
            assert!(matches!(
                validate(&value, &p),
                Err(DhError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_rejects_values_inside_the_safety_margin() {
        let p = modulus();
        let margin = BigUint::one() << SAFETY_MARGIN_BITS;

        assert!(validate(&BigUint::from(2u32), &p).is_err());
        assert!(validate(&margin, &p).is_err());
        assert!(validate(&(&p - &margin), &p).is_err());
        assert!(validate(&(&margin + 1u32), &p).is_ok());
        assert!(validate(&(&p - &margin - 1u32), &p).is_ok());
    }

    #[test]
    fn test_accepts_random_values_in_range() {
        let p = modulus();
        let margin = BigUint::one() << SAFETY_MARGIN_BITS;
        let span = &p - &margin - &margin - 1u32;
        let mut rng = rand::rng();

        for _ in 0..32 {
            let mut buf = [0u8; 256];
            rng.fill_bytes(&mut buf);
            let value = &margin + 1u32 + BigUint::from_bytes_be(&buf) % &span;
            assert!(validate(&value, &p).is_ok());
        }
    }

    #[test]
    fn test_tiny_modulus_never_panics() {
        let p = BigUint::from(23u32);
        assert!(validate(&BigUint::from(5u32), &p).is_err());
        assert!(validate(&BigUint::from(5u32), &BigUint::one()).is_err());
    }
}
