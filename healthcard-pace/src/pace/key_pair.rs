//! Ephemeral elliptic-curve key pairs.


use std::fmt;

use num_traits::{Signed, Zero};
use num_integer::Integer;
use rand::{CryptoRng, RngCore};
use rand::rngs::OsRng;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{bigint_from_be_slice, bigint_to_be_bytes_padded};
use crate::crypt::elliptic::{EcPoint, EllipticCurve};
use crate::pace::Error;


fn scalar_len(curve: &EllipticCurve) -> usize {
    ((curve.order().bits() + 7) / 8) as usize
}


/// An ephemeral key pair used for one step of a single PACE attempt.
///
/// The private key is wiped from memory when the key pair is dropped.
#[derive(ZeroizeOnDrop)]
pub struct PaceKeyPair {
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: EcPoint,
}
impl PaceKeyPair {
    /// Generates a fresh key pair on the given curve using the operating system's random number
    /// generator.
    pub fn generate(curve: &EllipticCurve) -> Self {
        Self::generate_with_rng(curve, &mut OsRng)
    }

    /// Generates a fresh key pair on the given curve.
    ///
    /// The private key is drawn uniformly from the bytes the RNG returns and reduced modulo the
    /// order of the generator; zero is rejected.
    pub fn generate_with_rng<R: CryptoRng + RngCore>(curve: &EllipticCurve, rng: &mut R) -> Self {
        let length = scalar_len(curve);
        let mut random_bytes = Zeroizing::new(vec![0u8; length]);
        loop {
            rng.fill_bytes(&mut random_bytes);
            let private_key = bigint_from_be_slice(&random_bytes).mod_floor(curve.order());
            if private_key.is_zero() {
                continue;
            }
            let public_key = curve.multiply_generator(&private_key);
            return Self {
                private_key: bigint_to_be_bytes_padded(&private_key, length),
                public_key,
            };
        }
    }

    /// Creates a key pair from a known private key.
    ///
    /// The private key must be in the range `[1, n)` where `n` is the order of the generator.
    pub fn from_private_key(curve: &EllipticCurve, private_key: &[u8]) -> Result<Self, Error> {
        let scalar = bigint_from_be_slice(private_key);
        if scalar.is_zero() || scalar.is_negative() || &scalar >= curve.order() {
            return Err(Error::InvalidPrivateKey);
        }
        let public_key = curve.multiply_generator(&scalar);
        Ok(Self {
            private_key: bigint_to_be_bytes_padded(&scalar, scalar_len(curve)),
            public_key,
        })
    }

    pub fn public_key(&self) -> &EcPoint {
        &self.public_key
    }

    /// Multiplies a point received from the card with the private key.
    ///
    /// Fails if the point is not on the curve or the product is the point at infinity.
    pub fn multiply_private_key(&self, curve: &EllipticCurve, point: &EcPoint) -> Result<EcPoint, Error> {
        if !curve.contains(point) {
            return Err(Error::SuppliedPointNotOnCurve);
        }
        let scalar = bigint_from_be_slice(&self.private_key);
        let product = curve.scalar_mult(&scalar, point);
        if product.is_infinite() {
            return Err(Error::ResultWasInfinite);
        }
        Ok(product)
    }
}
impl fmt::Debug for PaceKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaceKeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::elliptic::curves::BRAINPOOL_P256R1;
    use hex_literal::hex;

    #[test]
    fn test_icao_appendix_g1_mapping_key() {
        let curve = &*BRAINPOOL_P256R1;
        let key_pair = PaceKeyPair::from_private_key(curve, &hex!("
            7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C
            F21F249D 953BC46F 4C6E1925 9C010F99
        ")).unwrap();
        assert_eq!(
            curve.encode_point(key_pair.public_key()),
            hex!("
                04
                7ACF3EFC 982EC455 65A4B155 129EFBC7 4650DCBF A6362D89 6FC70262 E0C2CC5E
                544552DC B6725218 799115B5 5C9BAA6D 9F6BC3A9 618E70C2 5AF71777 A9C4922D
            "),
        );
    }

    #[test]
    fn test_generate() {
        let curve = &*BRAINPOOL_P256R1;
        let first = PaceKeyPair::generate(curve);
        let second = PaceKeyPair::generate(curve);
        assert!(curve.contains(first.public_key()));
        assert!(!first.public_key().is_infinite());
        assert_ne!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_invalid_private_keys() {
        let curve = &*BRAINPOOL_P256R1;
        assert!(matches!(PaceKeyPair::from_private_key(curve, &[0x00]), Err(Error::InvalidPrivateKey)));
        let order = bigint_to_be_bytes_padded(curve.order(), 32);
        assert!(matches!(PaceKeyPair::from_private_key(curve, &order), Err(Error::InvalidPrivateKey)));
    }

    #[test]
    fn test_multiply_rejects_foreign_point() {
        let curve = &*BRAINPOOL_P256R1;
        let key_pair = PaceKeyPair::from_private_key(curve, &[0x02]).unwrap();
        let off_curve = EcPoint::new(1.into(), 1.into());
        assert!(matches!(key_pair.multiply_private_key(curve, &off_curve), Err(Error::SuppliedPointNotOnCurve)));
        assert!(matches!(key_pair.multiply_private_key(curve, &EcPoint::Infinite), Err(Error::ResultWasInfinite)));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key_pair = PaceKeyPair::from_private_key(&BRAINPOOL_P256R1, &[0x5A, 0xA5]).unwrap();
        let debugged = format!("{:?}", key_pair);
        assert!(debugged.contains("<redacted>"));
        assert!(!debugged.contains("5AA5"));
    }
}
