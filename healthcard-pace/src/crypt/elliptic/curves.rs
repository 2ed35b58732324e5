//! Specific elliptic curves that can be used with PACE.
//!
//! Most parameters were taken from the [Standard Curve Database](https://neuromancer.sk/std/). The
//! standardized domain parameters are listed in ICAO Document 9303 Part 11 Section 9.5.1; only the
//! curves used by health cards are provided.


use std::sync::LazyLock;

use hex_literal::hex;

use crate::crypt::bigint_from_be_slice;
use crate::crypt::elliptic::{EcPoint, EllipticCurve};


fn curve(
    name: &'static str,
    prime: &[u8],
    coefficient_a: &[u8],
    coefficient_b: &[u8],
    generator_x: &[u8],
    generator_y: &[u8],
    order: &[u8],
) -> EllipticCurve {
    EllipticCurve::new(
        name,
        bigint_from_be_slice(prime),
        bigint_from_be_slice(coefficient_a),
        bigint_from_be_slice(coefficient_b),
        EcPoint::new(bigint_from_be_slice(generator_x), bigint_from_be_slice(generator_y)),
        bigint_from_be_slice(order),
        1,
    )
}


pub static NIST_P256: LazyLock<EllipticCurve> = LazyLock::new(|| curve(
    "secp256r1",
    &hex!("ffffffff00000001000000000000000000000000ffffffffffffffffffffffff"),
    &hex!("ffffffff00000001000000000000000000000000fffffffffffffffffffffffc"),
    &hex!("5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b"),
    &hex!("6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296"),
    &hex!("4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5"),
    &hex!("ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551"),
));

pub static NIST_P384: LazyLock<EllipticCurve> = LazyLock::new(|| curve(
    "secp384r1",
    &hex!("fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000ffffffff"),
    &hex!("fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000fffffffc"),
    &hex!("b3312fa7e23ee7e4988e056be3f82d19181d9c6efe8141120314088f5013875ac656398d8a2ed19d2a85c8edd3ec2aef"),
    &hex!("aa87ca22be8b05378eb1c71ef320ad746e1d3b628ba79b9859f741e082542a385502f25dbf55296c3a545e3872760ab7"),
    &hex!("3617de4a96262c6f5d9e98bf9292dc29f8f41dbd289a147ce9da3113b5f0b8c00a60b1ce1d7e819d7a431d7c90ea0e5f"),
    &hex!("ffffffffffffffffffffffffffffffffffffffffffffffffc7634d81f4372ddf581a0db248b0a77aecec196accc52973"),
));

pub static BRAINPOOL_P256R1: LazyLock<EllipticCurve> = LazyLock::new(|| curve(
    "brainpoolP256r1",
    &hex!("a9fb57dba1eea9bc3e660a909d838d726e3bf623d52620282013481d1f6e5377"),
    &hex!("7d5a0975fc2c3057eef67530417affe7fb8055c126dc5c6ce94a4b44f330b5d9"),
    &hex!("26dc5c6ce94a4b44f330b5d9bbd77cbf958416295cf7e1ce6bccdc18ff8c07b6"),
    &hex!("8bd2aeb9cb7e57cb2c4b482ffc81b7afb9de27e1e3bd23c23a4453bd9ace3262"),
    &hex!("547ef835c3dac4fd97f8461a14611dc9c27745132ded8e545c1d54c72f046997"),
    &hex!("a9fb57dba1eea9bc3e660a909d838d718c397aa3b561a6f7901e0e82974856a7"),
));

pub static BRAINPOOL_P384R1: LazyLock<EllipticCurve> = LazyLock::new(|| curve(
    "brainpoolP384r1",
    &hex!("8cb91e82a3386d280f5d6f7e50e641df152f7109ed5456b412b1da197fb71123acd3a729901d1a71874700133107ec53"),
    &hex!("7bc382c63d8c150c3c72080ace05afa0c2bea28e4fb22787139165efba91f90f8aa5814a503ad4eb04a8c7dd22ce2826"),
    &hex!("04a8c7dd22ce28268b39b55416f0447c2fb77de107dcd2a62e880ea53eeb62d57cb4390295dbc9943ab78696fa504c11"),
    &hex!("1d1c64f068cf45ffa2a63a81b7c13f6b8847a3e77ef14fe3db7fcafe0cbd10e8e826e03436d646aaef87b2e247d4af1e"),
    &hex!("8abe1d7520f9c2a45cb1eb8e95cfd55262b70b29feec5864e19c054ff99129280e4646217791811142820341263c5315"),
    &hex!("8cb91e82a3386d280f5d6f7e50e641df152f7109ed5456b31f166e6cac0425a7cf3ab6af6b7fc3103b883202e9046565"),
));

pub static BRAINPOOL_P512R1: LazyLock<EllipticCurve> = LazyLock::new(|| curve(
    "brainpoolP512r1",
    &hex!("aadd9db8dbe9c48b3fd4e6ae33c9fc07cb308db3b3c9d20ed6639cca703308717d4d9b009bc66842aecda12ae6a380e62881ff2f2d82c68528aa6056583a48f3"),
    &hex!("7830a3318b603b89e2327145ac234cc594cbdd8d3df91610a83441caea9863bc2ded5d5aa8253aa10a2ef1c98b9ac8b57f1117a72bf2c7b9e7c1ac4d77fc94ca"),
    &hex!("3df91610a83441caea9863bc2ded5d5aa8253aa10a2ef1c98b9ac8b57f1117a72bf2c7b9e7c1ac4d77fc94cadc083e67984050b75ebae5dd2809bd638016f723"),
    &hex!("81aee4bdd82ed9645a21322e9c4c6a9385ed9f70b5d916c1b43b62eef4d0098eff3b1f78e2d0d48d50d1687b93b97d5f7c6d5047406a5e688b352209bcb9f822"),
    &hex!("7dde385d566332ecc0eabfa9cf7822fdf209f70024a57b1aa000c55b881f8111b2dcde494a5f485e5bca4bd88a2763aed1ca2b2fa8f0540678cd1e0f3ad80892"),
    &hex!("aadd9db8dbe9c48b3fd4e6ae33c9fc07cb308db3b3c9d20ed6639cca70330870553e5c414ca92619418661197fac10471db1d381085ddaddb58796829ca90069"),
));


/// A standardized domain parameter set usable with ECDH PACE.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StandardDomain {
    NistP256,
    BrainpoolP256r1,
    NistP384,
    BrainpoolP384r1,
    BrainpoolP512r1,
}
impl StandardDomain {
    pub const ALL: [Self; 5] = [
        Self::NistP256, Self::BrainpoolP256r1, Self::NistP384, Self::BrainpoolP384r1,
        Self::BrainpoolP512r1,
    ];

    /// Looks up the domain by its standardized parameter ID.
    pub fn from_parameter_id(parameter_id: i64) -> Option<Self> {
        Self::ALL.into_iter()
            .find(|domain| i64::from(domain.parameter_id()) == parameter_id)
    }

    /// The standardized parameter ID (ICAO Document 9303 Part 11 Section 9.5.1).
    pub const fn parameter_id(&self) -> u8 {
        match self {
            Self::NistP256 => 12,
            Self::BrainpoolP256r1 => 13,
            Self::NistP384 => 15,
            Self::BrainpoolP384r1 => 16,
            Self::BrainpoolP512r1 => 17,
        }
    }

    pub fn curve(&self) -> &'static EllipticCurve {
        match self {
            Self::NistP256 => &NIST_P256,
            Self::BrainpoolP256r1 => &BRAINPOOL_P256R1,
            Self::NistP384 => &NIST_P384,
            Self::BrainpoolP384r1 => &BRAINPOOL_P384R1,
            Self::BrainpoolP512r1 => &BRAINPOOL_P512R1,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::elliptic::EcPoint;
    use num_traits::One;

    #[test]
    fn test_generators_have_stated_order() {
        for domain in StandardDomain::ALL {
            let curve = domain.curve();
            let g = curve.generator();
            let almost_order = curve.order() - num_bigint::BigInt::one();
            assert_eq!(curve.scalar_mult(&almost_order, g), curve.negate(g), "{}", curve.name());
            assert_eq!(curve.add_points(&curve.scalar_mult(&almost_order, g), g), EcPoint::Infinite);
        }
    }

    #[test]
    fn test_parameter_ids() {
        assert_eq!(StandardDomain::from_parameter_id(13), Some(StandardDomain::BrainpoolP256r1));
        assert_eq!(StandardDomain::from_parameter_id(17), Some(StandardDomain::BrainpoolP512r1));
        assert_eq!(StandardDomain::from_parameter_id(14), None);
        assert_eq!(StandardDomain::BrainpoolP384r1.curve().coordinate_len(), 48);
        assert_eq!(StandardDomain::BrainpoolP512r1.curve().coordinate_len(), 64);
    }
}
