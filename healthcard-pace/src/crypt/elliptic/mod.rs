//! Elliptic-curve cryptography.
//!
//! Arithmetic is performed in affine coordinates on short Weierstrass curves
//! `y**2 ≡ x**3 + ax + b (mod p)` using arbitrary-precision integers. Membership of the inputs is
//! checked with debug assertions; points received from the outside must be validated with
//! [`EllipticCurve::contains`] (or decoded with [`EllipticCurve::decode_point`]) first.


pub mod codec;
pub mod curves;


use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};


/// A point on an elliptic curve in affine coordinates, or the point at infinity.
#[derive(Clone, Eq, Hash, PartialEq)]
pub enum EcPoint {
    /// The neutral element of the group.
    Infinite,
    Finite { x: BigInt, y: BigInt },
}
impl EcPoint {
    pub fn new(x: BigInt, y: BigInt) -> Self {
        Self::Finite { x, y }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    pub fn x(&self) -> Option<&BigInt> {
        match self {
            Self::Infinite => None,
            Self::Finite { x, .. } => Some(x),
        }
    }

    pub fn y(&self) -> Option<&BigInt> {
        match self {
            Self::Infinite => None,
            Self::Finite { y, .. } => Some(y),
        }
    }
}
impl fmt::Debug for EcPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infinite => write!(f, "EcPoint::Infinite"),
            Self::Finite { x, y } => write!(f, "EcPoint {} x: 0x{:X}, y: 0x{:X} {}", '{', x, y, '}'),
        }
    }
}


/// An elliptic curve of the form `y**2 ≡ x**3 + ax + b` modulo a prime number.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EllipticCurve {
    name: &'static str,

    /// The prime (modulus) of the curve.
    prime: BigInt,

    /// Coefficient `a` in the curve's formula.
    coefficient_a: BigInt,

    /// Coefficient `b` in the curve's formula.
    coefficient_b: BigInt,

    /// The generator of the subgroup used for key agreement.
    generator: EcPoint,

    /// The order of the generator.
    order: BigInt,

    /// The cofactor of the curve.
    ///
    /// A cofactor h means that the group generated by the generator only contains every hth point
    /// of the curve.
    cofactor: u8,
}
impl EllipticCurve {
    /// Creates a curve from its domain parameters.
    ///
    /// # Panics
    ///
    /// Panics if the prime is even or the generator is not a finite point on the curve.
    pub fn new(
        name: &'static str,
        prime: BigInt,
        coefficient_a: BigInt,
        coefficient_b: BigInt,
        generator: EcPoint,
        order: BigInt,
        cofactor: u8,
    ) -> Self {
        assert!(prime.is_odd(), "prime is not odd");

        let curve = Self {
            name,
            prime,
            coefficient_a,
            coefficient_b,
            generator,
            order,
            cofactor,
        };
        assert!(!curve.generator.is_infinite(), "generator is the point at infinity");
        assert!(curve.contains(&curve.generator), "generator is not on curve");
        curve
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn prime(&self) -> &BigInt { &self.prime }
    pub fn coefficient_a(&self) -> &BigInt { &self.coefficient_a }
    pub fn coefficient_b(&self) -> &BigInt { &self.coefficient_b }
    pub fn generator(&self) -> &EcPoint { &self.generator }
    pub fn order(&self) -> &BigInt { &self.order }
    pub fn cofactor(&self) -> u8 { self.cofactor }

    /// The number of bytes of each coordinate in an encoded point.
    pub fn coordinate_len(&self) -> usize {
        ((self.prime.bits() + 7) / 8) as usize
    }

    /// Returns the same curve with a different generator.
    ///
    /// Used for the mapped domain parameters during PACE.
    ///
    /// # Panics
    ///
    /// Panics if the generator is not a finite point on the curve.
    pub fn with_generator(&self, generator: EcPoint) -> Self {
        assert!(!generator.is_infinite(), "generator is the point at infinity");
        assert!(self.contains(&generator), "generator is not on curve");
        Self {
            generator,
            ..self.clone()
        }
    }

    /// Checks whether the point satisfies the curve equation.
    ///
    /// The point at infinity is always on the curve.
    pub fn contains(&self, point: &EcPoint) -> bool {
        match point {
            EcPoint::Infinite => true,
            EcPoint::Finite { x, y } => {
                let rhs = x * x * x + &self.coefficient_a * x + &self.coefficient_b;
                (y * y - rhs).mod_floor(&self.prime).is_zero()
            },
        }
    }

    /// Returns the additive inverse of the point.
    pub fn negate(&self, point: &EcPoint) -> EcPoint {
        debug_assert!(self.contains(point));
        match point {
            EcPoint::Infinite => EcPoint::Infinite,
            EcPoint::Finite { x, y } => EcPoint::Finite {
                x: x.clone(),
                y: (-y).mod_floor(&self.prime),
            },
        }
    }

    /// Adds two points using the affine group law.
    pub fn add_points(&self, lhs: &EcPoint, rhs: &EcPoint) -> EcPoint {
        debug_assert!(self.contains(lhs));
        debug_assert!(self.contains(rhs));

        let (x1, y1, x2, y2) = match (lhs, rhs) {
            (EcPoint::Infinite, _) => return rhs.clone(),
            (_, EcPoint::Infinite) => return lhs.clone(),
            (EcPoint::Finite { x: x1, y: y1 }, EcPoint::Finite { x: x2, y: y2 }) => (x1, y1, x2, y2),
        };

        let p = &self.prime;
        let slope = if x1.mod_floor(p) == x2.mod_floor(p) {
            if y1.mod_floor(p) != y2.mod_floor(p) || y1.mod_floor(p).is_zero() {
                // P + (-P), or a point of order 2 doubled
                return EcPoint::Infinite;
            }
            // tangent
            (BigInt::from(3) * x1 * x1 + &self.coefficient_a) * inverse_modular(&(BigInt::from(2) * y1), p)
        } else {
            // secant
            (y1 - y2) * inverse_modular(&(x1 - x2), p)
        };

        let x3 = (&slope * &slope - x1 - x2).mod_floor(p);
        let y3 = (&slope * (x1 - &x3) - y1).mod_floor(p);
        let sum = EcPoint::Finite { x: x3, y: y3 };
        debug_assert!(self.contains(&sum));
        sum
    }

    /// Multiplies the point with the scalar using double-and-add, least significant bit first.
    ///
    /// A negative scalar multiplies the negated point.
    pub fn scalar_mult(&self, scalar: &BigInt, point: &EcPoint) -> EcPoint {
        debug_assert!(self.contains(point));

        if point.is_infinite() || scalar.mod_floor(&self.order).is_zero() {
            return EcPoint::Infinite;
        }
        if scalar.is_negative() {
            return self.scalar_mult(&-scalar, &self.negate(point));
        }

        let mut result = EcPoint::Infinite;
        let mut double_me = point.clone();
        for i in 0..scalar.bits() {
            if scalar.bit(i) {
                result = self.add_points(&result, &double_me);
            }
            double_me = self.add_points(&double_me, &double_me);
        }

        debug_assert!(self.contains(&result));
        result
    }

    /// Calculates a public key from a private key (`private_key * generator`).
    pub fn multiply_generator(&self, scalar: &BigInt) -> EcPoint {
        self.scalar_mult(scalar, &self.generator)
    }

    /// Derives the generator of the mapped domain using generic mapping.
    ///
    /// `new_generator = (nonce * generator) + shared_secret`
    ///
    /// Returns `None` if the result is the point at infinity.
    pub fn derive_generic_mapping_curve(&self, nonce: &BigInt, shared_secret: &EcPoint) -> Option<Self> {
        let product = self.multiply_generator(nonce);
        let new_generator = self.add_points(&product, shared_secret);
        if new_generator.is_infinite() {
            return None;
        }
        Some(self.with_generator(new_generator))
    }
}


/// Calculates the inverse of `k` modulo the prime `p` using the extended Euclidean algorithm.
///
/// The result is in the range `[0, p)`. A negative `k` is inverted as `p - inverse(-k)`.
///
/// # Panics
///
/// Panics if `k` is a multiple of `p`.
pub fn inverse_modular(k: &BigInt, p: &BigInt) -> BigInt {
    assert!(!k.mod_floor(p).is_zero(), "division by zero");

    if k.is_negative() {
        return p - inverse_modular(&-k, p);
    }

    let (mut old_r, mut r) = (k.clone(), p.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let quotient = old_r.div_floor(&r);
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    debug_assert!(old_r.is_one(), "modulus is not prime");

    old_s.mod_floor(p)
}
