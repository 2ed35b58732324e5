//! Octet-string encoding of elliptic curve points (SEC 1 § 2.3.3).
//!
//! Only the uncompressed form is supported:
//! 1. the byte `0x04` to signify uncompressed coordinates
//! 2. the x coordinate as an unsigned integer in big-endian byte order
//! 3. the y coordinate as an unsigned integer in big-endian byte order
//!
//! Both coordinates are left-padded with zeroes to the same width. The point at infinity is the
//! single byte `0x00`.


use std::fmt;

use num_traits::Signed;

use crate::crypt::{bigint_from_be_slice, bigint_to_be_bytes_padded};
use crate::crypt::elliptic::{EcPoint, EllipticCurve};


const TAG_INFINITY: u8 = 0x00;
const TAG_COMPRESSED_EVEN: u8 = 0x02;
const TAG_COMPRESSED_ODD: u8 = 0x03;
const TAG_UNCOMPRESSED: u8 = 0x04;
const TAG_HYBRID_EVEN: u8 = 0x06;
const TAG_HYBRID_ODD: u8 = 0x07;


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PointDecodeError {
    Empty,
    EncodingNotSupported { tag: u8 },
    InvalidInfinityEncoding,
    InvalidLength { length: usize },
    UnknownTag { tag: u8 },
    CoordinateWidthMismatch { expected: usize, obtained: usize },
    CoordinateOutOfRange,
    NotOnCurve,
}
impl fmt::Display for PointDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty
                => write!(f, "encoded point is empty"),
            Self::EncodingNotSupported { tag }
                => write!(f, "point encoding 0x{:02X} is not supported", tag),
            Self::InvalidInfinityEncoding
                => write!(f, "the point at infinity must be encoded as a single byte"),
            Self::InvalidLength { length }
                => write!(f, "encoded point of length {} cannot be split into two coordinates", length),
            Self::UnknownTag { tag }
                => write!(f, "unknown point encoding 0x{:02X}", tag),
            Self::CoordinateWidthMismatch { expected, obtained }
                => write!(f, "coordinates are {} bytes wide, expected {}", obtained, expected),
            Self::CoordinateOutOfRange
                => write!(f, "coordinate is not reduced modulo the prime"),
            Self::NotOnCurve
                => write!(f, "point is not on the curve"),
        }
    }
}
impl std::error::Error for PointDecodeError {
}


/// Encodes a point, padding each coordinate to `coordinate_len` bytes.
///
/// # Panics
///
/// Panics if a coordinate does not fit into `coordinate_len` bytes.
pub fn encode_point(point: &EcPoint, coordinate_len: usize) -> Vec<u8> {
    match point {
        EcPoint::Infinite => vec![TAG_INFINITY],
        EcPoint::Finite { x, y } => {
            let mut ret = Vec::with_capacity(1 + 2*coordinate_len);
            ret.push(TAG_UNCOMPRESSED);
            ret.extend(bigint_to_be_bytes_padded(x, coordinate_len));
            ret.extend(bigint_to_be_bytes_padded(y, coordinate_len));
            ret
        },
    }
}


/// Decodes a point without reference to a curve.
///
/// The coordinate width is derived from the length of the input.
pub fn decode_point(bytes: &[u8]) -> Result<EcPoint, PointDecodeError> {
    let (&tag, payload) = bytes.split_first()
        .ok_or(PointDecodeError::Empty)?;
    match tag {
        TAG_INFINITY => {
            if payload.is_empty() {
                Ok(EcPoint::Infinite)
            } else {
                Err(PointDecodeError::InvalidInfinityEncoding)
            }
        },
        TAG_UNCOMPRESSED => {
            if payload.is_empty() || payload.len() % 2 != 0 {
                // it must be possible to split the value in the middle
                return Err(PointDecodeError::InvalidLength { length: bytes.len() });
            }
            let (x_bytes, y_bytes) = payload.split_at(payload.len() / 2);
            Ok(EcPoint::new(bigint_from_be_slice(x_bytes), bigint_from_be_slice(y_bytes)))
        },
        TAG_COMPRESSED_EVEN|TAG_COMPRESSED_ODD|TAG_HYBRID_EVEN|TAG_HYBRID_ODD
            => Err(PointDecodeError::EncodingNotSupported { tag }),
        other
            => Err(PointDecodeError::UnknownTag { tag: other }),
    }
}


impl EllipticCurve {
    /// Encodes a point with this curve's coordinate width.
    pub fn encode_point(&self, point: &EcPoint) -> Vec<u8> {
        encode_point(point, self.coordinate_len())
    }

    /// Decodes a point and verifies that it is a point on this curve.
    ///
    /// The coordinate width must match this curve's and each coordinate must be smaller than the
    /// prime.
    pub fn decode_point(&self, bytes: &[u8]) -> Result<EcPoint, PointDecodeError> {
        let point = decode_point(bytes)?;
        if let EcPoint::Finite { x, y } = &point {
            let obtained = (bytes.len() - 1) / 2;
            let expected = self.coordinate_len();
            if obtained != expected {
                return Err(PointDecodeError::CoordinateWidthMismatch { expected, obtained });
            }
            if x.is_negative() || y.is_negative() || x >= self.prime() || y >= self.prime() {
                return Err(PointDecodeError::CoordinateOutOfRange);
            }
        }
        if !self.contains(&point) {
            return Err(PointDecodeError::NotOnCurve);
        }
        Ok(point)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::elliptic::curves::{BRAINPOOL_P256R1, NIST_P256};
    use hex_literal::hex;
    use num_bigint::BigInt;

    const ENCODED_POINT: [u8; 65] = hex!("
        04
        2AAFEB6F 92346132 330D8EE4 21406CBF E14F86C3 351FCAC0 056F1B29 E4BD4892
        14DC6769 542FF340 DD3EFD65 526B99A0 3A08A589 82815DDC 11EF6B3A 86586671
    ");

    #[test]
    fn test_decode_and_encode() {
        let curve = &*BRAINPOOL_P256R1;
        let point = curve.decode_point(&ENCODED_POINT).unwrap();
        assert!(curve.contains(&point));
        assert_eq!(curve.encode_point(&point), ENCODED_POINT);
        assert_eq!(encode_point(&decode_point(&ENCODED_POINT).unwrap(), 32), ENCODED_POINT);
    }

    #[test]
    fn test_encode_generator_multiple() {
        let curve = &*BRAINPOOL_P256R1;
        let scalar = bigint_from_be_slice(&hex!("
            B0DECC1C 794D99EB 6F8F0120 CA331E57
            49D74206 8C4B268F 4FEA98B9 01B320EC
        "));
        let encoded = curve.encode_point(&curve.multiply_generator(&scalar));
        assert_eq!(
            encoded,
            hex!("
                04
                3554F106 7B69C7BE 78031634 6C3D6CC4 BAE39461 F3D3568E 6DBD496F 4684EACA
                5A1401A2 91DF5AF7 AC1A2B4C 1FCDAB34 883B8628 4CB7D0B2 5537B8E1 97B768B5
            "),
        );
    }

    #[test]
    fn test_padding_of_short_coordinates() {
        let encoded = encode_point(&EcPoint::new(BigInt::from(1), BigInt::from(0x0203)), 4);
        assert_eq!(encoded, hex!("04 00000001 00000203"));
    }

    #[test]
    fn test_infinity() {
        assert_eq!(decode_point(&hex!("00")), Ok(EcPoint::Infinite));
        assert_eq!(encode_point(&EcPoint::Infinite, 32), hex!("00"));
        assert_eq!(decode_point(&hex!("00 00")), Err(PointDecodeError::InvalidInfinityEncoding));
    }

    #[test]
    fn test_unsupported_and_malformed() {
        assert_eq!(decode_point(&[]), Err(PointDecodeError::Empty));
        for tag in [0x02, 0x03, 0x06, 0x07] {
            let mut encoded = ENCODED_POINT;
            encoded[0] = tag;
            assert_eq!(decode_point(&encoded), Err(PointDecodeError::EncodingNotSupported { tag }));
        }
        assert_eq!(decode_point(&hex!("05 01 02")), Err(PointDecodeError::UnknownTag { tag: 0x05 }));
        assert_eq!(decode_point(&hex!("04 01 02 03")), Err(PointDecodeError::InvalidLength { length: 4 }));
        assert_eq!(decode_point(&hex!("04")), Err(PointDecodeError::InvalidLength { length: 1 }));
    }

    #[test]
    fn test_curve_checks() {
        let curve = &*BRAINPOOL_P256R1;

        let mut off_curve = ENCODED_POINT;
        off_curve[64] ^= 0x01;
        assert_eq!(curve.decode_point(&off_curve), Err(PointDecodeError::NotOnCurve));

        assert_eq!(
            curve.decode_point(&ENCODED_POINT[..63]),
            Err(PointDecodeError::CoordinateWidthMismatch { expected: 32, obtained: 31 }),
        );

        // a point on brainpoolP256r1 is not on NIST P-256
        assert!(NIST_P256.decode_point(&ENCODED_POINT).is_err());
    }
}
