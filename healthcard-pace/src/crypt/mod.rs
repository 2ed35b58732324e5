//! Cryptographic functionality.


pub mod cipher_mac;
pub mod elliptic;


use num_bigint::{BigInt, Sign};
use num_traits::Signed;


/// Interprets the bytes as an unsigned big-endian integer.
pub fn bigint_from_be_slice(slice: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, slice)
}


/// Serializes a non-negative integer as big-endian bytes, left-padded with zeroes to `width` bytes.
///
/// # Panics
///
/// Panics if the value is negative or does not fit into `width` bytes.
pub fn bigint_to_be_bytes_padded(value: &BigInt, width: usize) -> Vec<u8> {
    assert!(!value.is_negative(), "value must not be negative");
    let (_sign, value_bytes) = value.to_bytes_be();
    // zero is serialized as a single zero byte
    let value_bytes: &[u8] = if value_bytes == [0x00] { &[] } else { &value_bytes };
    assert!(value_bytes.len() <= width, "value does not fit into {} bytes", width);

    let mut ret = vec![0u8; width - value_bytes.len()];
    ret.extend(value_bytes);
    ret
}
