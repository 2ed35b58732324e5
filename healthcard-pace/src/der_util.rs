//! Utility functions for Distinguished Encoding Rules.


use rasn::types::Oid;


/// Encode an ASN.1 DER primitive value length.
pub fn encode_primitive_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        // single-byte encoding
        output.push(length as u8);
    } else {
        // 0b1nnn_nnnn and then n additional bytes that actually specify the length
        // (big-endian)
        let length_bytes = length.to_be_bytes();
        let leading_zeroes = length_bytes.iter()
            .take_while(|b| **b == 0x00)
            .count();
        let trimmed_length_slice = &length_bytes[leading_zeroes..];
        output.push(0b1000_0000 | (trimmed_length_slice.len() as u8));
        output.extend(trimmed_length_slice);
    }
}


/// Encode an object identifier value into bytes using DER encoding rules.
///
/// No tag or length is encoded, only the actual value.
pub fn oid_to_der_bytes(oid: &Oid) -> Vec<u8> {
    assert!(oid.len() >= 2);
    assert!(oid[0] <= 2);
    if oid[0] < 2 {
        assert!(oid[1] <= 39);
    }

    fn encode_arc(ret: &mut Vec<u8>, arc: u32) {
        // base 128, most significant group first, top bit set on all but the last byte
        let mut groups = [0u8; 5];
        let mut group_count = 0;
        let mut remaining = arc;
        loop {
            groups[group_count] = (remaining & 0b0111_1111) as u8;
            group_count += 1;
            remaining >>= 7;
            if remaining == 0 {
                break;
            }
        }
        for i in (0..group_count).rev() {
            let continuation = if i > 0 { 0b1000_0000 } else { 0b0000_0000 };
            ret.push(groups[i] | continuation);
        }
    }

    let mut ret = Vec::new();
    encode_arc(&mut ret, 40*oid[0] + oid[1]);
    for arc in oid.iter().skip(2) {
        encode_arc(&mut ret, *arc);
    }
    ret
}
