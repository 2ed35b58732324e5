//! PACE (Password Authenticated Connection Establishment) for ISO/IEC 7816 health cards.
//!
//! The crate contains the APDU codec ([`iso7816::apdu`]), the elliptic-curve arithmetic and key
//! derivation the handshake is built from ([`crypt`], [`pace::kdf`]) and the handshake itself
//! ([`pace::establish`]).


pub mod crypt;
pub mod der_util;
pub mod iso7816;
pub mod pace;


use std::fmt::Write;


/// Formats bytes as contiguous uppercase hexadecimal digits.
pub fn hex_string(buf: &[u8]) -> String {
    let mut ret = String::with_capacity(2 * buf.len());
    for b in buf {
        // writing to a String cannot fail
        let _ = write!(ret, "{:02X}", b);
    }
    ret
}


/// Formats bytes as a classic hex dump with offsets and a printable-ASCII column.
pub fn hexdump(buf: &[u8]) -> String {
    let mut ret = String::new();
    for (line_index, line) in buf.chunks(16).enumerate() {
        let _ = write!(ret, "{:08X}  ", line_index * 16);

        for i in 0..16 {
            match line.get(i) {
                Some(b) => { let _ = write!(ret, " {:02X}", b); },
                None => ret.push_str("   "),
            }
        }

        ret.push_str(" |");
        for &b in line {
            if b.is_ascii_graphic() || b == b' ' {
                ret.push(char::from(b));
            } else {
                ret.push('.');
            }
        }
        ret.push_str("|\n");
    }
    ret
}
