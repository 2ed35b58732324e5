//! Cipher and MAC (message authentication code) combinations.


use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cipher::block_padding::NoPadding;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::pace::kdf::{Kdf, KdfAes128, KdfAes192, KdfAes256, KeyPurpose};


const AES_BLOCK_SIZE: usize = 16;

/// Length of a MAC as transmitted, after truncation.
pub const MAC_LENGTH: usize = 8;


#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum CipherError {
    InvalidKeyLength { expected: usize, obtained: usize },
    InvalidIvLength { expected: usize, obtained: usize },
    UnalignedData { block_size: usize, length: usize },
}
impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyLength { expected, obtained }
                => write!(f, "invalid key length {} (expected {})", obtained, expected),
            Self::InvalidIvLength { expected, obtained }
                => write!(f, "invalid IV length {} (expected {})", obtained, expected),
            Self::UnalignedData { block_size, length }
                => write!(f, "data length {} is not a multiple of the block size {}", length, block_size),
        }
    }
}
impl std::error::Error for CipherError {
}


/// A combination of cipher, MAC and KDF (key derivation function) usable during authentication.
pub trait CipherAndMac {
    /// Size of the cipher key in bytes.
    fn cipher_key_size(&self) -> usize;

    /// Block size of the cipher in bytes.
    fn cipher_block_size(&self) -> usize;

    /// The key derivation function.
    fn derive_key(&self, key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<Vec<u8>>;

    /// The key derivation function for encryption purposes.
    fn derive_encryption_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KeyPurpose::Encryption)
    }

    /// The key derivation function for message authentication purposes.
    fn derive_mac_key(&self, key_seed: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(key_seed, KeyPurpose::Mac)
    }

    /// The password-to-key derivation function.
    fn derive_key_from_password(&self, password: &[u8]) -> Zeroizing<Vec<u8>> {
        self.derive_key(password, KeyPurpose::Password)
    }

    /// Decrypts data in-place using the given key and CBC IV.
    ///
    /// Does not strip padding; the data must be a multiple of the block size.
    fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CipherError>;

    /// Encrypts pre-padded data in-place using the given key and CBC IV.
    fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CipherError>;

    /// Generates a MAC (message authentication code) for the given data and key, truncated to
    /// [`MAC_LENGTH`] bytes.
    fn mac_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError>;

    /// Verifies in constant time whether the given data fits the given MAC.
    fn verify_mac(&self, data: &[u8], key: &[u8], expected_mac: &[u8]) -> Result<bool, CipherError> {
        let computed_mac = self.mac_data(data, key)?;
        Ok(computed_mac.ct_eq(expected_mac).into())
    }
}


fn check_cbc_arguments(data: &[u8], key: &[u8], iv: &[u8], key_size: usize) -> Result<(), CipherError> {
    if key.len() != key_size {
        return Err(CipherError::InvalidKeyLength { expected: key_size, obtained: key.len() });
    }
    if iv.len() != AES_BLOCK_SIZE {
        return Err(CipherError::InvalidIvLength { expected: AES_BLOCK_SIZE, obtained: iv.len() });
    }
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(CipherError::UnalignedData { block_size: AES_BLOCK_SIZE, length: data.len() });
    }
    Ok(())
}


macro_rules! aes_cipher_and_mac {
    ($(#[$attr:meta])* $name:ident, $cipher:ty, $kdf:ty, $key_size:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name;
        impl CipherAndMac for $name {
            fn cipher_key_size(&self) -> usize { $key_size }
            fn cipher_block_size(&self) -> usize { AES_BLOCK_SIZE }

            fn derive_key(&self, key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<Vec<u8>> {
                let key = <$kdf>::derive_key(key_seed, purpose);
                Zeroizing::new(key.to_vec())
            }

            fn decrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CipherError> {
                check_cbc_arguments(data, key, iv, $key_size)?;
                let length = data.len();
                let decryptor = cbc::Decryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|_| CipherError::InvalidKeyLength { expected: $key_size, obtained: key.len() })?;
                decryptor.decrypt_padded_mut::<NoPadding>(data)
                    .map_err(|_| CipherError::UnalignedData { block_size: AES_BLOCK_SIZE, length })?;
                Ok(())
            }

            fn encrypt_padded_data(&self, data: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CipherError> {
                check_cbc_arguments(data, key, iv, $key_size)?;
                let length = data.len();
                let encryptor = cbc::Encryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|_| CipherError::InvalidKeyLength { expected: $key_size, obtained: key.len() })?;
                encryptor.encrypt_padded_mut::<NoPadding>(data, length)
                    .map_err(|_| CipherError::UnalignedData { block_size: AES_BLOCK_SIZE, length })?;
                Ok(())
            }

            fn mac_data(&self, data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
                let mut cmac = <Cmac<$cipher> as Mac>::new_from_slice(key)
                    .map_err(|_| CipherError::InvalidKeyLength { expected: $key_size, obtained: key.len() })?;
                cmac.update(data);
                let full_mac = cmac.finalize().into_bytes();
                Ok(Zeroizing::new(full_mac[..MAC_LENGTH].to_vec()))
            }
        }
    };
}

aes_cipher_and_mac!(
    /// AES-128 in CBC mode with AES-CMAC.
    ///
    /// The KDF is equivalent to:
    /// ```plain
    /// keydata = sha1(key || counter)[0..16]
    /// ```
    CamAes128, Aes128, KdfAes128, 16
);
aes_cipher_and_mac!(
    /// AES-192 in CBC mode with AES-CMAC.
    ///
    /// The KDF is equivalent to:
    /// ```plain
    /// keydata = sha256(key || counter)[0..24]
    /// ```
    CamAes192, Aes192, KdfAes192, 24
);
aes_cipher_and_mac!(
    /// AES-256 in CBC mode with AES-CMAC.
    ///
    /// The KDF is equivalent to:
    /// ```plain
    /// keydata = sha256(key || counter)
    /// ```
    CamAes256, Aes256, KdfAes256, 32
);


#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const CAN_KEY: [u8; 16] = hex!("663EABAB A99E954E 8D228895 40EDC66C");

    #[test]
    fn test_nonce_decryption() {
        let iv = [0u8; 16];

        let mut nonce = hex!("5B461616 5A08E7D9 016B0BE1 CEB53F9E");
        CamAes128.decrypt_padded_data(&mut nonce, &CAN_KEY, &iv).unwrap();
        assert_eq!(nonce, hex!("9FFB42A2 24680F72 1A3ADE59 93C0FD11"));

        let mut nonce = hex!("A18957E1 1BF5F8EC D4B752DF 7A87C43D");
        CamAes128.decrypt_padded_data(&mut nonce, &CAN_KEY, &iv).unwrap();
        assert_eq!(nonce, hex!("85E02B60 6D2EF6CE A7907715 6C5F670D"));
    }

    #[test]
    fn test_icao_appendix_g1_nonce() {
        let key = hex!("89DED1B2 6624EC1E 634C1989 302849DD");
        let mut nonce = hex!("95A3A016 522EE98D 01E76CB6 B98B42C3");
        CamAes128.decrypt_padded_data(&mut nonce, &key, &[0u8; 16]).unwrap();
        assert_eq!(nonce, hex!("3F00C4D3 9D153F2B 2A214A07 8D899B22"));
    }

    #[test]
    fn test_encrypt_inverts_decrypt() {
        let plaintext = hex!("00112233 44556677 8899AABB CCDDEEFF 00112233 44556677 8899AABB CCDDEEFF");
        let iv = hex!("000102030405060708090A0B0C0D0E0F");
        let key = [0x42u8; 32];

        let mut data = plaintext;
        CamAes256.encrypt_padded_data(&mut data, &key, &iv).unwrap();
        assert_ne!(data, plaintext);
        CamAes256.decrypt_padded_data(&mut data, &key, &iv).unwrap();
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_cbc_argument_errors() {
        let mut data = [0u8; 15];
        assert_eq!(
            CamAes128.decrypt_padded_data(&mut data, &CAN_KEY, &[0u8; 16]),
            Err(CipherError::UnalignedData { block_size: 16, length: 15 }),
        );
        let mut data = [0u8; 16];
        assert_eq!(
            CamAes192.encrypt_padded_data(&mut data, &CAN_KEY, &[0u8; 16]),
            Err(CipherError::InvalidKeyLength { expected: 24, obtained: 16 }),
        );
        assert_eq!(
            CamAes128.encrypt_padded_data(&mut data, &CAN_KEY, &[0u8; 8]),
            Err(CipherError::InvalidIvLength { expected: 16, obtained: 8 }),
        );
    }

    #[test]
    fn test_cmac_rfc4493() {
        // RFC 4493 example 2, truncated
        let key = hex!("2b7e1516 28aed2a6 abf71588 09cf4f3c");
        let message = hex!("6bc1bee2 2e409f96 e93d7e11 7393172a");
        let mac = CamAes128.mac_data(&message, &key).unwrap();
        assert_eq!(mac.as_slice(), &hex!("070a16b4 6b4d4144")[..]);
        assert!(CamAes128.verify_mac(&message, &key, &hex!("070a16b4 6b4d4144")).unwrap());
        assert!(!CamAes128.verify_mac(&message, &key, &hex!("070a16b4 6b4d4145")).unwrap());
    }

    #[test]
    fn test_derived_key_lengths() {
        assert_eq!(CamAes128.derive_encryption_key(b"K").len(), 16);
        assert_eq!(CamAes192.derive_mac_key(b"K").len(), 24);
        assert_eq!(CamAes256.derive_key_from_password(b"K").len(), 32);
    }
}
