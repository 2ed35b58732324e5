//! Key Derivation Functions for PACE.


use digest::Digest;
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;


/// What a derived key is used for.
///
/// The purpose is mixed into the derivation as a 32-bit big-endian counter.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyPurpose {
    Encryption,
    Mac,
    Password,
}
impl KeyPurpose {
    pub const fn counter(&self) -> u32 {
        match self {
            Self::Encryption => 1,
            Self::Mac => 2,
            Self::Password => 3,
        }
    }
}


/// A key derivation function.
pub trait Kdf<K> {
    /// The key derivation function itself.
    ///
    /// # Panics
    ///
    /// Panics if `key_seed` is empty.
    fn derive_key(key_seed: &[u8], purpose: KeyPurpose) -> K;

    /// The key derivation function for encryption purposes.
    fn derive_encryption_key(key_seed: &[u8]) -> K {
        Self::derive_key(key_seed, KeyPurpose::Encryption)
    }

    /// The key derivation function for message authentication purposes.
    fn derive_mac_key(key_seed: &[u8]) -> K {
        Self::derive_key(key_seed, KeyPurpose::Mac)
    }

    /// The password-to-key derivation function.
    fn derive_key_from_password(password: &[u8]) -> K {
        Self::derive_key(password, KeyPurpose::Password)
    }
}


fn hash_with_counter<D: Digest, const N: usize>(key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; N]> {
    assert!(!key_seed.is_empty(), "key seed must not be empty");

    let mut hasher = D::new();
    hasher.update(key_seed);
    hasher.update(purpose.counter().to_be_bytes());
    let result = hasher.finalize();

    let mut keydata = Zeroizing::new([0u8; N]);
    keydata.copy_from_slice(&result[0..N]);
    keydata
}


/// Key derivation function for AES-128.
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha1(key || counter)[0..16]
/// ```
pub struct KdfAes128;
impl Kdf<Zeroizing<[u8; 16]>> for KdfAes128 {
    fn derive_key(key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; 16]> {
        hash_with_counter::<Sha1, 16>(key_seed, purpose)
    }
}


/// Key derivation function for AES-192.
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha256(key || counter)[0..24]
/// ```
pub struct KdfAes192;
impl Kdf<Zeroizing<[u8; 24]>> for KdfAes192 {
    fn derive_key(key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; 24]> {
        hash_with_counter::<Sha256, 24>(key_seed, purpose)
    }
}


/// Key derivation function for AES-256.
///
/// The KDF is equivalent to:
/// ```plain
/// keydata = sha256(key || counter)
/// ```
pub struct KdfAes256;
impl Kdf<Zeroizing<[u8; 32]>> for KdfAes256 {
    fn derive_key(key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; 32]> {
        hash_with_counter::<Sha256, 32>(key_seed, purpose)
    }
}


/// Derives a key with the AES-128 KDF, the one used by health cards.
pub fn derive_key(key_seed: &[u8], purpose: KeyPurpose) -> Zeroizing<[u8; 16]> {
    KdfAes128::derive_key(key_seed, purpose)
}
