//! Implementation of Password Authenticated Connection Establishment.
//!
//! Only the elliptic-curve variant with generic mapping (ECDH-GM) and AES is implemented; this is
//! what health cards use. The result of a successful run is a pair of [`SessionKeys`] for secure
//! messaging.


pub mod card_access;
pub mod kdf;
pub mod key_pair;
pub mod oids;


use std::fmt;
use std::str::FromStr;

use digest::Digest;
use iso7816_tlv::TlvError;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use rasn::error::DecodeError;
use rasn::types::{ObjectIdentifier, Oid};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{bigint_from_be_slice, bigint_to_be_bytes_padded};
use crate::crypt::cipher_mac::{CamAes128, CamAes192, CamAes256, CipherAndMac, CipherError};
use crate::crypt::elliptic::{EcPoint, EllipticCurve};
use crate::crypt::elliptic::codec::PointDecodeError;
use crate::crypt::elliptic::curves::StandardDomain;
use crate::der_util::oid_to_der_bytes;
use crate::iso7816::apdu::{Command, CommandHeader, EncodeError, Response, ResponseTrailer};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::pace::key_pair::PaceKeyPair;
use crate::pace::oids::{
    is_non_generic_mapping, PACE_ECDH_GM_AES_CBC_CMAC_128, PACE_ECDH_GM_AES_CBC_CMAC_192,
    PACE_ECDH_GM_AES_CBC_CMAC_256,
};


const TAG_DYNAMIC_AUTHENTICATION_DATA: u8 = 0x7C;
const TAG_PUBLIC_KEY: &str = "7F49";

/// Expected response length of GENERAL AUTHENTICATE (encoded as Le = 0x00).
const GENERAL_AUTHENTICATE_RESPONSE_LENGTH: usize = 256;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    SetAuthenticationTemplate,
    ObtainNonce,
    ExchangeMappingPublicKeys,
    ExchangeEphemeralPublicKeys,
    MutualAuthentication,
}


/// Coarse classification of [`Error`]s.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Malformed data, either supplied locally or received from the card.
    Encoding,

    /// The card refused a step or does not support what was asked of it.
    Protocol,

    /// A cryptographic check failed.
    Security,

    /// The card could not be reached.
    Transport,
}


#[derive(Debug)]
pub enum Error {
    NotSupported,
    MappingNotSupported { protocol: ObjectIdentifier },
    UnsupportedKeyAgreementAlgorithm { protocol: ObjectIdentifier },
    CardAccessDecoding(DecodeError),
    CardAccessEntryDecoding {
        entry_index: usize,
        error: DecodeError,
    },
    CardAccessEntryDecodingPace {
        entry_index: usize,
        error: DecodeError,
    },
    CardAccessEmpty,
    CustomParameters,
    IncompatibleProtocolParameter {
        protocol: ObjectIdentifier,
        parameter: i64,
    },
    InvalidCan { length: usize },
    InvalidMrzKey,
    InvalidPrivateKey,
    AttemptAlreadyUsed,
    OperationFailed {
        operation: Operation,
        response: ResponseTrailer,
    },
    UnexpectedFormedAnswerFromCard { operation: Operation },
    PublicKey {
        operation: Operation,
        error: PointDecodeError,
    },
    SuppliedPointNotOnCurve,
    ResultWasInfinite,
    DiffieHellmanKeysEqual,
    MacPcdVerificationFailedOnCard { response: ResponseTrailer },
    MacPiccVerificationFailedLocally,
    Encode(EncodeError),
    Tlv(TlvError),
    Cipher(CipherError),
    Communication(CommunicationError),
}
impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CardAccessDecoding(_)
                | Self::CardAccessEntryDecoding { .. }
                | Self::CardAccessEntryDecodingPace { .. }
                | Self::CardAccessEmpty
                | Self::InvalidCan { .. }
                | Self::InvalidMrzKey
                | Self::InvalidPrivateKey
                | Self::UnexpectedFormedAnswerFromCard { .. }
                | Self::PublicKey { .. }
                | Self::Encode(_)
                | Self::Tlv(_)
                | Self::Cipher(_)
                => ErrorKind::Encoding,
            Self::NotSupported
                | Self::MappingNotSupported { .. }
                | Self::UnsupportedKeyAgreementAlgorithm { .. }
                | Self::CustomParameters
                | Self::IncompatibleProtocolParameter { .. }
                | Self::AttemptAlreadyUsed
                | Self::OperationFailed { .. }
                => ErrorKind::Protocol,
            Self::SuppliedPointNotOnCurve
                | Self::ResultWasInfinite
                | Self::DiffieHellmanKeysEqual
                | Self::MacPcdVerificationFailedOnCard { .. }
                | Self::MacPiccVerificationFailedLocally
                => ErrorKind::Security,
            Self::Communication(_)
                => ErrorKind::Transport,
        }
    }

    /// Whether the card rejected the terminal's authentication token.
    ///
    /// This is how a card signals that the password (e.g. the CAN) is wrong.
    pub fn is_wrong_password(&self) -> bool {
        matches!(self, Self::MacPcdVerificationFailedOnCard { .. })
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported
                => write!(f, "PACE is not supported"),
            Self::MappingNotSupported { protocol }
                => write!(f, "the mapping of protocol {:?} is currently not supported", protocol),
            Self::UnsupportedKeyAgreementAlgorithm { protocol }
                => write!(f, "the key agreement algorithm of protocol {:?} is not supported", protocol),
            Self::CardAccessDecoding(e)
                => write!(f, "failed to decode EF.CardAccess: {}", e),
            Self::CardAccessEntryDecoding { entry_index, error }
                => write!(f, "failed to decode EF.CardAccess entry {}: {}", entry_index, error),
            Self::CardAccessEntryDecodingPace { entry_index, error }
                => write!(f, "failed to decode EF.CardAccess entry {} as PaceInfo: {}", entry_index, error),
            Self::CardAccessEmpty
                => write!(f, "EF.CardAccess contains no security infos"),
            Self::CustomParameters
                => write!(f, "custom parameters are not currently supported"),
            Self::IncompatibleProtocolParameter { protocol, parameter }
                => write!(f, "protocol {:?} is incompatible with parameter {}", protocol, parameter),
            Self::InvalidCan { length }
                => write!(f, "a CAN must be between 1 and {} bytes long, got {} bytes", Can::MAX_LENGTH, length),
            Self::InvalidMrzKey
                => write!(f, "the MRZ key must not be empty"),
            Self::InvalidPrivateKey
                => write!(f, "private key is not in the range [1, n)"),
            Self::AttemptAlreadyUsed
                => write!(f, "this PACE attempt has already been run; start a new one"),
            Self::OperationFailed { operation, response }
                => write!(f, "operation {:?} failed with response code 0x{:04X}", operation, response.to_word()),
            Self::UnexpectedFormedAnswerFromCard { operation }
                => write!(f, "operation {:?} received a malformed answer from the card", operation),
            Self::PublicKey { operation, error }
                => write!(f, "operation {:?} received an invalid public key: {}", operation, error),
            Self::SuppliedPointNotOnCurve
                => write!(f, "the card supplied a point that is not on the curve"),
            Self::ResultWasInfinite
                => write!(f, "elliptic curve arithmetic yielded the point at infinity"),
            Self::DiffieHellmanKeysEqual
                => write!(f, "terminal and chip ephemeral public keys are equal"),
            Self::MacPcdVerificationFailedOnCard { response }
                => write!(f, "the card rejected the terminal's authentication token with response code 0x{:04X} (wrong password?)", response.to_word()),
            Self::MacPiccVerificationFailedLocally
                => write!(f, "the card's authentication token is invalid"),
            Self::Encode(e)
                => write!(f, "failed to encode command: {}", e),
            Self::Tlv(e)
                => write!(f, "failed to encode data object: {}", e),
            Self::Cipher(e)
                => write!(f, "cipher error: {}", e),
            Self::Communication(e)
                => write!(f, "communication error: {}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PublicKey { error, .. } => Some(error),
            Self::Encode(e) => Some(e),
            Self::Cipher(e) => Some(e),
            Self::Communication(e) => Some(e),
            _ => None,
        }
    }
}
impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self { Self::Encode(value) }
}
impl From<TlvError> for Error {
    fn from(value: TlvError) -> Self { Self::Tlv(value) }
}
impl From<CipherError> for Error {
    fn from(value: CipherError) -> Self { Self::Cipher(value) }
}
impl From<CommunicationError> for Error {
    fn from(value: CommunicationError) -> Self { Self::Communication(value) }
}


/// Where the password used for PACE comes from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PasswordSource {
    Mrz,
    Can,
}
impl PasswordSource {
    /// The password reference sent to the card during MSE:Set AT.
    pub const fn reference(&self) -> u8 {
        match self {
            Self::Mrz => 0x01,
            Self::Can => 0x02,
        }
    }
}


/// A Card Access Number.
#[derive(Clone, Eq, PartialEq, ZeroizeOnDrop)]
pub struct Can {
    bytes: Vec<u8>,
}
impl Can {
    pub const MAX_LENGTH: usize = 16;

    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() || bytes.len() > Self::MAX_LENGTH {
            return Err(Error::InvalidCan { length: bytes.len() });
        }
        Ok(Self { bytes: bytes.to_vec() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
impl FromStr for Can {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes())
    }
}
impl fmt::Debug for Can {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Can(<redacted>)")
    }
}


/// The MRZ key: document number, date of birth and date of expiry, each followed by its check
/// digit.
#[derive(Clone, Eq, PartialEq, ZeroizeOnDrop)]
pub struct MrzKey {
    bytes: Vec<u8>,
}
impl MrzKey {
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidMrzKey);
        }
        Ok(Self { bytes: bytes.to_vec() })
    }
}
impl FromStr for MrzKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.as_bytes())
    }
}
impl fmt::Debug for MrzKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MrzKey(<redacted>)")
    }
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Password {
    Can(Can),
    Mrz(MrzKey),
}
impl Password {
    pub fn source(&self) -> PasswordSource {
        match self {
            Self::Can(_) => PasswordSource::Can,
            Self::Mrz(_) => PasswordSource::Mrz,
        }
    }

    /// The seed from which the password key is derived.
    fn key_seed(&self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Can(can) => Zeroizing::new(can.as_bytes().to_vec()),
            Self::Mrz(mrz_key) => {
                let mut mrz_hasher = Sha1::new();
                mrz_hasher.update(&mrz_key.bytes);
                Zeroizing::new(mrz_hasher.finalize().to_vec())
            },
        }
    }
}
impl From<Can> for Password {
    fn from(value: Can) -> Self { Self::Can(value) }
}
impl From<MrzKey> for Password {
    fn from(value: MrzKey) -> Self { Self::Mrz(value) }
}


/// The symmetric cipher suite of an ECDH-GM PACE protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CipherSuite {
    Aes128,
    Aes192,
    Aes256,
}
impl CipherSuite {
    /// The PACE protocol object identifier.
    pub fn protocol(&self) -> &'static Oid {
        match self {
            Self::Aes128 => PACE_ECDH_GM_AES_CBC_CMAC_128,
            Self::Aes192 => PACE_ECDH_GM_AES_CBC_CMAC_192,
            Self::Aes256 => PACE_ECDH_GM_AES_CBC_CMAC_256,
        }
    }

    pub fn from_protocol(protocol: &Oid) -> Option<Self> {
        [Self::Aes128, Self::Aes192, Self::Aes256].into_iter()
            .find(|suite| suite.protocol() == protocol)
    }

    pub fn cipher_and_mac(&self) -> &'static dyn CipherAndMac {
        match self {
            Self::Aes128 => &CamAes128,
            Self::Aes192 => &CamAes192,
            Self::Aes256 => &CamAes256,
        }
    }
}


/// The protocol and domain parameters of a PACE run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PaceParameters {
    pub cipher_suite: CipherSuite,
    pub domain: StandardDomain,
}
impl PaceParameters {
    pub const fn new(cipher_suite: CipherSuite, domain: StandardDomain) -> Self {
        Self { cipher_suite, domain }
    }

    pub fn protocol(&self) -> &'static Oid {
        self.cipher_suite.protocol()
    }

    /// Selects the first supported PACE variant announced in EF.CardAccess.
    pub fn from_card_access(card_access: &[u8]) -> Result<Self, Error> {
        let mut first_problem: Option<Error> = None;
        for (entry_index, info) in card_access::decode_pace_infos(card_access)? {
            if is_non_generic_mapping(&info.protocol) {
                first_problem.get_or_insert_with(|| Error::MappingNotSupported { protocol: info.protocol.clone() });
                continue;
            }
            let Some(cipher_suite) = CipherSuite::from_protocol(&info.protocol) else {
                first_problem.get_or_insert_with(|| Error::UnsupportedKeyAgreementAlgorithm { protocol: info.protocol.clone() });
                continue;
            };
            let Some(parameter_id) = info.parameter_id else {
                first_problem.get_or_insert(Error::CustomParameters);
                continue;
            };
            let Some(domain) = StandardDomain::from_parameter_id(parameter_id) else {
                first_problem.get_or_insert_with(|| Error::IncompatibleProtocolParameter {
                    protocol: info.protocol.clone(),
                    parameter: parameter_id,
                });
                continue;
            };

            debug!(
                "EF.CardAccess entry {} selected: {:?} on {}",
                entry_index, cipher_suite, domain.curve().name(),
            );
            return Ok(Self::new(cipher_suite, domain));
        }
        Err(first_problem.unwrap_or(Error::NotSupported))
    }
}
impl Default for PaceParameters {
    /// ECDH-GM with AES-128 on brainpoolP256r1.
    fn default() -> Self {
        Self::new(CipherSuite::Aes128, StandardDomain::BrainpoolP256r1)
    }
}


/// Keys for secure messaging, the result of a successful PACE run.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    enc: Vec<u8>,
    mac: Vec<u8>,
}
impl SessionKeys {
    /// The session key for encryption (`KSenc`).
    pub fn enc(&self) -> &[u8] { &self.enc }

    /// The session key for message authentication (`KSmac`).
    pub fn mac(&self) -> &[u8] { &self.mac }
}
impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("enc", &"<redacted>")
            .field("mac", &"<redacted>")
            .finish()
    }
}


/// The progress of a PACE attempt.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandshakeState {
    Idle,
    NonceRequested,
    NonceDecrypted,
    EphemeralKeysGenerated,
    SharedSecretComputed,
    SessionKeysDerived,
    MutualAuthVerified,
    Failed(ErrorKind),
}


fn primitive(tag: u8, value: &[u8]) -> Result<Tlv, Error> {
    Ok(Tlv::new(Tag::try_from(tag)?, Value::Primitive(value.to_vec()))?)
}


fn extract_double_wrapped(operation: Operation, response: &Response, inner_tag: u8) -> Result<Zeroizing<Vec<u8>>, Error> {
    let malformed = || Error::UnexpectedFormedAnswerFromCard { operation };
    let data = response.data()
        .ok_or_else(malformed)?;

    // exactly one dynamic authentication data object
    let (dynamic_authentication_data, rest) = Tlv::parse(data);
    let dynamic_authentication_data = dynamic_authentication_data
        .map_err(|_| malformed())?;
    if !rest.is_empty() || *dynamic_authentication_data.tag() != Tag::try_from(TAG_DYNAMIC_AUTHENTICATION_DATA)? {
        return Err(malformed());
    }
    let Value::Constructed(objects) = dynamic_authentication_data.value() else {
        return Err(malformed());
    };

    let inner_tag = Tag::try_from(inner_tag)?;
    let object = objects.iter()
        .find(|object| *object.tag() == inner_tag)
        .ok_or_else(malformed)?;
    match object.value() {
        Value::Primitive(value) => Ok(Zeroizing::new(value.clone())),
        Value::Constructed(_) => Err(malformed()),
    }
}


/// Sends GENERAL AUTHENTICATE with the given data objects wrapped in dynamic authentication data.
fn general_authenticate<C: SmartCard + ?Sized>(
    card: &mut C,
    last_in_chain: bool,
    objects: Vec<Tlv>,
) -> Result<Response, Error> {
    let dynamic_authentication_data = Tlv::new(
        Tag::try_from(TAG_DYNAMIC_AUTHENTICATION_DATA)?,
        Value::Constructed(objects),
    )?;
    let request_data = Zeroizing::new(dynamic_authentication_data.to_vec());

    let request = Command::new(
        CommandHeader {
            // logical channel 0, no secure messaging; chained unless last
            cla: if last_in_chain { 0b000_0_00_00 } else { 0b000_1_00_00 },
            ins: 0x86, // GENERAL AUTHENTICATE
            p1: 0x00, // algorithm is known (from "set authentication template")
            p2: 0x00, // key index is known (from "set authentication template")
        },
        Some(request_data.as_slice()),
        Some(GENERAL_AUTHENTICATE_RESPONSE_LENGTH),
    )?;
    Ok(card.communicate(&request)?)
}


/// Sends MSE:Set AT, choosing the protocol and the password for the following PACE run.
#[instrument(skip(card, protocol))]
pub fn set_authentication_template<C: SmartCard + ?Sized>(
    card: &mut C,
    protocol: &Oid,
    password_source: PasswordSource,
) -> Result<(), Error> {
    let mut request_data = primitive(0x80, &oid_to_der_bytes(protocol))?.to_vec(); // cryptographic mechanism
    request_data.extend(primitive(0x83, &[password_source.reference()])?.to_vec()); // password reference

    let request = Command::new(
        CommandHeader {
            cla: 0x00,
            ins: 0x22, // MANAGE SECURITY ENVIRONMENT
            p1: 0b1100_0001, // verify/encrypt/extauth, compute/decrypt/intauth, set
            p2: 0xA4, // control reference template for authentication
        },
        Some(request_data.as_slice()),
        None,
    )?;
    let response = card.communicate(&request)?;
    if !response.is_ok() {
        return Err(Error::OperationFailed {
            operation: Operation::SetAuthenticationTemplate,
            response: response.trailer(),
        });
    }
    Ok(())
}


/// Asks the card for the encrypted nonce `z`.
#[instrument(skip_all)]
pub fn obtain_encrypted_nonce<C: SmartCard + ?Sized>(card: &mut C) -> Result<Zeroizing<Vec<u8>>, Error> {
    let response = general_authenticate(card, false, Vec::new())?;
    if !response.is_ok() {
        return Err(Error::OperationFailed {
            operation: Operation::ObtainNonce,
            response: response.trailer(),
        });
    }
    extract_double_wrapped(Operation::ObtainNonce, &response, 0x80)
}


/// Exchanges the generic mapping public keys with the chip.
#[instrument(skip_all)]
fn exchange_mapping_values<C: SmartCard + ?Sized>(card: &mut C, public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let response = general_authenticate(card, false, vec![primitive(0x81, public_key)?])?;
    if !response.is_ok() {
        return Err(Error::OperationFailed {
            operation: Operation::ExchangeMappingPublicKeys,
            response: response.trailer(),
        });
    }
    extract_double_wrapped(Operation::ExchangeMappingPublicKeys, &response, 0x82)
}


#[instrument(skip_all)]
fn exchange_ephemeral_public_keys<C: SmartCard + ?Sized>(card: &mut C, public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let response = general_authenticate(card, false, vec![primitive(0x83, public_key)?])?;
    if !response.is_ok() {
        return Err(Error::OperationFailed {
            operation: Operation::ExchangeEphemeralPublicKeys,
            response: response.trailer(),
        });
    }
    extract_double_wrapped(Operation::ExchangeEphemeralPublicKeys, &response, 0x84)
}


#[instrument(skip_all)]
fn mutual_authentication<C: SmartCard + ?Sized>(card: &mut C, outgoing_token: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let response = general_authenticate(card, true, vec![primitive(0x85, outgoing_token)?])?;
    if !response.is_ok() {
        // the card verifies our token first; failure means it derived different keys
        return Err(Error::MacPcdVerificationFailedOnCard { response: response.trailer() });
    }
    extract_double_wrapped(Operation::MutualAuthentication, &response, 0x86)
}


/// Calculates the token used for mutual authentication.
///
/// The token is the MAC, keyed with `KSmac`, over the public key data object of the other party's
/// ephemeral public key:
///
/// ```plain
/// 7F49 LL
///     06 LL protocol_oid
///     86 LL public_key
/// ```
pub fn calculate_mutual_token(
    cipher_and_mac: &dyn CipherAndMac,
    protocol: &Oid,
    public_key: &[u8],
    k_session_mac: &[u8],
) -> Result<Zeroizing<Vec<u8>>, Error> {
    let public_key_data = Tlv::new(
        Tag::try_from(TAG_PUBLIC_KEY)?,
        Value::Constructed(vec![
            primitive(0x06, &oid_to_der_bytes(protocol))?, // OID (of public key type)
            primitive(0x86, public_key)?, // elliptic curve point
        ]),
    )?;
    Ok(cipher_and_mac.mac_data(&public_key_data.to_vec(), k_session_mac)?)
}


fn decode_card_point(curve: &EllipticCurve, bytes: &[u8], operation: Operation) -> Result<EcPoint, Error> {
    curve.decode_point(bytes)
        .map_err(|error| match error {
            PointDecodeError::NotOnCurve => Error::SuppliedPointNotOnCurve,
            error => Error::PublicKey { operation, error },
        })
}


enum KeySource<'k> {
    Random,
    Fixed {
        mapping_private_key: &'k [u8],
        agreement_private_key: &'k [u8],
    },
}
impl KeySource<'_> {
    fn mapping_key_pair(&self, curve: &EllipticCurve) -> Result<PaceKeyPair, Error> {
        match self {
            Self::Random => Ok(PaceKeyPair::generate(curve)),
            Self::Fixed { mapping_private_key, .. } => PaceKeyPair::from_private_key(curve, mapping_private_key),
        }
    }

    fn agreement_key_pair(&self, curve: &EllipticCurve) -> Result<PaceKeyPair, Error> {
        match self {
            Self::Random => Ok(PaceKeyPair::generate(curve)),
            Self::Fixed { agreement_private_key, .. } => PaceKeyPair::from_private_key(curve, agreement_private_key),
        }
    }
}


/// A single PACE attempt.
///
/// Each attempt can be run once; retrying (e.g. with a different password) requires a new
/// attempt, which generates fresh ephemeral keys.
pub struct PaceKeyAgreement<'p> {
    parameters: PaceParameters,
    password: &'p Password,
    state: HandshakeState,
    failed_in: Option<HandshakeState>,
}
impl<'p> PaceKeyAgreement<'p> {
    pub fn new(parameters: PaceParameters, password: &'p Password) -> Self {
        Self {
            parameters,
            password,
            state: HandshakeState::Idle,
            failed_in: None,
        }
    }

    pub fn parameters(&self) -> &PaceParameters { &self.parameters }
    pub fn state(&self) -> HandshakeState { self.state }

    /// The state the attempt was in when it failed, if it failed.
    pub fn failed_in(&self) -> Option<HandshakeState> { self.failed_in }

    /// Performs PACE with freshly generated ephemeral keys.
    #[instrument(skip_all, fields(domain = self.parameters.domain.curve().name(), source = ?self.password.source()))]
    pub fn run<C: SmartCard + ?Sized>(&mut self, card: &mut C) -> Result<SessionKeys, Error> {
        self.run_with_key_source(card, KeySource::Random)
    }

    /// Performs PACE with the given ephemeral private keys.
    ///
    /// Only useful to reproduce test vectors; ephemeral keys must never be reused.
    #[instrument(skip_all, fields(domain = self.parameters.domain.curve().name(), source = ?self.password.source()))]
    pub fn run_with_private_keys<C: SmartCard + ?Sized>(
        &mut self,
        card: &mut C,
        mapping_private_key: &[u8],
        agreement_private_key: &[u8],
    ) -> Result<SessionKeys, Error> {
        self.run_with_key_source(card, KeySource::Fixed { mapping_private_key, agreement_private_key })
    }

    fn transition(&mut self, state: HandshakeState) {
        debug!("PACE state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn run_with_key_source<C: SmartCard + ?Sized>(&mut self, card: &mut C, keys: KeySource<'_>) -> Result<SessionKeys, Error> {
        if self.state != HandshakeState::Idle {
            return Err(Error::AttemptAlreadyUsed);
        }
        let result = self.perform(card, &keys);
        if let Err(error) = &result {
            debug!("PACE failed: {}", error);
            self.failed_in = Some(self.state);
            self.transition(HandshakeState::Failed(error.kind()));
        }
        result
    }

    fn perform<C: SmartCard + ?Sized>(&mut self, card: &mut C, keys: &KeySource<'_>) -> Result<SessionKeys, Error> {
        let cipher_and_mac = self.parameters.cipher_suite.cipher_and_mac();
        let curve = self.parameters.domain.curve();
        let protocol = self.parameters.protocol();

        set_authentication_template(card, protocol, self.password.source())?;
        let encrypted_nonce = obtain_encrypted_nonce(card)?;
        self.transition(HandshakeState::NonceRequested);

        // decrypt the nonce
        let nonce_key = cipher_and_mac.derive_key_from_password(&self.password.key_seed());
        let nonce_iv = vec![0u8; cipher_and_mac.cipher_block_size()];
        let mut nonce_bytes = Zeroizing::new(encrypted_nonce.to_vec());
        cipher_and_mac.decrypt_padded_data(&mut nonce_bytes, &nonce_key, &nonce_iv)?;
        let nonce = bigint_from_be_slice(&nonce_bytes);
        self.transition(HandshakeState::NonceDecrypted);

        // generic mapping: G' = s*G + sk_map*PK_map_chip
        let mapped_curve = {
            let mapping_key_pair = keys.mapping_key_pair(curve)?;
            self.transition(HandshakeState::EphemeralKeysGenerated);
            let card_mapping_key_bytes = exchange_mapping_values(card, &curve.encode_point(mapping_key_pair.public_key()))?;
            let card_mapping_key = decode_card_point(curve, &card_mapping_key_bytes, Operation::ExchangeMappingPublicKeys)?;
            let mapping_shared_secret = mapping_key_pair.multiply_private_key(curve, &card_mapping_key)?;
            curve.derive_generic_mapping_curve(&nonce, &mapping_shared_secret)
                .ok_or(Error::ResultWasInfinite)?
        };

        // second round of key agreement with the mapped generator
        let agreement_key_pair = keys.agreement_key_pair(&mapped_curve)?;
        let public_key_bytes = mapped_curve.encode_point(agreement_key_pair.public_key());
        let card_public_key_bytes = exchange_ephemeral_public_keys(card, &public_key_bytes)?;
        let card_public_key = decode_card_point(&mapped_curve, &card_public_key_bytes, Operation::ExchangeEphemeralPublicKeys)?;
        if bool::from(public_key_bytes.ct_eq(card_public_key_bytes.as_slice())) {
            return Err(Error::DiffieHellmanKeysEqual);
        }
        let shared_secret = agreement_key_pair.multiply_private_key(&mapped_curve, &card_public_key)?;
        let shared_secret_x = match shared_secret.x() {
            Some(x) => Zeroizing::new(bigint_to_be_bytes_padded(x, mapped_curve.coordinate_len())),
            None => return Err(Error::ResultWasInfinite),
        };
        drop(agreement_key_pair);
        self.transition(HandshakeState::SharedSecretComputed);

        // derive keys
        let session_keys = SessionKeys {
            enc: cipher_and_mac.derive_encryption_key(&shared_secret_x).to_vec(),
            mac: cipher_and_mac.derive_mac_key(&shared_secret_x).to_vec(),
        };
        self.transition(HandshakeState::SessionKeysDerived);

        // mutual authentication
        let outgoing_token = calculate_mutual_token(
            cipher_and_mac,
            protocol,
            &card_public_key_bytes,
            session_keys.mac(),
        )?;
        let expected_token = calculate_mutual_token(
            cipher_and_mac,
            protocol,
            &public_key_bytes,
            session_keys.mac(),
        )?;
        let incoming_token = mutual_authentication(card, &outgoing_token)?;
        if !bool::from(incoming_token.ct_eq(&expected_token)) {
            return Err(Error::MacPiccVerificationFailedLocally);
        }
        self.transition(HandshakeState::MutualAuthVerified);

        Ok(session_keys)
    }
}


/// Performs PACE with the default parameters (ECDH-GM, AES-128, brainpoolP256r1).
pub fn establish<C: SmartCard + ?Sized>(card: &mut C, password: &Password) -> Result<SessionKeys, Error> {
    establish_with_parameters(card, PaceParameters::default(), password)
}


/// Performs PACE with the given parameters, e.g. obtained from EF.CardAccess.
pub fn establish_with_parameters<C: SmartCard + ?Sized>(
    card: &mut C,
    parameters: PaceParameters,
    password: &Password,
) -> Result<SessionKeys, Error> {
    PaceKeyAgreement::new(parameters, password).run(card)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use hex_literal::hex;

    struct RefusingCard;
    impl SmartCard for RefusingCard {
        fn communicate(&mut self, _request: &Command) -> Result<Response, CommunicationError> {
            Ok(Response::new(&[], ResponseTrailer::new(0x6A, 0x80)))
        }
    }

    /// Answers each command with the next response in line.
    struct ScriptedCard {
        responses: VecDeque<Response>,
        requests: Vec<Vec<u8>>,
    }
    impl ScriptedCard {
        fn new(responses: &[&[u8]]) -> Self {
            Self {
                responses: responses.iter()
                    .map(|response| Response::from_slice(response).unwrap())
                    .collect(),
                requests: Vec::new(),
            }
        }
    }
    impl SmartCard for ScriptedCard {
        fn communicate(&mut self, request: &Command) -> Result<Response, CommunicationError> {
            self.requests.push(request.bytes().to_vec());
            self.responses.pop_front()
                .ok_or(CommunicationError::NoResponse)
        }
    }

    #[test]
    fn test_extract_nonce() {
        let response = Response::from_slice(&hex!("7C 12 80 10 1F73E8CE 8CF49E4B 4BFF301F 2BB0D5D4 90 00")).unwrap();
        let nonce = extract_double_wrapped(Operation::ObtainNonce, &response, 0x80).unwrap();
        assert_eq!(nonce.as_slice(), &hex!("1F73E8CE 8CF49E4B 4BFF301F 2BB0D5D4")[..]);
    }

    #[test]
    fn test_extract_public_key() {
        let response = Response::from_slice(&hex!("
            7C 43 82 41
            04
            2AAFEB6F 92346132 330D8EE4 21406CBF E14F86C3 351FCAC0 056F1B29 E4BD4892
            14DC6769 542FF340 DD3EFD65 526B99A0 3A08A589 82815DDC 11EF6B3A 86586671
            90 00
        ")).unwrap();
        let public_key = extract_double_wrapped(Operation::ExchangeMappingPublicKeys, &response, 0x82).unwrap();
        assert_eq!(public_key.len(), 65);
        assert_eq!(public_key[0], 0x04);
        assert_eq!(&public_key[61..], &hex!("86586671"));
    }

    #[test]
    fn test_extract_malformed() {
        for malformed in [&hex!("90 00")[..], &hex!("7D 02 80 00 90 00"), &hex!("7C 02 81 00 90 00"), &hex!("7C 05 80 10 00 90 00")] {
            let response = Response::from_slice(malformed).unwrap();
            assert!(matches!(
                extract_double_wrapped(Operation::ObtainNonce, &response, 0x80),
                Err(Error::UnexpectedFormedAnswerFromCard { operation: Operation::ObtainNonce }),
            ));
        }
    }

    #[test]
    fn test_mutual_token_icao_appendix_g1() {
        let k_session_mac = hex!("FE251C78 58B356B2 4514B3BD 5F4297D1");
        let chip_public_key = hex!("
            04
            9E880F84 2905B8B3 181F7AF7 CAA9F0EF B743847F 44A306D2 D28C1D9E C65DF6DB
            7764B222 77A2EDDC 3C265A9F 018F9CB8 52E111B7 68B32690 4B59A019 3776F094
        ");
        let token = calculate_mutual_token(&CamAes128, PACE_ECDH_GM_AES_CBC_CMAC_128, &chip_public_key, &k_session_mac).unwrap();
        assert_eq!(token.as_slice(), &hex!("C2B0BD78 D94BA866")[..]);
    }

    #[test]
    fn test_can() {
        let can: Can = "123123".parse().unwrap();
        assert_eq!(can.as_bytes(), b"123123");
        assert_eq!(format!("{:?}", can), "Can(<redacted>)");
        assert!(Can::new(&[0x31; 16]).is_ok());
        assert!(matches!(Can::new(&[]), Err(Error::InvalidCan { length: 0 })));
        assert!(matches!(Can::new(&[0x31; 17]), Err(Error::InvalidCan { length: 17 })));

        let password = Password::from(can);
        assert_eq!(password.source(), PasswordSource::Can);
        assert_eq!(password.key_seed().as_slice(), b"123123");
        assert!(!format!("{:?}", password).contains("123123"));
    }

    #[test]
    fn test_mrz_key_seed() {
        let password = Password::from("T22000129364081251010318".parse::<MrzKey>().unwrap());
        assert_eq!(password.source().reference(), 0x01);
        assert_eq!(
            password.key_seed().as_slice(),
            &hex!("7E2D2A41 C74EA0B3 8CD36F86 3939BFA8 E9032AAD")[..],
        );
        assert!(matches!(MrzKey::new(b""), Err(Error::InvalidMrzKey)));
    }

    #[test]
    fn test_parameters_from_card_access() {
        let parameters = PaceParameters::from_card_access(&hex!("
            31 14 30 12 06 0A 04007F00070202040202 02 01 02 02 01 0D
        ")).unwrap();
        assert_eq!(parameters, PaceParameters::default());

        let aes256_p384 = PaceParameters::from_card_access(&hex!("
            31 14 30 12 06 0A 04007F00070202040204 02 01 02 02 01 0F
        ")).unwrap();
        assert_eq!(aes256_p384, PaceParameters::new(CipherSuite::Aes256, StandardDomain::NistP384));
    }

    #[test]
    fn test_parameters_from_card_access_unsupported() {
        // integrated mapping
        let result = PaceParameters::from_card_access(&hex!("
            31 14 30 12 06 0A 04007F00070202040402 02 01 02 02 01 0D
        "));
        assert!(matches!(result, Err(Error::MappingNotSupported { .. })));

        // 3DES
        let result = PaceParameters::from_card_access(&hex!("
            31 14 30 12 06 0A 04007F00070202040201 02 01 02 02 01 0D
        "));
        assert!(matches!(result, Err(Error::UnsupportedKeyAgreementAlgorithm { .. })));

        // parameter 14 is not a standardized curve
        let result = PaceParameters::from_card_access(&hex!("
            31 14 30 12 06 0A 04007F00070202040202 02 01 02 02 01 0E
        "));
        assert!(matches!(result, Err(Error::IncompatibleProtocolParameter { parameter: 14, .. })));

        let result = PaceParameters::from_card_access(&hex!("
            31 11 30 0F 06 0A 04007F00070202040202 02 01 02
        "));
        assert!(matches!(result, Err(Error::CustomParameters)));

        // only Chip Authentication
        let result = PaceParameters::from_card_access(&hex!("
            31 11 30 0F 06 0A 04007F00070202030202 02 01 01
        "));
        assert!(matches!(result, Err(Error::NotSupported)));
    }

    #[test]
    fn test_refused_authentication_template() {
        let password = Password::from(Can::new(b"123123").unwrap());
        let mut agreement = PaceKeyAgreement::new(PaceParameters::default(), &password);
        assert_eq!(agreement.state(), HandshakeState::Idle);

        let error = agreement.run(&mut RefusingCard).unwrap_err();
        assert!(matches!(
            error,
            Error::OperationFailed {
                operation: Operation::SetAuthenticationTemplate,
                response: ResponseTrailer { sw1: 0x6A, sw2: 0x80 },
            },
        ));
        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert!(!error.is_wrong_password());
        assert_eq!(agreement.state(), HandshakeState::Failed(ErrorKind::Protocol));
        assert_eq!(agreement.failed_in(), Some(HandshakeState::Idle));

        assert!(matches!(agreement.run(&mut RefusingCard), Err(Error::AttemptAlreadyUsed)));
    }

    #[test]
    fn test_refused_mapping_fails_after_key_generation() {
        let mut card = ScriptedCard::new(&[
            &hex!("90 00"),
            &hex!("7C 12 80 10 95A3A016 522EE98D 01E76CB6 B98B42C3 90 00"),
            &hex!("6A 80"),
        ]);
        let password = Password::from(Can::new(b"123456").unwrap());
        let mut agreement = PaceKeyAgreement::new(PaceParameters::default(), &password);

        let error = agreement.run(&mut card).unwrap_err();
        assert!(matches!(
            error,
            Error::OperationFailed { operation: Operation::ExchangeMappingPublicKeys, .. },
        ));
        assert_eq!(agreement.failed_in(), Some(HandshakeState::EphemeralKeysGenerated));
        assert_eq!(agreement.state(), HandshakeState::Failed(ErrorKind::Protocol));
        assert!(card.responses.is_empty());

        // the mapping public key went out as 7C { 81 <uncompressed point> } in a chained command
        assert_eq!(card.requests[1], hex!("10 86 00 00 02 7C 00 00"));
        assert_eq!(&card.requests[2][..10], &hex!("10 86 00 00 45 7C 43 81 41 04"));
        assert_eq!(card.requests[2].len(), 5 + 0x45 + 1);
    }

    #[test]
    fn test_dynamic_authentication_data_encoding() {
        // MSE:Set AT of the ICAO worked example
        let mut card = ScriptedCard::new(&[&hex!("90 00")]);
        set_authentication_template(&mut card, PACE_ECDH_GM_AES_CBC_CMAC_128, PasswordSource::Mrz).unwrap();
        assert_eq!(card.requests, vec![hex!("00 22 C1 A4 0F 80 0A 04007F00070202040202 83 01 01").to_vec()]);

        let dynamic_authentication_data = Tlv::new(
            Tag::try_from(TAG_DYNAMIC_AUTHENTICATION_DATA).unwrap(),
            Value::Constructed(vec![primitive(0x81, &hex!("04 AABB")).unwrap()]),
        ).unwrap();
        assert_eq!(dynamic_authentication_data.to_vec(), hex!("7C 05 81 03 04 AABB"));

        let empty = Tlv::new(
            Tag::try_from(TAG_DYNAMIC_AUTHENTICATION_DATA).unwrap(),
            Value::Constructed(Vec::new()),
        ).unwrap();
        assert_eq!(empty.to_vec(), hex!("7C 00"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::MacPcdVerificationFailedOnCard { response: ResponseTrailer::new(0x63, 0xC2) }.kind(), ErrorKind::Security);
        assert!(Error::MacPcdVerificationFailedOnCard { response: ResponseTrailer::new(0x63, 0xC2) }.is_wrong_password());
        assert_eq!(Error::MacPiccVerificationFailedLocally.kind(), ErrorKind::Security);
        assert_eq!(Error::Communication(CommunicationError::NoResponse).kind(), ErrorKind::Transport);
        assert_eq!(Error::InvalidCan { length: 0 }.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn test_session_keys_debug_is_redacted() {
        let keys = SessionKeys { enc: vec![0xAB; 16], mac: vec![0xCD; 16] };
        let debugged = format!("{:?}", keys);
        assert!(!debugged.contains("171"));
        assert!(!debugged.to_lowercase().contains("abab"));
        assert!(debugged.contains("<redacted>"));
    }
}
