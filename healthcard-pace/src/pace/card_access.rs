//! Decoding of the PACE-relevant parts of EF.CardAccess.
//!
//! EF.CardAccess contains a `SET OF SecurityInfo`, where each `SecurityInfo` is a `SEQUENCE`
//! starting with the protocol's object identifier. Entries of other protocols need not adhere to
//! the PACE structure, so the set is first decoded as a `SetOf<Any>`, then each entry as a
//! `Vec<Any>` and its first member as an `ObjectIdentifier`.


use rasn::{AsnType, Decode, Encode};
use rasn::types::{Any, ObjectIdentifier, SetOf};
use tracing::debug;

use crate::der_util::oid_to_der_bytes;
use crate::pace::Error;
use crate::pace::oids::is_pace_protocol;


/// A PACEInfo entry of EF.CardAccess.
///
/// ```plain
/// PACEInfo ::= SEQUENCE {
///     protocol OBJECT IDENTIFIER,
///     version INTEGER, -- MUST be 2
///     parameterId INTEGER OPTIONAL
/// }
/// ```
#[derive(AsnType, Clone, Debug, Decode, Encode, Eq, Hash, PartialEq)]
pub struct PaceInfo {
    pub protocol: ObjectIdentifier,
    pub version: i64,
    pub parameter_id: Option<i64>,
}


fn security_infos(card_access: &[u8]) -> Result<Vec<Any>, Error> {
    let security_infos: SetOf<Any> = rasn::der::decode(card_access)
        .map_err(Error::CardAccessDecoding)?;
    Ok(security_infos.to_vec().into_iter().cloned().collect())
}

fn security_info_protocol(entry_index: usize, security_info: &Any) -> Result<Option<ObjectIdentifier>, Error> {
    let security_info_seq: Vec<Any> = rasn::der::decode(security_info.as_bytes())
        .map_err(|error| Error::CardAccessEntryDecoding { entry_index, error })?;
    let Some(first_member) = security_info_seq.first() else {
        return Ok(None);
    };
    let protocol: ObjectIdentifier = rasn::der::decode(first_member.as_bytes())
        .map_err(|error| Error::CardAccessEntryDecoding { entry_index, error })?;
    Ok(Some(protocol))
}


/// Decodes all PACEInfo entries of EF.CardAccess, skipping security infos of other protocols.
///
/// Each PACEInfo is returned along with its index within the set of security infos.
pub fn decode_pace_infos(card_access: &[u8]) -> Result<Vec<(usize, PaceInfo)>, Error> {
    let mut ret = Vec::new();
    for (entry_index, security_info) in security_infos(card_access)?.into_iter().enumerate() {
        let Some(protocol) = security_info_protocol(entry_index, &security_info)? else {
            debug!("skipping empty security info {}", entry_index);
            continue;
        };
        if !is_pace_protocol(&protocol) {
            debug!("skipping security info {} with protocol {:?}", entry_index, protocol);
            continue;
        }

        let pace_info: PaceInfo = rasn::der::decode(security_info.as_bytes())
            .map_err(|error| Error::CardAccessEntryDecodingPace { entry_index, error })?;
        ret.push((entry_index, pace_info));
    }
    Ok(ret)
}


/// Returns the raw (DER value) object identifier of the first security info in EF.CardAccess.
pub fn extract_protocol_identifier(card_access: &[u8]) -> Result<Vec<u8>, Error> {
    let security_infos = security_infos(card_access)?;
    let first_entry = security_infos.first()
        .ok_or(Error::CardAccessEmpty)?;
    let protocol = security_info_protocol(0, first_entry)?
        .ok_or(Error::CardAccessEmpty)?;
    Ok(oid_to_der_bytes(&protocol))
}
