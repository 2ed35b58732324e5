//! Object identifiers relevant to PACE.


use rasn::types::Oid;


macro_rules! pace_oid {
    ($name:ident $(, $number:expr)*) => {
        pub const $name: &'static Oid = Oid::const_new(&[0, 4, 0, 127, 0, 7, 2, 2, 4 $(, $number)*]);
    };
}

pace_oid!(PACE_OID_PREFIX);

pace_oid!(PACE_DH_GM,                   1);
pace_oid!(PACE_DH_GM_3DES_CBC_CBC,      1, 1);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_128,  1, 2);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_192,  1, 3);
pace_oid!(PACE_DH_GM_AES_CBC_CMAC_256,  1, 4);

pace_oid!(PACE_ECDH_GM,                     2);
pace_oid!(PACE_ECDH_GM_3DES_CBC_CBC,        2, 1);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_128,    2, 2);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_192,    2, 3);
pace_oid!(PACE_ECDH_GM_AES_CBC_CMAC_256,    2, 4);

pace_oid!(PACE_DH_IM,                   3);
pace_oid!(PACE_ECDH_IM,                 4);
pace_oid!(PACE_ECDH_CAM,                6);


/// Whether the object identifier denotes a PACE protocol (of any mapping, key agreement or cipher).
pub fn is_pace_protocol(oid: &Oid) -> bool {
    oid.len() == PACE_OID_PREFIX.len() + 2 && oid.starts_with(PACE_OID_PREFIX)
}

/// Whether the PACE protocol uses a mapping other than generic mapping.
pub fn is_non_generic_mapping(oid: &Oid) -> bool {
    [PACE_DH_IM, PACE_ECDH_IM, PACE_ECDH_CAM].iter()
        .any(|family| oid.starts_with(family))
}
