//! Synthetic message construction shared by the unit tests

use crate::types::{
    DltMessage, HeaderExtra, StandardHeader, StorageHeader, HTYP_VERS_SHIFT, HTYP_WEID, HTYP_WTMS,
};

/// A well-formed version-1 message for the given ECU with an ECU id and
/// (when nonzero) a relative timestamp in the header extras.
pub(crate) fn msg_for_ecu(ecu: &[u8; 4], secs: u32, usecs: u32, tmsp: u32) -> DltMessage {
    let payload = b"payload".to_vec();
    let mut htyp = (1 << HTYP_VERS_SHIFT) | HTYP_WEID;
    if tmsp != 0 {
        htyp |= HTYP_WTMS;
    }
    let len = 4 + 4 + if tmsp != 0 { 4 } else { 0 } + payload.len() as u16;
    DltMessage {
        storage: StorageHeader {
            seconds: secs,
            microseconds: usecs,
            ecu: *ecu,
        },
        standard: StandardHeader { htyp, mcnt: 0, len },
        extra: HeaderExtra {
            ecu: Some(*ecu),
            session_id: None,
            tmsp: if tmsp != 0 { Some(tmsp) } else { None },
        },
        extended: None,
        payload,
    }
}

/// Shorthand for a single-ECU test message
pub(crate) fn msg_with_tmsp(secs: u32, usecs: u32, tmsp: u32) -> DltMessage {
    msg_for_ecu(b"ECU1", secs, usecs, tmsp)
}
