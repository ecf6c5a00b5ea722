//! Core types for the DLT sorting library
//!
//! This module defines the record model the codec emits and the rest of the
//! pipeline consumes: the DLT storage/standard/extended headers, the parsed
//! [`DltMessage`], the [`EcuId`] bucket key and the library error type.
//! A `DltMessage` keeps every header field it was decoded from so that
//! re-serialization is byte exact.

use binrw::binrw;
use std::fmt;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, DltError>;

/// Microseconds per second, the resolution of all absolute times here.
pub const USECS_PER_SEC: i64 = 1_000_000;

/// Microseconds per relative-timestamp tick (tmsp is counted in 0.1 ms).
pub const TMSP_TICK_USECS: i64 = 100;

/// Standard header type bits (`htyp`)
pub const HTYP_UEH: u8 = 0x01; // use extended header
pub const HTYP_MSBF: u8 = 0x02; // payload in big endian
pub const HTYP_WEID: u8 = 0x04; // with ECU id
pub const HTYP_WSID: u8 = 0x08; // with session id
pub const HTYP_WTMS: u8 = 0x10; // with timestamp
pub const HTYP_VERS_MASK: u8 = 0xe0;
pub const HTYP_VERS_SHIFT: u8 = 5;

/// Message type (`MSTP`) value for control messages
pub const MSTP_CONTROL: u8 = 0x03;

/// DLT storage header: the wrapper a logger puts around every received
/// record. The leading `DLT\x01` pattern doubles as the resync magic.
#[binrw]
#[brw(little, magic = b"DLT\x01")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    /// Receive time, seconds since the epoch (logger wall clock)
    pub seconds: u32,
    /// Receive time, microsecond remainder
    pub microseconds: u32,
    /// ECU id as stamped by the logger
    pub ecu: [u8; 4],
}

/// Serialized size of the storage header including the magic
pub const STORAGE_HEADER_SIZE: usize = 16;

/// DLT standard header. `len` covers everything from this header through the
/// payload, excluding the storage header, and is big-endian on the wire.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardHeader {
    pub htyp: u8,
    /// Message counter
    pub mcnt: u8,
    #[brw(big)]
    pub len: u16,
}

/// Serialized size of the standard header
pub const STANDARD_HEADER_SIZE: usize = 4;

impl StandardHeader {
    /// Protocol version encoded in bits 5..7 of `htyp`
    pub fn version(&self) -> u8 {
        (self.htyp & HTYP_VERS_MASK) >> HTYP_VERS_SHIFT
    }

    pub fn has_ecu_id(&self) -> bool {
        self.htyp & HTYP_WEID != 0
    }

    pub fn has_session_id(&self) -> bool {
        self.htyp & HTYP_WSID != 0
    }

    pub fn has_tmsp(&self) -> bool {
        self.htyp & HTYP_WTMS != 0
    }

    pub fn has_extended_header(&self) -> bool {
        self.htyp & HTYP_UEH != 0
    }
}

/// Optional header-extra fields following the standard header, present in
/// the fixed order ECU id, session id, timestamp depending on `htyp` bits.
/// Session id and timestamp are big-endian on the wire.
#[binrw]
#[brw(big)]
#[br(import { htyp: u8 })]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderExtra {
    #[br(if(htyp & HTYP_WEID != 0))]
    pub ecu: Option<[u8; 4]>,
    #[br(if(htyp & HTYP_WSID != 0))]
    pub session_id: Option<u32>,
    #[br(if(htyp & HTYP_WTMS != 0))]
    pub tmsp: Option<u32>,
}

impl HeaderExtra {
    /// Serialized size in bytes
    pub fn wire_size(&self) -> usize {
        self.ecu.map_or(0, |_| 4) + self.session_id.map_or(0, |_| 4) + self.tmsp.map_or(0, |_| 4)
    }
}

/// DLT extended header, present when `HTYP_UEH` is set.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedHeader {
    /// Message info: verbose bit, message type (MSTP), type info (MTIN)
    pub msin: u8,
    /// Number of arguments
    pub noar: u8,
    pub apid: [u8; 4],
    pub ctid: [u8; 4],
}

/// Serialized size of the extended header
pub const EXTENDED_HEADER_SIZE: usize = 10;

impl ExtendedHeader {
    /// Message type (MSTP) from bits 1..3 of `msin`
    pub fn message_type(&self) -> u8 {
        (self.msin >> 1) & 0x07
    }
}

/// A single parsed DLT record.
///
/// Holds all header fields plus the raw payload so that encoding an
/// unmodified message reproduces the input bytes exactly. Messages are owned
/// by their per-ECU bucket; lifecycles refer to them by index.
#[derive(Debug, Clone, PartialEq)]
pub struct DltMessage {
    pub storage: StorageHeader,
    pub standard: StandardHeader,
    pub extra: HeaderExtra,
    pub extended: Option<ExtendedHeader>,
    /// Opaque payload bytes, never interpreted
    pub payload: Vec<u8>,
}

impl DltMessage {
    /// Absolute receive time in microseconds since the epoch, from the
    /// storage header stamped by the logger.
    pub fn recv_usec(&self) -> i64 {
        self.storage.seconds as i64 * USECS_PER_SEC + self.storage.microseconds as i64
    }

    /// Relative timestamp in 0.1 ms ticks since ECU power-on; 0 when the
    /// record carries none (an unreliable boundary for lifecycle reasoning).
    pub fn tmsp(&self) -> u32 {
        self.extra.tmsp.unwrap_or(0)
    }

    /// Relative timestamp converted to microseconds
    pub fn tmsp_usec(&self) -> i64 {
        self.tmsp() as i64 * TMSP_TICK_USECS
    }

    /// The emitting ECU: the header-extra id when present, the storage
    /// header id otherwise.
    pub fn ecu_id(&self) -> EcuId {
        EcuId(self.extra.ecu.unwrap_or(self.storage.ecu))
    }

    /// Application id from the extended header, if any
    pub fn apid(&self) -> Option<[u8; 4]> {
        self.extended.as_ref().map(|e| e.apid)
    }

    /// Context id from the extended header, if any
    pub fn ctid(&self) -> Option<[u8; 4]> {
        self.extended.as_ref().map(|e| e.ctid)
    }

    /// True for control messages, which routinely carry no timestamp
    pub fn is_control(&self) -> bool {
        self.extended
            .as_ref()
            .map(|e| e.message_type() == MSTP_CONTROL)
            .unwrap_or(false)
    }

    /// Total on-disk size of the record including the storage header
    pub fn wire_size(&self) -> usize {
        STORAGE_HEADER_SIZE + self.standard.len as usize
    }
}

/// A 4-byte ECU identifier used as an opaque bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EcuId(pub [u8; 4]);

impl fmt::Display for EcuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ids are padded with NULs; print the printable prefix
        for &b in self.0.iter().take_while(|&&b| b != 0) {
            let c = if b.is_ascii_graphic() { b as char } else { '-' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Errors that can occur while decoding, sorting or writing DLT logs
#[derive(Debug, thiserror::Error)]
pub enum DltError {
    /// No storage pattern found in the rest of the file; terminal for that
    /// file, everything parsed before is kept.
    #[error("no DLT storage pattern found (skipped {skipped} bytes)")]
    Unsynchronized { skipped: u64 },

    /// The file ends inside a record; terminal for that file.
    #[error("truncated record after message #{index}: {what}")]
    Truncated { index: u64, what: &'static str },

    /// Record declares an unsupported standard-header version; the record
    /// is skipped and scanning continues.
    #[error("record #{index} has unsupported header version {version}")]
    BadVersion { index: u64, version: u8 },

    /// Record declares a length too small for its own headers; the record
    /// is skipped and scanning continues.
    #[error("record #{index} declares length {len}, too small for its headers")]
    BadLength { index: u64, len: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("binary codec error: {0}")]
    Codec(#[from] binrw::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_header_flags() {
        let hdr = StandardHeader {
            htyp: (1 << HTYP_VERS_SHIFT) | HTYP_WEID | HTYP_WTMS,
            mcnt: 0,
            len: 20,
        };
        assert_eq!(hdr.version(), 1);
        assert!(hdr.has_ecu_id());
        assert!(hdr.has_tmsp());
        assert!(!hdr.has_session_id());
        assert!(!hdr.has_extended_header());
    }

    #[test]
    fn test_recv_usec() {
        let msg = DltMessage {
            storage: StorageHeader {
                seconds: 61,
                microseconds: 2,
                ecu: *b"ECU1",
            },
            standard: StandardHeader {
                htyp: 1 << HTYP_VERS_SHIFT,
                mcnt: 0,
                len: 4,
            },
            extra: HeaderExtra::default(),
            extended: None,
            payload: Vec::new(),
        };
        assert_eq!(msg.recv_usec(), 61_000_002);
        assert_eq!(msg.tmsp(), 0);
        assert_eq!(msg.ecu_id(), EcuId(*b"ECU1"));
    }

    #[test]
    fn test_ecu_id_prefers_header_extra() {
        let msg = DltMessage {
            storage: StorageHeader {
                seconds: 0,
                microseconds: 0,
                ecu: *b"LOGR",
            },
            standard: StandardHeader {
                htyp: (1 << HTYP_VERS_SHIFT) | HTYP_WEID,
                mcnt: 0,
                len: 8,
            },
            extra: HeaderExtra {
                ecu: Some(*b"ECU2"),
                session_id: None,
                tmsp: None,
            },
            extended: None,
            payload: Vec::new(),
        };
        assert_eq!(msg.ecu_id(), EcuId(*b"ECU2"));
    }

    #[test]
    fn test_ecu_id_display() {
        assert_eq!(format!("{}", EcuId(*b"ECU1")), "ECU1");
        assert_eq!(format!("{}", EcuId([b'A', b'B', 0, 0])), "AB");
        assert_eq!(format!("{}", EcuId([b'A', 0x01, 0, 0])), "A-");
    }

    #[test]
    fn test_header_extra_wire_size() {
        let extra = HeaderExtra {
            ecu: Some(*b"ECU1"),
            session_id: None,
            tmsp: Some(1234),
        };
        assert_eq!(extra.wire_size(), 8);
        assert_eq!(HeaderExtra::default().wire_size(), 0);
    }

    #[test]
    fn test_extended_header_message_type() {
        // msin 0x26: control message (MSTP 3), verbose bit clear
        let ext = ExtendedHeader {
            msin: 0x26,
            noar: 0,
            apid: *b"APP\0",
            ctid: *b"CTX\0",
        };
        assert_eq!(ext.message_type(), MSTP_CONTROL);
    }
}
