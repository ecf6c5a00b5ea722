//! DLT v1 record codec
//!
//! Decoding scans a seekable byte stream for the `DLT\x01` storage pattern,
//! resynchronizing one byte at a time on garbage, and yields parsed
//! [`DltMessage`]s. Records with an unsupported header version or an
//! impossible declared length are reported and skipped; a truncated record or
//! a stretch of bytes with no pattern at all ends that stream (everything
//! parsed before is kept). Encoding serializes in the exact reverse order,
//! converting session id and timestamp back to big-endian, so that an
//! unmodified message round-trips bit for bit.

use crate::types::{
    DltError, DltMessage, ExtendedHeader, HeaderExtra, Result, StandardHeader, StorageHeader,
    EXTENDED_HEADER_SIZE, STANDARD_HEADER_SIZE, STORAGE_HEADER_SIZE,
};
use binrw::{BinRead, BinWrite};
use std::io::{Read, Seek, SeekFrom, Write};

/// Accepted standard-header version range
pub const DLT_HEADER_VERSION_MIN: u8 = 1;
pub const DLT_HEADER_VERSION_MAX: u8 = 1;

/// Counters collected while decoding one input stream
#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderStats {
    /// Successfully parsed records
    pub messages: u64,
    /// Bytes discarded while searching for the storage pattern
    pub skipped_bytes: u64,
    /// Records skipped for an unsupported header version
    pub bad_version: u64,
    /// Records skipped for an impossible declared length
    pub bad_length: u64,
}

/// Streaming decoder over a seekable reader.
///
/// Use it as an `Iterator` of `Result<DltMessage>`; a terminal error
/// (truncation, lost synchronization, I/O) is yielded once and ends the
/// iteration. Wrap files in a `BufReader`.
pub struct DltReader<R> {
    reader: R,
    stream_len: u64,
    done: bool,
    /// Decoding counters, valid at any point during iteration
    pub stats: ReaderStats,
}

impl<R: Read + Seek> DltReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            stream_len,
            done: false,
            stats: ReaderStats::default(),
        })
    }

    /// Bytes left between the current position and the end of the stream
    fn remaining(&mut self) -> Result<u64> {
        let pos = self.reader.stream_position()?;
        Ok(self.stream_len.saturating_sub(pos))
    }

    /// Scan forward to the next storage pattern and read the storage header.
    ///
    /// Returns `Ok(None)` on a clean end of stream (fewer bytes left than a
    /// storage header). Failing to find the pattern in a longer tail means
    /// the stream is unsynchronized, which is terminal.
    fn scan_storage_header(&mut self) -> Result<Option<StorageHeader>> {
        let mut skipped: u64 = 0;
        loop {
            if self.remaining()? < STORAGE_HEADER_SIZE as u64 {
                if skipped > 0 {
                    self.stats.skipped_bytes += skipped;
                    return Err(DltError::Unsynchronized { skipped });
                }
                let tail = self.remaining()?;
                if tail > 0 {
                    log::debug!("ignoring {} trailing bytes after the last record", tail);
                }
                return Ok(None);
            }
            match StorageHeader::read(&mut self.reader) {
                Ok(storage) => {
                    if skipped > 0 {
                        self.stats.skipped_bytes += skipped;
                        log::warn!(
                            "skipped {} bytes of data to find the next storage pattern",
                            skipped
                        );
                    }
                    return Ok(Some(storage));
                }
                Err(err) if matches!(err, binrw::Error::BadMagic { .. }) => {
                    // the reader is rewound on failure; step one byte and retry
                    self.reader.seek(SeekFrom::Current(1))?;
                    skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Decode the next record, skipping over reported bad records.
    pub fn read_message(&mut self) -> Result<Option<DltMessage>> {
        loop {
            let storage = match self.scan_storage_header()? {
                Some(storage) => storage,
                None => return Ok(None),
            };

            if self.remaining()? < STANDARD_HEADER_SIZE as u64 {
                return Err(DltError::Truncated {
                    index: self.stats.messages,
                    what: "standard header",
                });
            }
            let standard = StandardHeader::read(&mut self.reader)?;

            let version = standard.version();
            if !(DLT_HEADER_VERSION_MIN..=DLT_HEADER_VERSION_MAX).contains(&version) {
                self.stats.bad_version += 1;
                let err = DltError::BadVersion {
                    index: self.stats.messages,
                    version,
                };
                log::warn!("{}, skipping record", err);
                continue;
            }

            // len covers the standard header itself plus extras, extended
            // header and payload
            let extra_size = standard.has_ecu_id() as usize * 4
                + standard.has_session_id() as usize * 4
                + standard.has_tmsp() as usize * 4;
            let ext_size = if standard.has_extended_header() {
                EXTENDED_HEADER_SIZE
            } else {
                0
            };
            let payload_len = (standard.len as usize)
                .checked_sub(STANDARD_HEADER_SIZE + extra_size + ext_size);
            let payload_len = match payload_len {
                Some(len) if standard.len as usize > STANDARD_HEADER_SIZE => len,
                _ => {
                    self.stats.bad_length += 1;
                    let err = DltError::BadLength {
                        index: self.stats.messages,
                        len: standard.len,
                    };
                    log::warn!("{}, skipping record", err);
                    continue;
                }
            };

            if self.remaining()? < (extra_size + ext_size + payload_len) as u64 {
                return Err(DltError::Truncated {
                    index: self.stats.messages,
                    what: "message body",
                });
            }

            let extra = HeaderExtra::read_args(
                &mut self.reader,
                binrw::args! { htyp: standard.htyp },
            )?;
            let extended = if standard.has_extended_header() {
                Some(ExtendedHeader::read(&mut self.reader)?)
            } else {
                None
            };
            let mut payload = vec![0u8; payload_len];
            self.reader.read_exact(&mut payload)?;

            self.stats.messages += 1;
            return Ok(Some(DltMessage {
                storage,
                standard,
                extra,
                extended,
                payload,
            }));
        }
    }

    /// Hand back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> Iterator for DltReader<R> {
    type Item = Result<DltMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_message() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Serialize one record in wire order: storage header, standard header,
/// header-extra fields (session id and tmsp back to big-endian), extended
/// header, payload.
pub fn write_message<W: Write + Seek>(msg: &DltMessage, writer: &mut W) -> Result<()> {
    msg.storage.write(writer)?;
    msg.standard.write(writer)?;
    msg.extra.write(writer)?;
    if let Some(ext) = &msg.extended {
        ext.write(writer)?;
    }
    writer.write_all(&msg.payload)?;
    Ok(())
}
