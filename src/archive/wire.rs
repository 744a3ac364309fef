//! Byte-level plumbing shared by the record codecs
//!
//! Every multi-byte field in an archive file is big-endian regardless of
//! host order. Records are framed as:
//!
//! ```text
//! len: i32 | type: i32 | body... | len: i32 (trailer)
//! ```
//!
//! with `len` covering the whole record including both length words.

use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::timestamp::{ArchiveVersion, Timestamp, NSEC_PER_SEC};

/// Record type tags in the metadata log
pub(crate) const TYPE_INDOM_V2: i32 = 2;
pub(crate) const TYPE_LABEL_V2: i32 = 3;
pub(crate) const TYPE_INDOM: i32 = 5;
pub(crate) const TYPE_INDOM_DELTA: i32 = 6;
pub(crate) const TYPE_LABEL: i32 = 7;

/// Smallest possible framed record: len + type + trailer
pub(crate) const ENVELOPE_SIZE: usize = 12;

/// Bounds-checked big-endian reader over a record buffer
///
/// Every read fails with a corruption error instead of running past the
/// declared record boundary.
#[derive(Debug)]
pub(crate) struct Scan<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scan<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> ArchiveResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ArchiveError::Corrupt(format!(
                "record truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn i32(&mut self) -> ArchiveResult<i32> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32(&mut self) -> ArchiveResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i64(&mut self) -> ArchiveResult<i64> {
        let b = self.bytes(8)?;
        Ok(i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn u16(&mut self) -> ArchiveResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u8(&mut self) -> ArchiveResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Read a timestamp in the pinned version's layout, rejecting
    /// out-of-range sub-second values.
    pub fn stamp(&mut self, version: ArchiveVersion) -> ArchiveResult<Timestamp> {
        let (sec, nsec) = match version {
            ArchiveVersion::V2 => {
                let sec = self.i32()? as i64;
                let usec = self.i32()?;
                if !(0..1_000_000).contains(&usec) {
                    return Err(ArchiveError::Corrupt(format!(
                        "timestamp microseconds {} out of range",
                        usec
                    )));
                }
                (sec, usec as u32 * 1_000)
            }
            ArchiveVersion::V3 => {
                let sec = self.i64()?;
                let nsec = self.i32()?;
                if !(0..NSEC_PER_SEC as i32).contains(&nsec) {
                    return Err(ArchiveError::Corrupt(format!(
                        "timestamp nanoseconds {} out of range",
                        nsec
                    )));
                }
                (sec, nsec as u32)
            }
        };
        Ok(Timestamp::new(sec, nsec))
    }
}

/// Reserve space for `additional` elements, surfacing allocation failure
/// as an error carrying the failed size instead of aborting. Used where
/// the element count came from an untrusted record field.
pub(crate) fn try_reserve<T>(vec: &mut Vec<T>, additional: usize) -> ArchiveResult<()> {
    vec.try_reserve_exact(additional)
        .map_err(|_| ArchiveError::OutOfMemory {
            bytes: additional.saturating_mul(std::mem::size_of::<T>()),
        })
}

/// Start a framed record: length placeholder plus type tag.
pub(crate) fn begin_record(rtype: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&0i32.to_be_bytes());
    buf.extend_from_slice(&rtype.to_be_bytes());
    buf
}

/// Close a framed record: append the trailer and patch the length prefix.
pub(crate) fn finish_record(mut buf: Vec<u8>) -> ArchiveResult<Vec<u8>> {
    let len = buf.len() + 4;
    let len32 = i32::try_from(len).map_err(|_| {
        ArchiveError::IllegalRecord(format!("record of {} bytes exceeds format limit", len))
    })?;
    buf.extend_from_slice(&len32.to_be_bytes());
    buf[0..4].copy_from_slice(&len32.to_be_bytes());
    Ok(buf)
}

/// Check the record framing: leading length equals the buffer length,
/// equals the trailing length. Returns the scanner positioned after the
/// type tag, plus the type tag itself.
pub(crate) fn open_record<'a>(buf: &'a [u8]) -> ArchiveResult<(Scan<'a>, i32)> {
    if buf.len() < ENVELOPE_SIZE {
        return Err(ArchiveError::Corrupt(format!(
            "record of {} bytes smaller than minimum envelope {}",
            buf.len(),
            ENVELOPE_SIZE
        )));
    }
    let mut scan = Scan::new(buf);
    let len = scan.i32()?;
    if len as usize != buf.len() {
        return Err(ArchiveError::Corrupt(format!(
            "header length {} != record length {}",
            len,
            buf.len()
        )));
    }
    let trailer = i32::from_be_bytes([
        buf[buf.len() - 4],
        buf[buf.len() - 3],
        buf[buf.len() - 2],
        buf[buf.len() - 1],
    ]);
    if trailer != len {
        return Err(ArchiveError::Corrupt(format!(
            "trailer length {} != header length {}",
            trailer, len
        )));
    }
    let rtype = scan.i32()?;
    Ok((scan, rtype))
}
