//! Temporal index: the seekable side-file of an archive
//!
//! The index is a flat array of fixed-size records, each mapping a
//! timestamp to the byte offsets the metadata log and the current data
//! volume had reached at that time. The writer appends one entry at
//! rollover and index-flush events; a reader loads the whole file once
//! at open time and binary-searches the in-memory array (the search
//! itself belongs to the caller, not this layer).
//!
//! Record layout, big-endian, no framing:
//! ```text
//! legacy (20 bytes):    sec:i32 usec:i32 vol:i32 meta_off:i32 data_off:i32
//! extended (32 bytes):  sec:i64 nsec:i32 vol:i32 meta_off:i64 data_off:i64
//! ```
//!
//! Separating these sparse, periodic offset snapshots from the
//! record-by-record metadata log lets a reader jump near a target time
//! in O(log n) and linear-scan only the short remaining distance.

use crate::archive::control::{StreamKind, VolumeGateway};
use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::header::ArchiveLabel;
use crate::archive::timestamp::{ArchiveVersion, Timestamp};
use crate::archive::wire::Scan;
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};

/// One temporal index entry
///
/// Appended exclusively by the writer, immutable once written, and in
/// non-decreasing timestamp order across the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TiRecord {
    pub stamp: Timestamp,
    /// Data volume the offsets refer to
    pub volume: i32,
    /// Write offset of the metadata log at `stamp`
    pub meta_offset: u64,
    /// Write offset of the data volume at `stamp`
    pub data_offset: u64,
}

impl TiRecord {
    /// On-disk size of one record in this version
    pub fn disk_size(version: ArchiveVersion) -> usize {
        match version {
            ArchiveVersion::V2 => 20,
            ArchiveVersion::V3 => 32,
        }
    }

    /// Serialize in the pinned version's layout. Legacy offsets are
    /// 32-bit; offsets that no longer fit are rejected, never wrapped.
    pub fn encode(&self, version: ArchiveVersion) -> ArchiveResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::disk_size(version));
        self.stamp.encode(version, &mut buf)?;
        buf.extend_from_slice(&self.volume.to_be_bytes());
        match version {
            ArchiveVersion::V2 => {
                buf.extend_from_slice(&legacy_offset("meta", self.meta_offset)?.to_be_bytes());
                buf.extend_from_slice(&legacy_offset("data", self.data_offset)?.to_be_bytes());
            }
            ArchiveVersion::V3 => {
                buf.extend_from_slice(&(self.meta_offset as i64).to_be_bytes());
                buf.extend_from_slice(&(self.data_offset as i64).to_be_bytes());
            }
        }
        Ok(buf)
    }

    /// Parse one record from an exactly-sized buffer
    pub fn decode(buf: &[u8], version: ArchiveVersion) -> ArchiveResult<Self> {
        if buf.len() != Self::disk_size(version) {
            return Err(ArchiveError::Corrupt(format!(
                "index record of {} bytes, expected {}",
                buf.len(),
                Self::disk_size(version)
            )));
        }
        let mut scan = Scan::new(buf);
        let stamp = scan.stamp(version)?;
        let volume = scan.i32()?;
        let (meta_offset, data_offset) = match version {
            ArchiveVersion::V2 => (decoded_offset(scan.i32()? as i64)?, decoded_offset(scan.i32()? as i64)?),
            ArchiveVersion::V3 => (decoded_offset(scan.i64()?)?, decoded_offset(scan.i64()?)?),
        };
        Ok(Self {
            stamp,
            volume,
            meta_offset,
            data_offset,
        })
    }
}

fn legacy_offset(stream: &'static str, offset: u64) -> ArchiveResult<i32> {
    i32::try_from(offset).map_err(|_| ArchiveError::OffsetTooLarge { stream, offset })
}

fn decoded_offset(raw: i64) -> ArchiveResult<u64> {
    u64::try_from(raw)
        .map_err(|_| ArchiveError::Corrupt(format!("negative index offset {}", raw)))
}

/// Append one temporal index entry through the gateway.
///
/// The metadata and data streams are flushed first so the captured
/// offsets are durable and consistent with what the index will claim.
/// A data offset of exactly zero is a known miscount failure class: it
/// is diagnosed loudly (offset, stat size, inode) and then written
/// anyway so the anomaly stays visible in the file. The index stream is
/// flushed before returning. The first failing sub-step wins; nothing
/// is retried.
pub fn put_index<G: VolumeGateway>(
    gateway: &mut G,
    version: ArchiveVersion,
    stamp: Option<Timestamp>,
) -> ArchiveResult<TiRecord> {
    let stamp = stamp.unwrap_or_else(Timestamp::now);

    gateway.flush(StreamKind::Meta)?;
    gateway.flush(StreamKind::Data)?;

    let record = TiRecord {
        stamp,
        volume: gateway.current_volume(),
        meta_offset: gateway.tell(StreamKind::Meta)?,
        data_offset: gateway.tell(StreamKind::Data)?,
    };

    if record.data_offset == 0 {
        match gateway.stat(StreamKind::Data) {
            Some(stat) => tracing::error!(
                volume = record.volume,
                data_offset = record.data_offset,
                stat_size = stat.size,
                inode = stat.inode,
                "temporal index capturing data offset 0; write accounting suspect"
            ),
            None => tracing::error!(
                volume = record.volume,
                data_offset = record.data_offset,
                "temporal index capturing data offset 0; write accounting suspect"
            ),
        }
    }

    let bytes = record.encode(version)?;
    let written = gateway.write(StreamKind::Index, &bytes)?;
    if written != bytes.len() {
        return Err(ArchiveError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!("short index write: {} of {} bytes", written, bytes.len()),
        )));
    }
    gateway.flush(StreamKind::Index)?;
    Ok(record)
}

/// Load the whole temporal index into memory, appending into `out`.
///
/// Seeks past the label header, then reads fixed-size records until the
/// file ends. A partial trailing record means the file was truncated
/// mid-append (a crash); everything read so far is kept in `out` and a
/// corruption error describes the tail. Loads happen once per archive
/// open, so the record-at-a-time reads are not a hot path.
pub fn load_index_into<R: Read + Seek>(
    reader: &mut R,
    version: ArchiveVersion,
    out: &mut Vec<TiRecord>,
) -> ArchiveResult<()> {
    reader.seek(SeekFrom::Start(ArchiveLabel::size(version) as u64))?;
    let size = TiRecord::disk_size(version);
    let mut buf = vec![0u8; size];
    loop {
        let mut filled = 0;
        while filled < size {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::Io(e)),
            }
        }
        if filled == 0 {
            return Ok(()); // clean end of stream
        }
        if filled < size {
            return Err(ArchiveError::Corrupt(format!(
                "index truncated mid-record: {} of {} bytes after {} entries",
                filled,
                size,
                out.len()
            )));
        }
        out.push(TiRecord::decode(&buf, version)?);
    }
}

/// Load the whole temporal index, failing on a damaged tail.
///
/// Callers that want crash tolerance (an archive whose index was
/// truncated still opens, seeking is just less precise) should use
/// [`load_index_into`] and keep the partial array on error; that is
/// what [`crate::archive::reader::ArchiveReader`] does.
pub fn load_index<R: Read + Seek>(
    reader: &mut R,
    version: ArchiveVersion,
) -> ArchiveResult<Vec<TiRecord>> {
    let mut out = Vec::new();
    load_index_into(reader, version, &mut out)?;
    Ok(out)
}
