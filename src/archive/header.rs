//! Archive label header
//!
//! Every file of an archive (temporal index, metadata log, and each data
//! volume) starts with one fixed-size label record identifying the
//! archive. Readers pin the archive version from it; the temporal index
//! loader and metadata reader seek past it.
//!
//! Layout (all fields big-endian):
//! ```text
//! len:      i32   whole label including both length words
//! magic:    u32   0x414e4c00 | version code in the low byte
//! pid:      i32   process id of the writer
//! start:    timestamp in the version's layout (8 or 12 bytes)
//! volume:   i32   VOL_INDEX, VOL_META, or data volume number >= 0
//! hostname: [u8; 64]  NUL-padded
//! timezone: [u8; 40]  NUL-padded
//! len:      i32   trailer, equal to the leading len
//! ```

use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::timestamp::{ArchiveVersion, Timestamp};
use crate::archive::wire::Scan;
use std::io::Read;

/// Magic base; the low byte carries the version code
const LABEL_MAGIC_BASE: u32 = 0x414e_4c00;

/// Volume number of the temporal index file
pub const VOL_INDEX: i32 = -2;
/// Volume number of the metadata log file
pub const VOL_META: i32 = -1;

const HOSTNAME_SIZE: usize = 64;
const TIMEZONE_SIZE: usize = 40;

/// The label record at the front of every archive file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLabel {
    pub version: ArchiveVersion,
    /// Process id of the writing logger
    pub pid: i32,
    /// Time the archive (or volume) was created
    pub start: Timestamp,
    /// Which file this label fronts (VOL_INDEX, VOL_META, or a data
    /// volume number)
    pub volume: i32,
    pub hostname: String,
    pub timezone: String,
}

impl ArchiveLabel {
    /// On-disk size of the label for a given version
    pub fn size(version: ArchiveVersion) -> usize {
        // len + magic + pid + stamp + volume + hostname + timezone + len
        4 + 4 + 4 + version.timestamp_size() + 4 + HOSTNAME_SIZE + TIMEZONE_SIZE + 4
    }

    /// Serialize the label. Hostname and timezone are truncated to their
    /// fixed fields if overlong.
    pub fn encode(&self) -> ArchiveResult<Vec<u8>> {
        let len = Self::size(self.version) as i32;
        let mut buf = Vec::with_capacity(len as usize);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&(LABEL_MAGIC_BASE | self.version.code() as u32).to_be_bytes());
        buf.extend_from_slice(&self.pid.to_be_bytes());
        self.start.encode(self.version, &mut buf)?;
        buf.extend_from_slice(&self.volume.to_be_bytes());
        push_padded(&mut buf, &self.hostname, HOSTNAME_SIZE);
        push_padded(&mut buf, &self.timezone, TIMEZONE_SIZE);
        buf.extend_from_slice(&len.to_be_bytes());
        Ok(buf)
    }

    /// Parse a label from an exactly-sized buffer
    pub fn decode(buf: &[u8]) -> ArchiveResult<Self> {
        if buf.len() < 8 {
            return Err(ArchiveError::BadLabel(format!(
                "label of {} bytes too short",
                buf.len()
            )));
        }
        let mut scan = Scan::new(buf);
        let len = scan.i32()?;
        let magic = scan.u32()?;
        if magic & 0xffff_ff00 != LABEL_MAGIC_BASE {
            return Err(ArchiveError::BadLabel(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let version = ArchiveVersion::from_code((magic & 0xff) as u8).ok_or_else(|| {
            ArchiveError::BadLabel(format!("unsupported version {}", magic & 0xff))
        })?;
        if len as usize != Self::size(version) || buf.len() != Self::size(version) {
            return Err(ArchiveError::BadLabel(format!(
                "label length {} != expected {} for {}",
                len,
                Self::size(version),
                version
            )));
        }
        let pid = scan.i32()?;
        let start = scan.stamp(version)?;
        let volume = scan.i32()?;
        let hostname = take_padded(&mut scan, HOSTNAME_SIZE)?;
        let timezone = take_padded(&mut scan, TIMEZONE_SIZE)?;
        let trailer = scan.i32()?;
        if trailer != len {
            return Err(ArchiveError::BadLabel(format!(
                "trailer length {} != header length {}",
                trailer, len
            )));
        }
        Ok(Self {
            version,
            pid,
            start,
            volume,
            hostname,
            timezone,
        })
    }

    /// Read one label from the front of an archive file. Determines the
    /// version from the magic word before reading the remainder.
    pub fn read_from<R: Read>(r: &mut R) -> ArchiveResult<Self> {
        let mut head = [0u8; 8];
        r.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ArchiveError::BadLabel("file too short for archive label".to_string())
            } else {
                ArchiveError::Io(e)
            }
        })?;
        let magic = u32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        if magic & 0xffff_ff00 != LABEL_MAGIC_BASE {
            return Err(ArchiveError::BadLabel(format!(
                "bad magic {:#010x}",
                magic
            )));
        }
        let version = ArchiveVersion::from_code((magic & 0xff) as u8).ok_or_else(|| {
            ArchiveError::BadLabel(format!("unsupported version {}", magic & 0xff))
        })?;
        let size = Self::size(version);
        let mut buf = vec![0u8; size];
        buf[..8].copy_from_slice(&head);
        r.read_exact(&mut buf[8..]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ArchiveError::BadLabel("file too short for archive label".to_string())
            } else {
                ArchiveError::Io(e)
            }
        })?;
        Self::decode(&buf)
    }
}

fn push_padded(buf: &mut Vec<u8>, s: &str, size: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(size);
    buf.extend_from_slice(&bytes[..n]);
    buf.resize(buf.len() + size - n, 0);
}

fn take_padded(scan: &mut Scan<'_>, size: usize) -> ArchiveResult<String> {
    let raw = scan.bytes(size)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(size);
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| ArchiveError::BadLabel("label string is not UTF-8".to_string()))
}
