//! Archive timestamps and their two on-disk encodings
//!
//! A timestamp is seconds plus sub-second units. The legacy (V2) on-disk
//! form is 8 bytes: seconds and microseconds, both `i32`. The extended
//! (V3) form is 12 bytes: 64-bit seconds and `i32` nanoseconds. Both are
//! big-endian. Conversions between forms truncate or scale, never wrap:
//! encoding a timestamp whose seconds do not fit the legacy field is an
//! error the caller must handle.

use crate::archive::error::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Nanoseconds per second; sub-second values are always below this
pub const NSEC_PER_SEC: u32 = 1_000_000_000;

/// Archive format version, pinned when an archive is opened and passed
/// explicitly to every codec call. There is no upgrade in place; a
/// version change means a new archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArchiveVersion {
    /// Legacy format: 32-bit seconds, microsecond resolution
    V2,
    /// Extended format: 64-bit seconds, nanosecond resolution
    V3,
}

impl ArchiveVersion {
    /// On-disk size of one timestamp in this version
    pub fn timestamp_size(self) -> usize {
        match self {
            ArchiveVersion::V2 => 8,
            ArchiveVersion::V3 => 12,
        }
    }

    /// Version byte as stored in the archive label magic
    pub fn code(self) -> u8 {
        match self {
            ArchiveVersion::V2 => 2,
            ArchiveVersion::V3 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(ArchiveVersion::V2),
            3 => Some(ArchiveVersion::V3),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchiveVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}", self.code())
    }
}

/// A point in time as recorded in an archive
///
/// Invariant: `nsec < NSEC_PER_SEC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp {
    /// Seconds since the Unix epoch (signed)
    pub sec: i64,
    /// Nanoseconds within the second
    pub nsec: u32,
}

impl Timestamp {
    /// Create a timestamp
    ///
    /// # Panics
    /// Panics if `nsec >= NSEC_PER_SEC`.
    pub fn new(sec: i64, nsec: u32) -> Self {
        assert!(nsec < NSEC_PER_SEC, "Timestamp: nsec out of range");
        Self { sec, nsec }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos() % NSEC_PER_SEC,
        }
    }

    /// Seconds and microseconds as stored by the legacy format.
    /// Nanoseconds truncate to microseconds; seconds outside the 32-bit
    /// range are rejected rather than wrapped.
    pub fn to_legacy(&self) -> ArchiveResult<(i32, i32)> {
        let sec = i32::try_from(self.sec).map_err(|_| {
            ArchiveError::IllegalRecord(format!(
                "timestamp {}s outside legacy 32-bit range",
                self.sec
            ))
        })?;
        Ok((sec, (self.nsec / 1_000) as i32))
    }

    /// Append the on-disk form for `version` to `out`
    pub fn encode(&self, version: ArchiveVersion, out: &mut Vec<u8>) -> ArchiveResult<()> {
        match version {
            ArchiveVersion::V2 => {
                let (sec, usec) = self.to_legacy()?;
                out.extend_from_slice(&sec.to_be_bytes());
                out.extend_from_slice(&usec.to_be_bytes());
            }
            ArchiveVersion::V3 => {
                out.extend_from_slice(&self.sec.to_be_bytes());
                out.extend_from_slice(&(self.nsec as i32).to_be_bytes());
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match DateTime::<Utc>::from_timestamp(self.sec, self.nsec) {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.9f")),
            None => write!(f, "{}.{:09}", self.sec, self.nsec),
        }
    }
}
