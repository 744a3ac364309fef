//! # Annal
//!
//! Metadata/log storage engine for performance-metrics archives: a
//! logger process appends time-stamped instance-domain snapshots and
//! label metadata to an append-only binary log, and independent reader
//! processes later seek through that metadata in either direction
//! without scanning the whole file.
//!
//! ## Features
//!
//! - **Temporal index**: a compact fixed-size side-file mapping
//!   timestamps to byte offsets, written incrementally and loaded
//!   wholesale at open time
//! - **Instance-domain records**: full snapshots plus space-saving
//!   deltas that record only additions and tombstoned removals
//! - **Label records**: JSON annotations with typed label arrays,
//!   decoded under strict corruption checks
//! - **Two wire formats**: the legacy 32-bit layout and the extended
//!   64-bit layout, selected per archive and pinned at open
//!
//! ## Modules
//!
//! - [`archive`]: the whole storage engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use annal::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let control = ArchiveControl::create(
//!         "./data/today",
//!         ArchiveVersion::V3,
//!         Timestamp::now(),
//!         "host.example.com",
//!         "UTC",
//!     )?;
//!     let mut writer = ArchiveWriter::new(control, NoCache);
//!     writer.put_indom(
//!         Timestamp::now(),
//!         3,
//!         InDomKind::Full,
//!         &[Instance::named(0, "cpu0")],
//!     )?;
//!     writer.put_index(None)?;
//!     writer.close()?;
//!     Ok(())
//! }
//! ```

pub mod archive;

// Re-export top-level types for convenience
pub use archive::{
    archive_path, diff_instances, load_index, load_index_into, put_index, sort_instances,
    ArchiveControl, ArchiveError, ArchiveLabel, ArchiveReader, ArchiveResult, ArchiveVersion,
    ArchiveWriter, InDomDiff, InDomKind, InDomRecord, Instance, Label, LabelRecord, LabelScope,
    LabelSet, MetaCache, MetaReader, MetaRecord, NoCache, StreamKind, StreamStat, TiRecord,
    Timestamp, VolumeGateway, MAX_LABELS, MAX_LABEL_JSON_LEN, NO_INSTANCE, NSEC_PER_SEC,
    VOL_INDEX, VOL_META,
};
