//! Annal Archive Engine
//!
//! Append-only storage for performance-metrics metadata:
//!
//! - **timestamp**: archive timestamps and their two on-disk encodings
//! - **header**: the label header fronting every archive file
//! - **tindex**: the temporal index side-file (codec + loader)
//! - **indom**: instance-domain records, full and delta
//! - **labels**: label-set records
//! - **control**: stream gateway and the file-backed control object
//! - **writer**: single-writer append orchestration
//! - **reader**: archive open, index load, metadata log walk
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   metadata change → InDom/Label codec → meta log
//!   periodically    → flush meta+data → TiRecord → index file (flushed)
//!
//! Read Path:
//!   open → pin version from label → load index wholesale
//!   seek → binary search index (caller) → walk meta log → decode
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use annal::archive::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let control = ArchiveControl::create(
//!         "./data/20260806",
//!         ArchiveVersion::V3,
//!         Timestamp::now(),
//!         "host.example.com",
//!         "UTC",
//!     )?;
//!     let mut writer = ArchiveWriter::new(control, NoCache);
//!
//!     // log an instance-domain change, then index the position
//!     writer.put_indom(
//!         Timestamp::now(),
//!         3,
//!         InDomKind::Full,
//!         &[Instance::named(0, "cpu0"), Instance::named(1, "cpu1")],
//!     )?;
//!     writer.put_index(None)?;
//!     writer.close()?;
//!
//!     // read it back
//!     let reader = ArchiveReader::open("./data/20260806")?;
//!     for record in reader.meta_records()? {
//!         println!("{:?}", record?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod control;
pub mod error;
pub mod header;
pub mod indom;
pub mod labels;
pub mod reader;
pub mod timestamp;
pub mod tindex;
pub mod writer;

mod wire;

// Re-export commonly used types
pub use control::{archive_path, ArchiveControl, StreamKind, StreamStat, VolumeGateway};
pub use error::{ArchiveError, ArchiveResult};
pub use header::{ArchiveLabel, VOL_INDEX, VOL_META};
pub use indom::{diff_instances, sort_instances, InDomDiff, InDomKind, InDomRecord, Instance};
pub use labels::{
    Label, LabelRecord, LabelScope, LabelSet, LABEL_COMPOUND, LABEL_OPTIONAL,
    MAX_LABELS, MAX_LABEL_JSON_LEN, NO_INSTANCE,
};
pub use reader::{ArchiveReader, MetaReader, MetaRecord};
pub use timestamp::{ArchiveVersion, Timestamp, NSEC_PER_SEC};
pub use tindex::{load_index, load_index_into, put_index, TiRecord};
pub use writer::{ArchiveWriter, MetaCache, NoCache};
