//! Read-side access to an archive
//!
//! Opening an archive pins the version from the metadata log's label
//! header, then loads the whole temporal index into memory. A damaged
//! or truncated index is not fatal: whatever prefix loaded cleanly is
//! kept and seeking is simply less precise. The metadata log itself is
//! read record-by-record through [`MetaReader`]; decode errors there
//! are fatal to that single record fetch, nothing else.

use crate::archive::control::archive_path;
use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::header::{ArchiveLabel, VOL_INDEX, VOL_META};
use crate::archive::indom::InDomRecord;
use crate::archive::labels::LabelRecord;
use crate::archive::timestamp::ArchiveVersion;
use crate::archive::tindex::{load_index_into, TiRecord};
use crate::archive::wire::{ENVELOPE_SIZE, TYPE_INDOM, TYPE_INDOM_DELTA, TYPE_INDOM_V2, TYPE_LABEL, TYPE_LABEL_V2};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Upper bound on one metadata record; larger lengths are treated as
/// corruption rather than allocated
const MAX_META_RECORD: usize = 1 << 28;

/// One decoded record from the metadata log
#[derive(Debug, Clone, PartialEq)]
pub enum MetaRecord {
    InDom(InDomRecord<'static>),
    Labels(LabelRecord),
    /// A record type this layer does not interpret, skipped by length
    Skipped { rtype: i32, len: usize },
}

/// A reader's view of one archive
pub struct ArchiveReader {
    base: PathBuf,
    version: ArchiveVersion,
    label: ArchiveLabel,
    index: Vec<TiRecord>,
}

impl ArchiveReader {
    /// Open an archive for reading: pin the version, verify labels,
    /// load the temporal index
    pub fn open(base: impl AsRef<Path>) -> ArchiveResult<Self> {
        let base = base.as_ref().to_path_buf();

        let meta_path = archive_path(&base, VOL_META);
        let mut meta = BufReader::new(File::open(&meta_path)?);
        let label = ArchiveLabel::read_from(&mut meta)?;
        if label.volume != VOL_META {
            return Err(ArchiveError::BadLabel(format!(
                "metadata log labelled as volume {}",
                label.volume
            )));
        }
        let version = label.version;

        // the index side-file is optional and may be damaged; both cases
        // leave the archive usable with reduced seek precision
        let mut index = Vec::new();
        let index_path = archive_path(&base, VOL_INDEX);
        match File::open(&index_path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                match ArchiveLabel::read_from(&mut reader) {
                    Ok(ti_label) if ti_label.version == version => {
                        if let Err(e) = load_index_into(&mut reader, version, &mut index) {
                            tracing::warn!(
                                entries = index.len(),
                                error = %e,
                                "temporal index damaged; keeping loaded prefix"
                            );
                        }
                    }
                    Ok(ti_label) => tracing::warn!(
                        index_version = %ti_label.version,
                        archive_version = %version,
                        "temporal index version mismatch; ignoring index"
                    ),
                    Err(e) => tracing::warn!(
                        error = %e,
                        "temporal index label unreadable; ignoring index"
                    ),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("archive has no temporal index; seeks fall back to scans");
            }
            Err(e) => return Err(ArchiveError::Io(e)),
        }

        Ok(Self {
            base,
            version,
            label,
            index,
        })
    }

    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    pub fn label(&self) -> &ArchiveLabel {
        &self.label
    }

    /// The loaded temporal index, in file order. Binary search over it
    /// belongs to the caller.
    pub fn index(&self) -> &[TiRecord] {
        &self.index
    }

    /// Start walking the metadata log from its first record
    pub fn meta_records(&self) -> ArchiveResult<MetaReader> {
        let path = archive_path(&self.base, VOL_META);
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(ArchiveLabel::size(self.version) as u64))?;
        Ok(MetaReader {
            reader,
            version: self.version,
        })
    }
}

/// Record-by-record walk of the metadata log
///
/// Stops cleanly at end of file; a record cut off mid-way, or one that
/// fails its codec's checks, surfaces as a corruption error for that
/// record.
pub struct MetaReader {
    reader: BufReader<File>,
    version: ArchiveVersion,
}

impl MetaReader {
    /// Read and decode the next record, `None` at end of log
    pub fn next_record(&mut self) -> ArchiveResult<Option<MetaRecord>> {
        let mut envelope = [0u8; 8];
        match self.reader.read_exact(&mut envelope) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ArchiveError::Io(e)),
        }
        let len = i32::from_be_bytes(envelope[0..4].try_into().unwrap());
        let rtype = i32::from_be_bytes(envelope[4..8].try_into().unwrap());
        if (len as usize) < ENVELOPE_SIZE || len as usize > MAX_META_RECORD {
            return Err(ArchiveError::Corrupt(format!(
                "metadata record length {} out of range",
                len
            )));
        }

        let mut buf = vec![0u8; len as usize];
        buf[..8].copy_from_slice(&envelope);
        self.reader.read_exact(&mut buf[8..]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ArchiveError::Corrupt(format!(
                    "metadata record of {} bytes cut short",
                    len
                ))
            } else {
                ArchiveError::Io(e)
            }
        })?;

        let record = match rtype {
            TYPE_INDOM | TYPE_INDOM_DELTA | TYPE_INDOM_V2 => {
                MetaRecord::InDom(InDomRecord::decode(&buf, self.version)?.into_owned())
            }
            TYPE_LABEL | TYPE_LABEL_V2 => {
                MetaRecord::Labels(LabelRecord::decode(&buf, self.version)?)
            }
            _ => {
                tracing::debug!(rtype, len, "skipping uninterpreted metadata record");
                MetaRecord::Skipped {
                    rtype,
                    len: len as usize,
                }
            }
        };
        Ok(Some(record))
    }
}

impl Iterator for MetaReader {
    type Item = ArchiveResult<MetaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
