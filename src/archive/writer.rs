//! Write-side orchestration of an archive
//!
//! The writer owns the archive control object and serializes metadata
//! records into the metadata log. There is exactly one writer per
//! archive and its methods take `&mut self`; nothing here locks.
//!
//! After a successful *full* instance-domain or label append the writer
//! pushes the new state into the metadata cache so in-process readers
//! see what the log now says. Delta records are the exception: this
//! layer cannot fold a delta into prior state, so cache maintenance for
//! deltas stays with the caller.

use crate::archive::control::{ArchiveControl, StreamKind, VolumeGateway};
use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::indom::{InDomKind, InDomRecord, Instance};
use crate::archive::labels::{LabelRecord, LabelScope, LabelSet};
use crate::archive::timestamp::Timestamp;
use crate::archive::tindex::{put_index, TiRecord};

/// The two callbacks of the in-memory metadata cache
///
/// Called by the writer after a successful full-record append. Folding
/// delta records into cached state is the caller's responsibility.
pub trait MetaCache {
    fn update_indom(&mut self, indom: u32, stamp: Timestamp, instances: &[Instance<'_>]);

    fn update_labels(
        &mut self,
        scope: LabelScope,
        ident: u32,
        stamp: Timestamp,
        sets: &[LabelSet],
    );
}

/// Cache for writers that keep metadata state elsewhere
pub struct NoCache;

impl MetaCache for NoCache {
    fn update_indom(&mut self, _: u32, _: Timestamp, _: &[Instance<'_>]) {}

    fn update_labels(&mut self, _: LabelScope, _: u32, _: Timestamp, _: &[LabelSet]) {}
}

/// Single writer of one archive
pub struct ArchiveWriter<C: MetaCache> {
    control: ArchiveControl,
    cache: C,
}

impl<C: MetaCache> ArchiveWriter<C> {
    pub fn new(control: ArchiveControl, cache: C) -> Self {
        Self { control, cache }
    }

    /// Append an instance-domain record to the metadata log. Full
    /// records update the cache; delta records do not (see [`MetaCache`]).
    pub fn put_indom(
        &mut self,
        stamp: Timestamp,
        indom: u32,
        kind: InDomKind,
        instances: &[Instance<'_>],
    ) -> ArchiveResult<()> {
        let record = InDomRecord {
            stamp,
            indom,
            kind,
            instances: instances.to_vec(),
        };
        let bytes = record.encode(self.control.version())?;
        self.append_meta(&bytes)?;
        tracing::debug!(
            indom,
            instances = instances.len(),
            delta = (kind == InDomKind::Delta),
            "logged instance domain"
        );
        if kind == InDomKind::Full {
            self.cache.update_indom(indom, stamp, instances);
        }
        Ok(())
    }

    /// Append a label record to the metadata log and update the cache
    pub fn put_labels(
        &mut self,
        stamp: Timestamp,
        scope: LabelScope,
        ident: u32,
        sets: Vec<LabelSet>,
    ) -> ArchiveResult<()> {
        let record = LabelRecord {
            stamp,
            scope,
            ident,
            sets,
        };
        let bytes = record.encode(self.control.version())?;
        self.append_meta(&bytes)?;
        tracing::debug!(%scope, ident, sets = record.sets.len(), "logged label sets");
        self.cache
            .update_labels(scope, ident, stamp, &record.sets);
        Ok(())
    }

    /// Append one temporal-index entry summarizing the current write
    /// positions. `None` stamps the entry with the current time.
    pub fn put_index(&mut self, stamp: Option<Timestamp>) -> ArchiveResult<TiRecord> {
        let version = self.control.version();
        put_index(&mut self.control, version, stamp)
    }

    /// Roll over to the next data volume and index the switch point so
    /// readers can find the new volume
    pub fn new_volume(&mut self, stamp: Timestamp) -> ArchiveResult<i32> {
        let volume = self.control.new_volume(stamp)?;
        self.put_index(Some(stamp))?;
        Ok(volume)
    }

    fn append_meta(&mut self, bytes: &[u8]) -> ArchiveResult<()> {
        let written = self.control.write(StreamKind::Meta, bytes)?;
        if written != bytes.len() {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short metadata write: {} of {} bytes", written, bytes.len()),
            )));
        }
        Ok(())
    }

    pub fn control(&self) -> &ArchiveControl {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ArchiveControl {
        &mut self.control
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Flush every stream and close the archive
    pub fn close(self) -> ArchiveResult<()> {
        self.control.close()
    }
}
