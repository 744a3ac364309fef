//! Instance-domain metadata records
//!
//! An instance domain is the set of instances (per-CPU, per-disk, ...) a
//! metric reports over, and it changes over time. Each change is logged
//! as one immutable record: either a *full* snapshot listing every live
//! instance, or (extended format only) a *delta* listing just the
//! instances added or removed since the previous record, with removals
//! written as tombstones. The logical domain at a point in time is the
//! fold of the last full record with the deltas after it; that fold is
//! the metadata cache's job, not this codec's.
//!
//! Record layout, big-endian:
//! ```text
//! len:     i32
//! type:    i32   2 = legacy full, 5 = extended full, 6 = extended delta
//! stamp:   8 or 12 bytes by version
//! indom:   u32
//! numinst: i32
//! inst:    [i32; numinst]   instance identifiers
//! stridx:  [i32; numinst]   name offset in the string table, -1 = tombstone
//! names:   packed NUL-terminated strings
//! len:     i32   trailer
//! ```

use crate::archive::error::{ArchiveError, ArchiveResult};
use crate::archive::timestamp::{ArchiveVersion, Timestamp};
use crate::archive::wire::{
    begin_record, finish_record, open_record, try_reserve, TYPE_INDOM, TYPE_INDOM_DELTA,
    TYPE_INDOM_V2,
};
use serde::Serialize;
use std::borrow::Cow;

/// Full snapshot or delta against the previous record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InDomKind {
    Full,
    Delta,
}

/// One instance of a domain
///
/// `name == None` is a tombstone: the instance was removed. Tombstones
/// are only legal in delta records. Decoded names borrow from the record
/// buffer when possible; [`Instance::into_owned`] detaches them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance<'a> {
    pub id: i32,
    pub name: Option<Cow<'a, str>>,
}

impl<'a> Instance<'a> {
    pub fn named(id: i32, name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }

    pub fn tombstone(id: i32) -> Self {
        Self { id, name: None }
    }

    pub fn into_owned(self) -> Instance<'static> {
        Instance {
            id: self.id,
            name: self.name.map(|n| Cow::Owned(n.into_owned())),
        }
    }
}

/// One instance-domain metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InDomRecord<'a> {
    pub stamp: Timestamp,
    /// Instance domain identifier
    pub indom: u32,
    pub kind: InDomKind,
    pub instances: Vec<Instance<'a>>,
}

impl<'a> InDomRecord<'a> {
    pub fn into_owned(self) -> InDomRecord<'static> {
        InDomRecord {
            stamp: self.stamp,
            indom: self.indom,
            kind: self.kind,
            instances: self.instances.into_iter().map(Instance::into_owned).collect(),
        }
    }

    /// Serialize the record for the pinned archive version.
    ///
    /// Delta records are illegal under the legacy format, tombstones are
    /// illegal in full records, and a present name is never empty; all
    /// three are caller bugs, not corruption.
    pub fn encode(&self, version: ArchiveVersion) -> ArchiveResult<Vec<u8>> {
        let rtype = match (version, self.kind) {
            (ArchiveVersion::V2, InDomKind::Full) => TYPE_INDOM_V2,
            (ArchiveVersion::V2, InDomKind::Delta) => {
                return Err(ArchiveError::IllegalRecord(
                    "legacy archives cannot hold delta instance domains".to_string(),
                ))
            }
            (ArchiveVersion::V3, InDomKind::Full) => TYPE_INDOM,
            (ArchiveVersion::V3, InDomKind::Delta) => TYPE_INDOM_DELTA,
        };
        let numinst = i32::try_from(self.instances.len()).map_err(|_| {
            ArchiveError::IllegalRecord(format!(
                "{} instances exceed the record format",
                self.instances.len()
            ))
        })?;
        for inst in &self.instances {
            match &inst.name {
                None if self.kind == InDomKind::Full => {
                    return Err(ArchiveError::IllegalRecord(format!(
                        "tombstone for instance {} in a full record",
                        inst.id
                    )))
                }
                Some(name) if name.is_empty() => {
                    return Err(ArchiveError::IllegalRecord(format!(
                        "empty name for instance {}",
                        inst.id
                    )))
                }
                _ => {}
            }
        }

        let mut buf = begin_record(rtype);
        self.stamp.encode(version, &mut buf)?;
        buf.extend_from_slice(&self.indom.to_be_bytes());
        buf.extend_from_slice(&numinst.to_be_bytes());
        for inst in &self.instances {
            buf.extend_from_slice(&inst.id.to_be_bytes());
        }
        // string-index array: offset of each name within the string
        // table, built in the same pass that sizes the table
        let mut offset = 0i64;
        for inst in &self.instances {
            match &inst.name {
                Some(name) => {
                    let idx = i32::try_from(offset).map_err(|_| {
                        ArchiveError::IllegalRecord(format!(
                            "string table of {} bytes exceeds the record format",
                            offset
                        ))
                    })?;
                    buf.extend_from_slice(&idx.to_be_bytes());
                    offset += name.len() as i64 + 1;
                }
                None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        for inst in &self.instances {
            if let Some(name) = &inst.name {
                buf.extend_from_slice(name.as_bytes());
                buf.push(0);
            }
        }
        finish_record(buf)
    }

    /// Parse a record, borrowing instance names from `buf`. The caller
    /// must keep `buf` alive as long as the borrowed names are used, or
    /// call [`InDomRecord::into_owned`].
    pub fn decode(buf: &'a [u8], version: ArchiveVersion) -> ArchiveResult<InDomRecord<'a>> {
        let (mut scan, rtype) = open_record(buf)?;
        let kind = match (version, rtype) {
            (ArchiveVersion::V2, TYPE_INDOM_V2) => InDomKind::Full,
            (ArchiveVersion::V3, TYPE_INDOM) => InDomKind::Full,
            (ArchiveVersion::V3, TYPE_INDOM_DELTA) => InDomKind::Delta,
            _ => {
                return Err(ArchiveError::Corrupt(format!(
                    "record type {} is not an instance domain under {}",
                    rtype, version
                )))
            }
        };
        let stamp = scan.stamp(version)?;
        let indom = scan.u32()?;
        let numinst = scan.i32()?;
        if numinst < 0 {
            return Err(ArchiveError::Corrupt(format!(
                "negative instance count {}",
                numinst
            )));
        }
        let numinst = numinst as usize;

        // both arrays plus the trailer must fit the declared length
        let arrays = numinst.checked_mul(8).ok_or_else(|| {
            ArchiveError::Corrupt(format!("instance count {} overflows", numinst))
        })?;
        if arrays + 4 > scan.remaining() {
            return Err(ArchiveError::Corrupt(format!(
                "instance count {} does not fit record of {} bytes",
                numinst,
                buf.len()
            )));
        }

        let mut ids = Vec::new();
        try_reserve(&mut ids, numinst)?;
        for _ in 0..numinst {
            ids.push(scan.i32()?);
        }
        let mut stridx = Vec::new();
        try_reserve(&mut stridx, numinst)?;
        for _ in 0..numinst {
            stridx.push(scan.i32()?);
        }
        let table = scan.bytes(scan.remaining() - 4)?;

        let mut instances = Vec::new();
        try_reserve(&mut instances, numinst)?;
        let mut used = 0usize;
        for (id, idx) in ids.into_iter().zip(stridx) {
            if idx == -1 {
                if kind == InDomKind::Full {
                    return Err(ArchiveError::Corrupt(format!(
                        "tombstone for instance {} in a full record",
                        id
                    )));
                }
                instances.push(Instance::tombstone(id));
                continue;
            }
            if idx < 0 || idx as usize >= table.len() {
                return Err(ArchiveError::Corrupt(format!(
                    "string index {} outside table of {} bytes",
                    idx,
                    table.len()
                )));
            }
            let rest = &table[idx as usize..];
            let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
                ArchiveError::Corrupt(format!("unterminated name for instance {}", id))
            })?;
            if end == 0 {
                return Err(ArchiveError::Corrupt(format!(
                    "empty name for instance {}",
                    id
                )));
            }
            let name = std::str::from_utf8(&rest[..end]).map_err(|_| {
                ArchiveError::Corrupt(format!("name for instance {} is not UTF-8", id))
            })?;
            used += end + 1;
            instances.push(Instance {
                id,
                name: Some(Cow::Borrowed(name)),
            });
        }
        if used != table.len() {
            return Err(ArchiveError::Corrupt(format!(
                "string table holds {} bytes but names use {}",
                table.len(),
                used
            )));
        }

        Ok(InDomRecord {
            stamp,
            indom,
            kind,
            instances,
        })
    }
}

/// Outcome of comparing two full snapshots of the same domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InDomDiff<'a> {
    /// Identical; nothing needs logging
    Unchanged,
    /// A full record is required (rename, or delta would not be smaller)
    Full,
    /// A delta record is worthwhile: additions carry names, removals are
    /// tombstones, entries in ascending instance-id order
    Delta(Vec<Instance<'a>>),
}

/// Sort an instance list into ascending identifier order, the order the
/// diff and the decoder's fold logic both assume.
pub fn sort_instances(instances: &mut [Instance<'_>]) {
    instances.sort_by_key(|inst| inst.id);
}

/// Compare two observations of the same domain, both sorted by id, and
/// decide how to log the change. An instance that keeps its id but
/// changes its name forces a full record; a delta at least as large as
/// the new snapshot is not worth writing.
pub fn diff_instances<'a>(
    old: &[Instance<'_>],
    new: &'a [Instance<'a>],
) -> InDomDiff<'a> {
    let mut delta: Vec<Instance<'a>> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        if j == new.len() || (i < old.len() && old[i].id < new[j].id) {
            delta.push(Instance::tombstone(old[i].id));
            i += 1;
        } else if i == old.len() || old[i].id > new[j].id {
            delta.push(Instance {
                id: new[j].id,
                name: new[j].name.clone(),
            });
            j += 1;
        } else {
            if old[i].name != new[j].name {
                return InDomDiff::Full;
            }
            i += 1;
            j += 1;
        }
    }
    if delta.is_empty() {
        InDomDiff::Unchanged
    } else if delta.len() > new.len() {
        InDomDiff::Full
    } else {
        InDomDiff::Delta(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_record() -> InDomRecord<'static> {
        InDomRecord {
            stamp: Timestamp::new(1000, 0),
            indom: 3,
            kind: InDomKind::Full,
            instances: vec![
                Instance::named(0, "cpu0"),
                Instance::named(1, "cpu1"),
                Instance::named(7, "cpu7"),
            ],
        }
    }

    #[test]
    fn test_full_roundtrip_both_versions() {
        for version in [ArchiveVersion::V2, ArchiveVersion::V3] {
            let record = full_record();
            let bytes = record.encode(version).unwrap();
            let decoded = InDomRecord::decode(&bytes, version).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_length_symmetry() {
        let record = full_record();
        let bytes = record.encode(ArchiveVersion::V3).unwrap();
        let leading = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let trailing =
            i32::from_be_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        assert_eq!(leading as usize, bytes.len());
        assert_eq!(leading, trailing);
    }

    #[test]
    fn test_delta_tombstone_roundtrip() {
        // removing instance 7 from domain 3
        let record = InDomRecord {
            stamp: Timestamp::new(2000, 0),
            indom: 3,
            kind: InDomKind::Delta,
            instances: vec![Instance::tombstone(7)],
        };
        let bytes = record.encode(ArchiveVersion::V3).unwrap();
        let decoded = InDomRecord::decode(&bytes, ArchiveVersion::V3).unwrap();
        assert_eq!(decoded.kind, InDomKind::Delta);
        assert_eq!(decoded.instances.len(), 1);
        assert_eq!(decoded.instances[0].id, 7);
        assert_eq!(decoded.instances[0].name, None); // tombstone, never ""

        // a full record that simply omits id 7 is a different statement:
        // it carries no entry for 7 at all
        let full = InDomRecord {
            stamp: Timestamp::new(2000, 0),
            indom: 3,
            kind: InDomKind::Full,
            instances: vec![Instance::named(0, "cpu0")],
        };
        let full_bytes = full.encode(ArchiveVersion::V3).unwrap();
        let full_decoded = InDomRecord::decode(&full_bytes, ArchiveVersion::V3).unwrap();
        assert!(full_decoded.instances.iter().all(|inst| inst.id != 7));
    }

    #[test]
    fn test_delta_mixing_adds_and_tombstones() {
        let record = InDomRecord {
            stamp: Timestamp::new(2000, 500),
            indom: 9,
            kind: InDomKind::Delta,
            instances: vec![
                Instance::tombstone(2),
                Instance::named(5, "dm-5"),
                Instance::tombstone(6),
            ],
        };
        let bytes = record.encode(ArchiveVersion::V3).unwrap();
        assert_eq!(InDomRecord::decode(&bytes, ArchiveVersion::V3).unwrap(), record);
    }

    #[test]
    fn test_empty_domain_roundtrip() {
        let record = InDomRecord {
            stamp: Timestamp::new(1000, 0),
            indom: 42,
            kind: InDomKind::Full,
            instances: Vec::new(),
        };
        let bytes = record.encode(ArchiveVersion::V3).unwrap();
        assert_eq!(InDomRecord::decode(&bytes, ArchiveVersion::V3).unwrap(), record);
    }

    #[test]
    fn test_delta_illegal_under_legacy() {
        let record = InDomRecord {
            stamp: Timestamp::new(1000, 0),
            indom: 3,
            kind: InDomKind::Delta,
            instances: vec![Instance::tombstone(1)],
        };
        assert!(matches!(
            record.encode(ArchiveVersion::V2),
            Err(ArchiveError::IllegalRecord(_))
        ));
    }

    #[test]
    fn test_tombstone_illegal_in_full() {
        let record = InDomRecord {
            stamp: Timestamp::new(1000, 0),
            indom: 3,
            kind: InDomKind::Full,
            instances: vec![Instance::tombstone(1)],
        };
        assert!(record.encode(ArchiveVersion::V3).is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let record = InDomRecord {
            stamp: Timestamp::new(1000, 0),
            indom: 3,
            kind: InDomKind::Full,
            instances: vec![Instance::named(1, "")],
        };
        assert!(record.encode(ArchiveVersion::V3).is_err());
    }

    #[test]
    fn test_version_isolation() {
        let record = full_record();
        let v2 = record.encode(ArchiveVersion::V2).unwrap();
        let v3 = record.encode(ArchiveVersion::V3).unwrap();

        let v2_tag = i32::from_be_bytes(v2[4..8].try_into().unwrap());
        let v3_tag = i32::from_be_bytes(v3[4..8].try_into().unwrap());
        assert_ne!(v2_tag, v3_tag);

        // decoding under the wrong version is rejected, not misread
        assert!(InDomRecord::decode(&v2, ArchiveVersion::V3).is_err());
        assert!(InDomRecord::decode(&v3, ArchiveVersion::V2).is_err());
    }

    #[test]
    fn test_corrupt_trailer_rejected() {
        let record = full_record();
        let mut bytes = record.encode(ArchiveVersion::V3).unwrap();
        let end = bytes.len();
        bytes[end - 1] ^= 0xff;
        assert!(matches!(
            InDomRecord::decode(&bytes, ArchiveVersion::V3),
            Err(ArchiveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_oversized_count_rejected_before_allocation() {
        let record = full_record();
        let mut bytes = record.encode(ArchiveVersion::V3).unwrap();
        // numinst lives right after len/type/stamp/indom
        let pos = 8 + ArchiveVersion::V3.timestamp_size() + 4;
        bytes[pos..pos + 4].copy_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            InDomRecord::decode(&bytes, ArchiveVersion::V3),
            Err(ArchiveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_string_index_out_of_range_rejected() {
        let record = full_record();
        let mut bytes = record.encode(ArchiveVersion::V3).unwrap();
        // first stridx entry sits after the 3-entry id array
        let pos = 8 + ArchiveVersion::V3.timestamp_size() + 8 + 3 * 4;
        bytes[pos..pos + 4].copy_from_slice(&10_000i32.to_be_bytes());
        assert!(InDomRecord::decode(&bytes, ArchiveVersion::V3).is_err());
    }

    #[test]
    fn test_decode_borrows_then_detaches() {
        let record = full_record();
        let bytes = record.encode(ArchiveVersion::V3).unwrap();
        let decoded = InDomRecord::decode(&bytes, ArchiveVersion::V3).unwrap();
        assert!(decoded
            .instances
            .iter()
            .all(|inst| matches!(inst.name, Some(Cow::Borrowed(_)))));

        let owned = decoded.into_owned();
        drop(bytes);
        assert_eq!(owned.instances[2].name.as_deref(), Some("cpu7"));
    }

    #[test]
    fn test_diff_unchanged() {
        let a = vec![Instance::named(0, "cpu0"), Instance::named(1, "cpu1")];
        assert_eq!(diff_instances(&a, &a), InDomDiff::Unchanged);
    }

    #[test]
    fn test_diff_rename_forces_full() {
        let old = vec![Instance::named(0, "sda")];
        let new = vec![Instance::named(0, "sdb")];
        assert_eq!(diff_instances(&old, &new), InDomDiff::Full);
    }

    #[test]
    fn test_diff_small_change_yields_sorted_delta() {
        let old = vec![
            Instance::named(0, "cpu0"),
            Instance::named(1, "cpu1"),
            Instance::named(2, "cpu2"),
            Instance::named(3, "cpu3"),
        ];
        let new = vec![
            Instance::named(0, "cpu0"),
            Instance::named(2, "cpu2"),
            Instance::named(3, "cpu3"),
            Instance::named(5, "cpu5"),
        ];
        match diff_instances(&old, &new) {
            InDomDiff::Delta(delta) => {
                assert_eq!(
                    delta,
                    vec![Instance::tombstone(1), Instance::named(5, "cpu5")]
                );
                assert!(delta.windows(2).all(|w| w[0].id < w[1].id));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_diff_large_change_falls_back_to_full() {
        let old = vec![Instance::named(0, "a"), Instance::named(1, "b")];
        let new = vec![Instance::named(10, "x")];
        // one add plus two removals outweigh a one-entry full record
        assert_eq!(diff_instances(&old, &new), InDomDiff::Full);
    }

    #[test]
    fn test_diff_growth_from_empty() {
        let new = vec![Instance::named(0, "cpu0")];
        match diff_instances(&[], &new) {
            InDomDiff::Delta(delta) => assert_eq!(delta, new),
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[test]
    fn test_sort_instances() {
        let mut list = vec![
            Instance::named(5, "e"),
            Instance::named(1, "b"),
            Instance::named(3, "d"),
        ];
        sort_instances(&mut list);
        let ids: Vec<i32> = list.iter().map(|inst| inst.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }
}
