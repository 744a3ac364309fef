//! Stream gateway and the file-backed archive control object
//!
//! An archive on disk is three kinds of file sharing a base path:
//!
//! - `<base>.index` — the temporal index side-file
//! - `<base>.meta`  — the metadata log
//! - `<base>.N`     — data volumes, N = 0, 1, 2, ...
//!
//! The codecs never touch files directly; they go through the
//! [`VolumeGateway`] trait (current volume, tell, write, flush), so the
//! archive-control object stays the single owner of file handles, the
//! current volume, and the pinned version. [`ArchiveControl`] is the
//! file-backed implementation used by the writer.

use crate::archive::error::ArchiveResult;
use crate::archive::header::{ArchiveLabel, VOL_INDEX, VOL_META};
use crate::archive::timestamp::{ArchiveVersion, Timestamp};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

/// The three streams an archive writer appends to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Metadata log
    Meta,
    /// Current data volume
    Data,
    /// Temporal index
    Index,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Meta => "meta",
            StreamKind::Data => "data",
            StreamKind::Index => "index",
        }
    }
}

/// Filesystem identity of a stream, for diagnostics only
#[derive(Debug, Clone, Copy)]
pub struct StreamStat {
    pub size: u64,
    pub inode: Option<u64>,
}

/// Write-side primitives the codecs call into
///
/// Implemented by [`ArchiveControl`] over real files; tests substitute
/// in-memory implementations. All appends for one archive must come from
/// a single writer; implementations perform no internal locking.
pub trait VolumeGateway {
    /// Number of the data volume currently being written
    fn current_volume(&self) -> i32;

    /// Current write offset of a stream
    fn tell(&mut self, stream: StreamKind) -> ArchiveResult<u64>;

    /// Append bytes to a stream, returning how many were accepted
    fn write(&mut self, stream: StreamKind, buf: &[u8]) -> ArchiveResult<usize>;

    /// Push buffered bytes of a stream down to the operating system
    fn flush(&mut self, stream: StreamKind) -> ArchiveResult<()>;

    /// Filesystem identity of a stream, when known. Only used to enrich
    /// diagnostics; the default knows nothing.
    fn stat(&self, stream: StreamKind) -> Option<StreamStat> {
        let _ = stream;
        None
    }
}

/// Path of one archive file: `<base>.index`, `<base>.meta`, `<base>.N`
pub fn archive_path(base: &Path, volume: i32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    match volume {
        VOL_INDEX => name.push(".index"),
        VOL_META => name.push(".meta"),
        vol => name.push(format!(".{}", vol)),
    }
    PathBuf::from(name)
}

/// Owner of an archive's file handles on the write side
///
/// Created once per archive; the version is pinned at creation and
/// stamped into every file's label header. Dropping the control flushes
/// and closes the files.
pub struct ArchiveControl {
    base: PathBuf,
    version: ArchiveVersion,
    hostname: String,
    timezone: String,
    pid: i32,
    meta: BufWriter<File>,
    data: BufWriter<File>,
    index: BufWriter<File>,
    volume: i32,
}

impl ArchiveControl {
    /// Create a new archive at `base`, writing volume 0 and the label
    /// headers of all three files
    pub fn create(
        base: impl AsRef<Path>,
        version: ArchiveVersion,
        start: Timestamp,
        hostname: &str,
        timezone: &str,
    ) -> ArchiveResult<Self> {
        let base = base.as_ref().to_path_buf();
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let pid = std::process::id() as i32;

        let label = |volume: i32| ArchiveLabel {
            version,
            pid,
            start,
            volume,
            hostname: hostname.to_string(),
            timezone: timezone.to_string(),
        };

        let index = Self::create_stream(&base, VOL_INDEX, &label(VOL_INDEX))?;
        let meta = Self::create_stream(&base, VOL_META, &label(VOL_META))?;
        let data = Self::create_stream(&base, 0, &label(0))?;

        Ok(Self {
            base,
            version,
            hostname: hostname.to_string(),
            timezone: timezone.to_string(),
            pid,
            meta,
            data,
            index,
            volume: 0,
        })
    }

    fn create_stream(
        base: &Path,
        volume: i32,
        label: &ArchiveLabel,
    ) -> ArchiveResult<BufWriter<File>> {
        let path = archive_path(base, volume);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&label.encode()?)?;
        writer.flush()?;
        Ok(writer)
    }

    /// Close the current data volume and start writing `volume + 1`.
    /// The caller is expected to follow up with a temporal-index append
    /// so readers can find the new volume.
    pub fn new_volume(&mut self, start: Timestamp) -> ArchiveResult<i32> {
        self.data.flush()?;
        let next = self.volume + 1;
        let label = ArchiveLabel {
            version: self.version,
            pid: self.pid,
            start,
            volume: next,
            hostname: self.hostname.clone(),
            timezone: self.timezone.clone(),
        };
        self.data = Self::create_stream(&self.base, next, &label)?;
        self.volume = next;
        tracing::info!(volume = next, "started new data volume");
        Ok(next)
    }

    pub fn version(&self) -> ArchiveVersion {
        self.version
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Flush all three streams and close the archive
    pub fn close(mut self) -> ArchiveResult<()> {
        self.meta.flush()?;
        self.data.flush()?;
        self.index.flush()?;
        Ok(())
    }

    fn stream_mut(&mut self, stream: StreamKind) -> &mut BufWriter<File> {
        match stream {
            StreamKind::Meta => &mut self.meta,
            StreamKind::Data => &mut self.data,
            StreamKind::Index => &mut self.index,
        }
    }

    fn stream_volume(&self, stream: StreamKind) -> i32 {
        match stream {
            StreamKind::Meta => VOL_META,
            StreamKind::Data => self.volume,
            StreamKind::Index => VOL_INDEX,
        }
    }
}

impl VolumeGateway for ArchiveControl {
    fn current_volume(&self) -> i32 {
        self.volume
    }

    fn tell(&mut self, stream: StreamKind) -> ArchiveResult<u64> {
        Ok(self.stream_mut(stream).stream_position()?)
    }

    fn write(&mut self, stream: StreamKind, buf: &[u8]) -> ArchiveResult<usize> {
        Ok(self.stream_mut(stream).write(buf)?)
    }

    fn flush(&mut self, stream: StreamKind) -> ArchiveResult<()> {
        Ok(self.stream_mut(stream).flush()?)
    }

    fn stat(&self, stream: StreamKind) -> Option<StreamStat> {
        let path = archive_path(&self.base, self.stream_volume(stream));
        let meta = std::fs::metadata(path).ok()?;
        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            Some(meta.ino())
        };
        #[cfg(not(unix))]
        let inode = None;
        Some(StreamStat {
            size: meta.len(),
            inode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_archive_path_naming() {
        let base = Path::new("/tmp/archives/20260806");
        assert_eq!(
            archive_path(base, VOL_INDEX),
            PathBuf::from("/tmp/archives/20260806.index")
        );
        assert_eq!(
            archive_path(base, VOL_META),
            PathBuf::from("/tmp/archives/20260806.meta")
        );
        assert_eq!(
            archive_path(base, 3),
            PathBuf::from("/tmp/archives/20260806.3")
        );
    }

    #[test]
    fn test_create_writes_labels() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let start = Timestamp::new(1000, 0);

        let control =
            ArchiveControl::create(&base, ArchiveVersion::V3, start, "host", "UTC").unwrap();
        control.close().unwrap();

        for (volume, path_vol) in [(VOL_INDEX, VOL_INDEX), (VOL_META, VOL_META), (0, 0)] {
            let bytes = std::fs::read(archive_path(&base, path_vol)).unwrap();
            let label = ArchiveLabel::decode(&bytes).unwrap();
            assert_eq!(label.version, ArchiveVersion::V3);
            assert_eq!(label.volume, volume);
            assert_eq!(label.start, start);
            assert_eq!(label.hostname, "host");
        }
    }

    #[test]
    fn test_create_refuses_existing_archive() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let start = Timestamp::new(1000, 0);

        ArchiveControl::create(&base, ArchiveVersion::V2, start, "host", "UTC").unwrap();
        assert!(
            ArchiveControl::create(&base, ArchiveVersion::V2, start, "host", "UTC").is_err()
        );
    }

    #[test]
    fn test_tell_accounts_for_label() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let mut control = ArchiveControl::create(
            &base,
            ArchiveVersion::V2,
            Timestamp::new(1000, 0),
            "host",
            "UTC",
        )
        .unwrap();

        let label_size = ArchiveLabel::size(ArchiveVersion::V2) as u64;
        assert_eq!(control.tell(StreamKind::Meta).unwrap(), label_size);

        control.write(StreamKind::Meta, &[0u8; 16]).unwrap();
        control.flush(StreamKind::Meta).unwrap();
        assert_eq!(control.tell(StreamKind::Meta).unwrap(), label_size + 16);
    }

    #[test]
    fn test_new_volume_rolls_over() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let mut control = ArchiveControl::create(
            &base,
            ArchiveVersion::V3,
            Timestamp::new(1000, 0),
            "host",
            "UTC",
        )
        .unwrap();

        assert_eq!(control.current_volume(), 0);
        control.new_volume(Timestamp::new(2000, 0)).unwrap();
        assert_eq!(control.current_volume(), 1);

        let bytes = std::fs::read(archive_path(&base, 1)).unwrap();
        let label = ArchiveLabel::decode(&bytes).unwrap();
        assert_eq!(label.volume, 1);
        assert_eq!(label.start, Timestamp::new(2000, 0));
    }

    #[test]
    fn test_stat_reports_size() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("arch");
        let control = ArchiveControl::create(
            &base,
            ArchiveVersion::V2,
            Timestamp::new(1000, 0),
            "host",
            "UTC",
        )
        .unwrap();

        let stat = control.stat(StreamKind::Index).unwrap();
        assert_eq!(stat.size, ArchiveLabel::size(ArchiveVersion::V2) as u64);
        #[cfg(unix)]
        assert!(stat.inode.is_some());
    }
}
