//! Filesystem operation handlers.
//!
//! [`RecodeFs`] implements the visible filesystem contract (`getattr`,
//! `readdir`, `open`, `read`, `statfs`) as self-contained transactions over
//! the path mapper, the cache, and the transcoding engine. There is no
//! session state between calls, and handlers may run concurrently on
//! arbitrary threads: operations on different virtual paths only contend on
//! the brief structural lock, while operations on the same path serialize on
//! its entry lock.
//!
//! This layer is framework-free; the FUSE dispatch in [`crate::fuse`] maps
//! kernel requests onto these handlers.

use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::time::SystemTime;

use nix::sys::statvfs;
use tracing::trace;

use crate::cache::Cache;
use crate::config::MountConfig;
use crate::engine::Transcoder;
use crate::error::{FsError, FsResult};
use crate::mapping::PathMapper;

/// Kind of a directory entry or stat target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
}

/// Attributes reported for a virtual path.
///
/// Everything except `size` comes straight from the source file. For a
/// transcodable path, `size` is the transcoded length once the entry is
/// populated; before the first transcode it is the source file's size, an
/// accepted approximation (the real length is unknowable without running
/// the engine, and `getattr` must not force eager transcoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: u64,
    pub kind: FileKind,
    /// Permission bits (no file-type bits).
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blocks: u64,
    pub blksize: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl From<&fs::Metadata> for FileAttributes {
    fn from(meta: &fs::Metadata) -> Self {
        let kind = if meta.is_dir() {
            FileKind::Directory
        } else if meta.file_type().is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::RegularFile
        };
        Self {
            size: meta.len(),
            kind,
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            blocks: meta.blocks(),
            blksize: meta.blksize() as u32,
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// One entry in a directory listing, already translated to its virtual name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Filesystem-level statistics, passed through from the source filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub block_size: u32,
    pub name_max: u32,
    pub fragment_size: u32,
}

/// The mirrored, transcoding filesystem.
///
/// Holds the mount's path mapper, the entry cache, and the engine. All
/// methods take `&self`; the type is `Send + Sync` and meant to be shared
/// behind an `Arc` between the FUSE dispatcher and anything observing cache
/// stats.
pub struct RecodeFs {
    mapper: PathMapper,
    cache: Cache,
    engine: Arc<dyn Transcoder>,
}

impl RecodeFs {
    /// Build a filesystem from a configuration and an engine.
    pub fn new(config: MountConfig, engine: Arc<dyn Transcoder>) -> Self {
        Self {
            mapper: PathMapper::new(&config),
            cache: Cache::new(&config),
            engine,
        }
    }

    /// The cache, for stats and tests.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Attributes for a virtual path.
    ///
    /// Stats the derived source path, then overrides `size` with the
    /// transcoded length for populated transcodable entries (see
    /// [`FileAttributes`] for the cold-entry caveat). Creates the cache
    /// entry for transcodable paths as a side effect, like every touch.
    pub fn getattr(&self, path: &str) -> FsResult<FileAttributes> {
        let source = self.mapper.to_source_path(path);
        let meta = fs::metadata(&source).map_err(|err| FsError::from_io(path, err))?;
        let mut attrs = FileAttributes::from(&meta);
        if let Some(entry) = self.cache.lookup_or_create(path) {
            if let Some(len) = entry.populated_len() {
                attrs.size = len;
            }
        }
        trace!(path = %path, size = attrs.size, "getattr");
        Ok(attrs)
    }

    /// Snapshot listing of a virtual directory.
    ///
    /// Every source entry name passes through the extension rewrite, so a
    /// directory of `ogg` files lists as `mp3` files; other names are
    /// unchanged.
    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let source = self.mapper.to_source_path(path);
        let reader = fs::read_dir(&source).map_err(|err| FsError::from_io(path, err))?;
        let mut listing = Vec::new();
        for item in reader {
            let item = item.map_err(|err| FsError::from_io(path, err))?;
            let source_name = item.file_name().to_string_lossy().into_owned();
            let is_dir = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
            listing.push(DirEntry {
                name: self.mapper.to_virtual_name(&source_name),
                is_dir,
            });
        }
        trace!(path = %path, entries = listing.len(), "readdir");
        Ok(listing)
    }

    /// Open a virtual file.
    ///
    /// Succeeds iff the path resolves to a cache entry; transcoding is
    /// deferred to the first `read`. Pass-through names (wrong extension)
    /// are not openable even though they appear in listings.
    pub fn open(&self, path: &str) -> FsResult<()> {
        match self.cache.lookup_or_create(path) {
            Some(_) => Ok(()),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    /// Read up to `max_len` bytes at `offset` from a virtual file,
    /// transcoding on first touch. An offset at or past the end yields an
    /// empty vector.
    pub fn read(&self, path: &str, offset: u64, max_len: usize) -> FsResult<Vec<u8>> {
        let entry = self
            .cache
            .lookup_or_create(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let bytes = entry.read_range(self.engine.as_ref(), offset, max_len)?;
        trace!(path = %path, offset, returned = bytes.len(), "read");
        Ok(bytes)
    }

    /// Filesystem statistics, delegated to the source filesystem.
    pub fn statfs(&self, path: &str) -> FsResult<FsStats> {
        let source = self.mapper.to_source_path(path);
        let stat = statvfs::statvfs(&source)
            .map_err(|errno| FsError::from_io(path, io::Error::from_raw_os_error(errno as i32)))?;
        Ok(FsStats {
            blocks: stat.blocks() as u64,
            blocks_free: stat.blocks_free() as u64,
            blocks_available: stat.blocks_available() as u64,
            files: stat.files() as u64,
            files_free: stat.files_free() as u64,
            block_size: stat.block_size() as u32,
            name_max: stat.name_max() as u32,
            fragment_size: stat.fragment_size() as u32,
        })
    }
}
