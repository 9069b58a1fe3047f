//! FUSE dispatch layer.
//!
//! [`RecodeFuse`] adapts a [`RecodeFs`] to the `fuser` request model:
//! inodes are translated to virtual paths through an [`InodeTable`], each
//! request is forwarded to the matching operation handler, and errors are
//! reported through [`FsError::errno`](crate::error::FsError::errno). The
//! mount is read-only; write-mode opens are refused with `EACCES` and the
//! mount options pin `RO`.
//!
//! `fuser` dispatches requests one at a time per session (`&mut self`), so
//! a slow transcode stalls this session's queue; the cache and handlers are
//! nevertheless fully thread-safe and shared via `Arc`, which keeps stats
//! observable from outside while mounted.

mod inode;

pub use inode::InodeTable;

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData,
    ReplyDirectory, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use tracing::debug;

use crate::fs::{FileAttributes, FileKind, RecodeFs};

use inode::{join_child, parent_path};

/// How long the kernel may cache attributes and entries.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// `fuser::Filesystem` implementation over [`RecodeFs`].
pub struct RecodeFuse {
    fs: Arc<RecodeFs>,
    inodes: InodeTable,
}

impl RecodeFuse {
    /// Wrap a filesystem for mounting.
    pub fn new(fs: Arc<RecodeFs>) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
        }
    }

    /// Resolve an inode to its owned path, `ENOENT` when unknown.
    fn path_for(&self, ino: u64) -> Result<String, i32> {
        self.inodes
            .path_of(ino)
            .map(str::to_owned)
            .ok_or(libc::ENOENT)
    }

    /// Stat `path` and build the kernel attribute record, registering the
    /// path's inode as a side effect.
    fn attr_for(&mut self, path: &str) -> Result<FileAttr, i32> {
        match self.fs.getattr(path) {
            Ok(attrs) => {
                let ino = self.inodes.ino_for(path);
                Ok(to_file_attr(ino, &attrs))
            }
            Err(err) => Err(err.errno()),
        }
    }
}

impl Filesystem for RecodeFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let parent_path = match self.path_for(parent) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.attr_for(&path) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.attr_for(&path) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EACCES);
            return;
        }
        match self.fs.open(&path) {
            Ok(()) => reply.opened(0, 0),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.read(&path, offset.max(0) as u64, size as usize) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let listing = match self.fs.readdir(&path) {
            Ok(listing) => listing,
            Err(err) => {
                reply.error(err.errno());
                return;
            }
        };

        let parent_ino = if path == "/" {
            InodeTable::ROOT_INODE
        } else {
            self.inodes.ino_for(parent_path(&path))
        };
        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(listing.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_ino, FileType::Directory, "..".to_string()));
        for entry in listing {
            let child_ino = self.inodes.ino_for(&join_child(&path, &entry.name));
            let kind = if entry.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_ino, kind, entry.name));
        }

        for (index, (entry_ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset.max(0) as usize)
        {
            // The offset handed back for an entry is the index of the next.
            if reply.add(entry_ino, (index + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = match self.path_for(ino) {
            Ok(path) => path,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.fs.statfs(&path) {
            Ok(stats) => reply.statfs(
                stats.blocks,
                stats.blocks_free,
                stats.blocks_available,
                stats.files,
                stats.files_free,
                stats.block_size,
                stats.name_max,
                stats.fragment_size,
            ),
            Err(err) => reply.error(err.errno()),
        }
    }
}

fn to_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
    }
}

fn to_file_attr(ino: u64, attrs: &FileAttributes) -> FileAttr {
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.blocks,
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: SystemTime::UNIX_EPOCH,
        kind: to_file_type(attrs.kind),
        perm: attrs.perm,
        nlink: attrs.nlink,
        uid: attrs.uid,
        gid: attrs.gid,
        rdev: 0,
        blksize: attrs.blksize,
        flags: 0,
    }
}

fn mount_options(extra: &[MountOption]) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName("recodefs".to_string()),
    ];
    options.extend_from_slice(extra);
    options
}

/// Mount `fs` at `mountpoint` and block until unmounted.
pub fn mount(
    fs: Arc<RecodeFs>,
    mountpoint: impl AsRef<Path>,
    extra_options: &[MountOption],
) -> io::Result<()> {
    debug!(mountpoint = %mountpoint.as_ref().display(), "mounting");
    fuser::mount2(
        RecodeFuse::new(fs),
        mountpoint,
        &mount_options(extra_options),
    )
}

/// Mount `fs` at `mountpoint` on a background thread. Dropping the returned
/// session unmounts.
pub fn spawn_mount(
    fs: Arc<RecodeFs>,
    mountpoint: impl AsRef<Path>,
    extra_options: &[MountOption],
) -> io::Result<BackgroundSession> {
    debug!(mountpoint = %mountpoint.as_ref().display(), "mounting in background");
    fuser::spawn_mount2(
        RecodeFuse::new(fs),
        mountpoint,
        &mount_options(extra_options),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attrs(kind: FileKind) -> FileAttributes {
        FileAttributes {
            size: 42,
            kind,
            perm: 0o644,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            blocks: 8,
            blksize: 4096,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_to_file_attr_carries_fields() {
        let attr = to_file_attr(7, &sample_attrs(FileKind::RegularFile));
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 42);
        assert_eq!(attr.perm, 0o644);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.blksize, 4096);
    }

    #[test]
    fn test_to_file_type_mapping() {
        assert_eq!(to_file_type(FileKind::Directory), FileType::Directory);
        assert_eq!(to_file_type(FileKind::Symlink), FileType::Symlink);
        assert_eq!(
            to_file_type(FileKind::RegularFile),
            FileType::RegularFile
        );
    }

    #[test]
    fn test_mount_options_pin_read_only() {
        let options = mount_options(&[MountOption::AllowOther]);
        assert!(options.iter().any(|o| matches!(o, MountOption::RO)));
        assert!(options
            .iter()
            .any(|o| matches!(o, MountOption::FSName(name) if name == "recodefs")));
        assert!(options
            .iter()
            .any(|o| matches!(o, MountOption::AllowOther)));
    }
}
