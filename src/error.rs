//! Error types for filesystem operations.
//!
//! Every operation handler returns [`FsResult`]. The taxonomy is small:
//! a path that does not resolve to a real or virtual file is [`FsError::NotFound`],
//! a failure of the underlying source filesystem is [`FsError::Io`], and a
//! failure of the transcoding engine (including buffer allocation failure,
//! which aborts population) is [`FsError::Engine`].

use std::io;

use thiserror::Error;

use crate::engine::EngineError;

/// Result alias used by all filesystem operation handlers.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Errors surfaced by filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path does not resolve to a real or virtual file.
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// The underlying source filesystem failed (stat, opendir, statvfs).
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The virtual path the operation was invoked with.
        path: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The transcoding engine failed; the cache entry is left unpopulated
    /// so a later read retries.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl FsError {
    /// Classify an I/O error from the source filesystem, folding the
    /// missing-file case into [`FsError::NotFound`].
    pub(crate) fn from_io(path: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            FsError::NotFound(path.to_string())
        } else {
            FsError::Io {
                path: path.to_string(),
                source: err,
            }
        }
    }

    /// The errno to report at the FUSE boundary.
    ///
    /// Engine failures surface as `ENOENT`, matching the failed-read
    /// behavior of the operation contract: the entry is treated as missing
    /// for that call and the next read retries transcoding.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            FsError::Engine(_) => libc::ENOENT,
        }
    }
}
