//! recodefs mirrors a directory tree of audio files through a FUSE mount,
//! presenting each source file under a different extension and producing its
//! content on demand with an external transcoding engine. A bounded
//! in-memory LRU cache holds transcoded buffers so repeat reads are served
//! without re-running the engine.
//!
//! # Architecture
//!
//! - [`mapping::PathMapper`]: virtual ↔ source path translation by
//!   extension substitution; pure and stateless.
//! - [`engine::Transcoder`]: the engine seam; [`engine::CommandTranscoder`]
//!   runs an external command and streams its stdout.
//! - [`cache::Cache`] / [`cache::CacheEntry`]: path-keyed LRU cache with a
//!   brief structural lock, plus a per-entry lock that serializes
//!   population and reads for one file. At most one transcode runs per
//!   virtual path; lookups for other files never wait on it.
//! - [`fs::RecodeFs`]: the operation handlers (`getattr`, `readdir`,
//!   `open`, `read`, `statfs`), framework-free and `Send + Sync`.
//! - [`fuse`]: the `fuser` dispatch layer and mount helpers.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use recodefs::{CommandTranscoder, MountConfig, RecodeFs};
//!
//! let config = MountConfig::ogg_to_mp3("/music").with_max_cache_entries(50);
//! let engine = Arc::new(CommandTranscoder::vorbis_to_mp3(160));
//! let fs = Arc::new(RecodeFs::new(config, engine));
//! recodefs::mount(fs, "/mnt/mp3", &[])?;
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod mapping;

pub use cache::{Cache, CacheEntry, CacheStats};
pub use config::MountConfig;
pub use engine::{ChunkSink, CommandTranscoder, EngineError, Transcoder};
pub use error::{FsError, FsResult};
pub use fs::{DirEntry, FileAttributes, FileKind, FsStats, RecodeFs};
pub use fuse::{mount, spawn_mount, RecodeFuse};
