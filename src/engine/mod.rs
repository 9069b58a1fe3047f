//! Transcoding engine integration.
//!
//! The cache is indifferent to how bytes are produced: it talks to a
//! [`Transcoder`], which turns one source file into a stream of output
//! chunks, delivered through a [`ChunkSink`] callback until end-of-stream
//! or error. The call is synchronous: it returns only once the stream has
//! ended and the engine process (if any) has been reaped.
//!
//! [`CommandTranscoder`] is the production implementation, running an
//! external command per source file.

mod command;

pub use command::{CommandTranscoder, SOURCE_PLACEHOLDER};

use std::io;
use std::path::Path;
use std::process::ExitStatus;

use thiserror::Error;

/// Receives transcoded output, one chunk at a time, in stream order.
///
/// A sink may be invoked zero or more times before the engine reports
/// completion; zero invocations with a successful return is a legitimate
/// empty result. Returning an error from the sink aborts the engine run.
pub type ChunkSink<'a> = dyn FnMut(&[u8]) -> Result<(), EngineError> + Send + 'a;

/// Errors reported by a transcoding engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be started at all.
    #[error("failed to launch transcoder: {0}")]
    Launch(#[source] io::Error),

    /// Reading the engine's output stream, or reaping the engine process,
    /// failed.
    #[error("error streaming transcoder output: {0}")]
    Stream(#[source] io::Error),

    /// The engine ran but did not complete successfully.
    #[error("transcoder exited with {status}: {stderr}")]
    Failed {
        /// Exit status of the engine process.
        status: ExitStatus,
        /// Captured tail of the engine's stderr, trimmed.
        stderr: String,
    },

    /// Growing the output buffer failed; population is aborted.
    #[error("buffer allocation of {requested} bytes failed")]
    Allocation {
        /// Capacity, in bytes, that could not be reserved.
        requested: usize,
    },
}

/// A transcoding engine: converts the file at `source` into the destination
/// format, feeding output to `sink` as it becomes available.
///
/// Implementations block the calling thread for the duration of the run.
/// The engine owns the source file's underlying resource exactly for the
/// duration of the call.
pub trait Transcoder: Send + Sync {
    /// Transcode `source`, delivering output chunks to `sink` in order.
    fn transcode(&self, source: &Path, sink: &mut ChunkSink<'_>) -> Result<(), EngineError>;
}
