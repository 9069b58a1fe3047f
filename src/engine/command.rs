//! Subprocess-backed transcoding engine.
//!
//! Runs one external command per source file and streams its stdout into the
//! chunk sink. The command line is a template: every occurrence of
//! [`SOURCE_PLACEHOLDER`] in an argument is replaced with the source path.
//!
//! Stream handling mirrors the classic pipe-and-drain shape: the child's
//! stdout pipe is read by a scoped drain thread that feeds the sink (the OS
//! pipe buffer provides backpressure), a second scoped thread captures a
//! bounded stderr tail for diagnostics, and the calling thread joins both
//! before reaping the child. If the sink aborts mid-stream the child is
//! killed so both pipes reach end-of-stream.

use std::io::{self, Read};
use std::path::Path;
use std::process::{ChildStderr, Command, Stdio};
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use super::{ChunkSink, EngineError, Transcoder};

/// Placeholder substituted with the source path in configured arguments.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Read size for draining the child's stdout.
const READ_CHUNK: usize = 64 * 1024;

/// Upper bound on the captured stderr tail.
const STDERR_CAP: u64 = 8 * 1024;

/// A [`Transcoder`] that shells out to an external command.
///
/// # Example
///
/// ```ignore
/// // Decode Ogg Vorbis to MP3 at 160 kbit/s via GStreamer.
/// let engine = CommandTranscoder::vorbis_to_mp3(160);
///
/// // Or any command that writes the destination format to stdout.
/// let engine = CommandTranscoder::new("ffmpeg", [
///     "-loglevel", "error", "-i", "{source}", "-f", "mp3", "-",
/// ]);
/// ```
pub struct CommandTranscoder {
    program: String,
    args: Vec<String>,
}

impl CommandTranscoder {
    /// Create an engine from a program and argument template.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The GStreamer pipeline for Ogg Vorbis → MP3:
    /// `filesrc ! oggdemux ! vorbisdec ! audioconvert ! lamemp3enc ! fdsink`.
    pub fn vorbis_to_mp3(bitrate_kbps: u32) -> Self {
        Self::new(
            "gst-launch-1.0",
            [
                "-q".to_string(),
                "filesrc".to_string(),
                format!("location={}", SOURCE_PLACEHOLDER),
                "!".to_string(),
                "oggdemux".to_string(),
                "!".to_string(),
                "vorbisdec".to_string(),
                "!".to_string(),
                "audioconvert".to_string(),
                "!".to_string(),
                "lamemp3enc".to_string(),
                "target=bitrate".to_string(),
                format!("bitrate={}", bitrate_kbps),
                "!".to_string(),
                "fdsink".to_string(),
                "fd=1".to_string(),
            ],
        )
    }

    /// Program name this engine invokes.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument template, before placeholder substitution.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn build_command(&self, source: &Path) -> Command {
        let source_str = source.to_string_lossy();
        let mut command = Command::new(&self.program);
        for arg in &self.args {
            if arg.contains(SOURCE_PLACEHOLDER) {
                command.arg(arg.replace(SOURCE_PLACEHOLDER, &source_str));
            } else {
                command.arg(arg);
            }
        }
        command
    }
}

impl Transcoder for CommandTranscoder {
    fn transcode(&self, source: &Path, sink: &mut ChunkSink<'_>) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut child = self
            .build_command(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(EngineError::Launch)?;
        debug!(
            program = %self.program,
            source = %source.display(),
            "spawned transcoder"
        );

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch(io::Error::other("transcoder stdout not piped")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Launch(io::Error::other("transcoder stderr not piped")))?;

        let (drained, stderr_tail) = thread::scope(|scope| {
            let drain = scope.spawn(move || -> Result<u64, EngineError> {
                let mut chunk = [0u8; READ_CHUNK];
                let mut total = 0u64;
                loop {
                    let n = stdout.read(&mut chunk).map_err(EngineError::Stream)?;
                    if n == 0 {
                        return Ok(total);
                    }
                    sink(&chunk[..n])?;
                    total += n as u64;
                }
            });
            let stderr_reader = scope.spawn(move || read_stderr_tail(&mut stderr));

            let drained = match drain.join() {
                Ok(result) => result,
                Err(_) => Err(EngineError::Stream(io::Error::other(
                    "output drain thread panicked",
                ))),
            };
            if drained.is_err() {
                // Unblock the stderr reader: without the kill, a child
                // stalled on a full stdout pipe would never close stderr.
                let _ = child.kill();
            }
            let stderr_tail = stderr_reader.join().unwrap_or_default();
            (drained, stderr_tail)
        });

        let status = child.wait().map_err(EngineError::Stream)?;
        let total = drained?;
        if !status.success() {
            warn!(
                source = %source.display(),
                %status,
                stderr = %stderr_tail,
                "transcoder failed"
            );
            return Err(EngineError::Failed {
                status,
                stderr: stderr_tail,
            });
        }
        debug!(
            source = %source.display(),
            bytes = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcoder finished"
        );
        Ok(())
    }
}

/// Capture up to [`STDERR_CAP`] bytes of stderr, then discard the rest so
/// the child never blocks on a full stderr pipe.
fn read_stderr_tail(stderr: &mut ChildStderr) -> String {
    let mut buf = Vec::new();
    let _ = (&mut *stderr).take(STDERR_CAP).read_to_end(&mut buf);
    let _ = io::copy(stderr, &mut io::sink());
    String::from_utf8_lossy(&buf).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::NamedTempFile;

    fn collect(engine: &CommandTranscoder, source: &Path) -> Result<Vec<u8>, EngineError> {
        let mut collected = Vec::new();
        let mut sink = |chunk: &[u8]| {
            collected.extend_from_slice(chunk);
            Ok(())
        };
        engine.transcode(source, &mut sink)?;
        Ok(collected)
    }

    // ========================================================================
    // Command construction
    // ========================================================================

    #[test]
    fn test_build_command_substitutes_placeholder() {
        let engine = CommandTranscoder::new("prog", ["-i", "{source}", "out"]);
        let command = engine.build_command(Path::new("/music/a.ogg"));
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-i", "/music/a.ogg", "out"]);
    }

    #[test]
    fn test_build_command_substitutes_inside_argument() {
        let engine = CommandTranscoder::new("prog", ["location={source}"]);
        let command = engine.build_command(Path::new("/music/a.ogg"));
        let args: Vec<_> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["location=/music/a.ogg"]);
    }

    #[test]
    fn test_vorbis_to_mp3_pipeline_shape() {
        let engine = CommandTranscoder::vorbis_to_mp3(160);
        assert_eq!(engine.program(), "gst-launch-1.0");
        let args = engine.args();
        assert!(args.iter().any(|a| a == "oggdemux"));
        assert!(args.iter().any(|a| a == "vorbisdec"));
        assert!(args.iter().any(|a| a == "bitrate=160"));
        assert!(args.iter().any(|a| a.contains(SOURCE_PLACEHOLDER)));
    }

    // ========================================================================
    // Streaming against real processes
    // ========================================================================

    #[test]
    fn test_cat_streams_source_bytes() {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(b"vorbis bytes, allegedly").unwrap();
        let engine = CommandTranscoder::new("cat", ["{source}"]);
        let collected = collect(&engine, source.path()).unwrap();
        assert_eq!(collected, b"vorbis bytes, allegedly");
    }

    #[test]
    fn test_empty_output_is_success() {
        let engine = CommandTranscoder::new("true", Vec::<String>::new());
        let collected = collect(&engine, Path::new("/ignored")).unwrap();
        assert!(collected.is_empty());
    }

    #[test]
    fn test_missing_program_is_launch_error() {
        let engine = CommandTranscoder::new("/nonexistent/transcoder", ["{source}"]);
        let result = collect(&engine, Path::new("/x.ogg"));
        assert!(matches!(result, Err(EngineError::Launch(_))));
    }

    #[test]
    fn test_nonzero_exit_is_failed() {
        let engine = CommandTranscoder::new("false", Vec::<String>::new());
        let result = collect(&engine, Path::new("/x.ogg"));
        match result {
            Err(EngineError::Failed { status, .. }) => assert!(!status.success()),
            other => panic!("expected Failed, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_stderr_tail_is_captured() {
        let engine = CommandTranscoder::new("sh", ["-c", "echo 'no demuxer' >&2; exit 3"]);
        let result = collect(&engine, Path::new("/x.ogg"));
        match result {
            Err(EngineError::Failed { stderr, .. }) => assert_eq!(stderr, "no demuxer"),
            other => panic!("expected Failed, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_sink_abort_kills_streaming_child() {
        // `yes` writes forever; the engine must kill it once the sink bails.
        let engine = CommandTranscoder::new("yes", Vec::<String>::new());
        let mut seen = 0usize;
        let mut sink = |chunk: &[u8]| {
            seen += chunk.len();
            Err(EngineError::Allocation { requested: 1 })
        };
        let result = engine.transcode(Path::new("/ignored"), &mut sink);
        assert!(matches!(result, Err(EngineError::Allocation { .. })));
        assert!(seen > 0);
    }

    #[test]
    fn test_output_larger_than_read_chunk() {
        let mut source = NamedTempFile::new().unwrap();
        let payload = vec![0xabu8; READ_CHUNK * 2 + 17];
        source.write_all(&payload).unwrap();
        let engine = CommandTranscoder::new("cat", ["{source}"]);
        let collected = collect(&engine, source.path()).unwrap();
        assert_eq!(collected.len(), payload.len());
        assert_eq!(collected, payload);
    }
}
