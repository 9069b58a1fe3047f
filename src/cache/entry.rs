//! Per-file cache entries.
//!
//! A [`CacheEntry`] carries the identity of one virtual file (virtual path
//! plus the source path derived at creation) and its lazily-populated output
//! buffer. All buffer access goes through the entry lock: population runs
//! under it for its full duration, which is what bounds the system to at
//! most one concurrent transcode per virtual path, and reads copy out under
//! it, which is what keeps eviction from freeing a buffer mid-copy.
//!
//! Lock order is cache structural lock → entry lock. Nothing here acquires
//! the structural lock, and entry locks are never nested.

use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, Transcoder};

/// Buffer state guarded by the entry lock.
///
/// `populated` rather than `buf.is_empty()` decides whether a transcode has
/// completed, so an engine that legitimately produces zero bytes is not
/// re-run on every read.
#[derive(Debug, Default)]
struct EntryState {
    populated: bool,
    buf: Vec<u8>,
}

impl EntryState {
    /// Append one output chunk, growing capacity by the doubling-with-floor
    /// rule: `new_capacity = max(2 × old_capacity, new_length)`.
    fn append(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        let required = self
            .buf
            .len()
            .checked_add(chunk.len())
            .ok_or(EngineError::Allocation {
                requested: usize::MAX,
            })?;
        if required > self.buf.capacity() {
            let target = required.max(self.buf.capacity().saturating_mul(2));
            self.buf
                .try_reserve_exact(target - self.buf.len())
                .map_err(|_| EngineError::Allocation { requested: target })?;
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// One virtual file: identity plus the lock-guarded transcoded buffer.
///
/// Entries are created by the cache on first lookup and shared with callers
/// as `Arc<CacheEntry>`; the buffer content, once populated, is immutable
/// until eviction releases it.
#[derive(Debug)]
pub struct CacheEntry {
    virtual_path: String,
    source_path: PathBuf,
    state: Mutex<EntryState>,
}

impl CacheEntry {
    pub(crate) fn new(virtual_path: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            source_path: source_path.into(),
            state: Mutex::new(EntryState::default()),
        }
    }

    /// The virtual path this entry is keyed by.
    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    /// The source file this entry transcodes.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// The transcoded length, once populated. `None` before the first
    /// successful transcode.
    pub fn populated_len(&self) -> Option<u64> {
        let state = self.state.lock();
        if state.populated {
            Some(state.buf.len() as u64)
        } else {
            None
        }
    }

    /// Current buffer capacity in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.state.lock().buf.capacity()
    }

    /// Transcode the source file into the buffer if that has not happened
    /// yet. Blocks for the full transcode; concurrent callers for the same
    /// entry serialize here and all but one find the buffer populated.
    pub fn ensure_populated(&self, engine: &dyn Transcoder) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        self.populate_locked(&mut state, engine)
    }

    /// Populate if needed, then copy out `min(len - offset, max_len)` bytes
    /// from `offset`. An offset at or past the end returns an empty vector
    /// (end-of-file, not an error).
    ///
    /// Population and copy happen under a single entry-lock acquisition, so
    /// an eviction releasing this buffer cannot interleave between them.
    pub fn read_range(
        &self,
        engine: &dyn Transcoder,
        offset: u64,
        max_len: usize,
    ) -> Result<Vec<u8>, EngineError> {
        let mut state = self.state.lock();
        self.populate_locked(&mut state, engine)?;
        if offset >= state.buf.len() as u64 {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start + max_len.min(state.buf.len() - start);
        Ok(state.buf[start..end].to_vec())
    }

    /// Release the buffer and return the entry to the unpopulated state.
    /// Called by eviction, which holds the structural lock; taking the entry
    /// lock here is what makes eviction safe against in-flight readers.
    pub(crate) fn release_buffer(&self) {
        let mut state = self.state.lock();
        state.buf = Vec::new();
        state.populated = false;
    }

    fn populate_locked(
        &self,
        state: &mut EntryState,
        engine: &dyn Transcoder,
    ) -> Result<(), EngineError> {
        if state.populated {
            return Ok(());
        }
        debug!(
            path = %self.virtual_path,
            source = %self.source_path.display(),
            "populating cache entry"
        );
        let started = Instant::now();
        let result = engine.transcode(&self.source_path, &mut |chunk: &[u8]| state.append(chunk));
        match result {
            Ok(()) => {
                state.populated = true;
                info!(
                    path = %self.virtual_path,
                    bytes = state.buf.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transcode complete"
                );
                Ok(())
            }
            Err(err) => {
                // Discard partial output; the entry stays unpopulated so the
                // next read retries instead of serving a truncated stream.
                state.buf = Vec::new();
                warn!(
                    path = %self.virtual_path,
                    error = %err,
                    "transcode failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::tests::ScriptedTranscoder;

    fn entry() -> CacheEntry {
        CacheEntry::new("/x.mp3", "/music/x.ogg")
    }

    // ========================================================================
    // Buffer growth contract
    // ========================================================================

    #[test]
    fn test_first_append_allocates_exactly() {
        let mut state = EntryState::default();
        state.append(&[0u8; 10]).unwrap();
        assert_eq!(state.buf.len(), 10);
        assert_eq!(state.buf.capacity(), 10);
    }

    #[test]
    fn test_small_append_doubles_capacity() {
        let mut state = EntryState::default();
        state.append(&[0u8; 10]).unwrap();
        // 10 + 1 fits under the doubled capacity, so growth is 2 × 10.
        state.append(&[0u8; 1]).unwrap();
        assert_eq!(state.buf.len(), 11);
        assert_eq!(state.buf.capacity(), 20);
    }

    #[test]
    fn test_large_append_grows_to_required() {
        let mut state = EntryState::default();
        state.append(&[0u8; 10]).unwrap();
        // 10 + 50 exceeds the doubled capacity, so growth lands exactly on
        // the new length.
        state.append(&[0u8; 50]).unwrap();
        assert_eq!(state.buf.len(), 60);
        assert_eq!(state.buf.capacity(), 60);
    }

    #[test]
    fn test_append_within_capacity_does_not_grow() {
        let mut state = EntryState::default();
        state.append(&[0u8; 10]).unwrap();
        state.append(&[0u8; 1]).unwrap();
        let capacity = state.buf.capacity();
        state.append(&[0u8; 5]).unwrap();
        assert_eq!(state.buf.len(), 16);
        assert_eq!(state.buf.capacity(), capacity);
    }

    // ========================================================================
    // Population
    // ========================================================================

    #[test]
    fn test_populates_once() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"abc".to_vec(), b"def".to_vec()]);
        entry.ensure_populated(&engine).unwrap();
        entry.ensure_populated(&engine).unwrap();
        assert_eq!(engine.calls(), 1);
        assert_eq!(entry.populated_len(), Some(6));
    }

    #[test]
    fn test_empty_transcode_is_populated() {
        let entry = entry();
        let engine = ScriptedTranscoder::new(Vec::<Vec<u8>>::new());
        entry.ensure_populated(&engine).unwrap();
        entry.ensure_populated(&engine).unwrap();
        // Zero chunks is a valid result, not grounds for a re-run.
        assert_eq!(engine.calls(), 1);
        assert_eq!(entry.populated_len(), Some(0));
    }

    #[test]
    fn test_failed_transcode_leaves_entry_unpopulated() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"abc".to_vec()]).failing_first(1);
        assert!(entry.ensure_populated(&engine).is_err());
        assert_eq!(entry.populated_len(), None);
        assert_eq!(entry.buffer_capacity(), 0);
        // The retry succeeds and populates.
        entry.ensure_populated(&engine).unwrap();
        assert_eq!(engine.calls(), 2);
        assert_eq!(entry.populated_len(), Some(3));
    }

    #[test]
    fn test_engine_sees_source_path() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"x".to_vec()]);
        entry.ensure_populated(&engine).unwrap();
        assert_eq!(engine.sources(), vec![PathBuf::from("/music/x.ogg")]);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    #[test]
    fn test_read_range_full() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"hello ".to_vec(), b"world".to_vec()]);
        let bytes = entry.read_range(&engine, 0, 64).unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn test_read_range_offset_and_clamp() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"hello world".to_vec()]);
        assert_eq!(entry.read_range(&engine, 6, 3).unwrap(), b"wor");
        assert_eq!(entry.read_range(&engine, 6, 100).unwrap(), b"world");
    }

    #[test]
    fn test_read_at_end_returns_empty() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"hello".to_vec()]);
        assert_eq!(entry.read_range(&engine, 5, 10).unwrap(), b"");
        assert_eq!(entry.read_range(&engine, 500, 10).unwrap(), b"");
    }

    #[test]
    fn test_reads_are_idempotent() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"stable bytes".to_vec()]);
        let first = entry.read_range(&engine, 3, 5).unwrap();
        let second = entry.read_range(&engine, 3, 5).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.calls(), 1);
    }

    #[test]
    fn test_release_buffer_resets_entry() {
        let entry = entry();
        let engine = ScriptedTranscoder::new([b"abc".to_vec()]);
        entry.read_range(&engine, 0, 3).unwrap();
        entry.release_buffer();
        assert_eq!(entry.populated_len(), None);
        assert_eq!(entry.buffer_capacity(), 0);
        // The next read transcodes again.
        assert_eq!(entry.read_range(&engine, 0, 3).unwrap(), b"abc");
        assert_eq!(engine.calls(), 2);
    }
}
