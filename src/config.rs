//! Mount-session configuration.
//!
//! A [`MountConfig`] is built once at startup and never mutated afterwards.
//! It names the source directory to mirror, the extension pair that drives
//! path translation (`source_ext` on disk, `dest_ext` as presented), and the
//! cache bound. There is no persisted state: the cache is rebuilt from the
//! source tree on every mount.

use std::path::PathBuf;

/// Immutable configuration for one mount session.
///
/// Extensions are stored without a leading dot; a leading dot supplied by
/// the caller is stripped.
///
/// # Example
///
/// ```ignore
/// let config = MountConfig::new("/music", "ogg", "mp3")
///     .with_max_cache_entries(100);
/// ```
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Root of the real directory tree being mirrored.
    pub source_root: PathBuf,
    /// Extension of the files on disk (e.g. "ogg").
    pub source_ext: String,
    /// Extension presented through the mount point (e.g. "mp3").
    pub dest_ext: String,
    /// Maximum number of cache entries held before LRU eviction runs.
    pub max_cache_entries: usize,
}

impl MountConfig {
    /// Default cache bound.
    pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 50;
    /// Default on-disk extension.
    pub const DEFAULT_SOURCE_EXT: &'static str = "ogg";
    /// Default presented extension.
    pub const DEFAULT_DEST_EXT: &'static str = "mp3";

    /// Create a configuration for the given source tree and extension pair,
    /// with the default cache bound.
    pub fn new(
        source_root: impl Into<PathBuf>,
        source_ext: impl Into<String>,
        dest_ext: impl Into<String>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            source_ext: normalize_ext(source_ext.into()),
            dest_ext: normalize_ext(dest_ext.into()),
            max_cache_entries: Self::DEFAULT_MAX_CACHE_ENTRIES,
        }
    }

    /// Create a configuration with the default `ogg` → `mp3` extension pair.
    pub fn ogg_to_mp3(source_root: impl Into<PathBuf>) -> Self {
        Self::new(
            source_root,
            Self::DEFAULT_SOURCE_EXT,
            Self::DEFAULT_DEST_EXT,
        )
    }

    /// Set the maximum number of cache entries.
    pub fn with_max_cache_entries(mut self, max_cache_entries: usize) -> Self {
        self.max_cache_entries = max_cache_entries;
        self
    }
}

/// Strip a single leading dot so "mp3" and ".mp3" configure the same thing.
fn normalize_ext(ext: String) -> String {
    match ext.strip_prefix('.') {
        Some(stripped) => stripped.to_string(),
        None => ext,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_applies_default_cache_bound() {
        let config = MountConfig::new("/music", "ogg", "mp3");
        assert_eq!(
            config.max_cache_entries,
            MountConfig::DEFAULT_MAX_CACHE_ENTRIES
        );
        assert_eq!(config.source_root, PathBuf::from("/music"));
    }

    #[test]
    fn test_with_max_cache_entries() {
        let config = MountConfig::new("/music", "ogg", "mp3").with_max_cache_entries(2);
        assert_eq!(config.max_cache_entries, 2);
    }

    #[test]
    fn test_leading_dots_are_stripped() {
        let config = MountConfig::new("/music", ".ogg", ".mp3");
        assert_eq!(config.source_ext, "ogg");
        assert_eq!(config.dest_ext, "mp3");
    }

    #[test]
    fn test_ogg_to_mp3_defaults() {
        let config = MountConfig::ogg_to_mp3("/music");
        assert_eq!(config.source_ext, "ogg");
        assert_eq!(config.dest_ext, "mp3");
        assert_eq!(
            config.max_cache_entries,
            MountConfig::DEFAULT_MAX_CACHE_ENTRIES
        );
    }
}
