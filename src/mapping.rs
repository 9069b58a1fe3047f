//! Virtual-to-source path translation.
//!
//! The mount presents every source file whose name ends in the configured
//! source extension as the same name with the destination extension, so
//! `/music/album/track.ogg` on disk appears as `/album/track.mp3` through a
//! mount of `/music` with the pair `ogg → mp3`. Names without the relevant
//! extension (plain files, directories) pass through unchanged.
//!
//! Translation is purely textual: the extension is whatever follows the
//! final `.` in the string, so a dotfile named `.mp3` has extension `mp3`.
//! There is no state and no locking here.

use std::path::PathBuf;

use crate::config::MountConfig;

/// Translates between virtual paths and source paths by extension
/// substitution.
#[derive(Debug, Clone)]
pub struct PathMapper {
    source_root: PathBuf,
    source_ext: String,
    dest_ext: String,
}

impl PathMapper {
    /// Build a mapper from the mount configuration.
    pub fn new(config: &MountConfig) -> Self {
        Self {
            source_root: config.source_root.clone(),
            source_ext: config.source_ext.clone(),
            dest_ext: config.dest_ext.clone(),
        }
    }

    /// Whether a virtual path participates in transcoding and caching.
    ///
    /// True iff the path's trailing extension equals the configured
    /// destination extension. Paths for which this is false are treated as
    /// pass-through listings only and never populate a cache entry.
    pub fn is_transcodable(&self, virtual_path: &str) -> bool {
        extension_of(virtual_path) == Some(self.dest_ext.as_str())
    }

    /// Map a virtual path to the real path under the source root.
    ///
    /// The trailing destination extension, when present, is rewritten to the
    /// source extension; any other path (directories, pass-through names) is
    /// joined unchanged.
    ///
    /// # Arguments
    ///
    /// * `virtual_path` - Rooted path as seen through the mount (e.g.
    ///   `/album/track.mp3`)
    ///
    /// # Returns
    ///
    /// The corresponding path under the source root (e.g.
    /// `/music/album/track.ogg`).
    pub fn to_source_path(&self, virtual_path: &str) -> PathBuf {
        let relative = virtual_path.trim_start_matches('/');
        match swap_extension(relative, &self.dest_ext, &self.source_ext) {
            Some(rewritten) => self.source_root.join(rewritten),
            None => self.source_root.join(relative),
        }
    }

    /// Map a source directory-entry name to the name presented through the
    /// mount.
    ///
    /// Names with the source extension are rewritten to the destination
    /// extension; everything else passes through unchanged.
    pub fn to_virtual_name(&self, source_name: &str) -> String {
        swap_extension(source_name, &self.source_ext, &self.dest_ext)
            .unwrap_or_else(|| source_name.to_string())
    }
}

/// The extension after the final `.`, if any.
fn extension_of(path: &str) -> Option<&str> {
    path.rfind('.').map(|idx| &path[idx + 1..])
}

/// Rewrite a trailing `.from` extension to `.to`; `None` when the name does
/// not end in `.from`.
fn swap_extension(name: &str, from: &str, to: &str) -> Option<String> {
    let idx = name.rfind('.')?;
    if &name[idx + 1..] == from {
        Some(format!("{}.{}", &name[..idx], to))
    } else {
        None
    }
}
