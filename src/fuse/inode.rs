//! Inode-to-path bookkeeping for the FUSE dispatch layer.
//!
//! The operation handlers speak rooted virtual paths; the kernel speaks
//! inodes. This table owns the mapping: the root directory is pinned to
//! inode 1 (what the kernel assumes for the mount root) and every other
//! path gets a monotonically assigned inode on first sight. Assignments are
//! stable for the lifetime of the mount; this filesystem is read-only, so
//! there is no rename or unlink to invalidate them.

use std::collections::HashMap;

/// Bidirectional path ↔ inode map.
#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, String>,
    by_path: HashMap<String, u64>,
    next_ino: u64,
}

impl InodeTable {
    /// Inode of the mount root, fixed by the FUSE protocol.
    pub const ROOT_INODE: u64 = 1;

    /// Create a table with the root directory pre-registered.
    pub fn new() -> Self {
        let mut table = Self {
            by_ino: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: Self::ROOT_INODE + 1,
        };
        table.by_ino.insert(Self::ROOT_INODE, "/".to_string());
        table.by_path.insert("/".to_string(), Self::ROOT_INODE);
        table
    }

    /// The inode for a path, assigning one on first sight.
    pub fn ino_for(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(ino, path.to_string());
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// The path registered for an inode, if any.
    pub fn path_of(&self, ino: u64) -> Option<&str> {
        self.by_ino.get(&ino).map(String::as_str)
    }

    /// Number of registered paths (including the root).
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    /// Always false: the root is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Append a child name to a rooted directory path.
pub(crate) fn join_child(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// The parent of a rooted path; the root is its own parent.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
