//! Inode <-> path mapping.
//!
//! The kernel side of FUSE speaks in inode numbers while the backing tree and
//! the lock manager speak in paths. The table hands out inode numbers on
//! first sight of a path and keeps the mapping in both directions. Renames
//! and removals of directories relocate or drop the whole subtree so stale
//! descendants never resolve to the old location.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Root directory inode (always 1 in FUSE)
pub const ROOT_INODE: u64 = 1;

pub struct InodeTable {
    paths: DashMap<u64, PathBuf>,
    inodes: DashMap<PathBuf, u64>,
    next: AtomicU64,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            paths: DashMap::new(),
            inodes: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.paths.insert(ROOT_INODE, PathBuf::from("/"));
        table.inodes.insert(PathBuf::from("/"), ROOT_INODE);
        table
    }

    /// Inode for a path, allocating one if the path is new.
    pub fn assign(&self, path: &Path) -> u64 {
        let path = normalize(path);
        if let Some(ino) = self.inodes.get(&path) {
            return *ino;
        }
        let candidate = self.next.fetch_add(1, Ordering::SeqCst);
        // Two threads may race to register the same path; the entry API
        // keeps exactly one winner and the loser's number is simply unused.
        let ino = *self.inodes.entry(path.clone()).or_insert(candidate);
        if ino == candidate {
            self.paths.insert(ino, path);
        }
        ino
    }

    /// Path for an inode, if known.
    pub fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.paths.get(&ino).map(|p| p.clone())
    }

    /// Inode for a path, without allocating.
    pub fn inode_of(&self, path: &Path) -> Option<u64> {
        self.inodes.get(&normalize(path)).map(|i| *i)
    }

    /// Drop the mapping for a path and everything below it.
    pub fn forget_subtree(&self, path: &Path) {
        let root = normalize(path);
        let doomed: Vec<(PathBuf, u64)> = self
            .inodes
            .iter()
            .filter(|e| e.key().starts_with(&root))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for (p, ino) in doomed {
            self.inodes.remove(&p);
            self.paths.remove(&ino);
        }
    }

    /// Relocate a path and everything below it, keeping inode numbers stable.
    pub fn rename_subtree(&self, from: &Path, to: &Path) {
        let from = normalize(from);
        let to = normalize(to);
        let moved: Vec<(PathBuf, u64)> = self
            .inodes
            .iter()
            .filter(|e| e.key().starts_with(&from))
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for (old, ino) in moved {
            let suffix = old.strip_prefix(&from).expect("filtered by prefix");
            let new = if suffix.as_os_str().is_empty() {
                to.clone()
            } else {
                to.join(suffix)
            };
            self.inodes.remove(&old);
            self.inodes.insert(new.clone(), ino);
            self.paths.insert(ino, new);
        }
    }

    /// Number of tracked inodes, including the root.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        PathBuf::from("/").join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preassigned() {
        let table = InodeTable::new();
        assert_eq!(table.inode_of(Path::new("/")), Some(ROOT_INODE));
        assert_eq!(table.path_of(ROOT_INODE), Some(PathBuf::from("/")));
    }

    #[test]
    fn assign_is_stable() {
        let table = InodeTable::new();
        let a = table.assign(Path::new("/foo"));
        let b = table.assign(Path::new("/foo"));
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INODE);
    }

    #[test]
    fn forget_subtree_drops_descendants() {
        let table = InodeTable::new();
        let dir = table.assign(Path::new("/dir"));
        let file = table.assign(Path::new("/dir/file"));
        table.forget_subtree(Path::new("/dir"));
        assert_eq!(table.path_of(dir), None);
        assert_eq!(table.path_of(file), None);
        assert_eq!(table.inode_of(Path::new("/dir/file")), None);
    }

    #[test]
    fn rename_subtree_moves_descendants() {
        let table = InodeTable::new();
        let dir = table.assign(Path::new("/old"));
        let file = table.assign(Path::new("/old/nested/file"));
        table.rename_subtree(Path::new("/old"), Path::new("/new"));
        assert_eq!(table.path_of(dir), Some(PathBuf::from("/new")));
        assert_eq!(table.path_of(file), Some(PathBuf::from("/new/nested/file")));
        assert_eq!(table.inode_of(Path::new("/old")), None);
        assert_eq!(table.inode_of(Path::new("/new/nested/file")), Some(file));
    }
}
