//! Path-based hierarchical locking.
//!
//! Every node of the mounted tree can carry two independent fair read/write
//! locks: a *path lock* guarding the name-space relationship at that path
//! (existence, the parent-child edge) and a *data lock* guarding the file
//! content. Locks are allocated on first use and reclaimed as soon as nobody
//! holds or waits for them, so the maps stay proportional to the number of
//! paths currently being operated on.
//!
//! Acquiring a path lock read-locks every ancestor first, walking from the
//! root towards the leaf. All threads climb the tree in the same direction,
//! which rules out deadlock between overlapping acquisitions: a writer at
//! `/a/b` excludes everything below `/a/b` (descendant acquisitions block on
//! their ancestor read lock) without ever touching unrelated subtrees.
//!
//! ```
//! use fuse_vfs_adapter::locks::LockManager;
//!
//! let locks = LockManager::new();
//! {
//!     // path is not manipulated, thus read-locking;
//!     // content is manipulated, thus write-locking
//!     let path = locks.lock_path_for_reading("/foo/bar/baz");
//!     let _data = path.lock_data_for_writing();
//!     // write to the file
//! }
//! assert!(!locks.is_path_locked("/foo/bar/baz"));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use tracing::trace;

type SharedLock = Arc<RwLock<()>>;
type LockMap = DashMap<String, SharedLock>;

enum Guard {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// Splits an absolute path into its non-empty components.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Manager for the path-lock and data-lock maps of a single adapter.
///
/// The locks are fair (first-come-first-served, via `parking_lot`'s task-fair
/// policy), so a writer queued at an ancestor is not starved by a stream of
/// later readers.
pub struct LockManager {
    path_locks: LockMap,
    data_locks: LockMap,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            path_locks: DashMap::new(),
            data_locks: DashMap::new(),
        }
    }

    /// Read-locks the path and all of its ancestors.
    ///
    /// # Panics
    ///
    /// Panics if `path` has no components (the root itself cannot be the
    /// target of a path lock).
    pub fn lock_path_for_reading(&self, path: &str) -> PathLock<'_> {
        self.lock_path(path, Mode::Read)
    }

    /// Write-locks the path; its ancestors are read-locked.
    ///
    /// # Panics
    ///
    /// Panics if `path` has no components.
    pub fn lock_path_for_writing(&self, path: &str) -> PathLock<'_> {
        self.lock_path(path, Mode::Write)
    }

    fn lock_path(&self, path: &str, mode: Mode) -> PathLock<'_> {
        let parts = components(path);
        assert!(!parts.is_empty(), "path must not be empty");

        let mut guards = Vec::with_capacity(parts.len() + 1);
        // Ancestors root-to-leaf; the root entry is keyed "".
        for depth in 0..parts.len() {
            let key = parts[..depth].join("/");
            let guard = acquire(&self.path_locks, &key, Mode::Read);
            guards.push((key, guard));
        }
        let target = parts.join("/");
        let guard = acquire(&self.path_locks, &target, mode);
        guards.push((target.clone(), guard));

        PathLock {
            manager: self,
            path: target,
            guards,
        }
    }

    /// Write-locks two paths for a rename, read-locking the union of their
    /// ancestor chains.
    ///
    /// Acquisition follows lexicographic component-sequence order across the
    /// deduplicated union, the same total order every thread uses, so two
    /// crossing renames cannot deadlock. Prefixes sort before their
    /// extensions, which keeps the walk root-to-leaf.
    ///
    /// # Panics
    ///
    /// Panics if either path is empty, if both denote the same path, or if
    /// one is an ancestor of the other (such renames must be rejected before
    /// locking).
    pub fn lock_pair_for_writing(&self, src: &str, dst: &str) -> PathPairLock<'_> {
        let src_parts = components(src);
        let dst_parts = components(dst);
        assert!(!src_parts.is_empty(), "source path must not be empty");
        assert!(!dst_parts.is_empty(), "target path must not be empty");
        assert_ne!(src_parts, dst_parts, "paths must differ");
        assert!(
            !is_prefix(&src_parts, &dst_parts) && !is_prefix(&dst_parts, &src_parts),
            "one path must not be an ancestor of the other"
        );

        let mut plan: BTreeMap<Vec<&str>, Mode> = BTreeMap::new();
        for depth in 0..src_parts.len() {
            plan.insert(src_parts[..depth].to_vec(), Mode::Read);
        }
        for depth in 0..dst_parts.len() {
            plan.entry(dst_parts[..depth].to_vec()).or_insert(Mode::Read);
        }
        plan.insert(src_parts.clone(), Mode::Write);
        plan.insert(dst_parts.clone(), Mode::Write);

        let mut guards = Vec::with_capacity(plan.len());
        for (parts, mode) in &plan {
            let key = parts.join("/");
            let guard = acquire(&self.path_locks, &key, *mode);
            guards.push((key, guard));
        }

        PathPairLock {
            manager: self,
            src: src_parts.join("/"),
            dst: dst_parts.join("/"),
            guards,
        }
    }

    fn lock_data(&self, path: &str, mode: Mode) -> DataLock<'_> {
        let guard = acquire(&self.data_locks, path, mode);
        DataLock {
            manager: self,
            path: path.to_owned(),
            guard: Some(guard),
        }
    }

    /// Whether a path-lock entry currently exists for the path.
    ///
    /// Meant for tests and diagnostics; the answer is stale by the time the
    /// caller observes it.
    pub fn is_path_locked(&self, path: &str) -> bool {
        self.path_locks.contains_key(&components(path).join("/"))
    }

    /// Number of allocated path-lock entries.
    pub fn path_lock_count(&self) -> usize {
        self.path_locks.len()
    }

    /// Number of allocated data-lock entries.
    pub fn data_lock_count(&self) -> usize {
        self.data_locks.len()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_prefix(shorter: &[&str], longer: &[&str]) -> bool {
    shorter.len() <= longer.len() && &longer[..shorter.len()] == shorter
}

fn acquire(map: &LockMap, key: &str, mode: Mode) -> Guard {
    // Clone the Arc out of the entry before blocking; holding the map entry
    // across a lock wait would stall every other operation on its shard.
    let lock: SharedLock = map
        .entry(key.to_owned())
        .or_insert_with(|| {
            trace!(path = key, "allocating lock");
            Arc::new(RwLock::new(()))
        })
        .clone();
    match mode {
        Mode::Read => Guard::Read(lock.read_arc()),
        Mode::Write => Guard::Write(lock.write_arc()),
    }
}

fn release(map: &LockMap, key: &str, guard: Guard) {
    drop(guard);
    // A strong count of 1 proves the lock idle: every holder and every waiter
    // owns a clone of the Arc, and no new clone can be taken from the map
    // while remove_if holds the shard for this key. A late acquirer simply
    // inserts a fresh entry.
    let removed = map.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    if removed.is_some() {
        trace!(path = key, "reclaimed lock");
    }
}

/// Scope handle for a held path lock.
///
/// Releasing drops the target lock first, then the ancestor read locks
/// leaf-to-root, reclaiming each map entry that has fallen idle. Data locks
/// and child locks borrow the handle, so the compiler enforces LIFO release.
pub struct PathLock<'a> {
    manager: &'a LockManager,
    path: String,
    guards: Vec<(String, Guard)>,
}

impl<'a> PathLock<'a> {
    /// Canonical locked path (components joined with `/`, no leading slash).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read-locks a direct child of this path.
    ///
    /// The ancestor chain is already covered by `self`, so only the child
    /// entry is acquired. Used where the parent must be write-locked while
    /// the target is read-locked (create, unlink and friends); re-walking the
    /// chain would self-deadlock on the non-reentrant parent lock.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or contains a path separator.
    pub fn lock_child_for_reading<'s>(&'s self, name: &str) -> PathLock<'s> {
        assert!(
            !name.is_empty() && !name.contains('/'),
            "child name must be a single non-empty component"
        );
        let key = format!("{}/{}", self.path, name);
        let guard = acquire(&self.manager.path_locks, &key, Mode::Read);
        PathLock {
            manager: self.manager,
            path: key.clone(),
            guards: vec![(key, guard)],
        }
    }

    /// Read-locks the data entry for this path.
    pub fn lock_data_for_reading<'s>(&'s self) -> DataLock<'s> {
        self.manager.lock_data(&self.path, Mode::Read)
    }

    /// Write-locks the data entry for this path.
    pub fn lock_data_for_writing<'s>(&'s self) -> DataLock<'s> {
        self.manager.lock_data(&self.path, Mode::Write)
    }
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.guards.pop() {
            release(&self.manager.path_locks, &key, guard);
        }
    }
}

/// Scope handle for a held data lock. Borrows the path lock it was taken
/// under; a data lock can never outlive its path lock.
pub struct DataLock<'a> {
    manager: &'a LockManager,
    path: String,
    guard: Option<Guard>,
}

impl Drop for DataLock<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            release(&self.manager.data_locks, &self.path, guard);
        }
    }
}

/// Scope handle for a rename: write locks on both paths plus the read-locked
/// union of their ancestor chains.
pub struct PathPairLock<'a> {
    manager: &'a LockManager,
    src: String,
    dst: String,
    guards: Vec<(String, Guard)>,
}

impl<'a> PathPairLock<'a> {
    pub fn source(&self) -> &str {
        &self.src
    }

    pub fn target(&self) -> &str {
        &self.dst
    }

    /// Write-locks the data entry of the source path.
    pub fn lock_source_data_for_writing<'s>(&'s self) -> DataLock<'s> {
        self.manager.lock_data(&self.src, Mode::Write)
    }

    /// Write-locks the data entry of the target path.
    pub fn lock_target_data_for_writing<'s>(&'s self) -> DataLock<'s> {
        self.manager.lock_data(&self.dst, Mode::Write)
    }
}

impl Drop for PathPairLock<'_> {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.guards.pop() {
            release(&self.manager.path_locks, &key, guard);
        }
    }
}
