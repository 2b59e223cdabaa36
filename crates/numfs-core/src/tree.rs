//! In-memory projection of a device listing into a filesystem tree.
//!
//! The tree is immutable once built. Every refresh builds a new tree with
//! [`StorageTree::rebuild`], which carries inode numbers over from the
//! previous tree for every path that still exists, so handles opened
//! against the old tree stay valid. Callers swap the whole tree atomically.
//!
//! Shape: the root directory, optionally one level of group directories,
//! and records as regular files. Group directories only exist while they
//! hold at least one record.

use crate::error::TreeError;
use crate::names;
use crate::record::{DeviceRecord, RecordKey};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// What a tree entry represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Root,
    /// A device grouping, shown as a directory.
    Group { group: String },
    /// A stored record, shown as a regular file.
    Record(DeviceRecord),
}

/// A single node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub ino: u64,
    pub parent: u64,
    /// Escaped filesystem name (empty for the root).
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        !matches!(self.kind, EntryKind::Record(_))
    }

    pub fn record(&self) -> Option<&DeviceRecord> {
        match &self.kind {
            EntryKind::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Size in bytes; zero for directories.
    pub fn size(&self) -> u64 {
        self.record().map_or(0, |r| r.size)
    }

    /// The group new children of this directory are created in.
    fn child_group(&self) -> Option<Option<String>> {
        match &self.kind {
            EntryKind::Root => Some(None),
            EntryKind::Group { group } => Some(Some(group.clone())),
            EntryKind::Record(_) => None,
        }
    }
}

/// Immutable snapshot of the device storage as a filesystem tree.
#[derive(Debug, Clone)]
pub struct StorageTree {
    entries: HashMap<u64, TreeEntry>,
    /// Directory inode -> (filesystem name -> child inode), name-ascending.
    children: HashMap<u64, BTreeMap<String, u64>>,
    by_key: HashMap<RecordKey, u64>,
    groups: HashMap<String, u64>,
    /// Next unused inode; carried across rebuilds so numbers are never reused.
    next_ino: u64,
}

impl StorageTree {
    /// An empty tree with only the root directory.
    pub fn empty() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ROOT_INODE,
            TreeEntry {
                ino: ROOT_INODE,
                parent: ROOT_INODE,
                name: String::new(),
                kind: EntryKind::Root,
            },
        );
        let mut children = HashMap::new();
        children.insert(ROOT_INODE, BTreeMap::new());
        Self {
            entries,
            children,
            by_key: HashMap::new(),
            groups: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        }
    }

    /// Builds a fresh tree from a device listing.
    pub fn new(listing: Vec<DeviceRecord>) -> Self {
        Self::empty().rebuild(listing, &[])
    }

    /// Builds the next tree from a new listing, reusing this tree's inode numbers.
    ///
    /// `moved` lists `(old, new)` keys renamed since this tree was built; the
    /// renamed record keeps its inode.
    #[must_use]
    pub fn rebuild(&self, listing: Vec<DeviceRecord>, moved: &[(RecordKey, RecordKey)]) -> Self {
        let mut next = Self::empty();
        next.next_ino = self.next_ino;

        let mut carried: HashMap<&RecordKey, u64> =
            self.by_key.iter().map(|(key, ino)| (key, *ino)).collect();
        for (old, new) in moved {
            if let Some(ino) = self.by_key.get(old) {
                carried.remove(old);
                carried.insert(new, *ino);
            }
        }

        for record in listing {
            let parent = match &record.key.group {
                None => ROOT_INODE,
                Some(group) => match next.group_ino(group, self) {
                    Some(ino) => ino,
                    None => {
                        warn!(
                            key = %record.key,
                            "group name taken by a top-level record, skipping"
                        );
                        continue;
                    }
                },
            };
            let name = names::escape(&record.key.name);
            if next.child(parent, &name).is_some() {
                warn!(key = %record.key, "duplicate record name in listing, keeping first");
                continue;
            }

            let ino = match carried.get(&record.key) {
                Some(ino) if !next.entries.contains_key(ino) => *ino,
                _ => next.alloc_ino(),
            };
            next.by_key.insert(record.key.clone(), ino);
            next.link(TreeEntry {
                ino,
                parent,
                name,
                kind: EntryKind::Record(record),
            });
        }

        next
    }

    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    /// Returns the inode of a group directory, creating it on first use.
    ///
    /// `None` when a top-level record already holds the group's name.
    fn group_ino(&mut self, group: &str, previous: &StorageTree) -> Option<u64> {
        if let Some(ino) = self.groups.get(group) {
            return Some(*ino);
        }
        let name = names::escape(group);
        if self.child(ROOT_INODE, &name).is_some() {
            return None;
        }
        let ino = match previous.groups.get(group) {
            Some(ino) if !self.entries.contains_key(ino) => *ino,
            _ => self.alloc_ino(),
        };
        self.groups.insert(group.to_string(), ino);
        self.children.insert(ino, BTreeMap::new());
        self.link(TreeEntry {
            ino,
            parent: ROOT_INODE,
            name,
            kind: EntryKind::Group {
                group: group.to_string(),
            },
        });
        Some(ino)
    }

    fn link(&mut self, entry: TreeEntry) {
        self.children
            .entry(entry.parent)
            .or_default()
            .insert(entry.name.clone(), entry.ino);
        self.entries.insert(entry.ino, entry);
    }

    fn child(&self, parent: u64, name: &str) -> Option<&TreeEntry> {
        self.children
            .get(&parent)
            .and_then(|c| c.get(name))
            .and_then(|ino| self.entries.get(ino))
    }

    /// Looks up an entry by inode.
    pub fn get(&self, ino: u64) -> Option<&TreeEntry> {
        self.entries.get(&ino)
    }

    /// Looks up a child of a directory by filesystem name.
    pub fn lookup(&self, parent: u64, name: &str) -> Result<&TreeEntry, TreeError> {
        let dir = self
            .get(parent)
            .ok_or_else(|| TreeError::NotFound(format!("inode {parent}")))?;
        if !dir.is_dir() {
            return Err(TreeError::NotADirectory(dir.name.clone()));
        }
        self.child(parent, name)
            .ok_or_else(|| TreeError::NotFound(name.to_string()))
    }

    /// Lists a directory's children, ordered by name ascending.
    pub fn children(&self, ino: u64) -> Result<Vec<&TreeEntry>, TreeError> {
        let dir = self
            .get(ino)
            .ok_or_else(|| TreeError::NotFound(format!("inode {ino}")))?;
        if !dir.is_dir() {
            return Err(TreeError::NotADirectory(dir.name.clone()));
        }
        Ok(self
            .children
            .get(&ino)
            .map(|c| c.values().filter_map(|i| self.entries.get(i)).collect())
            .unwrap_or_default())
    }

    /// Resolves an absolute filesystem path (`/`, `/main.py`, `/lib/util.py`).
    pub fn resolve(&self, path: &str) -> Result<&TreeEntry, TreeError> {
        let mut current = self
            .get(ROOT_INODE)
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self.lookup(current.ino, component).map_err(|e| match e {
                TreeError::NotFound(_) => TreeError::NotFound(path.to_string()),
                TreeError::NotADirectory(_) => TreeError::NotADirectory(path.to_string()),
                other => other,
            })?;
        }
        Ok(current)
    }

    /// Lists the children of the directory at `path`.
    pub fn list_children(&self, path: &str) -> Result<Vec<&TreeEntry>, TreeError> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            return Err(TreeError::NotADirectory(path.to_string()));
        }
        self.children(dir.ino)
    }

    /// Returns the inode currently assigned to a device record.
    pub fn ino_of(&self, key: &RecordKey) -> Option<u64> {
        self.by_key.get(key).copied()
    }

    /// Computes the device key a new child named `fs_name` of `parent` would have.
    pub fn key_for_child(&self, parent: u64, fs_name: &str) -> Result<RecordKey, TreeError> {
        let dir = self
            .get(parent)
            .ok_or_else(|| TreeError::NotFound(format!("inode {parent}")))?;
        let group = dir
            .child_group()
            .ok_or_else(|| TreeError::NotADirectory(dir.name.clone()))?;
        let name = names::unescape(fs_name)?;
        names::validate(&name)?;
        Ok(RecordKey { group, name })
    }

    /// Number of records in the tree.
    pub fn record_count(&self) -> usize {
        self.by_key.len()
    }

    /// Total bytes used by all records.
    pub fn used_bytes(&self) -> u64 {
        self.entries.values().map(TreeEntry::size).sum()
    }
}

impl Default for StorageTree {
    fn default() -> Self {
        Self::empty()
    }
}


#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    proptest! {
        /// Every listed record resolves back to matching metadata.
        #[test]
        fn rebuild_then_resolve_roundtrip(
            records in prop::collection::btree_map("[a-zA-Z0-9_/%. ]{1,16}", 0u64..40_000, 0..24)
        ) {
            let listing: Vec<_> = records
                .iter()
                .map(|(name, size)| DeviceRecord::new(RecordKey::root(name.clone()), *size))
                .collect();
            let tree = StorageTree::new(listing.clone());

            for record in &listing {
                let path = format!("/{}", names::escape(&record.key.name));
                let entry = tree.resolve(&path).unwrap();
                prop_assert_eq!(entry.record(), Some(record));
            }
            prop_assert_eq!(tree.list_children("/").unwrap().len(), records.len());
        }

        /// Rebuilding with the same listing never changes any inode.
        #[test]
        fn rebuild_is_stable(
            records in prop::collection::btree_map("[a-z]{1,8}\\.py", 0u64..100, 0..16)
        ) {
            let listing: Vec<_> = records
                .iter()
                .map(|(name, size)| DeviceRecord::new(RecordKey::root(name.clone()), *size))
                .collect();
            let first = StorageTree::new(listing.clone());
            let second = first.rebuild(listing, &[]);
            let inodes = |t: &StorageTree| -> BTreeMap<String, u64> {
                t.list_children("/").unwrap().into_iter().map(|e| (e.name.clone(), e.ino)).collect()
            };
            prop_assert_eq!(inodes(&first), inodes(&second));
        }
    }
}
