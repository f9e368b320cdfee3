//! # Hierarchy - in-memory group/dataset namespace
//!
//! The container keeps its namespace in memory as a tree of groups whose
//! leaves are dataset entries. The tree is rebuilt by replaying the
//! container's records on open and is updated in place as new records are
//! appended.
//!
//! Paths are `/`-separated and stored without a leading slash. The root group
//! is the empty path. Children are kept in a `BTreeMap`, so every walk visits
//! names in ascending order.

use dataset::DType;
use std::collections::btree_map;
use std::collections::BTreeMap;
use thiserror::Error;

/// Path separator used inside a container.
pub const SEPARATOR: char = '/';

/// Errors raised by namespace operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    /// Empty segments, `.`/`..`, or an empty dataset path.
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// A path component names a dataset where a group was required.
    #[error("{0:?} is a dataset, not a group")]
    NotAGroup(String),

    /// Something already lives at this path.
    #[error("{0:?} already exists")]
    AlreadyExists(String),

    /// The parent group of a dataset does not exist.
    #[error("parent group of {0:?} does not exist")]
    ParentMissing(String),
}

/// Location and layout of a dataset payload inside the container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub dtype: DType,
    pub shape: Vec<u64>,
    /// Absolute file offset of the first payload byte.
    pub offset: u64,
    /// Payload length in bytes.
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group(Group),
    Dataset(DatasetEntry),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    children: BTreeMap<String, Node>,
}

impl Group {
    /// Child names in ascending order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Splits a path into validated segments. Leading and trailing separators
/// are ignored; the empty path (root) yields no segments.
pub fn segments(path: &str) -> Result<Vec<&str>, TreeError> {
    let trimmed = path.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&str> = trimmed.split(SEPARATOR).collect();
    if parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
        return Err(TreeError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

/// Joins a group path and a child name.
pub fn join(group: &str, name: &str) -> String {
    let group = group.trim_matches(SEPARATOR);
    let name = name.trim_matches(SEPARATOR);
    if group.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        group.to_string()
    } else {
        format!("{group}{SEPARATOR}{name}")
    }
}

/// Splits a path into `(parent, leaf)` on the last separator.
///
/// `"a/b/c"` -> `("a/b", "c")`, `"c"` -> `("", "c")`.
pub fn split_leaf(path: &str) -> (&str, &str) {
    let trimmed = path.trim_matches(SEPARATOR);
    match trimmed.rsplit_once(SEPARATOR) {
        Some((head, tail)) => (head, tail),
        None => ("", trimmed),
    }
}

/// The namespace tree of one container.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    root: Group,
    datasets: usize,
    groups: usize,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of datasets anywhere in the tree.
    pub fn dataset_count(&self) -> usize {
        self.datasets
    }

    /// Number of groups, not counting the root.
    pub fn group_count(&self) -> usize {
        self.groups
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Looks up any node. The root is not a node; use [`Hierarchy::root`].
    pub fn get(&self, path: &str) -> Option<&Node> {
        let parts = segments(path).ok()?;
        let (last, parents) = parts.split_last()?;
        let mut group = &self.root;
        for part in parents {
            match group.children.get(*part)? {
                Node::Group(g) => group = g,
                Node::Dataset(_) => return None,
            }
        }
        group.children.get(*last)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn group_exists(&self, path: &str) -> bool {
        match segments(path) {
            Ok(parts) if parts.is_empty() => true,
            Ok(_) => matches!(self.get(path), Some(Node::Group(_))),
            Err(_) => false,
        }
    }

    pub fn group(&self, path: &str) -> Option<&Group> {
        if segments(path).ok()?.is_empty() {
            return Some(&self.root);
        }
        match self.get(path)? {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn dataset(&self, path: &str) -> Option<&DatasetEntry> {
        match self.get(path)? {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    /// Reports whether [`Hierarchy::require_group`] would create anything,
    /// without changing the tree.
    pub fn check_group(&self, path: &str) -> Result<bool, TreeError> {
        let parts = segments(path)?;
        let mut group = &self.root;
        for (depth, part) in parts.iter().enumerate() {
            group = match group.children.get(*part) {
                Some(Node::Group(g)) => g,
                Some(Node::Dataset(_)) => {
                    return Err(TreeError::NotAGroup(parts[..=depth].join("/")));
                }
                None => return Ok(true),
            };
        }
        Ok(false)
    }

    /// Reports whether [`Hierarchy::insert_dataset`] would succeed, without
    /// changing the tree.
    pub fn check_dataset(&self, path: &str) -> Result<(), TreeError> {
        let parts = segments(path)?;
        if parts.is_empty() {
            return Err(TreeError::InvalidPath(path.to_string()));
        }
        let (parent, _) = split_leaf(path);
        if self.check_group(parent)? {
            return Err(TreeError::ParentMissing(path.to_string()));
        }
        if self.contains(path) {
            return Err(TreeError::AlreadyExists(parts.join("/")));
        }
        Ok(())
    }

    /// Creates `path` and any missing ancestors. Returns `true` if at least
    /// one group was created; an existing group is not an error.
    pub fn require_group(&mut self, path: &str) -> Result<bool, TreeError> {
        let parts = segments(path)?;
        let mut created = false;
        let mut group = &mut self.root;
        for (depth, part) in parts.iter().enumerate() {
            let node = group
                .children
                .entry((*part).to_string())
                .or_insert_with(|| {
                    created = true;
                    self.groups += 1;
                    Node::Group(Group::default())
                });
            group = match node {
                Node::Group(g) => g,
                Node::Dataset(_) => {
                    return Err(TreeError::NotAGroup(parts[..=depth].join("/")));
                }
            };
        }
        Ok(created)
    }

    /// Inserts a dataset. The parent group must already exist and nothing may
    /// live at `path` yet.
    pub fn insert_dataset(&mut self, path: &str, entry: DatasetEntry) -> Result<(), TreeError> {
        let parts = segments(path)?;
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(TreeError::InvalidPath(path.to_string()));
        };

        let mut group = &mut self.root;
        for (depth, part) in parents.iter().enumerate() {
            group = match group.children.get_mut(*part) {
                Some(Node::Group(g)) => g,
                Some(Node::Dataset(_)) => {
                    return Err(TreeError::NotAGroup(parts[..=depth].join("/")));
                }
                None => return Err(TreeError::ParentMissing(path.to_string())),
            };
        }

        match group.children.entry((*leaf).to_string()) {
            btree_map::Entry::Occupied(_) => Err(TreeError::AlreadyExists(parts.join("/"))),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(Node::Dataset(entry));
                self.datasets += 1;
                Ok(())
            }
        }
    }

    /// Depth-first walk over every dataset, children in name order.
    pub fn datasets(&self) -> Datasets<'_> {
        Datasets {
            stack: vec![(String::new(), self.root.children.iter())],
        }
    }
}

/// Iterator returned by [`Hierarchy::datasets`].
pub struct Datasets<'a> {
    stack: Vec<(String, btree_map::Iter<'a, String, Node>)>,
}

impl<'a> Iterator for Datasets<'a> {
    type Item = (String, &'a DatasetEntry);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, iter) = self.stack.last_mut()?;
            match iter.next() {
                None => {
                    self.stack.pop();
                }
                Some((name, node)) => {
                    let path = join(prefix, name);
                    match node {
                        Node::Dataset(entry) => return Some((path, entry)),
                        Node::Group(g) => self.stack.push((path, g.children.iter())),
                    }
                }
            }
        }
    }
}
