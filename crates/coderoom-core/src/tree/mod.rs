//! File-tree representations.
//!
//! A project's files live in a [`FlatTree`]: a map from slash-separated paths to
//! nodes, where a directory is a bare marker and files carry their full text.
//! The sandbox prefers a [`NestedTree`], which mirrors the directory hierarchy.
//! [`codec`] converts between the two and cleans up untrusted keys, [`merge`]
//! folds a partial tree into a full one.

pub mod codec;
pub mod merge;

use std::collections::btree_map::{self, BTreeMap};

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single entry of a [`FlatTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatNode {
    /// A text file and its complete contents.
    File { contents: String },
    /// A directory marker.
    Directory,
}

impl FlatNode {
    /// Create a file node.
    pub fn file(contents: impl Into<String>) -> Self {
        FlatNode::File {
            contents: contents.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FlatNode::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FlatNode::File { .. })
    }

    /// File contents, or `None` for directories.
    pub fn contents(&self) -> Option<&str> {
        match self {
            FlatNode::File { contents } => Some(contents),
            FlatNode::Directory => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum WireNode<'a> {
    File { contents: &'a str },
    Directory(bool),
}

impl Serialize for FlatNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlatNode::File { contents } => WireNode::File { contents }.serialize(serializer),
            FlatNode::Directory => WireNode::Directory(true).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FlatNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        codec::node_from_value(&value)
            .ok_or_else(|| D::Error::custom("expected {\"file\":{\"contents\":..}} or {\"directory\":true}"))
    }
}

/// Path-keyed file tree. Keys iterate in byte order, so a directory always
/// comes before its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTree(BTreeMap<String, FlatNode>);

impl FlatTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning the node previously stored at `path`.
    pub fn insert(&mut self, path: impl Into<String>, node: FlatNode) -> Option<FlatNode> {
        self.0.insert(path.into(), node)
    }

    /// Convenience for inserting a file node.
    pub fn insert_file(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.0.insert(path.into(), FlatNode::file(contents));
    }

    /// Convenience for inserting a directory marker.
    pub fn insert_dir(&mut self, path: impl Into<String>) {
        self.0.insert(path.into(), FlatNode::Directory);
    }

    pub fn get(&self, path: &str) -> Option<&FlatNode> {
        self.0.get(path)
    }

    pub fn remove(&mut self, path: &str) -> Option<FlatNode> {
        self.0.remove(path)
    }

    pub fn contains_key(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FlatNode> {
        self.0.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, FlatNode> {
        self.0.keys()
    }

    /// File entries with their contents.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(path, node)| node.contents().map(|c| (path.as_str(), c)))
    }

    /// Directory paths.
    pub fn directories(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, node)| node.is_dir())
            .map(|(path, _)| path.as_str())
    }

    /// Every key strictly below `path` (i.e. starting with `path/`).
    pub fn descendants<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a String> + 'a {
        let prefix = format!("{path}/");
        self.0
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(move |key| key.starts_with(&prefix))
    }

    pub fn into_inner(self) -> BTreeMap<String, FlatNode> {
        self.0
    }
}

impl From<BTreeMap<String, FlatNode>> for FlatTree {
    fn from(map: BTreeMap<String, FlatNode>) -> Self {
        FlatTree(map)
    }
}

impl FromIterator<(String, FlatNode)> for FlatTree {
    fn from_iter<I: IntoIterator<Item = (String, FlatNode)>>(iter: I) -> Self {
        FlatTree(iter.into_iter().collect())
    }
}

impl IntoIterator for FlatTree {
    type Item = (String, FlatNode);
    type IntoIter = btree_map::IntoIter<String, FlatNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FlatTree {
    type Item = (&'a String, &'a FlatNode);
    type IntoIter = btree_map::Iter<'a, String, FlatNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for FlatTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, node) in &self.0 {
            map.serialize_entry(path, node)?;
        }
        map.end()
    }
}

/// Decoding is lenient: malformed entries are dropped, nested
/// `{"directory": {...}}` children are flattened, and a non-object
/// document decodes to an empty tree.
impl<'de> Deserialize<'de> for FlatTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(codec::flat_from_value(&value))
    }
}

/// A node in a [`NestedTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedNode {
    File { contents: String },
    Directory(NestedTree),
}

impl NestedNode {
    pub fn file(contents: impl Into<String>) -> Self {
        NestedNode::File {
            contents: contents.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NestedNode::Directory(_))
    }

    /// Turn this node into a directory (discarding file contents) and
    /// return its children.
    pub(crate) fn make_directory(&mut self) -> &mut NestedTree {
        if let NestedNode::File { .. } = self {
            *self = NestedNode::Directory(NestedTree::new());
        }
        match self {
            NestedNode::Directory(children) => children,
            NestedNode::File { .. } => unreachable!("node was just converted to a directory"),
        }
    }
}

/// Hierarchical file tree: each level maps a single name to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedTree(BTreeMap<String, NestedNode>);

impl NestedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&NestedNode> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, node: NestedNode) -> Option<NestedNode> {
        self.0.insert(name.into(), node)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, NestedNode> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Follow a slash-separated path down the tree.
    pub fn lookup(&self, path: &str) -> Option<&NestedNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut node = self.0.get(segments.next()?)?;
        for segment in segments {
            match node {
                NestedNode::Directory(children) => node = children.0.get(segment)?,
                NestedNode::File { .. } => return None,
            }
        }
        Some(node)
    }

    pub(crate) fn entry_or_directory(&mut self, name: &str) -> &mut NestedNode {
        self.0
            .entry(name.to_string())
            .or_insert_with(|| NestedNode::Directory(NestedTree::new()))
    }
}
