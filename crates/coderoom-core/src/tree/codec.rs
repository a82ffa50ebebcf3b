//! Conversions between flat and nested trees, and path normalization.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{FlatNode, FlatTree, NestedNode, NestedTree};

/// Characters that may not appear in a path segment.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// Why a key was dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Nothing left after trimming and collapsing separators.
    Empty,
    /// A segment holds a character that is unsafe on common filesystems.
    ForbiddenCharacter(char),
    /// A `.` or `..` segment.
    RelativeSegment,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Empty => write!(f, "empty path"),
            DropReason::ForbiddenCharacter(c) => write!(f, "forbidden character {c:?}"),
            DropReason::RelativeSegment => write!(f, "relative path segment"),
        }
    }
}

/// A key that [`normalize_report`] refused to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedKey {
    pub key: String,
    pub reason: DropReason,
}

/// Normalize one path: trim every segment, strip leading/trailing slashes and
/// collapse empty segments.
pub fn normalize_path(key: &str) -> Result<String, DropReason> {
    let segments: Vec<&str> = key
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(DropReason::Empty);
    }

    for segment in &segments {
        if let Some(c) = segment
            .chars()
            .find(|c| c.is_control() || FORBIDDEN.contains(c))
        {
            return Err(DropReason::ForbiddenCharacter(c));
        }
        if *segment == "." || *segment == ".." {
            return Err(DropReason::RelativeSegment);
        }
    }

    Ok(segments.join("/"))
}

/// Normalize every key of `tree`, dropping the ones that cannot be used.
///
/// When two keys normalize to the same path the later one (in key order) wins.
pub fn normalize_keys(tree: &FlatTree) -> FlatTree {
    normalize_report(tree).0
}

/// Like [`normalize_keys`] but also returns what was dropped.
pub fn normalize_report(tree: &FlatTree) -> (FlatTree, Vec<DroppedKey>) {
    let mut out = FlatTree::new();
    let mut dropped = Vec::new();

    for (key, node) in tree {
        match normalize_path(key) {
            Ok(path) => {
                if out.insert(path.clone(), node.clone()).is_some() {
                    debug!(key = %key, path = %path, "normalized key collides, later entry wins");
                }
            }
            Err(reason) => {
                warn!(key = %key, %reason, "dropping file tree key");
                dropped.push(DroppedKey {
                    key: key.clone(),
                    reason,
                });
            }
        }
    }

    (out, dropped)
}

/// Build a nested tree from a flat one.
///
/// Directory keys are placed first so a file never claims a slot a directory
/// needs. Missing intermediate directories are created; a file sitting where a
/// directory must go is replaced by that directory.
pub fn to_nested(flat: &FlatTree) -> NestedTree {
    let mut root = NestedTree::new();

    for path in flat.directories() {
        let segments = split(path);
        if !segments.is_empty() {
            descend(&mut root, &segments, path);
        }
    }

    for (path, contents) in flat.files() {
        let segments = split(path);
        let Some((leaf, parents)) = segments.split_last() else {
            continue;
        };
        let dir = descend(&mut root, parents, path);
        if matches!(dir.get(leaf), Some(NestedNode::Directory(_))) {
            warn!(path = %path, "file collides with a directory, keeping the directory");
            continue;
        }
        dir.insert(*leaf, NestedNode::file(contents));
    }

    root
}

/// Flatten a nested tree into path-keyed form.
pub fn to_flat(nested: &NestedTree) -> FlatTree {
    to_flat_at(nested, "")
}

/// Flatten a nested tree, prefixing every produced key with `prefix`.
pub fn to_flat_at(nested: &NestedTree, prefix: &str) -> FlatTree {
    let mut out = FlatTree::new();
    flatten_into(nested, prefix.trim_matches('/'), &mut out);
    out
}

fn flatten_into(tree: &NestedTree, prefix: &str, out: &mut FlatTree) {
    for (name, node) in tree.iter() {
        let path = join(prefix, name);
        match node {
            NestedNode::File { contents } => {
                out.insert_file(path, contents.clone());
            }
            NestedNode::Directory(children) => {
                flatten_into(children, &path, out);
                out.insert_dir(path);
            }
        }
    }
}

/// Decode one flat node from JSON. Returns `None` for anything that is not a
/// file with string contents or a directory marker.
pub fn node_from_value(value: &Value) -> Option<FlatNode> {
    match decode_node(value)? {
        Decoded::File(contents) => Some(FlatNode::file(contents)),
        Decoded::Directory(_) => Some(FlatNode::Directory),
    }
}

/// Leniently decode a flat tree from JSON.
///
/// Entries that are not valid nodes are dropped with a warning. A directory
/// whose marker is an object of children (`{"directory": {...}}`) has those
/// children flattened under its path.
pub fn flat_from_value(value: &Value) -> FlatTree {
    let mut out = FlatTree::new();
    match value.as_object() {
        Some(map) => collect(map, "", &mut out),
        None if value.is_null() => {}
        None => warn!("file tree is not an object, ignoring it"),
    }
    out
}

enum Decoded<'a> {
    File(&'a str),
    Directory(Option<&'a Map<String, Value>>),
}

fn decode_node(value: &Value) -> Option<Decoded<'_>> {
    let obj = value.as_object()?;
    if let Some(file) = obj.get("file") {
        return file.get("contents")?.as_str().map(Decoded::File);
    }
    match obj.get("directory")? {
        Value::Bool(true) => Some(Decoded::Directory(None)),
        Value::Object(children) => Some(Decoded::Directory(Some(children))),
        _ => None,
    }
}

fn collect(map: &Map<String, Value>, prefix: &str, out: &mut FlatTree) {
    for (key, value) in map {
        let path = join(prefix, key);
        match decode_node(value) {
            Some(Decoded::File(contents)) => {
                out.insert_file(path, contents);
            }
            Some(Decoded::Directory(children)) => {
                if let Some(children) = children {
                    collect(children, &path, out);
                }
                out.insert_dir(path);
            }
            None => warn!(path = %path, "dropping malformed file tree entry"),
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Walk (and create) directories along `segments`, returning the innermost.
fn descend<'a>(root: &'a mut NestedTree, segments: &[&str], path: &str) -> &'a mut NestedTree {
    let mut dir = root;
    for segment in segments {
        let node = dir.entry_or_directory(segment);
        if !node.is_dir() {
            debug!(path = %path, segment = %segment, "converting file to directory");
        }
        dir = node.make_directory();
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(entries: &[(&str, Option<&str>)]) -> FlatTree {
        entries
            .iter()
            .map(|(path, contents)| {
                let node = match contents {
                    Some(c) => FlatNode::file(*c),
                    None => FlatNode::Directory,
                };
                (path.to_string(), node)
            })
            .collect()
    }

    #[test]
    fn test_to_nested_basic() {
        let tree = flat(&[
            ("src", None),
            ("src/index.js", Some("x")),
            ("package.json", Some("{}")),
        ]);
        let nested = to_nested(&tree);

        assert_eq!(nested.len(), 2);
        assert_eq!(nested.lookup("src/index.js"), Some(&NestedNode::file("x")));
        assert_eq!(nested.lookup("package.json"), Some(&NestedNode::file("{}")));
    }

    #[test]
    fn test_to_nested_creates_missing_directories() {
        let tree = flat(&[("a/b/c.txt", Some("deep"))]);
        let nested = to_nested(&tree);

        assert!(nested.lookup("a").unwrap().is_dir());
        assert!(nested.lookup("a/b").unwrap().is_dir());
        assert_eq!(nested.lookup("a/b/c.txt"), Some(&NestedNode::file("deep")));
    }

    #[test]
    fn test_to_nested_directory_beats_file() {
        // "lib" is both a file and the parent of another file.
        let tree = flat(&[("lib", Some("oops")), ("lib/mod.rs", Some("ok"))]);
        let nested = to_nested(&tree);

        assert!(nested.lookup("lib").unwrap().is_dir());
        assert_eq!(nested.lookup("lib/mod.rs"), Some(&NestedNode::file("ok")));
    }

    #[test]
    fn test_to_nested_skips_file_over_implied_directory() {
        // "x/y/z" implies "x/y" is a directory, so the file "x/y" loses.
        let tree = flat(&[("x/y", Some("file")), ("x/y/z", None)]);
        let nested = to_nested(&tree);

        assert!(nested.lookup("x/y").unwrap().is_dir());
        assert!(nested.lookup("x/y/z").unwrap().is_dir());
    }

    #[test]
    fn test_to_flat_round_trip() {
        let tree = flat(&[
            ("src", None),
            ("src/lib", None),
            ("src/lib/a.js", Some("a")),
            ("README.md", Some("# hi")),
        ]);
        assert_eq!(to_flat(&to_nested(&tree)), tree);
    }

    #[test]
    fn test_to_flat_at_prefix() {
        let nested = to_nested(&flat(&[("a.txt", Some("1"))]));
        let out = to_flat_at(&nested, "/base/");
        assert_eq!(out.get("base/a.txt"), Some(&FlatNode::file("1")));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/src//app.js/").unwrap(), "src/app.js");
        assert_eq!(normalize_path(" src / app.js ").unwrap(), "src/app.js");
        assert_eq!(normalize_path("  "), Err(DropReason::Empty));
        assert_eq!(normalize_path("///"), Err(DropReason::Empty));
        assert_eq!(
            normalize_path("bad/name?.js"),
            Err(DropReason::ForbiddenCharacter('?'))
        );
        assert_eq!(
            normalize_path("a\u{0007}b"),
            Err(DropReason::ForbiddenCharacter('\u{0007}'))
        );
        assert_eq!(normalize_path("../etc/passwd"), Err(DropReason::RelativeSegment));
        assert_eq!(normalize_path("a/./b"), Err(DropReason::RelativeSegment));
    }

    #[test]
    fn test_normalize_keys_mixed() {
        let tree = flat(&[
            (" bad/name?.js ", Some("x")),
            (" ok.js ", Some("y")),
        ]);
        let (clean, dropped) = normalize_report(&tree);

        assert_eq!(clean.len(), 1);
        assert_eq!(clean.get("ok.js"), Some(&FlatNode::file("y")));
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key, " bad/name?.js ");
    }

    #[test]
    fn test_normalize_collision_later_key_wins() {
        // "/a.js" sorts before "a.js"
        let tree = flat(&[("/a.js", Some("first")), ("a.js", Some("second"))]);
        let clean = normalize_keys(&tree);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean.get("a.js"), Some(&FlatNode::file("second")));
    }

    #[test]
    fn test_flat_from_value_flattens_nested_directories() {
        let tree = flat_from_value(&json!({
            "src": {"directory": {
                "index.js": {"file": {"contents": "x"}},
                "util": {"directory": {}}
            }},
            "broken": {"file": "nope"}
        }));

        assert_eq!(
            tree,
            flat(&[
                ("src", None),
                ("src/index.js", Some("x")),
                ("src/util", None),
            ])
        );
    }

    #[test]
    fn test_flat_from_value_non_object() {
        assert!(flat_from_value(&json!("text")).is_empty());
        assert!(flat_from_value(&json!(null)).is_empty());
    }
}
