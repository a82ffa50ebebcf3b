use std::io::Read;
use std::path::Path;

use coderoom_core::tree::codec::{normalize_report, to_flat, to_nested};
use coderoom_core::{FlatTree, NestedNode, NestedTree};

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

fn read_input(input: Option<&Path>) -> CmdResult<String> {
    match input {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn nest_json(input: &str) -> CmdResult<String> {
    let flat: FlatTree = serde_json::from_str(input)?;
    Ok(serde_json::to_string_pretty(&to_nested(&flat))?)
}

fn flatten_json(input: &str) -> CmdResult<String> {
    let nested: NestedTree = serde_json::from_str(input)?;
    Ok(serde_json::to_string_pretty(&to_flat(&nested))?)
}

/// Normalized tree as JSON plus one `key: reason` line per dropped key.
fn normalize_json(input: &str) -> CmdResult<(String, Vec<String>)> {
    let flat: FlatTree = serde_json::from_str(input)?;
    let (tree, dropped) = normalize_report(&flat);
    let dropped = dropped
        .iter()
        .map(|d| format!("{:?}: {}", d.key, d.reason))
        .collect();
    Ok((serde_json::to_string_pretty(&tree)?, dropped))
}

fn render(tree: &NestedTree, max_depth: usize) -> String {
    let mut out = String::from(".\n");
    render_level(tree, "", 0, max_depth, &mut out);
    out
}

fn render_level(tree: &NestedTree, prefix: &str, depth: usize, max_depth: usize, out: &mut String) {
    if depth >= max_depth {
        return;
    }

    let count = tree.len();
    for (i, (name, node)) in tree.iter().enumerate() {
        let is_last_entry = i == count - 1;
        let connector = if is_last_entry { "└── " } else { "├── " };

        match node {
            NestedNode::Directory(children) => {
                out.push_str(&format!("{}{}{}/\n", prefix, connector, name));
                let new_prefix = format!("{}{}", prefix, if is_last_entry { "    " } else { "│   " });
                render_level(children, &new_prefix, depth + 1, max_depth, out);
            }
            NestedNode::File { contents } => {
                out.push_str(&format!("{}{}{} ({} bytes)\n", prefix, connector, name, contents.len()));
            }
        }
    }
}

pub fn nest(input: Option<&Path>) -> CmdResult<()> {
    println!("{}", nest_json(&read_input(input)?)?);
    Ok(())
}

pub fn flatten(input: Option<&Path>) -> CmdResult<()> {
    println!("{}", flatten_json(&read_input(input)?)?);
    Ok(())
}

pub fn normalize(input: Option<&Path>) -> CmdResult<()> {
    let (tree, dropped) = normalize_json(&read_input(input)?)?;
    for line in &dropped {
        eprintln!("dropped {}", line);
    }
    println!("{}", tree);
    Ok(())
}

pub fn show(input: Option<&Path>, max_depth: Option<usize>) -> CmdResult<()> {
    let flat: FlatTree = serde_json::from_str(&read_input(input)?)?;
    print!("{}", render(&to_nested(&flat), max_depth.unwrap_or(usize::MAX)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLAT: &str = r#"{
        "src": {"directory": true},
        "src/index.js": {"file": {"contents": "run()"}},
        "package.json": {"file": {"contents": "{}"}}
    }"#;

    #[test]
    fn test_nest_then_flatten() {
        let nested = nest_json(FLAT).unwrap();
        let value: serde_json::Value = serde_json::from_str(&nested).unwrap();
        assert_eq!(
            value["src"]["directory"]["index.js"]["file"]["contents"],
            "run()"
        );

        let flat: serde_json::Value = serde_json::from_str(&flatten_json(&nested).unwrap()).unwrap();
        assert_eq!(flat["src/index.js"]["file"]["contents"], "run()");
        assert_eq!(flat["src"]["directory"], true);
    }

    #[test]
    fn test_normalize_reports_drops() {
        let input = r#"{
            "/a//b.txt ": {"file": {"contents": "x"}},
            "../escape": {"file": {"contents": "y"}}
        }"#;
        let (tree, dropped) = normalize_json(input).unwrap();
        let value: serde_json::Value = serde_json::from_str(&tree).unwrap();
        assert!(value.get("a/b.txt").is_some());
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].contains("../escape"));
    }

    #[test]
    fn test_render_listing() {
        let flat: FlatTree = serde_json::from_str(FLAT).unwrap();
        let listing = render(&to_nested(&flat), usize::MAX);
        assert_eq!(
            listing,
            ".\n├── package.json (2 bytes)\n└── src/\n    └── index.js (5 bytes)\n"
        );

        let shallow = render(&to_nested(&flat), 1);
        assert!(!shallow.contains("index.js"));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(nest_json("not json").is_err());
    }
}
