use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::{Document, Group, Node};

/// Indented bullet outline of the parent/child forest.
///
/// The id -> children index is built once, so the walk is linear in the
/// number of nodes. Sibling order follows the node list.
pub fn export_outline(nodes: &[Node]) -> String {
    outline_with_reached(nodes).0
}

/// The outline plus the ids of every node it emitted.
pub(crate) fn outline_with_reached(nodes: &[Node]) -> (String, HashSet<&str>) {
    let mut children: HashMap<&str, Vec<&Node>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_id.as_deref() {
            children.entry(parent).or_default().push(node);
        }
    }

    let mut outline = String::new();
    let mut visited: HashSet<&str> = HashSet::new();
    for root in nodes.iter().filter(|node| node.is_root()) {
        let mut stack: Vec<(&Node, usize)> = vec![(root, 0)];
        while let Some((node, depth)) = stack.pop() {
            if !visited.insert(node.id.as_str()) {
                continue;
            }
            outline.push_str(&"  ".repeat(depth));
            outline.push_str("- ");
            outline.push_str(&node.text);
            outline.push('\n');

            if let Some(kids) = children.get(node.id.as_str()) {
                for child in kids.iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
    }
    (outline, visited)
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    nodes: &'a [Node],
    groups: &'a [Group],
}

/// Pretty-printed `{ "nodes": [...], "groups": [...] }`, images inline.
pub fn export_json(nodes: &[Node], groups: &[Group]) -> Result<String> {
    serde_json::to_string_pretty(&DocumentRef { nodes, groups })
        .context("failed to serialize diagram as JSON")
}

/// Parses exported JSON, reporting malformed input as an error.
pub fn try_import_json(text: &str) -> Result<Document> {
    serde_json::from_str(text).context("failed to parse diagram JSON")
}

/// Parses exported JSON. Malformed input yields an empty document rather
/// than an error, so callers cannot tell a failed import from an empty one.
pub fn import_json(text: &str) -> Document {
    match try_import_json(text) {
        Ok(document) => document,
        Err(err) => {
            log::warn!("ignoring malformed diagram JSON: {err:#}");
            Document::default()
        }
    }
}
