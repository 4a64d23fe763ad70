//! In-memory diagram document and the mutations every UI action funnels
//! through.
//!
//! The store never touches storage itself. Hosts call [`DiagramStore::serialize`]
//! after mutations and decide where the text goes.

use anyhow::{Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::export::outline_with_reached;
use crate::model::{
    DEFAULT_COLOR, DEFAULT_GROUP_NAME, DEFAULT_NODE_TEXT, Document, Group, GroupPatch, Icon, Node,
    NodePatch, Point,
};
use crate::utils::encode_data_uri;

/// Offset of a new child relative to its parent.
pub const CHILD_OFFSET: Point = Point::new(200.0, 100.0);
/// Where parentless nodes are placed.
pub const DEFAULT_ORIGIN: Point = Point::new(100.0, 100.0);

pub const GROUP_PADDING_LEFT: f64 = 20.0;
pub const GROUP_PADDING_TOP: f64 = 40.0;
/// Extra width/height so the box covers the rendered card of the
/// right-most / bottom-most member.
pub const GROUP_EXTENT_X: f64 = 200.0;
pub const GROUP_EXTENT_Y: f64 = 100.0;

/// Persisted shape. Absent or null lists fall back to the starter
/// document's lists; an explicit `[]` stays empty.
#[derive(Deserialize)]
struct StoredDocument {
    #[serde(default)]
    nodes: Option<Vec<Node>>,
    #[serde(default)]
    groups: Option<Vec<Group>>,
}

#[derive(Debug, Clone, Default)]
pub struct DiagramStore {
    document: Document,
    selection: Vec<String>,
}

impl DiagramStore {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            selection: Vec::new(),
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn nodes(&self) -> &[Node] {
        &self.document.nodes
    }

    pub fn groups(&self) -> &[Group] {
        &self.document.groups
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.iter().any(|selected| selected == id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.document.node(id)
    }

    pub fn add_node(&mut self, parent_id: Option<&str>) -> &Node {
        let position = parent_id
            .and_then(|id| self.document.node(id))
            .map(|parent| parent.position() + CHILD_OFFSET)
            .unwrap_or(DEFAULT_ORIGIN);

        let node = Node {
            id: self.fresh_id(),
            text: DEFAULT_NODE_TEXT.to_string(),
            x: position.x,
            y: position.y,
            icon: Icon::Circle,
            image: None,
            parent_id: parent_id.map(str::to_string),
            color: DEFAULT_COLOR.to_string(),
        };
        log::debug!("adding node {} (parent {:?})", node.id, node.parent_id);
        self.document.nodes.push(node);
        let last = self.document.nodes.len() - 1;
        &self.document.nodes[last]
    }

    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> bool {
        match self.document.node_mut(id) {
            Some(node) => {
                patch.apply(node);
                true
            }
            None => false,
        }
    }

    pub fn move_node(&mut self, id: &str, position: Point) -> bool {
        match self.document.node_mut(id) {
            Some(node) => {
                node.set_position(position);
                true
            }
            None => false,
        }
    }

    /// Removes the node and its direct children. Grandchildren stay behind
    /// with a dangling `parent_id`.
    pub fn delete_node(&mut self, id: &str) -> bool {
        let before = self.document.nodes.len();
        self.document
            .nodes
            .retain(|node| node.id != id && node.parent_id.as_deref() != Some(id));
        self.selection.retain(|selected| selected != id);
        let removed = before - self.document.nodes.len();
        if removed > 0 {
            log::debug!("deleted node {id} ({removed} nodes removed)");
        }
        removed > 0
    }

    pub fn attach_image(&mut self, id: &str, mime_type: &str, data: &[u8]) -> Result<bool> {
        let uri = encode_data_uri(mime_type, data)
            .with_context(|| format!("failed to embed image for node '{id}'"))?;
        Ok(self.update_node(
            id,
            NodePatch {
                image: Some(Some(uri)),
                ..NodePatch::default()
            },
        ))
    }

    pub fn clear_image(&mut self, id: &str) -> bool {
        self.update_node(
            id,
            NodePatch {
                image: Some(None),
                ..NodePatch::default()
            },
        )
    }

    pub fn toggle_selection(&mut self, id: &str) {
        if let Some(index) = self.selection.iter().position(|selected| selected == id) {
            self.selection.remove(index);
        } else {
            self.selection.push(id.to_string());
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Wraps the current selection in a group whose box is computed once
    /// from member positions. Needs at least two selected ids.
    pub fn create_group(&mut self) -> Option<&Group> {
        if self.selection.len() < 2 {
            return None;
        }

        let members: Vec<Point> = self
            .document
            .nodes
            .iter()
            .filter(|node| self.is_selected(&node.id))
            .map(Node::position)
            .collect();
        if members.is_empty() {
            return None;
        }

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for point in &members {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }

        let group = Group {
            id: self.fresh_id(),
            name: DEFAULT_GROUP_NAME.to_string(),
            node_ids: std::mem::take(&mut self.selection),
            x: min_x - GROUP_PADDING_LEFT,
            y: min_y - GROUP_PADDING_TOP,
            width: max_x - min_x + GROUP_EXTENT_X,
            height: max_y - min_y + GROUP_EXTENT_Y,
            color: DEFAULT_COLOR.to_string(),
        };
        log::debug!("created group {} over {} nodes", group.id, group.node_ids.len());
        self.document.groups.push(group);
        self.document.groups.last()
    }

    pub fn update_group(&mut self, id: &str, patch: GroupPatch) -> bool {
        match self.document.group_mut(id) {
            Some(group) => {
                patch.apply(group);
                true
            }
            None => false,
        }
    }

    pub fn delete_group(&mut self, id: &str) -> bool {
        let before = self.document.groups.len();
        self.document.groups.retain(|group| group.id != id);
        before != self.document.groups.len()
    }

    /// Destructive import: the whole document is swapped out, no merge.
    pub fn replace_document(&mut self, document: Document) {
        self.document = document;
        self.selection.clear();
    }

    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(&self.document).context("failed to serialize diagram document")
    }

    pub fn deserialize(text: &str) -> Result<Document> {
        let stored: StoredDocument =
            serde_json::from_str(text).context("failed to parse stored diagram document")?;
        let starter = Document::starter();
        Ok(Document {
            nodes: stored.nodes.unwrap_or(starter.nodes),
            groups: stored.groups.unwrap_or(starter.groups),
        })
    }

    /// Text content of the whole diagram, as fed to reference suggestion.
    ///
    /// The outline comes first; nodes it cannot reach (dangling parents,
    /// parent cycles) follow one per line in list order.
    pub fn full_text(&self) -> String {
        let (mut text, reached) = outline_with_reached(&self.document.nodes);
        for node in &self.document.nodes {
            if !reached.contains(node.id.as_str()) {
                text.push_str(&node.text);
                text.push('\n');
            }
        }
        text
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            let taken = self.document.nodes.iter().any(|node| node.id == id)
                || self.document.groups.iter().any(|group| group.id == id);
            if !taken {
                return id;
            }
        }
    }
}
