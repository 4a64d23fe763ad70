use serde::{Deserialize, Serialize};

pub const DEFAULT_COLOR: &str = "#6366f1";

/// Accent colors offered by the per-node palette control.
pub const PALETTE: [&str; 6] = [
    "#6366f1", "#8b5cf6", "#ec4899", "#f59e0b", "#10b981", "#06b6d4",
];

pub const DEFAULT_NODE_TEXT: &str = "New node";
pub const DEFAULT_GROUP_NAME: &str = "New group";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Glyph tag shown in the header of a node card.
///
/// Serialized as its lowercase tag. Tags this build does not know about
/// resolve to [`Icon::Circle`] instead of failing the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Icon {
    Lightbulb,
    #[default]
    Circle,
    Star,
    Square,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconMeta {
    pub icon: Icon,
    pub tag: &'static str,
    pub glyph: &'static str,
    pub display_name: &'static str,
}

pub const ICONS: [IconMeta; 5] = [
    IconMeta {
        icon: Icon::Lightbulb,
        tag: "lightbulb",
        glyph: "\u{1F4A1}",
        display_name: "Lightbulb",
    },
    IconMeta {
        icon: Icon::Circle,
        tag: "circle",
        glyph: "\u{25CF}",
        display_name: "Circle",
    },
    IconMeta {
        icon: Icon::Star,
        tag: "star",
        glyph: "\u{2605}",
        display_name: "Star",
    },
    IconMeta {
        icon: Icon::Square,
        tag: "square",
        glyph: "\u{25A0}",
        display_name: "Square",
    },
    IconMeta {
        icon: Icon::Triangle,
        tag: "triangle",
        glyph: "\u{25B2}",
        display_name: "Triangle",
    },
];

impl Icon {
    pub fn from_tag(tag: &str) -> Self {
        ICONS
            .iter()
            .find(|meta| meta.tag == tag)
            .map(|meta| meta.icon)
            .unwrap_or_default()
    }

    pub fn meta(self) -> &'static IconMeta {
        match self {
            Icon::Lightbulb => &ICONS[0],
            Icon::Circle => &ICONS[1],
            Icon::Star => &ICONS[2],
            Icon::Square => &ICONS[3],
            Icon::Triangle => &ICONS[4],
        }
    }

    pub fn as_str(self) -> &'static str {
        self.meta().tag
    }

    pub fn glyph(self) -> &'static str {
        self.meta().glyph
    }
}

impl From<String> for Icon {
    fn from(tag: String) -> Self {
        Icon::from_tag(&tag)
    }
}

impl From<Icon> for String {
    fn from(icon: Icon) -> Self {
        icon.as_str().to_string()
    }
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub icon: Icon,
    /// Self-contained `data:` URI, never a path or remote URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_color")]
    pub color: String,
}

impl Node {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn set_position(&mut self, point: Point) {
        self.x = point.x;
        self.y = point.y;
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Snapshot of the selection at creation time; not maintained afterwards.
    #[serde(default)]
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default = "default_color")]
    pub color: String,
}

/// Partial node update. Double options distinguish "leave as is" from
/// "clear the field".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub icon: Option<Icon>,
    #[serde(default, deserialize_with = "double_option")]
    pub image: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NodePatch {
    pub fn apply(self, node: &mut Node) {
        if let Some(text) = self.text {
            node.text = text;
        }
        if let Some(x) = self.x {
            node.x = x;
        }
        if let Some(y) = self.y {
            node.y = y;
        }
        if let Some(icon) = self.icon {
            node.icon = icon;
        }
        if let Some(image) = self.image {
            node.image = image;
        }
        if let Some(parent_id) = self.parent_id {
            node.parent_id = parent_id;
        }
        if let Some(color) = self.color {
            node.color = color;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub color: Option<String>,
}

impl GroupPatch {
    pub fn apply(self, group: &mut Group) {
        if let Some(name) = self.name {
            group.name = name;
        }
        if let Some(x) = self.x {
            group.x = x;
        }
        if let Some(y) = self.y {
            group.y = y;
        }
        if let Some(width) = self.width {
            group.width = width;
        }
        if let Some(height) = self.height {
            group.height = height;
        }
        if let Some(color) = self.color {
            group.color = color;
        }
    }
}

// `null` must survive as `Some(None)` so a patch can clear the field.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl Document {
    /// The document a fresh canvas starts from: a single root idea.
    pub fn starter() -> Self {
        Self {
            nodes: vec![Node {
                id: "1".to_string(),
                text: "Main idea".to_string(),
                x: 400.0,
                y: 300.0,
                icon: Icon::Lightbulb,
                image: None,
                parent_id: None,
                color: DEFAULT_COLOR.to_string(),
            }],
            groups: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn group_mut(&mut self, id: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|group| group.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_icon_tags_fall_back_to_circle() {
        let node: Node = serde_json::from_str(
            r##"{"id":"n","text":"t","x":1,"y":2,"icon":"hexagon","image":null,"parentId":null,"color":"#fff"}"##,
        )
        .unwrap();
        assert_eq!(node.icon, Icon::Circle);
        assert_eq!(Icon::from_tag("star"), Icon::Star);
        assert_eq!(Icon::from_tag("STAR"), Icon::Circle);
        assert_eq!(Icon::from_tag(" star"), Icon::Circle);
    }

    #[test]
    fn icon_table_covers_every_variant() {
        for meta in ICONS {
            assert_eq!(meta.icon.meta(), &meta);
            assert_eq!(Icon::from_tag(meta.tag), meta.icon);
        }
    }

    #[test]
    fn node_serializes_with_camel_case_and_nulls() {
        let doc = Document::starter();
        let json = serde_json::to_value(&doc.nodes[0]).unwrap();
        assert_eq!(json["parentId"], serde_json::Value::Null);
        assert_eq!(json["image"], serde_json::Value::Null);
        assert_eq!(json["icon"], "lightbulb");
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let mut node = Document::starter().nodes.remove(0);
        node.image = Some("data:image/png;base64,AA==".to_string());
        node.parent_id = Some("0".to_string());

        let patch: NodePatch =
            serde_json::from_str(r#"{"image":null,"parentId":null,"text":"Renamed"}"#).unwrap();
        patch.apply(&mut node);

        assert_eq!(node.image, None);
        assert_eq!(node.parent_id, None);
        assert_eq!(node.text, "Renamed");
        assert_eq!(node.x, 400.0);
    }

    #[test]
    fn absent_patch_fields_leave_node_untouched() {
        let mut node = Document::starter().nodes.remove(0);
        node.parent_id = Some("0".to_string());
        let patch: NodePatch = serde_json::from_str(r#"{"x":5}"#).unwrap();
        patch.apply(&mut node);
        assert_eq!(node.parent_id.as_deref(), Some("0"));
        assert_eq!(node.x, 5.0);
    }
}
