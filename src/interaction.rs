//! Pointer-driven editing.
//!
//! [`Editor`] turns discrete input events into store and viewport
//! mutations. One gesture is active at a time; a pointer release anywhere
//! ends it.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::{Document, GroupPatch, Icon, NodePatch, PALETTE, Point};
use crate::render::{group_label_rect, node_rect};
use crate::store::DiagramStore;
use crate::viewport::{Viewport, ViewportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    #[default]
    Primary,
    Middle,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub fn toggles_selection(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Input in screen coordinates, as delivered by the host UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputEvent {
    PointerDown {
        x: f64,
        y: f64,
        #[serde(default)]
        button: PointerButton,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerUp,
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        modifiers: Modifiers,
    },
    DoubleClick {
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    Wheel {
        delta_y: f64,
    },
    TextInput {
        value: String,
    },
    Key {
        key: String,
    },
    Blur,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Idle,
    Panning,
    /// `grab` is the screen-space distance between the pointer and the
    /// card's top-left corner at drag start.
    DraggingNode { id: String, grab: Point },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum EditTarget {
    Node(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitTarget {
    Node(String),
    GroupLabel(String),
    Canvas,
}

#[derive(Debug, Clone)]
pub struct Editor {
    store: DiagramStore,
    viewport: Viewport,
    gesture: Gesture,
    editing: Option<EditTarget>,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(Document::starter(), ViewportConfig::default())
    }
}

impl Editor {
    pub fn new(document: Document, config: ViewportConfig) -> Self {
        Self {
            store: DiagramStore::new(document),
            viewport: Viewport::new(config),
            gesture: Gesture::Idle,
            editing: None,
        }
    }

    pub fn store(&self) -> &DiagramStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DiagramStore {
        &mut self.store
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn editing(&self) -> Option<&EditTarget> {
        self.editing.as_ref()
    }

    /// Topmost element under a screen point. Later nodes are drawn on top,
    /// and nodes are drawn above groups.
    pub fn hit_test(&self, screen: Point) -> HitTarget {
        let world = self.viewport.screen_to_world(screen);
        if let Some(node) = self
            .store
            .nodes()
            .iter()
            .rev()
            .find(|node| node_rect(node).contains(world))
        {
            return HitTarget::Node(node.id.clone());
        }
        if let Some(group) = self
            .store
            .groups()
            .iter()
            .rev()
            .find(|group| group_label_rect(group).contains(world))
        {
            return HitTarget::GroupLabel(group.id.clone());
        }
        HitTarget::Canvas
    }

    /// Applies one input event. Returns `true` when the document changed
    /// and should be persisted.
    pub fn handle(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::PointerDown { x, y, button } => {
                self.pointer_down(Point::new(x, y), button);
                false
            }
            InputEvent::PointerMove { x, y } => self.pointer_move(Point::new(x, y)),
            InputEvent::PointerUp => {
                self.pointer_up();
                false
            }
            InputEvent::Click { x, y, modifiers } => {
                if modifiers.toggles_selection() {
                    if let HitTarget::Node(id) = self.hit_test(Point::new(x, y)) {
                        self.store.toggle_selection(&id);
                    }
                }
                false
            }
            InputEvent::DoubleClick { x, y } => {
                self.editing = match self.hit_test(Point::new(x, y)) {
                    HitTarget::Node(id) => Some(EditTarget::Node(id)),
                    HitTarget::GroupLabel(id) => Some(EditTarget::Group(id)),
                    HitTarget::Canvas => None,
                };
                false
            }
            InputEvent::Wheel { delta_y } => {
                self.viewport.zoom(delta_y);
                false
            }
            InputEvent::TextInput { value } => self.edit_text(value),
            InputEvent::Key { key } => {
                if key == "Enter" {
                    self.commit_edit();
                }
                false
            }
            InputEvent::Blur => {
                self.commit_edit();
                false
            }
        }
    }

    fn pointer_down(&mut self, screen: Point, button: PointerButton) {
        if button != PointerButton::Primary {
            return;
        }
        self.gesture = match self.hit_test(screen) {
            HitTarget::Node(id) => {
                let Some(node) = self.store.node(&id) else {
                    return;
                };
                let grab = screen - self.viewport.world_to_screen(node.position());
                Gesture::DraggingNode { id, grab }
            }
            HitTarget::Canvas => {
                self.viewport.begin_pan(screen);
                Gesture::Panning
            }
            HitTarget::GroupLabel(_) => Gesture::Idle,
        };
    }

    fn pointer_move(&mut self, screen: Point) -> bool {
        match &self.gesture {
            Gesture::DraggingNode { id, grab } => {
                let world = self.viewport.screen_to_world(screen - *grab);
                let id = id.clone();
                self.store.move_node(&id, world)
            }
            Gesture::Panning => {
                self.viewport.pan_to(screen);
                false
            }
            Gesture::Idle => false,
        }
    }

    fn pointer_up(&mut self) {
        if self.viewport.is_panning() {
            self.viewport.end_pan();
        }
        self.gesture = Gesture::Idle;
    }

    /// Labels update on every keystroke; committing only leaves edit mode.
    fn edit_text(&mut self, value: String) -> bool {
        match &self.editing {
            Some(EditTarget::Node(id)) => {
                let id = id.clone();
                self.store.update_node(
                    &id,
                    NodePatch {
                        text: Some(value),
                        ..NodePatch::default()
                    },
                )
            }
            Some(EditTarget::Group(id)) => {
                let id = id.clone();
                self.store.update_group(
                    &id,
                    GroupPatch {
                        name: Some(value),
                        ..GroupPatch::default()
                    },
                )
            }
            None => false,
        }
    }

    pub fn commit_edit(&mut self) {
        self.editing = None;
    }

    pub fn add_child(&mut self, parent_id: &str) -> String {
        self.store.add_node(Some(parent_id)).id.clone()
    }

    pub fn delete_node(&mut self, id: &str) -> bool {
        if matches!(&self.editing, Some(EditTarget::Node(editing)) if editing == id) {
            self.editing = None;
        }
        if matches!(&self.gesture, Gesture::DraggingNode { id: dragged, .. } if dragged == id) {
            self.gesture = Gesture::Idle;
        }
        self.store.delete_node(id)
    }

    pub fn set_icon(&mut self, id: &str, icon: Icon) -> bool {
        self.store.update_node(
            id,
            NodePatch {
                icon: Some(icon),
                ..NodePatch::default()
            },
        )
    }

    /// Only palette colors are offered by the node control.
    pub fn set_palette_color(&mut self, id: &str, palette_index: usize) -> bool {
        let Some(color) = PALETTE.get(palette_index) else {
            return false;
        };
        self.store.update_node(
            id,
            NodePatch {
                color: Some((*color).to_string()),
                ..NodePatch::default()
            },
        )
    }

    pub fn attach_image(&mut self, id: &str, mime_type: &str, data: &[u8]) -> Result<bool> {
        self.store.attach_image(id, mime_type, data)
    }

    pub fn group_selection(&mut self) -> Option<String> {
        self.store.create_group().map(|group| group.id.clone())
    }

    pub fn import(&mut self, document: Document) {
        self.gesture = Gesture::Idle;
        self.editing = None;
        self.viewport.end_pan();
        self.store.replace_document(document);
    }
}
