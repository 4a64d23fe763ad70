pub mod export;
pub mod interaction;
pub mod model;
pub mod references;
pub mod render;
#[cfg(feature = "server")]
pub mod serve;
pub mod storage;
pub mod store;
pub mod utils;
pub mod viewport;

pub use export::{export_json, export_outline, import_json, try_import_json};
pub use interaction::{Editor, InputEvent};
pub use model::{Document, Group, GroupPatch, Icon, Node, NodePatch, Point};
#[cfg(feature = "png")]
pub use render::render_png;
pub use render::{RenderOptions, fit_document, render_svg};
pub use store::DiagramStore;
pub use viewport::{Viewport, ViewportConfig};
