use std::collections::HashMap;
use std::fmt::Write as FmtWrite;

use anyhow::Result;
#[cfg(feature = "png")]
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::model::{Document, Group, Node, Point};
use crate::utils::escape_xml;
use crate::viewport::Viewport;

pub const CARD_WIDTH: f64 = 160.0;
const CARD_PADDING: f64 = 12.0;
const CARD_GAP: f64 = 8.0;
const CARD_HEADER_HEIGHT: f64 = 24.0;
const TEXT_LINE_HEIGHT: f64 = 18.0;
const UPLOAD_SLOT_HEIGHT: f64 = 32.0;
const THUMBNAIL_HEIGHT: f64 = 80.0;
const ACCENT_WIDTH: f64 = 4.0;

/// Connector anchors, relative to the card's top-left corner.
pub const PARENT_ANCHOR: Point = Point::new(80.0, 20.0);
pub const CHILD_ANCHOR: Point = Point::new(0.0, 20.0);

pub const GROUP_LABEL_HEIGHT: f64 = 28.0;
const GROUP_LABEL_OFFSET: f64 = 32.0;
const GROUP_LABEL_CHAR_WIDTH: f64 = 7.5;
const GROUP_DELETE_WIDTH: f64 = 28.0;

const FIT_MARGIN: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    fn right(&self) -> f64 {
        self.x + self.width
    }

    fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

fn text_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// World-space box of a rendered node card.
pub fn node_rect(node: &Node) -> Rect {
    let text_height = text_lines(&node.text).len() as f64 * TEXT_LINE_HEIGHT + 10.0;
    let slot = if node.image.is_some() {
        THUMBNAIL_HEIGHT
    } else {
        UPLOAD_SLOT_HEIGHT
    };
    Rect {
        x: node.x,
        y: node.y,
        width: CARD_WIDTH,
        height: CARD_PADDING * 2.0 + CARD_HEADER_HEIGHT + CARD_GAP * 2.0 + text_height + slot,
    }
}

/// The interactive strip above a group box: its name plus delete control.
/// The box interior itself never captures the pointer.
pub fn group_label_rect(group: &Group) -> Rect {
    let chars = group.name.chars().count().max(4) as f64;
    Rect {
        x: group.x,
        y: group.y - GROUP_LABEL_OFFSET,
        width: 16.0 + chars * GROUP_LABEL_CHAR_WIDTH + GROUP_DELETE_WIDTH,
        height: GROUP_LABEL_HEIGHT,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    pub width: f64,
    pub height: f64,
    pub background: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            background: "white".to_string(),
        }
    }
}

/// Canvas size and viewport that show the whole document at scale 1.
pub fn fit_document(document: &Document, background: &str) -> (Viewport, RenderOptions) {
    let mut rects: Vec<Rect> = document.nodes.iter().map(node_rect).collect();
    for group in &document.groups {
        rects.push(Rect {
            x: group.x,
            y: group.y,
            width: group.width,
            height: group.height,
        });
        rects.push(group_label_rect(group));
    }

    let mut viewport = Viewport::default();
    if rects.is_empty() {
        return (
            viewport,
            RenderOptions {
                width: FIT_MARGIN * 2.0,
                height: FIT_MARGIN * 2.0,
                background: background.to_string(),
            },
        );
    }

    let min_x = rects.iter().map(|r| r.x).fold(f64::INFINITY, f64::min);
    let min_y = rects.iter().map(|r| r.y).fold(f64::INFINITY, f64::min);
    let max_x = rects.iter().map(Rect::right).fold(f64::NEG_INFINITY, f64::max);
    let max_y = rects.iter().map(Rect::bottom).fold(f64::NEG_INFINITY, f64::max);

    viewport.offset = Point::new(FIT_MARGIN - min_x, FIT_MARGIN - min_y);
    (
        viewport,
        RenderOptions {
            width: (max_x - min_x + FIT_MARGIN * 2.0).ceil(),
            height: (max_y - min_y + FIT_MARGIN * 2.0).ceil(),
            background: background.to_string(),
        },
    )
}

pub fn render_svg(
    document: &Document,
    selection: &[String],
    viewport: &Viewport,
    options: &RenderOptions,
) -> Result<String> {
    let mut svg = String::new();
    write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}" font-family="Inter, system-ui, sans-serif">
  <rect width="100%" height="100%" fill="{}" />
  <g transform="translate({:.2} {:.2}) scale({:.4})">
"##,
        options.width,
        options.height,
        options.width,
        options.height,
        escape_xml(&options.background),
        viewport.offset.x,
        viewport.offset.y,
        viewport.scale,
    )?;

    let by_id: HashMap<&str, &Node> = document
        .nodes
        .iter()
        .map(|node| (node.id.as_str(), node))
        .collect();

    for node in &document.nodes {
        let Some(parent) = node.parent_id.as_deref().and_then(|id| by_id.get(id)) else {
            continue;
        };
        let from = parent.position() + PARENT_ANCHOR;
        let to = node.position() + CHILD_ANCHOR;
        writeln!(
            svg,
            "    <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#cbd5e1\" stroke-width=\"2\" />",
            from.x, from.y, to.x, to.y
        )?;
    }

    for group in &document.groups {
        write_group(&mut svg, group)?;
    }

    for node in &document.nodes {
        let selected = selection.iter().any(|id| id == &node.id);
        write_node(&mut svg, node, selected)?;
    }

    svg.push_str("  </g>\n</svg>\n");
    Ok(svg)
}

fn write_group(svg: &mut String, group: &Group) -> Result<()> {
    let color = escape_xml(&group.color);
    writeln!(
        svg,
        "    <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"8\" ry=\"8\" fill=\"{color}10\" stroke=\"{color}80\" stroke-width=\"2\" stroke-dasharray=\"8 6\" pointer-events=\"none\" />",
        group.x, group.y, group.width, group.height
    )?;

    let label = group_label_rect(group);
    writeln!(
        svg,
        "    <g class=\"group-label\">\n      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"4\" ry=\"4\" fill=\"white\" />\n      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{color}\" font-size=\"14\" font-weight=\"500\" dominant-baseline=\"middle\">{}</text>\n      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#ef4444\" font-size=\"14\" text-anchor=\"middle\" dominant-baseline=\"middle\">\u{2715}</text>\n    </g>",
        label.x,
        label.y,
        label.width,
        label.height,
        label.x + 8.0,
        label.y + label.height / 2.0,
        escape_xml(&group.name),
        label.right() - GROUP_DELETE_WIDTH / 2.0,
        label.y + label.height / 2.0,
    )?;
    Ok(())
}

fn write_node(svg: &mut String, node: &Node, selected: bool) -> Result<()> {
    let rect = node_rect(node);
    let color = escape_xml(&node.color);
    let (stroke, stroke_width) = if selected {
        ("#6366f1", 3.0)
    } else {
        ("#e2e8f0", 1.0)
    };

    writeln!(svg, "    <g class=\"node\" data-id=\"{}\">", escape_xml(&node.id))?;
    writeln!(
        svg,
        "      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" rx=\"8\" ry=\"8\" fill=\"white\" stroke=\"{stroke}\" stroke-width=\"{stroke_width}\" />",
        rect.x, rect.y, rect.width, rect.height
    )?;
    writeln!(
        svg,
        "      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{ACCENT_WIDTH:.1}\" height=\"{:.1}\" fill=\"{color}\" />",
        rect.x, rect.y, rect.height
    )?;

    let header_y = rect.y + CARD_PADDING + CARD_HEADER_HEIGHT / 2.0;
    writeln!(
        svg,
        "      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{color}\" font-size=\"16\" dominant-baseline=\"middle\"><title>{}</title>{}</text>",
        rect.x + CARD_PADDING + 4.0,
        header_y,
        node.icon.meta().display_name,
        node.icon.glyph()
    )?;
    writeln!(
        svg,
        "      <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#64748b\" font-size=\"14\" text-anchor=\"end\" dominant-baseline=\"middle\">+ \u{2715}</text>",
        rect.right() - CARD_PADDING,
        header_y
    )?;

    let text_top = rect.y + CARD_PADDING + CARD_HEADER_HEIGHT + CARD_GAP;
    let lines = text_lines(&node.text);
    writeln!(
        svg,
        "      <text x=\"{:.1}\" fill=\"#1a202c\" font-size=\"14\" xml:space=\"preserve\">",
        rect.x + CARD_PADDING + 4.0
    )?;
    for (index, line) in lines.iter().enumerate() {
        writeln!(
            svg,
            "        <tspan x=\"{:.1}\" y=\"{:.1}\" dominant-baseline=\"hanging\">{}</tspan>",
            rect.x + CARD_PADDING + 4.0,
            text_top + 5.0 + TEXT_LINE_HEIGHT * index as f64,
            escape_xml(line)
        )?;
    }
    svg.push_str("      </text>\n");

    let slot_top = text_top + lines.len() as f64 * TEXT_LINE_HEIGHT + 10.0 + CARD_GAP;
    let slot_width = CARD_WIDTH - CARD_PADDING * 2.0;
    match &node.image {
        Some(uri) => writeln!(
            svg,
            "      <image x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{THUMBNAIL_HEIGHT:.1}\" preserveAspectRatio=\"xMidYMid slice\" href=\"{}\" />",
            rect.x + CARD_PADDING,
            slot_top,
            slot_width,
            escape_xml(uri)
        )?,
        None => writeln!(
            svg,
            "      <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{UPLOAD_SLOT_HEIGHT:.1}\" rx=\"4\" ry=\"4\" fill=\"none\" stroke=\"#cbd5e1\" stroke-width=\"2\" stroke-dasharray=\"4 3\" />",
            rect.x + CARD_PADDING,
            slot_top,
            slot_width
        )?,
    }

    svg.push_str("    </g>\n");
    Ok(())
}

#[cfg(feature = "png")]
pub fn render_png(
    document: &Document,
    selection: &[String],
    viewport: &Viewport,
    options: &RenderOptions,
    scale: f32,
) -> Result<Vec<u8>> {
    use tiny_skia::{Pixmap, Transform};

    if scale <= 0.0 {
        bail!("scale must be greater than zero when rendering PNG output");
    }

    let svg = render_svg(document, selection, viewport, options)?;

    let mut usvg_options = resvg::usvg::Options::default();
    usvg_options.font_family = "Inter".to_string();
    usvg_options.fontdb_mut().load_system_fonts();

    let tree = resvg::usvg::Tree::from_str(&svg, &usvg_options)
        .map_err(|err| anyhow!("failed to parse generated SVG for PNG export: {err}"))?;

    let size = tree.size().to_int_size();
    let scaled_width = ((size.width() as f32) * scale).ceil();
    let scaled_height = ((size.height() as f32) * scale).ceil();

    if !scaled_width.is_finite() || !scaled_height.is_finite() {
        bail!("scaled dimensions are not finite; try a smaller scale factor");
    }
    if scaled_width < 1.0 || scaled_height < 1.0 {
        bail!("scaled dimensions collapsed below 1px; try a larger scale factor");
    }
    if scaled_width > u32::MAX as f32 || scaled_height > u32::MAX as f32 {
        bail!("scaled dimensions exceed supported limits; try a smaller scale factor");
    }

    let scaled_width = scaled_width as u32;
    let scaled_height = scaled_height as u32;

    let mut pixmap = Pixmap::new(scaled_width, scaled_height).ok_or_else(|| {
        anyhow!("failed to allocate {scaled_width}x{scaled_height} surface for PNG export")
    })?;

    resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|err| anyhow!("failed to encode PNG output: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Icon;

    fn sample() -> Document {
        let mut document = Document::starter();
        document.nodes.push(Node {
            id: "2".into(),
            text: "Child <b>".into(),
            x: 600.0,
            y: 400.0,
            icon: Icon::Star,
            image: Some("data:image/png;base64,iVBORw0KGgo=".into()),
            parent_id: Some("1".into()),
            color: "#ec4899".into(),
        });
        document.nodes.push(Node {
            id: "3".into(),
            text: "Dangling".into(),
            x: 0.0,
            y: 0.0,
            icon: Icon::Square,
            image: None,
            parent_id: Some("gone".into()),
            color: "#10b981".into(),
        });
        document.groups.push(Group {
            id: "g".into(),
            name: "Ideas".into(),
            node_ids: vec!["1".into(), "2".into()],
            x: 380.0,
            y: 260.0,
            width: 400.0,
            height: 200.0,
            color: "#6366f1".into(),
        });
        document
    }

    #[test]
    fn draws_connectors_only_for_existing_parents() {
        let svg = render_svg(
            &sample(),
            &[],
            &Viewport::default(),
            &RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(svg.matches("<line ").count(), 1);
        assert!(svg.contains("x1=\"480.0\" y1=\"320.0\" x2=\"600.0\" y2=\"420.0\""));
    }

    #[test]
    fn draws_cards_groups_and_escapes_text() {
        let svg = render_svg(
            &sample(),
            &["2".to_string()],
            &Viewport::default(),
            &RenderOptions::default(),
        )
        .unwrap();
        assert!(svg.contains("stroke-dasharray=\"8 6\""));
        assert!(svg.contains("fill=\"#6366f110\""));
        assert!(svg.contains("Child &lt;b&gt;"));
        assert!(svg.contains(Icon::Star.glyph()));
        assert!(svg.contains("<title>Star</title>"));
        assert!(svg.contains("href=\"data:image/png;base64,iVBORw0KGgo=\""));
        assert!(svg.contains("stroke-width=\"3\""));
    }

    #[test]
    fn applies_viewport_transform() {
        let mut viewport = Viewport::default();
        viewport.offset = Point::new(15.0, -5.0);
        viewport.scale = 2.0;
        let svg = render_svg(&sample(), &[], &viewport, &RenderOptions::default()).unwrap();
        assert!(svg.contains("translate(15.00 -5.00) scale(2.0000)"));
    }

    #[test]
    fn fit_covers_every_card() {
        let document = sample();
        let (viewport, options) = fit_document(&document, "white");
        for node in &document.nodes {
            let rect = node_rect(node);
            let top_left = viewport.world_to_screen(Point::new(rect.x, rect.y));
            let bottom_right = viewport.world_to_screen(Point::new(rect.right(), rect.bottom()));
            assert!(top_left.x >= 0.0 && top_left.y >= 0.0);
            assert!(bottom_right.x <= options.width && bottom_right.y <= options.height);
        }
    }

    #[test]
    fn image_grows_the_card() {
        let document = sample();
        assert!(node_rect(&document.nodes[1]).height > node_rect(&document.nodes[0]).height);
    }

    #[cfg(feature = "png")]
    #[test]
    fn png_has_png_header() {
        let document = Document::starter();
        let (viewport, options) = fit_document(&document, "white");
        let png = render_png(&document, &[], &viewport, &options, 1.0).unwrap();
        const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
        assert!(png.starts_with(PNG_MAGIC));
    }
}
