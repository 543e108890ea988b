use super::{FlameNode, Flamegraph};
use std::fmt::Write;

/// Frames narrower than this are drawn without a text label.
pub const LABEL_MIN_WIDTH: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRect<'g> {
    pub node: &'g FlameNode,
    pub depth: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FrameRect<'_> {
    pub fn has_label(&self) -> bool {
        self.width > LABEL_MIN_WIDTH
    }
}

/// Positions every node of `graph` inside a `width` x `height` canvas, root on
/// the top row.
///
/// A child's width is its share of the parent's value applied to the parent's
/// width; children are placed left to right from the parent's x. When the
/// children's values add up to more than the parent's, they are scaled down to
/// fit.
pub fn layout(graph: &Flamegraph, width: f64, height: f64) -> Vec<FrameRect<'_>> {
    let row_height = height / (graph.max_depth + 1) as f64;
    let mut frames = Vec::with_capacity(graph.node_count());
    place(&graph.root, 0, 0.0, width, row_height, &mut frames);
    frames
}

fn place<'g>(node: &'g FlameNode, depth: usize, x: f64, width: f64, row_height: f64, frames: &mut Vec<FrameRect<'g>>) {
    frames.push(FrameRect{ node, depth, x, y: depth as f64 * row_height, width, height: row_height });

    let basis = node.value.max(node.children_value());
    let scale = if basis > 0.0 { width / basis } else { 0.0 };

    let mut child_x = x;
    for child in &node.children {
        let child_width = child.value * scale;
        place(child, depth + 1, child_x, child_width, row_height, frames);
        child_x += child_width;
    }
}

/// Renders `graph` as a standalone SVG document.
pub fn to_svg(graph: &Flamegraph, width: f64, height: f64) -> String {
    let mut svg = String::new();
    // NOTE writing into a String cannot fail
    let _ = writeln!(svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#);

    for frame in layout(graph, width, height) {
        let node = frame.node;
        let name = escape_xml(&node.name);
        let _ = write!(svg,
            r#"<g class="frame"><title>{name} ({:.2}ms, {:.1}%)</title><rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" stroke="white"/>"#,
            node.value, node.percentage, frame.x, frame.y, frame.width, frame.height, node.color);
        if frame.has_label() {
            let _ = write!(svg,
                r#"<text x="{:.2}" y="{:.2}" font-family="monospace" font-size="12" dominant-baseline="middle">{name}</text>"#,
                frame.x + 4.0, frame.y + frame.height / 2.0);
        }
        svg.push_str("</g>\n");
    }

    svg.push_str("</svg>\n");
    svg
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&'  => escaped.push_str("&amp;"),
            '<'  => escaped.push_str("&lt;"),
            '>'  => escaped.push_str("&gt;"),
            '"'  => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c    => escaped.push(c),
        }
    }
    escaped
}
