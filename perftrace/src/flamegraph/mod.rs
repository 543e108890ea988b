//! Hierarchical views over finished traces.
//!
//! Every function here is pure: it reads traces or graphs and returns new
//! values without touching any collector.
//!
//! A graph's root stands for the trace itself and carries the trace's
//! `root_span_id`. No span ever has that id; top-level spans, and spans whose
//! parent is not part of the trace, hang directly below it. The root is marked
//! through [`NodeMetadata::virtual_root`].

mod filter;
pub use filter::*;

mod merge;
pub use merge::*;

mod svg;
pub use svg::*;

use crate::{Metadata, Span, SpanId, SpanKind, Status, Trace, TraceId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlamegraphError {
    #[error("cannot merge an empty list of flamegraphs")]
    EmptyInput,
    #[error("no node lasts at least {min_duration}ms")]
    EmptyAfterFilter { min_duration: f64 },
}

pub const ROOT_COLOR: &str = "#95a5a6";

pub const fn kind_color(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::HttpRequest  => "#e74c3c",
        SpanKind::DbQuery      => "#3498db",
        SpanKind::UiRender     => "#2ecc71",
        SpanKind::FunctionCall => "#f39c12",
        SpanKind::Custom       => "#9b59b6",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// `None` for roots
    #[serde(rename = "type")]
    pub kind: Option<SpanKind>,
    pub status: Option<Status>,
    /// span metadata, or trace metadata on a single-trace root
    pub attributes: Metadata,
    pub virtual_root: bool,
}

/// Value range of the nodes folded into one merged node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub node_count: usize,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
}

impl AggregateStats {
    pub(crate) fn from_values(values: &[f64]) -> Self {
        let node_count = values.len();
        if node_count == 0 {
            return Self{ node_count, min_value: 0.0, max_value: 0.0, avg_value: 0.0 }
        }
        Self{
            node_count,
            min_value: values.iter().copied().fold(f64::INFINITY, f64::min),
            max_value: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            avg_value: values.iter().sum::<f64>() / node_count as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlameNode {
    /// `None` on nodes produced by merging
    pub id: Option<SpanId>,
    pub name: String,
    /// milliseconds
    pub value: f64,
    /// offset from the trace start, in milliseconds
    pub start: f64,
    pub end: f64,
    /// share of the graph's total duration
    pub percentage: f64,
    pub color: &'static str,
    pub metadata: NodeMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateStats>,
    pub children: Vec<FlameNode>,
}

impl FlameNode {
    /// Depth of the deepest descendant, 0 for a leaf.
    pub fn depth(&self) -> usize {
        self.children.iter().map(|c| c.depth() + 1).max().unwrap_or(0)
    }

    pub fn children_value(&self) -> f64 {
        self.children.iter().map(|c| c.value).sum()
    }

    /// Pre-order traversal.
    pub fn walk(&self, f: &mut impl FnMut(&FlameNode, usize)) {
        self.walk_at(0, f)
    }

    fn walk_at(&self, depth: usize, f: &mut impl FnMut(&FlameNode, usize)) {
        f(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, f);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flamegraph {
    pub root: FlameNode,
    /// milliseconds; the mean trace duration for merged graphs
    pub total_duration: f64,
    pub max_depth: usize,
    pub trace_count: usize,
    /// set for single-trace graphs
    pub trace_id: Option<TraceId>,
}

impl Flamegraph {
    pub(crate) fn from_root(root: FlameNode, total_duration: f64, trace_count: usize, trace_id: Option<TraceId>) -> Self {
        let max_depth = root.depth();
        Self{ root, total_duration, max_depth, trace_count, trace_id }
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.walk(&mut |_, _| count += 1);
        count
    }
}

pub(crate) fn percentage_of(value: f64, total: f64) -> f64 {
    if total > 0.0 { value / total * 100.0 } else { 0.0 }
}

// ++++++++++++++++++++ generation ++++++++++++++++++++

struct TraceView<'t> {
    trace: &'t Trace,
    total: f64,
    children: HashMap<SpanId, Vec<&'t Span>>,
}

impl<'t> TraceView<'t> {
    fn new(trace: &'t Trace) -> Self {
        let known: HashSet<SpanId> = trace.spans.iter().map(|s| s.id).collect();

        let mut children: HashMap<SpanId, Vec<&Span>> = HashMap::new();
        for span in &trace.spans {
            let parent = span.parent_id
                .filter(|parent| known.contains(parent))
                .unwrap_or(trace.root_span_id);
            children.entry(parent).or_default().push(span);
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|s| s.timing.start.nanos);
        }

        // NOTE an unfinished trace spans up to its latest span end
        let total = trace.duration().unwrap_or_else(|| {
            trace.spans.iter()
                .filter_map(|s| Some(s.timing.end?.millis_since(&trace.timing.start)))
                .fold(0.0, f64::max)
        });

        Self{ trace, total, children }
    }

    /// `window` is the span's clipped `[start, end]`; `value` may be smaller
    /// than the window when overlapping siblings share their parent's time.
    fn span_node(&self, span: &Span, window: (f64, f64), value: f64) -> FlameNode {
        FlameNode{
            id: Some(span.id),
            name: span.name.clone(),
            value,
            start: window.0,
            end: window.1,
            percentage: percentage_of(value, self.total),
            color: kind_color(span.kind),
            metadata: NodeMetadata{
                kind: Some(span.kind),
                status: Some(span.status),
                attributes: span.metadata.clone(),
                virtual_root: false,
            },
            aggregate: None,
            children: self.child_nodes(span.id, window, value),
        }
    }

    /// Children are clipped to the parent's `[lo, hi]` window. Siblings that
    /// run concurrently are scaled down together so their values add up to
    /// at most `budget`, the parent's own value.
    fn child_nodes(&self, parent: SpanId, (lo, hi): (f64, f64), budget: f64) -> Vec<FlameNode> {
        let Some(spans) = self.children.get(&parent) else { return vec![] };

        let windows: Vec<(f64, f64)> = spans.iter()
            .map(|span| {
                let start = span.timing.start.millis_since(&self.trace.timing.start);
                // open spans run until the end of the trace
                let end = span.duration().map_or(self.total, |duration| start + duration);
                let start = start.max(lo).min(hi);
                (start, end.max(start).min(hi))
            })
            .collect();

        let claimed: f64 = windows.iter().map(|(start, end)| end - start).sum();
        let scale = if claimed > budget && claimed > 0.0 { budget / claimed } else { 1.0 };

        spans.iter().zip(windows)
            .map(|(span, window)| self.span_node(span, window, (window.1 - window.0) * scale))
            .collect()
    }

    fn root_node(&self) -> FlameNode {
        FlameNode{
            id: Some(self.trace.root_span_id),
            name: self.trace.name.clone(),
            value: self.total,
            start: 0.0,
            end: self.total,
            percentage: 100.0,
            color: ROOT_COLOR,
            metadata: NodeMetadata{
                kind: None,
                status: Some(self.trace.status),
                attributes: self.trace.metadata.clone(),
                virtual_root: true,
            },
            aggregate: None,
            children: self.child_nodes(self.trace.root_span_id, (0.0, self.total), self.total),
        }
    }
}

/// Builds the tree of one trace. Children are ordered by start time.
pub fn generate_from_trace(trace: &Trace) -> Flamegraph {
    let view = TraceView::new(trace);
    Flamegraph::from_root(view.root_node(), view.total, 1, Some(trace.id))
}

/// Generates a graph per trace and merges them.
pub fn generate_from_traces<'t>(traces: impl IntoIterator<Item = &'t Trace>) -> Result<Flamegraph, FlamegraphError> {
    merge_flamegraphs(traces.into_iter().map(generate_from_trace))
}
