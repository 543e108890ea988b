use super::{percentage_of, AggregateStats, FlameNode, Flamegraph, FlamegraphError, NodeMetadata, ROOT_COLOR};
use crate::Metadata;
use std::collections::HashMap;

pub const MERGED_ROOT_NAME: &str = "merged";

/// Combines several graphs into one aggregate view.
///
/// A single graph comes back unchanged. For more, the result has a new root
/// valued at the mean total duration, and sibling nodes sharing a name are
/// folded into one node per name, recursively. A folded node's `value` is its
/// summed duration divided by the number of inputs, so a node missing from an
/// input counts as zero there and children never outweigh their parent. The
/// per-occurrence spread is kept in [`FlameNode::aggregate`].
pub fn merge_flamegraphs(graphs: impl IntoIterator<Item = Flamegraph>) -> Result<Flamegraph, FlamegraphError> {
    let mut graphs: Vec<Flamegraph> = graphs.into_iter().collect();
    if graphs.len() <= 1 {
        return graphs.pop().ok_or(FlamegraphError::EmptyInput)
    }

    let inputs = graphs.len() as f64;
    let totals: Vec<f64> = graphs.iter().map(|g| g.total_duration).collect();
    let total = totals.iter().sum::<f64>() / inputs;
    let trace_count = graphs.iter().map(|g| g.trace_count).sum();

    let root = FlameNode{
        id: None,
        name: MERGED_ROOT_NAME.to_owned(),
        value: total,
        start: 0.0,
        end: total,
        percentage: 100.0,
        color: ROOT_COLOR,
        metadata: NodeMetadata{ kind: None, status: None, attributes: Metadata::new(), virtual_root: true },
        aggregate: Some(AggregateStats::from_values(&totals)),
        children: merge_siblings(graphs.iter().map(|g| g.root.children.as_slice()), inputs, total),
    };

    #[cfg(feature = "log")]
    log::debug!("merged {} flamegraphs covering {trace_count} traces", graphs.len());

    Ok(Flamegraph::from_root(root, total, trace_count, None))
}

struct Group<'g> {
    first: &'g FlameNode,
    nodes: Vec<&'g FlameNode>,
}

fn merge_siblings<'g>(lists: impl IntoIterator<Item = &'g [FlameNode]>, inputs: f64, total: f64) -> Vec<FlameNode> {
    let mut groups: Vec<Group<'g>> = vec![];
    let mut by_name: HashMap<&'g str, usize> = HashMap::new();

    for node in lists.into_iter().flatten() {
        let at = *by_name.entry(node.name.as_str()).or_insert_with(|| {
            groups.push(Group{ first: node, nodes: vec![] });
            groups.len() - 1
        });
        groups[at].nodes.push(node);
    }

    groups.iter().map(|group| merge_group(group, inputs, total)).collect()
}

fn merge_group(group: &Group<'_>, inputs: f64, total: f64) -> FlameNode {
    let values: Vec<f64> = group.nodes.iter().map(|n| n.value).collect();
    let value = values.iter().sum::<f64>() / inputs;
    let start = group.nodes.iter().map(|n| n.start).fold(f64::INFINITY, f64::min);
    let status = group.first.metadata.status
        .filter(|status| group.nodes.iter().all(|n| n.metadata.status == Some(*status)));

    FlameNode{
        id: None,
        name: group.first.name.clone(),
        value,
        start,
        end: start + value,
        percentage: percentage_of(value, total),
        color: group.first.color,
        metadata: NodeMetadata{
            kind: group.first.metadata.kind,
            status,
            attributes: Metadata::new(),
            virtual_root: false,
        },
        aggregate: Some(AggregateStats::from_values(&values)),
        children: merge_siblings(group.nodes.iter().map(|n| n.children.as_slice()), inputs, total),
    }
}
