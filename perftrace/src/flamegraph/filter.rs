use super::{FlameNode, Flamegraph, FlamegraphError};

/// Drops every node shorter than `min_duration` milliseconds, together with
/// its subtree.
pub fn filter_by_duration(graph: &Flamegraph, min_duration: f64) -> Result<Flamegraph, FlamegraphError> {
    let root = prune(&graph.root, min_duration)
        .ok_or(FlamegraphError::EmptyAfterFilter{ min_duration })?;
    Ok(Flamegraph::from_root(root, graph.total_duration, graph.trace_count, graph.trace_id))
}

fn prune(node: &FlameNode, min_duration: f64) -> Option<FlameNode> {
    if node.value < min_duration { return None }
    Some(FlameNode{
        id: node.id,
        name: node.name.clone(),
        value: node.value,
        start: node.start,
        end: node.end,
        percentage: node.percentage,
        color: node.color,
        metadata: node.metadata.clone(),
        aggregate: node.aggregate,
        children: node.children.iter().filter_map(|c| prune(c, min_duration)).collect(),
    })
}
