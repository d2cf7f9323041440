///! Link reclassification: ramps and turn channels inherit a road class
///!
///! OSM tags link ways with the class of the road they serve, which says
///! little about the link itself. At every node where links meet non-links,
///! each link edge is expanded along link-only edges until the walk reaches
///! non-link boundary nodes. The boundary classes are sorted ascending and
///! the second one is applied to every link edge traversed: taking the best
///! would over-promote a transition that also touches a lower class road.

use anyhow::Result;
use std::path::Path;

use crate::graph::{best_non_link_class, collect_node_edges, Edge, ExpandSet, Node};
use crate::osm::OsmWay;
use crate::sequence::Sequence;
use crate::stats::{DataQuality, Issue};

/// Expansion iterations allowed per link edge.
const MAX_LINK_EXPANSIONS: u32 = 512;

/// Upgrade link edges to the second-best class found where their link
/// network meets the rest of the graph.
pub fn reclassify_links(
    ways_file: &Path,
    nodes_file: &Path,
    edges_file: &Path,
    stats: &mut DataQuality,
) -> Result<()> {
    println!("🔗 Reclassifying link edges...");

    let ways = Sequence::<OsmWay>::open(ways_file, false)?;
    let nodes = Sequence::<Node>::open(nodes_file, false)?;
    let mut edges = Sequence::<Edge>::open(edges_file, true)?;

    let mut count = 0u64;
    let mut node_index = 0usize;
    while node_index < nodes.len() {
        let bundle = collect_node_edges(&nodes, &edges, node_index)?;
        if bundle.node.osm.link_edge() && bundle.node.osm.non_link_edge() {
            // This node joins the link network to the rest of the graph.
            let root_class = best_non_link_class(&bundle.edges);
            for (start_edge, start_index) in &bundle.edges {
                if !start_edge.attributes.link() {
                    continue;
                }
                count += reclassify_from(
                    start_edge,
                    *start_index,
                    node_index,
                    root_class,
                    &ways,
                    &nodes,
                    &mut edges,
                    stats,
                )?;
            }
        }
        node_index += bundle.node_count;
    }

    stats.reclassified_links += count;
    println!("  ✓ {} link edges reclassified", count);
    Ok(())
}

/// Expand link-only edges out of `start_edge` and apply the second-best
/// boundary class to everything traversed. Returns how many edges changed.
#[allow(clippy::too_many_arguments)]
fn reclassify_from(
    start_edge: &Edge,
    start_index: usize,
    root_node: usize,
    root_class: u32,
    ways: &Sequence<OsmWay>,
    nodes: &Sequence<Node>,
    edges: &mut Sequence<Edge>,
    stats: &mut DataQuality,
) -> Result<u64> {
    let mut boundary_classes = vec![root_class];
    let mut link_edge_indexes = vec![start_index];
    let mut expansion = ExpandSet::new();

    expand(
        start_edge,
        root_node,
        nodes,
        edges,
        &mut boundary_classes,
        &mut expansion,
    )?;

    for _ in 0..MAX_LINK_EXPANSIONS {
        let expand_node = match expansion.pop() {
            Some(index) => index,
            None => {
                // All paths reached the non-link boundary.
                if boundary_classes.len() < 2 {
                    let way_id = ways.get(start_edge.way_index as usize)?.way_id;
                    stats.add_issue(Issue::UnconnectedLinkEdge { way_id });
                    return Ok(0);
                }
                boundary_classes.sort_unstable();
                let class = boundary_classes[1];
                let mut changed = 0u64;
                for index in link_edge_indexes {
                    let mut edge = edges.get(index)?;
                    if class > edge.attributes.importance() {
                        edge.attributes.set_importance(class);
                        edges.put(index, &edge)?;
                        changed += 1;
                    }
                }
                return Ok(changed);
            }
        };

        let expanded = collect_node_edges(nodes, edges, expand_node)?;
        for (edge, edge_index) in &expanded.edges {
            // Never back out over the edge we started from.
            if *edge_index == start_index {
                continue;
            }
            if !edge.attributes.link() {
                // Should be unreachable: only nodes without non-link edges
                // are queued. Record it and keep the walk intact.
                let way_id = ways.get(edge.way_index as usize)?.way_id;
                stats.add_issue(Issue::NonLinkExpansion { way_id });
                continue;
            }
            link_edge_indexes.push(*edge_index);
            expand(
                edge,
                expand_node,
                nodes,
                edges,
                &mut boundary_classes,
                &mut expansion,
            )?;
        }
    }

    // Expansion bound hit; leave the edges alone.
    Ok(0)
}

/// Walk one link edge away from `from_node`. A far node with non-link
/// edges is a boundary and contributes its best non-link class; anything
/// else joins the expand set.
fn expand(
    edge: &Edge,
    from_node: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    boundary_classes: &mut Vec<u32>,
    expansion: &mut ExpandSet,
) -> Result<()> {
    let far = if edge.source_node as usize == from_node {
        edge.target_node as usize
    } else {
        edge.source_node as usize
    };
    let far_node = nodes.get(far)?;
    if far_node.osm.non_link_edge() {
        let bundle = collect_node_edges(nodes, edges, far)?;
        boundary_classes.push(best_non_link_class(&bundle.edges));
    } else {
        expansion.push(far);
    }
    Ok(())
}
