///! Graph sorting: collapse duplicate nodes and line up tiles
///!
///! Nodes are sorted by (graph id, osm id) so the sequence becomes a set of
///! tiles with duplicate intersection nodes adjacent. A single forward scan
///! then collapses each duplicate run onto its first node: edges are
///! rewritten to reference the run start, link/non-link incidence is ORed
///! into the canonical node, and intra-tile ids are assigned. Duplicate
///! nodes stay in the sequence (the tile builder walks them to find the
///! edges incident to a canonical node) but no edge references them.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::graph::{Edge, GraphId, Node};
use crate::sequence::Sequence;

/// Sort the node sequence and rewrite edge endpoints. Returns the mapping
/// from tile to the offset of its first node in the sorted sequence.
pub fn sort_graph(nodes_file: &Path, edges_file: &Path) -> Result<BTreeMap<GraphId, usize>> {
    println!("📐 Sorting graph...");

    let mut nodes = Sequence::<Node>::open(nodes_file, true)?;
    nodes.sort_by(|a, b| {
        a.graph_id
            .tile_base()
            .cmp(&b.graph_id.tile_base())
            .then(a.osm.osmid.cmp(&b.osm.osmid))
    })?;

    let mut edges = Sequence::<Edge>::open(edges_file, true)?;
    let mut tiles = BTreeMap::new();

    // Run state: the canonical node being accumulated and where it lives.
    let mut run_index = 0usize;
    let mut acc: Option<Node> = None;

    for node_index in 0..nodes.len() {
        let mut node = nodes.get(node_index)?;

        let new_tile = match &acc {
            None => true,
            Some(a) => a.graph_id.tile_base() != node.graph_id.tile_base(),
        };

        if new_tile || acc.as_ref().map(|a| a.osm.osmid) != Some(node.osm.osmid) {
            // Close the previous run.
            let prev_id = acc.as_ref().map(|a| a.graph_id.id());
            if let Some(prev) = acc.take() {
                nodes.put(run_index, &prev)?;
            }
            let id = if new_tile {
                tiles.insert(node.graph_id.tile_base(), node_index);
                0
            } else {
                prev_id.expect("osmid run without an open tile") + 1
            };
            node.graph_id = node.graph_id.tile_base().with_id(id);
            run_index = node_index;
            rewrite_edges(&node, node_index, &mut edges)?;
            acc = Some(node.clone());
        } else {
            // Duplicate of the run's canonical node.
            let a = acc.as_mut().expect("duplicate without an open run");
            node.graph_id = a.graph_id;
            rewrite_edges(&node, run_index, &mut edges)?;
            if node.is_start() {
                let edge = edges.get(node.start_of as usize)?;
                a.osm
                    .set_link_edge(a.osm.link_edge() || edge.attributes.link());
                a.osm
                    .set_non_link_edge(a.osm.non_link_edge() || !edge.attributes.link());
            }
            if node.is_end() {
                let edge = edges.get(node.end_of as usize)?;
                a.osm
                    .set_link_edge(a.osm.link_edge() || edge.attributes.link());
                a.osm
                    .set_non_link_edge(a.osm.non_link_edge() || !edge.attributes.link());
            }
        }

        nodes.put(node_index, &node)?;
    }

    // Close the final run.
    if let Some(prev) = acc {
        nodes.put(run_index, &prev)?;
    }

    nodes.flush()?;
    edges.flush()?;
    println!("  ✓ {} tiles", tiles.len());
    Ok(tiles)
}

/// Point the edges this node starts/ends at the canonical node index.
fn rewrite_edges(node: &Node, canonical: usize, edges: &mut Sequence<Edge>) -> Result<()> {
    if node.is_start() {
        let index = node.start_of as usize;
        let mut edge = edges.get(index)?;
        edge.source_node = canonical as u32;
        edges.put(index, &edge)?;
    }
    if node.is_end() {
        let index = node.end_of as usize;
        let mut edge = edges.get(index)?;
        edge.target_node = canonical as u32;
        edges.put(index, &edge)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::construct_edges;
    use crate::hierarchy::TileHierarchy;
    use crate::osm::{OsmData, OsmNodeInfo, OsmWay, OsmWayNode, RoadClass};
    use tempfile::TempDir;

    fn way(way_id: u64, node_count: u16) -> OsmWay {
        let mut w = OsmWay {
            way_id,
            node_count,
            road_class: RoadClass::Residential as u8,
            speed: 50,
            ..Default::default()
        };
        w.set_auto_forward(true);
        w.set_auto_backward(true);
        w
    }

    fn way_node(way_index: u32, osmid: u64, lat: f64, lng: f64, intersection: bool) -> OsmWayNode {
        let mut node = OsmNodeInfo {
            osmid,
            lat,
            lng,
            ..Default::default()
        };
        node.set_intersection(intersection);
        OsmWayNode { node, way_index }
    }

    fn build_shared_intersection(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let ways_file = dir.path().join("ways.bin");
        let way_nodes_file = dir.path().join("way_nodes.bin");
        let mut ws = Sequence::<OsmWay>::create(&ways_file).unwrap();
        ws.push(&way(100, 3)).unwrap();
        ws.push(&way(200, 3)).unwrap();
        ws.flush().unwrap();
        let mut wns = Sequence::<OsmWayNode>::create(&way_nodes_file).unwrap();
        for wn in [
            way_node(0, 1, 40.0000, -76.5000, true),
            way_node(0, 2, 40.0010, -76.5000, true),
            way_node(0, 3, 40.0020, -76.5000, true),
            way_node(1, 2, 40.0010, -76.5000, true),
            way_node(1, 4, 40.0010, -76.4990, false),
            way_node(1, 5, 40.0010, -76.4980, true),
        ] {
            wns.push(&wn).unwrap();
        }
        wns.flush().unwrap();

        let osmdata = OsmData::new(ways_file, way_nodes_file);
        let nodes_file = dir.path().join("nodes.bin");
        let edges_file = dir.path().join("edges.bin");
        construct_edges(
            &osmdata,
            &nodes_file,
            &edges_file,
            &TileHierarchy::default(),
            2,
        )
        .unwrap();
        (nodes_file, edges_file)
    }

    #[test]
    fn test_duplicates_collapse_to_canonical() {
        let dir = TempDir::new().unwrap();
        let (nodes_file, edges_file) = build_shared_intersection(&dir);
        let tiles = sort_graph(&nodes_file, &edges_file).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(*tiles.values().next().unwrap(), 0);

        let nodes = Sequence::<Node>::open(&nodes_file, false).unwrap();
        let edges = Sequence::<Edge>::open(&edges_file, false).unwrap();

        // Nodes are non-decreasing under (graph_id, osmid).
        let mut previous: Option<(GraphId, u64)> = None;
        for index in 0..nodes.len() {
            let node = nodes.get(index).unwrap();
            let key = (node.graph_id.tile_base(), node.osm.osmid);
            if let Some(prev) = previous {
                assert!(prev <= key);
            }
            previous = Some(key);
        }

        // Every edge endpoint references the first node of its osmid run.
        for index in 0..edges.len() {
            let edge = edges.get(index).unwrap();
            for endpoint in [edge.source_node as usize, edge.target_node as usize] {
                let node = nodes.get(endpoint).unwrap();
                if endpoint > 0 {
                    let before = nodes.get(endpoint - 1).unwrap();
                    assert_ne!(before.osm.osmid, node.osm.osmid);
                }
            }
        }

        // Both appearances of osm node 2 share one canonical graph id, and
        // the canonical node carries the edges of both ways.
        let mut b_indices = Vec::new();
        for index in 0..nodes.len() {
            if nodes.get(index).unwrap().osm.osmid == 2 {
                b_indices.push(index);
            }
        }
        assert_eq!(b_indices.len(), 2);
        assert_eq!(b_indices[0] + 1, b_indices[1]);
        let canonical = nodes.get(b_indices[0]).unwrap();
        let duplicate = nodes.get(b_indices[1]).unwrap();
        assert_eq!(canonical.graph_id, duplicate.graph_id);
        for index in 0..edges.len() {
            let edge = edges.get(index).unwrap();
            assert_ne!(edge.source_node as usize, b_indices[1]);
            assert_ne!(edge.target_node as usize, b_indices[1]);
        }

        // Intra-tile ids are assigned in osmid order.
        let mut last_id = None;
        let mut last_osmid = None;
        for index in 0..nodes.len() {
            let node = nodes.get(index).unwrap();
            if last_osmid != Some(node.osm.osmid) {
                let expected = last_id.map(|id: u32| id + 1).unwrap_or(0);
                assert_eq!(node.graph_id.id(), expected);
                last_id = Some(node.graph_id.id());
                last_osmid = Some(node.osm.osmid);
            }
        }
    }

    #[test]
    fn test_sort_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (nodes_file, edges_file) = build_shared_intersection(&dir);

        let tiles_first = sort_graph(&nodes_file, &edges_file).unwrap();
        let nodes_once = std::fs::read(&nodes_file).unwrap();
        let edges_once = std::fs::read(&edges_file).unwrap();

        let tiles_second = sort_graph(&nodes_file, &edges_file).unwrap();
        let nodes_twice = std::fs::read(&nodes_file).unwrap();
        let edges_twice = std::fs::read(&edges_file).unwrap();

        assert_eq!(tiles_first, tiles_second);
        assert_eq!(nodes_once, nodes_twice);
        assert_eq!(edges_once, edges_twice);
    }

    #[test]
    fn test_link_incidence_ored_across_run() {
        // A link way and a non-link way meet at osm node 2; the canonical
        // node must carry both incidence flags.
        let dir = TempDir::new().unwrap();
        let ways_file = dir.path().join("ways.bin");
        let way_nodes_file = dir.path().join("way_nodes.bin");
        let mut ws = Sequence::<OsmWay>::create(&ways_file).unwrap();
        ws.push(&way(100, 2)).unwrap();
        let mut link = way(200, 2);
        link.set_link(true);
        link.road_class = RoadClass::Motorway as u8;
        ws.push(&link).unwrap();
        ws.flush().unwrap();
        let mut wns = Sequence::<OsmWayNode>::create(&way_nodes_file).unwrap();
        for wn in [
            way_node(0, 1, 40.0000, -76.5000, true),
            way_node(0, 2, 40.0010, -76.5000, true),
            way_node(1, 2, 40.0010, -76.5000, true),
            way_node(1, 3, 40.0020, -76.4990, true),
        ] {
            wns.push(&wn).unwrap();
        }
        wns.flush().unwrap();

        let osmdata = OsmData::new(ways_file, way_nodes_file);
        let nodes_file = dir.path().join("nodes.bin");
        let edges_file = dir.path().join("edges.bin");
        construct_edges(
            &osmdata,
            &nodes_file,
            &edges_file,
            &TileHierarchy::default(),
            2,
        )
        .unwrap();
        sort_graph(&nodes_file, &edges_file).unwrap();

        let nodes = Sequence::<Node>::open(&nodes_file, false).unwrap();
        let mut found = false;
        for index in 0..nodes.len() {
            let node = nodes.get(index).unwrap();
            if node.osm.osmid == 2 {
                assert!(node.osm.link_edge());
                assert!(node.osm.non_link_edge());
                found = true;
                break; // first of the run is the canonical node
            }
        }
        assert!(found);
    }
}
