///! Edge construction: cut graph edges from the way-node stream
///!
///! Walks way_nodes.bin in way-traversal order. The first way-node of a way
///! opens an edge; every intersection way-node (or the way's last node)
///! terminates the current edge and, mid-way, starts the next one. Signals
///! on intermediate shape points fold into the edge attributes. Every
///! emitted node gets its tile assigned immediately.

use anyhow::Result;
use std::path::Path;

use crate::graph::{Edge, Node, NO_EDGE};
use crate::hierarchy::TileHierarchy;
use crate::osm::{OsmData, OsmWay, OsmWayNode};
use crate::sequence::Sequence;

/// Build the provisional node and edge sequences. Returns the node and
/// edge counts.
pub fn construct_edges(
    osmdata: &OsmData,
    nodes_file: &Path,
    edges_file: &Path,
    hierarchy: &TileHierarchy,
    level: u8,
) -> Result<(usize, usize)> {
    println!("🔨 Constructing graph edges from ways...");

    let ways = Sequence::<OsmWay>::open(&osmdata.ways_file, false)?;
    let way_nodes = Sequence::<OsmWayNode>::open(&osmdata.way_nodes_file, false)?;
    let mut edges = Sequence::<Edge>::create(edges_file)?;
    let mut nodes = Sequence::<Node>::create(nodes_file)?;

    let mut current = 0usize;
    while current < way_nodes.len() {
        // The way and its first node.
        let first_way_node = way_nodes.get(current)?;
        let way = ways.get(first_way_node.way_index as usize)?;
        let last_index = current + way.node_count as usize - 1;

        // The edge starts here.
        let mut edge = Edge::starting_at(
            nodes.len() as u32,
            first_way_node.way_index,
            current as u32,
            &way,
        );

        let mut osm_node = first_way_node.node;
        osm_node.set_link_edge(way.link());
        osm_node.set_non_link_edge(!way.link());
        nodes.push(&Node::new(
            osm_node,
            edges.len() as u32,
            NO_EDGE,
            hierarchy.graph_id(osm_node.lat, osm_node.lng, level),
        ))?;

        // Walk the way until an intersection terminates the edge.
        while current < way_nodes.len() {
            current += 1;
            let way_node = way_nodes.get(current)?;
            edge.attributes.set_llcount(edge.attributes.llcount() + 1);

            if way_node.node.intersection() {
                // The edge ends here.
                edge.target_node = nodes.len() as u32;

                let mut end_node = way_node.node;
                end_node.set_link_edge(way.link());
                end_node.set_non_link_edge(!way.link());
                nodes.push(&Node::new(
                    end_node,
                    NO_EDGE,
                    edges.len() as u32,
                    hierarchy.graph_id(end_node.lat, end_node.lng, level),
                ))?;
                edges.push(&edge)?;

                if current != last_index {
                    // Mid-way intersection: the node just emitted also
                    // starts the next edge of this way.
                    edge = Edge::starting_at(
                        (nodes.len() - 1) as u32,
                        way_node.way_index,
                        current as u32,
                        &way,
                    );
                    let index = nodes.len() - 1;
                    let mut node = nodes.get(index)?;
                    node.start_of = edges.len() as u32;
                    nodes.put(index, &node)?;
                } else {
                    current += 1;
                    break;
                }
            } else if way_node.node.traffic_signal() {
                // Signal on a shape point folds into the edge.
                edge.attributes.set_traffic_signal(true);
                edge.attributes
                    .set_forward_signal(way_node.node.forward_signal());
                edge.attributes
                    .set_backward_signal(way_node.node.backward_signal());
            }
        }
    }

    nodes.flush()?;
    edges.flush()?;
    println!(
        "  ✓ {} edges, {} nodes",
        edges.len(),
        nodes.len()
    );
    Ok((nodes.len(), edges.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{OsmNodeInfo, RoadClass};
    use crate::sequence::Record;
    use tempfile::TempDir;

    fn way(way_id: u64, node_count: u16, road_class: RoadClass) -> OsmWay {
        let mut w = OsmWay {
            way_id,
            node_count,
            road_class: road_class as u8,
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

    fn write_fixture(
        dir: &TempDir,
        ways: &[OsmWay],
        way_nodes: &[OsmWayNode],
    ) -> (OsmData, std::path::PathBuf, std::path::PathBuf) {
        let ways_file = dir.path().join("ways.bin");
        let way_nodes_file = dir.path().join("way_nodes.bin");
        let mut ws = Sequence::<OsmWay>::create(&ways_file).unwrap();
        for w in ways {
            ws.push(w).unwrap();
        }
        ws.flush().unwrap();
        let mut wns = Sequence::<OsmWayNode>::create(&way_nodes_file).unwrap();
        for wn in way_nodes {
            wns.push(wn).unwrap();
        }
        wns.flush().unwrap();
        let osmdata = OsmData::new(ways_file, way_nodes_file);
        (
            osmdata,
            dir.path().join("nodes.bin"),
            dir.path().join("edges.bin"),
        )
    }

    #[test]
    fn test_two_ways_sharing_an_intersection() {
        // Way 1: A-B-C with B an intersection; way 2: B-D-E with D a plain
        // shape point. Expect edges [A,B], [B,C], [B,D,E].
        let dir = TempDir::new().unwrap();
        let ways = vec![
            way(100, 3, RoadClass::Residential),
            way(200, 3, RoadClass::Residential),
        ];
        let way_nodes = vec![
            way_node(0, 1, 40.0000, -76.5000, true),  // A
            way_node(0, 2, 40.0010, -76.5000, true),  // B
            way_node(0, 3, 40.0020, -76.5000, true),  // C
            way_node(1, 2, 40.0010, -76.5000, true),  // B
            way_node(1, 4, 40.0010, -76.4990, false), // D
            way_node(1, 5, 40.0010, -76.4980, true),  // E
        ];
        let (osmdata, nodes_file, edges_file) = write_fixture(&dir, &ways, &way_nodes);

        let hierarchy = TileHierarchy::default();
        let (node_count, edge_count) =
            construct_edges(&osmdata, &nodes_file, &edges_file, &hierarchy, 2).unwrap();
        assert_eq!(edge_count, 3);
        assert_eq!(node_count, 5); // A, B, C, B, E

        let edges = Sequence::<Edge>::open(&edges_file, false).unwrap();
        let nodes = Sequence::<Node>::open(&nodes_file, false).unwrap();

        let e0 = edges.get(0).unwrap();
        assert_eq!((e0.source_node, e0.target_node), (0, 1));
        assert_eq!(e0.attributes.llcount(), 2);
        assert_eq!(e0.ll_index, 0);

        let e1 = edges.get(1).unwrap();
        assert_eq!((e1.source_node, e1.target_node), (1, 2));
        assert_eq!(e1.attributes.llcount(), 2);
        assert_eq!(e1.ll_index, 1);

        let e2 = edges.get(2).unwrap();
        assert_eq!((e2.source_node, e2.target_node), (3, 4));
        assert_eq!(e2.attributes.llcount(), 3);
        assert_eq!(e2.ll_index, 3);

        // B's first appearance ends edge 0 and starts edge 1.
        let b = nodes.get(1).unwrap();
        assert_eq!(b.end_of, 0);
        assert_eq!(b.start_of, 1);
        // B's second appearance starts edge 2 only.
        let b2 = nodes.get(3).unwrap();
        assert_eq!(b2.start_of, 2);
        assert_eq!(b2.end_of, NO_EDGE);
        // Every node was assigned its tile on emission.
        assert_eq!(
            b.graph_id,
            hierarchy.graph_id(40.0010, -76.5000, 2)
        );
    }

    #[test]
    fn test_mid_edge_signal_folds_into_attributes() {
        let dir = TempDir::new().unwrap();
        let ways = vec![way(100, 3, RoadClass::Residential)];
        let mut signal = way_node(0, 2, 40.0010, -76.5000, false);
        signal.node.set_traffic_signal(true);
        signal.node.set_forward_signal(true);
        let way_nodes = vec![
            way_node(0, 1, 40.0000, -76.5000, true),
            signal,
            way_node(0, 3, 40.0020, -76.5000, true),
        ];
        let (osmdata, nodes_file, edges_file) = write_fixture(&dir, &ways, &way_nodes);

        let (node_count, edge_count) = construct_edges(
            &osmdata,
            &nodes_file,
            &edges_file,
            &TileHierarchy::default(),
            2,
        )
        .unwrap();
        assert_eq!(edge_count, 1);
        assert_eq!(node_count, 2);

        let edges = Sequence::<Edge>::open(&edges_file, false).unwrap();
        let edge = edges.get(0).unwrap();
        assert_eq!(edge.attributes.llcount(), 3);
        assert!(edge.attributes.traffic_signal());
        assert!(edge.attributes.forward_signal());
        assert!(!edge.attributes.backward_signal());
    }

    #[test]
    fn test_link_flags_seeded_from_way() {
        let dir = TempDir::new().unwrap();
        let mut link_way = way(100, 2, RoadClass::Motorway);
        link_way.set_link(true);
        let ways = vec![link_way];
        let way_nodes = vec![
            way_node(0, 1, 40.0000, -76.5000, true),
            way_node(0, 2, 40.0010, -76.5000, true),
        ];
        let (osmdata, nodes_file, edges_file) = write_fixture(&dir, &ways, &way_nodes);
        construct_edges(
            &osmdata,
            &nodes_file,
            &edges_file,
            &TileHierarchy::default(),
            2,
        )
        .unwrap();

        let nodes = Sequence::<Node>::open(&nodes_file, false).unwrap();
        for index in 0..nodes.len() {
            let node = nodes.get(index).unwrap();
            assert!(node.osm.link_edge());
            assert!(!node.osm.non_link_edge());
        }
        let edges = Sequence::<Edge>::open(&edges_file, false).unwrap();
        assert!(edges.get(0).unwrap().attributes.link());
        assert_eq!(Edge::SIZE, 24);
    }
}
