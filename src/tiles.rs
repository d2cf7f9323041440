///! Tile building: materialize directed edges and write tiles
///!
///! Workers split the tile index into contiguous chunks. Each worker opens
///! its own read-only handles, walks the canonical nodes of its tiles, and
///! emits a NodeInfo plus one DirectedEdge per incident edge, inferring
///! use, not-through, internal-intersection, link speed, signals, signs,
///! and turn-restriction masks along the way. Output tiles are disjoint,
///! so workers never coordinate; each returns its own statistics.

use anyhow::{anyhow, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use crate::formats::{DirectedEdgeRecord, GraphTileBuilder, NodeInfoRecord};
use crate::graph::{collect_node_edges, Edge, ExpandSet, GraphId, Node, NodeBundle};
use crate::osm::{OsmData, OsmNodeInfo, OsmWay, OsmWayNode, RoadClass, Use};
use crate::sequence::Sequence;
use crate::signs::{create_exit_sign_list, get_ref};
use crate::stats::{DataQuality, Issue};

/// Edges longer than this are never internal to an intersection (meters).
pub const MAX_INTERNAL_LENGTH: f64 = 32.0;

/// Links longer than this are ramps, not turn channels (meters).
pub const MAX_TURN_CHANNEL_LENGTH: f64 = 200.0;

/// Expansion iterations allowed when probing for not-through edges.
const MAX_NO_THRU_TRIES: u32 = 256;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

pub struct TileBuildContext<'a> {
    pub osmdata: &'a OsmData,
    pub nodes_file: &'a Path,
    pub edges_file: &'a Path,
    pub out_dir: &'a Path,
}

/// Build every tile, fanning the tile index out over `concurrency`
/// workers. Statistics merge into `stats`; the first worker error is
/// re-raised after all workers finish.
pub fn build_local_tiles(
    concurrency: usize,
    ctx: &TileBuildContext,
    tiles: &BTreeMap<GraphId, usize>,
    stats: &mut DataQuality,
) -> Result<()> {
    let workers = concurrency.max(1);
    println!(
        "🧱 Building {} tiles with {} workers...",
        tiles.len(),
        workers
    );

    let tile_list: Vec<(GraphId, usize)> = tiles.iter().map(|(id, off)| (*id, *off)).collect();
    let chunks = partition(&tile_list, workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()?;
    let results: Vec<Result<DataQuality>> = pool.install(|| {
        chunks
            .par_iter()
            .enumerate()
            .map(|(worker, chunk)| build_tile_set(ctx, chunk, worker))
            .collect()
    });

    let mut first_error = None;
    for result in results {
        match result {
            Ok(worker_stats) => stats.add_statistics(&worker_stats),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Split `items` into `workers` contiguous chunks; the first
/// `len mod workers` chunks take the ceiling size.
fn partition<T>(items: &[T], workers: usize) -> Vec<&[T]> {
    let floor = items.len() / workers;
    let at_ceiling = items.len() - workers * floor;
    let mut chunks = Vec::with_capacity(workers);
    let mut start = 0;
    for worker in 0..workers {
        let count = if worker < at_ceiling { floor + 1 } else { floor };
        chunks.push(&items[start..start + count]);
        start += count;
    }
    chunks
}

/// Build one worker's chunk of tiles.
fn build_tile_set(
    ctx: &TileBuildContext,
    tiles: &[(GraphId, usize)],
    worker: usize,
) -> Result<DataQuality> {
    // Every worker gets its own handles; nothing here is shared.
    let ways = Sequence::<OsmWay>::open(&ctx.osmdata.ways_file, false)?;
    let way_nodes = Sequence::<OsmWayNode>::open(&ctx.osmdata.way_nodes_file, false)?;
    let edges = Sequence::<Edge>::open(ctx.edges_file, false)?;
    let nodes = Sequence::<Node>::open(ctx.nodes_file, false)?;

    let mut stats = DataQuality::default();
    for (tile_id, first_node) in tiles {
        let mut tile = GraphTileBuilder::new(*tile_id);
        let mut node_itr = *first_node;
        while node_itr < nodes.len() {
            let bundle = collect_node_edges(&nodes, &edges, node_itr)?;
            if bundle.node.graph_id.tile_base() != *tile_id {
                break;
            }
            build_node(
                ctx, &bundle, node_itr, &ways, &way_nodes, &nodes, &edges, &mut tile, &mut stats,
            )?;
            node_itr += bundle.node_count;
        }
        let bytes = tile.store(ctx.out_dir)?;
        println!("  worker {} wrote tile {} ({} bytes)", worker, tile_id, bytes);
    }
    Ok(stats)
}

/// Emit the NodeInfo and directed edges for one canonical node.
#[allow(clippy::too_many_arguments)]
fn build_node(
    ctx: &TileBuildContext,
    bundle: &NodeBundle,
    node_index: usize,
    ways: &Sequence<OsmWay>,
    way_nodes: &Sequence<OsmWayNode>,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    tile: &mut GraphTileBuilder,
    stats: &mut DataQuality,
) -> Result<()> {
    let node = &bundle.node;
    let first_edge_index = tile.directed_edge_count();

    let mut driveable = 0u8;
    let mut best_class = RoadClass::ServiceOther as u8;
    let mut directed = Vec::with_capacity(bundle.edges.len());
    // end node -> (way id, length), for duplicate-way detection
    let mut seen_ends: HashMap<u32, (u64, u32)> = HashMap::new();

    for (n, (edge, edge_index)) in bundle.edges.iter().enumerate() {
        let way = ways.get(edge.way_index as usize)?;

        let shape = edge_shape(way_nodes, edge.ll_index as usize, edge.attributes.llcount() as usize)?;
        let length = (polyline_length(&shape) + 0.5) as u32;

        // Orientation between the two canonical nodes.
        let forward = edge.source_node as usize == node_index;
        let (source, target) = if forward {
            (edge.source_node as usize, edge.target_node as usize)
        } else {
            (edge.target_node as usize, edge.source_node as usize)
        };

        if edge.attributes.driveable_forward() || edge.attributes.driveable_reverse() {
            driveable += 1;
        }

        match seen_ends.get(&(target as u32)) {
            Some((other_way, other_length)) => {
                if *other_length == length && *other_way != way.way_id {
                    stats.add_issue(Issue::DuplicateWay {
                        way_id1: *other_way,
                        way_id2: way.way_id,
                    });
                }
            }
            None => {
                seen_ends.insert(target as u32, (way.way_id, length));
            }
        }

        // Not-through probing is only worth it on low importance edges.
        let mut not_thru = false;
        if edge.attributes.importance() > RoadClass::Tertiary as u32 {
            not_thru = is_no_through_edge(source, target, *edge_index, nodes, edges)?;
            if not_thru {
                stats.not_thru_count += 1;
            }
        }

        let internal = is_intersection_internal(
            source,
            target,
            *edge_index,
            way.way_id,
            length as f64,
            nodes,
            edges,
            ways,
        )?;
        if internal {
            stats.internal_count += 1;
        }

        let rc = RoadClass::from_repr(edge.attributes.importance() as u8);
        let mut speed = way.speed as f32;
        let mut edge_use = way.way_use();
        if way.link() {
            edge_use = link_use(
                *edge_index,
                rc,
                length as f64,
                edge.source_node as usize,
                edge.target_node as usize,
                nodes,
                edges,
            )?;
            if edge_use == Use::TurnChannel {
                stats.turn_channel_count += 1;
            }
            speed = link_speed(edge_use, rc, speed);
        }

        // A low-class road edge looping back onto its own node is a
        // cul-de-sac.
        if edge_use == Use::Road && source == target && rc > RoadClass::Tertiary {
            edge_use = Use::Culdesac;
            stats.culdesac_count += 1;
        }

        let restrictions =
            simple_turn_restriction(way.way_id, target, nodes, edges, ways, ctx.osmdata, stats)?;
        if restrictions != 0 {
            stats.simple_restrictions += 1;
        }

        let has_signal = edge_has_signal(&node.osm, &way, edge, forward);

        let forward_access = if forward {
            way.auto_forward()
        } else {
            way.auto_backward()
        };
        let reverse_access = if forward {
            way.auto_backward()
        } else {
            way.auto_forward()
        };

        // Relation refs may refine the way's ref before naming.
        let mut way_ref = String::new();
        if let Some(relation_ref) = ctx.osmdata.way_ref.get(&way.way_id) {
            if way.ref_index != 0 {
                way_ref = get_ref(ctx.osmdata.ref_table.name(way.ref_index), relation_ref);
            }
        }
        let names = way_names(&way, &way_ref, ctx.osmdata);
        let edge_info_offset = tile.add_edge_info(*edge_index, way.way_id, &shape, &names);

        let mut record = DirectedEdgeRecord {
            end_node: nodes.get(target)?.graph_id.value(),
            edge_info_offset,
            restrictions,
            length,
            speed: speed.round() as u8,
            classification: rc as u8,
            use_code: edge_use as u8,
            local_edge_index: n as u8,
            ..Default::default()
        };
        record.set_forward(forward);
        record.set_not_thru(not_thru);
        record.set_internal(internal);
        record.set_forward_access(forward_access);
        record.set_reverse_access(reverse_access);
        record.set_traffic_signal(has_signal);

        // Exit signs attach to accessible ramps only.
        if forward_access && edge_use == Use::Ramp {
            let exits = create_exit_sign_list(&node.osm, &way, ctx.osmdata);
            if !exits.is_empty() {
                let tile_edge_index = first_edge_index + directed.len() as u32;
                tile.add_signs(tile_edge_index, &exits);
                record.set_exit_sign(true);
            }
        }

        best_class = best_class.min(rc as u8);
        directed.push(record);
    }

    let mut info = NodeInfoRecord {
        lat: node.osm.lat,
        lng: node.osm.lng,
        edge_index: first_edge_index,
        edge_count: bundle.edges.len().min(u8::MAX as usize) as u8,
        driveable,
        best_class,
        access: node.osm.access,
        node_type: node.osm.node_type,
        ..Default::default()
    };
    info.set_end_intersection(bundle.edges.len() == 1);
    info.set_traffic_signal(node.osm.traffic_signal());

    stats.count_node_degree(bundle.edges.len());
    tile.add_node_and_directed_edges(info, directed);
    Ok(())
}

/// Materialize an edge's shape from the way-node stream.
fn edge_shape(
    way_nodes: &Sequence<OsmWayNode>,
    ll_index: usize,
    llcount: usize,
) -> Result<Vec<(f64, f64)>> {
    let mut shape = Vec::with_capacity(llcount);
    let mut reader = way_nodes.reader_at(ll_index);
    for _ in 0..llcount {
        let way_node = reader
            .next()?
            .ok_or_else(|| anyhow!("edge shape runs past the way-node sequence"))?;
        shape.push((way_node.node.lat, way_node.node.lng));
    }
    Ok(shape)
}

fn haversine(a: (f64, f64), b: (f64, f64)) -> f64 {
    let lat1 = a.0.to_radians();
    let lat2 = b.0.to_radians();
    let dlat = (b.0 - a.0).to_radians();
    let dlng = (b.1 - a.1).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle length of a polyline in meters.
pub fn polyline_length(shape: &[(f64, f64)]) -> f64 {
    shape.windows(2).map(|w| haversine(w[0], w[1])).sum()
}

/// True when the region entered through this edge has no other exit at
/// tertiary class or better. Expands from the far end, never back across
/// the starting edge; reaching the start node or any tertiary-or-better
/// edge proves the region is a thoroughfare, exhausting the expand set
/// proves it is not.
fn is_no_through_edge(
    start_node: usize,
    end_node: usize,
    start_edge_index: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
) -> Result<bool> {
    let mut expansion = ExpandSet::new();
    expansion.push(end_node);

    for _ in 0..MAX_NO_THRU_TRIES {
        let node_index = match expansion.pop() {
            Some(index) => index,
            None => return Ok(true),
        };
        let bundle = collect_node_edges(nodes, edges, node_index)?;
        for (edge, edge_index) in &bundle.edges {
            if *edge_index == start_edge_index {
                continue;
            }
            let next = if edge.source_node as usize == node_index {
                edge.target_node as usize
            } else {
                edge.source_node as usize
            };
            if next == start_node || edge.attributes.importance() <= RoadClass::Tertiary as u32 {
                return Ok(false);
            }
            expansion.push(next);
        }
    }
    Ok(false)
}

/// Does this node have a non-link oneway inbound and a non-link oneway
/// outbound edge, ignoring `edge_index` and anything on `way_id`?
fn oneway_pair_edges_exist(
    bundle: &NodeBundle,
    node_index: usize,
    edge_index: usize,
    way_id: u64,
    ways: &Sequence<OsmWay>,
) -> Result<bool> {
    let mut inbound = false;
    let mut outbound = false;
    for (edge, index) in &bundle.edges {
        if *index == edge_index {
            continue;
        }
        let way = ways.get(edge.way_index as usize)?;
        if way.way_id == way_id || edge.attributes.link() {
            continue;
        }

        let forward = edge.source_node as usize == node_index;
        if (forward && !way.auto_forward() && way.auto_backward())
            || (!forward && way.auto_forward() && !way.auto_backward())
        {
            inbound = true;
        }
        if (forward && way.auto_forward() && !way.auto_backward())
            || (!forward && !way.auto_forward() && way.auto_backward())
        {
            outbound = true;
        }
    }
    Ok(inbound && outbound)
}

/// A short edge joining two one-way pairs inside a single mapped
/// intersection.
#[allow(clippy::too_many_arguments)]
fn is_intersection_internal(
    start_node: usize,
    end_node: usize,
    edge_index: usize,
    way_id: u64,
    length: f64,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    ways: &Sequence<OsmWay>,
) -> Result<bool> {
    if length > MAX_INTERNAL_LENGTH {
        return Ok(false);
    }
    let start_bundle = collect_node_edges(nodes, edges, start_node)?;
    if start_bundle.edges.len() < 3 {
        return Ok(false);
    }
    let end_bundle = collect_node_edges(nodes, edges, end_node)?;
    if end_bundle.edges.len() < 3 {
        return Ok(false);
    }
    Ok(
        oneway_pair_edges_exist(&start_bundle, start_node, edge_index, way_id, ways)?
            && oneway_pair_edges_exist(&end_bundle, end_node, edge_index, way_id, ways)?,
    )
}

/// Classify a link edge as ramp or turn channel. Motorway/trunk links and
/// long links are ramps. A turn channel connects two nodes that both touch
/// the non-link network and has no sibling link at either end.
fn link_use(
    edge_index: usize,
    rc: RoadClass,
    length: f64,
    start_node: usize,
    end_node: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
) -> Result<Use> {
    if rc == RoadClass::Motorway || rc == RoadClass::Trunk || length > MAX_TURN_CHANNEL_LENGTH {
        return Ok(Use::Ramp);
    }

    let start_bundle = collect_node_edges(nodes, edges, start_node)?;
    let end_bundle = collect_node_edges(nodes, edges, end_node)?;
    if !start_bundle.node.osm.non_link_edge() || !end_bundle.node.osm.non_link_edge() {
        return Ok(Use::Ramp);
    }
    // Another link at either end points at a split or fork, so call it a
    // ramp after all.
    for (edge, index) in start_bundle.edges.iter().chain(end_bundle.edges.iter()) {
        if *index != edge_index && edge.attributes.link() {
            return Ok(Use::Ramp);
        }
    }
    Ok(Use::TurnChannel)
}

/// Speed for a reclassified link edge, km/h.
fn link_speed(edge_use: Use, rc: RoadClass, speed: f32) -> f32 {
    match edge_use {
        Use::TurnChannel => speed * 0.9,
        Use::Ramp => match rc {
            RoadClass::Motorway => 95.0,
            RoadClass::Trunk => 80.0,
            RoadClass::Primary => 65.0,
            RoadClass::Secondary => 50.0,
            RoadClass::Tertiary => 40.0,
            RoadClass::Unclassified => 35.0,
            _ => 25.0,
        },
        _ => speed,
    }
}

/// Signal at an intersection node applies against the edge's orientation;
/// a signal folded into the edge applies when its direction matches, or
/// unconditionally on oneways when it has no direction.
fn edge_has_signal(node: &OsmNodeInfo, way: &OsmWay, edge: &Edge, forward: bool) -> bool {
    (!forward && node.traffic_signal())
        || (edge.attributes.traffic_signal()
            && ((forward && edge.attributes.forward_signal())
                || (!forward && edge.attributes.backward_signal())
                || (way.oneway()
                    && !edge.attributes.forward_signal()
                    && !edge.attributes.backward_signal())))
}

/// Encode the simple turn restrictions leaving `way_id` through
/// `end_node` as a bitmask over the end node's edge indexes. Timed
/// restrictions are tallied and skipped.
fn simple_turn_restriction(
    way_id: u64,
    end_node: usize,
    nodes: &Sequence<Node>,
    edges: &Sequence<Edge>,
    ways: &Sequence<OsmWay>,
    osmdata: &OsmData,
    stats: &mut DataQuality,
) -> Result<u32> {
    use crate::osm::{DayOfWeek, RestrictionType};

    let list = match osmdata.restrictions.get(&way_id) {
        Some(list) => list,
        None => return Ok(0),
    };
    let via_osmid = nodes.get(end_node)?.osm.osmid;
    let mut active = Vec::new();
    for restriction in list {
        if restriction.via != via_osmid {
            continue;
        }
        if restriction.day_on != DayOfWeek::None {
            stats.timed_restrictions += 1;
        } else {
            active.push(restriction);
        }
    }
    if active.is_empty() {
        return Ok(0);
    }

    // Way ids of the end node's edges, in bundle order.
    let bundle = collect_node_edges(nodes, edges, end_node)?;
    let mut way_ids = Vec::with_capacity(bundle.edges.len());
    for (edge, _) in &bundle.edges {
        way_ids.push(ways.get(edge.way_index as usize)?.way_id);
    }

    // ONLY and NO types can coexist on one via node; all contribute.
    let mut mask = 0u32;
    for restriction in active {
        match restriction.restriction_type {
            RestrictionType::NoLeftTurn
            | RestrictionType::NoRightTurn
            | RestrictionType::NoStraightOn
            | RestrictionType::NoUTurn => {
                if let Some(index) = way_ids.iter().position(|id| *id == restriction.to_way) {
                    if index < 32 {
                        mask |= 1 << index;
                    }
                }
            }
            RestrictionType::OnlyRightTurn
            | RestrictionType::OnlyLeftTurn
            | RestrictionType::OnlyStraightOn => {
                for (index, id) in way_ids.iter().enumerate() {
                    if *id != restriction.to_way && index < 32 {
                        mask |= 1 << index;
                    }
                }
            }
        }
    }
    Ok(mask)
}

/// Names for the edge info record: the (possibly relation-refined) ref
/// first, then the street name.
fn way_names(way: &OsmWay, ref_override: &str, osmdata: &OsmData) -> Vec<String> {
    let mut names = Vec::new();
    if !ref_override.is_empty() {
        names.push(ref_override.to_string());
    } else if way.ref_index != 0 {
        names.push(osmdata.ref_table.name(way.ref_index).to_string());
    }
    if way.name_index != 0 {
        names.push(osmdata.name_table.name(way.name_index).to_string());
    }
    names
}
