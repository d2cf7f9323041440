//! Tilegraph: tiled road-network graph builder
//!
//! Consumes a parsed OSM intermediate representation (fixed-record way and
//! way-node files plus in-memory metadata) and emits routable, tiled
//! directed-graph artifacts:
//!
//! - construct: cut one edge per maximal stretch between intersections
//! - sort: collapse duplicate nodes per tile, rewrite edge endpoints
//! - reclassify: links inherit the second-best adjacent road class
//! - tiles: parallel per-tile directed-edge materialization and write
//!
//! The graph never lives in memory: nodes and edges flow between phases
//! through disk-backed record sequences.

pub mod builder;
pub mod cli;
pub mod construct;
pub mod formats;
pub mod graph;
pub mod hierarchy;
pub mod osm;
pub mod reclassify;
pub mod sequence;
pub mod signs;
pub mod sort;
pub mod stats;
pub mod tiles;

pub use builder::{build, BuildConfig};
pub use graph::{Edge, GraphId, Node};
pub use hierarchy::{TileHierarchy, TileLevel};
pub use osm::{OsmData, OsmWay, OsmWayNode};
pub use stats::DataQuality;
