///! Binary formats for the emitted tile artifacts

pub mod tile;

pub use tile::{DirectedEdgeRecord, EdgeInfo, GraphTile, GraphTileBuilder, NodeInfoRecord, SignRecord};
