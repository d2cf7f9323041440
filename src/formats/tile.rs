///! <level>/<tileid>.gph format - one routable graph tile
///!
///! Format (little-endian):
///!
///! Header (32 bytes):
///!   magic:           u32 = 0x4754494C  // "GTIL"
///!   version:         u16 = 1
///!   level:           u8
///!   reserved:        u8
///!   graph_id:        u64   // tile base id
///!   node_count:      u32
///!   edge_count:      u32   // directed edges
///!   edge_info_size:  u32   // bytes
///!   sign_count:      u32
///!
///! Body:
///!   node_count  x 32-byte NodeInfo records
///!   edge_count  x 32-byte DirectedEdge records
///!   edge-info table (variable records addressed by byte offset)
///!   sign records (edge_index u32, type u8, len u16, utf-8 text)
///!
///! Footer (16 bytes):
///!   body_crc64:  u64
///!   file_crc64:  u64
///!
///! Directed edges of one node are contiguous and in bundle order; both
///! directions of an undirected edge share one edge-info record.

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_64_GO_ISO};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::graph::GraphId;
use crate::signs::{SignInfo, SignType};

const MAGIC: u32 = 0x4754494C; // "GTIL"
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;
const NODE_RECORD_SIZE: usize = 32;
const EDGE_RECORD_SIZE: usize = 32;
const FOOTER_SIZE: usize = 16;

/// Fixed-point coordinate scale, 1e-7 degrees.
const SCALE: f64 = 10_000_000.0;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

// NodeInfo flags
const NODE_END_INTERSECTION: u8 = 1 << 0;
const NODE_TRAFFIC_SIGNAL: u8 = 1 << 1;

/// Node record in a tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfoRecord {
    pub lat: f64,
    pub lng: f64,
    /// Index of the node's first directed edge in the tile.
    pub edge_index: u32,
    pub edge_count: u8,
    /// Edges driveable in at least one direction.
    pub driveable: u8,
    /// Best (smallest) classification among the node's edges.
    pub best_class: u8,
    pub access: u8,
    pub node_type: u8,
    pub flags: u8,
}

impl NodeInfoRecord {
    pub fn end_intersection(&self) -> bool {
        self.flags & NODE_END_INTERSECTION != 0
    }

    pub fn traffic_signal(&self) -> bool {
        self.flags & NODE_TRAFFIC_SIGNAL != 0
    }

    pub fn set_end_intersection(&mut self, v: bool) {
        self.set_flag(NODE_END_INTERSECTION, v);
    }

    pub fn set_traffic_signal(&mut self, v: bool) {
        self.set_flag(NODE_TRAFFIC_SIGNAL, v);
    }

    fn set_flag(&mut self, bit: u8, v: bool) {
        if v {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.lat.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lng.to_le_bytes());
        buf[16..20].copy_from_slice(&self.edge_index.to_le_bytes());
        buf[20] = self.edge_count;
        buf[21] = self.driveable;
        buf[22] = self.best_class;
        buf[23] = self.access;
        buf[24] = self.node_type;
        buf[25] = self.flags;
        buf[26..32].copy_from_slice(&[0u8; 6]);
    }

    fn decode(buf: &[u8]) -> NodeInfoRecord {
        NodeInfoRecord {
            lat: f64::from_le_bytes(buf[0..8].try_into().unwrap()),
            lng: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            edge_index: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            edge_count: buf[20],
            driveable: buf[21],
            best_class: buf[22],
            access: buf[23],
            node_type: buf[24],
            flags: buf[25],
        }
    }
}

// DirectedEdge flags
const EDGE_FORWARD: u8 = 1 << 0;
const EDGE_NOT_THRU: u8 = 1 << 1;
const EDGE_INTERNAL: u8 = 1 << 2;
const EDGE_EXIT_SIGN: u8 = 1 << 3;
const EDGE_FORWARD_ACCESS: u8 = 1 << 4;
const EDGE_REVERSE_ACCESS: u8 = 1 << 5;
const EDGE_TRAFFIC_SIGNAL: u8 = 1 << 6;

/// Directed edge record in a tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectedEdgeRecord {
    /// Graph id of the far end node.
    pub end_node: u64,
    /// Byte offset of the shared edge-info record.
    pub edge_info_offset: u32,
    /// Turn restriction mask over the end node's edge indexes.
    pub restrictions: u32,
    /// Length in meters.
    pub length: u32,
    /// km/h
    pub speed: u8,
    pub classification: u8,
    pub use_code: u8,
    /// Index of this edge among its node's edges.
    pub local_edge_index: u8,
    pub flags: u8,
}

impl DirectedEdgeRecord {
    pub fn forward(&self) -> bool {
        self.flags & EDGE_FORWARD != 0
    }

    pub fn not_thru(&self) -> bool {
        self.flags & EDGE_NOT_THRU != 0
    }

    pub fn internal(&self) -> bool {
        self.flags & EDGE_INTERNAL != 0
    }

    pub fn exit_sign(&self) -> bool {
        self.flags & EDGE_EXIT_SIGN != 0
    }

    pub fn forward_access(&self) -> bool {
        self.flags & EDGE_FORWARD_ACCESS != 0
    }

    pub fn reverse_access(&self) -> bool {
        self.flags & EDGE_REVERSE_ACCESS != 0
    }

    pub fn traffic_signal(&self) -> bool {
        self.flags & EDGE_TRAFFIC_SIGNAL != 0
    }

    pub fn set_forward(&mut self, v: bool) {
        self.set_flag(EDGE_FORWARD, v);
    }

    pub fn set_not_thru(&mut self, v: bool) {
        self.set_flag(EDGE_NOT_THRU, v);
    }

    pub fn set_internal(&mut self, v: bool) {
        self.set_flag(EDGE_INTERNAL, v);
    }

    pub fn set_exit_sign(&mut self, v: bool) {
        self.set_flag(EDGE_EXIT_SIGN, v);
    }

    pub fn set_forward_access(&mut self, v: bool) {
        self.set_flag(EDGE_FORWARD_ACCESS, v);
    }

    pub fn set_reverse_access(&mut self, v: bool) {
        self.set_flag(EDGE_REVERSE_ACCESS, v);
    }

    pub fn set_traffic_signal(&mut self, v: bool) {
        self.set_flag(EDGE_TRAFFIC_SIGNAL, v);
    }

    fn set_flag(&mut self, bit: u8, v: bool) {
        if v {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.end_node.to_le_bytes());
        buf[8..12].copy_from_slice(&self.edge_info_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.restrictions.to_le_bytes());
        buf[16..20].copy_from_slice(&self.length.to_le_bytes());
        buf[20] = self.speed;
        buf[21] = self.classification;
        buf[22] = self.use_code;
        buf[23] = self.local_edge_index;
        buf[24] = self.flags;
        buf[25..32].copy_from_slice(&[0u8; 7]);
    }

    fn decode(buf: &[u8]) -> DirectedEdgeRecord {
        DirectedEdgeRecord {
            end_node: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            edge_info_offset: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            restrictions: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            length: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            speed: buf[20],
            classification: buf[21],
            use_code: buf[22],
            local_edge_index: buf[23],
            flags: buf[24],
        }
    }
}

/// Decoded edge-info record: the shared, direction-independent part of an
/// edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeInfo {
    pub way_id: u64,
    /// (lat, lng) shape points.
    pub shape: Vec<(f64, f64)>,
    pub names: Vec<String>,
}

/// A sign attached to one directed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct SignRecord {
    pub edge_index: u32,
    pub sign: SignInfo,
}

/// Accumulates one tile, then writes it in a single pass.
pub struct GraphTileBuilder {
    graph_id: GraphId,
    nodes: Vec<NodeInfoRecord>,
    directed_edges: Vec<DirectedEdgeRecord>,
    edge_info: Vec<u8>,
    edge_info_offsets: HashMap<usize, u32>,
    signs: Vec<SignRecord>,
}

impl GraphTileBuilder {
    pub fn new(graph_id: GraphId) -> GraphTileBuilder {
        GraphTileBuilder {
            graph_id,
            nodes: Vec::new(),
            directed_edges: Vec::new(),
            edge_info: Vec::new(),
            edge_info_offsets: HashMap::new(),
            signs: Vec::new(),
        }
    }

    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    pub fn directed_edge_count(&self) -> u32 {
        self.directed_edges.len() as u32
    }

    /// Add (or reuse) the edge-info record for undirected edge
    /// `edge_index`; both directions share one record. Returns its byte
    /// offset.
    pub fn add_edge_info(
        &mut self,
        edge_index: usize,
        way_id: u64,
        shape: &[(f64, f64)],
        names: &[String],
    ) -> u32 {
        if let Some(offset) = self.edge_info_offsets.get(&edge_index) {
            return *offset;
        }
        let offset = self.edge_info.len() as u32;
        self.edge_info.extend_from_slice(&way_id.to_le_bytes());
        self.edge_info
            .extend_from_slice(&(shape.len() as u32).to_le_bytes());
        for (lat, lng) in shape {
            let lat_fxp = (lat * SCALE).round() as i32;
            let lng_fxp = (lng * SCALE).round() as i32;
            self.edge_info.extend_from_slice(&lat_fxp.to_le_bytes());
            self.edge_info.extend_from_slice(&lng_fxp.to_le_bytes());
        }
        self.edge_info.push(names.len() as u8);
        for name in names {
            let bytes = name.as_bytes();
            self.edge_info
                .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            self.edge_info.extend_from_slice(bytes);
        }
        self.edge_info_offsets.insert(edge_index, offset);
        offset
    }

    /// Attach exit signs to the directed edge at `edge_index`.
    pub fn add_signs(&mut self, edge_index: u32, signs: &[SignInfo]) {
        for sign in signs {
            self.signs.push(SignRecord {
                edge_index,
                sign: sign.clone(),
            });
        }
    }

    /// Append a node and its directed edges; the edges land contiguously
    /// after everything already added.
    pub fn add_node_and_directed_edges(
        &mut self,
        node: NodeInfoRecord,
        directed_edges: Vec<DirectedEdgeRecord>,
    ) {
        self.nodes.push(node);
        self.directed_edges.extend(directed_edges);
    }

    /// Path this tile will be written to.
    pub fn tile_path(&self, out_dir: &Path) -> PathBuf {
        out_dir
            .join(format!("{}", self.graph_id.level()))
            .join(format!("{}.gph", self.graph_id.tile()))
    }

    /// Write the tile. Returns the byte count.
    pub fn store(&self, out_dir: &Path) -> Result<u64> {
        let path = self.tile_path(out_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.push(self.graph_id.level());
        header.push(0); // reserved
        header.extend_from_slice(&self.graph_id.value().to_le_bytes());
        header.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        header.extend_from_slice(&(self.directed_edges.len() as u32).to_le_bytes());
        header.extend_from_slice(&(self.edge_info.len() as u32).to_le_bytes());
        header.extend_from_slice(&(self.signs.len() as u32).to_le_bytes());
        assert_eq!(header.len(), HEADER_SIZE);

        let mut body = Vec::new();
        let mut record = [0u8; NODE_RECORD_SIZE];
        for node in &self.nodes {
            node.encode(&mut record);
            body.extend_from_slice(&record);
        }
        for edge in &self.directed_edges {
            edge.encode(&mut record);
            body.extend_from_slice(&record);
        }
        body.extend_from_slice(&self.edge_info);
        for sign in &self.signs {
            body.extend_from_slice(&sign.edge_index.to_le_bytes());
            body.push(sign.sign.sign_type as u8);
            let text = sign.sign.text.as_bytes();
            body.extend_from_slice(&(text.len() as u16).to_le_bytes());
            body.extend_from_slice(text);
        }

        let body_crc64 = CRC64.checksum(&body);
        let mut file_digest = CRC64.digest();
        file_digest.update(&header);
        file_digest.update(&body);
        let file_crc64 = file_digest.finalize();

        writer.write_all(&header)?;
        writer.write_all(&body)?;
        writer.write_all(&body_crc64.to_le_bytes())?;
        writer.write_all(&file_crc64.to_le_bytes())?;
        writer.flush()?;

        Ok((HEADER_SIZE + body.len() + FOOTER_SIZE) as u64)
    }
}

/// A tile read back from disk.
#[derive(Debug, Clone)]
pub struct GraphTile {
    pub graph_id: GraphId,
    pub nodes: Vec<NodeInfoRecord>,
    pub directed_edges: Vec<DirectedEdgeRecord>,
    edge_info: Vec<u8>,
    pub signs: Vec<SignRecord>,
}

impl GraphTile {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<GraphTile> {
        let bytes = std::fs::read(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            bail!("{}: tile too short", path.as_ref().display());
        }

        let magic = u32::from_le_bytes(bytes[0..4].try_into()?);
        if magic != MAGIC {
            bail!(
                "{}: invalid magic 0x{:08x}",
                path.as_ref().display(),
                magic
            );
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into()?);
        if version != VERSION {
            bail!("{}: unsupported version {}", path.as_ref().display(), version);
        }
        let graph_id = GraphId::from_value(u64::from_le_bytes(bytes[8..16].try_into()?));
        let node_count = u32::from_le_bytes(bytes[16..20].try_into()?) as usize;
        let edge_count = u32::from_le_bytes(bytes[20..24].try_into()?) as usize;
        let edge_info_size = u32::from_le_bytes(bytes[24..28].try_into()?) as usize;
        let sign_count = u32::from_le_bytes(bytes[28..32].try_into()?) as usize;

        let body = &bytes[HEADER_SIZE..bytes.len() - FOOTER_SIZE];
        if body.len() < node_count * NODE_RECORD_SIZE + edge_count * EDGE_RECORD_SIZE + edge_info_size {
            bail!("{}: truncated tile body", path.as_ref().display());
        }
        let footer = &bytes[bytes.len() - FOOTER_SIZE..];
        let stored_body_crc = u64::from_le_bytes(footer[0..8].try_into()?);
        let stored_file_crc = u64::from_le_bytes(footer[8..16].try_into()?);
        if CRC64.checksum(body) != stored_body_crc {
            bail!("{}: body CRC mismatch", path.as_ref().display());
        }
        let mut file_digest = CRC64.digest();
        file_digest.update(&bytes[..HEADER_SIZE]);
        file_digest.update(body);
        if file_digest.finalize() != stored_file_crc {
            bail!("{}: file CRC mismatch", path.as_ref().display());
        }

        let mut cursor = 0usize;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(NodeInfoRecord::decode(&body[cursor..cursor + NODE_RECORD_SIZE]));
            cursor += NODE_RECORD_SIZE;
        }
        let mut directed_edges = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            directed_edges.push(DirectedEdgeRecord::decode(
                &body[cursor..cursor + EDGE_RECORD_SIZE],
            ));
            cursor += EDGE_RECORD_SIZE;
        }
        let edge_info = body[cursor..cursor + edge_info_size].to_vec();
        cursor += edge_info_size;

        let mut signs = Vec::with_capacity(sign_count);
        for _ in 0..sign_count {
            let edge_index = u32::from_le_bytes(body[cursor..cursor + 4].try_into()?);
            let sign_type = SignType::from_repr(body[cursor + 4]);
            let len = u16::from_le_bytes(body[cursor + 5..cursor + 7].try_into()?) as usize;
            let text = std::str::from_utf8(&body[cursor + 7..cursor + 7 + len])?.to_string();
            cursor += 7 + len;
            signs.push(SignRecord {
                edge_index,
                sign: SignInfo { sign_type, text },
            });
        }

        Ok(GraphTile {
            graph_id,
            nodes,
            directed_edges,
            edge_info,
            signs,
        })
    }

    /// Decode the edge-info record at `offset`.
    pub fn edge_info(&self, offset: u32) -> Result<EdgeInfo> {
        let mut cursor = offset as usize;
        if cursor + 12 > self.edge_info.len() {
            bail!("edge-info offset {} out of range", offset);
        }
        let way_id = u64::from_le_bytes(self.edge_info[cursor..cursor + 8].try_into()?);
        cursor += 8;
        let point_count =
            u32::from_le_bytes(self.edge_info[cursor..cursor + 4].try_into()?) as usize;
        cursor += 4;
        let mut shape = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            let lat = i32::from_le_bytes(self.edge_info[cursor..cursor + 4].try_into()?);
            let lng = i32::from_le_bytes(self.edge_info[cursor + 4..cursor + 8].try_into()?);
            shape.push((lat as f64 / SCALE, lng as f64 / SCALE));
            cursor += 8;
        }
        let name_count = self.edge_info[cursor] as usize;
        cursor += 1;
        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            let len = u16::from_le_bytes(self.edge_info[cursor..cursor + 2].try_into()?) as usize;
            cursor += 2;
            names.push(std::str::from_utf8(&self.edge_info[cursor..cursor + len])?.to_string());
            cursor += len;
        }
        Ok(EdgeInfo {
            way_id,
            shape,
            names,
        })
    }
}
