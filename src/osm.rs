///! Parsed-OSM input records and metadata
///!
///! ways.bin and way_nodes.bin are fixed-size little-endian record files
///! produced by the PBF parser. The remaining metadata (turn restrictions,
///! relation refs, node ref/name/exit_to strings, string tables) is small
///! enough to stay in memory and is supplied by the caller, optionally
///! loaded from a JSON side file.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::sequence::Record;

/// Road classification. Smaller is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RoadClass {
    Motorway = 0,
    Trunk = 1,
    Primary = 2,
    Secondary = 3,
    Tertiary = 4,
    Unclassified = 5,
    Residential = 6,
    ServiceOther = 7,
}

impl RoadClass {
    pub fn from_repr(v: u8) -> RoadClass {
        match v {
            0 => RoadClass::Motorway,
            1 => RoadClass::Trunk,
            2 => RoadClass::Primary,
            3 => RoadClass::Secondary,
            4 => RoadClass::Tertiary,
            5 => RoadClass::Unclassified,
            6 => RoadClass::Residential,
            _ => RoadClass::ServiceOther,
        }
    }
}

/// Edge use category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Use {
    Road = 0,
    Ramp = 1,
    TurnChannel = 2,
    Track = 3,
    Driveway = 4,
    Alley = 5,
    ParkingAisle = 6,
    Culdesac = 7,
    Other = 8,
}

impl Use {
    pub fn from_repr(v: u8) -> Use {
        match v {
            0 => Use::Road,
            1 => Use::Ramp,
            2 => Use::TurnChannel,
            3 => Use::Track,
            4 => Use::Driveway,
            5 => Use::Alley,
            6 => Use::ParkingAisle,
            7 => Use::Culdesac,
            _ => Use::Other,
        }
    }
}

/// Simple turn restriction types from OSM relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RestrictionType {
    NoLeftTurn,
    NoRightTurn,
    NoStraightOn,
    NoUTurn,
    OnlyRightTurn,
    OnlyLeftTurn,
    OnlyStraightOn,
}

/// Day a timed restriction starts on. `None` means the restriction is
/// unconditional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DayOfWeek {
    #[default]
    None,
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

/// A turn restriction keyed under its `from` way id in [`OsmData`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OsmRestriction {
    pub restriction_type: RestrictionType,
    /// OSM node id of the via node.
    pub via: u64,
    /// Way id of the `to` member.
    pub to_way: u64,
    #[serde(default)]
    pub day_on: DayOfWeek,
}

/// String pool addressed by offset. Offset 0 is reserved for "not set".
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NameTable {
    names: Vec<String>,
}

impl NameTable {
    pub fn new() -> NameTable {
        NameTable {
            names: vec![String::new()],
        }
    }

    /// Intern a string and return its offset. Empty strings map to 0.
    pub fn add(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if self.names.is_empty() {
            self.names.push(String::new());
        }
        self.names.push(s.to_string());
        (self.names.len() - 1) as u32
    }

    pub fn name(&self, offset: u32) -> &str {
        match self.names.get(offset as usize) {
            Some(s) if offset != 0 => s,
            _ => "",
        }
    }
}

/// Everything the graph builder consumes: the two record files plus the
/// in-memory metadata maps.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct OsmData {
    #[serde(default)]
    pub ways_file: PathBuf,
    #[serde(default)]
    pub way_nodes_file: PathBuf,
    /// Turn restrictions, keyed by `from` way id.
    #[serde(default)]
    pub restrictions: HashMap<u64, Vec<OsmRestriction>>,
    /// Relation-sourced refs (`ref|direction` lists), keyed by way id.
    #[serde(default)]
    pub way_ref: HashMap<u64, String>,
    #[serde(default)]
    pub node_ref: HashMap<u64, String>,
    #[serde(default)]
    pub node_name: HashMap<u64, String>,
    #[serde(default)]
    pub node_exit_to: HashMap<u64, String>,
    #[serde(default)]
    pub ref_table: NameTable,
    #[serde(default)]
    pub name_table: NameTable,
}

impl OsmData {
    pub fn new(ways_file: PathBuf, way_nodes_file: PathBuf) -> OsmData {
        OsmData {
            ways_file,
            way_nodes_file,
            ..Default::default()
        }
    }
}

// OsmWay flag bits
const WAY_AUTO_FORWARD: u8 = 1 << 0;
const WAY_AUTO_BACKWARD: u8 = 1 << 1;
const WAY_ONEWAY: u8 = 1 << 2;
const WAY_LINK: u8 = 1 << 3;

/// One OSM way. 48-byte record in ways.bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmWay {
    pub way_id: u64,
    pub ref_index: u32,
    pub name_index: u32,
    pub junction_ref_index: u32,
    pub destination_index: u32,
    pub destination_ref_index: u32,
    pub destination_ref_to_index: u32,
    pub destination_street_index: u32,
    pub destination_street_to_index: u32,
    pub node_count: u16,
    pub road_class: u8,
    pub use_code: u8,
    /// Posted or inferred speed, km/h.
    pub speed: u8,
    pub flags: u8,
}

impl OsmWay {
    pub fn classification(&self) -> RoadClass {
        RoadClass::from_repr(self.road_class)
    }

    pub fn way_use(&self) -> Use {
        Use::from_repr(self.use_code)
    }

    pub fn auto_forward(&self) -> bool {
        self.flags & WAY_AUTO_FORWARD != 0
    }

    pub fn auto_backward(&self) -> bool {
        self.flags & WAY_AUTO_BACKWARD != 0
    }

    pub fn oneway(&self) -> bool {
        self.flags & WAY_ONEWAY != 0
    }

    pub fn link(&self) -> bool {
        self.flags & WAY_LINK != 0
    }

    pub fn set_auto_forward(&mut self, v: bool) {
        self.set_flag(WAY_AUTO_FORWARD, v);
    }

    pub fn set_auto_backward(&mut self, v: bool) {
        self.set_flag(WAY_AUTO_BACKWARD, v);
    }

    pub fn set_oneway(&mut self, v: bool) {
        self.set_flag(WAY_ONEWAY, v);
    }

    pub fn set_link(&mut self, v: bool) {
        self.set_flag(WAY_LINK, v);
    }

    fn set_flag(&mut self, bit: u8, v: bool) {
        if v {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }
}

impl Record for OsmWay {
    const SIZE: usize = 48;

    fn to_bytes(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.way_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.ref_index.to_le_bytes());
        buf[12..16].copy_from_slice(&self.name_index.to_le_bytes());
        buf[16..20].copy_from_slice(&self.junction_ref_index.to_le_bytes());
        buf[20..24].copy_from_slice(&self.destination_index.to_le_bytes());
        buf[24..28].copy_from_slice(&self.destination_ref_index.to_le_bytes());
        buf[28..32].copy_from_slice(&self.destination_ref_to_index.to_le_bytes());
        buf[32..36].copy_from_slice(&self.destination_street_index.to_le_bytes());
        buf[36..40].copy_from_slice(&self.destination_street_to_index.to_le_bytes());
        buf[40..42].copy_from_slice(&self.node_count.to_le_bytes());
        buf[42] = self.road_class;
        buf[43] = self.use_code;
        buf[44] = self.speed;
        buf[45] = self.flags;
        buf[46..48].copy_from_slice(&[0u8; 2]);
    }

    fn from_bytes(buf: &[u8]) -> OsmWay {
        OsmWay {
            way_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            ref_index: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            name_index: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            junction_ref_index: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            destination_index: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            destination_ref_index: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            destination_ref_to_index: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            destination_street_index: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
            destination_street_to_index: u32::from_le_bytes(buf[36..40].try_into().unwrap()),
            node_count: u16::from_le_bytes(buf[40..42].try_into().unwrap()),
            road_class: buf[42],
            use_code: buf[43],
            speed: buf[44],
            flags: buf[45],
        }
    }
}

// OsmNodeInfo attribute bits
const NODE_INTERSECTION: u16 = 1 << 0;
const NODE_TRAFFIC_SIGNAL: u16 = 1 << 1;
const NODE_FORWARD_SIGNAL: u16 = 1 << 2;
const NODE_BACKWARD_SIGNAL: u16 = 1 << 3;
const NODE_HAS_REF: u16 = 1 << 4;
const NODE_HAS_NAME: u16 = 1 << 5;
const NODE_HAS_EXIT_TO: u16 = 1 << 6;
const NODE_LINK_EDGE: u16 = 1 << 7;
const NODE_NON_LINK_EDGE: u16 = 1 << 8;

/// Per-node OSM attributes, embedded in both the way-node stream and the
/// graph node sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OsmNodeInfo {
    pub osmid: u64,
    pub lat: f64,
    pub lng: f64,
    pub attributes: u16,
    pub access: u8,
    pub node_type: u8,
}

impl OsmNodeInfo {
    pub fn intersection(&self) -> bool {
        self.attributes & NODE_INTERSECTION != 0
    }

    pub fn traffic_signal(&self) -> bool {
        self.attributes & NODE_TRAFFIC_SIGNAL != 0
    }

    pub fn forward_signal(&self) -> bool {
        self.attributes & NODE_FORWARD_SIGNAL != 0
    }

    pub fn backward_signal(&self) -> bool {
        self.attributes & NODE_BACKWARD_SIGNAL != 0
    }

    pub fn has_ref(&self) -> bool {
        self.attributes & NODE_HAS_REF != 0
    }

    pub fn has_name(&self) -> bool {
        self.attributes & NODE_HAS_NAME != 0
    }

    pub fn has_exit_to(&self) -> bool {
        self.attributes & NODE_HAS_EXIT_TO != 0
    }

    /// A link edge starts or ends at this node.
    pub fn link_edge(&self) -> bool {
        self.attributes & NODE_LINK_EDGE != 0
    }

    /// A non-link edge starts or ends at this node.
    pub fn non_link_edge(&self) -> bool {
        self.attributes & NODE_NON_LINK_EDGE != 0
    }

    pub fn set_intersection(&mut self, v: bool) {
        self.set_attr(NODE_INTERSECTION, v);
    }

    pub fn set_traffic_signal(&mut self, v: bool) {
        self.set_attr(NODE_TRAFFIC_SIGNAL, v);
    }

    pub fn set_forward_signal(&mut self, v: bool) {
        self.set_attr(NODE_FORWARD_SIGNAL, v);
    }

    pub fn set_backward_signal(&mut self, v: bool) {
        self.set_attr(NODE_BACKWARD_SIGNAL, v);
    }

    pub fn set_has_ref(&mut self, v: bool) {
        self.set_attr(NODE_HAS_REF, v);
    }

    pub fn set_has_name(&mut self, v: bool) {
        self.set_attr(NODE_HAS_NAME, v);
    }

    pub fn set_has_exit_to(&mut self, v: bool) {
        self.set_attr(NODE_HAS_EXIT_TO, v);
    }

    pub fn set_link_edge(&mut self, v: bool) {
        self.set_attr(NODE_LINK_EDGE, v);
    }

    pub fn set_non_link_edge(&mut self, v: bool) {
        self.set_attr(NODE_NON_LINK_EDGE, v);
    }

    fn set_attr(&mut self, bit: u16, v: bool) {
        if v {
            self.attributes |= bit;
        } else {
            self.attributes &= !bit;
        }
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.osmid.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lat.to_le_bytes());
        buf[16..24].copy_from_slice(&self.lng.to_le_bytes());
        buf[24..26].copy_from_slice(&self.attributes.to_le_bytes());
        buf[26] = self.access;
        buf[27] = self.node_type;
    }

    pub(crate) fn decode(buf: &[u8]) -> OsmNodeInfo {
        OsmNodeInfo {
            osmid: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            lat: f64::from_le_bytes(buf[8..16].try_into().unwrap()),
            lng: f64::from_le_bytes(buf[16..24].try_into().unwrap()),
            attributes: u16::from_le_bytes(buf[24..26].try_into().unwrap()),
            access: buf[26],
            node_type: buf[27],
        }
    }
}

/// One node of one way, in way-traversal order. 32-byte record in
/// way_nodes.bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OsmWayNode {
    pub node: OsmNodeInfo,
    pub way_index: u32,
}

impl Record for OsmWayNode {
    const SIZE: usize = 32;

    fn to_bytes(&self, buf: &mut [u8]) {
        self.node.encode(&mut buf[0..28]);
        buf[28..32].copy_from_slice(&self.way_index.to_le_bytes());
    }

    fn from_bytes(buf: &[u8]) -> OsmWayNode {
        OsmWayNode {
            node: OsmNodeInfo::decode(&buf[0..28]),
            way_index: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_way_record_roundtrip() {
        let mut way = OsmWay {
            way_id: 987654321,
            ref_index: 3,
            name_index: 7,
            junction_ref_index: 1,
            node_count: 12,
            road_class: RoadClass::Secondary as u8,
            use_code: Use::Road as u8,
            speed: 50,
            ..Default::default()
        };
        way.set_auto_forward(true);
        way.set_link(true);

        let mut buf = [0u8; OsmWay::SIZE];
        way.to_bytes(&mut buf);
        let decoded = OsmWay::from_bytes(&buf);
        assert_eq!(decoded, way);
        assert!(decoded.auto_forward());
        assert!(!decoded.auto_backward());
        assert!(decoded.link());
        assert_eq!(decoded.classification(), RoadClass::Secondary);
    }

    #[test]
    fn test_way_node_record_roundtrip() {
        let mut node = OsmNodeInfo {
            osmid: 42,
            lat: 40.05,
            lng: -76.3,
            ..Default::default()
        };
        node.set_intersection(true);
        node.set_traffic_signal(true);
        node.set_forward_signal(true);

        let wn = OsmWayNode {
            node,
            way_index: 9,
        };
        let mut buf = [0u8; OsmWayNode::SIZE];
        wn.to_bytes(&mut buf);
        let decoded = OsmWayNode::from_bytes(&buf);
        assert_eq!(decoded, wn);
        assert!(decoded.node.intersection());
        assert!(decoded.node.forward_signal());
        assert!(!decoded.node.backward_signal());
    }

    #[test]
    fn test_name_table_offsets() {
        let mut table = NameTable::new();
        assert_eq!(table.add(""), 0);
        let a = table.add("US 11");
        let b = table.add("I 81");
        assert_ne!(a, 0);
        assert_eq!(table.name(a), "US 11");
        assert_eq!(table.name(b), "I 81");
        assert_eq!(table.name(0), "");
        assert_eq!(table.name(999), "");
    }
}
