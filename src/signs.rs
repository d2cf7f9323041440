///! Exit-sign assembly and highway ref merging

use crate::osm::{OsmData, OsmNodeInfo, OsmWay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignType {
    ExitNumber = 0,
    ExitBranch = 1,
    ExitToward = 2,
    ExitName = 3,
}

impl SignType {
    pub fn from_repr(v: u8) -> SignType {
        match v {
            0 => SignType::ExitNumber,
            1 => SignType::ExitBranch,
            2 => SignType::ExitToward,
            _ => SignType::ExitName,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInfo {
    pub sign_type: SignType,
    pub text: String,
}

impl SignInfo {
    fn new(sign_type: SignType, text: &str) -> SignInfo {
        SignInfo {
            sign_type,
            text: text.to_string(),
        }
    }
}

/// Split a semicolon-separated OSM tag value into its tokens.
pub fn get_tag_tokens(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Merge way refs with relation-sourced directions. `way_ref` is a
/// semicolon-separated ref list ("US 51;I 57"); `relation_ref` is a
/// semicolon-separated list of `ref|direction` pairs ("US 51|north").
/// The way's ref order wins; refs without a matching relation entry pass
/// through unchanged.
pub fn get_ref(way_ref: &str, relation_ref: &str) -> String {
    let refdirs = get_tag_tokens(relation_ref);
    let mut refs = String::new();
    for way in get_tag_tokens(way_ref) {
        let mut merged = way.clone();
        for refdir in &refdirs {
            let mut parts = refdir.splitn(2, '|');
            if let (Some(r), Some(direction)) = (parts.next(), parts.next()) {
                if r == way {
                    merged = format!("{} {}", way, direction);
                    break;
                }
            }
        }
        if !refs.is_empty() {
            refs.push(';');
        }
        refs.push_str(&merged);
    }
    refs
}

/// Assemble the exit sign list for a ramp leaving `node` along `way`:
/// exit number (junction ref, falling back to the node ref), branch
/// (destination refs and streets), toward (destination ref-to, street-to,
/// destination), then the node's `exit_to` tag when no branch or toward
/// information exists, and finally the node name.
pub fn create_exit_sign_list(node: &OsmNodeInfo, way: &OsmWay, osmdata: &OsmData) -> Vec<SignInfo> {
    let mut exits = Vec::new();

    // Number
    if way.junction_ref_index != 0 {
        exits.push(SignInfo::new(
            SignType::ExitNumber,
            osmdata.ref_table.name(way.junction_ref_index),
        ));
    } else if node.has_ref() {
        if let Some(node_ref) = osmdata.node_ref.get(&node.osmid) {
            exits.push(SignInfo::new(SignType::ExitNumber, node_ref));
        }
    }

    // Branch
    let mut has_branch = false;
    if way.destination_ref_index != 0 {
        has_branch = true;
        for branch_ref in get_tag_tokens(osmdata.ref_table.name(way.destination_ref_index)) {
            exits.push(SignInfo::new(SignType::ExitBranch, &branch_ref));
        }
    }
    if way.destination_street_index != 0 {
        has_branch = true;
        for branch_street in get_tag_tokens(osmdata.name_table.name(way.destination_street_index)) {
            exits.push(SignInfo::new(SignType::ExitBranch, &branch_street));
        }
    }

    // Toward
    let mut has_toward = false;
    if way.destination_ref_to_index != 0 {
        has_toward = true;
        for toward_ref in get_tag_tokens(osmdata.ref_table.name(way.destination_ref_to_index)) {
            exits.push(SignInfo::new(SignType::ExitToward, &toward_ref));
        }
    }
    if way.destination_street_to_index != 0 {
        has_toward = true;
        for toward_street in
            get_tag_tokens(osmdata.name_table.name(way.destination_street_to_index))
        {
            exits.push(SignInfo::new(SignType::ExitToward, &toward_street));
        }
    }
    if way.destination_index != 0 {
        has_toward = true;
        for toward in get_tag_tokens(osmdata.name_table.name(way.destination_index)) {
            exits.push(SignInfo::new(SignType::ExitToward, &toward));
        }
    }

    // The node's exit_to only fills in when the way carried no branch or
    // toward information.
    if !has_branch && !has_toward && node.has_exit_to() {
        if let Some(exit_to) = osmdata.node_exit_to.get(&node.osmid) {
            for token in get_tag_tokens(exit_to) {
                parse_exit_to(&token, &mut exits);
            }
        }
    }

    // Name
    if node.has_name() {
        if let Some(names) = osmdata.node_name.get(&node.osmid) {
            for name in get_tag_tokens(names) {
                exits.push(SignInfo::new(SignType::ExitName, &name));
            }
        }
    }

    exits
}

/// Parse one `exit_to` token. "to X" and "toward X" prefixes strip to a
/// toward entry; "A to B" and "A toward B" split into branch and toward
/// when the separator appears exactly once and the other separator does
/// not appear at all; anything else is a toward entry as a whole.
fn parse_exit_to(token: &str, exits: &mut Vec<SignInfo>) {
    let lower = token.to_ascii_lowercase();

    if lower.starts_with("to ") {
        exits.push(SignInfo::new(SignType::ExitToward, &token[3..]));
        return;
    }
    if lower.starts_with("toward ") {
        exits.push(SignInfo::new(SignType::ExitToward, &token[7..]));
        return;
    }

    if let Some(found) = lower.find(" to ") {
        if lower[found + 4..].find(" to ").is_none() && lower.find(" toward ").is_none() {
            exits.push(SignInfo::new(SignType::ExitBranch, &token[..found]));
            exits.push(SignInfo::new(SignType::ExitToward, &token[found + 4..]));
            return;
        }
    }

    if let Some(found) = lower.find(" toward ") {
        if lower[found + 8..].find(" toward ").is_none() && lower.find(" to ").is_none() {
            exits.push(SignInfo::new(SignType::ExitBranch, &token[..found]));
            exits.push(SignInfo::new(SignType::ExitToward, &token[found + 8..]));
            return;
        }
    }

    exits.push(SignInfo::new(SignType::ExitToward, token));
}
