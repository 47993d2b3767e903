//! Classic HFS B*-tree codec: a reader that walks an existing tree's leaf
//! chain, and a writer that builds a complete tree from a sorted slice of
//! `(key, value)` pairs.
//!
//! Both operate purely on an in-memory byte buffer holding one fork's
//! contents (already assembled from its allocation blocks, possibly via
//! extents-overflow, by [`crate::extents`]). Nothing here performs I/O.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{HfsError, Result};

pub const NODE_SIZE: u16 = 512;

pub const NODE_KIND_INDEX: u8 = 0x00;
pub const NODE_KIND_HEADER: u8 = 0x01;
pub const NODE_KIND_MAP: u8 = 0x02;
pub const NODE_KIND_LEAF: u8 = 0xFF;

const LEAF_RECORDS_PER_NODE: usize = 2;
const INDEX_RECORDS_PER_NODE: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: u8,
    pub height: u8,
    pub num_records: u16,
}

#[derive(Debug, Clone)]
pub struct BTreeHeader {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
}

fn parse_node_descriptor(data: &[u8]) -> Result<NodeDescriptor> {
    let mut cursor = Cursor::new(data);
    Ok(NodeDescriptor {
        forward_link: cursor.read_u32::<BigEndian>()?,
        backward_link: cursor.read_u32::<BigEndian>()?,
        kind: cursor.read_u8()?,
        height: cursor.read_u8()?,
        num_records: cursor.read_u16::<BigEndian>()?,
    })
}

fn node_at(tree: &[u8], node_number: u32) -> Result<&[u8]> {
    let start = node_number as usize * NODE_SIZE as usize;
    let end = start + NODE_SIZE as usize;
    tree.get(start..end)
        .ok_or_else(|| HfsError::Malformed(format!("B*-tree node {node_number} out of bounds")))
}

/// Record offsets, ascending, `num_records + 1` entries (the last being the
/// offset of free space rather than a record start).
fn record_offsets(node: &[u8], num_records: u16) -> Result<Vec<u16>> {
    let count = num_records as usize + 1;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let pos = NODE_SIZE as usize - (i + 1) * 2;
        if pos + 1 >= node.len() {
            return Err(HfsError::Malformed("B*-tree offset table out of bounds".into()));
        }
        offsets.push(u16::from_be_bytes([node[pos], node[pos + 1]]));
    }
    Ok(offsets)
}

fn record_data(node: &[u8], offsets: &[u16], index: usize) -> Result<&[u8]> {
    let start = offsets[index] as usize;
    let end = offsets[index + 1] as usize;
    if start > end || end > node.len() {
        return Err(HfsError::Malformed("invalid B*-tree record offsets".into()));
    }
    Ok(&node[start..end])
}

/// Split a leaf/index record into `(key, value)`, accounting for the 1-byte
/// key length and the even-byte padding that follows it.
fn split_record(record: &[u8]) -> Result<(&[u8], &[u8])> {
    if record.is_empty() {
        return Err(HfsError::Malformed("empty B*-tree record".into()));
    }
    let key_len = record[0] as usize;
    if 1 + key_len > record.len() {
        return Err(HfsError::Malformed("B*-tree record key overruns record".into()));
    }
    let key = &record[1..1 + key_len];
    let value_start = pad_up(1 + key_len, 2);
    let value = record.get(value_start..).unwrap_or(&[]);
    Ok((key, value))
}

fn pad_up(size: usize, factor: usize) -> usize {
    size.div_ceil(factor) * factor
}

/// Parse the header node (always node 0) of a B*-tree fork.
pub fn read_header(tree: &[u8]) -> Result<BTreeHeader> {
    let node = node_at(tree, 0)?;
    let desc = parse_node_descriptor(node)?;
    if desc.kind != NODE_KIND_HEADER {
        return Err(HfsError::Malformed(format!("expected B*-tree header node, found kind {}", desc.kind)));
    }

    let mut cursor = Cursor::new(&node[14..]);
    let tree_depth = cursor.read_u16::<BigEndian>()?;
    let root_node = cursor.read_u32::<BigEndian>()?;
    let leaf_records = cursor.read_u32::<BigEndian>()?;
    let first_leaf_node = cursor.read_u32::<BigEndian>()?;
    let last_leaf_node = cursor.read_u32::<BigEndian>()?;
    let node_size = cursor.read_u16::<BigEndian>()?;
    let max_key_length = cursor.read_u16::<BigEndian>()?;
    let total_nodes = cursor.read_u32::<BigEndian>()?;
    let free_nodes = cursor.read_u32::<BigEndian>()?;

    Ok(BTreeHeader {
        tree_depth,
        root_node,
        leaf_records,
        first_leaf_node,
        last_leaf_node,
        node_size,
        max_key_length,
        total_nodes,
        free_nodes,
    })
}

/// Walk the forward-linked leaf chain of a tree, returning every `(key,
/// value)` record it holds, in on-disk (sorted) order.
pub fn leaf_records(tree: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let header = read_header(tree)?;
    let mut out = Vec::with_capacity(header.leaf_records as usize);

    if header.leaf_records == 0 {
        return Ok(out);
    }

    let mut node_number = header.first_leaf_node;
    loop {
        let node = node_at(tree, node_number)?;
        let desc = parse_node_descriptor(node)?;
        if desc.kind != NODE_KIND_LEAF {
            return Err(HfsError::Malformed(format!("expected leaf node at {node_number}, found kind {}", desc.kind)));
        }
        let offsets = record_offsets(node, desc.num_records)?;
        for i in 0..desc.num_records as usize {
            let (key, value) = split_record(record_data(node, &offsets, i)?)?;
            out.push((key.to_vec(), value.to_vec()));
        }
        if node_number == header.last_leaf_node {
            break;
        }
        node_number = desc.forward_link;
    }

    Ok(out)
}

struct BuiltNode {
    forward_link: u32,
    backward_link: u32,
    kind: u8,
    height: u8,
    records: Vec<Vec<u8>>,
}

impl BuiltNode {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; NODE_SIZE as usize];
        let mut next_left = 14usize;
        let mut next_right = NODE_SIZE as usize - 2;

        for record in &self.records {
            buf[next_left..next_left + record.len()].copy_from_slice(record);
            buf[next_right..next_right + 2].copy_from_slice(&(next_left as u16).to_be_bytes());
            next_left += record.len();
            next_right -= 2;
        }
        buf[next_right..next_right + 2].copy_from_slice(&(next_left as u16).to_be_bytes());

        let mut cursor = Cursor::new(&mut buf[0..14]);
        cursor.write_u32::<BigEndian>(self.forward_link).unwrap();
        cursor.write_u32::<BigEndian>(self.backward_link).unwrap();
        cursor.write_u8(self.kind).unwrap();
        cursor.write_u8(self.height).unwrap();
        cursor.write_u16::<BigEndian>(self.records.len() as u16).unwrap();
        cursor.write_u16::<BigEndian>(0).unwrap();

        buf
    }
}

fn pack_leaf_record(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut rec = Vec::with_capacity(1 + key.len() + value.len() + 1);
    rec.push(key.len() as u8);
    rec.extend_from_slice(key);
    if rec.len() % 2 == 1 {
        rec.push(0);
    }
    rec.extend_from_slice(value);
    rec
}

fn pack_index_record(key: &[u8], key_len: u16, child_node: u32) -> Vec<u8> {
    let key_len = key_len as usize;
    let mut rec = Vec::with_capacity(1 + key_len + 4 + 1);
    rec.push(key_len as u8);
    rec.extend_from_slice(key);
    rec.resize(1 + key_len, 0);
    if rec.len() % 2 == 1 {
        rec.push(0);
    }
    rec.extend_from_slice(&child_node.to_be_bytes());
    rec
}

/// Bin-pack a pre-sorted list of items into fixed-size groups, never
/// exceeding `per_node` items each. Mirrors the reference packer's greedy
/// "does it still fit" policy rather than weighing actual byte budgets.
fn pack_into_nodes<T: Clone>(items: &[T], per_node: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return vec![Vec::new()];
    }
    items.chunks(per_node).map(|c| c.to_vec()).collect()
}

/// Build a complete B*-tree file from pre-sorted `(key, value)` pairs.
///
/// `key_len` is the tree's declared key length (used to pad index-node keys
/// and recorded in the header); leaf records carry their own, possibly
/// shorter, key length. Leaf nodes hold at most two records and index nodes
/// at most eight, a simplified but valid packing policy.
pub fn build_btree(records: &[(Vec<u8>, Vec<u8>)], key_len: u16) -> Vec<u8> {
    let leaf_groups: Vec<Vec<(Vec<u8>, Vec<u8>)>> = pack_into_nodes(records, LEAF_RECORDS_PER_NODE);

    // One representative key per leaf node (its first record's key), in node
    // order. An empty tree is a single empty leaf node with no representative
    // key, so no index levels are built above it.
    let mut level_keys: Vec<Vec<u8>> = leaf_groups
        .iter()
        .filter(|g| !g.is_empty())
        .map(|g| g[0].0.clone())
        .collect();

    // index_levels[0] is the level directly above the leaves; each later
    // entry is one level further up. Each group is one index node's list of
    // child representative keys, in order; a group's children occupy a
    // contiguous run of node numbers in the level below.
    let mut index_levels: Vec<Vec<Vec<Vec<u8>>>> = Vec::new();
    while level_keys.len() > 1 {
        let groups = pack_into_nodes(&level_keys, INDEX_RECORDS_PER_NODE);
        level_keys = groups.iter().map(|g| g[0].clone()).collect();
        index_levels.push(groups);
    }

    // Root-to-leaf order: reversed index levels, then the leaf level itself.
    let mut ordered_index_levels: Vec<Vec<Vec<Vec<u8>>>> = index_levels.into_iter().rev().collect();
    let depth = (ordered_index_levels.len() + 1) as u16;

    // Node numbering: header is 0; root level starts at 1; each later level's
    // nodes are numbered contiguously right after the previous level's.
    let mut level_bases = Vec::with_capacity(ordered_index_levels.len() + 1);
    let mut next_number = 1u32;
    for level in &ordered_index_levels {
        level_bases.push(next_number);
        next_number += level.len() as u32;
    }
    let leaf_level_base = next_number;
    level_bases.push(leaf_level_base);
    next_number += leaf_groups.len() as u32;
    let total_data_nodes = next_number - 1;

    let mut nodes: Vec<BuiltNode> = Vec::with_capacity(1 + total_data_nodes as usize);
    nodes.push(BuiltNode {
        forward_link: 0,
        backward_link: 0,
        kind: NODE_KIND_HEADER,
        height: 0,
        records: Vec::new(),
    });

    // Index levels, root first. Child pointers are `child_base + offset`,
    // where `offset` is this key's position in the level-below's flattened,
    // pre-grouping order (a running count across the level's groups).
    for (level_idx, level) in ordered_index_levels.iter().enumerate() {
        let height = (depth as usize - level_idx) as u8;
        let child_base = level_bases[level_idx + 1];
        let mut child_offset = 0u32;

        for group in level {
            let records: Vec<Vec<u8>> = group
                .iter()
                .map(|key| {
                    let child = child_base + child_offset;
                    child_offset += 1;
                    pack_index_record(key, key_len, child)
                })
                .collect();

            nodes.push(BuiltNode {
                forward_link: 0,
                backward_link: 0,
                kind: NODE_KIND_INDEX,
                height,
                records,
            });
        }
    }

    // Leaf level.
    let mut leaf_record_total = 0u32;
    for group in &leaf_groups {
        leaf_record_total += group.len() as u32;
        nodes.push(BuiltNode {
            forward_link: 0,
            backward_link: 0,
            kind: NODE_KIND_LEAF,
            height: 1,
            records: group.iter().map(|(k, v)| pack_leaf_record(k, v)).collect(),
        });
    }
    let first_leaf_node = leaf_level_base;
    let last_leaf_node = leaf_level_base + leaf_groups.len() as u32 - 1;

    // Map/bitmap nodes extending the used-node bitmap beyond the header's
    // built-in 256-byte (2048-bit) coverage.
    let mut bits_covered = 2048usize;
    while bits_covered < nodes.len() {
        bits_covered += 3952;
        nodes.push(BuiltNode {
            forward_link: 0,
            backward_link: 0,
            kind: NODE_KIND_MAP,
            height: 0,
            records: vec![Vec::new()],
        });
    }

    let total_nodes = nodes.len() as u32;

    // Link forward/backward pointers within each node kind's own chain.
    let mut most_recent_backward: std::collections::HashMap<u8, u32> = std::collections::HashMap::new();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.backward_link = *most_recent_backward.get(&node.kind).unwrap_or(&0);
        most_recent_backward.insert(node.kind, i as u32);
    }
    let mut most_recent_forward: std::collections::HashMap<u8, u32> = std::collections::HashMap::new();
    for (i, node) in nodes.iter_mut().enumerate().rev() {
        node.forward_link = *most_recent_forward.get(&node.kind).unwrap_or(&0);
        most_recent_forward.insert(node.kind, i as u32);
    }

    // Used-node bitmap (256 bytes in the header node, MSB-first).
    let mut bitmap = vec![0u8; 256];
    for i in 0..total_nodes as usize {
        bitmap[i / 8] |= 0x80 >> (i % 8);
    }

    let root_node = level_bases[0];

    let mut header_record = Vec::with_capacity(106);
    header_record.write_u16::<BigEndian>(depth).unwrap();
    header_record.write_u32::<BigEndian>(root_node).unwrap();
    header_record.write_u32::<BigEndian>(leaf_record_total).unwrap();
    header_record.write_u32::<BigEndian>(first_leaf_node).unwrap();
    header_record.write_u32::<BigEndian>(last_leaf_node).unwrap();
    header_record.write_u16::<BigEndian>(NODE_SIZE).unwrap();
    header_record.write_u16::<BigEndian>(key_len).unwrap();
    header_record.write_u32::<BigEndian>(total_nodes).unwrap();
    header_record.write_u32::<BigEndian>(0).unwrap(); // free_nodes: we allocate exactly what we use
    header_record.write_u16::<BigEndian>(0).unwrap(); // reserved
    header_record.write_u32::<BigEndian>(0).unwrap(); // clump size, unused by this writer
    header_record.write_u8(0).unwrap(); // btree type: standard HFS
    header_record.write_u8(0).unwrap(); // key compare type
    header_record.write_u32::<BigEndian>(0).unwrap(); // attributes
    header_record.resize(106, 0);

    nodes[0].records = vec![header_record, vec![0u8; 128], bitmap];

    nodes.iter().flat_map(|n| n.to_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| (format!("key{i:03}").into_bytes(), format!("value{i:03}").into_bytes()))
            .collect()
    }

    #[test]
    fn empty_tree_round_trips() {
        let tree = build_btree(&[], 37);
        let header = read_header(&tree).unwrap();
        assert_eq!(header.leaf_records, 0);
        assert!(leaf_records(&tree).unwrap().is_empty());
    }

    #[test]
    fn single_leaf_round_trips() {
        let recs = sample_records(2);
        let tree = build_btree(&recs, 16);
        let out = leaf_records(&tree).unwrap();
        assert_eq!(out, recs);
    }

    #[test]
    fn multi_level_round_trips_in_order() {
        let recs = sample_records(40);
        let tree = build_btree(&recs, 16);
        let out = leaf_records(&tree).unwrap();
        assert_eq!(out, recs);
        let header = read_header(&tree).unwrap();
        assert!(header.tree_depth >= 2);
    }
}
