//! Three-extent records and extents-overflow lookup.
//!
//! Classic HFS places the first extent of a fork directly in its catalog
//! record, with two more slots for small additional fragments; anything
//! beyond that spills into the extents-overflow B*-tree. This crate's
//! writer never produces overflow records (see `volume::write`), but the
//! reader still honours one it finds in an existing image.

use std::collections::HashMap;

use crate::btree;
use crate::error::{HfsError, Result};

pub const FORK_DATA: u8 = 0x00;
pub const FORK_RSRC: u8 = 0xFF;

/// `(start_block, block_count)`, both 0-based/absolute within the volume's
/// allocation area.
pub type Extent = (u16, u16);

/// The three-slot extent record stored in a catalog entry or an
/// extents-overflow value.
pub type ExtentRecord = [Extent; 3];

pub const EMPTY_EXTENT_RECORD: ExtentRecord = [(0, 0), (0, 0), (0, 0)];

pub fn pack_extent_record(rec: ExtentRecord) -> [u8; 12] {
    let mut out = [0u8; 12];
    for (i, (start, count)) in rec.iter().enumerate() {
        out[i * 4..i * 4 + 2].copy_from_slice(&start.to_be_bytes());
        out[i * 4 + 2..i * 4 + 4].copy_from_slice(&count.to_be_bytes());
    }
    out
}

pub fn parse_extent_record(bytes: &[u8]) -> Result<ExtentRecord> {
    if bytes.len() < 12 {
        return Err(HfsError::Malformed("extent record shorter than 12 bytes".into()));
    }
    let mut rec = EMPTY_EXTENT_RECORD;
    for (i, slot) in rec.iter_mut().enumerate() {
        let start = u16::from_be_bytes([bytes[i * 4], bytes[i * 4 + 1]]);
        let count = u16::from_be_bytes([bytes[i * 4 + 2], bytes[i * 4 + 3]]);
        *slot = (start, count);
    }
    Ok(rec)
}

/// 7-byte extents-overflow key: fork kind, catalog node ID, and the
/// allocation-block offset within the fork that the record's extents
/// continue from.
pub fn pack_overflow_key(fork: u8, cnid: u32, start_block_in_fork: u16) -> Vec<u8> {
    let mut key = Vec::with_capacity(7);
    key.push(fork);
    key.extend_from_slice(&cnid.to_be_bytes());
    key.extend_from_slice(&start_block_in_fork.to_be_bytes());
    key
}

pub fn parse_overflow_key(key: &[u8]) -> Result<(u8, u32, u16)> {
    if key.len() < 7 {
        return Err(HfsError::Malformed("extents-overflow key shorter than 7 bytes".into()));
    }
    let fork = key[0];
    let cnid = u32::from_be_bytes([key[1], key[2], key[3], key[4]]);
    let start = u16::from_be_bytes([key[5], key[6]]);
    Ok((fork, cnid, start))
}

/// All overflow records of an extents B*-tree, keyed by `(cnid, fork,
/// accumulated_blocks)`.
pub struct OverflowMap(HashMap<(u32, u8, u16), ExtentRecord>);

impl OverflowMap {
    pub fn build(extents_tree: &[u8]) -> Result<Self> {
        let mut map = HashMap::new();
        for (key, value) in btree::leaf_records(extents_tree)? {
            let (fork, cnid, start) = parse_overflow_key(&key)?;
            map.insert((cnid, fork, start), parse_extent_record(&value)?);
        }
        Ok(OverflowMap(map))
    }

    pub fn empty() -> Self {
        OverflowMap(HashMap::new())
    }

    fn lookup(&self, cnid: u32, fork: u8, accumulated_blocks: u16) -> Option<&ExtentRecord> {
        self.0.get(&(cnid, fork, accumulated_blocks))
    }
}

fn block_offset(first_alloc_block: u32, alloc_block_size: u32, block_index: u16) -> usize {
    512 * first_alloc_block as usize + alloc_block_size as usize * block_index as usize
}

fn read_extent(image: &[u8], first_alloc_block: u32, alloc_block_size: u32, extent: Extent) -> Result<&[u8]> {
    let (start, count) = extent;
    let from = block_offset(first_alloc_block, alloc_block_size, start);
    let to = block_offset(first_alloc_block, alloc_block_size, start + count);
    image
        .get(from..to)
        .ok_or_else(|| HfsError::Malformed("extent runs past end of image".into()))
}

/// Reassemble a fork's bytes: walk the primary extent record, consulting
/// `overflow` for any blocks beyond it, then truncate to `logical_len`.
pub fn assemble_fork(
    image: &[u8],
    first_alloc_block: u32,
    alloc_block_size: u32,
    cnid: u32,
    fork: u8,
    primary: ExtentRecord,
    physical_len: u32,
    logical_len: u32,
    overflow: &OverflowMap,
) -> Result<Vec<u8>> {
    let needed_blocks = physical_len.div_ceil(alloc_block_size) as u16;
    let mut out = Vec::with_capacity(physical_len as usize);
    let mut accumulated: u16 = 0;
    let mut record = primary;

    loop {
        for &(start, count) in &record {
            if count == 0 {
                continue;
            }
            out.extend_from_slice(read_extent(image, first_alloc_block, alloc_block_size, (start, count))?);
            accumulated += count;
        }
        if accumulated >= needed_blocks {
            break;
        }
        record = *overflow.lookup(cnid, fork, accumulated).ok_or_else(|| {
            HfsError::Malformed(format!(
                "fork for cnid {cnid} needs extents-overflow entry at block {accumulated} but none found"
            ))
        })?;
    }

    out.truncate(logical_len as usize);
    Ok(out)
}

/// Build the empty extents-overflow B*-tree this crate always writes.
pub fn empty_overflow_tree() -> Vec<u8> {
    btree::build_btree(&[], 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_record_round_trips() {
        let rec: ExtentRecord = [(10, 3), (0, 0), (0, 0)];
        let bytes = pack_extent_record(rec);
        assert_eq!(parse_extent_record(&bytes).unwrap(), rec);
    }

    #[test]
    fn overflow_key_round_trips() {
        let key = pack_overflow_key(FORK_DATA, 42, 100);
        assert_eq!(key.len(), 7);
        assert_eq!(parse_overflow_key(&key).unwrap(), (FORK_DATA, 42, 100));
    }

    #[test]
    fn assemble_fork_reads_primary_extent_only() {
        let alloc_block_size = 512u32;
        let mut image = vec![0u8; 512 * 10];
        image[512 * 2..512 * 2 + 4].copy_from_slice(b"data");
        let primary: ExtentRecord = [(2, 1), (0, 0), (0, 0)];
        let out = assemble_fork(&image, 0, alloc_block_size, 16, FORK_DATA, primary, 512, 4, &OverflowMap::empty()).unwrap();
        assert_eq!(out, b"data");
    }

    #[test]
    fn assemble_fork_consults_overflow_map() {
        let alloc_block_size = 512u32;
        let mut image = vec![0u8; 512 * 10];
        image[512 * 2..512 * 2 + 4].copy_from_slice(b"aaaa");
        image[512 * 5..512 * 5 + 4].copy_from_slice(b"bbbb");
        let primary: ExtentRecord = [(2, 1), (0, 0), (0, 0)];
        let mut map = HashMap::new();
        map.insert((16u32, FORK_DATA, 1u16), [(5u16, 1u16), (0, 0), (0, 0)]);
        let overflow = OverflowMap(map);
        let out = assemble_fork(&image, 0, alloc_block_size, 16, FORK_DATA, primary, 1024, 516, &overflow).unwrap();
        assert_eq!(&out[..4], b"aaaa");
        assert_eq!(&out[512..516], b"bbbb");
    }

    #[test]
    fn empty_overflow_tree_has_no_records() {
        let tree = empty_overflow_tree();
        assert!(btree::leaf_records(&tree).unwrap().is_empty());
    }
}
