//! Minimal classic Mac resource-fork reader and single-resource writer.
//!
//! Boot-block patching needs exactly one capability from a resource fork:
//! find the bytes of a named resource. The writer's Desktop-database
//! placeholder needs the dual: wrap one blob of data as a valid,
//! minimal resource fork. Neither needs anything else the real format can
//! hold (multiple types, named resources, compressed resources, ...).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{HfsError, Result};

const HEADER_LEN: usize = 16;

fn read_header(fork: &[u8]) -> Result<(u32, u32, u32, u32)> {
    if fork.len() < HEADER_LEN {
        return Err(HfsError::Malformed("resource fork shorter than its header".into()));
    }
    let mut cursor = Cursor::new(fork);
    let data_offset = cursor.read_u32::<BigEndian>()?;
    let map_offset = cursor.read_u32::<BigEndian>()?;
    let data_length = cursor.read_u32::<BigEndian>()?;
    let map_length = cursor.read_u32::<BigEndian>()?;
    Ok((data_offset, map_offset, data_length, map_length))
}

/// Find the data bytes of resource `(rtype, id)`, or `None` if absent.
pub fn find_resource(fork: &[u8], rtype: [u8; 4], id: i16) -> Result<Option<Vec<u8>>> {
    let (data_offset, map_offset, _data_length, map_length) = read_header(fork)?;
    let map = fork
        .get(map_offset as usize..map_offset as usize + map_length as usize)
        .ok_or_else(|| HfsError::Malformed("resource map out of bounds".into()))?;

    if map.len() < 12 {
        return Err(HfsError::Malformed("resource map shorter than its own header".into()));
    }
    let type_list_offset = u16::from_be_bytes([map[8], map[9]]) as usize;

    let type_list = map
        .get(type_list_offset..)
        .ok_or_else(|| HfsError::Malformed("resource type list out of bounds".into()))?;
    if type_list.len() < 2 {
        return Err(HfsError::Malformed("resource type list truncated".into()));
    }
    let num_types = u16::from_be_bytes([type_list[0], type_list[1]]) as usize + 1;

    for i in 0..num_types {
        let entry_offset = 2 + i * 8;
        let entry = type_list
            .get(entry_offset..entry_offset + 8)
            .ok_or_else(|| HfsError::Malformed("resource type entry out of bounds".into()))?;
        let this_type = [entry[0], entry[1], entry[2], entry[3]];
        let num_res = u16::from_be_bytes([entry[4], entry[5]]) as usize + 1;
        let ref_list_offset = u16::from_be_bytes([entry[6], entry[7]]) as usize;

        if this_type != rtype {
            continue;
        }

        let ref_list = type_list
            .get(ref_list_offset..)
            .ok_or_else(|| HfsError::Malformed("resource reference list out of bounds".into()))?;

        for j in 0..num_res {
            let ref_offset = j * 12;
            let entry = ref_list
                .get(ref_offset..ref_offset + 12)
                .ok_or_else(|| HfsError::Malformed("resource reference entry out of bounds".into()))?;
            let res_id = i16::from_be_bytes([entry[0], entry[1]]);
            if res_id != id {
                continue;
            }
            let data_rel_offset = u32::from_be_bytes([0, entry[4], entry[5], entry[6]]) as usize;
            let abs = data_offset as usize + data_rel_offset;
            let length = fork
                .get(abs..abs + 4)
                .ok_or_else(|| HfsError::Malformed("resource data length out of bounds".into()))?;
            let length = u32::from_be_bytes([length[0], length[1], length[2], length[3]]) as usize;
            let bytes = fork
                .get(abs + 4..abs + 4 + length)
                .ok_or_else(|| HfsError::Malformed("resource data out of bounds".into()))?;
            return Ok(Some(bytes.to_vec()));
        }
        return Ok(None);
    }
    Ok(None)
}

/// Build a complete, valid resource fork containing exactly one resource.
pub fn make_single_resource(rtype: [u8; 4], id: i16, data: &[u8]) -> Vec<u8> {
    let mut data_area = Vec::with_capacity(4 + data.len() + 1);
    data_area.write_u32::<BigEndian>(data.len() as u32).unwrap();
    data_area.extend_from_slice(data);
    if data_area.len() % 2 == 1 {
        data_area.push(0);
    }

    let data_offset = HEADER_LEN as u32;
    let data_length = data_area.len() as u32;
    let map_offset = data_offset + data_length;

    let mut map = Vec::new();
    map.write_u32::<BigEndian>(0).unwrap(); // next resource map handle
    map.write_u16::<BigEndian>(0).unwrap(); // file reference number
    map.write_u16::<BigEndian>(0).unwrap(); // attributes
    map.write_u16::<BigEndian>(12).unwrap(); // type list offset (right after this header)
    map.write_u16::<BigEndian>(0).unwrap(); // name list offset (unused, no named resources)

    map.write_u16::<BigEndian>(0).unwrap(); // type count - 1 (one type)
    map.extend_from_slice(&rtype);
    map.write_u16::<BigEndian>(0).unwrap(); // resource count - 1 (one resource)
    map.write_u16::<BigEndian>(10).unwrap(); // ref list offset, relative to type list start

    map.write_i16::<BigEndian>(id).unwrap();
    map.write_u16::<BigEndian>(0xFFFF).unwrap(); // name offset: none
    map.push(0); // attributes
    let rel = 0u32; // single resource starts at the data area's first entry
    map.extend_from_slice(&rel.to_be_bytes()[1..]); // 3-byte data offset
    map.write_u32::<BigEndian>(0).unwrap(); // reserved handle

    let map_length = map.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data_area.len() + map.len());
    out.write_u32::<BigEndian>(data_offset).unwrap();
    out.write_u32::<BigEndian>(map_offset).unwrap();
    out.write_u32::<BigEndian>(data_length).unwrap();
    out.write_u32::<BigEndian>(map_length).unwrap();
    out.extend_from_slice(&data_area);
    out.extend_from_slice(&map);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_resource_round_trips() {
        let fork = make_single_resource(*b"STR ", 0, b"\x0AFinder 1.0");
        let found = find_resource(&fork, *b"STR ", 0).unwrap();
        assert_eq!(found, Some(b"\x0AFinder 1.0".to_vec()));
    }

    #[test]
    fn missing_resource_is_none() {
        let fork = make_single_resource(*b"STR ", 0, b"hi");
        assert!(find_resource(&fork, *b"boot", 1).unwrap().is_none());
        assert!(find_resource(&fork, *b"STR ", 99).unwrap().is_none());
    }
}
