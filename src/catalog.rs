//! Catalog record keys and values: the (parent CNID, name) → folder/file
//! metadata mapping, plus the CNID → (parent, name) thread records that
//! make the tree walkable in both directions.
//!
//! Everything here packs and parses the *value* half of a B*-tree leaf
//! record; [`crate::btree`] owns the tree structure itself.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::bits;
use crate::error::{HfsError, Result};
use crate::extents::{self, ExtentRecord};

/// Synthetic parent of the root folder; never a real catalog entry.
pub const CNID_ROOT_PARENT: u32 = 1;
pub const CNID_ROOT: u32 = 2;
pub const CNID_EXTENTS_FILE: u32 = 3;
pub const CNID_CATALOG_FILE: u32 = 4;
pub const CNID_FIRST_USER: u32 = 16;

pub const RECORD_FOLDER: u8 = 1;
pub const RECORD_FILE: u8 = 2;
pub const RECORD_FOLDER_THREAD: u8 = 3;
pub const RECORD_FILE_THREAD: u8 = 4;

pub const CATALOG_KEY_LEN: u16 = 37;

const FOLDER_VALUE_LEN: usize = 70;
const FILE_VALUE_LEN: usize = 102;

/// Key of a main (folder or file) catalog record: parent CNID followed by
/// the child's MacRoman name as an unpadded Pascal string.
pub fn pack_main_key(parent_cnid: u32, name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + name.len());
    key.extend_from_slice(&parent_cnid.to_be_bytes());
    key.push(name.len() as u8);
    key.extend_from_slice(name);
    key
}

/// Key of a thread record: the node's own CNID, with a zero name-length
/// byte standing in where a main key's Pascal name would start.
pub fn pack_thread_key(cnid: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.extend_from_slice(&cnid.to_be_bytes());
    key.push(0);
    key
}

/// Parse a main record's key back into `(parent_cnid, name_bytes)`. Thread
/// keys also parse through this (their Pascal "name" is zero bytes long).
pub fn parse_main_key(key: &[u8]) -> Result<(u32, Vec<u8>)> {
    if key.len() < 5 {
        return Err(HfsError::Malformed("catalog key shorter than 5 bytes".into()));
    }
    let parent_cnid = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    let name = bits::parse_pstring_fixed(&key[4..]).to_vec();
    Ok((parent_cnid, name))
}

fn pack_finder_file_info(file_type: [u8; 4], creator: [u8; 4], flags: u16, x: i16, y: i16) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&file_type);
    out[4..8].copy_from_slice(&creator);
    out[8..10].copy_from_slice(&flags.to_be_bytes());
    out[10..12].copy_from_slice(&x.to_be_bytes());
    out[12..14].copy_from_slice(&y.to_be_bytes());
    out
}

fn parse_finder_file_info(info: &[u8]) -> ([u8; 4], [u8; 4], u16, i16, i16) {
    let file_type = [info[0], info[1], info[2], info[3]];
    let creator = [info[4], info[5], info[6], info[7]];
    let flags = u16::from_be_bytes([info[8], info[9]]);
    let x = i16::from_be_bytes([info[10], info[11]]);
    let y = i16::from_be_bytes([info[12], info[13]]);
    (file_type, creator, flags, x, y)
}

/// Parsed folder catalog record value (70 bytes).
#[derive(Debug, Clone)]
pub struct FolderValue {
    pub flags: u16,
    pub valence: u16,
    pub cnid: u32,
    pub crdate: u32,
    pub mddate: u32,
    pub bkdate: u32,
}

pub fn pack_folder_value(v: &FolderValue) -> Vec<u8> {
    let mut rec = Vec::with_capacity(FOLDER_VALUE_LEN);
    rec.write_u8(RECORD_FOLDER).unwrap();
    rec.write_u8(0).unwrap(); // reserved
    rec.write_u16::<BigEndian>(v.flags).unwrap();
    rec.write_u16::<BigEndian>(v.valence).unwrap();
    rec.write_u32::<BigEndian>(v.cnid).unwrap();
    rec.write_u32::<BigEndian>(v.crdate).unwrap();
    rec.write_u32::<BigEndian>(v.mddate).unwrap();
    rec.write_u32::<BigEndian>(v.bkdate).unwrap();
    rec.extend_from_slice(&[0u8; 16]); // user info
    rec.extend_from_slice(&[0u8; 16]); // Finder info
    rec.resize(FOLDER_VALUE_LEN, 0);
    rec
}

pub fn parse_folder_value(value: &[u8]) -> Result<FolderValue> {
    if value.len() < FOLDER_VALUE_LEN {
        return Err(HfsError::Malformed("folder catalog record too short".into()));
    }
    let mut cursor = Cursor::new(&value[2..]);
    let flags = cursor.read_u16::<BigEndian>()?;
    let valence = cursor.read_u16::<BigEndian>()?;
    let cnid = cursor.read_u32::<BigEndian>()?;
    let crdate = cursor.read_u32::<BigEndian>()?;
    let mddate = cursor.read_u32::<BigEndian>()?;
    let bkdate = cursor.read_u32::<BigEndian>()?;
    Ok(FolderValue { flags, valence, cnid, crdate, mddate, bkdate })
}

/// Parsed file catalog record value (102 bytes).
#[derive(Debug, Clone)]
pub struct FileValue {
    pub flags: u8,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub finder_flags: u16,
    pub x: i16,
    pub y: i16,
    pub cnid: u32,
    pub data_extent: ExtentRecord,
    pub data_logical_len: u32,
    pub data_physical_len: u32,
    pub rsrc_extent: ExtentRecord,
    pub rsrc_logical_len: u32,
    pub rsrc_physical_len: u32,
    pub crdate: u32,
    pub mddate: u32,
    pub bkdate: u32,
}

impl FileValue {
    pub fn locked(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

#[allow(clippy::too_many_arguments)]
pub fn pack_file_value(
    cnid: u32,
    file_type: [u8; 4],
    creator: [u8; 4],
    finder_flags: u16,
    x: i16,
    y: i16,
    locked: bool,
    crdate: u32,
    mddate: u32,
    bkdate: u32,
    data_extent: ExtentRecord,
    data_logical_len: u32,
    data_physical_len: u32,
    rsrc_extent: ExtentRecord,
    rsrc_logical_len: u32,
    rsrc_physical_len: u32,
) -> Vec<u8> {
    // bit0: locked, bit1: file thread record exists (always true for records
    // this writer produces)
    let flags: u8 = (locked as u8) | (1 << 1);

    let mut rec = Vec::with_capacity(FILE_VALUE_LEN);
    rec.write_u8(RECORD_FILE).unwrap();
    rec.write_u8(0).unwrap(); // reserved
    rec.write_u8(flags).unwrap();
    rec.write_u8(0).unwrap(); // file type byte, unused by this writer
    rec.extend_from_slice(&pack_finder_file_info(file_type, creator, finder_flags, x, y));
    rec.write_u32::<BigEndian>(cnid).unwrap();
    rec.write_u16::<BigEndian>(data_extent[0].0).unwrap();
    rec.write_u32::<BigEndian>(data_logical_len).unwrap();
    rec.write_u32::<BigEndian>(data_physical_len).unwrap();
    rec.write_u16::<BigEndian>(rsrc_extent[0].0).unwrap();
    rec.write_u32::<BigEndian>(rsrc_logical_len).unwrap();
    rec.write_u32::<BigEndian>(rsrc_physical_len).unwrap();
    rec.write_u32::<BigEndian>(crdate).unwrap();
    rec.write_u32::<BigEndian>(mddate).unwrap();
    rec.write_u32::<BigEndian>(bkdate).unwrap();
    rec.extend_from_slice(&[0u8; 16]); // Finder info
    rec.write_u16::<BigEndian>(0).unwrap(); // clump size
    rec.extend_from_slice(&extents::pack_extent_record(data_extent));
    rec.extend_from_slice(&extents::pack_extent_record(rsrc_extent));
    rec.resize(FILE_VALUE_LEN, 0);
    rec
}

pub fn parse_file_value(value: &[u8]) -> Result<FileValue> {
    if value.len() < FILE_VALUE_LEN {
        return Err(HfsError::Malformed("file catalog record too short".into()));
    }
    let flags = value[2];
    let (file_type, creator, finder_flags, x, y) = parse_finder_file_info(&value[4..20]);

    let mut cursor = Cursor::new(&value[20..]);
    let cnid = cursor.read_u32::<BigEndian>()?;
    let data_start = cursor.read_u16::<BigEndian>()?;
    let data_logical_len = cursor.read_u32::<BigEndian>()?;
    let data_physical_len = cursor.read_u32::<BigEndian>()?;
    let rsrc_start = cursor.read_u16::<BigEndian>()?;
    let rsrc_logical_len = cursor.read_u32::<BigEndian>()?;
    let rsrc_physical_len = cursor.read_u32::<BigEndian>()?;
    let crdate = cursor.read_u32::<BigEndian>()?;
    let mddate = cursor.read_u32::<BigEndian>()?;
    let bkdate = cursor.read_u32::<BigEndian>()?;

    let data_extent = extents::parse_extent_record(&value[74..86])?;
    let rsrc_extent = extents::parse_extent_record(&value[86..98])?;
    debug_assert_eq!(data_extent[0].0, data_start);
    debug_assert_eq!(rsrc_extent[0].0, rsrc_start);

    Ok(FileValue {
        flags,
        file_type,
        creator,
        finder_flags,
        x,
        y,
        cnid,
        data_extent,
        data_logical_len,
        data_physical_len,
        rsrc_extent,
        rsrc_logical_len,
        rsrc_physical_len,
        crdate,
        mddate,
        bkdate,
    })
}

/// Thread record value: record type, 9 reserved bytes, parent CNID, and
/// the node's own name.
pub fn pack_thread_value(is_folder: bool, parent_cnid: u32, name: &[u8]) -> Vec<u8> {
    let mut rec = Vec::with_capacity(14 + 1 + name.len());
    rec.write_u8(if is_folder { RECORD_FOLDER_THREAD } else { RECORD_FILE_THREAD }).unwrap();
    rec.write_all(&[0u8; 9]).unwrap();
    rec.write_u32::<BigEndian>(parent_cnid).unwrap();
    rec.push(name.len() as u8);
    rec.extend_from_slice(name);
    rec
}

pub struct ThreadValue {
    pub is_folder: bool,
    pub parent_cnid: u32,
    pub name: Vec<u8>,
}

pub fn parse_thread_value(value: &[u8]) -> Result<ThreadValue> {
    if value.len() < 14 {
        return Err(HfsError::Malformed("thread record too short".into()));
    }
    let record_type = value[0];
    let is_folder = match record_type {
        RECORD_FOLDER_THREAD => true,
        RECORD_FILE_THREAD => false,
        other => return Err(HfsError::Malformed(format!("unexpected thread record type {other}"))),
    };
    let parent_cnid = u32::from_be_bytes([value[10], value[11], value[12], value[13]]);
    let name = bits::parse_pstring_fixed(&value[14..]).to_vec();
    Ok(ThreadValue { is_folder, parent_cnid, name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_key_round_trips() {
        let key = pack_main_key(16, b"Example");
        assert_eq!(parse_main_key(&key).unwrap(), (16, b"Example".to_vec()));
    }

    #[test]
    fn thread_key_has_zero_length_name() {
        let key = pack_thread_key(20);
        let (cnid, name) = parse_main_key(&key).unwrap();
        assert_eq!(cnid, 20);
        assert!(name.is_empty());
    }

    #[test]
    fn folder_value_round_trips() {
        let v = FolderValue { flags: 0, valence: 3, cnid: 20, crdate: 1, mddate: 2, bkdate: 3 };
        let packed = pack_folder_value(&v);
        assert_eq!(packed.len(), FOLDER_VALUE_LEN);
        let parsed = parse_folder_value(&packed).unwrap();
        assert_eq!(parsed.cnid, 20);
        assert_eq!(parsed.valence, 3);
        assert_eq!(parsed.mddate, 2);
    }

    #[test]
    fn file_value_round_trips_and_tracks_locked() {
        let packed = pack_file_value(
            21,
            *b"TEXT",
            *b"ttxt",
            0,
            0,
            0,
            true,
            10,
            20,
            30,
            [(5, 2), (0, 0), (0, 0)],
            900,
            1024,
            [(0, 0), (0, 0), (0, 0)],
            0,
            0,
        );
        assert_eq!(packed.len(), FILE_VALUE_LEN);
        let parsed = parse_file_value(&packed).unwrap();
        assert_eq!(parsed.cnid, 21);
        assert_eq!(parsed.file_type, *b"TEXT");
        assert!(parsed.locked());
        assert_eq!(parsed.data_extent, [(5, 2), (0, 0), (0, 0)]);
        assert_eq!(parsed.data_logical_len, 900);
    }

    #[test]
    fn thread_value_round_trips() {
        let packed = pack_thread_value(true, 2, b"Sub");
        let parsed = parse_thread_value(&packed).unwrap();
        assert!(parsed.is_folder);
        assert_eq!(parsed.parent_cnid, 2);
        assert_eq!(parsed.name, b"Sub");
    }
}
