//! The Volume Information Block (VIB), the allocation-block layout planner,
//! and the top-level [`Volume`] type that ties every other module together
//! into `read`/`write`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::Cursor;

use crate::bits;
use crate::btree;
use crate::catalog::{self, FileValue, FolderValue};
use crate::directory::{Entry, File, Folder, NodeRef};
use crate::error::{HfsError, Result};
use crate::extents::{self, ExtentRecord, OverflowMap, EMPTY_EXTENT_RECORD, FORK_DATA, FORK_RSRC};
use crate::macroman::{self, NameKind};
use crate::resourcefork;

const SIGNATURE: u16 = 0x4244; // "BD"
const VIB_OFFSET: usize = 1024;
const VIB_PACKED_LEN: usize = 162;
const MIN_VOLUME_SIZE: u64 = 400 * 1024;
const CLEANLY_UNMOUNTED: u16 = 1 << 8;

const BOOT_TYPE: [u8; 4] = *b"boot";
const ZSYS_TYPE: [u8; 4] = *b"ZSYS";
const FNDR_TYPE: [u8; 4] = *b"FNDR";

/// Parameters controlling a [`Volume::write`] call.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub size: u64,
    pub align: u32,
    pub desktop_db: bool,
    pub bootable: bool,
    pub startup_app: Option<Vec<String>>,
}

impl WriteOptions {
    /// A `size`-byte image, 512-byte-aligned allocation blocks, with a
    /// Desktop database and boot-block patching both enabled.
    pub fn new(size: u64) -> Self {
        WriteOptions { size, align: 512, desktop_db: true, bootable: true, startup_app: None }
    }

    pub fn align(mut self, align: u32) -> Self {
        self.align = align;
        self
    }

    pub fn desktop_db(mut self, enabled: bool) -> Self {
        self.desktop_db = enabled;
        self
    }

    pub fn bootable(mut self, enabled: bool) -> Self {
        self.bootable = enabled;
        self
    }

    pub fn startup_app(mut self, path: Vec<String>) -> Self {
        self.startup_app = Some(path);
        self
    }
}

/// An in-memory classic HFS volume: its name, its three volume-level
/// timestamps, its root [`Folder`], and (after a successful [`Volume::read`],
/// or left blank for a fresh volume) the raw boot-block bytes.
#[derive(Debug, Clone)]
pub struct Volume {
    pub name: String,
    pub crdate: u32,
    pub mddate: u32,
    pub bkdate: u32,
    pub root: Folder,
    pub boot_blocks: Vec<u8>,
}

impl Default for Volume {
    fn default() -> Self {
        Volume {
            name: "Untitled".to_string(),
            crdate: 0,
            mddate: 0,
            bkdate: 0,
            root: Folder::new(),
            boot_blocks: vec![0u8; 1024],
        }
    }
}

impl Volume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete volume image.
    pub fn read(image: &[u8]) -> Result<Volume> {
        if image.len() < VIB_OFFSET + 512 {
            return Err(HfsError::Malformed("image too short to hold a Volume Information Block".into()));
        }
        let vib = parse_vib(&image[VIB_OFFSET..VIB_OFFSET + VIB_PACKED_LEN])?;

        let overflow_empty = OverflowMap::empty();
        let ext_tree = extents::assemble_fork(
            image,
            vib.alloc_block_start,
            vib.alloc_block_size,
            catalog::CNID_EXTENTS_FILE,
            FORK_DATA,
            vib.extents_file_extent,
            bits::pad_up(vib.extents_file_size as usize, vib.alloc_block_size as usize) as u32,
            vib.extents_file_size,
            &overflow_empty,
        )?;
        let overflow = OverflowMap::build(&ext_tree)?;

        let cat_tree = extents::assemble_fork(
            image,
            vib.alloc_block_start,
            vib.alloc_block_size,
            catalog::CNID_CATALOG_FILE,
            FORK_DATA,
            vib.catalog_file_extent,
            bits::pad_up(vib.catalog_file_size as usize, vib.alloc_block_size as usize) as u32,
            vib.catalog_file_size,
            &overflow,
        )?;

        enum RawNode {
            Folder(FolderValue),
            File(File, FileValue),
        }

        let mut raw: HashMap<u32, RawNode> = HashMap::new();
        let mut children_by_parent: HashMap<u32, Vec<(String, u32)>> = HashMap::new();

        for (key, value) in btree::leaf_records(&cat_tree)? {
            if value.is_empty() {
                continue;
            }
            let (parent_cnid, name_bytes) = catalog::parse_main_key(&key)?;
            match value[0] {
                catalog::RECORD_FOLDER => {
                    let fv = catalog::parse_folder_value(&value)?;
                    let cnid = fv.cnid;
                    let name = macroman::decode(&name_bytes);
                    children_by_parent.entry(parent_cnid).or_default().push((name, cnid));
                    raw.insert(cnid, RawNode::Folder(fv));
                }
                catalog::RECORD_FILE => {
                    let fv = catalog::parse_file_value(&value)?;
                    let data = extents::assemble_fork(
                        image,
                        vib.alloc_block_start,
                        vib.alloc_block_size,
                        fv.cnid,
                        FORK_DATA,
                        fv.data_extent,
                        fv.data_physical_len,
                        fv.data_logical_len,
                        &overflow,
                    )?;
                    let rsrc = extents::assemble_fork(
                        image,
                        vib.alloc_block_start,
                        vib.alloc_block_size,
                        fv.cnid,
                        FORK_RSRC,
                        fv.rsrc_extent,
                        fv.rsrc_physical_len,
                        fv.rsrc_logical_len,
                        &overflow,
                    )?;
                    let file = File {
                        file_type: fv.file_type,
                        creator: fv.creator,
                        flags: fv.finder_flags,
                        x: fv.x,
                        y: fv.y,
                        locked: fv.locked(),
                        crdate: fv.crdate,
                        mddate: fv.mddate,
                        bkdate: fv.bkdate,
                        data,
                        rsrc,
                    };
                    let cnid = fv.cnid;
                    let name = macroman::decode(&name_bytes);
                    children_by_parent.entry(parent_cnid).or_default().push((name, cnid));
                    raw.insert(cnid, RawNode::File(file, fv));
                }
                _ => {} // thread records carry no structural information we need
            }
        }

        fn build_folder(
            cnid: u32,
            children_by_parent: &HashMap<u32, Vec<(String, u32)>>,
            raw: &mut HashMap<u32, RawNode>,
        ) -> Result<Folder> {
            let mut folder = Folder::new();
            if let Some(RawNode::Folder(fv)) = raw.remove(&cnid) {
                folder.flags = fv.flags;
                folder.crdate = fv.crdate;
                folder.mddate = fv.mddate;
                folder.bkdate = fv.bkdate;
            }
            if let Some(kids) = children_by_parent.get(&cnid) {
                for (name, child_cnid) in kids {
                    match raw.get(child_cnid) {
                        Some(RawNode::Folder(_)) => {
                            let sub = build_folder(*child_cnid, children_by_parent, raw)?;
                            folder.insert(name, Entry::Folder(sub))?;
                        }
                        Some(RawNode::File(..)) => {
                            if let Some(RawNode::File(file, _)) = raw.remove(child_cnid) {
                                folder.insert(name, Entry::File(file))?;
                            }
                        }
                        None => {} // dangling reference in a malformed catalog; skip it
                    }
                }
            }
            Ok(folder)
        }

        let mut root = build_folder(catalog::CNID_ROOT, &children_by_parent, &mut raw)?;
        root.remove("Desktop");
        root.remove("Desktop DB");
        root.remove("Desktop DF");

        Ok(Volume {
            name: macroman::decode(&vib.name),
            crdate: vib.crdate,
            mddate: vib.mddate,
            bkdate: vib.bkdate,
            root,
            boot_blocks: image[0..1024].to_vec(),
        })
    }

    /// Serialize this volume to a complete image of exactly `options.size`
    /// bytes.
    pub fn write(&self, options: &WriteOptions) -> Result<Vec<u8>> {
        if options.size < MIN_VOLUME_SIZE || options.size % 512 != 0 {
            return Err(HfsError::BadSize(format!("{} is not a valid volume size", options.size)));
        }
        if options.align < 512 || options.align % 512 != 0 {
            return Err(HfsError::BadSize(format!("{} is not a valid allocation alignment", options.align)));
        }

        let vol_name = macroman::encode_name(&self.name, NameKind::Volume)?;
        let layout = plan_layout(options.size, options.align)?;

        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut accumulate = |chunks: Vec<Vec<u8>>, blocks: &mut Vec<Vec<u8>>| -> Result<(u32, u32)> {
            let start = blocks.len() as u32;
            let count = chunks.len() as u32;
            blocks.extend(chunks);
            if blocks.len() as u64 > layout.total_alloc_blocks as u64 {
                return Err(HfsError::OutOfSpace("volume is too small for its contents".into()));
            }
            Ok((start, count))
        };

        let extoflow_tree = extents::empty_overflow_tree();
        let ext_size = extoflow_tree.len() as u32;
        let (ext_start, ext_count) =
            accumulate(bits::chunk_into_blocks(&extoflow_tree, layout.alloc_block_size as usize), &mut blocks)?;

        let mut root_for_write = self.root.clone();
        if options.desktop_db {
            add_desktop_placeholders(&mut root_for_write, options.size);
        }

        struct NodeMeta {
            cnid: u32,
            parent_cnid: u32,
            data_fork: (u32, u32),
            rsrc_fork: (u32, u32),
        }

        let mut meta: HashMap<Vec<String>, NodeMeta> = HashMap::new();
        meta.insert(
            Vec::new(),
            NodeMeta { cnid: catalog::CNID_ROOT, parent_cnid: catalog::CNID_ROOT_PARENT, data_fork: (0, 0), rsrc_fork: (0, 0) },
        );

        let mut next_cnid = catalog::CNID_FIRST_USER;
        let mut file_count = 0u32;
        let mut dir_count: i64 = -1; // the root folder itself does not count

        let all_paths = root_for_write.iter_paths();
        for (path, node) in &all_paths {
            let cnid = next_cnid;
            next_cnid += 1;
            let parent_path = &path[..path.len() - 1];
            let parent_cnid = meta.get(parent_path).map(|m| m.cnid).unwrap_or(catalog::CNID_ROOT);

            match node {
                NodeRef::Folder(_) => {
                    dir_count += 1;
                    meta.insert(path.clone(), NodeMeta { cnid, parent_cnid, data_fork: (0, 0), rsrc_fork: (0, 0) });
                }
                NodeRef::File(file) => {
                    file_count += 1;
                    let data_fork = if file.data.is_empty() {
                        (0, 0)
                    } else {
                        accumulate(bits::chunk_into_blocks(&file.data, layout.alloc_block_size as usize), &mut blocks)?
                    };
                    let rsrc_fork = if file.rsrc.is_empty() {
                        (0, 0)
                    } else {
                        accumulate(bits::chunk_into_blocks(&file.rsrc, layout.alloc_block_size as usize), &mut blocks)?
                    };
                    meta.insert(path.clone(), NodeMeta { cnid, parent_cnid, data_fork, rsrc_fork });
                }
            }
        }

        let root_direct_files = self.root.iter().filter(|(_, e)| matches!(e, Entry::File(_))).count() as u16;
        let root_direct_dirs = self.root.iter().filter(|(_, e)| matches!(e, Entry::Folder(_))).count() as u16;

        let mut boot_blocks = vec![0u8; 1024];
        let mut system_folder_cnid: u32 = 0;
        let mut startup_app_folder_cnid: u32 = 0;

        if options.bootable {
            for (path, node) in &all_paths {
                if let NodeRef::File(file) = node {
                    if file.file_type.to_ascii_uppercase() == ZSYS_TYPE.to_ascii_uppercase() {
                        // Any failure locating or validating the boot resource leaves
                        // boot blocks and Finder-info slots zero rather than failing
                        // the write.
                        if let Some(blob) = resourcefork::find_resource(&file.rsrc, BOOT_TYPE, 1).ok().flatten() {
                            if blob.len() == 1024 {
                                let parent_path = &path[..path.len() - 1];
                                let sysname = path.last().unwrap();
                                let fndr_name = folder_at(&root_for_write, parent_path)
                                    .and_then(|f| f.iter().find(|(_, e)| matches!(e, Entry::File(ff) if ff.file_type == FNDR_TYPE)))
                                    .map(|(name, _)| name.to_string());

                                boot_blocks = blob;
                                if let Ok(field) = macroman::boot_block_name(sysname) {
                                    boot_blocks[0x0A..0x1A].copy_from_slice(&field);
                                }
                                if let Some(fndr_name) = fndr_name {
                                    if let Ok(field) = macroman::boot_block_name(&fndr_name) {
                                        boot_blocks[0x1A..0x2A].copy_from_slice(&field);
                                    }
                                }
                                system_folder_cnid = meta.get(parent_path).map(|m| m.cnid).unwrap_or(catalog::CNID_ROOT);
                            }
                        }
                    }
                }
            }
        }

        if let Some(app_path) = &options.startup_app {
            if !app_path.is_empty() {
                let parent_path = &app_path[..app_path.len() - 1];
                let resolves = folder_at(&root_for_write, parent_path)
                    .map(|f| matches!(f.get(app_path.last().unwrap()), Some(Entry::File(_))))
                    .unwrap_or(false);
                if resolves {
                    if let Some(m) = meta.get(parent_path) {
                        startup_app_folder_cnid = m.cnid;
                        if system_folder_cnid != 0 {
                            match macroman::boot_block_name(app_path.last().unwrap()) {
                                Ok(field) => boot_blocks[0x5A..0x6A].copy_from_slice(&field),
                                Err(_) => startup_app_folder_cnid = 0,
                            }
                        }
                    }
                }
            }
        }

        let mut catalog_entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        {
            let root_meta = &meta[&Vec::<String>::new()];
            catalog_entries.push((
                catalog::pack_main_key(root_meta.parent_cnid, &vol_name),
                catalog::pack_folder_value(&FolderValue {
                    flags: root_for_write.flags,
                    valence: root_for_write.len() as u16,
                    cnid: root_meta.cnid,
                    crdate: self.crdate,
                    mddate: self.mddate,
                    bkdate: self.bkdate,
                }),
            ));
            catalog_entries.push((
                catalog::pack_thread_key(root_meta.cnid),
                catalog::pack_thread_value(true, root_meta.parent_cnid, &vol_name),
            ));
        }

        for (path, node) in &all_paths {
            let node_meta = &meta[path];
            let name_bytes = macroman::encode_name(path.last().unwrap(), NameKind::File)?;
            let parent_cnid = node_meta.parent_cnid;

            match node {
                NodeRef::Folder(folder) => {
                    catalog_entries.push((
                        catalog::pack_main_key(parent_cnid, &name_bytes),
                        catalog::pack_folder_value(&FolderValue {
                            flags: folder.flags,
                            valence: folder.len() as u16,
                            cnid: node_meta.cnid,
                            crdate: folder.crdate,
                            mddate: folder.mddate,
                            bkdate: folder.bkdate,
                        }),
                    ));
                    catalog_entries.push((
                        catalog::pack_thread_key(node_meta.cnid),
                        catalog::pack_thread_value(true, parent_cnid, &name_bytes),
                    ));
                }
                NodeRef::File(file) => {
                    let data_extent: ExtentRecord = if node_meta.data_fork.1 > 0 {
                        [(node_meta.data_fork.0 as u16, node_meta.data_fork.1 as u16), (0, 0), (0, 0)]
                    } else {
                        EMPTY_EXTENT_RECORD
                    };
                    let rsrc_extent: ExtentRecord = if node_meta.rsrc_fork.1 > 0 {
                        [(node_meta.rsrc_fork.0 as u16, node_meta.rsrc_fork.1 as u16), (0, 0), (0, 0)]
                    } else {
                        EMPTY_EXTENT_RECORD
                    };
                    let data_physical = bits::pad_up(file.data.len(), layout.alloc_block_size as usize) as u32;
                    let rsrc_physical = bits::pad_up(file.rsrc.len(), layout.alloc_block_size as usize) as u32;
                    let value = catalog::pack_file_value(
                        node_meta.cnid,
                        file.file_type,
                        file.creator,
                        file.flags,
                        file.x,
                        file.y,
                        file.locked,
                        file.crdate,
                        file.mddate,
                        file.bkdate,
                        data_extent,
                        file.data.len() as u32,
                        data_physical,
                        rsrc_extent,
                        file.rsrc.len() as u32,
                        rsrc_physical,
                    );
                    catalog_entries.push((catalog::pack_main_key(parent_cnid, &name_bytes), value));
                    catalog_entries.push((
                        catalog::pack_thread_key(node_meta.cnid),
                        catalog::pack_thread_value(false, parent_cnid, &name_bytes),
                    ));
                }
            }
        }

        catalog_entries.sort_by(|(a, _), (b, _)| {
            let (ap, an) = catalog::parse_main_key(a).unwrap();
            let (bp, bn) = catalog::parse_main_key(b).unwrap();
            macroman::catalog_sort_key(ap, &an).cmp(&macroman::catalog_sort_key(bp, &bn))
        });

        let catalog_tree = btree::build_btree(&catalog_entries, catalog::CATALOG_KEY_LEN);
        let cat_size = catalog_tree.len() as u32;
        let (cat_start, cat_count) =
            accumulate(bits::chunk_into_blocks(&catalog_tree, layout.alloc_block_size as usize), &mut blocks)?;

        let used_blocks = blocks.len() as u32;
        let bitmap = bits::bitmap(layout.bitmap_blocks as usize * 4096, used_blocks as usize);

        let vib = Vib {
            crdate: self.crdate,
            mddate: self.mddate,
            attributes: CLEANLY_UNMOUNTED,
            root_file_count: root_direct_files,
            bitmap_start_block: 3,
            alloc_ptr: 0,
            total_alloc_blocks: layout.total_alloc_blocks,
            alloc_block_size: layout.alloc_block_size,
            clump_size: layout.alloc_block_size,
            alloc_block_start: layout.first_alloc_block,
            next_cnid,
            free_alloc_blocks: layout.total_alloc_blocks - used_blocks,
            name: vol_name,
            bkdate: self.bkdate,
            write_count: 0,
            extents_clump_size: layout.alloc_block_size,
            catalog_clump_size: layout.alloc_block_size,
            root_dir_count: root_direct_dirs,
            file_count: file_count,
            dir_count: dir_count.max(0) as u32,
            system_folder_cnid,
            startup_app_folder_cnid,
            extents_file_size: ext_size,
            extents_file_extent: [(ext_start as u16, ext_count as u16), (0, 0), (0, 0)],
            catalog_file_size: cat_size,
            catalog_file_extent: [(cat_start as u16, cat_count as u16), (0, 0), (0, 0)],
        };
        let vib_bytes = pack_vib(&vib);

        let mut image = Vec::with_capacity(options.size as usize);
        if options.bootable {
            image.extend_from_slice(&boot_blocks);
        } else {
            image.extend_from_slice(&[0u8; 1024]);
        }
        image.extend_from_slice(&vib_bytes);
        image.resize(1024 + 512 + layout.bitmap_blocks as usize * 512, 0);
        image[1536..1536 + bitmap.len()].copy_from_slice(&bitmap);

        let alloc_area_start = 512 * layout.first_alloc_block as usize;
        image.resize(alloc_area_start, 0);
        for block in &blocks {
            image.extend_from_slice(block);
        }
        image.resize(options.size as usize - 1024, 0);
        image[options.size as usize - 1024..options.size as usize - 512].copy_from_slice(&vib_bytes);
        image.resize(options.size as usize, 0);

        Ok(image)
    }
}

fn folder_at<'a>(root: &'a Folder, path: &[String]) -> Option<&'a Folder> {
    let mut cur = root;
    for name in path {
        match cur.get(name)? {
            Entry::Folder(f) => cur = f,
            Entry::File(_) => return None,
        }
    }
    Some(cur)
}

/// Finder flag bit for an invisible file.
const FINDER_FLAG_INVISIBLE: u16 = 0x4000;

/// Desktop-database placeholder files. `Desktop` is always added; `Desktop DB`
/// and `Desktop DF` are only added on volumes of at least 2 MiB.
fn add_desktop_placeholders(root: &mut Folder, volume_size: u64) {
    if root.get("Desktop").is_none() {
        root.insert(
            "Desktop",
            Entry::File(File {
                file_type: *b"FNDR",
                creator: *b"ERIK",
                flags: FINDER_FLAG_INVISIBLE,
                rsrc: resourcefork::make_single_resource(*b"STR ", 0, b"\x0AFinder 1.0"),
                ..Default::default()
            }),
        )
        .ok();
    }
    if volume_size < 2 * 1024 * 1024 {
        return;
    }
    if root.get("Desktop DB").is_none() {
        root.insert(
            "Desktop DB",
            Entry::File(File {
                file_type: *b"BTFL",
                creator: *b"DMGR",
                flags: FINDER_FLAG_INVISIBLE,
                data: btree::build_btree(&[], catalog::CATALOG_KEY_LEN),
                ..Default::default()
            }),
        )
        .ok();
    }
    if root.get("Desktop DF").is_none() {
        root.insert(
            "Desktop DF",
            Entry::File(File { file_type: *b"DTFL", creator: *b"DMGR", flags: FINDER_FLAG_INVISIBLE, ..Default::default() }),
        )
        .ok();
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    alloc_block_size: u32,
    bitmap_blocks: u32,
    total_alloc_blocks: u32,
    first_alloc_block: u32,
}

/// Allocation-block size, bitmap-block count, and total allocation-block
/// count for a `size`-byte image whose blocks are a multiple of `align`.
fn plan_layout(size: u64, align: u32) -> Result<Layout> {
    let mut b = align as u64;
    while size.saturating_sub(6 * 512) > b * 65536 {
        b += align as u64;
    }

    let mut m: u64 = 0;
    while (size - (5 + m) * 512) / b > m * 4096 {
        m += 1;
    }
    while (3 + m) * 512 % align as u64 != 0 {
        m += 1;
    }

    let n = (size - (5 + m) * 512) / b;
    if n == 0 || n > 65535 {
        return Err(HfsError::BadSize(format!("{size} bytes does not fit within 65535 allocation blocks")));
    }

    Ok(Layout { alloc_block_size: b as u32, bitmap_blocks: m as u32, total_alloc_blocks: n as u32, first_alloc_block: (3 + m) as u32 })
}

struct Vib {
    crdate: u32,
    mddate: u32,
    attributes: u16,
    root_file_count: u16,
    bitmap_start_block: u16,
    alloc_ptr: u16,
    total_alloc_blocks: u32,
    alloc_block_size: u32,
    clump_size: u32,
    alloc_block_start: u32,
    next_cnid: u32,
    free_alloc_blocks: u32,
    name: Vec<u8>,
    bkdate: u32,
    write_count: u32,
    extents_clump_size: u32,
    catalog_clump_size: u32,
    root_dir_count: u16,
    file_count: u32,
    dir_count: u32,
    system_folder_cnid: u32,
    startup_app_folder_cnid: u32,
    extents_file_size: u32,
    extents_file_extent: ExtentRecord,
    catalog_file_size: u32,
    catalog_file_extent: ExtentRecord,
}

fn pack_vib(v: &Vib) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    out.write_u16::<BigEndian>(SIGNATURE).unwrap();
    out.write_u32::<BigEndian>(v.crdate).unwrap();
    out.write_u32::<BigEndian>(v.mddate).unwrap();
    out.write_u16::<BigEndian>(v.attributes).unwrap();
    out.write_u16::<BigEndian>(v.root_file_count).unwrap();
    out.write_u16::<BigEndian>(v.bitmap_start_block).unwrap();
    out.write_u16::<BigEndian>(v.alloc_ptr).unwrap();
    out.write_u16::<BigEndian>(v.total_alloc_blocks as u16).unwrap();
    out.write_u32::<BigEndian>(v.alloc_block_size).unwrap();
    out.write_u32::<BigEndian>(v.clump_size).unwrap();
    out.write_u16::<BigEndian>(v.alloc_block_start as u16).unwrap();
    out.write_u32::<BigEndian>(v.next_cnid).unwrap();
    out.write_u16::<BigEndian>(v.free_alloc_blocks as u16).unwrap();
    out.extend_from_slice(&bits::pack_pstring_fixed(&v.name, 28, 0));
    out.write_u32::<BigEndian>(v.bkdate).unwrap();
    out.write_u16::<BigEndian>(0).unwrap(); // backup sequence number
    out.write_u32::<BigEndian>(v.write_count).unwrap();
    out.write_u32::<BigEndian>(v.extents_clump_size).unwrap();
    out.write_u32::<BigEndian>(v.catalog_clump_size).unwrap();
    out.write_u16::<BigEndian>(v.root_dir_count).unwrap();
    out.write_u32::<BigEndian>(v.file_count).unwrap();
    out.write_u32::<BigEndian>(v.dir_count).unwrap();

    // Finder info: system folder CNID, startup-app folder CNID (written to
    // both of the next two slots), then 20 reserved bytes.
    out.write_u32::<BigEndian>(v.system_folder_cnid).unwrap();
    out.write_u32::<BigEndian>(v.startup_app_folder_cnid).unwrap();
    out.write_u32::<BigEndian>(v.startup_app_folder_cnid).unwrap();
    out.extend_from_slice(&[0u8; 20]);

    out.write_u16::<BigEndian>(0).unwrap(); // volume cache size, unused
    out.write_u16::<BigEndian>(0).unwrap(); // bitmap cache size, unused
    out.write_u16::<BigEndian>(0).unwrap(); // common-volume cache size, unused

    out.write_u32::<BigEndian>(v.extents_file_size).unwrap();
    out.extend_from_slice(&extents::pack_extent_record(v.extents_file_extent));
    out.write_u32::<BigEndian>(v.catalog_file_size).unwrap();
    out.extend_from_slice(&extents::pack_extent_record(v.catalog_file_extent));

    debug_assert_eq!(out.len(), VIB_PACKED_LEN);
    out.resize(512, 0);
    out
}

fn parse_vib(bytes: &[u8]) -> Result<Vib> {
    let mut cursor = Cursor::new(bytes);
    let sig = cursor.read_u16::<BigEndian>()?;
    if sig != SIGNATURE {
        return Err(HfsError::InvalidSignature(sig));
    }
    let crdate = cursor.read_u32::<BigEndian>()?;
    let mddate = cursor.read_u32::<BigEndian>()?;
    let attributes = cursor.read_u16::<BigEndian>()?;
    let root_file_count = cursor.read_u16::<BigEndian>()?;
    let bitmap_start_block = cursor.read_u16::<BigEndian>()?;
    let alloc_ptr = cursor.read_u16::<BigEndian>()?;
    let total_alloc_blocks = cursor.read_u16::<BigEndian>()? as u32;
    let alloc_block_size = cursor.read_u32::<BigEndian>()?;
    let clump_size = cursor.read_u32::<BigEndian>()?;
    let alloc_block_start = cursor.read_u16::<BigEndian>()? as u32;
    let next_cnid = cursor.read_u32::<BigEndian>()?;
    let free_alloc_blocks = cursor.read_u16::<BigEndian>()? as u32;

    let pos = cursor.position() as usize;
    let name_field = &bytes[pos..pos + 28];
    let name = bits::parse_pstring_fixed(name_field).to_vec();
    cursor.set_position((pos + 28) as u64);

    let bkdate = cursor.read_u32::<BigEndian>()?;
    let _vol_seq_num = cursor.read_u16::<BigEndian>()?;
    let write_count = cursor.read_u32::<BigEndian>()?;
    let extents_clump_size = cursor.read_u32::<BigEndian>()?;
    let catalog_clump_size = cursor.read_u32::<BigEndian>()?;
    let root_dir_count = cursor.read_u16::<BigEndian>()?;
    let file_count = cursor.read_u32::<BigEndian>()?;
    let dir_count = cursor.read_u32::<BigEndian>()?;

    let system_folder_cnid = cursor.read_u32::<BigEndian>()?;
    let startup_app_folder_cnid = cursor.read_u32::<BigEndian>()?;
    let _startup_app_folder_cnid_dup = cursor.read_u32::<BigEndian>()?;
    let pos = cursor.position() as usize;
    cursor.set_position((pos + 20) as u64);

    let _vcsize = cursor.read_u16::<BigEndian>()?;
    let _vbmcsize = cursor.read_u16::<BigEndian>()?;
    let _ctlcsize = cursor.read_u16::<BigEndian>()?;

    let extents_file_size = cursor.read_u32::<BigEndian>()?;
    let pos = cursor.position() as usize;
    let extents_file_extent = extents::parse_extent_record(&bytes[pos..pos + 12])?;
    cursor.set_position((pos + 12) as u64);

    let catalog_file_size = cursor.read_u32::<BigEndian>()?;
    let pos = cursor.position() as usize;
    let catalog_file_extent = extents::parse_extent_record(&bytes[pos..pos + 12])?;

    Ok(Vib {
        crdate,
        mddate,
        attributes,
        root_file_count,
        bitmap_start_block,
        alloc_ptr,
        total_alloc_blocks,
        alloc_block_size,
        clump_size,
        alloc_block_start,
        next_cnid,
        free_alloc_blocks,
        name,
        bkdate,
        write_count,
        extents_clump_size,
        catalog_clump_size,
        root_dir_count,
        file_count,
        dir_count,
        system_folder_cnid,
        startup_app_folder_cnid,
        extents_file_size,
        extents_file_extent,
        catalog_file_size,
        catalog_file_extent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_layout_rejects_undersized_volume() {
        assert!(plan_layout(1024, 512).is_err());
    }

    #[test]
    fn plan_layout_keeps_total_blocks_addressable() {
        let layout = plan_layout(20 * 1024 * 1024, 512).unwrap();
        assert!(layout.total_alloc_blocks <= 65535);
        assert!(layout.alloc_block_size >= 512);
    }

    #[test]
    fn empty_volume_round_trips() {
        let vol = Volume::new();
        let image = vol.write(&WriteOptions::new(800 * 1024).desktop_db(false).bootable(false)).unwrap();
        assert_eq!(&image[1024..1026], &[0x42, 0x44]);

        let back = Volume::read(&image).unwrap();
        assert_eq!(back.name, "Untitled");
        assert!(back.root.is_empty());
    }

    #[test]
    fn single_file_round_trips() {
        let mut vol = Volume::new();
        vol.root
            .insert(
                "hello.txt",
                Entry::File(File { file_type: *b"TEXT", creator: *b"ttxt", data: b"hello world".to_vec(), ..Default::default() }),
            )
            .unwrap();

        let options = WriteOptions::new(800 * 1024).desktop_db(false).bootable(false);
        let image = vol.write(&options).unwrap();
        let back = Volume::read(&image).unwrap();

        let file = back.root.get("hello.txt").unwrap().as_file().unwrap();
        assert_eq!(file.data, b"hello world");
        assert_eq!(file.file_type, *b"TEXT");
    }

    #[test]
    fn write_is_idempotent_through_read() {
        let mut vol = Volume::new();
        vol.root.insert("a", Entry::File(File { data: b"aaa".to_vec(), ..Default::default() })).unwrap();
        vol.root.insert("b", Entry::File(File { data: b"bbb".to_vec(), ..Default::default() })).unwrap();

        let options = WriteOptions::new(800 * 1024).desktop_db(false).bootable(false);
        let image1 = vol.write(&options).unwrap();
        let reread = Volume::read(&image1).unwrap();
        let image2 = reread.write(&options).unwrap();
        let reread2 = Volume::read(&image2).unwrap();
        let image3 = reread2.write(&options).unwrap();
        assert_eq!(image2, image3);
    }

    #[test]
    fn case_insensitive_child_lookup_survives_round_trip() {
        let mut vol = Volume::new();
        vol.root.insert("ALPHA", Entry::File(File::default())).unwrap();
        let options = WriteOptions::new(800 * 1024).desktop_db(false).bootable(false);
        let image = vol.write(&options).unwrap();
        let back = Volume::read(&image).unwrap();
        assert!(back.root.get("alpha").is_some());
        assert_eq!(back.root.keys().collect::<Vec<_>>(), vec!["ALPHA"]);
    }

    #[test]
    fn oversized_fork_reports_out_of_space() {
        let mut vol = Volume::new();
        vol.root.insert("big", Entry::File(File { data: vec![0u8; 10 * 1024 * 1024], ..Default::default() })).unwrap();
        let options = WriteOptions::new(400 * 1024).desktop_db(false).bootable(false);
        assert!(matches!(vol.write(&options), Err(HfsError::OutOfSpace(_))));
    }

    #[test]
    fn desktop_placeholders_are_stripped_on_read() {
        let vol = Volume::new();
        let options = WriteOptions::new(800 * 1024).desktop_db(true).bootable(false);
        let image = vol.write(&options).unwrap();
        let back = Volume::read(&image).unwrap();
        assert!(back.root.get("Desktop").is_none());
        assert!(back.root.get("Desktop DB").is_none());
        assert!(back.root.get("Desktop DF").is_none());
    }

    #[test]
    fn small_volume_gets_desktop_only_not_db_or_df() {
        let mut vol = Volume::new();
        vol.root.insert("a", Entry::File(File { data: b"aaa".to_vec(), ..Default::default() })).unwrap();
        let options = WriteOptions::new(800 * 1024).desktop_db(true).bootable(false);
        let image = vol.write(&options).unwrap();

        let mut augmented = vol.root.clone();
        add_desktop_placeholders(&mut augmented, options.size);
        assert!(augmented.get("Desktop").is_some());
        assert!(augmented.get("Desktop DB").is_none());
        assert!(augmented.get("Desktop DF").is_none());

        // Root file/dir counts in the VIB exclude the desktop placeholder even
        // though it is present in the written catalog.
        let root_file_count = u16::from_be_bytes([image[1024 + 12], image[1024 + 13]]);
        assert_eq!(root_file_count, 1);
    }

    #[test]
    fn large_volume_gets_all_three_desktop_placeholders() {
        let vol = Volume::new();
        let options = WriteOptions::new(2 * 1024 * 1024).desktop_db(true).bootable(false);
        let mut augmented = vol.root.clone();
        add_desktop_placeholders(&mut augmented, options.size);
        assert!(augmented.get("Desktop").is_some());
        assert!(augmented.get("Desktop DB").is_some());
        assert!(augmented.get("Desktop DF").is_some());
    }

    #[test]
    fn bootable_write_tolerates_unparseable_system_resource_fork() {
        let mut vol = Volume::new();
        vol.root
            .insert(
                "System",
                Entry::File(File { file_type: *b"ZSYS", creator: *b"MACS", rsrc: b"not a resource fork".to_vec(), ..Default::default() }),
            )
            .unwrap();
        let options = WriteOptions::new(800 * 1024).desktop_db(false).bootable(true);
        let image = vol.write(&options).unwrap();
        assert_eq!(&image[0..1024], &[0u8; 1024][..]);
    }

    #[test]
    fn undersized_volume_rejected() {
        let vol = Volume::new();
        let options = WriteOptions::new(799 * 1024);
        assert!(matches!(vol.write(&options), Err(HfsError::BadSize(_))));
    }

    #[test]
    fn single_file_both_forks_survive_three_write_cycles() {
        let payload = b"1234".repeat(4096);
        let mut vol = Volume::new();
        vol.root
            .insert(
                "single file",
                Entry::File(File { data: payload.clone(), rsrc: payload.clone(), ..Default::default() }),
            )
            .unwrap();

        let options = WriteOptions::new(2 * 1024 * 1024).desktop_db(false).bootable(false);
        let image1 = vol.write(&options).unwrap();
        let copy1 = Volume::read(&image1).unwrap();
        let image2 = copy1.write(&options).unwrap();
        let copy2 = Volume::read(&image2).unwrap();
        let image3 = copy2.write(&options).unwrap();
        let copy3 = Volume::read(&image3).unwrap();

        for copy in [&copy1, &copy2, &copy3] {
            let file = copy.root.get("single file").unwrap().as_file().unwrap();
            assert_eq!(file.data, payload);
            assert_eq!(file.rsrc, payload);
        }
        let needle = b"1234".repeat(4096);
        assert!(image1.windows(needle.len()).any(|w| w == needle.as_slice()));
    }

    #[test]
    fn one_hundred_files_round_trip() {
        let mut vol = Volume::new();
        vol.name = "ElmoTest".to_string();
        let payload = b"12345".repeat(10);
        for i in 0..100 {
            vol.root
                .insert(&format!("testfile-{i:03}"), Entry::File(File { data: payload.clone(), ..Default::default() }))
                .unwrap();
        }

        let options = WriteOptions::new(2 * 1024 * 1024).desktop_db(false).bootable(false);
        let image = vol.write(&options).unwrap();
        let back = Volume::read(&image).unwrap();

        assert_eq!(back.root.len(), 100);
        assert_eq!(back.root.get("testfile-000").unwrap().as_file().unwrap().data, payload);
        assert_eq!(back.root.get("testfile-099").unwrap().as_file().unwrap().data, payload);
    }
}
