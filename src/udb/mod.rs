//! The persistent zone database: one self-describing file holding an
//! allocator, a radix tree index keyed by reversed canonical apex names,
//! and the zone data itself as chains of wire-format records.
//!
//! Every reference stored in the file is a byte offset from the file start
//! (`URef`), so the image can live at any address and needs no fixups when
//! it is reloaded or grown. Mutations write payload bytes first and commit
//! by updating a single superblock or free-list word; `sync` writes the
//! data region before the superblock so a crash leaves either the old or
//! the new state visible.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::network_order::{FromNetworkOrder, ToNetworkOrder};
use crate::rfc1035::ResourceRecord;
use crate::zone::Zone;

pub mod alloc;
pub mod radix;

pub use radix::RadTree;

pub const UDB_MAGIC: &[u8; 8] = b"authdnsu";
pub const UDB_VERSION: u32 = 1;

// superblock: magic(8) version(4) pad(4) root(8) stat_data(8) stat_alloc(8)
// reserved up to 64
pub const SUPERBLOCK_SIZE: usize = 64;
const OFF_ROOT: u64 = 16;
const OFF_STAT_DATA: u64 = 24;
const OFF_STAT_ALLOC: u64 = 32;

// free-list heads live right behind the superblock, one per size class
pub const FREELIST_TABLE: u64 = 64;

// chunks start here, power-of-two aligned relative to this base
pub const DATA_START: u64 = 256;

/// A typed file offset; 0 is the null reference.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct URef(pub u64);

impl URef {
    pub const NULL: URef = URef(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

// every chunk carries one of these tags; Free chunks are threaded on the
// per-class free lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Free = 0,
    Radtree = 1,
    Radnode = 2,
    Radarray = 3,
    Zone = 4,
    Rr = 5,
}

impl ChunkType {
    pub fn from_tag(tag: u8) -> Option<ChunkType> {
        match tag {
            0 => Some(ChunkType::Free),
            1 => Some(ChunkType::Radtree),
            2 => Some(ChunkType::Radnode),
            3 => Some(ChunkType::Radarray),
            4 => Some(ChunkType::Zone),
            5 => Some(ChunkType::Rr),
            _ => None,
        }
    }
}

pub struct Udb {
    file: File,
    path: PathBuf,
    // the whole file image; all reads and writes go through it and `sync`
    // flushes it back in commit order
    pub(crate) map: Vec<u8>,
}

impl Udb {
    /// Create a fresh database file with an empty radix tree as its root.
    pub fn create(path: &Path) -> DNSResult<Udb> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let mut udb = Udb {
            file,
            path: path.to_path_buf(),
            map: vec![0u8; DATA_START as usize],
        };
        udb.map[..8].copy_from_slice(UDB_MAGIC);
        BigEndian::write_u32(&mut udb.map[8..12], UDB_VERSION);

        let tree = RadTree::create(&mut udb)?;
        udb.write_uref(OFF_ROOT, tree.tree_ref);
        udb.sync()?;
        Ok(udb)
    }

    /// Open an existing database, validating its superblock.
    pub fn open(path: &Path) -> DNSResult<Udb> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut map = Vec::new();
        file.read_to_end(&mut map)?;

        if map.len() < DATA_START as usize || &map[..8] != UDB_MAGIC {
            return Err(DNSError::Udb(format!(
                "{} is not a zone database",
                path.display()
            )));
        }
        let version = BigEndian::read_u32(&map[8..12]);
        if version != UDB_VERSION {
            return Err(DNSError::Udb(format!(
                "{}: unsupported database version {}",
                path.display(),
                version
            )));
        }

        Ok(Udb {
            file,
            path: path.to_path_buf(),
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The root radix tree recorded in the superblock.
    pub fn radix_tree(&self) -> RadTree {
        RadTree {
            tree_ref: self.read_uref(OFF_ROOT),
        }
    }

    //--------------------------------------------------------------------
    // raw accessors
    //--------------------------------------------------------------------
    pub(crate) fn read_u8(&self, off: u64) -> u8 {
        self.map[off as usize]
    }

    pub(crate) fn write_u8(&mut self, off: u64, value: u8) {
        self.map[off as usize] = value;
    }

    pub(crate) fn read_u16(&self, off: u64) -> u16 {
        BigEndian::read_u16(&self.map[off as usize..])
    }

    pub(crate) fn write_u16(&mut self, off: u64, value: u16) {
        BigEndian::write_u16(&mut self.map[off as usize..off as usize + 2], value);
    }

    pub(crate) fn read_u32(&self, off: u64) -> u32 {
        BigEndian::read_u32(&self.map[off as usize..])
    }

    pub(crate) fn write_u32(&mut self, off: u64, value: u32) {
        BigEndian::write_u32(&mut self.map[off as usize..off as usize + 4], value);
    }

    pub(crate) fn read_u64(&self, off: u64) -> u64 {
        BigEndian::read_u64(&self.map[off as usize..])
    }

    pub(crate) fn write_u64(&mut self, off: u64, value: u64) {
        BigEndian::write_u64(&mut self.map[off as usize..off as usize + 8], value);
    }

    pub(crate) fn read_uref(&self, off: u64) -> URef {
        URef(self.read_u64(off))
    }

    pub(crate) fn write_uref(&mut self, off: u64, value: URef) {
        self.write_u64(off, value.0);
    }

    pub(crate) fn read_bytes(&self, off: u64, len: usize) -> &[u8] {
        &self.map[off as usize..off as usize + len]
    }

    pub(crate) fn write_bytes(&mut self, off: u64, data: &[u8]) {
        self.map[off as usize..off as usize + data.len()].copy_from_slice(data);
    }

    pub fn stat_data(&self) -> u64 {
        self.read_u64(OFF_STAT_DATA)
    }

    pub(crate) fn set_stat_data(&mut self, value: u64) {
        self.write_u64(OFF_STAT_DATA, value);
    }

    pub fn stat_alloc(&self) -> u64 {
        self.read_u64(OFF_STAT_ALLOC)
    }

    pub(crate) fn set_stat_alloc(&mut self, value: u64) {
        self.write_u64(OFF_STAT_ALLOC, value);
    }

    /// Flush the image: data region first, superblock last, so the commit
    /// word ordering survives a crash in between.
    pub fn sync(&mut self) -> DNSResult<()> {
        self.file.set_len(self.map.len() as u64)?;

        self.file.seek(SeekFrom::Start(SUPERBLOCK_SIZE as u64))?;
        self.file.write_all(&self.map[SUPERBLOCK_SIZE..])?;
        self.file.sync_data()?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.map[..SUPERBLOCK_SIZE])?;
        self.file.sync_all()?;
        Ok(())
    }

    //--------------------------------------------------------------------
    // zone storage: radix elem -> zone chunk -> chain of rr chunks
    //
    // zone chunk: rr_head URef(8), serial u32(4), name_len u16(2), name
    // rr chunk:   next URef(8), rr_len u16(2), wire-format record
    //--------------------------------------------------------------------

    /// Store a zone, replacing any previous copy, and commit.
    pub fn write_zone(&mut self, zone: &Zone) -> DNSResult<()> {
        let mut tree = self.radix_tree();
        let key = zone.apex.canonical_key();

        // drop the previous copy of this zone first
        let old = tree.search(self, &key)?;
        if !old.is_null() {
            self.free_zone_node(&mut tree, old)?;
        }

        // build the record chain back to front so each chunk can point at
        // the next one
        let mut next = URef::NULL;
        let mut records: Vec<Vec<u8>> = Vec::new();
        for set in zone.iter_rrsets() {
            for rr in set.records() {
                let mut wire = Vec::new();
                rr.to_network_bytes(&mut wire)?;
                records.push(wire);
            }
        }
        for wire in records.iter().rev() {
            let rr_ref = self.alloc(ChunkType::Rr, 10 + wire.len())?;
            self.write_uref(rr_ref.0, next);
            self.write_u16(rr_ref.0 + 8, wire.len() as u16);
            self.write_bytes(rr_ref.0 + 10, wire);
            next = rr_ref;
        }

        let mut name_wire = Vec::new();
        zone.apex.to_wire(&mut name_wire);
        let zone_ref = self.alloc(ChunkType::Zone, 14 + name_wire.len())?;
        self.write_uref(zone_ref.0, next);
        self.write_u32(zone_ref.0 + 8, zone.serial());
        self.write_u16(zone_ref.0 + 12, name_wire.len() as u16);
        self.write_bytes(zone_ref.0 + 14, &name_wire);

        tree.insert(self, &key, zone_ref)?;
        self.sync()
    }

    /// Remove a zone, if present, and commit.
    pub fn delete_zone(&mut self, apex: &DomainName) -> DNSResult<()> {
        let mut tree = self.radix_tree();
        let key = apex.canonical_key();
        let node = tree.search(self, &key)?;
        if !node.is_null() {
            self.free_zone_node(&mut tree, node)?;
            self.sync()?;
        }
        Ok(())
    }

    fn free_zone_node(&mut self, tree: &mut RadTree, node: URef) -> DNSResult<()> {
        let zone_ref = radix::node_elem(self, node);
        if !zone_ref.is_null() {
            let mut rr = self.read_uref(zone_ref.0);
            while !rr.is_null() {
                let next = self.read_uref(rr.0);
                let rr_len = self.read_u16(rr.0 + 8) as usize;
                self.free(rr, 10 + rr_len)?;
                rr = next;
            }
            let name_len = self.read_u16(zone_ref.0 + 12) as usize;
            self.free(zone_ref, 14 + name_len)?;
        }
        tree.delete(self, node)
    }

    /// The serial recorded for a stored zone.
    pub fn zone_serial(&mut self, apex: &DomainName) -> DNSResult<Option<u32>> {
        let tree = self.radix_tree();
        let node = tree.search(self, &apex.canonical_key())?;
        if node.is_null() {
            return Ok(None);
        }
        let zone_ref = radix::node_elem(self, node);
        Ok(Some(self.read_u32(zone_ref.0 + 8)))
    }

    /// Read every stored zone back into memory, in canonical apex order.
    pub fn load_zones(&mut self) -> DNSResult<Vec<Zone>> {
        let tree = self.radix_tree();
        let mut zones = Vec::new();

        let mut node = tree.first(self)?;
        while !node.is_null() {
            let zone_ref = radix::node_elem(self, node);

            let name_len = self.read_u16(zone_ref.0 + 12) as usize;
            let name_wire = self.read_bytes(zone_ref.0 + 14, name_len).to_vec();
            let mut apex = DomainName::default();
            apex.from_position(0, &name_wire)?;

            let mut records = Vec::new();
            let mut rr = self.read_uref(zone_ref.0);
            while !rr.is_null() {
                let rr_len = self.read_u16(rr.0 + 8) as usize;
                let wire = self.read_bytes(rr.0 + 10, rr_len).to_vec();
                let mut cursor = std::io::Cursor::new(wire.as_slice());
                let mut record = ResourceRecord::default();
                record.from_network_bytes(&mut cursor)?;
                records.push(record);
                rr = self.read_uref(rr.0);
            }

            zones.push(Zone::from_records(apex, records)?);
            node = tree.next(self, node)?;
        }

        Ok(zones)
    }

    /// Enumerate the self-relative references inside one chunk payload, by
    /// chunk type. Integrity checking and compaction both drive this table.
    pub fn walk_chunk(&self, tag: ChunkType, payload: URef, refs: &mut Vec<u64>) {
        match tag {
            ChunkType::Free => {}
            ChunkType::Radtree => refs.push(payload.0),
            ChunkType::Radnode => {
                refs.push(payload.0); // parent
                refs.push(payload.0 + 8); // elem
                refs.push(payload.0 + 16); // lookup
            }
            ChunkType::Radarray => {
                let cap = self.read_u16(payload.0 + 2) as u64;
                for i in 0..cap {
                    refs.push(payload.0 + 8 + i * 16);
                }
            }
            ChunkType::Zone => refs.push(payload.0),
            ChunkType::Rr => refs.push(payload.0),
        }
    }

    /// Walk every chunk in the file: headers must carry a known type tag
    /// and a size class agreeing with the trailing marker, and every
    /// reference the walker table enumerates must stay inside the file.
    /// Finishes with the radix tree's own structural check.
    pub fn check_integrity(&self) -> DNSResult<()> {
        let mut offset = DATA_START;
        let end = self.map.len() as u64;
        let mut refs = Vec::new();

        while offset < end {
            let exp = self.read_u8(offset);
            if !(alloc::MIN_EXP..=alloc::MAX_EXP).contains(&exp) {
                return Err(DNSError::Udb(format!(
                    "corrupt chunk {:#x}: bad size class {}",
                    offset, exp
                )));
            }
            let size = 1u64 << exp;
            if offset + size > end || self.read_u8(offset + size - 1) != exp {
                return Err(DNSError::Udb(format!(
                    "corrupt chunk {:#x}: truncated or marker mismatch",
                    offset
                )));
            }
            let tag = ChunkType::from_tag(self.read_u8(offset + 1)).ok_or_else(|| {
                DNSError::Udb(format!("corrupt chunk {:#x}: unknown type tag", offset))
            })?;

            refs.clear();
            self.walk_chunk(tag, URef(offset + 8), &mut refs);
            for location in &refs {
                let target = self.read_u64(*location);
                if target >= end {
                    return Err(DNSError::Udb(format!(
                        "chunk {:#x}: reference at {:#x} points past the file",
                        offset, location
                    )));
                }
            }

            offset += size;
        }

        self.radix_tree().check(self)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::zone::tests::{a_rr, dn, ns_rr, sample_zone, soa_rr};

    pub fn temp_db_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("authdns-test-{}-{}.udb", std::process::id(), tag));
        path
    }

    #[test]
    fn create_open_round_trip() {
        let path = temp_db_path("create");
        {
            let mut udb = Udb::create(&path).unwrap();
            assert!(udb.load_zones().unwrap().is_empty());
        }
        {
            let mut udb = Udb::open(&path).unwrap();
            assert!(udb.load_zones().unwrap().is_empty());
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zone_round_trip() {
        let path = temp_db_path("roundtrip");
        let zone = sample_zone();
        {
            let mut udb = Udb::create(&path).unwrap();
            udb.write_zone(&zone).unwrap();
            assert_eq!(
                udb.zone_serial(&dn("example.com")).unwrap(),
                Some(2024010101)
            );
        }
        {
            // reopen after sync: identical contents
            let mut udb = Udb::open(&path).unwrap();
            let loaded = udb.load_zones().unwrap();
            assert_eq!(loaded.len(), 1);
            assert_eq!(loaded[0].apex, zone.apex);
            assert_eq!(loaded[0].serial(), zone.serial());
            assert_eq!(loaded[0].record_count(), zone.record_count());
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn zone_replace_frees_old_copy() {
        let path = temp_db_path("replace");
        let mut udb = Udb::create(&path).unwrap();

        udb.write_zone(&sample_zone()).unwrap();
        let stat_after_first = udb.stat_data();

        // replacing the same zone must not leak: the accounting returns to
        // the same figure
        udb.write_zone(&sample_zone()).unwrap();
        assert_eq!(udb.stat_data(), stat_after_first);

        // a zone with fewer records shrinks the accounting
        let small = Zone::from_records(
            dn("small.test"),
            vec![soa_rr("small.test", 1), ns_rr("small.test", "ns1.small.test")],
        )
        .unwrap();
        udb.write_zone(&small).unwrap();
        let with_both = udb.stat_data();
        udb.delete_zone(&dn("small.test")).unwrap();
        assert!(udb.stat_data() < with_both);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn integrity_check_catches_corruption() {
        let path = temp_db_path("fsck");
        let mut udb = Udb::create(&path).unwrap();
        udb.write_zone(&sample_zone()).unwrap();
        udb.check_integrity().unwrap();

        // stomp on a chunk type tag: the checker must notice
        udb.map[DATA_START as usize + 1] = 0xEE;
        assert!(udb.check_integrity().is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn multiple_zones_load_in_order() {
        let path = temp_db_path("multi");
        let mut udb = Udb::create(&path).unwrap();

        for name in ["b.test", "a.test", "c.test"] {
            let zone = Zone::from_records(
                dn(name),
                vec![
                    soa_rr(name, 42),
                    a_rr(&format!("www.{}", name), [192, 0, 2, 1]),
                ],
            )
            .unwrap();
            udb.write_zone(&zone).unwrap();
        }

        let zones = udb.load_zones().unwrap();
        let apexes: Vec<String> = zones.iter().map(|z| z.apex.to_string()).collect();
        assert_eq!(apexes, vec!["a.test.", "b.test.", "c.test."]);

        std::fs::remove_file(&path).unwrap();
    }
}
