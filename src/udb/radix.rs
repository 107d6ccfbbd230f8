//! The on-file radix tree: a byte-oriented trie with per-edge shared
//! prefixes, 256-way fan-out and an ordered walk, all expressed in file
//! offsets so the image stays position independent.
//!
//! Layouts (payload offsets):
//!
//!   radtree:  root URef(+0), count u64(+8)
//!   radnode:  parent URef(+0), elem URef(+8), lookup URef(+16),
//!             pidx u8(+24), offset u8(+25)
//!   radarray: len u16(+0), capacity u16(+2), str_cap u16(+4), pad(+6),
//!             capacity entries of { node URef(8), edge_len u8, pad(7) },
//!             then capacity * str_cap edge bytes
//!
//! Invariants kept at every mutation: len <= capacity <= 256,
//! offset + len <= 256, capacity < 2*len when non-empty (density), every
//! child's parent/pidx back-references match its slot, the longest edge
//! fits str_cap and reaches at least str_cap/2.
use crate::error::{DNSError, DNSResult};

use super::{ChunkType, URef, Udb};

const RADTREE_SIZE: usize = 16;
const RADNODE_SIZE: usize = 32;

// edge lengths are stored in one byte
const MAX_EDGE_LEN: usize = 255;

//------------------------------------------------------------------------
// node field accessors
//------------------------------------------------------------------------
pub fn node_parent(udb: &Udb, n: URef) -> URef {
    udb.read_uref(n.0)
}

pub fn node_elem(udb: &Udb, n: URef) -> URef {
    udb.read_uref(n.0 + 8)
}

pub fn node_lookup(udb: &Udb, n: URef) -> URef {
    udb.read_uref(n.0 + 16)
}

pub fn node_pidx(udb: &Udb, n: URef) -> u8 {
    udb.read_u8(n.0 + 24)
}

pub fn node_offset(udb: &Udb, n: URef) -> u8 {
    udb.read_u8(n.0 + 25)
}

fn set_node_parent(udb: &mut Udb, n: URef, parent: URef, pidx: u8) {
    udb.write_uref(n.0, parent);
    udb.write_u8(n.0 + 24, pidx);
}

fn set_node_elem(udb: &mut Udb, n: URef, elem: URef) {
    udb.write_uref(n.0 + 8, elem);
}

fn array_len(udb: &Udb, n: URef) -> usize {
    let lookup = node_lookup(udb, n);
    if lookup.is_null() {
        0
    } else {
        udb.read_u16(lookup.0) as usize
    }
}

fn array_size(cap: usize, str_cap: usize) -> usize {
    8 + cap * 16 + cap * str_cap
}

// the (byte, child, edge) view of a node's lookup array, null slots skipped
fn read_entries(udb: &Udb, n: URef) -> Vec<(u8, URef, Vec<u8>)> {
    let lookup = node_lookup(udb, n);
    if lookup.is_null() {
        return Vec::new();
    }
    let len = udb.read_u16(lookup.0) as usize;
    let cap = udb.read_u16(lookup.0 + 2) as u64;
    let str_cap = udb.read_u16(lookup.0 + 4) as u64;
    let offset = node_offset(udb, n) as usize;

    let mut entries = Vec::new();
    for i in 0..len {
        let entry = lookup.0 + 8 + i as u64 * 16;
        let child = udb.read_uref(entry);
        if child.is_null() {
            continue;
        }
        let edge_len = udb.read_u8(entry + 8) as usize;
        let strings = lookup.0 + 8 + cap * 16 + i as u64 * str_cap;
        entries.push((
            (offset + i) as u8,
            child,
            udb.read_bytes(strings, edge_len).to_vec(),
        ));
    }
    entries
}

// the child slot for one byte, without materializing the whole array
fn entry_for(udb: &Udb, n: URef, byte: u8) -> Option<(URef, Vec<u8>)> {
    let lookup = node_lookup(udb, n);
    if lookup.is_null() {
        return None;
    }
    let len = udb.read_u16(lookup.0) as usize;
    let offset = node_offset(udb, n);
    if byte < offset || (byte - offset) as usize >= len {
        return None;
    }
    let idx = (byte - offset) as u64;
    let cap = udb.read_u16(lookup.0 + 2) as u64;
    let str_cap = udb.read_u16(lookup.0 + 4) as u64;
    let entry = lookup.0 + 8 + idx * 16;
    let child = udb.read_uref(entry);
    if child.is_null() {
        return None;
    }
    let edge_len = udb.read_u8(entry + 8) as usize;
    let strings = lookup.0 + 8 + cap * 16 + idx * str_cap;
    Some((child, udb.read_bytes(strings, edge_len).to_vec()))
}

/// Rebuild a node's lookup array for the given entry list: tight offset,
/// power-of-two capacities, children re-linked. Every structural change
/// funnels through here, which is what keeps the array invariants true.
fn write_entries(udb: &mut Udb, n: URef, entries: &[(u8, URef, Vec<u8>)]) -> DNSResult<()> {
    let old_lookup = node_lookup(udb, n);
    let old_size = if old_lookup.is_null() {
        0
    } else {
        let cap = udb.read_u16(old_lookup.0 + 2) as usize;
        let str_cap = udb.read_u16(old_lookup.0 + 4) as usize;
        array_size(cap, str_cap)
    };

    if entries.is_empty() {
        udb.write_uref(n.0 + 16, URef::NULL);
        udb.write_u8(n.0 + 25, 0);
        if !old_lookup.is_null() {
            udb.free(old_lookup, old_size)?;
        }
        return Ok(());
    }

    let min_byte = entries.iter().map(|e| e.0).min().unwrap_or(0);
    let max_byte = entries.iter().map(|e| e.0).max().unwrap_or(0);
    let len = (max_byte - min_byte) as usize + 1;
    let max_edge = entries.iter().map(|e| e.2.len()).max().unwrap_or(0);
    if max_edge > MAX_EDGE_LEN {
        return Err(DNSError::Udb("radix edge too long".to_string()));
    }

    let cap = len.next_power_of_two();
    let str_cap = if max_edge == 0 {
        0
    } else {
        max_edge.next_power_of_two()
    };

    let lookup = udb.alloc(ChunkType::Radarray, array_size(cap, str_cap))?;
    udb.write_u16(lookup.0, len as u16);
    udb.write_u16(lookup.0 + 2, cap as u16);
    udb.write_u16(lookup.0 + 4, str_cap as u16);

    for (byte, child, edge) in entries {
        let idx = (byte - min_byte) as u64;
        let entry = lookup.0 + 8 + idx * 16;
        udb.write_uref(entry, *child);
        udb.write_u8(entry + 8, edge.len() as u8);
        let strings = lookup.0 + 8 + cap as u64 * 16 + idx * str_cap as u64;
        udb.write_bytes(strings, edge);
        set_node_parent(udb, *child, n, idx as u8);
    }

    udb.write_uref(n.0 + 16, lookup);
    udb.write_u8(n.0 + 25, min_byte);

    if !old_lookup.is_null() {
        udb.free(old_lookup, old_size)?;
    }
    Ok(())
}

fn new_node(udb: &mut Udb) -> DNSResult<URef> {
    udb.alloc(ChunkType::Radnode, RADNODE_SIZE)
}

fn free_node(udb: &mut Udb, n: URef) -> DNSResult<()> {
    let lookup = node_lookup(udb, n);
    if !lookup.is_null() {
        let cap = udb.read_u16(lookup.0 + 2) as usize;
        let str_cap = udb.read_u16(lookup.0 + 4) as usize;
        udb.free(lookup, array_size(cap, str_cap))?;
    }
    udb.free(n, RADNODE_SIZE)
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// the first element at or below this node, in key order
fn first_in_subtree(udb: &Udb, mut n: URef) -> URef {
    loop {
        if !node_elem(udb, n).is_null() {
            return n;
        }
        match read_entries(udb, n).first() {
            Some((_, child, _)) => n = *child,
            None => return URef::NULL,
        }
    }
}

// the last element at or below this node, in key order
fn last_in_subtree(udb: &Udb, mut n: URef) -> URef {
    loop {
        match read_entries(udb, n).last() {
            Some((_, child, _)) => n = *child,
            None => {
                if !node_elem(udb, n).is_null() {
                    return n;
                }
                return URef::NULL;
            }
        }
    }
}

// the largest element strictly before child slot `before_idx` of `n`,
// climbing towards the root when the subtree is exhausted
fn prev_before(udb: &Udb, mut n: URef, mut before_idx: usize) -> URef {
    loop {
        let lookup = node_lookup(udb, n);
        if !lookup.is_null() {
            for idx in (0..before_idx).rev() {
                let entry = lookup.0 + 8 + idx as u64 * 16;
                let child = udb.read_uref(entry);
                if !child.is_null() {
                    let last = last_in_subtree(udb, child);
                    if !last.is_null() {
                        return last;
                    }
                }
            }
        }
        if !node_elem(udb, n).is_null() {
            return n;
        }
        let parent = node_parent(udb, n);
        if parent.is_null() {
            return URef::NULL;
        }
        before_idx = node_pidx(udb, n) as usize;
        n = parent;
    }
}

/// Handle to a radix tree chunk inside a `Udb`.
#[derive(Debug, Clone, Copy)]
pub struct RadTree {
    pub tree_ref: URef,
}

impl RadTree {
    pub fn create(udb: &mut Udb) -> DNSResult<RadTree> {
        let tree_ref = udb.alloc(ChunkType::Radtree, RADTREE_SIZE)?;
        Ok(RadTree { tree_ref })
    }

    pub fn root(&self, udb: &Udb) -> URef {
        udb.read_uref(self.tree_ref.0)
    }

    pub fn count(&self, udb: &Udb) -> u64 {
        udb.read_u64(self.tree_ref.0 + 8)
    }

    fn bump_count(&self, udb: &mut Udb, delta: i64) {
        let count = (self.count(udb) as i64 + delta) as u64;
        udb.write_u64(self.tree_ref.0 + 8, count);
    }

    pub fn elem(&self, udb: &Udb, node: URef) -> URef {
        node_elem(udb, node)
    }

    /// Exact lookup; the node holding the key's element, or null.
    pub fn search(&self, udb: &Udb, key: &[u8]) -> DNSResult<URef> {
        let mut n = self.root(udb);
        let mut pos = 0usize;

        while !n.is_null() {
            if pos == key.len() {
                return Ok(if node_elem(udb, n).is_null() {
                    URef::NULL
                } else {
                    n
                });
            }
            match entry_for(udb, n, key[pos]) {
                None => return Ok(URef::NULL),
                Some((child, edge)) => {
                    let rest = &key[pos + 1..];
                    if rest.len() < edge.len() || rest[..edge.len()] != edge[..] {
                        return Ok(URef::NULL);
                    }
                    pos += 1 + edge.len();
                    n = child;
                }
            }
        }
        Ok(URef::NULL)
    }

    /// Insert a key mapping to `elem`; at most one internal node and one
    /// leaf are created. Duplicate keys are refused.
    pub fn insert(&mut self, udb: &mut Udb, key: &[u8], elem: URef) -> DNSResult<URef> {
        if self.root(udb).is_null() {
            let root = new_node(udb)?;
            // commit word: the tree points at its new root last
            udb.write_uref(self.tree_ref.0, root);
        }

        let mut n = self.root(udb);
        let mut pos = 0usize;

        loop {
            if pos == key.len() {
                if !node_elem(udb, n).is_null() {
                    return Err(DNSError::Udb("radix key already present".to_string()));
                }
                set_node_elem(udb, n, elem);
                self.bump_count(udb, 1);
                return Ok(n);
            }

            let b = key[pos];
            match entry_for(udb, n, b) {
                None => {
                    // fresh leaf hanging off this node
                    let leaf = new_node(udb)?;
                    set_node_elem(udb, leaf, elem);
                    let mut entries = read_entries(udb, n);
                    entries.push((b, leaf, key[pos + 1..].to_vec()));
                    write_entries(udb, n, &entries)?;
                    self.bump_count(udb, 1);
                    return Ok(leaf);
                }
                Some((child, edge)) => {
                    let rest = &key[pos + 1..];
                    let cp = common_prefix(&edge, rest);
                    if cp == edge.len() {
                        pos += 1 + edge.len();
                        n = child;
                        continue;
                    }

                    // split the edge at the shared prefix
                    let m = new_node(udb)?;
                    let mut entries = read_entries(udb, n);
                    for entry in entries.iter_mut() {
                        if entry.0 == b {
                            entry.1 = m;
                            entry.2 = edge[..cp].to_vec();
                        }
                    }
                    write_entries(udb, n, &entries)?;

                    let mut m_entries = vec![(edge[cp], child, edge[cp + 1..].to_vec())];
                    if rest.len() == cp {
                        // the key ends at the split point
                        set_node_elem(udb, m, elem);
                        write_entries(udb, m, &m_entries)?;
                        self.bump_count(udb, 1);
                        return Ok(m);
                    }
                    let leaf = new_node(udb)?;
                    set_node_elem(udb, leaf, elem);
                    m_entries.push((rest[cp], leaf, rest[cp + 1..].to_vec()));
                    write_entries(udb, m, &m_entries)?;
                    self.bump_count(udb, 1);
                    return Ok(leaf);
                }
            }
        }
    }

    /// Remove the element at `node` and clean up the chain it leaves
    /// behind: childless nodes disappear, a pass-through node merges its
    /// single child's edge back into its parent when it fits.
    pub fn delete(&mut self, udb: &mut Udb, node: URef) -> DNSResult<()> {
        if node_elem(udb, node).is_null() {
            return Err(DNSError::Udb("radix delete of an empty node".to_string()));
        }
        set_node_elem(udb, node, URef::NULL);
        self.bump_count(udb, -1);
        self.cleanup(udb, node)
    }

    fn cleanup(&mut self, udb: &mut Udb, mut n: URef) -> DNSResult<()> {
        loop {
            if !node_elem(udb, n).is_null() {
                return Ok(());
            }
            let entries = read_entries(udb, n);
            let parent = node_parent(udb, n);

            if entries.is_empty() {
                if parent.is_null() {
                    // the tree is empty now
                    free_node(udb, n)?;
                    udb.write_uref(self.tree_ref.0, URef::NULL);
                    return Ok(());
                }
                let byte = node_offset(udb, parent) + node_pidx(udb, n);
                let mut siblings = read_entries(udb, parent);
                siblings.retain(|(b, _, _)| *b != byte);
                write_entries(udb, parent, &siblings)?;
                free_node(udb, n)?;
                n = parent;
                continue;
            }

            if entries.len() == 1 && !parent.is_null() {
                // pass-through node: splice the child up if the combined
                // edge still fits one length byte
                let (child_byte, child, child_edge) = entries[0].clone();
                let my_byte = node_offset(udb, parent) + node_pidx(udb, n);
                let mut siblings = read_entries(udb, parent);
                let my_edge = siblings
                    .iter()
                    .find(|(b, _, _)| *b == my_byte)
                    .map(|(_, _, e)| e.clone())
                    .unwrap_or_default();

                let mut merged = my_edge;
                merged.push(child_byte);
                merged.extend_from_slice(&child_edge);
                if merged.len() <= MAX_EDGE_LEN {
                    for entry in siblings.iter_mut() {
                        if entry.0 == my_byte {
                            entry.1 = child;
                            entry.2 = merged.clone();
                        }
                    }
                    write_entries(udb, parent, &siblings)?;
                    free_node(udb, n)?;
                }
                return Ok(());
            }

            return Ok(());
        }
    }

    pub fn first(&self, udb: &Udb) -> DNSResult<URef> {
        let root = self.root(udb);
        if root.is_null() {
            return Ok(URef::NULL);
        }
        Ok(first_in_subtree(udb, root))
    }

    pub fn last(&self, udb: &Udb) -> DNSResult<URef> {
        let root = self.root(udb);
        if root.is_null() {
            return Ok(URef::NULL);
        }
        Ok(last_in_subtree(udb, root))
    }

    /// The next element in key order after `node`.
    pub fn next(&self, udb: &Udb, node: URef) -> DNSResult<URef> {
        // the first element below this node comes right after it
        for (_, child, _) in read_entries(udb, node) {
            let first = first_in_subtree(udb, child);
            if !first.is_null() {
                return Ok(first);
            }
        }
        // otherwise climb until a later sibling subtree exists
        let mut n = node;
        loop {
            let parent = node_parent(udb, n);
            if parent.is_null() {
                return Ok(URef::NULL);
            }
            let my_idx = node_pidx(udb, n) as usize;
            let lookup = node_lookup(udb, parent);
            let len = array_len(udb, parent);
            for idx in my_idx + 1..len {
                let entry = lookup.0 + 8 + idx as u64 * 16;
                let child = udb.read_uref(entry);
                if !child.is_null() {
                    let first = first_in_subtree(udb, child);
                    if !first.is_null() {
                        return Ok(first);
                    }
                }
            }
            n = parent;
        }
    }

    /// The previous element in key order before `node`.
    pub fn prev(&self, udb: &Udb, node: URef) -> DNSResult<URef> {
        let parent = node_parent(udb, node);
        if parent.is_null() {
            return Ok(URef::NULL);
        }
        Ok(prev_before(udb, parent, node_pidx(udb, node) as usize))
    }

    /// Exact match or the lexicographic predecessor: returns `(true, node)`
    /// on an exact hit, otherwise `(false, predecessor-or-null)`.
    pub fn find_less_equal(&self, udb: &Udb, key: &[u8]) -> DNSResult<(bool, URef)> {
        let mut n = self.root(udb);
        if n.is_null() {
            return Ok((false, URef::NULL));
        }
        let mut pos = 0usize;

        loop {
            if pos == key.len() {
                if !node_elem(udb, n).is_null() {
                    return Ok((true, n));
                }
                return Ok((false, prev_before(udb, n, 0)));
            }

            let b = key[pos];
            let offset = node_offset(udb, n);
            let len = array_len(udb, n);

            if len == 0 || b < offset {
                // smaller than every child: the node's own element, if any,
                // is the predecessor
                return Ok((false, prev_before(udb, n, 0)));
            }
            let idx = (b - offset) as usize;
            if idx >= len {
                return Ok((false, prev_before(udb, n, len)));
            }

            match entry_for(udb, n, b) {
                None => return Ok((false, prev_before(udb, n, idx))),
                Some((child, edge)) => {
                    let rest = &key[pos + 1..];
                    let m = edge.len().min(rest.len());
                    match rest[..m].cmp(&edge[..m]) {
                        std::cmp::Ordering::Less => {
                            return Ok((false, prev_before(udb, n, idx)));
                        }
                        std::cmp::Ordering::Greater => {
                            return Ok((false, last_in_subtree(udb, child)));
                        }
                        std::cmp::Ordering::Equal => {
                            if rest.len() < edge.len() {
                                // the key ends inside the edge, so it sorts
                                // before everything below the child
                                return Ok((false, prev_before(udb, n, idx)));
                            }
                            pos += 1 + edge.len();
                            n = child;
                        }
                    }
                }
            }
        }
    }

    /// Rebuild the full key of a node by climbing to the root.
    pub fn key_of(&self, udb: &Udb, node: URef) -> Vec<u8> {
        let mut parts: Vec<Vec<u8>> = Vec::new();
        let mut n = node;
        loop {
            let parent = node_parent(udb, n);
            if parent.is_null() {
                break;
            }
            let byte = node_offset(udb, parent) + node_pidx(udb, n);
            let edge = entry_for(udb, parent, byte)
                .map(|(_, e)| e)
                .unwrap_or_default();
            let mut part = vec![byte];
            part.extend_from_slice(&edge);
            parts.push(part);
            n = parent;
        }
        parts.reverse();
        parts.concat()
    }

    /// Walk the whole tree checking every structural invariant; returns the
    /// number of elements found. Used by tests and the database integrity
    /// check.
    pub fn check(&self, udb: &Udb) -> DNSResult<u64> {
        let root = self.root(udb);
        let found = if root.is_null() {
            0
        } else {
            self.check_node(udb, root, URef::NULL, 0)?
        };
        if found != self.count(udb) {
            return Err(DNSError::Udb(format!(
                "radix count mismatch: counted {}, stored {}",
                found,
                self.count(udb)
            )));
        }
        Ok(found)
    }

    fn check_node(&self, udb: &Udb, n: URef, parent: URef, pidx: u8) -> DNSResult<u64> {
        let fail = |what: &str| Err(DNSError::Udb(format!("radix invariant failed: {}", what)));

        if node_parent(udb, n) != parent {
            return fail("parent back-reference");
        }
        if !parent.is_null() && node_pidx(udb, n) != pidx {
            return fail("pidx back-reference");
        }

        let mut found = if node_elem(udb, n).is_null() { 0 } else { 1 };

        let lookup = node_lookup(udb, n);
        if lookup.is_null() {
            if node_offset(udb, n) != 0 {
                return fail("empty node offset");
            }
            return Ok(found);
        }

        if udb.chunk_tag(lookup) != ChunkType::Radarray as u8 {
            return fail("lookup chunk tag");
        }

        let len = udb.read_u16(lookup.0) as usize;
        let cap = udb.read_u16(lookup.0 + 2) as usize;
        let str_cap = udb.read_u16(lookup.0 + 4) as usize;
        let offset = node_offset(udb, n) as usize;

        if len > cap {
            return fail("len <= capacity");
        }
        if cap > 256 {
            return fail("capacity <= 256");
        }
        if offset + len > 256 {
            return fail("offset + len <= 256");
        }
        if len == 0 {
            if cap != 0 || str_cap != 0 || offset != 0 {
                return fail("empty array shape");
            }
            return Ok(found);
        }
        if cap == 0 || len < cap / 2 {
            return fail("density len >= capacity/2");
        }

        let mut max_edge = 0usize;
        for idx in 0..len {
            let entry = lookup.0 + 8 + idx as u64 * 16;
            let child = udb.read_uref(entry);
            let edge_len = udb.read_u8(entry + 8) as usize;
            if child.is_null() {
                if edge_len != 0 {
                    return fail("null slot with edge bytes");
                }
                continue;
            }
            if edge_len > str_cap {
                return fail("edge fits str_cap");
            }
            max_edge = max_edge.max(edge_len);
            found += self.check_node(udb, child, n, idx as u8)?;
        }

        if max_edge != str_cap && max_edge < str_cap / 2 {
            return fail("max edge >= str_cap/2");
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udb::tests::temp_db_path;
    use std::collections::BTreeMap;

    // deterministic pseudo randomness, the tests must reproduce
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, max: usize) -> usize {
            (self.next() % max as u64) as usize
        }
    }

    fn random_key(rng: &mut Lcg) -> Vec<u8> {
        let len = rng.below(5);
        (0..len).map(|_| b'a' + rng.below(26) as u8).collect()
    }

    fn check_against_mirror(
        udb: &Udb,
        tree: &RadTree,
        mirror: &BTreeMap<Vec<u8>, URef>,
    ) {
        assert_eq!(tree.check(udb).unwrap(), mirror.len() as u64);

        // every key searches to its node, and key_of agrees
        for (key, _) in mirror {
            let node = tree.search(udb, key).unwrap();
            assert!(!node.is_null(), "key {:?} not found", key);
            assert_eq!(&tree.key_of(udb, node), key);
        }

        // the ordered walk visits exactly the mirror's order
        let keys: Vec<&Vec<u8>> = mirror.keys().collect();
        let mut node = tree.first(udb).unwrap();
        for expected in &keys {
            assert!(!node.is_null());
            assert_eq!(&&tree.key_of(udb, node), expected);
            node = tree.next(udb, node).unwrap();
        }
        assert!(node.is_null());

        // and backwards
        let mut node = tree.last(udb).unwrap();
        for expected in keys.iter().rev() {
            assert_eq!(&&tree.key_of(udb, node), expected);
            node = tree.prev(udb, node).unwrap();
        }
        assert!(node.is_null());
    }

    #[test]
    fn insert_search_delete_with_invariants() {
        let path = temp_db_path("radix");
        let mut udb = Udb::create(&path).unwrap();
        let mut tree = RadTree::create(&mut udb).unwrap();
        let baseline = udb.stat_data();

        let mut rng = Lcg(42);
        let mut mirror: BTreeMap<Vec<u8>, URef> = BTreeMap::new();
        let mut elem_counter = 1u64;

        // the add/del soak: grow towards a target, shrink at random, check
        // the whole structure after every step
        for _ in 0..200 {
            let grow = mirror.len() < 40 && rng.below(4) != 0 || rng.below(2) == 0;
            if grow {
                let key = random_key(&mut rng);
                if mirror.contains_key(&key) {
                    continue;
                }
                let elem = URef(elem_counter);
                elem_counter += 1;
                let node = tree.insert(&mut udb, &key, elem).unwrap();
                assert!(!node.is_null());
                assert_eq!(node_elem(&udb, node), elem);
                mirror.insert(key, elem);
            } else if !mirror.is_empty() {
                let pick = rng.below(mirror.len());
                let key = mirror.keys().nth(pick).unwrap().clone();
                let node = tree.search(&udb, &key).unwrap();
                tree.delete(&mut udb, node).unwrap();
                mirror.remove(&key);
            }
            check_against_mirror(&udb, &tree, &mirror);
        }

        // drain completely: the allocator accounting returns to baseline
        while let Some(key) = mirror.keys().next().cloned() {
            let node = tree.search(&udb, &key).unwrap();
            tree.delete(&mut udb, node).unwrap();
            mirror.remove(&key);
            check_against_mirror(&udb, &tree, &mirror);
        }
        assert_eq!(tree.count(&udb), 0);
        assert_eq!(udb.stat_data(), baseline);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn duplicate_insert_is_refused() {
        let path = temp_db_path("radixdup");
        let mut udb = Udb::create(&path).unwrap();
        let mut tree = RadTree::create(&mut udb).unwrap();

        tree.insert(&mut udb, b"example", URef(1)).unwrap();
        assert!(tree.insert(&mut udb, b"example", URef(2)).is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn find_less_equal_exact_and_predecessor() {
        let path = temp_db_path("radixfle");
        let mut udb = Udb::create(&path).unwrap();
        let mut tree = RadTree::create(&mut udb).unwrap();

        let keys: Vec<&[u8]> = vec![b"a", b"ab", b"abc", b"b", b"ba", b"z"];
        for (i, key) in keys.iter().enumerate() {
            tree.insert(&mut udb, key, URef(i as u64 + 1)).unwrap();
        }

        // exact matches
        for key in &keys {
            let (exact, node) = tree.find_less_equal(&udb, key).unwrap();
            assert!(exact);
            assert_eq!(tree.key_of(&udb, node), key.to_vec());
        }

        // predecessors
        let cases: Vec<(&[u8], Option<&[u8]>)> = vec![
            (b"aa", Some(b"a")),
            (b"abb", Some(b"ab")),
            (b"abcd", Some(b"abc")),
            (b"bb", Some(b"ba")),
            (b"c", Some(b"ba")),
            (b"zz", Some(b"z")),
            (b"0", None),
            (b"", None),
        ];
        for (probe, want) in cases {
            let (exact, node) = tree.find_less_equal(&udb, probe).unwrap();
            assert!(!exact, "probe {:?} should not be exact", probe);
            match want {
                None => assert!(node.is_null(), "probe {:?} should precede all", probe),
                Some(key) => {
                    assert!(!node.is_null(), "probe {:?} found nothing", probe);
                    assert_eq!(tree.key_of(&udb, node), key.to_vec());
                }
            }
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn empty_key_lives_at_the_root() {
        let path = temp_db_path("radixroot");
        let mut udb = Udb::create(&path).unwrap();
        let mut tree = RadTree::create(&mut udb).unwrap();

        tree.insert(&mut udb, b"", URef(7)).unwrap();
        tree.insert(&mut udb, b"x", URef(8)).unwrap();

        let node = tree.search(&udb, b"").unwrap();
        assert!(!node.is_null());
        assert_eq!(node_elem(&udb, node), URef(7));
        assert_eq!(tree.first(&udb).unwrap(), node);
        assert_eq!(tree.check(&udb).unwrap(), 2);

        std::fs::remove_file(&path).unwrap();
    }
}
