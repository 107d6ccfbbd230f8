//! The chunk allocator: segregated free lists over power-of-two size
//! classes, first-fit with splitting, buddy coalescing on free.
//!
//! Chunk layout (size 2^exp, aligned to 2^exp relative to DATA_START):
//!
//!   +0         exp
//!   +1         type tag (0 = free)
//!   +2..8      reserved
//!   +8         payload (free chunks: next URef at +8, prev URef at +16)
//!   +size-1    exp again, so a right-hand neighbor can find this header
//!
//! `stat_data` accounts the requested payload sizes of live chunks and
//! `stat_alloc` the chunk capacities; both must return to their prior
//! values when everything allocated is freed again.
use crate::error::{DNSError, DNSResult};

use super::{ChunkType, URef, Udb, DATA_START, FREELIST_TABLE};

// smallest class must fit the free-list links, largest is 16 MiB
pub const MIN_EXP: u8 = 5;
pub const MAX_EXP: u8 = 24;
pub const NUM_CLASSES: usize = (MAX_EXP - MIN_EXP + 1) as usize;

// header 8 bytes, trailing exp byte
const CHUNK_OVERHEAD: usize = 9;

fn freelist_slot(exp: u8) -> u64 {
    FREELIST_TABLE + (exp - MIN_EXP) as u64 * 8
}

fn exp_for(size: usize) -> DNSResult<u8> {
    for exp in MIN_EXP..=MAX_EXP {
        if (1usize << exp) - CHUNK_OVERHEAD >= size {
            return Ok(exp);
        }
    }
    Err(DNSError::Udb(format!("allocation of {} bytes too large", size)))
}

impl Udb {
    /// Allocate a zeroed payload of at least `size` bytes tagged with
    /// `chunk_type`; returns the payload reference.
    pub fn alloc(&mut self, chunk_type: ChunkType, size: usize) -> DNSResult<URef> {
        let exp = exp_for(size)?;

        // first fit: this class, then split the nearest larger chunk
        let chunk = match self.pop_free(exp) {
            Some(chunk) => chunk,
            None => {
                let mut found = None;
                for larger in exp + 1..=MAX_EXP {
                    if let Some(chunk) = self.pop_free(larger) {
                        found = Some(self.split_down(chunk, larger, exp));
                        break;
                    }
                }
                match found {
                    Some(chunk) => chunk,
                    None => self.grow_chunk(exp)?,
                }
            }
        };

        self.write_u8(chunk, exp);
        self.write_u8(chunk + 1, chunk_type as u8);
        let chunk_size = 1u64 << exp;
        self.write_u8(chunk + chunk_size - 1, exp);

        // hand out zeroed memory
        let payload = chunk + 8;
        let capacity = chunk_size as usize - CHUNK_OVERHEAD;
        self.map[payload as usize..payload as usize + capacity].fill(0);

        self.set_stat_data(self.stat_data() + size as u64);
        self.set_stat_alloc(self.stat_alloc() + chunk_size);
        Ok(URef(payload))
    }

    /// Release a payload previously allocated with `size`. Coalesces with
    /// its buddy while the neighbor's header shows an equally sized free
    /// chunk.
    pub fn free(&mut self, payload: URef, size: usize) -> DNSResult<()> {
        if payload.is_null() {
            return Ok(());
        }
        let mut chunk = payload.0 - 8;
        let mut exp = self.read_u8(chunk);
        self.check_chunk(chunk)?;
        if self.read_u8(chunk + 1) == ChunkType::Free as u8 {
            return Err(DNSError::Udb(format!("double free of chunk {:#x}", chunk)));
        }

        self.set_stat_data(self.stat_data() - size as u64);
        self.set_stat_alloc(self.stat_alloc() - (1u64 << exp));

        // merge with the buddy as long as it is free and whole
        while exp < MAX_EXP {
            let chunk_size = 1u64 << exp;
            let rel = chunk - DATA_START;
            let buddy = if rel % (chunk_size * 2) == 0 {
                chunk + chunk_size
            } else {
                chunk - chunk_size
            };
            if buddy + chunk_size > self.map.len() as u64 {
                break;
            }
            if self.read_u8(buddy) != exp || self.read_u8(buddy + 1) != ChunkType::Free as u8 {
                break;
            }
            self.unlink_free(buddy, exp);
            chunk = chunk.min(buddy);
            exp += 1;
        }

        self.push_free(chunk, exp);
        Ok(())
    }

    /// The usable payload size of an allocated chunk.
    pub fn payload_capacity(&self, payload: URef) -> usize {
        let exp = self.read_u8(payload.0 - 8);
        (1usize << exp) - CHUNK_OVERHEAD
    }

    pub fn chunk_tag(&self, payload: URef) -> u8 {
        self.read_u8(payload.0 - 7)
    }

    // header sanity: a known exp and the trailing copy agreeing with it
    fn check_chunk(&self, chunk: u64) -> DNSResult<()> {
        let exp = self.read_u8(chunk);
        if !(MIN_EXP..=MAX_EXP).contains(&exp) {
            return Err(DNSError::Udb(format!(
                "corrupt chunk {:#x}: bad size class {}",
                chunk, exp
            )));
        }
        let chunk_size = 1u64 << exp;
        if self.read_u8(chunk + chunk_size - 1) != exp {
            return Err(DNSError::Udb(format!(
                "corrupt chunk {:#x}: trailing size marker mismatch",
                chunk
            )));
        }
        Ok(())
    }

    // split a free chunk of class `from` down to class `to`, pushing the
    // upper halves back on their lists
    fn split_down(&mut self, chunk: u64, from: u8, to: u8) -> u64 {
        let mut exp = from;
        while exp > to {
            exp -= 1;
            let half = chunk + (1u64 << exp);
            self.write_u8(half, exp);
            self.write_u8(half + (1u64 << exp) - 1, exp);
            self.push_free(half, exp);
        }
        chunk
    }

    // extend the file image by one chunk of class `exp`, padding with free
    // chunks until the end is aligned for it
    fn grow_chunk(&mut self, exp: u8) -> DNSResult<u64> {
        loop {
            let end = self.map.len() as u64;
            let rel = end - DATA_START;
            if rel % (1u64 << exp) == 0 {
                self.map.resize((end + (1u64 << exp)) as usize, 0);
                return Ok(end);
            }
            // the largest class the current end is aligned for
            let align = rel.trailing_zeros().min((exp - 1) as u32) as u8;
            let pad_exp = align.max(MIN_EXP);
            let pad_size = 1u64 << pad_exp;
            self.map.resize((end + pad_size) as usize, 0);
            self.write_u8(end, pad_exp);
            self.write_u8(end + pad_size - 1, pad_exp);
            self.push_free(end, pad_exp);
        }
    }

    //--------------------------------------------------------------------
    // doubly-linked free lists, one head word per class
    //--------------------------------------------------------------------
    fn push_free(&mut self, chunk: u64, exp: u8) {
        let slot = freelist_slot(exp);
        let head = self.read_u64(slot);

        self.write_u8(chunk, exp);
        self.write_u8(chunk + 1, ChunkType::Free as u8);
        self.write_u8(chunk + (1u64 << exp) - 1, exp);
        self.write_u64(chunk + 8, head); // next
        self.write_u64(chunk + 16, 0); // prev
        if head != 0 {
            self.write_u64(head + 16, chunk);
        }

        // the head word is the commit point
        self.write_u64(slot, chunk);
    }

    fn pop_free(&mut self, exp: u8) -> Option<u64> {
        let slot = freelist_slot(exp);
        let head = self.read_u64(slot);
        if head == 0 {
            return None;
        }
        let next = self.read_u64(head + 8);
        if next != 0 {
            self.write_u64(next + 16, 0);
        }
        self.write_u64(slot, next);
        Some(head)
    }

    fn unlink_free(&mut self, chunk: u64, exp: u8) {
        let next = self.read_u64(chunk + 8);
        let prev = self.read_u64(chunk + 16);
        if next != 0 {
            self.write_u64(next + 16, prev);
        }
        if prev != 0 {
            self.write_u64(prev + 8, next);
        } else {
            self.write_u64(freelist_slot(exp), next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::udb::tests::temp_db_path;

    #[test]
    fn alloc_free_accounting_closes() {
        let path = temp_db_path("alloc");
        let mut udb = Udb::create(&path).unwrap();
        let base_data = udb.stat_data();
        let base_alloc = udb.stat_alloc();

        let mut live: Vec<(URef, usize)> = Vec::new();
        for i in 0..64usize {
            let size = 10 + (i * 37) % 500;
            let payload = udb.alloc(ChunkType::Rr, size).unwrap();
            assert!(udb.payload_capacity(payload) >= size);
            live.push((payload, size));
        }

        // free in a scrambled but reproducible order
        let mut seed = 0x2545F491u64;
        while !live.is_empty() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let idx = (seed % live.len() as u64) as usize;
            let (payload, size) = live.swap_remove(idx);
            udb.free(payload, size).unwrap();
        }

        // accounting closure: everything returned
        assert_eq!(udb.stat_data(), base_data);
        assert_eq!(udb.stat_alloc(), base_alloc);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn free_chunks_are_reused() {
        let path = temp_db_path("reuse");
        let mut udb = Udb::create(&path).unwrap();

        let a = udb.alloc(ChunkType::Rr, 100).unwrap();
        let len_after_a = udb.map.len();
        udb.free(a, 100).unwrap();

        // same-size allocation comes back from the free list, the file does
        // not grow
        let b = udb.alloc(ChunkType::Rr, 100).unwrap();
        assert_eq!(udb.map.len(), len_after_a);
        udb.free(b, 100).unwrap();

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn buddies_coalesce() {
        let path = temp_db_path("buddy");
        let mut udb = Udb::create(&path).unwrap();

        // two buddies of the smallest class
        let a = udb.alloc(ChunkType::Rr, 16).unwrap();
        let b = udb.alloc(ChunkType::Rr, 16).unwrap();
        udb.free(a, 16).unwrap();
        udb.free(b, 16).unwrap();

        // after coalescing, a double-size allocation fits into the merged
        // chunk without growing the file
        let len_before = udb.map.len();
        let c = udb.alloc(ChunkType::Rr, 40).unwrap();
        assert_eq!(udb.map.len(), len_before);
        udb.free(c, 40).unwrap();

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn double_free_is_detected() {
        let path = temp_db_path("dfree");
        let mut udb = Udb::create(&path).unwrap();
        let a = udb.alloc(ChunkType::Rr, 16).unwrap();
        udb.free(a, 16).unwrap();
        assert!(udb.free(a, 16).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn oversized_allocation_is_refused() {
        let path = temp_db_path("huge");
        let mut udb = Udb::create(&path).unwrap();
        assert!(udb.alloc(ChunkType::Rr, 1 << 25).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}
