//! Segregated free lists.
//!
//! One singly-linked chain per bin, threaded through the free blocks' own
//! headers. Chains are unordered; new blocks go to the head.

use crate::block::BlockPtr;
use crate::size_class::{NUM_BINS, bin_index};

/// Result of a successful fit search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fit {
    pub(crate) block: BlockPtr,
    /// Chain predecessor, `None` when `block` is the bin head.
    pub(crate) prev: Option<BlockPtr>,
    pub(crate) bin: usize,
    /// Blocks inspected before the hit, including the hit.
    pub(crate) visited: usize,
}

/// Table of per-bin chain heads.
#[derive(Debug)]
pub(crate) struct FreeListTable {
    heads: [Option<BlockPtr>; NUM_BINS],
    lens: [usize; NUM_BINS],
}

impl FreeListTable {
    pub(crate) fn new() -> Self {
        Self {
            heads: [None; NUM_BINS],
            lens: [0; NUM_BINS],
        }
    }

    /// Drops every chain. Blocks are not touched.
    pub(crate) fn clear(&mut self) {
        self.heads = [None; NUM_BINS];
        self.lens = [0; NUM_BINS];
    }

    /// Pushes `block` onto the head of the bin matching its size.
    pub(crate) fn insert(&mut self, block: BlockPtr) -> usize {
        let bin = bin_index(block.size());
        block.set_next(self.heads[bin]);
        self.heads[bin] = Some(block);
        self.lens[bin] += 1;
        bin
    }

    /// Unlinks `block` given its chain predecessor.
    ///
    /// The caller vouches that `block` sits in `bin` right after `prev`; no
    /// check is made.
    pub(crate) fn remove(&mut self, block: BlockPtr, prev: Option<BlockPtr>, bin: usize) {
        match prev {
            Some(prev) => prev.set_next(block.next()),
            None => self.heads[bin] = block.next(),
        }
        block.set_next(None);
        self.lens[bin] -= 1;
    }

    /// Unlinks an arbitrary member by locating its predecessor.
    ///
    /// Returns `false` when the block is not in its size's bin.
    pub(crate) fn unlink(&mut self, block: BlockPtr) -> bool {
        let bin = bin_index(block.size());
        let mut prev = None;
        let mut cursor = self.heads[bin];
        while let Some(current) = cursor {
            if current == block {
                self.remove(block, prev, bin);
                return true;
            }
            prev = Some(current);
            cursor = current.next();
        }
        false
    }

    /// Finds the first block that can hold `size` bytes.
    ///
    /// Bins are scanned upward from `bin_index(size)`, each chain front to
    /// back. Coarse bins mix sizes, so each candidate's size is checked.
    pub(crate) fn find_fit(&self, size: usize) -> Option<Fit> {
        let mut visited = 0;
        for bin in bin_index(size)..NUM_BINS {
            let mut prev = None;
            let mut cursor = self.heads[bin];
            while let Some(block) = cursor {
                visited += 1;
                if block.size() >= size {
                    return Some(Fit {
                        block,
                        prev,
                        bin,
                        visited,
                    });
                }
                prev = Some(block);
                cursor = block.next();
            }
        }
        None
    }

    pub(crate) fn iter_bin(&self, bin: usize) -> BinIter {
        BinIter {
            cursor: self.heads.get(bin).copied().flatten(),
        }
    }

    pub(crate) fn bin_len(&self, bin: usize) -> usize {
        self.lens.get(bin).copied().unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.lens.iter().sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heads.iter().all(Option::is_none)
    }

    /// Sum of payload bytes over every free block.
    pub(crate) fn free_bytes(&self) -> usize {
        (0..NUM_BINS)
            .flat_map(|bin| self.iter_bin(bin))
            .map(BlockPtr::size)
            .sum()
    }
}

pub(crate) struct BinIter {
    cursor: Option<BlockPtr>,
}

impl Iterator for BinIter {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        let current = self.cursor?;
        self.cursor = current.next();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HEADER_SIZE;
    use std::ptr::NonNull;

    #[repr(C, align(4096))]
    struct FakePage([u8; 4096]);

    /// Carves a fake page into blocks with the given payload sizes.
    fn carve(page: &mut FakePage, sizes: &[usize]) -> Vec<BlockPtr> {
        let base = NonNull::from(&mut page.0).cast::<u8>();
        let mut block = unsafe { BlockPtr::format(base, 4096 - HEADER_SIZE) };
        let mut out = Vec::new();
        for &size in sizes {
            let rest = block.split(size).expect("fake page large enough");
            out.push(block);
            block = rest;
        }
        out
    }

    #[test]
    fn test_insert_is_newest_first() {
        let mut page = Box::new(FakePage([0; 4096]));
        let blocks = carve(&mut page, &[64, 64, 64]);
        let mut table = FreeListTable::new();
        for &b in &blocks {
            assert_eq!(table.insert(b), bin_index(64));
        }
        let chain: Vec<BlockPtr> = table.iter_bin(bin_index(64)).collect();
        assert_eq!(chain, vec![blocks[2], blocks[1], blocks[0]]);
        assert_eq!(table.bin_len(bin_index(64)), 3);
        assert_eq!(table.len(), 3);
        assert_eq!(table.free_bytes(), 192);
    }

    #[test]
    fn test_find_fit_scans_upward() {
        let mut page = Box::new(FakePage([0; 4096]));
        let blocks = carve(&mut page, &[16, 72, 1024]);
        let mut table = FreeListTable::new();
        table.insert(blocks[0]);
        table.insert(blocks[2]);

        let fit = table.find_fit(24).unwrap();
        assert_eq!(fit.block, blocks[2]);
        assert_eq!(fit.bin, bin_index(1024));
        assert_eq!(fit.prev, None);

        table.insert(blocks[1]);
        let fit = table.find_fit(24).unwrap();
        assert_eq!(fit.block, blocks[1]);
        assert!(table.find_fit(2048).is_none());
    }

    #[test]
    fn test_find_fit_skips_too_small_in_coarse_bin() {
        let mut page = Box::new(FakePage([0; 4096]));
        // 648 and 760 both land in the 768-byte class.
        let blocks = carve(&mut page, &[760, 648]);
        let mut table = FreeListTable::new();
        table.insert(blocks[0]);
        table.insert(blocks[1]);
        assert_eq!(bin_index(648), bin_index(760));

        let fit = table.find_fit(704).unwrap();
        assert_eq!(fit.block, blocks[0]);
        assert_eq!(fit.prev, Some(blocks[1]));
        assert_eq!(fit.visited, 2);
    }

    #[test]
    fn test_remove_with_predecessor() {
        let mut page = Box::new(FakePage([0; 4096]));
        let blocks = carve(&mut page, &[32, 32, 32]);
        let mut table = FreeListTable::new();
        for &b in &blocks {
            table.insert(b);
        }
        // Chain: 2 -> 1 -> 0
        let bin = bin_index(32);
        table.remove(blocks[1], Some(blocks[2]), bin);
        assert_eq!(blocks[1].next(), None);
        let chain: Vec<BlockPtr> = table.iter_bin(bin).collect();
        assert_eq!(chain, vec![blocks[2], blocks[0]]);

        table.remove(blocks[2], None, bin);
        let chain: Vec<BlockPtr> = table.iter_bin(bin).collect();
        assert_eq!(chain, vec![blocks[0]]);
        assert_eq!(table.bin_len(bin), 1);
    }

    #[test]
    fn test_unlink_arbitrary_member() {
        let mut page = Box::new(FakePage([0; 4096]));
        let blocks = carve(&mut page, &[48, 48, 48, 96]);
        let mut table = FreeListTable::new();
        for &b in &blocks[..3] {
            table.insert(b);
        }
        assert!(table.unlink(blocks[0]));
        assert!(!table.unlink(blocks[3]));
        assert_eq!(table.len(), 2);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }
}
