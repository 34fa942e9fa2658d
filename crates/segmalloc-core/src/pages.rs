//! Registry of pages held by a heap.
//!
//! Each page is tiled exactly by blocks: the first header sits at the page
//! base and every block's end is the next block's header, up to the page end.
//! That tiling is what lets the heap find physical neighbours without
//! boundary tags.

use std::ptr::NonNull;

use crate::block::BlockPtr;

/// One span obtained from the page source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageSpan {
    base: NonNull<u8>,
    len: usize,
}

impl PageSpan {
    pub(crate) fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn start(self) -> usize {
        self.base.as_ptr().addr()
    }

    pub(crate) fn end(self) -> usize {
        self.start() + self.len
    }

    pub(crate) fn len(self) -> usize {
        self.len
    }

    pub(crate) fn contains(self, addr: usize) -> bool {
        (self.start()..self.end()).contains(&addr)
    }

    /// True when `block` alone covers the whole page.
    pub(crate) fn is_spanned_by(self, block: BlockPtr) -> bool {
        block.addr() == self.start() && block.end() == self.end()
    }

    /// Walks the blocks tiling this page in address order.
    ///
    /// # Safety
    ///
    /// The page must be owned by the heap and its first header initialized.
    /// A corrupted size ends the walk early rather than running past the page.
    pub(crate) unsafe fn blocks(self) -> PageBlocks {
        PageBlocks {
            // SAFETY: caller guarantees a header at the page base.
            next: Some(unsafe { BlockPtr::at(self.base) }),
            end: self.end(),
        }
    }

    /// Block that physically precedes `block` in this page.
    ///
    /// # Safety
    ///
    /// Same as [`PageSpan::blocks`].
    pub(crate) unsafe fn block_before(self, block: BlockPtr) -> Option<BlockPtr> {
        let mut previous = None;
        // SAFETY: forwarded caller contract.
        for current in unsafe { self.blocks() } {
            if current == block {
                return previous;
            }
            if current.addr() > block.addr() {
                break;
            }
            previous = Some(current);
        }
        None
    }

    /// Block that physically follows `block` in this page, if any.
    ///
    /// # Safety
    ///
    /// `block` must be a block of this page and the page must be tiled.
    pub(crate) unsafe fn block_after(self, block: BlockPtr) -> Option<BlockPtr> {
        if block.end() >= self.end() {
            return None;
        }
        // SAFETY: tiling puts a header at `block.end()` while inside the page.
        Some(unsafe { block.following() })
    }

    /// Block whose header or payload covers `addr`.
    ///
    /// # Safety
    ///
    /// Same as [`PageSpan::blocks`].
    pub(crate) unsafe fn block_containing(self, addr: usize) -> Option<BlockPtr> {
        // SAFETY: forwarded caller contract.
        unsafe { self.blocks() }
            .take_while(|b| b.addr() <= addr)
            .find(|b| addr < b.end())
    }
}

pub(crate) struct PageBlocks {
    next: Option<BlockPtr>,
    end: usize,
}

impl Iterator for PageBlocks {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        let current = self.next.take()?;
        if current.end() < self.end {
            // SAFETY: tiling invariant established by `PageSpan::blocks`.
            self.next = Some(unsafe { current.following() });
        }
        Some(current)
    }
}

/// Address-ordered set of held pages.
#[derive(Debug, Default)]
pub(crate) struct PageRegistry {
    spans: Vec<PageSpan>,
}

impl PageRegistry {
    pub(crate) fn new() -> Self {
        Self { spans: Vec::new() }
    }

    pub(crate) fn insert(&mut self, span: PageSpan) {
        let pos = self
            .spans
            .binary_search_by_key(&span.start(), |s| s.start())
            .unwrap_or_else(|pos| pos);
        self.spans.insert(pos, span);
    }

    /// Removes the page starting at `start`.
    pub(crate) fn remove(&mut self, start: usize) -> Option<PageSpan> {
        let pos = self
            .spans
            .binary_search_by_key(&start, |s| s.start())
            .ok()?;
        Some(self.spans.remove(pos))
    }

    /// Page containing `addr`, if the heap holds one.
    pub(crate) fn containing(&self, addr: usize) -> Option<PageSpan> {
        let idx = self.spans.partition_point(|s| s.start() <= addr);
        let span = *self.spans.get(idx.checked_sub(1)?)?;
        span.contains(addr).then_some(span)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = PageSpan> + '_ {
        self.spans.iter().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.spans.len()
    }

    pub(crate) fn mapped_bytes(&self) -> usize {
        self.spans.iter().map(|s| s.len()).sum()
    }

    /// Empties the registry, handing back every span.
    pub(crate) fn take_all(&mut self) -> Vec<PageSpan> {
        std::mem::take(&mut self.spans)
    }
}
