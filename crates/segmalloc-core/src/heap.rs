//! The allocator instance.
//!
//! A [`Heap`] owns a page source, a segregated free-list table and the
//! registry of pages it has carved up. Allocation searches the table from
//! the request's bin upward, splits oversized hits and grows by one page on
//! a miss. Freeing recovers the header from the payload pointer, optionally
//! merges with free physical neighbours and files the block by size.
//!
//! There is no process-wide state: independent heaps never share blocks.

use std::ptr::NonNull;

use crate::block::{BlockPtr, HEADER_SIZE};
use crate::config::HeapConfig;
use crate::error::{AllocError, ContractViolation, IntegrityError};
use crate::free_list::{Fit, FreeListTable};
use crate::log::{HeapLogLevel, HeapLogRecord, LifecycleLog, LogEvent};
use crate::page_source::{PAGE_SIZE, PageSource};
use crate::pages::{PageRegistry, PageSpan};
use crate::size_class::{
    MAX_REQUEST, MIN_REQUEST, NUM_BINS, SIZE_GRANULE, bin_index, is_valid_request,
};
use crate::stats::HeapStats;

/// Largest payload a single fresh page can hold.
pub const MAX_BLOCK_PAYLOAD: usize = PAGE_SIZE - HEADER_SIZE;

/// Segregated free-list heap over pages from `S`.
pub struct Heap<S: PageSource> {
    source: S,
    config: HeapConfig,
    bins: FreeListTable,
    pages: PageRegistry,
    stats: HeapStats,
    log: LifecycleLog,
}

// SAFETY: the heap exclusively owns every page it holds, and the raw block
// pointers inside never alias memory owned by another heap. Moving the heap to
// another thread moves that ownership with it.
unsafe impl<S: PageSource + Send> Send for Heap<S> {}

impl<S: PageSource> Heap<S> {
    /// Creates an empty heap with the default configuration.
    pub fn new(source: S) -> Self {
        Self::with_config(source, HeapConfig::default())
    }

    /// Creates an empty heap.
    pub fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            source,
            config,
            bins: FreeListTable::new(),
            pages: PageRegistry::new(),
            stats: HeapStats::default(),
            log: LifecycleLog::new(config.lifecycle_logging),
        }
    }

    /// Resets the heap to its just-constructed state.
    ///
    /// Pages still held are returned to the source and every bin is left
    /// empty. Pointers from earlier allocations become dangling.
    pub fn initialize(&mut self) {
        let released = self.release_all_pages();
        self.stats = HeapStats::default();
        self.record(
            LogEvent::new(HeapLogLevel::Info, "initialize", "initialize", "ready"),
            || format!("pages_released={released}"),
        );
    }

    /// Returns every held page to the source.
    ///
    /// Pointers from earlier allocations become dangling. The heap stays
    /// usable and grows again on the next allocation.
    pub fn finalize(&mut self) {
        let released = self.release_all_pages();
        self.record(
            LogEvent::new(HeapLogLevel::Info, "finalize", "finalize", "released"),
            || format!("pages_released={released}"),
        );
    }

    /// Allocates `size` bytes.
    ///
    /// The contract is `8 <= size <= 4000` with `size` a multiple of 8. In
    /// strict mode other sizes are rounded up to the next multiple of 8 (and
    /// at least 8); in hardened mode they are rejected. The returned pointer
    /// is word aligned and valid for the (possibly rounded) size until it is
    /// passed to [`Heap::free`].
    pub fn malloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let requested = size;
        let size = match self.admit(size) {
            Ok(size) => size,
            Err(violation) => {
                self.stats.failed_allocations += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Warn, "malloc", "contract_violation", "denied")
                        .size(size),
                    || violation.to_string(),
                );
                return Err(violation.into());
            }
        };
        if size > MAX_BLOCK_PAYLOAD {
            self.stats.failed_allocations += 1;
            self.record(
                LogEvent::new(HeapLogLevel::Warn, "malloc", "unsatisfiable", "denied")
                    .size(requested),
                || format!("max_block_payload={MAX_BLOCK_PAYLOAD}"),
            );
            return Err(AllocError::Unsatisfiable { size: requested });
        }

        if let Some(fit) = self.bins.find_fit(size) {
            return Ok(self.take(fit, size, "bin_hit"));
        }

        self.grow(size)?;
        match self.bins.find_fit(size) {
            Some(fit) => Ok(self.take(fit, size, "fresh_page")),
            None => {
                self.stats.failed_allocations += 1;
                Err(AllocError::Unsatisfiable { size })
            }
        }
    }

    /// Returns an allocation to the free lists.
    ///
    /// In hardened mode foreign, interior and already-freed pointers are
    /// rejected with [`AllocError::Contract`] and the heap is left untouched.
    /// In strict mode this never fails.
    ///
    /// # Safety
    ///
    /// In strict mode `ptr` must come from [`Heap::malloc`] on this heap and
    /// must not have been freed since. Hardened mode relaxes this to: `ptr`
    /// must not point into a page this heap released.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        if self.config.safety.checks_enabled() {
            if let Err(violation) = self.check_free(ptr) {
                self.record(
                    LogEvent::new(HeapLogLevel::Warn, "free", "contract_violation", "ignored")
                        .ptr(ptr.as_ptr().addr()),
                    || violation.to_string(),
                );
                return Err(violation.into());
            }
        }

        // SAFETY: caller contract (or the hardened check above) guarantees
        // `ptr` is the payload of a live block of this heap.
        let mut block = unsafe { BlockPtr::from_payload(ptr) };
        let size = block.size();
        block.mark_free();
        self.stats.frees += 1;
        self.stats.active_count = self.stats.active_count.saturating_sub(1);
        self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(size);

        if self.config.coalesce.enabled() {
            block = self.coalesce(block);
        }

        if self.config.release_empty_pages {
            if let Some(span) = self.pages.containing(block.addr()) {
                if span.is_spanned_by(block) {
                    self.release_page(span);
                    let held = self.pages.len();
                    self.record(
                        LogEvent::new(HeapLogLevel::Info, "free", "page_release", "released")
                            .ptr(span.start())
                            .size(span.len()),
                        || format!("pages_held={held}"),
                    );
                    return Ok(());
                }
            }
        }

        let bin = self.bins.insert(block);
        self.record(
            LogEvent::new(HeapLogLevel::Trace, "free", "free", "success")
                .ptr(ptr.as_ptr().addr())
                .size(size)
                .bin(bin),
            || format!("filed_size={}", block.size()),
        );
        Ok(())
    }

    /// Usable bytes behind an allocation, which may exceed the request by
    /// up to one header of slack.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        // SAFETY: forwarded caller contract.
        unsafe { BlockPtr::from_payload(ptr) }.size()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Pages currently held.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Free blocks across all bins.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        self.bins.len()
    }

    /// Free blocks filed in `bin`.
    #[must_use]
    pub fn bin_len(&self, bin: usize) -> usize {
        self.bins.bin_len(bin)
    }

    /// Payload sizes of the free blocks in `bin`, chain order.
    #[must_use]
    pub fn bin_sizes(&self, bin: usize) -> Vec<usize> {
        self.bins.iter_bin(bin).map(BlockPtr::size).collect()
    }

    /// Payload bytes sitting on the free lists.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.bins.free_bytes()
    }

    /// True when no free block is filed anywhere.
    #[must_use]
    pub fn bins_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn lifecycle_logs(&self) -> &[HeapLogRecord] {
        self.log.records()
    }

    pub fn drain_lifecycle_logs(&mut self) -> Vec<HeapLogRecord> {
        self.log.drain()
    }

    /// Checks the free lists and page tiling for structural damage.
    ///
    /// Walks every held page, so this is meant for tests and fuzzing, not
    /// the hot path.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let mut listed = 0;
        for bin in 0..NUM_BINS {
            let mut actual = 0;
            for block in self.bins.iter_bin(bin) {
                actual += 1;
                let addr = block.addr();
                if self.pages.containing(addr).is_none() {
                    return Err(IntegrityError::OutsidePages { addr });
                }
                if block.is_allocated() {
                    return Err(IntegrityError::AllocatedOnFreeList { addr });
                }
                let expected = bin_index(block.size());
                if expected != bin {
                    return Err(IntegrityError::WrongBin {
                        addr,
                        size: block.size(),
                        found: bin,
                        expected,
                    });
                }
            }
            let recorded = self.bins.bin_len(bin);
            if recorded != actual {
                return Err(IntegrityError::BinLengthMismatch {
                    bin,
                    recorded,
                    actual,
                });
            }
            listed += actual;
        }

        let mut walked = 0;
        for span in self.pages.iter() {
            let mut reached = span.start();
            let mut previous_free: Option<BlockPtr> = None;
            // SAFETY: the span is held by this heap and was formatted on
            // acquisition.
            for block in unsafe { span.blocks() } {
                reached = block.end();
                if block.is_allocated() {
                    previous_free = None;
                    continue;
                }
                walked += 1;
                if let Some(previous) = previous_free {
                    if self.config.coalesce.enabled() {
                        return Err(IntegrityError::UncoalescedNeighbours {
                            first: previous.addr(),
                            second: block.addr(),
                        });
                    }
                }
                previous_free = Some(block);
            }
            if reached != span.end() {
                return Err(IntegrityError::BrokenTiling {
                    page: span.start(),
                    reached,
                });
            }
        }

        if walked != listed {
            return Err(IntegrityError::FreeCountMismatch { listed, walked });
        }
        Ok(())
    }

    /// Applies the request contract for the configured safety level.
    ///
    /// Strict rounding saturates, so sizes near `usize::MAX` stay oversized
    /// and fail as unsatisfiable.
    fn admit(&self, size: usize) -> Result<usize, ContractViolation> {
        if !self.config.safety.checks_enabled() {
            return Ok(size
                .max(MIN_REQUEST)
                .checked_next_multiple_of(SIZE_GRANULE)
                .unwrap_or(usize::MAX));
        }
        if is_valid_request(size) {
            return Ok(size);
        }
        if !(MIN_REQUEST..=MAX_REQUEST).contains(&size) {
            Err(ContractViolation::SizeOutOfRange { size })
        } else {
            Err(ContractViolation::MisalignedSize { size })
        }
    }

    /// Removes the fitted block, splits off any usable remainder and marks
    /// the rest allocated.
    fn take(&mut self, fit: Fit, size: usize, path: &'static str) -> NonNull<u8> {
        let block = fit.block;
        self.bins.remove(block, fit.prev, fit.bin);
        self.stats.blocks_searched += fit.visited as u64;

        if let Some(rest) = block.split(size) {
            let rest_bin = self.bins.insert(rest);
            self.stats.splits += 1;
            self.record(
                LogEvent::new(HeapLogLevel::Trace, "malloc", "split", "remainder_filed")
                    .ptr(rest.addr())
                    .size(rest.size())
                    .bin(rest_bin),
                || format!("from_bin={} kept={size}", fit.bin),
            );
        }

        block.mark_allocated();
        self.stats.allocations += 1;
        self.stats.active_count += 1;
        self.stats.allocated_bytes += block.size();

        let payload = block.payload();
        self.record(
            LogEvent::new(HeapLogLevel::Trace, "malloc", "alloc", "success")
                .ptr(payload.as_ptr().addr())
                .size(size)
                .bin(fit.bin),
            || format!("path={path} visited={} slack={}", fit.visited, block.size() - size),
        );
        payload
    }

    /// Acquires one page and files it as a single free block.
    fn grow(&mut self, size: usize) -> Result<(), AllocError> {
        let page = match self.source.request_page(PAGE_SIZE) {
            Ok(page) => page,
            Err(source) => {
                self.stats.page_failures += 1;
                self.stats.failed_allocations += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Warn, "malloc", "oom", "denied").size(size),
                    || source.to_string(),
                );
                return Err(AllocError::Exhausted { size, source });
            }
        };
        debug_assert_eq!(
            page.as_ptr().addr() % std::mem::align_of::<usize>(),
            0,
            "page source returned a misaligned page"
        );

        let span = PageSpan::new(page, PAGE_SIZE);
        // SAFETY: the page is fresh, exclusively ours, PAGE_SIZE bytes long
        // and word aligned.
        let block = unsafe { BlockPtr::format(page, MAX_BLOCK_PAYLOAD) };
        self.pages.insert(span);
        self.stats.pages_acquired += 1;
        self.stats.note_mapped(PAGE_SIZE);
        let bin = self.bins.insert(block);
        let held = self.pages.len();
        self.record(
            LogEvent::new(HeapLogLevel::Debug, "malloc", "page_acquired", "success")
                .ptr(span.start())
                .size(PAGE_SIZE)
                .bin(bin),
            || format!("pages_held={held} request={size}"),
        );
        Ok(())
    }

    /// Merges a just-freed, unfiled block with free physical neighbours.
    fn coalesce(&mut self, block: BlockPtr) -> BlockPtr {
        let Some(span) = self.pages.containing(block.addr()) else {
            return block;
        };
        let mut merged = block;

        // SAFETY: `merged` is a block of `span`, which this heap holds and
        // keeps tiled.
        if let Some(next) = unsafe { span.block_after(merged) } {
            if !next.is_allocated() && self.bins.unlink(next) {
                merged.absorb(next);
                self.stats.coalesces += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Trace, "free", "coalesce", "merged_next")
                        .ptr(merged.addr())
                        .size(merged.size()),
                    || format!("absorbed={:#x}", next.addr()),
                );
            }
        }

        // SAFETY: as above; absorbing only grew `merged` within the page.
        if let Some(prev) = unsafe { span.block_before(merged) } {
            if !prev.is_allocated() && self.bins.unlink(prev) {
                prev.absorb(merged);
                self.stats.coalesces += 1;
                self.record(
                    LogEvent::new(HeapLogLevel::Trace, "free", "coalesce", "merged_prev")
                        .ptr(prev.addr())
                        .size(prev.size()),
                    || format!("absorbed={:#x}", merged.addr()),
                );
                merged = prev;
            }
        }
        merged
    }

    /// Hardened-mode validation of a pointer passed to `free`.
    ///
    /// A header that no longer starts a block but lies inside a free one was
    /// merged away by an earlier free of the same pointer, so it counts as a
    /// double free. Offsets into a live block are interior pointers.
    fn check_free(&self, ptr: NonNull<u8>) -> Result<(), ContractViolation> {
        let addr = ptr.as_ptr().addr();
        let header = addr
            .checked_sub(HEADER_SIZE)
            .ok_or(ContractViolation::ForeignPointer { addr })?;
        let span = self
            .pages
            .containing(header)
            .ok_or(ContractViolation::ForeignPointer { addr })?;
        // SAFETY: the span is held by this heap and tiled.
        let block = unsafe { span.block_containing(header) }
            .ok_or(ContractViolation::ForeignPointer { addr })?;
        match (block.addr() == header, block.is_allocated()) {
            (true, true) => Ok(()),
            (_, false) => Err(ContractViolation::DoubleFree { addr }),
            (false, true) => Err(ContractViolation::InteriorPointer { addr }),
        }
    }

    fn release_page(&mut self, span: PageSpan) {
        self.pages.remove(span.start());
        // SAFETY: the span came from `request_page(PAGE_SIZE)` on our source
        // and no block inside it is live or filed any more.
        unsafe { self.source.release_page(span.base(), span.len()) };
        self.stats.pages_released += 1;
        self.stats.note_unmapped(span.len());
    }

    fn release_all_pages(&mut self) -> usize {
        self.bins.clear();
        let spans = self.pages.take_all();
        let released = spans.len();
        for span in spans {
            // SAFETY: every registered span came from our source with its
            // recorded length; the bins no longer reference it.
            unsafe { self.source.release_page(span.base(), span.len()) };
            self.stats.pages_released += 1;
            self.stats.note_unmapped(span.len());
        }
        self.stats.active_count = 0;
        self.stats.allocated_bytes = 0;
        released
    }

    #[inline]
    fn record(&mut self, event: LogEvent, details: impl FnOnce() -> String) {
        if !self.log.enabled() {
            return;
        }
        let snapshot = (
            self.stats.active_count,
            self.stats.allocated_bytes,
            self.stats.mapped_bytes,
        );
        self.log.record(event, details(), snapshot);
    }
}

impl<S: PageSource> Drop for Heap<S> {
    fn drop(&mut self) {
        self.release_all_pages();
    }
}

impl<S: PageSource> std::fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("pages", &self.pages.len())
            .field("free_blocks", &self.bins.len())
            .field("stats", &self.stats)
            .finish()
    }
}
