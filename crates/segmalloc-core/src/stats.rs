//! Heap accounting counters.

/// Snapshot of a heap's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Successful `malloc` calls.
    pub allocations: u64,
    /// Successful `free` calls.
    pub frees: u64,
    /// Failed `malloc` calls.
    pub failed_allocations: u64,
    /// Pages obtained from the source.
    pub pages_acquired: u64,
    /// Pages handed back to the source (empty-page release and teardown).
    pub pages_released: u64,
    /// Page requests the source refused.
    pub page_failures: u64,
    /// Blocks split into an allocation plus a free remainder.
    pub splits: u64,
    /// Merges of a freed block with a free neighbour.
    pub coalesces: u64,
    /// Free blocks inspected by fit searches.
    pub blocks_searched: u64,
    /// Live allocations.
    pub active_count: usize,
    /// Payload bytes held by live allocations, slack included.
    pub allocated_bytes: usize,
    /// Bytes currently held from the page source.
    pub mapped_bytes: usize,
    /// High-water mark of `mapped_bytes`.
    pub peak_mapped_bytes: usize,
}

impl HeapStats {
    /// Allocated payload as a share of mapped bytes, in percent.
    #[must_use]
    pub fn utilization_percent(&self) -> f64 {
        if self.mapped_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 * 100.0 / self.mapped_bytes as f64
    }

    /// Average free blocks inspected per successful allocation.
    #[must_use]
    pub fn mean_search_length(&self) -> f64 {
        if self.allocations == 0 {
            return 0.0;
        }
        self.blocks_searched as f64 / self.allocations as f64
    }

    pub(crate) fn note_mapped(&mut self, bytes: usize) {
        self.mapped_bytes += bytes;
        self.peak_mapped_bytes = self.peak_mapped_bytes.max(self.mapped_bytes);
    }

    pub(crate) fn note_unmapped(&mut self, bytes: usize) {
        self.mapped_bytes = self.mapped_bytes.saturating_sub(bytes);
    }
}
