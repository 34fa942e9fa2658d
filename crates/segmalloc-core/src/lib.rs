//! # segmalloc-core
//!
//! Segregated free-list allocator for small requests (8 to 4000 bytes, in
//! multiples of 8) carved out of 4096-byte pages.
//!
//! Every block carries a two-word in-band header (size and free-chain link)
//! in front of its payload. Free blocks are filed in one of 32 size-class
//! bins; allocation searches from the request's bin upward, splits oversized
//! hits and grows the heap one page at a time. Freed blocks merge with free
//! physical neighbours unless coalescing is turned off.
//!
//! Page memory comes from a [`PageSource`], so the same heap runs over
//! `mmap`, the global allocator, or a quota-limited wrapper in tests.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("segmalloc-core assumes a 64-bit target (16-byte block headers)");

mod block;
mod free_list;
mod pages;

pub mod config;
pub mod error;
pub mod heap;
pub mod log;
pub mod page_source;
pub mod shared;
pub mod size_class;
pub mod stats;

pub use block::HEADER_SIZE;
pub use config::{CoalescePolicy, HeapConfig, SafetyLevel};
pub use error::{AllocError, ContractViolation, IntegrityError};
pub use heap::{Heap, MAX_BLOCK_PAYLOAD};
pub use log::{HeapLogLevel, HeapLogRecord};
#[cfg(unix)]
pub use page_source::MmapPageSource;
pub use page_source::{
    LimitedPageSource, PAGE_SIZE, PageSource, PageSourceError, SystemPageSource,
};
pub use shared::SharedHeap;
pub use size_class::{MAX_REQUEST, MIN_REQUEST, NUM_BINS, bin_index, bin_limit};
pub use stats::HeapStats;
