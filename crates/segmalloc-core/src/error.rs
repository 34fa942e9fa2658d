//! Error types.

use thiserror::Error;

use crate::page_source::PageSourceError;

/// Failure of an allocation or free.
#[derive(Debug, Error)]
pub enum AllocError {
    /// No free block fits and the page source could not supply another page.
    #[error("out of memory allocating {size} bytes")]
    Exhausted {
        size: usize,
        #[source]
        source: PageSourceError,
    },
    /// Even a fresh page cannot hold the request.
    #[error("{size} bytes does not fit in a single page")]
    Unsatisfiable { size: usize },
    /// Caller broke the request/free contract (hardened mode only).
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

impl AllocError {
    /// True when the failure came from page-source exhaustion.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Caller misuse detected by hardened-mode checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("request of {size} bytes is outside [8, 4000]")]
    SizeOutOfRange { size: usize },
    #[error("request of {size} bytes is not a multiple of 8")]
    MisalignedSize { size: usize },
    #[error("pointer {addr:#x} does not belong to this heap")]
    ForeignPointer { addr: usize },
    #[error("pointer {addr:#x} is not the start of an allocation")]
    InteriorPointer { addr: usize },
    #[error("pointer {addr:#x} is already free")]
    DoubleFree { addr: usize },
}

/// Structural damage found by `Heap::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("free block {addr:#x} of {size} bytes is filed in bin {found}, expected {expected}")]
    WrongBin {
        addr: usize,
        size: usize,
        found: usize,
        expected: usize,
    },
    #[error("free block {addr:#x} lies outside every held page")]
    OutsidePages { addr: usize },
    #[error("block {addr:#x} on a free list is tagged as allocated")]
    AllocatedOnFreeList { addr: usize },
    #[error("blocks of page {page:#x} end at {reached:#x} instead of the page end")]
    BrokenTiling { page: usize, reached: usize },
    #[error("{listed} blocks are listed free but {walked} free blocks tile the pages")]
    FreeCountMismatch { listed: usize, walked: usize },
    #[error("adjacent free blocks at {first:#x} and {second:#x} were not coalesced")]
    UncoalescedNeighbours { first: usize, second: usize },
    #[error("bin {bin} records {recorded} blocks but its chain holds {actual}")]
    BinLengthMismatch {
        bin: usize,
        recorded: usize,
        actual: usize,
    },
}
