//! In-band block metadata.
//!
//! Every block is a [`Header`] immediately followed by its payload:
//!
//! ```text
//!   ... | size | link | payload (size bytes) | size | link | payload ...
//!       ^             ^
//!       BlockPtr      pointer handed to the caller
//! ```
//!
//! The header's `link` word doubles as the block's state: null means "free,
//! no successor", a real header address means "free, followed by that block
//! in its bin", and the odd sentinel address 1 means "live allocation".
//! Headers are word aligned, so the sentinel never collides with a real link.
//!
//! All offset arithmetic between headers and payloads lives in
//! [`BlockPtr::from_payload`] and [`BlockPtr::payload`].

use std::mem;
use std::ptr::{self, NonNull};

#[repr(C)]
pub(crate) struct Header {
    /// Usable payload bytes, excluding the header.
    size: usize,
    /// Free-chain successor, null, or the allocated sentinel.
    link: *mut Header,
}

/// Bytes of metadata in front of every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

const ALLOCATED_TAG: usize = 1;

#[inline]
fn allocated_sentinel() -> *mut Header {
    ptr::without_provenance_mut(ALLOCATED_TAG)
}

/// Handle to a block header inside heap-owned memory.
///
/// Type invariant: the pointee is an initialized [`Header`] inside a page the
/// heap owns, followed by `size` payload bytes in the same page. Constructors
/// are `unsafe` because they are where that invariant is vouched for; the
/// accessors rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockPtr(NonNull<Header>);

impl BlockPtr {
    /// Wraps an existing header.
    ///
    /// # Safety
    ///
    /// `addr` must point at an initialized header satisfying the type
    /// invariant.
    #[inline]
    pub(crate) unsafe fn at(addr: NonNull<u8>) -> Self {
        Self(addr.cast())
    }

    /// Writes a fresh free header describing `size` payload bytes at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be word aligned and `HEADER_SIZE + size` bytes starting at
    /// `addr` must lie inside a single heap-owned page and not overlap any
    /// other live header.
    #[inline]
    pub(crate) unsafe fn format(addr: NonNull<u8>, size: usize) -> Self {
        let header = addr.cast::<Header>();
        // SAFETY: caller guarantees the header bytes are writable and aligned.
        unsafe {
            header.write(Header {
                size,
                link: ptr::null_mut(),
            })
        };
        Self(header)
    }

    /// Recovers the block that owns `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must have been produced by [`BlockPtr::payload`] on a block
    /// that still satisfies the type invariant.
    #[inline]
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        // SAFETY: the header sits exactly HEADER_SIZE bytes before the payload
        // inside the same page.
        Self(unsafe { payload.sub(HEADER_SIZE) }.cast())
    }

    /// First payload byte.
    #[inline]
    pub(crate) fn payload(self) -> NonNull<u8> {
        // SAFETY: the payload follows the header in the same page.
        unsafe { self.0.cast::<u8>().add(HEADER_SIZE) }
    }

    #[inline]
    pub(crate) fn addr(self) -> usize {
        self.0.as_ptr().addr()
    }

    /// One past the last payload byte, i.e. where the physically next header
    /// would start.
    #[inline]
    pub(crate) fn end(self) -> usize {
        self.addr() + HEADER_SIZE + self.size()
    }

    #[inline]
    pub(crate) fn size(self) -> usize {
        // SAFETY: type invariant.
        unsafe { (*self.0.as_ptr()).size }
    }

    #[inline]
    pub(crate) fn set_size(self, size: usize) {
        // SAFETY: type invariant.
        unsafe { (*self.0.as_ptr()).size = size }
    }

    #[inline]
    fn link(self) -> *mut Header {
        // SAFETY: type invariant.
        unsafe { (*self.0.as_ptr()).link }
    }

    #[inline]
    fn set_link(self, link: *mut Header) {
        // SAFETY: type invariant.
        unsafe { (*self.0.as_ptr()).link = link }
    }

    /// Successor in the free chain, if any.
    #[inline]
    pub(crate) fn next(self) -> Option<BlockPtr> {
        let link = self.link();
        if link.addr() == ALLOCATED_TAG {
            return None;
        }
        NonNull::new(link).map(BlockPtr)
    }

    #[inline]
    pub(crate) fn set_next(self, next: Option<BlockPtr>) {
        self.set_link(next.map_or(ptr::null_mut(), |b| b.0.as_ptr()));
    }

    #[inline]
    pub(crate) fn is_allocated(self) -> bool {
        self.link().addr() == ALLOCATED_TAG
    }

    #[inline]
    pub(crate) fn mark_allocated(self) {
        self.set_link(allocated_sentinel());
    }

    /// Marks the block free and detached from any chain.
    #[inline]
    pub(crate) fn mark_free(self) {
        self.set_link(ptr::null_mut());
    }

    /// Shrinks the block to `size` and carves the rest into a new free block.
    ///
    /// Splits only when the leftover exceeds one header; a smaller leftover
    /// stays attached as slack. Returns the remainder block on split.
    pub(crate) fn split(self, size: usize) -> Option<BlockPtr> {
        let remaining = self.size().checked_sub(size)?;
        if remaining <= HEADER_SIZE {
            return None;
        }
        self.set_size(size);
        // SAFETY: `remaining > HEADER_SIZE`, so the new header and its
        // `remaining - HEADER_SIZE` payload bytes fit in the tail of this
        // block's old payload. `size` is a multiple of the word size, so the
        // new header stays aligned.
        let rest = unsafe { BlockPtr::format(self.payload().add(size), remaining - HEADER_SIZE) };
        Some(rest)
    }

    /// Header of the block that physically follows this one.
    ///
    /// # Safety
    ///
    /// `self.end()` must be the address of a valid header in the same page.
    #[inline]
    pub(crate) unsafe fn following(self) -> BlockPtr {
        // SAFETY: caller guarantees a header starts at `end()`.
        unsafe { BlockPtr::at(self.payload().add(self.size())) }
    }

    /// Absorbs the physically adjacent block `next` into this one.
    pub(crate) fn absorb(self, next: BlockPtr) {
        debug_assert_eq!(self.end(), next.addr(), "absorb requires adjacency");
        self.set_size(self.size() + HEADER_SIZE + next.size());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(16))]
    struct Scratch([u8; 512]);

    fn scratch() -> Box<Scratch> {
        Box::new(Scratch([0; 512]))
    }

    fn base(buf: &mut Scratch) -> NonNull<u8> {
        NonNull::from(&mut buf.0).cast()
    }

    #[test]
    fn test_header_is_two_words() {
        assert_eq!(HEADER_SIZE, 2 * mem::size_of::<usize>());
    }

    #[test]
    fn test_payload_offset_roundtrip() {
        let mut buf = scratch();
        let block = unsafe { BlockPtr::format(base(&mut buf), 512 - HEADER_SIZE) };
        let payload = block.payload();
        assert_eq!(payload.as_ptr().addr(), block.addr() + HEADER_SIZE);
        let back = unsafe { BlockPtr::from_payload(payload) };
        assert_eq!(back, block);
        assert_eq!(back.size(), 512 - HEADER_SIZE);
    }

    #[test]
    fn test_state_tags() {
        let mut buf = scratch();
        let block = unsafe { BlockPtr::format(base(&mut buf), 64) };
        assert!(!block.is_allocated());
        assert_eq!(block.next(), None);

        block.mark_allocated();
        assert!(block.is_allocated());
        assert_eq!(block.next(), None);

        block.mark_free();
        assert!(!block.is_allocated());
    }

    #[test]
    fn test_split_carves_remainder() {
        let mut buf = scratch();
        let start = base(&mut buf);
        let block = unsafe { BlockPtr::format(start, 512 - HEADER_SIZE) };
        let rest = block.split(64).expect("large leftover splits");
        assert_eq!(block.size(), 64);
        assert_eq!(rest.addr(), block.end());
        assert_eq!(rest.size(), 512 - HEADER_SIZE - 64 - HEADER_SIZE);
        assert_eq!(rest.end(), start.as_ptr().addr() + 512);
        assert_eq!(unsafe { block.following() }, rest);
    }

    #[test]
    fn test_split_keeps_small_leftover_as_slack() {
        let mut buf = scratch();
        let block = unsafe { BlockPtr::format(base(&mut buf), 64 + HEADER_SIZE) };
        assert!(block.split(64).is_none());
        assert_eq!(block.size(), 64 + HEADER_SIZE);

        // One word more than a header is enough for an 8-byte remainder.
        block.set_size(64 + HEADER_SIZE + 8);
        let rest = block.split(64).expect("leftover above one header splits");
        assert_eq!(rest.size(), 8);
    }

    #[test]
    fn test_split_larger_than_block_is_refused() {
        let mut buf = scratch();
        let block = unsafe { BlockPtr::format(base(&mut buf), 64) };
        assert!(block.split(128).is_none());
        assert_eq!(block.size(), 64);
    }

    #[test]
    fn test_absorb_restores_original_span() {
        let mut buf = scratch();
        let block = unsafe { BlockPtr::format(base(&mut buf), 512 - HEADER_SIZE) };
        let rest = block.split(200).unwrap();
        block.absorb(rest);
        assert_eq!(block.size(), 512 - HEADER_SIZE);
    }

    #[test]
    fn test_free_chain_links() {
        let mut buf = scratch();
        let first = unsafe { BlockPtr::format(base(&mut buf), 512 - HEADER_SIZE) };
        let second = first.split(128).unwrap();
        first.set_next(Some(second));
        assert_eq!(first.next(), Some(second));
        first.set_next(None);
        assert_eq!(first.next(), None);
    }
}
