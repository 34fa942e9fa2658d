//! Page acquisition and release.
//!
//! The heap never talks to the operating system directly. It asks a
//! [`PageSource`] for whole pages and hands them back through the same trait,
//! so tests can substitute sources that run dry on demand.

use std::alloc::{self, Layout};
use std::io;
use std::ptr::NonNull;

use thiserror::Error;

/// Bytes requested from the page source per growth step.
///
/// One page fits the largest request (4000 bytes) plus its header.
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum PageSourceError {
    /// The source declined to hand out more memory.
    #[error("page source refused a {bytes}-byte request")]
    Refused { bytes: usize },
    /// The operating system failed the mapping.
    #[error("mapping {bytes} bytes failed: {source}")]
    Os {
        bytes: usize,
        #[source]
        source: io::Error,
    },
    /// The byte count cannot be described as a page-aligned layout.
    #[error("{bytes} bytes is not a valid page request")]
    InvalidLayout { bytes: usize },
}

/// Supplier of fresh, exclusively owned memory spans.
pub trait PageSource {
    /// Returns `bytes` fresh bytes aligned to at least a machine word.
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError>;

    /// Hands a span back to the source.
    ///
    /// # Safety
    ///
    /// `page` and `bytes` must come from a single earlier `request_page` on
    /// this source, and nothing may touch the span afterwards.
    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize);
}

impl<S: PageSource + ?Sized> PageSource for &mut S {
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError> {
        (**self).request_page(bytes)
    }

    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).release_page(page, bytes) }
    }
}

/// Anonymous private `mmap` mappings.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapPageSource;

#[cfg(unix)]
impl PageSource for MmapPageSource {
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError> {
        if bytes == 0 {
            return Err(PageSourceError::InvalidLayout { bytes });
        }
        // SAFETY: anonymous mapping with no fixed address; no existing memory
        // is affected.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PageSourceError::Os {
                bytes,
                source: io::Error::last_os_error(),
            });
        }
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| PageSourceError::Os {
            bytes,
            source: io::Error::other("mmap returned null"),
        })
    }

    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize) {
        // SAFETY: caller guarantees the span came from our mmap.
        let rc = unsafe { libc::munmap(page.as_ptr().cast(), bytes) };
        debug_assert_eq!(rc, 0, "munmap failed: {}", io::Error::last_os_error());
    }
}

/// Page-aligned spans from the Rust global allocator.
///
/// Portable, and usable under Miri where `mmap` is not.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageSource;

impl SystemPageSource {
    fn layout(bytes: usize) -> Result<Layout, PageSourceError> {
        if bytes == 0 {
            return Err(PageSourceError::InvalidLayout { bytes });
        }
        Layout::from_size_align(bytes, PAGE_SIZE).map_err(|_| PageSourceError::InvalidLayout { bytes })
    }
}

impl PageSource for SystemPageSource {
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError> {
        let layout = Self::layout(bytes)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(PageSourceError::Refused { bytes })
    }

    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize) {
        // Same layout that was accepted by request_page.
        if let Ok(layout) = Self::layout(bytes) {
            // SAFETY: caller guarantees the span came from request_page with
            // this size, so it was allocated with this layout.
            unsafe { alloc::dealloc(page.as_ptr(), layout) };
        }
    }
}

/// Wraps another source and refuses once `limit` pages are live.
///
/// Counts every request, refusal and release, which makes it the standard
/// instrument for exhaustion and page-reuse tests.
#[derive(Debug)]
pub struct LimitedPageSource<S> {
    inner: S,
    limit: usize,
    live: usize,
    requests: u64,
    refusals: u64,
    releases: u64,
}

impl<S: PageSource> LimitedPageSource<S> {
    #[must_use]
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit,
            live: 0,
            requests: 0,
            refusals: 0,
            releases: 0,
        }
    }

    /// Changes the live-page limit. Pages already handed out stay valid.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Pages currently handed out.
    #[must_use]
    pub fn live_pages(&self) -> usize {
        self.live
    }

    /// Every call to `request_page`, granted or not.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests
    }

    #[must_use]
    pub fn refusals(&self) -> u64 {
        self.refusals
    }

    #[must_use]
    pub fn releases(&self) -> u64 {
        self.releases
    }
}

impl LimitedPageSource<SystemPageSource> {
    /// System-backed source capped at `limit` live pages.
    #[must_use]
    pub fn system(limit: usize) -> Self {
        Self::new(SystemPageSource, limit)
    }
}

impl<S: PageSource> PageSource for LimitedPageSource<S> {
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError> {
        self.requests += 1;
        if self.live >= self.limit {
            self.refusals += 1;
            return Err(PageSourceError::Refused { bytes });
        }
        let page = self.inner.request_page(bytes)?;
        self.live += 1;
        Ok(page)
    }

    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.release_page(page, bytes) };
        self.live = self.live.saturating_sub(1);
        self.releases += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(page: NonNull<u8>, bytes: usize) {
        // SAFETY: the page is `bytes` long and exclusively ours.
        unsafe {
            page.as_ptr().write_bytes(0xA5, bytes);
            assert_eq!(*page.as_ptr().add(bytes - 1), 0xA5);
        }
    }

    #[test]
    fn test_system_source_roundtrip() {
        let mut source = SystemPageSource;
        let page = source.request_page(PAGE_SIZE).unwrap();
        assert_eq!(page.as_ptr().addr() % PAGE_SIZE, 0);
        touch(page, PAGE_SIZE);
        unsafe { source.release_page(page, PAGE_SIZE) };
    }

    #[test]
    fn test_system_source_rejects_zero() {
        let mut source = SystemPageSource;
        assert!(matches!(
            source.request_page(0),
            Err(PageSourceError::InvalidLayout { bytes: 0 })
        ));
    }

    #[cfg(all(unix, not(miri)))]
    #[test]
    fn test_mmap_source_roundtrip() {
        let mut source = MmapPageSource;
        let page = source.request_page(PAGE_SIZE).unwrap();
        assert_eq!(page.as_ptr().addr() % PAGE_SIZE, 0);
        touch(page, PAGE_SIZE);
        unsafe { source.release_page(page, PAGE_SIZE) };
    }

    #[test]
    fn test_limited_source_refuses_past_limit() {
        let mut source = LimitedPageSource::system(2);
        let a = source.request_page(PAGE_SIZE).unwrap();
        let b = source.request_page(PAGE_SIZE).unwrap();
        assert!(matches!(
            source.request_page(PAGE_SIZE),
            Err(PageSourceError::Refused { bytes: PAGE_SIZE })
        ));
        assert_eq!(source.requests(), 3);
        assert_eq!(source.refusals(), 1);
        assert_eq!(source.live_pages(), 2);

        unsafe { source.release_page(a, PAGE_SIZE) };
        assert_eq!(source.live_pages(), 1);
        let c = source.request_page(PAGE_SIZE).unwrap();
        unsafe {
            source.release_page(b, PAGE_SIZE);
            source.release_page(c, PAGE_SIZE);
        }
        assert_eq!(source.releases(), 3);
        assert_eq!(source.live_pages(), 0);
    }

    #[test]
    fn test_error_messages() {
        let err = PageSourceError::Refused { bytes: 4096 };
        assert_eq!(err.to_string(), "page source refused a 4096-byte request");
    }
}
