//! Page source backed by the challenge host.

use std::ffi::c_void;
use std::ptr::NonNull;

use segmalloc_core::{PageSource, PageSourceError};

unsafe extern "C" {
    fn mmap_from_system(size: usize) -> *mut c_void;
    fn munmap_to_system(ptr: *mut c_void, size: usize);
}

/// Pages obtained through the host's `mmap_from_system`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPageSource;

impl PageSource for HostPageSource {
    fn request_page(&mut self, bytes: usize) -> Result<NonNull<u8>, PageSourceError> {
        // SAFETY: the host contract takes any byte count and returns null or
        // a fresh mapping of that size.
        let page = unsafe { mmap_from_system(bytes) };
        NonNull::new(page.cast::<u8>()).ok_or(PageSourceError::Refused { bytes })
    }

    unsafe fn release_page(&mut self, page: NonNull<u8>, bytes: usize) {
        // SAFETY: caller guarantees `page`/`bytes` came from `request_page`.
        unsafe { munmap_to_system(page.as_ptr().cast(), bytes) };
    }
}
