//! Thread-safe heap handle.
//!
//! A [`Heap`] is single-threaded; `SharedHeap` serializes every entry point
//! through one `parking_lot::Mutex`.

use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::error::{AllocError, IntegrityError};
use crate::heap::Heap;
use crate::page_source::PageSource;
use crate::stats::HeapStats;

pub struct SharedHeap<S: PageSource> {
    inner: Mutex<Heap<S>>,
}

impl<S: PageSource> SharedHeap<S> {
    pub fn new(heap: Heap<S>) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    pub fn initialize(&self) {
        self.inner.lock().initialize();
    }

    pub fn finalize(&self) {
        self.inner.lock().finalize();
    }

    pub fn malloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.lock().malloc(size)
    }

    /// # Safety
    ///
    /// Same contract as [`Heap::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().free(ptr) }
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }

    pub fn verify(&self) -> Result<(), IntegrityError> {
        self.inner.lock().verify()
    }

    /// Runs `f` with the heap locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Heap<S>) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn into_inner(self) -> Heap<S> {
        self.inner.into_inner()
    }
}

impl<S: PageSource> std::fmt::Debug for SharedHeap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHeap").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_source::SystemPageSource;
    use std::sync::Arc;

    #[test]
    fn concurrent_malloc_free_keeps_heap_consistent() {
        let shared = Arc::new(SharedHeap::new(Heap::new(SystemPageSource)));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for i in 0..200usize {
                        let size = 8 * (1 + (i * 7 + t) % 64);
                        let ptr = shared.malloc(size).unwrap();
                        unsafe {
                            ptr.as_ptr().write_bytes(t as u8, size);
                            assert_eq!(*ptr.as_ptr().add(size - 1), t as u8);
                            shared.free(ptr).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = shared.stats();
        assert_eq!(stats.allocations, 800);
        assert_eq!(stats.frees, 800);
        assert_eq!(stats.active_count, 0);
        shared.verify().unwrap();
    }

    #[test]
    fn with_exposes_locked_heap() {
        let shared = SharedHeap::new(Heap::new(SystemPageSource));
        shared.malloc(64).unwrap();
        let pages = shared.with(|heap| heap.page_count());
        assert_eq!(pages, 1);
        let heap = shared.into_inner();
        assert_eq!(heap.stats().allocations, 1);
    }
}
