//! # segmalloc-abi
//!
//! C entry points for the malloc challenge host:
//!
//! ```c
//! void my_initialize(void);
//! void *my_malloc(size_t size);
//! void my_free(void *ptr);
//! void my_finalize(void);
//! ```
//!
//! All four share one process-wide [`Heap`] behind a `parking_lot` mutex.
//! `my_initialize` rebuilds it from `SEGMALLOC_*` environment settings; the
//! other entry points initialize lazily if the host skipped that call.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use parking_lot::{Mutex, const_mutex};
use segmalloc_core::{Heap, HeapConfig, HeapStats};

#[cfg(feature = "host-pages")]
mod host;

#[cfg(feature = "host-pages")]
pub type AbiPageSource = host::HostPageSource;
#[cfg(all(not(feature = "host-pages"), unix))]
pub type AbiPageSource = segmalloc_core::MmapPageSource;
#[cfg(all(not(feature = "host-pages"), not(unix)))]
pub type AbiPageSource = segmalloc_core::SystemPageSource;

static HEAP: Mutex<Option<Heap<AbiPageSource>>> = const_mutex(None);

fn fresh_heap() -> Heap<AbiPageSource> {
    #[cfg(feature = "host-pages")]
    let source = host::HostPageSource;
    #[cfg(all(not(feature = "host-pages"), unix))]
    let source = segmalloc_core::MmapPageSource;
    #[cfg(all(not(feature = "host-pages"), not(unix)))]
    let source = segmalloc_core::SystemPageSource;
    Heap::with_config(source, HeapConfig::from_env())
}

#[cfg(target_os = "linux")]
#[inline]
fn set_enomem() {
    // SAFETY: `__errno_location` returns this thread's errno slot.
    unsafe { *libc::__errno_location() = libc::ENOMEM };
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn set_enomem() {}

/// Resets the process heap: held pages are released and every bin emptied.
#[unsafe(no_mangle)]
pub extern "C" fn my_initialize() {
    let mut guard = HEAP.lock();
    // Dropping the previous heap returns its pages.
    *guard = Some(fresh_heap());
}

/// Allocates `size` bytes, or returns null.
///
/// # Safety
///
/// Callers must respect the allocator contract: `8 <= size <= 4000`, a
/// multiple of 8 (strict mode rounds other sizes, hardened mode rejects them).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn my_malloc(size: usize) -> *mut c_void {
    let mut guard = HEAP.lock();
    let heap = guard.get_or_insert_with(fresh_heap);
    match heap.malloc(size) {
        Ok(ptr) => ptr.as_ptr().cast(),
        Err(_) => {
            set_enomem();
            ptr::null_mut()
        }
    }
}

/// Returns an allocation to the process heap. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from [`my_malloc`] obtained since the
/// last [`my_initialize`] / [`my_finalize`]. In hardened mode misuse is
/// detected and ignored instead of corrupting the heap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn my_free(ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        return;
    };
    let mut guard = HEAP.lock();
    let Some(heap) = guard.as_mut() else {
        return;
    };
    // SAFETY: forwarded caller contract. Hardened-mode rejections are already
    // recorded by the heap; the C signature has no way to report them.
    let _ = unsafe { heap.free(ptr) };
}

/// Releases every page held by the process heap.
#[unsafe(no_mangle)]
pub extern "C" fn my_finalize() {
    if let Some(heap) = HEAP.lock().as_mut() {
        heap.finalize();
    }
}

/// Counters of the process heap, `None` before the first call.
pub fn heap_stats() -> Option<HeapStats> {
    HEAP.lock().as_ref().map(Heap::stats)
}

/// Runs `f` against the process heap, initializing it if needed.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap<AbiPageSource>) -> R) -> R {
    let mut guard = HEAP.lock();
    f(guard.get_or_insert_with(fresh_heap))
}
