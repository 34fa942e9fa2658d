#![no_main]
use libfuzzer_sys::fuzz_target;
use segmalloc_core::{Heap, HeapConfig, SafetyLevel, SystemPageSource};

// Hardened mode must reject any pointer it did not hand out (or already
// took back) without corrupting the heap.
fuzz_target!(|data: &[u8]| {
    let mut heap = Heap::with_config(
        SystemPageSource,
        HeapConfig::default().with_safety(SafetyLevel::Hardened),
    );
    let mut handed_out: Vec<std::ptr::NonNull<u8>> = Vec::new();

    for chunk in data.chunks_exact(3) {
        let value = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        match chunk[0] % 3 {
            0 => {
                let size = 8 * (1 + value % 500);
                if let Ok(ptr) = heap.malloc(size) {
                    handed_out.push(ptr);
                }
            }
            1 => {
                // Free something near a handed-out pointer: exact, interior
                // or stale. Errors are expected; corruption is not.
                if let Some(&base) = handed_out.get(value % handed_out.len().max(1)) {
                    let offset = value % 64;
                    let addr = base.as_ptr().wrapping_add(offset).wrapping_sub(16);
                    if let Some(ptr) = std::ptr::NonNull::new(addr) {
                        let _ = unsafe { heap.free(ptr) };
                    }
                }
            }
            _ => {
                // Arbitrary raw addresses must never reach a header.
                let addr = std::ptr::without_provenance_mut::<u8>(value.max(1) << 4);
                if let Some(ptr) = std::ptr::NonNull::new(addr) {
                    let _ = unsafe { heap.free(ptr) };
                }
            }
        }
        if let Err(err) = heap.verify() {
            panic!("integrity: {err}");
        }
    }
});
