#![no_main]
use libfuzzer_sys::fuzz_target;
use segmalloc_core::{
    CoalescePolicy, Heap, HeapConfig, LimitedPageSource, MAX_REQUEST, SystemPageSource,
};

// Each 4-byte chunk is one op: [op, size lo, size hi, slot].
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let config = HeapConfig::default()
        .with_coalesce(if data[0] & 1 == 0 {
            CoalescePolicy::Adjacent
        } else {
            CoalescePolicy::Off
        })
        .with_release_empty_pages(data[0] & 2 != 0);
    // A small page limit makes exhaustion reachable.
    let mut heap = Heap::with_config(LimitedPageSource::new(SystemPageSource, 24), config);
    let mut live: Vec<(std::ptr::NonNull<u8>, usize, u8)> = Vec::new();

    for chunk in data[1..].chunks_exact(4) {
        let op = chunk[0] % 4;
        let size = 8 * (1 + usize::from(u16::from_le_bytes([chunk[1], chunk[2]])) % (MAX_REQUEST / 8));
        let slot = usize::from(chunk[3]);

        match op {
            0 | 1 => match heap.malloc(size) {
                Ok(ptr) => {
                    let tag = chunk[3];
                    unsafe { ptr.as_ptr().write_bytes(tag, size) };
                    live.push((ptr, size, tag));
                }
                Err(err) => assert!(err.is_exhaustion(), "{err}"),
            },
            2 => {
                if !live.is_empty() {
                    let (ptr, size, tag) = live.swap_remove(slot % live.len());
                    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                    assert!(bytes.iter().all(|&b| b == tag), "payload clobbered");
                    unsafe { heap.free(ptr).unwrap() };
                }
            }
            _ => {
                if let Err(err) = heap.verify() {
                    panic!("integrity: {err}");
                }
            }
        }
    }

    for (ptr, _, _) in live {
        unsafe { heap.free(ptr).unwrap() };
    }
    if let Err(err) = heap.verify() {
        panic!("integrity after teardown: {err}");
    }
});
