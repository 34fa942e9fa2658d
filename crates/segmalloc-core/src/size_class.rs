//! Size class bins for free blocks.
//!
//! Requests are multiples of 8 bytes in `[8, 4000]`, but free blocks can be
//! anything up to a whole page minus one header. Classes start at full 8-byte
//! precision for the small sizes that dominate real workloads and widen
//! geometrically after that, so 32 bins cover the whole page. The last bin is
//! a catch-all for everything above the largest finite class.

use crate::page_source::PAGE_SIZE;

/// Number of free-list bins.
pub const NUM_BINS: usize = 32;

/// Allocation granularity (bytes). Every request and every block size is a
/// multiple of this.
pub const SIZE_GRANULE: usize = 8;

/// Smallest request the allocator is specified for.
pub const MIN_REQUEST: usize = 8;

/// Largest request the allocator is specified for.
pub const MAX_REQUEST: usize = 4000;

/// Index of the catch-all bin.
pub const CATCH_ALL_BIN: usize = NUM_BINS - 1;

/// Inclusive upper bound of each finite class.
///
/// Bins 0-7: 8-byte steps (8 .. 64)
/// Bins 8-11: 16-byte steps (80 .. 128)
/// Bins 12-15: 32-byte steps (160 .. 256)
/// Bins 16-19: 64-byte steps (320 .. 512)
/// Bins 20-23: 128-byte steps (640 .. 1024)
/// Bins 24-27: 256-byte steps (1280 .. 2048)
/// Bins 28-30: 512-byte steps (2560 .. 3584)
const CLASS_LIMITS: [usize; NUM_BINS - 1] = [
    8, 16, 24, 32, 40, 48, 56, 64, // exact classes
    80, 96, 112, 128, //
    160, 192, 224, 256, //
    320, 384, 448, 512, //
    640, 768, 896, 1024, //
    1280, 1536, 1792, 2048, //
    2560, 3072, 3584,
];

/// Sizes up to this bound are classified by table lookup.
const LOOKUP_LIMIT: usize = PAGE_SIZE;

const LOOKUP_LEN: usize = LOOKUP_LIMIT / SIZE_GRANULE + 1;

/// `BIN_LOOKUP[ceil(size / 8)]` is the bin for `size`.
const BIN_LOOKUP: [u8; LOOKUP_LEN] = build_lookup();

const fn build_lookup() -> [u8; LOOKUP_LEN] {
    let mut table = [0u8; LOOKUP_LEN];
    let mut slot = 0;
    let mut bin = 0;
    while slot < LOOKUP_LEN {
        let size = slot * SIZE_GRANULE;
        while bin < CATCH_ALL_BIN && size > CLASS_LIMITS[bin] {
            bin += 1;
        }
        table[slot] = bin as u8;
        slot += 1;
    }
    table
}

/// Computes the bin index for a block or request size.
///
/// Total and monotonic: larger sizes never map to a smaller bin. Sizes above
/// the largest finite class land in [`CATCH_ALL_BIN`].
#[inline]
#[must_use]
pub fn bin_index(size: usize) -> usize {
    if size > LOOKUP_LIMIT {
        return CATCH_ALL_BIN;
    }
    BIN_LOOKUP[size.div_ceil(SIZE_GRANULE)] as usize
}

/// Returns the inclusive upper bound of a bin's class.
///
/// The catch-all bin is unbounded (`usize::MAX`). Returns 0 for
/// out-of-range indices.
#[must_use]
pub fn bin_limit(index: usize) -> usize {
    match index {
        i if i < CATCH_ALL_BIN => CLASS_LIMITS[i],
        CATCH_ALL_BIN => usize::MAX,
        _ => 0,
    }
}

/// Whether `size` satisfies the request contract: a multiple of 8 in
/// `[MIN_REQUEST, MAX_REQUEST]`.
#[inline]
#[must_use]
pub const fn is_valid_request(size: usize) -> bool {
    size >= MIN_REQUEST && size <= MAX_REQUEST && size % SIZE_GRANULE == 0
}
