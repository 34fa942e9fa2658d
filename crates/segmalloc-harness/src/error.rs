//! Harness errors.

use segmalloc_core::{AllocError, IntegrityError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("challenge {challenge}: allocation of {size} bytes failed")]
    Alloc {
        challenge: u8,
        size: usize,
        #[source]
        source: AllocError,
    },
    #[error("challenge {challenge}: free failed")]
    Free {
        challenge: u8,
        #[source]
        source: AllocError,
    },
    #[error("challenge {challenge}: payload of {size} bytes at {addr:#x} was overwritten")]
    Corruption {
        challenge: u8,
        addr: usize,
        size: usize,
    },
    #[error("challenge {challenge}: heap integrity check failed")]
    Integrity {
        challenge: u8,
        #[source]
        source: IntegrityError,
    },
    #[error("unknown challenge `{0}` (expected 1-5)")]
    UnknownChallenge(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
