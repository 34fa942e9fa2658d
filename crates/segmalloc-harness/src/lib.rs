//! Malloc challenge harness for segmalloc.
//!
//! This crate provides:
//! - Workloads: the five challenge size distributions with random lifetimes
//! - Runner: drives a heap through a workload, checking every payload
//! - Reports: utilization and elapsed time per challenge, as JSON or a table
//! - Structured logs: JSONL run events plus drained heap lifecycle records

#![deny(unsafe_code)]

pub mod error;
pub mod report;
#[allow(unsafe_code)]
pub mod runner;
pub mod structured_log;
pub mod workload;

pub use error::HarnessError;
pub use report::{ChallengeResult, RunReport};
pub use runner::Runner;
pub use workload::{ChallengeSpec, SizeDistribution, XorShift64};
