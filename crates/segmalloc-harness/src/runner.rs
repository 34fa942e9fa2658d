//! Challenge runner.
//!
//! Drives a [`Heap`] through a [`ChallengeSpec`] the way the challenge host
//! does: `initialize`, epochs of allocations with random lifetimes, free on
//! expiry, `finalize`. Every payload is stamped with a tag byte on
//! allocation and checked before it is freed.

use std::ptr::NonNull;
use std::time::Instant;

use segmalloc_core::{Heap, PageSource};
use serde_json::json;

use crate::error::HarnessError;
use crate::report::{ChallengeResult, RunReport};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::workload::{ChallengeSpec, XorShift64};

#[derive(Debug, Clone, Copy)]
struct Object {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

impl Object {
    fn stamp(self) {
        // SAFETY: `ptr` is a live allocation of at least `size` bytes.
        unsafe { self.ptr.as_ptr().write_bytes(self.tag, self.size) };
    }

    fn intact(self) -> bool {
        // SAFETY: `ptr` is a live allocation of at least `size` initialized
        // bytes (stamped on allocation).
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) };
        bytes.iter().all(|&b| b == self.tag)
    }
}

/// Runs challenges with a fixed seed.
#[derive(Debug, Clone)]
pub struct Runner {
    run_id: String,
    seed: u64,
    verify_every: Option<usize>,
}

impl Runner {
    #[must_use]
    pub fn new(run_id: impl Into<String>, seed: u64) -> Self {
        Self {
            run_id: run_id.into(),
            seed,
            verify_every: None,
        }
    }

    /// Run `Heap::verify` every `epochs` epochs (and at the end).
    #[must_use]
    pub fn with_verify_every(mut self, epochs: usize) -> Self {
        self.verify_every = Some(epochs.max(1));
        self
    }

    /// Runs every challenge on `heap`, re-initializing it before each one.
    pub fn run_suite<S: PageSource>(
        &self,
        heap: &mut Heap<S>,
        specs: &[ChallengeSpec],
        mut log: Option<&mut LogEmitter>,
    ) -> Result<RunReport, HarnessError> {
        let config = *heap.config();
        if let Some(log) = log.as_deref_mut() {
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "run_start")
                    .with_mode(config.safety.as_str())
                    .with_details(json!({
                        "seed": self.seed,
                        "coalesce": config.coalesce.as_str(),
                        "release_empty_pages": config.release_empty_pages,
                        "challenges": specs.iter().map(|s| s.id).collect::<Vec<_>>(),
                    })),
            )?;
        }

        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            results.push(self.run_challenge(heap, spec, log.as_deref_mut())?);
        }

        let report = RunReport {
            run_id: self.run_id.clone(),
            seed: self.seed,
            mode: config.safety.as_str().to_string(),
            coalesce: config.coalesce.as_str().to_string(),
            release_empty_pages: config.release_empty_pages,
            results,
        };
        if let Some(log) = log {
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "run_end")
                    .with_mode(config.safety.as_str())
                    .with_outcome(Outcome::Pass)
                    .with_details(json!({
                        "mean_utilization_percent": report.mean_utilization(),
                        "total_elapsed_ms": report.total_elapsed_ms(),
                    })),
            )?;
            log.flush()?;
        }
        Ok(report)
    }

    /// Runs one challenge from a freshly initialized heap.
    pub fn run_challenge<S: PageSource>(
        &self,
        heap: &mut Heap<S>,
        spec: &ChallengeSpec,
        mut log: Option<&mut LogEmitter>,
    ) -> Result<ChallengeResult, HarnessError> {
        let id = spec.id;
        let mode = heap.config().safety.as_str();
        // Each challenge gets its own stream so reordering the suite does
        // not change a challenge's workload.
        let mut rng = XorShift64::new(self.seed ^ (u64::from(id) << 56));
        let slots = spec.max_lifetime_epochs.max(1) + 1;
        let mut expiring: Vec<Vec<Object>> = vec![Vec::new(); slots];
        let mut live_bytes = 0usize;
        let mut peak_live_bytes = 0usize;
        let mut next_tag = 0u8;

        if let Some(log) = log.as_deref_mut() {
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "challenge_start")
                    .with_challenge(spec.name)
                    .with_mode(mode)
                    .with_details(serde_json::to_value(spec)?),
            )?;
        }

        let started = Instant::now();
        heap.initialize();

        for epoch in 0..spec.epochs {
            for object in std::mem::take(&mut expiring[epoch % slots]) {
                release(heap, id, object)?;
                live_bytes -= object.size;
            }

            for _ in 0..spec.allocations_per_epoch {
                let size = spec.sizes.sample(&mut rng);
                let lifetime = rng.gen_range(1, spec.max_lifetime_epochs.max(1));
                let ptr = heap.malloc(size).map_err(|source| HarnessError::Alloc {
                    challenge: id,
                    size,
                    source,
                })?;
                next_tag = next_tag.wrapping_add(1);
                let object = Object {
                    ptr,
                    size,
                    tag: next_tag,
                };
                object.stamp();
                expiring[(epoch + lifetime) % slots].push(object);
                live_bytes += size;
                peak_live_bytes = peak_live_bytes.max(live_bytes);
            }

            if self.verify_every.is_some_and(|every| epoch % every == every - 1) {
                heap.verify().map_err(|source| HarnessError::Integrity {
                    challenge: id,
                    source,
                })?;
            }
            forward_heap_logs(heap, spec, log.as_deref_mut())?;
        }

        for bucket in &mut expiring {
            for object in bucket.drain(..) {
                release(heap, id, object)?;
            }
        }
        if self.verify_every.is_some() {
            heap.verify().map_err(|source| HarnessError::Integrity {
                challenge: id,
                source,
            })?;
        }

        let stats = heap.stats();
        heap.finalize();
        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        forward_heap_logs(heap, spec, log.as_deref_mut())?;

        let utilization_percent = if stats.peak_mapped_bytes == 0 {
            0.0
        } else {
            peak_live_bytes as f64 * 100.0 / stats.peak_mapped_bytes as f64
        };
        let result = ChallengeResult {
            challenge: id,
            name: spec.name.to_string(),
            elapsed_ms,
            utilization_percent,
            allocations: stats.allocations,
            frees: stats.frees,
            peak_live_bytes,
            peak_mapped_bytes: stats.peak_mapped_bytes,
            pages_acquired: stats.pages_acquired,
            pages_released: stats.pages_released,
            splits: stats.splits,
            coalesces: stats.coalesces,
            mean_search_length: stats.mean_search_length(),
        };

        if let Some(log) = log {
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "challenge_end")
                    .with_challenge(spec.name)
                    .with_mode(mode)
                    .with_outcome(Outcome::Pass)
                    .with_duration_ms(elapsed_ms as u64)
                    .with_details(serde_json::to_value(&result)?),
            )?;
        }
        Ok(result)
    }
}

fn release<S: PageSource>(heap: &mut Heap<S>, id: u8, object: Object) -> Result<(), HarnessError> {
    if !object.intact() {
        return Err(HarnessError::Corruption {
            challenge: id,
            addr: object.ptr.as_ptr().addr(),
            size: object.size,
        });
    }
    // SAFETY: `object` came from `heap.malloc` and is freed exactly once.
    unsafe { heap.free(object.ptr) }.map_err(|source| HarnessError::Free {
        challenge: id,
        source,
    })
}

fn forward_heap_logs<S: PageSource>(
    heap: &mut Heap<S>,
    spec: &ChallengeSpec,
    log: Option<&mut LogEmitter>,
) -> Result<(), HarnessError> {
    if !heap.config().lifecycle_logging {
        return Ok(());
    }
    let records = heap.drain_lifecycle_logs();
    if let Some(log) = log {
        log.emit_heap_records(spec.name, &records)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use segmalloc_core::SystemPageSource;

    fn small(spec: ChallengeSpec) -> ChallengeSpec {
        spec.with_epochs(40)
    }

    #[test]
    fn fixed_challenge_balances_allocations() {
        let mut heap = Heap::new(SystemPageSource);
        let spec = small(ChallengeSpec::by_id(1).unwrap());
        let result = Runner::new("t", 1)
            .with_verify_every(5)
            .run_challenge(&mut heap, &spec, None)
            .unwrap();
        let expected = (spec.epochs * spec.allocations_per_epoch) as u64;
        assert_eq!(result.allocations, expected);
        assert_eq!(result.frees, expected);
        assert!(result.utilization_percent > 0.0 && result.utilization_percent <= 100.0);
        assert_eq!(heap.stats().mapped_bytes, 0);
    }

    #[test]
    fn same_seed_same_workload() {
        let spec = small(ChallengeSpec::by_id(5).unwrap());
        let run = || {
            let mut heap = Heap::new(SystemPageSource);
            Runner::new("t", 77)
                .run_challenge(&mut heap, &spec, None)
                .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.peak_live_bytes, b.peak_live_bytes);
        assert_eq!(a.peak_mapped_bytes, b.peak_mapped_bytes);
        assert_eq!(a.splits, b.splits);
    }
}
