//! Heap lifecycle log.
//!
//! When enabled in [`HeapConfig`](crate::HeapConfig), every decision the heap
//! makes (which bin served a request, when a page was acquired, what got
//! merged) is appended as a [`HeapLogRecord`] carrying an accounting
//! snapshot. Callers drain the records; the harness turns them into JSONL.

/// Lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLogRecord {
    /// Monotonic decision id, unique per heap.
    pub decision_id: u64,
    /// Correlation id (`segmalloc::heap::<symbol>::<decision id>`).
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// Entry point (`malloc`, `free`, `initialize`, `finalize`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `page_acquired`, `coalesce`, ...).
    pub event: &'static str,
    /// Payload or page address involved.
    pub ptr: Option<usize>,
    /// Size involved (request, block or page bytes).
    pub size: Option<usize>,
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form `key=value` details.
    pub details: String,
    /// Snapshot: live allocations.
    pub active_count: usize,
    /// Snapshot: payload bytes held by live allocations.
    pub allocated_bytes: usize,
    /// Snapshot: bytes currently obtained from the page source.
    pub mapped_bytes: usize,
}

/// Append-only record buffer with decision ids.
#[derive(Debug)]
pub(crate) struct LifecycleLog {
    enabled: bool,
    next_decision_id: u64,
    records: Vec<HeapLogRecord>,
}

/// Everything except the snapshot and ids.
pub(crate) struct LogEvent {
    pub(crate) level: HeapLogLevel,
    pub(crate) symbol: &'static str,
    pub(crate) event: &'static str,
    pub(crate) ptr: Option<usize>,
    pub(crate) size: Option<usize>,
    pub(crate) bin: Option<usize>,
    pub(crate) outcome: &'static str,
}

impl LogEvent {
    pub(crate) fn new(
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            bin: None,
            outcome,
        }
    }

    pub(crate) fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn bin(mut self, bin: usize) -> Self {
        self.bin = Some(bin);
        self
    }
}

impl LifecycleLog {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn record(
        &mut self,
        event: LogEvent,
        details: String,
        snapshot: (usize, usize, usize),
    ) {
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let (active_count, allocated_bytes, mapped_bytes) = snapshot;
        self.records.push(HeapLogRecord {
            decision_id,
            trace_id: format!("segmalloc::heap::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            bin: event.bin,
            outcome: event.outcome,
            details,
            active_count,
            allocated_bytes,
            mapped_bytes,
        });
    }

    pub(crate) fn records(&self) -> &[HeapLogRecord] {
        &self.records
    }

    pub(crate) fn drain(&mut self) -> Vec<HeapLogRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_reports_disabled() {
        assert!(!LifecycleLog::new(false).enabled());
        assert!(LifecycleLog::new(true).enabled());
    }

    #[test]
    fn records_get_monotonic_ids_and_trace_ids() {
        let mut log = LifecycleLog::new(true);
        log.record(
            LogEvent::new(HeapLogLevel::Trace, "malloc", "alloc", "success")
                .ptr(0x1010)
                .size(64)
                .bin(7),
            "path=bin_hit".to_string(),
            (1, 64, 4096),
        );
        log.record(
            LogEvent::new(HeapLogLevel::Warn, "malloc", "oom", "denied").size(128),
            String::new(),
            (1, 64, 4096),
        );

        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[1].decision_id, 2);
        assert_eq!(records[0].trace_id, "segmalloc::heap::malloc::0000000000000001");
        assert_eq!(records[0].bin, Some(7));
        assert_eq!(records[1].ptr, None);
        assert_eq!(records[1].mapped_bytes, 4096);
        assert!(log.records().is_empty());
    }

    #[test]
    fn levels_order_by_severity() {
        assert!(HeapLogLevel::Trace < HeapLogLevel::Warn);
        assert_eq!(HeapLogLevel::Error.as_str(), "error");
    }
}
