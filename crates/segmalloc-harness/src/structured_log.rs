//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file, stdout or an in-memory buffer.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks for emitted logs.
//!
//! Heap lifecycle records are converted with [`LogEntry::from_heap_record`],
//! so a traced run interleaves harness events and allocator decisions.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Stdout, Write};
use std::path::Path;

use segmalloc_core::{HeapLogLevel, HeapLogRecord};
use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl From<HeapLogLevel> for LogLevel {
    fn from(level: HeapLogLevel) -> Self {
        match level {
            HeapLogLevel::Trace => Self::Trace,
            HeapLogLevel::Debug => Self::Debug,
            HeapLogLevel::Info => Self::Info,
            HeapLogLevel::Warn => Self::Warn,
            HeapLogLevel::Error => Self::Error,
        }
    }
}

/// Run/check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Heap decision id for lifecycle records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<usize>,
    /// Heap-level outcome label (`success`, `denied`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heap_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            challenge: None,
            mode: None,
            symbol: None,
            decision_id: None,
            ptr: None,
            size: None,
            bin: None,
            heap_outcome: None,
            outcome: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Converts a drained heap lifecycle record, keeping its trace id.
    #[must_use]
    pub fn from_heap_record(record: &HeapLogRecord) -> Self {
        let mut entry = Self::new(record.trace_id.clone(), record.level.into(), record.event);
        entry.symbol = Some(record.symbol.to_string());
        entry.decision_id = Some(record.decision_id);
        entry.ptr = record.ptr.map(|p| format!("{p:#x}"));
        entry.size = record.size;
        entry.bin = record.bin;
        entry.heap_outcome = Some(record.outcome.to_string());
        entry.details = Some(serde_json::json!({
            "details": record.details,
            "active_count": record.active_count,
            "allocated_bytes": record.allocated_bytes,
            "mapped_bytes": record.mapped_bytes,
        }));
        entry
    }

    #[must_use]
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// Set the heap safety mode.
    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

enum Sink {
    File(BufWriter<File>),
    Stdout(Stdout),
    Buffer(Vec<u8>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::File(w) => w.write(buf),
            Self::Stdout(w) => w.write(buf),
            Self::Buffer(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::File(w) => w.flush(),
            Self::Stdout(w) => w.flush(),
            Self::Buffer(w) => w.flush(),
        }
    }
}

/// JSONL writer with run-scoped trace ids.
pub struct LogEmitter {
    sink: Sink,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::with_sink(Sink::File(BufWriter::new(file)), run_id))
    }

    #[must_use]
    pub fn to_stdout(run_id: &str) -> Self {
        Self::with_sink(Sink::Stdout(std::io::stdout()), run_id)
    }

    /// Create an emitter that writes to an in-memory buffer (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self::with_sink(Sink::Buffer(Vec::new()), run_id)
    }

    fn with_sink(sink: Sink, run_id: &str) -> Self {
        Self {
            sink,
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    /// Bytes written so far, for buffer-backed emitters.
    #[must_use]
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.sink {
            Sink::Buffer(buf) => Some(buf.as_slice()),
            _ => None,
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("segmalloc::harness::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a log entry with an auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let mut entry = LogEntry::new(trace_id, level, event);
        entry.run_id = Some(self.run_id.clone());
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry, filling in trace and run ids.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        self.write_line(&entry)
    }

    /// Emit drained heap lifecycle records tagged with `challenge`.
    pub fn emit_heap_records(
        &mut self,
        challenge: &str,
        records: &[HeapLogRecord],
    ) -> std::io::Result<()> {
        for record in records {
            self.emit_entry(LogEntry::from_heap_record(record).with_challenge(challenge))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.sink, "{line}")
    }
}

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![error("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![error("<root>", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(error(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error", "fatal"].contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }

    if let Some(mode) = obj.get("mode").and_then(|v| v.as_str())
        && !["strict", "hardened"].contains(&mode)
    {
        errors.push(error("mode", format!("invalid mode: '{mode}'")));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.starts_with("segmalloc::")
    {
        errors.push(error(
            "trace_id",
            format!("trace id '{trace_id}' lacks the segmalloc:: prefix"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(value).map_err(|e| vec![error("<schema>", e.to_string())])
}

/// Validate every non-empty line of a JSONL file.
///
/// Returns the number of valid lines and every error found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let reader = BufReader::new(File::open(path)?);
    let mut valid = 0;
    let mut errors = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match validate_log_line(&line, idx + 1) {
            Ok(_) => valid += 1,
            Err(mut errs) => errors.append(&mut errs),
        }
    }
    Ok((valid, errors))
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("segmalloc::harness::run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "segmalloc::harness::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("challenge").is_none());
        assert!(parsed.get("mode").is_none());
    }

    #[test]
    fn emitter_numbers_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-7");
        let first = emitter.emit(LogLevel::Info, "a").unwrap();
        let second = emitter.emit(LogLevel::Debug, "b").unwrap();
        assert_eq!(first.trace_id, "segmalloc::harness::run-7::001");
        assert_eq!(second.trace_id, "segmalloc::harness::run-7::002");

        let text = std::str::from_utf8(emitter.buffer().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for (i, line) in lines.iter().enumerate() {
            let entry = validate_log_line(line, i + 1).unwrap();
            assert_eq!(entry.run_id.as_deref(), Some("run-7"));
        }
    }

    #[test]
    fn heap_record_conversion_keeps_ids() {
        let record = HeapLogRecord {
            decision_id: 9,
            trace_id: "segmalloc::heap::malloc::0000000000000009".to_string(),
            level: HeapLogLevel::Warn,
            symbol: "malloc",
            event: "oom",
            ptr: None,
            size: Some(4000),
            bin: None,
            outcome: "denied",
            details: "limit".to_string(),
            active_count: 3,
            allocated_bytes: 12_000,
            mapped_bytes: 12_288,
        };
        let entry = LogEntry::from_heap_record(&record).with_mode("strict");
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.decision_id, Some(9));
        assert_eq!(entry.heap_outcome.as_deref(), Some("denied"));
        let line = entry.to_jsonl().unwrap();
        let back = validate_log_line(&line, 1).unwrap();
        assert_eq!(back.trace_id, record.trace_id);
        assert_eq!(back.details.unwrap()["mapped_bytes"], 12_288);
    }

    #[test]
    fn validation_reports_missing_and_bad_fields() {
        let errs = validate_log_line(r#"{"trace_id":"x","level":"loud"}"#, 4).unwrap_err();
        let fields: Vec<&str> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"timestamp"));
        assert!(fields.contains(&"event"));
        assert!(fields.contains(&"level"));
        assert!(fields.contains(&"trace_id"));
        assert!(errs.iter().all(|e| e.line_number == 4));

        assert!(validate_log_line("not json", 1).is_err());
        assert!(validate_log_line("[1,2]", 1).is_err());
    }

    #[test]
    fn civil_dates_are_exact() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
    }

    #[test]
    fn timestamp_shape() {
        let ts = now_utc();
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
    }
}
