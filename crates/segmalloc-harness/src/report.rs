//! Challenge results and run reports.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Outcome of one challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResult {
    pub challenge: u8,
    pub name: String,
    pub elapsed_ms: f64,
    /// Peak live requested bytes over peak mapped bytes, in percent.
    pub utilization_percent: f64,
    pub allocations: u64,
    pub frees: u64,
    pub peak_live_bytes: usize,
    pub peak_mapped_bytes: usize,
    pub pages_acquired: u64,
    pub pages_released: u64,
    pub splits: u64,
    pub coalesces: u64,
    pub mean_search_length: f64,
}

/// Results of a harness run plus the heap settings it used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub seed: u64,
    pub mode: String,
    pub coalesce: String,
    pub release_empty_pages: bool,
    pub results: Vec<ChallengeResult>,
}

impl RunReport {
    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn mean_utilization(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.results
            .iter()
            .map(|r| r.utilization_percent)
            .sum::<f64>()
            / self.results.len() as f64
    }

    #[must_use]
    pub fn total_elapsed_ms(&self) -> f64 {
        self.results.iter().map(|r| r.elapsed_ms).sum()
    }

    /// Render as a plain-text table.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "segmalloc run {} (seed={:#x}, mode={}, coalesce={}, release_empty_pages={})",
            self.run_id, self.seed, self.mode, self.coalesce, self.release_empty_pages
        );
        let _ = writeln!(
            out,
            "{:<10} {:<18} {:>12} {:>16} {:>8} {:>10}",
            "challenge", "workload", "time [ms]", "utilization [%]", "pages", "search"
        );
        for r in &self.results {
            let _ = writeln!(
                out,
                "{:<10} {:<18} {:>12.2} {:>16.1} {:>8} {:>10.2}",
                format!("#{}", r.challenge),
                r.name,
                r.elapsed_ms,
                r.utilization_percent,
                r.pages_acquired,
                r.mean_search_length
            );
        }
        let _ = writeln!(
            out,
            "total {:.2} ms, mean utilization {:.1}%",
            self.total_elapsed_ms(),
            self.mean_utilization()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(challenge: u8, utilization: f64) -> ChallengeResult {
        ChallengeResult {
            challenge,
            name: format!("c{challenge}"),
            elapsed_ms: 1.5,
            utilization_percent: utilization,
            allocations: 10,
            frees: 10,
            peak_live_bytes: 1024,
            peak_mapped_bytes: 4096,
            pages_acquired: 1,
            pages_released: 1,
            splits: 9,
            coalesces: 4,
            mean_search_length: 1.0,
        }
    }

    fn report() -> RunReport {
        RunReport {
            run_id: "r1".to_string(),
            seed: 42,
            mode: "strict".to_string(),
            coalesce: "adjacent".to_string(),
            release_empty_pages: false,
            results: vec![result(1, 60.0), result(2, 80.0)],
        }
    }

    #[test]
    fn aggregates() {
        let report = report();
        assert_eq!(report.mean_utilization(), 70.0);
        assert_eq!(report.total_elapsed_ms(), 3.0);
        let empty = RunReport {
            results: Vec::new(),
            ..report
        };
        assert_eq!(empty.mean_utilization(), 0.0);
    }

    #[test]
    fn json_roundtrip() {
        let report = report();
        let json = report.to_json().unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn plain_table_lists_each_challenge() {
        let text = report().render_plain();
        assert!(text.contains("#1"));
        assert!(text.contains("#2"));
        assert!(text.contains("mean utilization 70.0%"));
    }
}
