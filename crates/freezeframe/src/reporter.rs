//! Run reports.
//!
//! Collects [`ScenarioResult`]s of one invocation and renders them as plain
//! text (for stdout) or JSON (for CI tooling).

use crate::result::FreezeResult;
use crate::scenario::ScenarioResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Results of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Suite name
    pub suite_name: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Base URL the scenarios ran against
    pub base_url: String,
    /// Per-scenario results, in run order
    pub results: Vec<ScenarioResult>,
}

impl Report {
    /// Start an empty report now
    #[must_use]
    pub fn new(suite_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
            started_at: Utc::now(),
            base_url: base_url.into(),
            results: Vec::new(),
        }
    }

    /// Add a result
    pub fn record(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    /// Passed scenarios
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Failed scenarios
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    /// True when every scenario passed (and there was at least one)
    #[must_use]
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.passed)
    }

    /// Sum of scenario durations
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.results.iter().map(|r| r.duration_ms).sum()
    }

    /// One-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {}/{} passed in {}ms",
            self.suite_name,
            self.passed_count(),
            self.results.len(),
            self.total_duration_ms()
        )
    }

    /// Plain-text report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} against {} ({})",
            self.suite_name,
            self.base_url,
            self.started_at.to_rfc3339()
        );
        for result in &self.results {
            out.push_str(&render_result(result));
        }
        let _ = writeln!(out, "{}", self.summary());
        out
    }

    /// Pretty JSON report
    pub fn render_json(&self) -> FreezeResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON report to `path`
    pub fn write_json(&self, path: &Path) -> FreezeResult<()> {
        std::fs::write(path, self.render_json()?)?;
        Ok(())
    }
}

/// Text block for one scenario
#[must_use]
pub fn render_result(result: &ScenarioResult) -> String {
    let mut out = String::new();
    let verdict = if result.passed { "PASS" } else { "FAIL" };
    let _ = writeln!(
        out,
        "{verdict} {} ({}ms, reached {})",
        result.name, result.duration_ms, result.reached
    );
    for record in &result.assertions {
        let mark = if record.passed { "ok" } else { "failed" };
        let _ = writeln!(
            out,
            "    {mark:<6} {} [{} attempt(s)]",
            record.description, record.attempts
        );
    }
    if let Some(failure) = &result.failure {
        let _ = writeln!(out, "    error  {failure}");
    }
    for artifact in &result.artifacts {
        let _ = writeln!(out, "    saved  {}", artifact.display());
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::assertion::AssertionRecord;
    use crate::scenario::{ScenarioState, StepFailure};
    use std::path::PathBuf;

    fn passed() -> ScenarioResult {
        ScenarioResult {
            name: "empty-state".to_string(),
            passed: true,
            reached: ScenarioState::Captured,
            transitions: vec![ScenarioState::Captured, ScenarioState::Closed],
            artifacts: vec![PathBuf::from("verification/empty-state-final.png")],
            assertions: vec![AssertionRecord {
                description: "wait for text \"No cases yet\" visible".to_string(),
                passed: true,
                attempts: 2,
                detail: None,
            }],
            failure: None,
            duration_ms: 40,
        }
    }

    fn failed() -> ScenarioResult {
        ScenarioResult {
            name: "creating-state".to_string(),
            passed: false,
            reached: ScenarioState::Interacting,
            transitions: vec![ScenarioState::Interacting, ScenarioState::Closed],
            artifacts: Vec::new(),
            assertions: Vec::new(),
            failure: Some(StepFailure {
                index: Some(2),
                step: "wait for held request (POST)".to_string(),
                kind: "TimeoutError".to_string(),
                error: "timed out".to_string(),
            }),
            duration_ms: 5000,
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_counts() {
            let mut report = Report::new("cases", "http://localhost:3000");
            assert!(!report.all_passed());
            report.record(passed());
            assert!(report.all_passed());
            report.record(failed());
            assert_eq!(report.passed_count(), 1);
            assert_eq!(report.failed_count(), 1);
            assert!(!report.all_passed());
            assert_eq!(report.summary(), "cases: 1/2 passed in 5040ms");
        }

        #[test]
        fn test_text_rendering() {
            let mut report = Report::new("cases", "http://localhost:3000");
            report.record(passed());
            report.record(failed());
            let text = report.render_text();
            assert!(text.contains("PASS empty-state (40ms, reached captured)"));
            assert!(text.contains("saved  verification/empty-state-final.png"));
            assert!(text.contains("error  step 3 (wait for held request (POST)): TimeoutError"));
        }

        #[test]
        fn test_json_rendering() {
            let mut report = Report::new("cases", "http://localhost:3000");
            report.record(failed());
            let json: serde_json::Value = serde_json::from_str(&report.render_json().unwrap()).unwrap();
            assert_eq!(json["results"][0]["failure"]["kind"], "TimeoutError");
            assert_eq!(json["results"][0]["reached"], "interacting");
        }
    }
}
