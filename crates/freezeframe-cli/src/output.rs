//! Output formatting

use console::style;
use freezeframe::{render_result, Report, Scenario, ScenarioResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Renders scenario lists and results for stdout
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Printer {
    /// Create a printer
    #[must_use]
    pub const fn new(use_color: bool, quiet: bool) -> Self {
        Self { use_color, quiet }
    }

    /// Scenario catalogue, one per line
    #[must_use]
    pub fn scenario_list(&self, scenarios: &[Scenario]) -> String {
        let width = scenarios.iter().map(|s| s.name.len()).max().unwrap_or(0);
        let mut out = String::new();
        for scenario in scenarios {
            let name = format!("{:<width$}", scenario.name);
            let name = if self.use_color {
                style(name).bold().to_string()
            } else {
                name
            };
            let _ = writeln!(out, "{name}  {}", scenario.description);
        }
        out
    }

    /// One finished scenario. Quiet mode keeps only failures.
    #[must_use]
    pub fn result(&self, result: &ScenarioResult) -> String {
        if self.quiet && result.passed {
            return String::new();
        }
        let block = render_result(result);
        if !self.use_color {
            return block;
        }
        let Some((verdict, rest)) = block.split_once(' ') else {
            return block;
        };
        let verdict = if result.passed {
            style(verdict).green().bold()
        } else {
            style(verdict).red().bold()
        };
        format!("{verdict} {rest}")
    }

    /// Closing summary line
    #[must_use]
    pub fn summary(&self, report: &Report) -> String {
        let line = report.summary();
        if !self.use_color {
            return format!("{line}\n");
        }
        let line = if report.all_passed() {
            style(line).green()
        } else {
            style(line).red()
        };
        format!("{line}\n")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use freezeframe::{ScenarioState, StepFailure};

    fn result(passed: bool) -> ScenarioResult {
        ScenarioResult {
            name: "empty-state".to_string(),
            passed,
            reached: ScenarioState::Captured,
            transitions: vec![ScenarioState::Closed],
            artifacts: Vec::new(),
            assertions: Vec::new(),
            failure: (!passed).then(|| StepFailure {
                index: Some(0),
                step: "wait for text \"No cases yet\" visible".to_string(),
                kind: "TimeoutError".to_string(),
                error: "timed out".to_string(),
            }),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_plain_result() {
        let printer = Printer::new(false, false);
        assert!(printer.result(&result(true)).starts_with("PASS empty-state"));
        assert!(printer.result(&result(false)).contains("TimeoutError"));
    }

    #[test]
    fn test_quiet_hides_passes() {
        let printer = Printer::new(false, true);
        assert!(printer.result(&result(true)).is_empty());
        assert!(!printer.result(&result(false)).is_empty());
    }

    #[test]
    fn test_scenario_list_alignment() {
        let scenarios = vec![
            Scenario::new("a", "/").describe("first"),
            Scenario::new("long-name", "/").describe("second"),
        ];
        let text = Printer::new(false, false).scenario_list(&scenarios);
        assert!(text.contains(&format!("{:<9}  first", "a")));
        assert!(text.contains("long-name  second"));
    }
}
