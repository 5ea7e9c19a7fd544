//! Run report

use std::fmt;

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::common::Result;
use crate::diagnostics::{ArtifactKind, ArtifactRef, ArtifactSink};
use crate::journey::JourneyResult;

/// Aggregate over every journey attempted in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Journeys registered for the run, attempted or not
    pub registered: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    /// Passed over attempted, as a percentage
    pub success_rate: f64,
    pub elapsed_ms: u64,
    /// Journey whose failure stopped the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<String>,
    pub results: Vec<JourneyResult>,
}

impl Report {
    pub fn new(
        registered: usize,
        results: Vec<JourneyResult>,
        aborted_at: Option<String>,
        elapsed_ms: u64,
    ) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.success).count();
        let warnings = results.iter().map(JourneyResult::warning_count).sum();
        let success_rate = if total == 0 {
            0.0
        } else {
            passed as f64 * 100.0 / total as f64
        };
        Self {
            registered,
            total,
            passed,
            failed: total - passed,
            warnings,
            success_rate,
            elapsed_ms,
            aborted_at,
            results,
        }
    }

    /// Every registered journey ran and passed
    pub fn success(&self) -> bool {
        self.failed == 0 && self.aborted_at.is_none() && self.total == self.registered
    }

    /// Journeys registered but never started
    pub fn skipped(&self) -> usize {
        self.registered.saturating_sub(self.total)
    }

    pub fn result(&self, journey: &str) -> Option<&JourneyResult> {
        self.results.iter().find(|r| r.journey_name == journey)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Store the report next to the run's failure bundles
    pub async fn persist(&self, sink: &dyn ArtifactSink) -> Result<ArtifactRef> {
        let payload = serde_json::to_value(self)?;
        sink.persist(ArtifactKind::Report, "run", &payload).await
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{}", "Journeys:".cyan())?;
        for result in &self.results {
            if result.success {
                writeln!(
                    f,
                    "  {} {} {}",
                    "✓".green(),
                    result.journey_name,
                    format!("({} ms)", result.elapsed_ms).dimmed()
                )?;
            } else {
                writeln!(
                    f,
                    "  {} {} {}",
                    "✗".red(),
                    result.journey_name.red(),
                    format!("({} ms)", result.elapsed_ms).dimmed()
                )?;
            }
            for step in &result.steps {
                let mark = if step.success {
                    "✓".green()
                } else {
                    "✗".red()
                };
                writeln!(f, "      {} {}: {}", mark, step.step_name, step.detail.dimmed())?;
                for warning in &step.warnings {
                    writeln!(f, "        {} {}", "!".yellow(), warning.yellow())?;
                }
                if let Some(err) = &step.error {
                    writeln!(f, "        {} {}", err.kind.red(), err.message)?;
                }
            }
            if let Some(artifact) = &result.failure_artifact {
                writeln!(f, "      {} {}", "artifact:".dimmed(), artifact.location)?;
            }
        }

        writeln!(f)?;
        let summary = format!(
            "{} passed, {} failed, {} skipped ({:.1}% of attempted)",
            self.passed,
            self.failed,
            self.skipped(),
            self.success_rate
        );
        if self.success() {
            writeln!(f, "{} {}", "✓".green().bold(), summary.green().bold())?;
        } else {
            writeln!(f, "{} {}", "✗".red().bold(), summary.red().bold())?;
        }
        if self.warnings > 0 {
            writeln!(f, "  {} warnings", self.warnings.to_string().yellow())?;
        }
        if let Some(journey) = &self.aborted_at {
            writeln!(f, "  run aborted at '{}'", journey)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::StepResult;

    fn result(name: &str, success: bool, warnings: usize) -> JourneyResult {
        JourneyResult {
            journey_name: name.to_string(),
            success,
            steps: vec![StepResult {
                step_name: "only".to_string(),
                success,
                detail: String::new(),
                elapsed_ms: 5,
                error: None,
                warnings: vec!["w".to_string(); warnings],
                artifact: None,
            }],
            elapsed_ms: 5,
            failure_artifact: None,
        }
    }

    #[test]
    fn test_counts_and_rate() {
        let report = Report::new(
            3,
            vec![result("a", true, 1), result("b", false, 0)],
            Some("b".to_string()),
            10,
        );
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.warnings, 1);
        assert!((report.success_rate - 50.0).abs() < f64::EPSILON);
        assert!(!report.success());
        assert!(report.result("b").is_some());
    }

    #[test]
    fn test_empty_report() {
        let report = Report::new(0, vec![], None, 0);
        assert_eq!(report.success_rate, 0.0);
        assert!(report.success());
    }

    #[test]
    fn test_json_round_trip() {
        let report = Report::new(1, vec![result("a", true, 0)], None, 3);
        let json = report.to_json().unwrap();
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_display_lists_failures() {
        colored::control::set_override(false);
        let report = Report::new(2, vec![result("login", false, 0)], Some("login".into()), 1);
        let text = report.to_string();
        assert!(text.contains("✗ login"));
        assert!(text.contains("run aborted at 'login'"));
    }

    #[tokio::test]
    async fn test_persist_report_artifact() {
        let sink = crate::diagnostics::MemorySink::new();
        let report = Report::new(2, vec![result("a", true, 0)], None, 7);

        let artifact = report.persist(&sink).await.unwrap();
        assert_eq!(artifact.kind, ArtifactKind::Report);
        let stored = sink.payload(&artifact.location).unwrap();
        assert_eq!(stored["registered"], 2);
        assert_eq!(stored["results"][0]["journey_name"], "a");
    }
}
