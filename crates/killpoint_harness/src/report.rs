//! Batch results and the final verdict.

use crate::error::HarnessError;
use crate::scenario::ScenarioResult;
use chrono::{DateTime, Utc};
use killpoint_core::{Checkpoint, CoreError, CoreResult, RunId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Results of one pass over every checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Run identifier
    pub run_id: RunId,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// Checkpoints the batch covers
    pub checkpoint_count: u32,
    /// Results in checkpoint order
    pub results: Vec<ScenarioResult>,
}

impl BatchReport {
    /// Create an empty report
    #[must_use]
    pub fn new(checkpoint_count: u32) -> Self {
        Self {
            run_id: RunId::new(),
            started_at: Utc::now(),
            checkpoint_count,
            results: Vec::new(),
        }
    }

    /// Append a result
    pub fn push(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    /// Number of passed checkpoints
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Checkpoints that failed
    #[must_use]
    pub fn failed_checkpoints(&self) -> Vec<Checkpoint> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.checkpoint)
            .collect()
    }

    /// Result for one checkpoint
    #[must_use]
    pub fn result(&self, checkpoint: Checkpoint) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.checkpoint == checkpoint)
    }

    /// Pass count equals the checkpoint count
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.pass_count() == self.checkpoint_count as usize
    }

    /// Aggregate assertion over the batch
    ///
    /// # Errors
    ///
    /// Returns `BatchFailed` unless every checkpoint passed
    pub fn verdict(&self) -> Result<(), HarnessError> {
        if self.all_passed() {
            return Ok(());
        }
        Err(HarnessError::BatchFailed {
            passed: self.pass_count(),
            total: self.checkpoint_count,
            failed: self.failed_checkpoints(),
        })
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Write JSON to `path`
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be written
    pub fn write_json(&self, path: &Path) -> CoreResult<()> {
        std::fs::write(path, self.to_json()).map_err(|e| CoreError::io(path.display(), &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(checkpoint: u32, passed: bool) -> ScenarioResult {
        ScenarioResult {
            checkpoint: Checkpoint::new(checkpoint),
            passed,
            stage: crate::ScenarioStage::Reconciled,
            victim: None,
            promoted: None,
            reason: (!passed).then(|| "boom".to_string()),
            failure: None,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_verdict_all_passed() {
        let mut report = BatchReport::new(2);
        report.push(result(1, true));
        report.push(result(2, true));
        assert!(report.verdict().is_ok());
    }

    #[test]
    fn test_verdict_lists_failures() {
        let mut report = BatchReport::new(3);
        report.push(result(1, true));
        report.push(result(2, false));
        report.push(result(3, true));

        match report.verdict() {
            Err(HarnessError::BatchFailed { passed, total, failed }) => {
                assert_eq!(passed, 2);
                assert_eq!(total, 3);
                assert_eq!(failed, vec![Checkpoint::new(2)]);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_missing_results_fail_the_batch() {
        let mut report = BatchReport::new(2);
        report.push(result(1, true));
        assert!(!report.all_passed());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = BatchReport::new(1);
        report.push(result(1, true));
        report.write_json(&path).unwrap();

        let decoded: BatchReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(decoded, report);
    }
}
