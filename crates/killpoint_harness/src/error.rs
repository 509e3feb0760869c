//! Batch-level errors.

use crate::setup::SetupError;
use killpoint_core::Checkpoint;

/// Errors that end a run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Setup failed; no checkpoint ran
    #[error("setup failed: {0}")]
    Setup(#[from] SetupError),

    /// At least one checkpoint failed
    #[error("{passed}/{total} checkpoints passed, failed: {}", format_checkpoints(.failed))]
    BatchFailed {
        /// Checkpoints passed
        passed: usize,
        /// Checkpoints run
        total: u32,
        /// Checkpoints that failed
        failed: Vec<Checkpoint>,
    },
}

fn format_checkpoints(checkpoints: &[Checkpoint]) -> String {
    checkpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_failed_message() {
        let err = HarnessError::BatchFailed {
            passed: 7,
            total: 9,
            failed: vec![Checkpoint::new(3), Checkpoint::new(8)],
        };
        assert_eq!(err.to_string(), "7/9 checkpoints passed, failed: 3, 8");
    }
}
