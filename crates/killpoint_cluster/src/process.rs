//! Child process invocation shared by the command-line adapters.

use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Whether the process exited with status 0
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ProcessOutput {
    /// Trimmed stderr, falling back to the exit code when empty
    pub(crate) fn reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        }
    }
}

/// Why a child process produced no output
#[derive(Debug)]
pub(crate) enum ProcessFailure {
    /// The program could not be started
    Launch(std::io::Error),
    /// The program ran longer than allowed and was killed
    TimedOut(Duration),
}

impl std::fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Launch(err) => write!(f, "failed to launch: {}", err),
            Self::TimedOut(limit) => write!(f, "no answer within {:?}", limit),
        }
    }
}

/// Run `program args...` to completion, killing it after `limit`
pub(crate) async fn run(
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<ProcessOutput, ProcessFailure> {
    tracing::debug!(program, ?args, "spawning");
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(limit, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return Err(ProcessFailure::Launch(err)),
        Err(_) => return Err(ProcessFailure::TimedOut(limit)),
    };

    Ok(ProcessOutput {
        code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_prefers_stderr() {
        let out = ProcessOutput {
            code: Some(22),
            success: false,
            stdout: String::new(),
            stderr: "Error EINVAL: bad\n".to_string(),
        };
        assert_eq!(out.reason(), "Error EINVAL: bad");
    }

    #[test]
    fn test_reason_falls_back_to_code() {
        let out = ProcessOutput {
            code: Some(3),
            success: false,
            stdout: String::new(),
            stderr: "  ".to_string(),
        };
        assert_eq!(out.reason(), "exit status 3");
    }

    #[tokio::test]
    async fn test_run_missing_program() {
        let result = run("killpoint-no-such-binary", &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ProcessFailure::Launch(_))));
    }
}
