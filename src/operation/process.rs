// src/operation/process.rs

//! Process execution behind `Execute` operations

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default timeout for processes started by operations
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(300);

/// A process to run
#[derive(Debug, Clone)]
pub struct ProcessRequest<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub timeout: Duration,
    /// Set when the operation runs under an admin guard
    pub elevated: bool,
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs external processes
pub trait ProcessRunner: Send + Sync {
    /// Run to completion; a timeout is an error, a non-zero exit is not
    fn run(&self, request: &ProcessRequest<'_>) -> Result<ProcessOutput>;
}

/// Runner backed by `std::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run(&self, request: &ProcessRequest<'_>) -> Result<ProcessOutput> {
        debug!(
            "Executing {} {:?} (elevated: {})",
            request.program, request.args, request.elevated
        );

        let mut child = Command::new(request.program)
            .args(request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::operation(
                    "execute",
                    format!("Failed to spawn {}: {}", request.program, e),
                )
            })?;

        match child.wait_timeout(request.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

                for line in stdout.lines() {
                    info!("[{}] {}", request.program, line);
                }
                for line in stderr.lines() {
                    warn!("[{}] {}", request.program, line);
                }

                Ok(ProcessOutput {
                    code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::operation(
                    "execute",
                    format!(
                        "{} timed out after {} seconds",
                        request.program,
                        request.timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_exit_code() {
        let args = vec!["-c".to_string(), "echo hello; exit 3".to_string()];
        let output = SystemProcessRunner
            .run(&ProcessRequest {
                program: "sh",
                args: &args,
                timeout: Duration::from_secs(10),
                elevated: false,
            })
            .unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.success());
    }

    #[test]
    fn test_run_times_out() {
        let args = vec!["5".to_string()];
        let err = SystemProcessRunner
            .run(&ProcessRequest {
                program: "sleep",
                args: &args,
                timeout: Duration::from_millis(100),
                elevated: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_missing_program_fails() {
        let err = SystemProcessRunner
            .run(&ProcessRequest {
                program: "/nonexistent/installkit-test-binary",
                args: &[],
                timeout: Duration::from_secs(1),
                elevated: false,
            })
            .unwrap_err();
        assert!(matches!(err, Error::OperationFailed { .. }));
    }
}
