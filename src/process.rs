//! External process execution for the build tool and container runtime.
//!
//! Every interaction with `s2i`, `docker` and `git` goes through a
//! [`ProcessRunner`], so tests can substitute a scripted runner.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory for the process.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    /// Runs the process in the given directory.
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }
}

/// Captured result of one external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or -1 when the process was killed by a signal.
    pub exit_code: i32,
}

impl ProcessOutput {
    /// Creates a successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Creates a failed output with the given stderr and exit code.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr)
        }
    }
}

/// Runs external commands and captures their output.
///
/// A non-zero exit status is not an error; callers interpret the
/// [`ProcessOutput`]. Only a failure to start the program is reported as
/// [`Error::Spawn`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `program` with `args` to completion.
    async fn run(&self, program: &str, args: &[String], options: &RunOptions)
        -> Result<ProcessOutput>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<ProcessOutput> {
        tracing::debug!(program = %program, args = ?args, "running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &options.env {
            command.env(key, value);
        }

        let output = command.output().await.map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

        let result = ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        tracing::trace!(
            program = %program,
            exit_code = result.exit_code,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "command finished"
        );

        Ok(result)
    }
}

/// Converts string slices into owned arguments.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let runner = TokioProcessRunner::new();
        let out = runner
            .run("sh", &args(["-c", "echo out; echo err >&2; exit 3"]), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = TokioProcessRunner::new();
        let err = runner
            .run("definitely-not-a-real-program-4711", &[], &RunOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn runs_in_requested_directory_with_env() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = TokioProcessRunner::new();
        let options = RunOptions {
            cwd: Some(temp.path().to_path_buf()),
            env: vec![("HARNESS_MARKER".to_string(), "42".to_string())],
        };

        let out = runner
            .run("sh", &args(["-c", "echo $HARNESS_MARKER > marker.txt"]), &options)
            .await
            .unwrap();

        assert!(out.success());
        let written = std::fs::read_to_string(temp.path().join("marker.txt")).unwrap();
        assert_eq!(written.trim(), "42");
    }

    #[test]
    fn combined_joins_streams() {
        let out = ProcessOutput {
            stdout: "a\n".to_string(),
            stderr: "b\n".to_string(),
            exit_code: 0,
        };
        assert_eq!(out.combined(), "a\nb\n");
        assert_eq!(ProcessOutput::ok("x").combined(), "x");
        assert_eq!(ProcessOutput::failed(1, "y").combined(), "y");
    }
}
