//! Checks that run commands in the image or a running container.

use serde::{Deserialize, Serialize};

use crate::container::ExecContext;
use crate::error::Result;
use crate::process::{ProcessOutput, RunOptions};

use super::{no_container, CheckOutcome, CheckTarget, Diagnostic, VerificationEngine};

/// Runtime enablement: `command` must print `expected` in every shell context.
///
/// The runtime's environment setup differs between interactive and
/// non-interactive shells, so all three contexts are checked independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SclCheck {
    pub command: String,
    pub expected: String,
}

impl SclCheck {
    pub fn new(command: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected: expected.into(),
        }
    }
}

/// `command` must resolve to exactly `expected_path` inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLocationCheck {
    pub command: String,
    pub expected_path: String,
}

impl CommandLocationCheck {
    pub fn new(command: impl Into<String>, expected_path: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected_path: expected_path.into(),
        }
    }
}

impl VerificationEngine {
    /// `run --rm [--user] <image> /bin/bash -c <command>`
    pub(super) async fn run_in_image(
        &self,
        target: &CheckTarget<'_>,
        env: &[(String, String)],
        command: &str,
    ) -> Result<ProcessOutput> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        if let Some(user) = target.run_as.user_arg() {
            args.push(user);
        }
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.extend([
            target.image.to_string(),
            "/bin/bash".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]);
        self.runner
            .run(&self.runtime, &args, &RunOptions::default())
            .await
    }

    pub(super) async fn check_scl(
        &self,
        check: &SclCheck,
        target: &CheckTarget<'_>,
    ) -> Result<CheckOutcome> {
        let name = format!("scl `{}`", check.command);
        let Some(container) = target.container else {
            return Ok(no_container(&name));
        };

        let direct = self.run_in_image(target, &[], &check.command).await?;
        let exec = container
            .exec(&check.command, ExecContext::NonInteractive)
            .await?;
        let interactive = container
            .exec(&check.command, ExecContext::Interactive)
            .await?;

        for (context, out) in [
            ("run (non-interactive)", direct),
            ("exec (non-interactive)", exec),
            ("exec (interactive)", interactive),
        ] {
            let actual = out.combined();
            if !actual.contains(&check.expected) {
                let expected = format!("(contains) {}", check.expected);
                return Ok(CheckOutcome::fail(
                    Diagnostic::new(&name, expected, actual.trim())
                        .with_context(format!("context: {}", context))
                        .with_context(format!("exit code: {}", out.exit_code)),
                ));
            }
        }

        Ok(CheckOutcome::pass(name))
    }

    pub(super) async fn check_command_location(
        &self,
        check: &CommandLocationCheck,
        target: &CheckTarget<'_>,
    ) -> Result<CheckOutcome> {
        let name = format!("location of {}", check.command);
        let out = self
            .run_in_image(target, &[], &format!("command -v {}", check.command))
            .await?;

        let actual = out.stdout.trim();
        if actual == check.expected_path {
            Ok(CheckOutcome::pass(name))
        } else {
            Ok(CheckOutcome::fail(
                Diagnostic::new(&name, &check.expected_path, actual)
                    .with_context(format!("exit code: {}", out.exit_code)),
            ))
        }
    }
}
