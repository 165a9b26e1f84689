//! Verification strategies.
//!
//! Each strategy produces a [`CheckOutcome`]: pass/fail plus, on failure, a
//! [`Diagnostic`] with expected and actual blocks. Mismatches are values, not
//! errors; `Err` is reserved for the harness being unable to run a check.

mod exec;
mod http;
mod identity;
mod proxy;

pub use exec::{CommandLocationCheck, SclCheck};
pub use http::HttpCheck;
pub use identity::pid1_is_managed_runtime;
pub use proxy::ProxyCheck;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::container::{ContainerHandle, RunAs};
use crate::error::Result;
use crate::poll::RetryPolicy;
use crate::process::ProcessRunner;

/// Per-request timeout for HTTP checks.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How filtered output is compared with the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Byte-for-byte equality.
    #[default]
    Exact,
    /// Expected value appears anywhere.
    Contains,
    /// Output begins with the expected value.
    StartsWith,
}

impl Comparison {
    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        match self {
            Comparison::Exact => actual == expected,
            Comparison::Contains => actual.contains(expected),
            Comparison::StartsWith => actual.starts_with(expected),
        }
    }
}

/// Transform applied to raw output before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFilter {
    #[default]
    Identity,
    /// Strips surrounding whitespace.
    Trim,
    /// Last non-blank line, ignoring the build tool's `--->` status lines.
    FinalLine,
    /// Keeps `<li>` lines with leading whitespace and the tags removed.
    StripListItems,
}

impl OutputFilter {
    pub fn apply(&self, raw: &str) -> String {
        match self {
            OutputFilter::Identity => raw.to_string(),
            OutputFilter::Trim => raw.trim().to_string(),
            OutputFilter::FinalLine => raw
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--->"))
                .last()
                .unwrap_or_default()
                .to_string(),
            OutputFilter::StripListItems => raw
                .lines()
                .filter(|line| line.contains("<li>"))
                .map(|line| line.trim_start().replace("<li>", "").replace("</li>", ""))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Expected value plus how to reach it from raw output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRule {
    pub expected: String,
    #[serde(default)]
    pub filter: OutputFilter,
    #[serde(default)]
    pub comparison: Comparison,
}

impl OutputRule {
    /// Exact equality, no filter.
    pub fn exact(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            filter: OutputFilter::Identity,
            comparison: Comparison::Exact,
        }
    }

    /// Substring match, no filter.
    pub fn contains(expected: impl Into<String>) -> Self {
        Self {
            comparison: Comparison::Contains,
            ..Self::exact(expected)
        }
    }

    /// Prefix match, no filter.
    pub fn starts_with(expected: impl Into<String>) -> Self {
        Self {
            comparison: Comparison::StartsWith,
            ..Self::exact(expected)
        }
    }

    pub fn with_filter(mut self, filter: OutputFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Filters `raw` and compares it against the expected value.
    pub fn evaluate(&self, check: &str, raw: &str) -> CheckOutcome {
        let actual = self.filter.apply(raw);
        if self.comparison.matches(&actual, &self.expected) {
            CheckOutcome::pass(check)
        } else {
            CheckOutcome::fail(Diagnostic::new(check, self.describe_expected(), actual))
        }
    }

    fn describe_expected(&self) -> String {
        match self.comparison {
            Comparison::Exact => self.expected.clone(),
            Comparison::Contains => format!("(contains) {}", self.expected),
            Comparison::StartsWith => format!("(starts with) {}", self.expected),
        }
    }
}

/// Human-readable failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub check: String,
    pub expected: String,
    pub actual: String,
    /// Extra lines: URL, command, attempts.
    pub context: Vec<String>,
}

impl Diagnostic {
    pub fn new(
        check: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            expected: expected.into(),
            actual: actual.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FAILED] {}", self.check)?;
        for line in &self.context {
            writeln!(f, "  {}", line)?;
        }
        writeln!(f, "Expected:")?;
        writeln!(f, "-----")?;
        writeln!(f, "{}", self.expected)?;
        writeln!(f, "-----")?;
        writeln!(f, "Actual:")?;
        writeln!(f, "-----")?;
        writeln!(f, "{}", self.actual)?;
        write!(f, "-----")
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub check: String,
    pub passed: bool,
    pub diagnostic: Option<Diagnostic>,
}

impl CheckOutcome {
    pub fn pass(check: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            passed: true,
            diagnostic: None,
        }
    }

    pub fn fail(diagnostic: Diagnostic) -> Self {
        Self {
            check: diagnostic.check.clone(),
            passed: false,
            diagnostic: Some(diagnostic),
        }
    }
}

/// One verification to perform against a case's image or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    Http(HttpCheck),
    Scl(SclCheck),
    PidIdentity,
    CommandLocation(CommandLocationCheck),
    Proxy(ProxyCheck),
}

/// What a check runs against.
#[derive(Clone, Copy)]
pub struct CheckTarget<'a> {
    /// Image used for direct `run --rm` invocations.
    pub image: &'a str,
    pub run_as: RunAs,
    /// Running container, for HTTP, exec and PID checks.
    pub container: Option<&'a ContainerHandle>,
}

impl<'a> CheckTarget<'a> {
    pub fn image(image: &'a str) -> Self {
        Self {
            image,
            run_as: RunAs::Default,
            container: None,
        }
    }

    pub fn container(image: &'a str, run_as: RunAs, container: &'a ContainerHandle) -> Self {
        Self {
            image,
            run_as,
            container: Some(container),
        }
    }
}

/// Runs checks through the container runtime and an HTTP client.
pub struct VerificationEngine {
    runner: Arc<dyn ProcessRunner>,
    runtime: String,
    client: reqwest::Client,
    http_policy: RetryPolicy,
    http_port: u16,
}

impl VerificationEngine {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: &HarnessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            runner,
            runtime: config.container_runtime.clone(),
            client,
            http_policy: config.http,
            http_port: config.app_port,
        })
    }

    /// Runs one check.
    pub async fn run(&self, check: &Check, target: &CheckTarget<'_>) -> Result<CheckOutcome> {
        match check {
            Check::Http(http) => self.check_http(http, target).await,
            Check::Scl(scl) => self.check_scl(scl, target).await,
            Check::PidIdentity => self.check_pid_identity(target).await,
            Check::CommandLocation(location) => self.check_command_location(location, target).await,
            Check::Proxy(proxy) => self.check_proxy(proxy, target).await,
        }
    }

    /// Runs checks in order, stopping after the first failure.
    pub async fn run_all(
        &self,
        checks: &[Check],
        target: &CheckTarget<'_>,
    ) -> Result<Vec<CheckOutcome>> {
        let mut outcomes = Vec::with_capacity(checks.len());
        for check in checks {
            let outcome = self.run(check, target).await?;
            let passed = outcome.passed;
            tracing::debug!(check = %outcome.check, passed, "check finished");
            outcomes.push(outcome);
            if !passed {
                break;
            }
        }
        Ok(outcomes)
    }
}

/// Missing running container, reported as a failed check.
fn no_container(check: &str) -> CheckOutcome {
    CheckOutcome::fail(Diagnostic::new(check, "a running container", "no container"))
}
