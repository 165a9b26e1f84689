//! Per-case results and the aggregated run report.

use std::fmt;

use crate::container::RunAs;
use crate::error::Error;
use crate::verify::Diagnostic;

/// Exit code for errors that stop the harness itself.
pub const HARNESS_ERROR_EXIT: i32 = 2;

/// Why a case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The build tool exited non-zero.
    Build { exit_code: i32 },
    /// The container never became ready.
    ReadinessTimeout,
    /// A check compared unequal or never got a usable response.
    Mismatch,
    /// The harness could not run the case (fixture, spawn or I/O error).
    Harness,
}

impl FailureKind {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::Build { exit_code } if *exit_code > 0 => *exit_code,
            FailureKind::Harness => HARNESS_ERROR_EXIT,
            _ => 1,
        }
    }
}

/// A failed case with its report block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub diagnostic: Diagnostic,
}

/// Outcome of one case under one user variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub case: String,
    /// `None` for cases that don't launch a long-running container.
    pub run_as: Option<RunAs>,
    /// Names of the checks that passed.
    pub checks: Vec<String>,
    pub failure: Option<Failure>,
}

impl TestResult {
    pub fn passed(case: impl Into<String>, run_as: Option<RunAs>, checks: Vec<String>) -> Self {
        Self {
            case: case.into(),
            run_as,
            checks,
            failure: None,
        }
    }

    pub fn failed(
        case: impl Into<String>,
        run_as: Option<RunAs>,
        kind: FailureKind,
        diagnostic: Diagnostic,
    ) -> Self {
        Self {
            case: case.into(),
            run_as,
            checks: Vec::new(),
            failure: Some(Failure { kind, diagnostic }),
        }
    }

    /// A case the harness could not carry out.
    pub fn harness_error(case: impl Into<String>, error: &Error) -> Self {
        let case = case.into();
        let diagnostic = Diagnostic::new(&case, "case to run", error.to_string());
        Self::failed(case, None, FailureKind::Harness, diagnostic)
    }

    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }

    fn label(&self) -> String {
        match self.run_as {
            Some(run_as) => format!("{} ({})", self.case, run_as),
            None => self.case.clone(),
        }
    }
}

/// All results of one run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct MatrixReport {
    pub results: Vec<TestResult>,
}

impl MatrixReport {
    /// Records results; returns false once any of them failed.
    pub fn record(&mut self, results: impl IntoIterator<Item = TestResult>) -> bool {
        for result in results {
            if result.is_pass() {
                tracing::info!(case = %result.case, run_as = ?result.run_as, "case passed");
            } else {
                tracing::error!(case = %result.case, run_as = ?result.run_as, "case failed");
            }
            self.results.push(result);
        }
        self.first_failure().is_none()
    }

    pub fn passed(&self) -> bool {
        self.results.iter().all(TestResult::is_pass)
    }

    pub fn first_failure(&self) -> Option<&TestResult> {
        self.results.iter().find(|r| !r.is_pass())
    }

    /// 0 when everything passed, otherwise the first failure's code.
    pub fn exit_code(&self) -> i32 {
        self.first_failure()
            .and_then(|r| r.failure.as_ref())
            .map_or(0, |f| f.kind.exit_code())
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            match &result.failure {
                None => writeln!(f, "[PASSED] {}", result.label())?,
                Some(failure) => {
                    writeln!(f, "[FAILED] {}", result.label())?;
                    writeln!(f, "{}", failure.diagnostic)?;
                }
            }
        }
        let passed = self.results.iter().filter(|r| r.is_pass()).count();
        write!(f, "{} of {} passed", passed, self.results.len())
    }
}
