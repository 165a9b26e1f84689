//! s2i image harness - integration tests for source-to-image builder images
//!
//! Builds test applications into images with the build tool, launches them
//! with the container runtime, waits for readiness and verifies HTTP
//! responses, process identity, CLI output and environment propagation.
//! Every created container, image and fixture repository is cleaned up
//! whatever the outcome.

pub mod config;
pub mod container;
pub mod error;
pub mod harness;
pub mod poll;
pub mod process;
pub mod verify;

pub use config::HarnessConfig;
pub use container::{ContainerHandle, ContainerState, ExecContext, LaunchSpec, RunAs};
pub use error::{Error, Result};
pub use poll::RetryPolicy;
pub use process::{ProcessOutput, ProcessRunner, RunOptions, TokioProcessRunner};
pub use verify::{
    Check, CheckOutcome, CheckTarget, Comparison, Diagnostic, OutputFilter, OutputRule,
    VerificationEngine,
};

pub use harness::{
    MatrixReport, TestCaseRunner, TestCaseSpec, TestMatrix, TestMatrixDriver, TestResult,
};
