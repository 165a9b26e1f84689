//! Test orchestration: case table, per-case runner and matrix driver.

pub mod driver;
pub mod fixture;
pub mod repo;
pub mod report;
pub mod runner;

pub use driver::TestMatrixDriver;
pub use fixture::{BuildOptions, CaseKind, FixtureSource, TestCaseSpec, TestMatrix};
pub use repo::FixtureRepo;
pub use report::{Failure, FailureKind, MatrixReport, TestResult, HARNESS_ERROR_EXIT};
pub use runner::{TestCaseRunner, TestScope};
