//! Sequencing of the whole test matrix against one image.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::process::{args, ProcessRunner, RunOptions};
use crate::verify::{Check, CheckTarget, OutputRule};

use super::fixture::{TestCaseSpec, TestMatrix};
use super::report::{MatrixReport, TestResult};
use super::runner::{collect, TestCaseRunner};

/// Runs every case of a [`TestMatrix`] in order, stopping at the first failure.
pub struct TestMatrixDriver {
    runner: Arc<dyn ProcessRunner>,
    cases: TestCaseRunner,
    matrix: TestMatrix,
}

impl TestMatrixDriver {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        config: HarnessConfig,
        matrix: TestMatrix,
    ) -> Result<Self> {
        let cases = TestCaseRunner::new(Arc::clone(&runner), config)?;
        Ok(Self {
            runner,
            cases,
            matrix,
        })
    }

    /// Creates a driver with the built-in matrix.
    pub fn with_builtin_matrix(
        runner: Arc<dyn ProcessRunner>,
        config: HarnessConfig,
    ) -> Result<Self> {
        let matrix = TestMatrix::builtin(&config);
        Self::new(runner, config, matrix)
    }

    fn config(&self) -> &HarnessConfig {
        self.cases.config()
    }

    /// Runs the matrix.
    ///
    /// Fails only when the image under test is missing. A case the harness
    /// cannot carry out is recorded as a failed result and ends the run,
    /// like any other failure.
    pub async fn run(&self) -> Result<MatrixReport> {
        self.check_image_exists().await?;

        let mut report = MatrixReport::default();

        if self.config().openshift_only {
            tracing::info!("running reference application only");
            if let Some(reference) = &self.matrix.reference {
                self.run_case(&mut report, reference).await;
            } else {
                tracing::warn!("no reference application in matrix");
            }
            return Ok(report);
        }

        let usage = self
            .usage_checks()
            .await
            .unwrap_or_else(|e| TestResult::harness_error("usage", &e));
        if !report.record([usage]) {
            return Ok(report);
        }

        let cases = self
            .matrix
            .cli
            .iter()
            .chain(&self.matrix.web)
            .chain(&self.matrix.npm);
        for case in cases {
            if !self.run_case(&mut report, case).await {
                return Ok(report);
            }
        }

        if !self.matrix.proxy.is_empty() {
            let proxy = self
                .proxy_checks()
                .await
                .unwrap_or_else(|e| TestResult::harness_error("proxy", &e));
            report.record([proxy]);
        }

        Ok(report)
    }

    async fn run_case(&self, report: &mut MatrixReport, case: &TestCaseSpec) -> bool {
        match self.cases.run(case).await {
            Ok(results) => report.record(results),
            Err(e) => {
                tracing::error!(case = %case.name, error = %e, "harness error");
                report.record([TestResult::harness_error(&case.name, &e)])
            }
        }
    }

    /// The image under test must exist locally.
    async fn check_image_exists(&self) -> Result<()> {
        let image = &self.config().image_name;
        let out = self
            .runner
            .run(
                &self.config().container_runtime,
                &args(["inspect", image.as_str()]),
                &RunOptions::default(),
            )
            .await?;

        if out.success() {
            Ok(())
        } else {
            Err(Error::Precondition(format!(
                "image {} not found: {}",
                image,
                out.stderr.trim()
            )))
        }
    }

    /// Usage text via the build tool and via a plain run with no command.
    async fn usage_checks(&self) -> Result<TestResult> {
        let config = self.config();
        let rule = OutputRule::contains(&config.usage_marker);
        let options = RunOptions::default();
        let image = config.image_name.as_str();

        let via_build_tool = self
            .runner
            .run(&config.build_tool, &args(["usage", image]), &options)
            .await?;
        let mut outcomes = vec![rule.evaluate(
            &format!("{} usage", config.build_tool),
            &via_build_tool.combined(),
        )];

        if outcomes[0].passed {
            let via_runtime = self
                .runner
                .run(
                    &config.container_runtime,
                    &args(["run", "--rm", image]),
                    &options,
                )
                .await?;
            outcomes.push(rule.evaluate(
                &format!("{} run", config.container_runtime),
                &via_runtime.combined(),
            ));
        }

        Ok(collect("usage", None, outcomes))
    }

    /// Proxy variable precedence and propagation against the image under test.
    async fn proxy_checks(&self) -> Result<TestResult> {
        let checks: Vec<Check> = self
            .matrix
            .proxy
            .iter()
            .cloned()
            .map(Check::Proxy)
            .collect();
        let target = CheckTarget::image(&self.config().image_name);
        let outcomes = self.cases.engine().run_all(&checks, &target).await?;
        Ok(collect("proxy", None, outcomes))
    }
}
