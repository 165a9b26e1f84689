//! Runs one test case end-to-end.
//!
//! fixture → build → run or launch → verify, followed by cleanup on every
//! exit path. All state for the case lives in a [`TestScope`].

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::container::{ContainerHandle, LaunchSpec, RunAs};
use crate::error::Result;
use crate::process::{args, ProcessRunner, RunOptions};
use crate::verify::{
    Check, CheckOutcome, CheckTarget, Diagnostic, OutputRule, SclCheck, VerificationEngine,
};

use super::fixture::{CaseKind, FixtureSource, TestCaseSpec};
use super::repo::FixtureRepo;
use super::report::{FailureKind, TestResult};

/// Execution context of one case: its images, fixture and container.
pub struct TestScope<'a> {
    pub case: &'a TestCaseSpec,
    pub image: String,
    pub test_image: String,
    fixture: Option<FixtureRepo>,
    container: Option<ContainerHandle>,
    build_attempted: bool,
    cleaned_up: bool,
}

impl<'a> TestScope<'a> {
    pub fn new(case: &'a TestCaseSpec, config: &HarnessConfig) -> Self {
        Self {
            case,
            image: config.image_name.clone(),
            test_image: config.test_image(),
            fixture: None,
            container: None,
            build_attempted: false,
            cleaned_up: false,
        }
    }

    /// Container of the variant currently running, if any.
    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Stops the container, removes the derived image and the fixture's git
    /// metadata. Best-effort and idempotent.
    pub async fn cleanup(&mut self, runner: &dyn ProcessRunner, runtime: &str) {
        if self.cleaned_up {
            return;
        }
        tracing::debug!(case = %self.case.name, "cleaning up");

        if let Some(mut container) = self.container.take() {
            container.stop().await;
        }

        if self.build_attempted {
            remove_image(runner, runtime, &self.test_image).await;
        }

        if let Some(mut fixture) = self.fixture.take() {
            fixture.cleanup().await;
        }

        self.cleaned_up = true;
    }
}

async fn remove_image(runner: &dyn ProcessRunner, runtime: &str, image: &str) {
    let options = RunOptions::default();
    match runner
        .run(runtime, &args(["image", "inspect", image]), &options)
        .await
    {
        Ok(out) if out.success() => {}
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(image = %image, error = %e, "failed to inspect test image");
            return;
        }
    }

    match runner.run(runtime, &args(["rmi", "-f", image]), &options).await {
        Ok(out) if out.success() => tracing::debug!(image = %image, "removed test image"),
        Ok(out) => tracing::warn!(
            image = %image,
            stderr = %out.stderr.trim(),
            "failed to remove test image"
        ),
        Err(e) => tracing::warn!(image = %image, error = %e, "failed to remove test image"),
    }
}

/// Drives single cases through build, run and verification.
pub struct TestCaseRunner {
    runner: Arc<dyn ProcessRunner>,
    engine: VerificationEngine,
    config: HarnessConfig,
}

impl TestCaseRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: HarnessConfig) -> Result<Self> {
        let engine = VerificationEngine::new(Arc::clone(&runner), &config)?;
        Ok(Self {
            runner,
            engine,
            config,
        })
    }

    pub fn engine(&self) -> &VerificationEngine {
        &self.engine
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Every web case runs once per variant.
    pub fn user_variants(&self) -> [RunAs; 2] {
        [RunAs::Default, RunAs::Uid(self.config.arbitrary_uid)]
    }

    /// Runs `case` and always cleans up afterwards.
    ///
    /// Web cases yield one result per user variant, stopping at the first
    /// failing variant.
    pub async fn run(&self, case: &TestCaseSpec) -> Result<Vec<TestResult>> {
        tracing::info!(case = %case.name, "running test case");

        let mut scope = TestScope::new(case, &self.config);
        let outcome = self.execute(&mut scope).await;
        scope
            .cleanup(self.runner.as_ref(), &self.config.container_runtime)
            .await;
        outcome
    }

    async fn execute(&self, scope: &mut TestScope<'_>) -> Result<Vec<TestResult>> {
        let case = scope.case;

        let source = match case.resolve_source(&self.config.fixtures_dir) {
            FixtureSource::Local(path) => {
                let repo = FixtureRepo::materialize(self.runner.as_ref(), &path).await?;
                let url = repo.source_url();
                scope.fixture = Some(repo);
                url
            }
            FixtureSource::Remote(url) => url,
        };

        if let Some(failure) = self.build(scope, &source).await? {
            return Ok(vec![failure]);
        }

        match &case.kind {
            CaseKind::Cli { rule } => Ok(vec![self.run_cli(scope, rule).await?]),
            CaseKind::Web { checks } => {
                let mut results = Vec::new();
                for run_as in self.user_variants() {
                    let result = self.run_web(scope, checks, run_as).await?;
                    let failed = !result.is_pass();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                Ok(results)
            }
        }
    }

    /// Builds the derived image. Returns a failed result if the build fails.
    async fn build(
        &self,
        scope: &mut TestScope<'_>,
        source: &str,
    ) -> Result<Option<TestResult>> {
        let case = scope.case;
        let build = &case.build;
        let mut build_args = args([
            "build",
            source,
            scope.image.as_str(),
            scope.test_image.as_str(),
            "--pull-policy=never",
        ]);
        if let Some(dir) = &build.context_dir {
            build_args.push(format!("--context-dir={}", dir));
        }
        if let Some(git_ref) = &build.git_ref {
            build_args.push(format!("--ref={}", git_ref));
        }
        for (key, value) in &build.env {
            build_args.push("-e".to_string());
            build_args.push(format!("{}={}", key, value));
        }

        tracing::info!(
            case = %case.name,
            source = %source,
            image = %scope.test_image,
            "building test image"
        );
        scope.build_attempted = true;

        let out = self
            .runner
            .run(&self.config.build_tool, &build_args, &RunOptions::default())
            .await?;

        if out.success() {
            return Ok(None);
        }

        let diagnostic = Diagnostic::new("build", "build to succeed", out.combined().trim())
            .with_context(format!(
                "command: {} {}",
                self.config.build_tool,
                build_args.join(" ")
            ))
            .with_context(format!("exit code: {}", out.exit_code));
        Ok(Some(TestResult::failed(
            &case.name,
            None,
            FailureKind::Build {
                exit_code: out.exit_code,
            },
            diagnostic,
        )))
    }

    async fn run_cli(&self, scope: &TestScope<'_>, rule: &OutputRule) -> Result<TestResult> {
        let out = self
            .runner
            .run(
                &self.config.container_runtime,
                &args(["run", "--rm", scope.test_image.as_str()]),
                &RunOptions::default(),
            )
            .await?;

        let check = format!("cli {}", scope.case.name);
        let outcome = rule.evaluate(&check, &out.combined());
        Ok(match outcome.diagnostic {
            None => TestResult::passed(&scope.case.name, None, vec![outcome.check]),
            Some(diagnostic) => TestResult::failed(
                &scope.case.name,
                None,
                FailureKind::Mismatch,
                diagnostic.with_context(format!("exit code: {}", out.exit_code)),
            ),
        })
    }

    /// Launches the derived image as `run_as`, verifies it, then stops it.
    async fn run_web(
        &self,
        scope: &mut TestScope<'_>,
        checks: &[Check],
        run_as: RunAs,
    ) -> Result<TestResult> {
        let spec = LaunchSpec::new(&scope.test_image)
            .with_run_as(run_as)
            .with_port(self.config.test_port, self.config.app_port);

        let container = scope.container.insert(ContainerHandle::launch_detached(
            Arc::clone(&self.runner),
            &self.config.container_runtime,
            &spec,
        ));

        if !container.await_ready(self.config.readiness).await {
            let command = spec.detached_args(container.cid_file()).join(" ");
            let mut diagnostic = Diagnostic::new(
                "container readiness",
                "identifier file written",
                "no identifier file",
            )
            .with_context(format!(
                "command: {} {}",
                self.config.container_runtime, command
            ))
            .with_context(format!("cid file: {}", container.cid_file().display()))
            .with_context(format!(
                "attempts: {}",
                self.config.readiness.max_attempts
            ));
            if let Some(reason) = container.launch_failure().await {
                diagnostic = diagnostic.with_context(format!("launch: {}", reason));
            }
            return Ok(TestResult::failed(
                &scope.case.name,
                Some(run_as),
                FailureKind::ReadinessTimeout,
                diagnostic,
            ));
        }

        let mut all_checks = checks.to_vec();
        all_checks.push(Check::Scl(SclCheck::new(
            "dotnet --version",
            &self.config.dotnet_version,
        )));
        all_checks.push(Check::PidIdentity);

        let target = CheckTarget::container(&scope.test_image, run_as, &*container);
        let outcomes = self.engine.run_all(&all_checks, &target).await?;

        if let Some(mut container) = scope.container.take() {
            container.stop().await;
        }

        Ok(collect(&scope.case.name, Some(run_as), outcomes))
    }
}

/// Folds check outcomes into one result; the last outcome decides.
pub(super) fn collect(
    case: &str,
    run_as: Option<RunAs>,
    mut outcomes: Vec<CheckOutcome>,
) -> TestResult {
    match outcomes.last_mut().and_then(|o| o.diagnostic.take()) {
        Some(diagnostic) => TestResult::failed(case, run_as, FailureKind::Mismatch, diagnostic),
        None => {
            let checks = outcomes.into_iter().map(|o| o.check).collect();
            TestResult::passed(case, run_as, checks)
        }
    }
}
