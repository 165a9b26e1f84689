//! End-to-end orchestration tests: test cases and the matrix driver run
//! against a scripted toolchain, so no container runtime is needed.

mod common;

use std::sync::Arc;

use common::{make_fixtures, serve, test_config, FakeToolchain, CONTAINER_ID};
use s2i_harness::harness::{CaseKind, FailureKind, TestScope, HARNESS_ERROR_EXIT};
use s2i_harness::verify::{CommandLocationCheck, HttpCheck, ProxyCheck};
use s2i_harness::{
    Check, Error, HarnessConfig, OutputFilter, OutputRule, ProcessRunner, RunAs, TestCaseRunner,
    TestCaseSpec, TestMatrix, TestMatrixDriver,
};
use tempfile::TempDir;

fn runner(fake: &Arc<FakeToolchain>) -> Arc<dyn ProcessRunner> {
    Arc::clone(fake) as Arc<dyn ProcessRunner>
}

fn helloworld() -> TestCaseSpec {
    TestCaseSpec::cli(
        "helloworld",
        OutputRule::exact("Hello World!").with_filter(OutputFilter::FinalLine),
    )
}

fn hello_web() -> TestCaseSpec {
    TestCaseSpec::web(
        "asp-net-hello-world",
        vec![Check::Http(HttpCheck::expect(
            "/",
            OutputRule::exact("Hello world"),
        ))],
    )
}

fn npm_web() -> TestCaseSpec {
    TestCaseSpec::web(
        "aspnet-core-npm",
        vec![
            Check::Http(HttpCheck::status_ok("/css/site.min.css")),
            Check::Http(HttpCheck::status_ok("/js/site.min.js")),
            Check::CommandLocation(CommandLocationCheck::new("npm", "/usr/bin/npm")),
        ],
    )
    .with_build_env("DOTNET_NPM_TOOLS", "gulp")
}

fn small_matrix() -> TestMatrix {
    TestMatrix {
        cli: vec![helloworld()],
        web: vec![hello_web()],
        npm: None,
        proxy: vec![
            ProxyCheck::precedence("http_proxy", "http://upper:3128", "http://lower:3128"),
            ProxyCheck::propagation("http_proxy", "http://upper:3128"),
        ],
        reference: None,
    }
}

fn case_names(report: &s2i_harness::MatrixReport) -> Vec<&str> {
    report.results.iter().map(|r| r.case.as_str()).collect()
}

#[tokio::test]
async fn helloworld_cli_passes_after_discarding_preamble() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld"]);
    let fake = Arc::new(FakeToolchain::default());
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), 8080)).unwrap();

    let results = cases.run(&helloworld()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].is_pass(), "{:?}", results[0].failure);

    let calls = fake.calls();
    let build = calls.iter().find(|c| c.starts_with("s2i build")).unwrap();
    assert!(build.starts_with("s2i build file:///"));
    assert!(build.ends_with("helloworld dotnet-test dotnet-test-testapp --pull-policy=never"));
    assert!(calls.contains(&"docker run --rm dotnet-test-testapp".to_string()));
    assert!(calls.contains(&"docker rmi -f dotnet-test-testapp".to_string()));
    assert!(!fixtures.path().join("helloworld/.git").exists());
}

#[tokio::test]
async fn cli_mismatch_reports_expected_and_actual() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld"]);
    let fake = Arc::new(FakeToolchain {
        cli_output: "---> Running application\nGoodbye!\n".to_string(),
        ..Default::default()
    });
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), 8080)).unwrap();

    let results = cases.run(&helloworld()).await.unwrap();

    let failure = results[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Mismatch);
    assert_eq!(failure.diagnostic.expected, "Hello World!");
    assert_eq!(failure.diagnostic.actual, "Goodbye!");
    assert_eq!(fake.count("docker rmi -f"), 1);
}

#[tokio::test]
async fn build_failure_aborts_case_and_still_cleans_up() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["asp-net-hello-world"]);
    let fake = Arc::new(FakeToolchain {
        build_exit: 4,
        ..Default::default()
    });
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), 8080)).unwrap();

    let results = cases.run(&hello_web()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].failure.as_ref().unwrap().kind,
        FailureKind::Build { exit_code: 4 }
    );
    assert_eq!(fake.count("docker run"), 0);
    assert_eq!(fake.count("docker rmi -f dotnet-test-testapp"), 1);
    assert!(!fixtures.path().join("asp-net-hello-world/.git").exists());
}

#[tokio::test]
async fn web_case_passes_under_both_user_variants() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["asp-net-hello-world"]);
    let port = serve(vec![("/", 200, b"Hello world".to_vec())]).await;
    let fake = Arc::new(FakeToolchain::default());
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), port)).unwrap();

    let results = cases.run(&hello_web()).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.is_pass()), "{:?}", results);
    assert_eq!(results[0].run_as, Some(RunAs::Default));
    assert_eq!(results[1].run_as, Some(RunAs::Uid(12345)));
    assert_eq!(results[0].checks, results[1].checks);
    assert_eq!(
        results[0].checks,
        vec!["http /", "scl `dotnet --version`", "pid 1 identity"]
    );

    assert_eq!(fake.count("docker run --cidfile="), 2);
    let uid_runs = fake
        .calls()
        .iter()
        .filter(|c| c.contains("--user=12345"))
        .count();
    assert_eq!(uid_runs, 2);
    assert_eq!(fake.count(&format!("docker stop {}", CONTAINER_ID)), 2);
    assert_eq!(fake.count("docker rmi -f"), 1);
}

#[tokio::test]
async fn readiness_timeout_is_a_case_failure() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["asp-net-hello-world"]);
    let fake = Arc::new(FakeToolchain {
        write_cid: false,
        ..Default::default()
    });
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), 8080)).unwrap();

    let results = cases.run(&hello_web()).await.unwrap();

    assert_eq!(results.len(), 1);
    let failure = results[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::ReadinessTimeout);
    let context = &failure.diagnostic.context;
    assert!(context.iter().any(|l| l.starts_with("cid file: ")));
    assert!(context.contains(&"attempts: 5".to_string()));
    let command = context
        .iter()
        .find(|l| l.starts_with("command: docker run --cidfile="))
        .unwrap();
    assert!(command.ends_with("-d -p 8080:8080 dotnet-test-testapp"));
    assert_eq!(fake.count("docker stop"), 0);
    assert_eq!(fake.count("docker rmi -f"), 1);
}

#[tokio::test]
async fn failing_default_user_skips_arbitrary_uid_run() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["asp-net-hello-world"]);
    let port = serve(vec![("/", 200, b"Hello world".to_vec())]).await;
    let fake = Arc::new(FakeToolchain {
        pid1: "/usr/bin/tini\0--\0dotnet\0app.dll\0".to_string(),
        ..Default::default()
    });
    let cases = TestCaseRunner::new(runner(&fake), test_config(fixtures.path(), port)).unwrap();

    let results = cases.run(&hello_web()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].failure.as_ref().unwrap().diagnostic.check,
        "pid 1 identity"
    );
    assert_eq!(fake.count("docker run --cidfile="), 1);
    assert_eq!(fake.count(&format!("docker stop {}", CONTAINER_ID)), 1);
}

#[tokio::test]
async fn scope_cleanup_is_idempotent() {
    let fixtures = TempDir::new().unwrap();
    let fake = Arc::new(FakeToolchain::default());
    let config = test_config(fixtures.path(), 8080);
    let case = helloworld();

    let mut scope = TestScope::new(&case, &config);
    scope.cleanup(fake.as_ref(), "docker").await;
    scope.cleanup(fake.as_ref(), "docker").await;

    assert!(scope.is_cleaned_up());
    assert!(scope.container().is_none());
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn driver_runs_usage_cases_and_proxy_in_order() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld", "asp-net-hello-world"]);
    let port = serve(vec![("/", 200, b"Hello world".to_vec())]).await;
    let fake = Arc::new(FakeToolchain::default());
    let config = test_config(fixtures.path(), port);
    let driver = TestMatrixDriver::new(runner(&fake), config, small_matrix()).unwrap();

    let report = driver.run().await.unwrap();

    assert!(report.passed(), "{}", report);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        case_names(&report),
        vec![
            "usage",
            "helloworld",
            "asp-net-hello-world",
            "asp-net-hello-world",
            "proxy"
        ]
    );

    let calls = fake.calls();
    let position = |prefix: &str| calls.iter().position(|c| c.starts_with(prefix)).unwrap();
    assert_eq!(position("docker inspect dotnet-test"), 0);
    assert!(position("s2i usage dotnet-test") < position("s2i build"));
}

#[tokio::test]
async fn driver_runs_npm_case_between_web_and_proxy() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(
        fixtures.path(),
        &["helloworld", "asp-net-hello-world", "aspnet-core-npm"],
    );
    let port = serve(vec![
        ("/", 200, b"Hello world".to_vec()),
        ("/css/site.min.css", 200, b"body{margin:0}".to_vec()),
        ("/js/site.min.js", 200, b"console.log(1)".to_vec()),
    ])
    .await;
    let fake = Arc::new(FakeToolchain::default());
    let matrix = TestMatrix {
        npm: Some(npm_web()),
        ..small_matrix()
    };
    let driver =
        TestMatrixDriver::new(runner(&fake), test_config(fixtures.path(), port), matrix).unwrap();

    let report = driver.run().await.unwrap();

    assert!(report.passed(), "{}", report);
    assert_eq!(
        case_names(&report),
        vec![
            "usage",
            "helloworld",
            "asp-net-hello-world",
            "asp-net-hello-world",
            "aspnet-core-npm",
            "aspnet-core-npm",
            "proxy"
        ]
    );
    let npm = report
        .results
        .iter()
        .find(|r| r.case == "aspnet-core-npm")
        .unwrap();
    assert!(npm.checks.contains(&"http /css/site.min.css".to_string()));
    assert!(npm.checks.contains(&"http /js/site.min.js".to_string()));
    assert!(npm.checks.iter().any(|c| c.contains("npm")));

    let calls = fake.calls();
    let npm_build = calls
        .iter()
        .position(|c| c.starts_with("s2i build") && c.contains("aspnet-core-npm"))
        .unwrap();
    let web_build = calls
        .iter()
        .position(|c| c.starts_with("s2i build") && c.contains("asp-net-hello-world"))
        .unwrap();
    let proxy_echo = calls
        .iter()
        .position(|c| c.contains("echo $http_proxy"))
        .unwrap();
    assert!(web_build < npm_build);
    assert!(npm_build < proxy_echo);
    assert!(calls[npm_build].contains("-e DOTNET_NPM_TOOLS=gulp"));
    assert!(calls.iter().any(|c| c.ends_with("-c command -v npm")));
}

#[tokio::test]
async fn failing_usage_check_stops_before_any_build() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld", "asp-net-hello-world"]);
    let fake = Arc::new(FakeToolchain {
        usage_text: "exec: \"usage\": executable file not found".to_string(),
        ..Default::default()
    });
    let config = test_config(fixtures.path(), 8080);
    let driver = TestMatrixDriver::new(runner(&fake), config, small_matrix()).unwrap();

    let report = driver.run().await.unwrap();

    assert_eq!(case_names(&report), vec!["usage"]);
    assert_eq!(report.exit_code(), 1);
    let failure = report.results[0].failure.as_ref().unwrap();
    assert_eq!(failure.diagnostic.expected, "(contains) s2i build");
    assert_eq!(fake.count("s2i build"), 0);
    assert_eq!(fake.count("git"), 0);
    assert_eq!(fake.count("docker run"), 0);
}

#[tokio::test]
async fn driver_stops_at_first_failure() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld", "asp-net-hello-world"]);
    let fake = Arc::new(FakeToolchain {
        cli_output: "Unhandled exception.\n".to_string(),
        ..Default::default()
    });
    let config = test_config(fixtures.path(), 8080);
    let driver = TestMatrixDriver::new(runner(&fake), config, small_matrix()).unwrap();

    let report = driver.run().await.unwrap();

    assert!(!report.passed());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.first_failure().unwrap().case, "helloworld");
    assert_eq!(fake.count("s2i build"), 1);
    assert_eq!(fake.count("docker run --cidfile="), 0);
    assert!(report.to_string().contains("Unhandled exception."));
}

#[tokio::test]
async fn unpreparable_case_keeps_earlier_results() {
    let fixtures = TempDir::new().unwrap();
    make_fixtures(fixtures.path(), &["helloworld"]);
    let fake = Arc::new(FakeToolchain::default());
    let config = test_config(fixtures.path(), 8080);
    let driver = TestMatrixDriver::new(runner(&fake), config, small_matrix()).unwrap();

    let report = driver.run().await.unwrap();

    assert_eq!(
        case_names(&report),
        vec!["usage", "helloworld", "asp-net-hello-world"]
    );
    assert!(report.results[1].is_pass());
    let failure = report.first_failure().unwrap().failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Harness);
    assert!(failure.diagnostic.actual.contains("asp-net-hello-world"));
    assert_eq!(report.exit_code(), HARNESS_ERROR_EXIT);
    assert!(report.to_string().contains("[PASSED] helloworld"));
    assert_eq!(fake.count("s2i build"), 1);
    assert_eq!(fake.count("docker run --rm -e"), 0);
}

#[tokio::test]
async fn missing_image_is_a_precondition_error() {
    let fixtures = TempDir::new().unwrap();
    let fake = Arc::new(FakeToolchain {
        image_present: false,
        ..Default::default()
    });
    let config = test_config(fixtures.path(), 8080);
    let driver = TestMatrixDriver::new(runner(&fake), config, small_matrix()).unwrap();

    let err = driver.run().await.unwrap_err();

    assert!(matches!(err, Error::Precondition(_)));
    assert_eq!(fake.calls().len(), 1);
}

#[tokio::test]
async fn openshift_only_builds_pinned_reference_app() {
    let fixtures = TempDir::new().unwrap();
    let page = b"<h1>Welcome</h1><p>Built with ASP.NET Core</p>".to_vec();
    let port = serve(vec![("/", 200, page)]).await;
    let fake = Arc::new(FakeToolchain::default());
    let config = test_config(fixtures.path(), port).with_openshift_only(true);
    let driver = TestMatrixDriver::with_builtin_matrix(runner(&fake), config).unwrap();

    let report = driver.run().await.unwrap();

    assert!(report.passed(), "{}", report);
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.case == "s2i-dotnetcore-ex"));

    let calls = fake.calls();
    let build = calls.iter().find(|c| c.starts_with("s2i build")).unwrap();
    let reference = "https://github.com/redhat-developer/s2i-dotnetcore-ex.git";
    assert!(build.starts_with(&format!("s2i build {} ", reference)));
    assert!(build.contains("--context-dir=app"));
    assert!(build.contains("--ref=dotnet-8.0"));
    assert_eq!(fake.count("git"), 0);
    assert_eq!(fake.count("s2i usage"), 0);
}

#[test]
fn builtin_matrix_quote_of_the_day_is_prefix_only() {
    let matrix = TestMatrix::builtin(&HarnessConfig::new("img"));
    let qotd = matrix.cli.iter().find(|c| c.name == "qotd").unwrap();
    let CaseKind::Cli { rule } = &qotd.kind else {
        panic!("qotd is a CLI case");
    };
    assert!(
        rule.evaluate("qotd", "---> Running\nThe quote of the day is: anything at all")
            .passed
    );
}
