//! Test case definitions and the test matrix.
//!
//! Expected values, filters and comparisons are attached to each case when the
//! matrix is built, so nothing downstream dispatches on case names.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::verify::{Check, CommandLocationCheck, HttpCheck, OutputFilter, OutputRule, ProxyCheck};

/// Where a case's application source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureSource {
    /// Directory under the fixtures dir, turned into a fresh git repository.
    Local(PathBuf),
    /// Remote repository URL, passed to the build tool as-is.
    Remote(String),
}

/// Extra build tool options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default)]
    pub context_dir: Option<String>,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    /// Build-time environment (`-e KEY=VALUE`).
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// What running the built image should show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseKind {
    /// Runs to completion; combined output checked once.
    Cli { rule: OutputRule },
    /// Long-running; checked over HTTP under every user variant.
    Web { checks: Vec<Check> },
}

/// One test application and its expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseSpec {
    pub name: String,
    /// Defaults to a local directory named after the case.
    #[serde(default)]
    pub source: Option<FixtureSource>,
    #[serde(default)]
    pub build: BuildOptions,
    pub kind: CaseKind,
}

impl TestCaseSpec {
    pub fn cli(name: impl Into<String>, rule: OutputRule) -> Self {
        Self {
            name: name.into(),
            source: None,
            build: BuildOptions::default(),
            kind: CaseKind::Cli { rule },
        }
    }

    pub fn web(name: impl Into<String>, checks: Vec<Check>) -> Self {
        Self {
            name: name.into(),
            source: None,
            build: BuildOptions::default(),
            kind: CaseKind::Web { checks },
        }
    }

    pub fn with_build_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build.env.push((key.into(), value.into()));
        self
    }

    pub fn with_remote(
        mut self,
        url: impl Into<String>,
        git_ref: Option<&str>,
        context_dir: Option<&str>,
    ) -> Self {
        self.source = Some(FixtureSource::Remote(url.into()));
        self.build.git_ref = git_ref.map(str::to_string);
        self.build.context_dir = context_dir.map(str::to_string);
        self
    }

    /// Resolves the source against the fixtures directory.
    pub fn resolve_source(&self, fixtures_dir: &Path) -> FixtureSource {
        match &self.source {
            Some(FixtureSource::Local(path)) => FixtureSource::Local(fixtures_dir.join(path)),
            Some(remote @ FixtureSource::Remote(_)) => remote.clone(),
            None => FixtureSource::Local(fixtures_dir.join(&self.name)),
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(self.kind, CaseKind::Web { .. })
    }
}

/// The full set of cases for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMatrix {
    #[serde(default)]
    pub cli: Vec<TestCaseSpec>,
    #[serde(default)]
    pub web: Vec<TestCaseSpec>,
    /// Secondary package tool integration.
    #[serde(default)]
    pub npm: Option<TestCaseSpec>,
    #[serde(default)]
    pub proxy: Vec<ProxyCheck>,
    /// Reference application for the restricted mode.
    #[serde(default)]
    pub reference: Option<TestCaseSpec>,
}

/// Reference application repository and pinned revision.
pub const REFERENCE_APP_REPO: &str = "https://github.com/redhat-developer/s2i-dotnetcore-ex.git";
pub const REFERENCE_APP_REF: &str = "dotnet-8.0";

impl TestMatrix {
    /// The built-in matrix for the .NET builder image.
    pub fn builtin(config: &HarnessConfig) -> Self {
        let final_line =
            |expected: &str| OutputRule::exact(expected).with_filter(OutputFilter::FinalLine);

        let cli = vec![
            TestCaseSpec::cli("helloworld", final_line("Hello World!")),
            TestCaseSpec::cli("helloworld-fsharp", final_line("Hello World from F#!")),
            TestCaseSpec::cli("helloworld-lib", final_line("Hello World from a library!")),
            // The quote itself is random; only the prefix is checked.
            TestCaseSpec::cli(
                "qotd",
                OutputRule::starts_with("The quote of the day is: ")
                    .with_filter(OutputFilter::FinalLine),
            ),
            TestCaseSpec::cli("cli-tool", OutputRule::contains("Usage: cli-tool [options]")),
        ];

        let hello = || Check::Http(HttpCheck::expect("/", OutputRule::exact("Hello world")));
        let web = vec![
            TestCaseSpec::web("asp-net-hello-world", vec![hello()]),
            TestCaseSpec::web("asp-net-hello-world-envvar", vec![hello()])
                .with_build_env("DOTNET_STARTUP_PROJECT", "app/app.csproj"),
            TestCaseSpec::web(
                "aspnet-core-mvc",
                vec![
                    Check::Http(HttpCheck::expect(
                        "/",
                        OutputRule::contains("ASP.NET Core MVC")
                            .with_filter(OutputFilter::StripListItems),
                    )),
                    Check::Http(HttpCheck::status_ok("/favicon.ico")),
                ],
            ),
        ];

        let npm = TestCaseSpec::web(
            "aspnet-core-npm",
            vec![
                Check::Http(HttpCheck::status_ok("/css/site.min.css")),
                Check::Http(HttpCheck::status_ok("/js/site.min.js")),
                Check::CommandLocation(CommandLocationCheck::new(
                    "npm",
                    config.expected_npm_path(),
                )),
            ],
        )
        .with_build_env("DOTNET_NPM_TOOLS", "gulp");

        let proxy = vec![
            ProxyCheck::precedence(
                "http_proxy",
                "http://upper.example:3128",
                "http://lower.example:3128",
            ),
            ProxyCheck::propagation("http_proxy", "http://upper.example:3128"),
            ProxyCheck::precedence(
                "https_proxy",
                "http://upper.example:3129",
                "http://lower.example:3129",
            ),
            ProxyCheck::propagation("https_proxy", "http://upper.example:3129"),
            ProxyCheck::propagation("no_proxy", "localhost,127.0.0.1"),
        ];

        let reference = TestCaseSpec::web(
            "s2i-dotnetcore-ex",
            vec![Check::Http(HttpCheck::expect("/", OutputRule::contains("ASP.NET Core")))],
        )
        .with_remote(REFERENCE_APP_REPO, Some(REFERENCE_APP_REF), Some("app"));

        Self {
            cli,
            web,
            npm: Some(npm),
            proxy,
            reference: Some(reference),
        }
    }

    /// Loads a matrix from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let matrix: Self = serde_yaml::from_str(&content).map_err(|e| Error::Fixture {
            path: path.to_path_buf(),
            reason: format!("failed to parse matrix: {}", e),
        })?;
        matrix.validate().map_err(|reason| Error::Fixture {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(matrix)
    }

    /// Checks that cases sit in the right section and names are unique.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(case) = self.cli.iter().find(|c| c.is_web()) {
            return Err(format!("web case {} listed under cli", case.name));
        }
        let web_sections = self.web.iter().chain(&self.npm).chain(&self.reference);
        if let Some(case) = web_sections.clone().find(|c| !c.is_web()) {
            return Err(format!("cli case {} listed as a web case", case.name));
        }

        let mut names: Vec<&str> = self
            .cli
            .iter()
            .chain(web_sections)
            .map(|c| c.name.as_str())
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(format!("duplicate case name {}", pair[0]));
        }
        Ok(())
    }
}
