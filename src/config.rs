//! Harness configuration.
//!
//! Defaults, then an optional TOML file named by `S2I_HARNESS_CONFIG`, then
//! environment variables. Later sources win.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::poll::RetryPolicy;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_FILE_ENV: &str = "S2I_HARNESS_CONFIG";

/// Default port web fixtures listen on.
pub const CONTAINER_PORT: u16 = 8080;

/// Configuration for one harness run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Image under test (`IMAGE_NAME`).
    pub image_name: String,

    /// Host port mapped to the application port (`TEST_PORT`).
    pub test_port: u16,

    /// Port the application listens on inside the container.
    pub app_port: u16,

    /// Run only the reference application scenario (`OPENSHIFT_ONLY`).
    pub openshift_only: bool,

    /// Trace-level logging (`DEBUG`).
    pub debug: bool,

    /// Image is built on the alternate base variant (`ALT_BASE`).
    pub alt_base: bool,

    /// Runtime version series reported by `dotnet --version` (`DOTNET_VERSION`).
    pub dotnet_version: String,

    /// Numeric user for the arbitrary-UID run (`TEST_UID`).
    pub arbitrary_uid: u32,

    /// Directory holding the test applications (`FIXTURES_DIR`).
    pub fixtures_dir: PathBuf,

    /// Image build tool binary.
    pub build_tool: String,

    /// Container runtime binary.
    pub container_runtime: String,

    /// Substring the image's usage text must contain.
    pub usage_marker: String,

    /// Policy for waiting on container identifier files.
    pub readiness: RetryPolicy,

    /// Policy for waiting on HTTP 200.
    pub http: RetryPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image_name: String::new(),
            test_port: CONTAINER_PORT,
            app_port: CONTAINER_PORT,
            openshift_only: false,
            debug: false,
            alt_base: false,
            dotnet_version: "8.0".to_string(),
            arbitrary_uid: 12345,
            fixtures_dir: PathBuf::from("test"),
            build_tool: "s2i".to_string(),
            container_runtime: "docker".to_string(),
            usage_marker: "s2i build".to_string(),
            readiness: RetryPolicy::READINESS,
            http: RetryPolicy::HTTP,
        }
    }
}

impl HarnessConfig {
    /// Creates a configuration for the given image with defaults elsewhere.
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            ..Default::default()
        }
    }

    /// Loads configuration from the optional config file and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Overrides fields from environment lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("IMAGE_NAME") {
            self.image_name = image;
        }
        if let Some(port) = lookup("TEST_PORT") {
            self.test_port = port
                .parse()
                .map_err(|_| Error::Config(format!("TEST_PORT is not a port: {}", port)))?;
        }
        if let Some(uid) = lookup("TEST_UID") {
            self.arbitrary_uid = uid
                .parse()
                .map_err(|_| Error::Config(format!("TEST_UID is not numeric: {}", uid)))?;
        }
        if let Some(version) = lookup("DOTNET_VERSION") {
            self.dotnet_version = version;
        }
        if let Some(dir) = lookup("FIXTURES_DIR") {
            self.fixtures_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup("OPENSHIFT_ONLY") {
            self.openshift_only = is_truthy(&v);
        }
        if let Some(v) = lookup("DEBUG") {
            self.debug = is_truthy(&v);
        }
        if let Some(v) = lookup("ALT_BASE") {
            self.alt_base = is_truthy(&v);
        }
        Ok(())
    }

    /// Checks that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.image_name.trim().is_empty() {
            return Err(Error::Config("IMAGE_NAME must be set".to_string()));
        }
        if self.test_port == 0 {
            return Err(Error::Config("TEST_PORT must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Name of the per-case derived image.
    pub fn test_image(&self) -> String {
        format!("{}-testapp", self.image_name)
    }

    /// Where `npm` is expected to be installed inside the image.
    pub fn expected_npm_path(&self) -> &'static str {
        if self.alt_base {
            "/opt/app-root/node/bin/npm"
        } else {
            "/usr/bin/npm"
        }
    }

    /// Sets the host port.
    pub fn with_test_port(mut self, port: u16) -> Self {
        self.test_port = port;
        self
    }

    /// Sets the port the application listens on.
    pub fn with_app_port(mut self, port: u16) -> Self {
        self.app_port = port;
        self
    }

    /// Sets the fixtures directory.
    pub fn with_fixtures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = dir.into();
        self
    }

    /// Sets both wait policies.
    pub fn with_policies(mut self, readiness: RetryPolicy, http: RetryPolicy) -> Self {
        self.readiness = readiness;
        self.http = http;
        self
    }

    /// Restricts the run to the reference application.
    pub fn with_openshift_only(mut self, only: bool) -> Self {
        self.openshift_only = only;
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
