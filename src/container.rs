//! Launched container instances.
//!
//! A [`ContainerHandle`] owns one uniquely named identifier (cid) file and at
//! most one running container. The runtime writes the cid file
//! asynchronously, so the handle only learns the container id after
//! [`ContainerHandle::await_ready`] has observed the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::poll::RetryPolicy;
use crate::process::{args, ProcessOutput, ProcessRunner, RunOptions};

/// How long `stop` waits for a pending launch before aborting it.
const LAUNCH_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a handle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unstarted,
    Launching,
    Ready,
    Stopped,
}

/// User the container runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunAs {
    /// Whatever user the image declares.
    #[default]
    Default,
    /// A numeric UID absent from the image's user database.
    Uid(u32),
}

impl RunAs {
    /// Returns the `--user` argument, if any.
    pub fn user_arg(&self) -> Option<String> {
        match self {
            RunAs::Default => None,
            RunAs::Uid(uid) => Some(format!("--user={}", uid)),
        }
    }
}

impl std::fmt::Display for RunAs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAs::Default => write!(f, "default user"),
            RunAs::Uid(uid) => write!(f, "uid {}", uid),
        }
    }
}

/// Where a command is executed inside a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// `exec <id> /bin/bash -c`
    NonInteractive,
    /// `exec -i <id> /bin/bash -ic`
    Interactive,
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub image: String,
    pub env: Vec<(String, String)>,
    pub run_as: RunAs,
    /// `(host, container)` port pair.
    pub port_mapping: Option<(u16, u16)>,
    /// Arguments appended after the image name.
    pub extra_args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: Vec::new(),
            run_as: RunAs::Default,
            port_mapping: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_run_as(mut self, run_as: RunAs) -> Self {
        self.run_as = run_as;
        self
    }

    pub fn with_port(mut self, host: u16, container: u16) -> Self {
        self.port_mapping = Some((host, container));
        self
    }

    /// Builds the runtime arguments for a detached run writing `cid_file`.
    pub fn detached_args(&self, cid_file: &Path) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            format!("--cidfile={}", cid_file.display()),
            "-d".to_string(),
        ];
        if let Some(user) = self.run_as.user_arg() {
            args.push(user);
        }
        if let Some((host, container)) = self.port_mapping {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host, container));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// One launched (or launchable) container.
pub struct ContainerHandle {
    runner: Arc<dyn ProcessRunner>,
    runtime: String,
    cid_file: PathBuf,
    container_id: Option<String>,
    state: ContainerState,
    launch: Option<JoinHandle<Result<ProcessOutput>>>,
}

impl ContainerHandle {
    /// Creates an unstarted handle with a fresh identifier file path.
    pub fn new(runner: Arc<dyn ProcessRunner>, runtime: impl Into<String>) -> Self {
        let cid_file =
            std::env::temp_dir().join(format!("s2i-harness-{}.cid", uuid::Uuid::new_v4()));
        Self {
            runner,
            runtime: runtime.into(),
            cid_file,
            container_id: None,
            state: ContainerState::Unstarted,
            launch: None,
        }
    }

    /// Starts `spec` in the background and returns without waiting.
    pub fn launch_detached(
        runner: Arc<dyn ProcessRunner>,
        runtime: impl Into<String>,
        spec: &LaunchSpec,
    ) -> Self {
        let mut handle = Self::new(runner, runtime);
        handle.launch(spec);
        handle
    }

    fn launch(&mut self, spec: &LaunchSpec) {
        let args = spec.detached_args(&self.cid_file);
        let runner = Arc::clone(&self.runner);
        let runtime = self.runtime.clone();

        tracing::info!(
            image = %spec.image,
            run_as = %spec.run_as,
            cid_file = ?self.cid_file,
            "launching container"
        );

        self.launch = Some(tokio::spawn(async move {
            runner.run(&runtime, &args, &RunOptions::default()).await
        }));
        self.state = ContainerState::Launching;
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn cid_file(&self) -> &Path {
        &self.cid_file
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Polls until the identifier file exists and is non-empty.
    ///
    /// Returns false when the policy is exhausted or the handle is not
    /// launching. Never raises.
    pub async fn await_ready(&mut self, policy: RetryPolicy) -> bool {
        match self.state {
            ContainerState::Ready => return true,
            ContainerState::Launching => {}
            _ => return false,
        }

        let cid_file = self.cid_file.clone();
        let id = policy
            .poll_value(|| {
                let path = cid_file.clone();
                async move { read_cid(&path).await }
            })
            .await;

        match id {
            Some(id) => {
                tracing::debug!(container = %id, "container ready");
                self.container_id = Some(id);
                self.state = ContainerState::Ready;
                true
            }
            None => {
                tracing::warn!(
                    cid_file = ?self.cid_file,
                    attempts = policy.max_attempts,
                    "container identifier file never appeared"
                );
                false
            }
        }
    }

    /// Returns why the launch command failed, if it has finished unsuccessfully.
    pub async fn launch_failure(&mut self) -> Option<String> {
        let finished = self.launch.as_ref().is_some_and(|task| task.is_finished());
        if !finished {
            return None;
        }
        let task = self.launch.take()?;
        match task.await {
            Ok(Ok(out)) if out.success() => None,
            Ok(Ok(out)) => Some(format!("exit code {}: {}", out.exit_code, out.stderr.trim())),
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("launch task failed: {}", e)),
        }
    }

    /// Resolves the container's IP address on the runtime network.
    ///
    /// `None` when the container never started or has no address.
    pub async fn ip(&self) -> Result<Option<String>> {
        let Some(id) = &self.container_id else {
            return Ok(None);
        };

        let out = self
            .runner
            .run(
                &self.runtime,
                &["inspect".to_string(), id.clone()],
                &RunOptions::default(),
            )
            .await?;

        if !out.success() {
            tracing::debug!(container = %id, stderr = %out.stderr, "inspect failed");
            return Ok(None);
        }

        parse_ip(id, &out.stdout)
    }

    /// Runs `command` inside the running container.
    pub async fn exec(&self, command: &str, context: ExecContext) -> Result<ProcessOutput> {
        let id = self
            .container_id
            .as_ref()
            .filter(|_| self.state == ContainerState::Ready)
            .ok_or_else(|| Error::NotRunning(self.cid_file.clone()))?;

        let mut args = vec!["exec".to_string()];
        let shell_flag = match context {
            ExecContext::NonInteractive => "-c",
            ExecContext::Interactive => {
                args.push("-i".to_string());
                "-ic"
            }
        };
        args.extend([
            id.clone(),
            "/bin/bash".to_string(),
            shell_flag.to_string(),
            command.to_string(),
        ]);

        self.runner
            .run(&self.runtime, &args, &RunOptions::default())
            .await
    }

    /// Stops and removes the container. Safe to call any number of times.
    pub async fn stop(&mut self) {
        if self.state == ContainerState::Stopped {
            return;
        }

        if let Some(mut task) = self.launch.take() {
            if tokio::time::timeout(LAUNCH_GRACE, &mut task).await.is_err() {
                tracing::warn!(cid_file = ?self.cid_file, "aborting pending launch");
                task.abort();
            }
        }

        // A launch that finished after readiness timed out still leaves an id.
        if self.container_id.is_none() {
            self.container_id = read_cid(&self.cid_file).await;
        }

        if let Some(id) = self.container_id.clone() {
            tracing::debug!(container = %id, "stopping container");
            self.cleanup_step(args(["stop", id.as_str()])).await;
            self.cleanup_step(args(["rm", "-f", id.as_str()])).await;
        }

        remove_cid_file(&self.cid_file);
        self.state = ContainerState::Stopped;
    }

    /// Runs one best-effort cleanup command, logging failures.
    async fn cleanup_step(&self, args: Vec<String>) {
        match self
            .runner
            .run(&self.runtime, &args, &RunOptions::default())
            .await
        {
            Ok(out) if !out.success() => tracing::warn!(
                cmd = ?args,
                stderr = %out.stderr.trim(),
                "container cleanup step failed"
            ),
            Err(e) => tracing::warn!(cmd = ?args, error = %e, "container cleanup step failed"),
            Ok(_) => {}
        }
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if self.state == ContainerState::Stopped {
            return;
        }
        if let Some(task) = self.launch.take() {
            task.abort();
        }

        let id = self.container_id.clone().or_else(|| {
            let content = std::fs::read_to_string(&self.cid_file).ok()?;
            let id = content.trim();
            (!id.is_empty()).then(|| id.to_string())
        });
        if let Some(id) = id {
            tracing::warn!(container = %id, "container handle dropped without stop, removing");
            match std::process::Command::new(&self.runtime)
                .args(["rm", "-f", id.as_str()])
                .stdin(std::process::Stdio::null())
                .output()
            {
                Ok(out) if !out.status.success() => tracing::warn!(
                    container = %id,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "failed to remove container"
                ),
                Err(e) => tracing::warn!(container = %id, error = %e, "failed to remove container"),
                Ok(_) => {}
            }
        }
        remove_cid_file(&self.cid_file);
    }
}

async fn read_cid(path: &Path) -> Option<String> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    let id = content.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn remove_cid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?path, error = %e, "failed to remove identifier file"),
    }
}

/// Extracts `NetworkSettings.IPAddress` from `inspect` JSON output.
pub fn parse_ip(target: &str, inspect_json: &str) -> Result<Option<String>> {
    let value: serde_json::Value =
        serde_json::from_str(inspect_json).map_err(|e| Error::Inspect {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

    let entry = value
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| Error::Inspect {
            target: target.to_string(),
            reason: "empty inspect output".to_string(),
        })?;

    let settings = &entry["NetworkSettings"];
    let direct = settings["IPAddress"].as_str().filter(|ip| !ip.is_empty());

    // User-defined networks leave the top-level address empty.
    let from_networks = || {
        settings["Networks"].as_object().and_then(|networks| {
            networks
                .values()
                .filter_map(|n| n["IPAddress"].as_str())
                .find(|ip| !ip.is_empty())
        })
    };

    Ok(direct.or_else(from_networks).map(str::to_string))
}
