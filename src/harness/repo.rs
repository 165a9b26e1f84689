//! Fixture source trees as throwaway git repositories.
//!
//! The build tool only accepts repository-shaped input, so each local
//! fixture is initialized and committed before the build and its `.git`
//! directory is removed afterwards.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::process::{args, ProcessRunner, RunOptions};

/// A fixture directory with transient git metadata.
pub struct FixtureRepo {
    path: PathBuf,
    /// Whether this harness created the `.git` directory.
    owns_git_dir: bool,
    cleaned_up: bool,
}

impl FixtureRepo {
    /// Initializes `path` as a repository with a single commit.
    ///
    /// A fixture that is already a repository is used as-is and left alone
    /// on cleanup.
    pub async fn materialize(runner: &dyn ProcessRunner, path: &Path) -> Result<Self> {
        let path = tokio::fs::canonicalize(path).await.map_err(|e| Error::Fixture {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if path.join(".git").exists() {
            tracing::warn!(path = ?path, "fixture is already a git repository, using it as-is");
            return Ok(Self {
                path,
                owns_git_dir: false,
                cleaned_up: false,
            });
        }

        tracing::debug!(path = ?path, "initializing fixture repository");

        // Owned from here on, so a failed commit still gets cleaned up.
        let repo = Self {
            path,
            owns_git_dir: true,
            cleaned_up: false,
        };

        let options = RunOptions::in_dir(&repo.path);
        let steps = [
            args(["init"]),
            args(["add", "-A"]),
            args([
                "-c",
                "user.name=s2i harness",
                "-c",
                "user.email=s2i-harness@localhost",
                "commit",
                "--no-gpg-sign",
                "-m",
                "Sample commit",
            ]),
        ];

        for step in &steps {
            let out = runner.run("git", step, &options).await?;
            if !out.success() {
                return Err(Error::Fixture {
                    path: repo.path.clone(),
                    reason: format!("git {} failed: {}", step.join(" "), out.stderr.trim()),
                });
            }
        }

        Ok(repo)
    }

    /// Source argument for the build tool.
    pub fn source_url(&self) -> String {
        format!("file://{}", self.path.display())
    }

    /// Removes the git metadata this harness created. Idempotent.
    pub async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        if !self.owns_git_dir {
            return;
        }

        let git_dir = self.path.join(".git");
        match tokio::fs::remove_dir_all(&git_dir).await {
            Ok(()) => tracing::debug!(path = ?git_dir, "removed fixture git metadata"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = ?git_dir,
                error = %e,
                "failed to remove fixture git metadata"
            ),
        }
    }
}

impl Drop for FixtureRepo {
    fn drop(&mut self) {
        if !self.cleaned_up && self.owns_git_dir {
            let _ = std::fs::remove_dir_all(self.path.join(".git"));
        }
    }
}
