//! Error types for the s2i image harness.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for harness operations.
///
/// Verification failures are not errors: checks report them through
/// [`CheckOutcome`](crate::verify::CheckOutcome). This type covers the cases
/// where the harness itself cannot proceed.
#[derive(Error, Debug)]
pub enum Error {
    /// An external program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error during fixture or identifier file handling.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Harness configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The test matrix or a fixture could not be loaded.
    #[error("fixture error at {path}: {reason}")]
    Fixture { path: PathBuf, reason: String },

    /// Container inspection returned something unexpected.
    #[error("inspect failed for {target}: {reason}")]
    Inspect { target: String, reason: String },

    /// An operation needed a running container but the handle has none.
    #[error("no running container for identifier file {0}")]
    NotRunning(PathBuf),

    /// HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A required precondition (such as the image under test) is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
