//! PID 1 identity: the managed runtime, not a supervisor, owns PID 1.

use std::path::Path;

use crate::container::ExecContext;
use crate::error::Result;

use super::{no_container, CheckOutcome, CheckTarget, Diagnostic, VerificationEngine};

const RUNTIME_EXECUTABLE: &str = "dotnet";
const ASSEMBLY_EXTENSION: &str = ".dll";

/// True if `cmdline` runs the `dotnet` executable with a managed assembly.
///
/// Accepts the raw NUL-separated `/proc/1/cmdline` or a space-separated form.
pub fn pid1_is_managed_runtime(cmdline: &str) -> bool {
    let mut argv = cmdline
        .split(|c: char| c == '\0' || c.is_whitespace())
        .filter(|arg| !arg.is_empty());

    let Some(program) = argv.next() else {
        return false;
    };
    let names_runtime = Path::new(program)
        .file_name()
        .is_some_and(|name| name == RUNTIME_EXECUTABLE);

    names_runtime && argv.any(|arg| arg.ends_with(ASSEMBLY_EXTENSION))
}

impl VerificationEngine {
    pub(super) async fn check_pid_identity(
        &self,
        target: &CheckTarget<'_>,
    ) -> Result<CheckOutcome> {
        let name = "pid 1 identity";
        let Some(container) = target.container else {
            return Ok(no_container(name));
        };

        let out = container
            .exec("cat /proc/1/cmdline", ExecContext::NonInteractive)
            .await?;
        let cmdline = out.stdout.replace('\0', " ").trim().to_string();

        if pid1_is_managed_runtime(&cmdline) {
            Ok(CheckOutcome::pass(name))
        } else {
            Ok(CheckOutcome::fail(Diagnostic::new(
                name,
                format!("{} <assembly>{}", RUNTIME_EXECUTABLE, ASSEMBLY_EXTENSION),
                cmdline,
            )))
        }
    }
}
