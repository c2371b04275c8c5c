//! External script handlers
//!
//! A script is executed with the phase as its only argument. The names of
//! the changed keys are exported space-separated in `CONFREG_CHANGED`, and
//! one `key@%@old@%@new` line per change is written to its stdin. Absent
//! values are written as empty strings.

use crate::error::{Error, Result};
use crate::template::VARIABLE_TOKEN;
use confreg_core::Changes;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

pub const ENV_CHANGED: &str = "CONFREG_CHANGED";

/// Captured output of a successful script run.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// The stdin protocol for `changes`.
pub fn stdin_payload(changes: &Changes) -> String {
    let mut payload = String::new();
    for (key, change) in changes {
        let old = change.old_value().unwrap_or_default();
        let new = change.new_value().unwrap_or_default();
        payload.push_str(&format!("{key}{VARIABLE_TOKEN}{old}{VARIABLE_TOKEN}{new}\n"));
    }
    payload
}

/// Run `path` for `phase`. A missing script or a non-zero exit is a failure.
pub fn run_script(path: &Path, phase: &str, changes: &Changes) -> Result<ScriptOutput> {
    let name = path.display().to_string();
    if !path.is_file() {
        return Err(Error::handler_failed(&name, "script does not exist"));
    }

    let changed = changes.keys().map(String::as_str).collect::<Vec<_>>().join(" ");
    let mut child = Command::new(path)
        .arg(phase)
        .env(ENV_CHANGED, changed)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::handler_failed(&name, format!("failed to start: {e}")))?;

    let payload = stdin_payload(changes);
    let stdin = child.stdin.take();
    let output = thread::scope(|scope| {
        scope.spawn(move || {
            if let Some(mut stdin) = stdin {
                // A script that exits without reading stdin closes the pipe early.
                if let Err(e) = stdin.write_all(payload.as_bytes()) {
                    tracing::debug!(error = %e, "Script did not consume its input");
                }
            }
        });
        child.wait_with_output()
    })
    .map_err(|e| Error::handler_failed(&name, format!("failed to wait: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let snippet = stderr.trim();
        let message = if snippet.is_empty() {
            format!("exited with {}", output.status)
        } else {
            format!("exited with {}: {snippet}", output.status)
        };
        return Err(Error::handler_failed(&name, message));
    }

    tracing::debug!(script = %name, phase, "Script finished");
    Ok(ScriptOutput { stdout, stderr })
}
