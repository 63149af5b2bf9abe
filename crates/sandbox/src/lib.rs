//! # Deckhand Sandbox
//!
//! Filesystem sandboxing to a single root directory.
//!
//! Every file-touching tool resolves its path argument through
//! [`Sandbox::validate_path`] before doing any I/O, and shell commands run
//! through [`Sandbox::exec`] with the root (or a validated sub-directory) as
//! their working directory. The sandbox has no read/write API of its own;
//! content policy and command denial live in the tool layer.

use deckhand_core::error::ToolError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Error returned by sandbox operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Cannot access path outside the sandbox: {path}")]
    BoundaryViolation { path: String },

    #[error("Directory does not exist: {path}")]
    DirectoryNotFound { path: String },

    #[error("Path is not a directory: {path}")]
    NotADirectory { path: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    ExecutionTimeout { command: String, timeout: Duration },

    #[error("Failed to start command: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        ToolError::Sandbox(err.to_string())
    }
}

/// Outcome of one shell command. A non-zero exit code is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A directory that bounds every path and command.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`, which must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let canonical = root
            .canonicalize()
            .map_err(|_| SandboxError::DirectoryNotFound { path: display.clone() })?;
        if !canonical.is_dir() {
            return Err(SandboxError::NotADirectory { path: display });
        }
        debug!(root = %canonical.display(), "Sandbox created");
        Ok(Self { root: canonical })
    }

    /// The absolute, canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root and check it stays inside.
    ///
    /// `.`, `..` and symlinks are resolved. Paths that do not exist yet are
    /// resolved up to their deepest existing ancestor, with the remaining
    /// components appended, so a file about to be created is checked against
    /// where it would actually land.
    pub fn validate_path(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let resolved = resolve(&self.root.join(path));
        if !resolved.starts_with(&self.root) {
            warn!(path, resolved = %resolved.display(), "Path traversal blocked");
            return Err(SandboxError::BoundaryViolation { path: path.into() });
        }
        Ok(resolved)
    }

    /// Run `command` with `sh -c`, killing it if it outlives `timeout`.
    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        working_dir: Option<&str>,
    ) -> Result<ExecResult, SandboxError> {
        let cwd = match working_dir {
            Some(dir) => {
                let cwd = self.validate_path(dir)?;
                if !cwd.exists() {
                    return Err(SandboxError::DirectoryNotFound { path: dir.into() });
                }
                if !cwd.is_dir() {
                    return Err(SandboxError::NotADirectory { path: dir.into() });
                }
                cwd
            }
            None => self.root.clone(),
        };

        debug!(command, cwd = %cwd.display(), "Executing command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout takes down background jobs too.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        let pgid = child.id();

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                if let Some(pgid) = pgid {
                    kill_process_group(pgid);
                }
                warn!(command, ?timeout, "Command timed out");
                return Err(SandboxError::ExecutionTimeout {
                    command: command.into(),
                    timeout,
                });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(command, exit_code, "Command finished");
        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        debug!(pgid, error = %e, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Resolve an absolute path one component at a time, following symlinks for
/// every prefix that exists and normalising the rest lexically.
fn resolve(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if let Ok(canonical) = resolved.canonicalize() {
                    resolved = canonical;
                }
            }
        }
    }
    resolved
}
