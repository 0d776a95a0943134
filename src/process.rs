//! Subprocess execution with captured stdio and timeout escalation.
//!
//! All external tools (git, docker, shell actions, the Claude Code
//! executable) run through [`run_command`]. On timeout the child gets a
//! terminate signal, five seconds to exit, then a kill.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::{Error, Result};

const TERMINATE_GRACE_SECS: u64 = 5;

#[derive(Debug)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stderr if present, else stdout; used for error messages.
    pub fn failure_output(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Run a command to completion, capturing stdout and stderr.
///
/// `stdin` content, when given, is written to the child and the handle
/// closed before waiting. Missing executables surface as a descriptive
/// error rather than a raw `NotFound`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdin: Option<&str>,
    timeout_secs: u64,
) -> Result<CommandOutput> {
    log::debug!("Running command: {program} {}", args.join(" "));

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let mut child = command.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::config(format!("command not found: {program}"))
        } else {
            Error::Io(err)
        }
    })?;

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(input.as_bytes()).await?;
            handle.shutdown().await?;
        }
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let reader = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        (stdout, stderr)
    });

    let status = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            log::warn!(
                "Command timed out after {timeout_secs} seconds: {program} {}",
                args.join(" ")
            );
            terminate(&child);
            match tokio::time::timeout(
                Duration::from_secs(TERMINATE_GRACE_SECS),
                child.wait(),
            )
            .await
            {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    child.kill().await?;
                }
            }
            reader.abort();
            return Err(Error::Timeout(timeout_secs));
        }
    };

    let (stdout, stderr) = reader
        .await
        .map_err(|err| Error::config(format!("output capture failed: {err}")))?;
    let output = CommandOutput {
        code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    if !output.stdout.is_empty() {
        log::debug!("STDOUT: {}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        log::debug!("STDERR: {}", output.stderr.trim_end());
    }
    Ok(output)
}

#[cfg(unix)]
fn terminate(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
}

#[cfg(not(unix))]
fn terminate(_child: &tokio::process::Child) {}
