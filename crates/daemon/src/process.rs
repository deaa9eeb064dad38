// External-process execution harness.
//
// Runs a platform command to completion or to a fixed one-hour ceiling,
// capturing stdout/stderr in memory. On timeout the child is killed before
// the call returns, so no process is left behind. The platform writes its
// own structured error log to a caller-supplied file; a non-empty log file
// fails the invocation even when the exit status is zero, and its bytes may
// be in the legacy WINDOWS-1251 code page.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use encoding_rs::WINDOWS_1251;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Fixed ceiling for every external-process invocation.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// One external command to execute.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new(), current_dir: None }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Full command line for error reporting.
    pub fn describe(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {timeout:?}: `{command}`")]
    Timeout { command: String, timeout: Duration },
    #[error("command failed: `{command}`\nstderr: {stderr}\ntool log: {tool_log}")]
    Failed { command: String, stderr: String, tool_log: String },
}

/// Run an invocation with the standard one-hour ceiling.
pub async fn run(invocation: &Invocation, tool_log: Option<&Path>) -> Result<(), ProcessError> {
    run_with_timeout(invocation, COMMAND_TIMEOUT, tool_log).await
}

/// Run an invocation with an explicit timeout.
///
/// On success the captured stdout is discarded; callers read results from
/// the scratch files they told the command to write.
pub async fn run_with_timeout(
    invocation: &Invocation,
    timeout: Duration,
    tool_log: Option<&Path>,
) -> Result<(), ProcessError> {
    let command_line = invocation.describe();
    debug!(command = %command_line, "running external command");

    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(dir) = &invocation.current_dir {
        command.current_dir(dir);
    }

    let mut child = command
        .spawn()
        .map_err(|source| ProcessError::Spawn { command: command_line.clone(), source })?;

    // Drain the pipes concurrently so a chatty child cannot block on a
    // full pipe while we wait for it to exit.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Err(_elapsed) => {
            // Kill synchronously before returning; the readers finish on EOF.
            let _ = child.kill().await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            return Err(ProcessError::Timeout { command: command_line, timeout });
        }
        Ok(waited) => {
            waited.map_err(|source| ProcessError::Spawn { command: command_line.clone(), source })?
        }
    };

    let _stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let tool_log_text = tool_log.map(read_tool_log).unwrap_or_default();

    if !status.success() || !tool_log_text.trim().is_empty() {
        return Err(ProcessError::Failed {
            command: command_line,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            tool_log: tool_log_text,
        });
    }

    Ok(())
}

/// Read and decode the platform's own log file. The platform writes it in
/// the legacy WINDOWS-1251 code page on older installs and UTF-8 on newer
/// ones; valid UTF-8 passes through untouched.
fn read_tool_log(path: &Path) -> String {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return String::new(),
    };
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(error) => {
            let (decoded, _, _) = WINDOWS_1251.decode(error.as_bytes());
            decoded.into_owned()
        }
    }
}
