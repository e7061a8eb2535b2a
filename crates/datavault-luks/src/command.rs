//! Execution wrapper for the external disk tooling.
//!
//! Keeps shell integration isolated so provider logic stays testable
//! (fake binaries, deterministic output parsing). Secrets are written to
//! the child's input stream, never placed on the argument vector.

use datavault_core::error::{DatavaultError, DatavaultResult};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct ToolCommand {
    binary: PathBuf,
    timeout: Duration,
}

/// Captured result of one tool invocation.
#[derive(Debug)]
pub(crate) struct ToolOutput {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

impl ToolOutput {
    pub(crate) fn success(&self) -> bool {
        self.status == 0
    }

    /// Prefer stderr for diagnostics, falling back to stdout.
    pub(crate) fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if stdout.is_empty() {
            "no additional output".to_string()
        } else {
            stdout.to_string()
        }
    }
}

impl ToolCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Spawn the tool, feed the optional stdin payload, and wait within
    /// the configured timeout. A child that outlives the timeout is
    /// killed and reported as a provider failure.
    pub(crate) fn run(&self, args: &[&str], input: Option<&[u8]>) -> DatavaultResult<ToolOutput> {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        if input.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|err| {
            DatavaultError::Provider(format!(
                "failed to launch {}: {err}",
                self.binary.display()
            ))
        })?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload)?;
                stdin.flush().ok();
            }
        }

        let stdout_handle = drain_pipe(child.stdout.take());
        let stderr_handle = drain_pipe(child.stderr.take());
        let status = self.wait_with_timeout(&mut child)?;

        let stdout = stdout_handle
            .join()
            .map_err(|_| DatavaultError::Provider("stdout reader thread panicked".into()))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| DatavaultError::Provider("stderr reader thread panicked".into()))??;

        Ok(ToolOutput {
            stdout,
            stderr,
            status,
        })
    }

    fn wait_with_timeout(&self, child: &mut Child) -> DatavaultResult<i32> {
        let start = Instant::now();
        while start.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            thread::sleep(Duration::from_millis(25));
        }

        let _ = child.kill();
        let _ = child.wait();
        Err(DatavaultError::Provider(format!(
            "{} timed out after {:?}",
            self.binary.display(),
            self.timeout
        )))
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> thread::JoinHandle<DatavaultResult<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> DatavaultResult<String> {
        if let Some(mut reader) = pipe {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf)?;
            Ok(String::from_utf8_lossy(&buf).to_string())
        } else {
            Ok(String::new())
        }
    })
}
