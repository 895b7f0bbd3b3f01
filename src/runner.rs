// src/runner.rs

//! Helper-process runner
//!
//! Launches an external program, streams a request into its stdin, closes
//! stdin, and collects stdout and stderr to EOF. Used for the depsolve helper
//! and for the cloud command-line adapters.
//!
//! Stdin is fed from a separate task so a helper that writes a lot of output
//! before reading all of its input cannot deadlock the caller.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished process
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Resolve a program name the way a shell would
///
/// Paths (anything containing a `/`) are used as-is; bare names are looked up
/// in `PATH`.
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }
    which::which(program).map_err(|_| Error::ToolNotFound(program.to_string()))
}

/// A program invocation with its arguments and extra environment
#[derive(Debug, Clone)]
pub struct Runner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl Runner {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Base name of the program, used in error messages
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run with optional stdin bytes; a non-zero exit is not an error here
    pub async fn run(&self, input: Option<&[u8]>) -> Result<ProcessOutput> {
        match input {
            Some(bytes) => {
                self.run_with_reader(Some(Cursor::new(bytes.to_vec())))
                    .await
            }
            None => self.run_with_reader(None::<Cursor<Vec<u8>>>).await,
        }
    }

    /// Run, streaming stdin from `input` until EOF
    pub async fn run_with_reader<R>(&self, input: Option<R>) -> Result<ProcessOutput>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {}", self.display());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound(self.program.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

        let feeder = match (input, child.stdin.take()) {
            (Some(mut reader), Some(mut stdin)) => Some(tokio::spawn(async move {
                let copied = tokio::io::copy(&mut reader, &mut stdin).await;
                let shutdown = stdin.shutdown().await;
                drop(stdin);
                copied.and_then(|n| shutdown.map(|_| n))
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(n)) => debug!("Wrote {} bytes to {}", n, self.name()),
                // The child may legitimately exit before reading all input
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("{} closed stdin early", self.name())
                }
                Ok(Err(e)) => return Err(Error::Io(e)),
                Err(e) => {
                    return Err(Error::InternalError(format!(
                        "stdin writer for {} failed: {e}",
                        self.name()
                    )));
                }
            }
        }

        debug!(
            "{} exited with {} ({} bytes stdout, {} bytes stderr)",
            self.name(),
            output.status,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(ProcessOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Run and turn a non-zero exit into `Error::CommandFailed`
    pub async fn run_checked(&self, input: Option<&[u8]>) -> Result<ProcessOutput> {
        let output = self.run(input).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                command: self.display(),
                status: output.status.to_string(),
                stderr: output.stderr_str().trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run and decode stdout as JSON
    pub async fn run_json<T: DeserializeOwned>(&self, input: Option<&[u8]>) -> Result<T> {
        let output = self.run_checked(input).await?;
        serde_json::from_slice(&output.stdout).map_err(|e| {
            Error::ParseError(format!("decoding output of {} failed: {e}", self.name()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stdin_is_streamed_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "echo", "#!/bin/sh\ncat -\n");

        let output = Runner::new(&path).run(Some(b"hello")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "noisy", "#!/bin/sh\necho out\necho err >&2\nexit 3\n");

        let output = Runner::new(&path).run(None).await.unwrap();
        assert!(!output.success());
        assert_eq!(output.stdout_str(), "out\n");
        assert_eq!(output.stderr_str(), "err\n");

        let err = Runner::new(&path).run_checked(None).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { ref stderr, .. } if stderr == "err"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = Runner::new("/nonexistent/helper").run(None).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "json", "#!/bin/sh\necho '{\"a\": 1}'\n");

        let value: serde_json::Value = Runner::new(&path).run_json(None).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_display() {
        let runner = Runner::new("/usr/bin/aws").args(["ec2", "describe-regions"]);
        assert_eq!(runner.display(), "/usr/bin/aws ec2 describe-regions");
        assert_eq!(runner.name(), "aws");
    }
}
