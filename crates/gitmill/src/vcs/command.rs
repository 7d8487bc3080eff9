use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::errors::CommandError;

/// A `git` invocation with an explicit working directory and optional timeout.
///
/// Prompts are disabled and the locale is pinned so stderr can be classified.
#[derive(Debug, Clone)]
pub struct GitCommand {
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

/// Captured output of a finished command.
struct RawOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl GitCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable form used in logs and errors.
    pub fn display(&self) -> String {
        format!("git {}", self.args.join(" "))
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(&self.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn io_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Io {
            command: self.display(),
            source,
        }
    }

    async fn run(&self) -> Result<RawOutput, CommandError> {
        let mut child = self.build().spawn().map_err(|e| self.io_error(e))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collected = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, collect(&mut child, stdout, stderr)).await,
            None => Ok(collect(&mut child, stdout, stderr).await),
        };

        match collected {
            Ok(result) => result.map_err(|e| self.io_error(e)),
            Err(_) => {
                // kill() also waits for the child, so no zombie is left behind
                if let Err(e) = child.kill().await {
                    tracing::warn!(command = %self.display(), error = %e, "Failed to kill timed out command");
                }
                Err(CommandError::Timeout {
                    command: self.display(),
                    timeout: self.timeout.unwrap_or_default(),
                })
            }
        }
    }

    /// Run to completion and return stdout, classifying a non-zero exit.
    pub async fn output(&self) -> Result<String, CommandError> {
        self.output_accepting(&[]).await
    }

    /// Like [`output`](Self::output), but the exit codes in `accepted` also
    /// count as success (`git grep` exits with 1 when nothing matched).
    pub async fn output_accepting(&self, accepted: &[i32]) -> Result<String, CommandError> {
        let raw = self.run().await?;
        let accepted = raw
            .status
            .code()
            .is_some_and(|code| accepted.contains(&code));
        if !raw.status.success() && !accepted {
            return Err(CommandError::classify(
                self.display(),
                raw.status.to_string(),
                String::from_utf8_lossy(&raw.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&raw.stdout).into_owned())
    }

    /// Run to completion and report whether the command exited successfully.
    ///
    /// A non-zero exit is an answer here, not an error.
    pub async fn succeeds(&self) -> Result<bool, CommandError> {
        Ok(self.run().await?.status.success())
    }

    /// Spawn the command and read its stdout line by line.
    pub fn stream(&self) -> Result<CommandStream, CommandError> {
        let mut child = self.build().spawn().map_err(|e| self.io_error(e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            self.io_error(std::io::Error::other("stdout was not captured"))
        })?;
        let stderr = child.stderr.take();

        Ok(CommandStream {
            command: self.display(),
            child,
            reader: BufReader::new(stdout),
            stderr_task: tokio::spawn(async move { read_pipe(stderr).await.unwrap_or_default() }),
            buf: Vec::new(),
        })
    }
}

async fn collect(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) -> std::io::Result<RawOutput> {
    let (status, stdout, stderr) =
        tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))?;
    Ok(RawOutput {
        status,
        stdout,
        stderr,
    })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Line-oriented reader over a running command's stdout.
///
/// Lines are decoded lossily, so malformed UTF-8 in commit messages never
/// aborts a stream. Dropping the stream kills the child.
pub struct CommandStream {
    command: String,
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr_task: JoinHandle<Vec<u8>>,
    buf: Vec<u8>,
}

impl CommandStream {
    /// Next line without its terminator, or `None` at end of output.
    pub async fn next_line(&mut self) -> Result<Option<String>, CommandError> {
        self.buf.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.buf)
            .await
            .map_err(|source| CommandError::Io {
                command: self.command.clone(),
                source,
            })?;
        if read == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Wait for the command to exit and classify a failure.
    pub async fn finish(mut self) -> Result<(), CommandError> {
        let status = self.child.wait().await.map_err(|source| CommandError::Io {
            command: self.command.clone(),
            source,
        })?;
        let stderr = self.stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::classify(
                self.command,
                status.to_string(),
                String::from_utf8_lossy(&stderr).into_owned(),
            ))
        }
    }
}
