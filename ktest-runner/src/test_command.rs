// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    config::SanitizerEnv,
    errors::ChildFdError,
    test_output::{CHUNK_SIZE, ChildSplitOutputMut},
};
use bytes::BytesMut;
use camino::Utf8Path;
use std::{io, process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child as TokioChild, ChildStderr, ChildStdout},
};

/// A to-be-run test binary.
pub(crate) struct TestCommand {
    command: std::process::Command,
}

impl TestCommand {
    /// Creates a new test command for `program`, with the sanitizer runtime configured.
    pub(crate) fn new(program: &Utf8Path, sanitizer_env: &SanitizerEnv) -> Self {
        let mut command = std::process::Command::new(program);
        sanitizer_env.apply(&mut command);
        // This environment variable is set to indicate that tests are being run under ktest.
        command.env("KTEST", "1");
        Self { command }
    }

    /// Spawns the command with no stdin and separately captured stdout and stderr.
    pub(crate) fn spawn(mut self) -> io::Result<Child> {
        self.command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut command = tokio::process::Command::from(self.command);
        // A timed-out or abandoned test must not outlive the run.
        command.kill_on_drop(true);
        let mut child = command.spawn()?;

        let stdout = child.stdout.take().expect("stdout was set");
        let stderr = child.stderr.take().expect("stderr was set");

        Ok(Child {
            child,
            fds: ChildFds::new(stdout, stderr),
        })
    }
}

/// A spawned child process along with its file descriptors.
pub(crate) struct Child {
    pub(crate) child: TokioChild,
    pub(crate) fds: ChildFds,
}

/// A `BufReader` over an `AsyncRead` that tracks whether it has reached end of file.
pub(crate) struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    pub(crate) async fn fill_buf(&mut self, acc: &mut BytesMut) -> Result<(), io::Error> {
        if self.done {
            return Ok(());
        }

        match self.reader.fill_buf().await {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                if buf.is_empty() {
                    self.done = true;
                }
                let len = buf.len();
                self.reader.consume(len);
                Ok(())
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}

/// Standard output and standard error pipes of a child process.
pub(crate) struct ChildFds {
    stdout: FusedBufReader<ChildStdout>,
    stderr: FusedBufReader<ChildStderr>,
}

impl ChildFds {
    fn new(stdout: ChildStdout, stderr: ChildStderr) -> Self {
        Self {
            stdout: FusedBufReader::new(stdout),
            stderr: FusedBufReader::new(stderr),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.stdout.is_done() && self.stderr.is_done()
    }

    /// Fills one of the buffers in `acc` with available data from the child process.
    ///
    /// This operation is cancel-safe, since the underlying [`AsyncBufReadExt::fill_buf`]
    /// operation is cancel-safe.
    async fn fill_buf(&mut self, acc: &mut ChildSplitOutputMut) -> Result<(), ChildFdError> {
        let Self { stdout, stderr } = self;
        let ChildSplitOutputMut {
            stdout: stdout_acc,
            stderr: stderr_acc,
        } = acc;

        // Wait until either of these make progress.
        tokio::select! {
            res = stdout.fill_buf(stdout_acc), if !stdout.is_done() => {
                res.map_err(|error| ChildFdError::ReadStdout(Arc::new(error)))
            }
            res = stderr.fill_buf(stderr_acc), if !stderr.is_done() => {
                res.map_err(|error| ChildFdError::ReadStderr(Arc::new(error)))
            }
            // If both are done, do nothing.
            else => Ok(()),
        }
    }
}

/// Output and error accumulator for a child process.
pub(crate) struct ChildAccumulator {
    pub(crate) fds: ChildFds,
    pub(crate) output: ChildSplitOutputMut,
    pub(crate) errors: Vec<ChildFdError>,
}

impl ChildAccumulator {
    pub(crate) fn new(fds: ChildFds) -> Self {
        Self {
            fds,
            output: ChildSplitOutputMut::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) async fn fill_buf(&mut self) {
        if let Err(error) = self.fds.fill_buf(&mut self.output).await {
            self.errors.push(error);
        }
    }
}
