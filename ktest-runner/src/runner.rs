// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running test binaries.
//!
//! The main structure in this module is [`TestRunner`].

use crate::{
    config::{SanitizerEnv, TestThreads},
    errors::{ChildFdError, ChildStartError, TestRunnerBuildError},
    helpers::{DisplayErrorChain, display_exit_status},
    protocol::{TestCase, decode_output, first_location, parse_cases},
    test_command::{Child, ChildAccumulator, TestCommand},
    test_output::ChildSplitOutput,
};
use bytes::Bytes;
use camino::Utf8PathBuf;
use futures::prelude::*;
use std::{
    process::ExitStatus,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::runtime::Runtime;

/// How long to keep reading output after a test binary exits.
///
/// A grandchild that inherited the pipes can hold them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// The process-level outcome of a test binary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestStatus {
    /// The binary exited with code 0.
    Ok,

    /// The binary exited with a non-zero code, was killed by a signal, timed out, could not
    /// be started, or produced undecodable output.
    Terminated,

    /// The outcome could not be determined.
    Unknown,
}

impl TestStatus {
    /// Returns true if the binary ran to completion with code 0.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// One executed test binary.
#[derive(Clone, Debug)]
pub struct Test {
    /// The path the binary was run from.
    pub exec_path: Utf8PathBuf,

    /// The location field of the first protocol line the binary printed, if any.
    pub source_file: Option<String>,

    /// The process-level outcome.
    pub status: TestStatus,

    /// How the process exited, if it was started and waited on.
    pub exit_status: Option<ExitStatus>,

    /// Test cases, in the order the binary reported them.
    pub cases: Vec<TestCase>,

    /// Everything the binary wrote to standard error.
    pub sanitizer_output: Bytes,

    /// A message produced by the runner rather than the binary, such as a spawn failure or
    /// a timeout.
    pub diagnostic: Option<String>,

    /// Wall-clock time the binary took.
    pub time_taken: Duration,
}

impl Test {
    /// Returns the source file if known, otherwise the executable path.
    pub fn display_location(&self) -> &str {
        self.source_file
            .as_deref()
            .unwrap_or_else(|| self.exec_path.as_str())
    }

    /// Describes why the binary did not finish with [`TestStatus::Ok`], or `None` if it did.
    pub fn describe_outcome(&self) -> Option<String> {
        if let Some(diagnostic) = &self.diagnostic {
            return Some(diagnostic.clone());
        }
        match (self.status, self.exit_status) {
            (TestStatus::Ok, _) => None,
            (_, Some(exit_status)) => Some(display_exit_status(exit_status)),
            (_, None) => Some("outcome unknown".to_owned()),
        }
    }

    fn not_started(exec_path: Utf8PathBuf, diagnostic: String) -> Self {
        Self {
            exec_path,
            source_file: None,
            status: TestStatus::Terminated,
            exit_status: None,
            cases: Vec::new(),
            sanitizer_output: Bytes::new(),
            diagnostic: Some(diagnostic),
            time_taken: Duration::ZERO,
        }
    }
}

/// The outcome of [`TestRunner::execute`].
#[derive(Clone, Debug)]
pub struct RunResults {
    tests: Vec<Test>,
    elapsed: Duration,
}

impl RunResults {
    /// Returns the tests, in the order their paths were provided.
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }

    /// Consumes `self`, returning the tests.
    pub fn into_tests(self) -> Vec<Test> {
        self.tests
    }

    /// Returns the wall-clock time taken by the whole run.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    test_threads: Option<TestThreads>,
    timeout: Option<Duration>,
    sanitizer_env: SanitizerEnv,
}

impl TestRunnerBuilder {
    /// Sets the number of test binaries to run simultaneously.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets a wall-clock limit for each test binary.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// Sets the environment that configures sanitizer runtimes.
    pub fn set_sanitizer_env(&mut self, sanitizer_env: SanitizerEnv) -> &mut Self {
        self.sanitizer_env = sanitizer_env;
        self
    }

    /// Creates a new test runner.
    pub fn build(&self) -> Result<TestRunner, TestRunnerBuildError> {
        let test_threads = self.test_threads.unwrap_or(TestThreads::NumCpus).compute();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ktest-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;

        Ok(TestRunner {
            inner: TestRunnerInner {
                test_threads,
                timeout: self.timeout,
                sanitizer_env: self.sanitizer_env.clone(),
            },
            runtime,
        })
    }
}

/// Context for running test binaries.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner {
    inner: TestRunnerInner,
    runtime: Runtime,
}

impl TestRunner {
    /// Returns the number of test binaries run simultaneously.
    pub fn test_threads(&self) -> usize {
        self.inner.test_threads
    }

    /// Runs every binary in `paths` and returns one [`Test`] per path.
    ///
    /// Failures are confined to the [`Test`] they belong to: this never fails as a whole.
    pub fn execute<I>(&self, paths: I) -> RunResults
    where
        I: IntoIterator<Item = Utf8PathBuf>,
    {
        let paths: Vec<_> = paths.into_iter().collect();
        let start = Instant::now();
        let tests = self.runtime.block_on(self.inner.execute(paths));
        RunResults {
            tests,
            elapsed: start.elapsed(),
        }
    }
}

#[derive(Debug)]
struct TestRunnerInner {
    test_threads: usize,
    timeout: Option<Duration>,
    sanitizer_env: SanitizerEnv,
}

impl TestRunnerInner {
    async fn execute(&self, paths: Vec<Utf8PathBuf>) -> Vec<Test> {
        let mut slots: Vec<Option<Test>> = vec![None; paths.len()];

        let mut results = futures::stream::iter(paths.into_iter().enumerate())
            .map(|(index, exec_path)| async move { (index, self.run_test(exec_path).await) })
            .buffer_unordered(self.test_threads.max(1));

        while let Some((index, test)) = results.next().await {
            slots[index] = Some(test);
        }

        slots
            .into_iter()
            .map(|slot| slot.expect("every slot is filled by exactly one task"))
            .collect()
    }

    async fn run_test(&self, exec_path: Utf8PathBuf) -> Test {
        tracing::debug!("starting `{exec_path}`");
        let start = Instant::now();

        let command = TestCommand::new(&exec_path, &self.sanitizer_env);
        let Child { mut child, fds } = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let diagnostic = format!("failed to spawn: {err}");
                let err = ChildStartError::Spawn {
                    program: exec_path.clone(),
                    err: Arc::new(err),
                };
                tracing::warn!("{}", DisplayErrorChain(&err));
                return Test::not_started(exec_path, diagnostic);
            }
        };

        let mut acc = ChildAccumulator::new(fds);
        let mut timed_out = false;
        let mut timeout_sleep = std::pin::pin!(async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        });

        let res = loop {
            tokio::select! {
                () = acc.fill_buf(), if !acc.fds.is_done() => {}
                res = child.wait() => break res,
                () = &mut timeout_sleep, if !timed_out => {
                    timed_out = true;
                    // The child may have exited in the meantime, in which case wait
                    // returns its real status.
                    if let Err(err) = child.start_kill() {
                        tracing::debug!("failed to kill timed-out `{exec_path}`: {err}");
                    }
                }
            }
        };

        // Pick up anything written just before exit.
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while !acc.fds.is_done() {
                acc.fill_buf().await;
            }
        })
        .await;

        let ChildAccumulator { output, errors, .. } = acc;
        for error in &errors {
            tracing::warn!("`{exec_path}`: {}", DisplayErrorChain(error));
        }

        let test = finish_test(
            exec_path,
            res.map_err(|err| ChildFdError::Wait(Arc::new(err))),
            output.freeze(),
            timed_out.then_some(self.timeout).flatten(),
            start.elapsed(),
        );
        tracing::debug!(
            "finished `{}` in {:?}: {:?}, {} cases",
            test.exec_path,
            test.time_taken,
            test.status,
            test.cases.len(),
        );
        test
    }
}

/// Classifies the process outcome and parses the captured output.
fn finish_test(
    exec_path: Utf8PathBuf,
    res: Result<ExitStatus, ChildFdError>,
    output: ChildSplitOutput,
    timed_out_after: Option<Duration>,
    time_taken: Duration,
) -> Test {
    let ChildSplitOutput { stdout, stderr } = output;

    let (status, exit_status, mut diagnostic) = match res {
        Ok(exit_status) => {
            let status = if exit_status.success() {
                TestStatus::Ok
            } else {
                TestStatus::Terminated
            };
            (status, Some(exit_status), None)
        }
        Err(err) => (
            TestStatus::Unknown,
            None,
            Some(DisplayErrorChain(&err).to_string()),
        ),
    };

    let mut test = Test {
        exec_path,
        source_file: None,
        status,
        exit_status,
        cases: Vec::new(),
        sanitizer_output: stderr,
        diagnostic: None,
        time_taken,
    };

    // A child that exits cleanly as the timer fires was not killed.
    if let Some(timeout) = timed_out_after
        && !test.status.is_ok()
    {
        test.status = TestStatus::Terminated;
        diagnostic = Some(format!(
            "timed out after {}",
            humantime::format_duration(timeout)
        ));
    }

    match decode_output(&stdout) {
        Ok(text) => {
            test.source_file = first_location(text).map(str::to_owned);
            test.cases = parse_cases(text).collect();
        }
        Err(err) => {
            test.status = TestStatus::Terminated;
            diagnostic = Some(match diagnostic {
                Some(existing) => format!("{existing}; {err}"),
                None => err.to_string(),
            });
        }
    }

    test.diagnostic = diagnostic;
    test
}
