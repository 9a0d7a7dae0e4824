// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by ktest.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<&Utf8Path>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.map(|f| f.to_owned()),
            err,
        }
    }

    /// Returns the config file that failed to parse, or `None` if the error came from the
    /// built-in defaults.
    pub fn config_file(&self) -> Option<&Utf8Path> {
        self.config_file.as_deref()
    }
}

impl fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config_file {
            Some(config_file) => write!(f, "failed to parse ktest config at `{config_file}`"),
            None => write!(f, "failed to parse the default ktest config"),
        }
    }
}

/// An error that occurs while parsing a
/// [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for test-threads: {input}\n(hint: expected an integer or \"num-cpus\")"
)]
pub struct TestThreadsParseError {
    input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An invalid filename pattern was provided for discovery.
#[derive(Clone, Debug, Error)]
#[error("invalid filename pattern `{pattern}`")]
pub struct GlobParseError {
    pattern: String,
    #[source]
    err: globset::Error,
}

impl GlobParseError {
    pub(crate) fn new(pattern: impl Into<String>, err: globset::Error) -> Self {
        Self {
            pattern: pattern.into(),
            err,
        }
    }
}

/// An error that occurred while walking the build directory for test executables.
///
/// A missing build directory is not an error: it produces an empty set of executables.
#[derive(Debug, Error)]
#[error("error reading build directory `{root}`")]
pub struct DiscoveryError {
    root: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl DiscoveryError {
    pub(crate) fn new(root: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self {
            root: root.into(),
            err,
        }
    }

    /// Returns the directory that could not be read.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

/// The standard output of a test binary was not valid UTF-8.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("standard output is not valid UTF-8 (valid up to byte {valid_up_to})")]
pub struct DecodeError {
    valid_up_to: usize,
}

impl DecodeError {
    pub(crate) fn new(err: std::str::Utf8Error) -> Self {
        Self {
            valid_up_to: err.valid_up_to(),
        }
    }

    /// Returns the length of the longest valid UTF-8 prefix.
    pub fn valid_up_to(&self) -> usize {
        self.valid_up_to
    }
}

/// An error that occurred while starting a test binary.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ChildStartError {
    /// The process could not be spawned.
    #[error("failed to spawn `{program}`")]
    Spawn {
        /// The program that was being spawned.
        program: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: Arc<std::io::Error>,
    },
}

/// An error that occurred while reading from or waiting on a child process.
#[derive(Clone, Debug, Error)]
pub enum ChildFdError {
    /// An error occurred while reading standard output.
    #[error("error reading standard output")]
    ReadStdout(#[source] Arc<std::io::Error>),

    /// An error occurred while reading standard error.
    #[error("error reading standard error")]
    ReadStderr(#[source] Arc<std::io::Error>),

    /// An error occurred while waiting for the child process to exit.
    #[error("error waiting for child process to exit")]
    Wait(#[source] Arc<std::io::Error>),
}

/// An error that occurred while building the [`TestRunner`](crate::runner::TestRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),
}

/// An error that occurred while enumerating sanitizer variants.
#[derive(Debug, Error)]
#[error("error reading sanitizer variants from `{dir}`")]
pub struct SanitizerError {
    dir: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl SanitizerError {
    pub(crate) fn new(dir: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self {
            dir: dir.into(),
            err,
        }
    }
}

/// The configured sanitizer build command could not be parsed.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BuildCommandParseError {
    /// The command string is not valid shell syntax.
    #[error("invalid build command `{command}`")]
    ShellWords {
        /// The command as written.
        command: String,

        /// The underlying error.
        #[source]
        err: shell_words::ParseError,
    },

    /// The command is empty.
    #[error("build command is empty")]
    Empty,
}

/// An error that occurred while building a sanitizer variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The build command could not be executed.
    #[error("failed to execute `{command}`")]
    Exec {
        /// The command line, shell-quoted.
        command: String,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The build command exited unsuccessfully.
    #[error("`{command}` failed{}", DisplayExitCode(*.exit_code))]
    Failed {
        /// The command line, shell-quoted.
        command: String,

        /// The exit code, or `None` if the command was terminated by a signal.
        exit_code: Option<i32>,
    },
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, " with exit code {code}"),
            None => write!(f, " (terminated by signal)"),
        }
    }
}

/// An error that occurs while writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteReportError {
    /// An error occurred while writing the report to the provided output.
    #[error("error writing to output")]
    Io(#[from] std::io::Error),
}
