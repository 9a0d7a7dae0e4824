// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use itertools::Itertools;
use ktest_runner::{errors::*, exit_codes::KtestExitCode};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which colorizes them and prints their sources.

/// An error that ktest expects to happen and reports without a backtrace.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("current directory is invalid")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirNotUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("invalid filename pattern")]
    GlobParseError {
        #[from]
        err: GlobParseError,
    },
    #[error("discovery error")]
    DiscoveryError {
        #[from]
        err: DiscoveryError,
    },
    #[error("test runner build error")]
    TestRunnerBuildError {
        #[from]
        err: TestRunnerBuildError,
    },
    #[error("sanitizer variant error")]
    SanitizerError {
        #[from]
        err: SanitizerError,
    },
    #[error("build command parse error")]
    BuildCommandParseError {
        #[from]
        err: BuildCommandParseError,
    },
    #[error("error writing report")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
    #[error("test run failed")]
    TestRunFailed,
    #[error("all sanitizer variants failed to build")]
    AllVariantsFailed { variants: Vec<String> },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::CurrentDirNotUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::GlobParseError { .. }
            | Self::DiscoveryError { .. }
            | Self::TestRunnerBuildError { .. }
            | Self::SanitizerError { .. }
            | Self::BuildCommandParseError { .. } => KtestExitCode::SETUP_ERROR,
            Self::WriteReportError { .. } => KtestExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => KtestExitCode::TEST_RUN_FAILED,
            Self::AllVariantsFailed { .. } => KtestExitCode::BUILD_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirInvalid { err } => {
                tracing::error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirNotUtf8 { path } => {
                tracing::error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::GlobParseError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::DiscoveryError { err } => {
                tracing::error!(
                    "failed to read build directory `{}`",
                    err.root().style(styles.bold)
                );
                err.source()
            }
            Self::TestRunnerBuildError { err } => {
                tracing::error!("failed to build test runner");
                Some(err as &dyn Error)
            }
            Self::SanitizerError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::BuildCommandParseError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::WriteReportError { err } => {
                tracing::error!("failed to write report");
                Some(err as &dyn Error)
            }
            Self::TestRunFailed => {
                tracing::error!("test run failed");
                None
            }
            Self::AllVariantsFailed { variants } => {
                tracing::error!(
                    "every sanitizer variant failed to build: {}",
                    variants.iter().map(|v| v.style(styles.bold)).join(", ")
                );
                None
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
