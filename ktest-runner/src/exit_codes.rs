// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exit codes of the `ktest` process.

/// Documented exit codes for `ktest` failures.
///
/// ktest reports rather than gates: a run with failing tests exits with [`OK`](Self::OK)
/// unless `fail-on-error` is enabled.
pub enum KtestExitCode {}

impl KtestExitCode {
    /// No errors occurred and ktest exited normally.
    pub const OK: i32 = 0;

    /// One or more test cases failed or test binaries terminated abnormally, and
    /// `fail-on-error` was enabled.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// No sanitizer variant could be built. Returned whether or not `fail-on-error` is
    /// enabled.
    pub const BUILD_FAILED: i32 = 101;

    /// An error was encountered while setting up the run (config, build directory,
    /// filename pattern).
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
