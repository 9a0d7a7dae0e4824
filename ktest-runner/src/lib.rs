// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for ktest, a runner for native test binaries that report results
//! through a line-oriented log protocol.
//!
//! The flow of a run is strictly forward:
//!
//! 1. [`discovery`] walks a build tree for executables matching a glob.
//! 2. [`runner`] spawns each one, captures stdout and stderr, and hands stdout to
//!    [`protocol`] to turn it into test cases.
//! 3. [`reporter`] renders the collected [`runner::Test`] records: a sorted case table,
//!    a drill-down of terminated tests, and the raw sanitizer output.
//!
//! [`sanitizer`] repeats that pipeline once per sanitizer-instrumented build variant.

pub mod config;
pub mod discovery;
pub mod errors;
pub mod exit_codes;
pub mod helpers;
pub mod protocol;
pub mod reporter;
pub mod runner;
pub mod sanitizer;
mod test_command;
mod test_output;
