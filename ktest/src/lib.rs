// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line interface for ktest.
//!
//! ktest discovers native test binaries under a build tree, runs them, and reports the
//! test cases they print. The `sanitizers` subcommand repeats that for every
//! sanitizer-instrumented build variant.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
