// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

// The fixtures are shell scripts, so these tests only run on Unix.

#[cfg(unix)]
mod basic;
#[cfg(unix)]
mod fixtures;
#[cfg(unix)]
mod sanitizers;
