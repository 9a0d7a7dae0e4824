// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Captured output of a test binary.

use bytes::{Bytes, BytesMut};

/// The size of each buffered reader's buffer, and the initial size of each accumulator.
///
/// This is the (normal) page size on most systems.
pub(crate) const CHUNK_SIZE: usize = 4 * 1024;

/// Standard output and standard error of a test binary, captured separately.
#[derive(Clone, Debug, Default)]
pub(crate) struct ChildSplitOutput {
    pub(crate) stdout: Bytes,
    pub(crate) stderr: Bytes,
}

/// The output of a child process that's currently being collected.
#[derive(Debug)]
pub(crate) struct ChildSplitOutputMut {
    pub(crate) stdout: BytesMut,
    pub(crate) stderr: BytesMut,
}

impl ChildSplitOutputMut {
    pub(crate) fn new() -> Self {
        Self {
            stdout: BytesMut::with_capacity(CHUNK_SIZE),
            stderr: BytesMut::with_capacity(CHUNK_SIZE),
        }
    }

    /// Marks the collection as done.
    pub(crate) fn freeze(self) -> ChildSplitOutput {
        ChildSplitOutput {
            stdout: self.stdout.freeze(),
            stderr: self.stderr.freeze(),
        }
    }
}
