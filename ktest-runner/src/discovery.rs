// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery of test executables under a build tree.
//!
//! The walk is depth-first and follows symlinks. A path is returned if its base name
//! matches the filename pattern (shell-glob semantics, case-sensitive) and the platform
//! considers it executable by the current user.

use crate::errors::{DiscoveryError, GlobParseError};
use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher};
use std::io;
use walkdir::WalkDir;

/// The default filename pattern for test executables.
pub const DEFAULT_PATTERN: &str = "*_tests";

/// A compiled filename pattern.
#[derive(Clone, Debug)]
pub struct FilenamePattern {
    matcher: GlobMatcher,
}

impl FilenamePattern {
    /// Compiles a shell-style glob (`*`, `?`, `[...]`) that is matched against base names.
    pub fn new(pattern: &str) -> Result<Self, GlobParseError> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|err| GlobParseError::new(pattern, err))?;
        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }

    /// Returns the pattern as written.
    pub fn as_str(&self) -> &str {
        self.matcher.glob().glob()
    }

    /// Returns true if `file_name` matches the pattern.
    pub fn is_match(&self, file_name: &str) -> bool {
        self.matcher.is_match(file_name)
    }
}

/// Walks `root` for executables whose base name matches `pattern`.
///
/// A missing `root` produces an empty sequence. A `root` that exists but cannot be read is
/// an error. Problems below the root (unreadable subdirectories, symlink loops, non-UTF-8
/// paths) are logged and skipped.
pub fn discover_executables(
    root: &Utf8Path,
    pattern: &FilenamePattern,
) -> Result<Executables, DiscoveryError> {
    let walker = match std::fs::read_dir(root) {
        Ok(_) => Some(WalkDir::new(root).follow_links(true).into_iter()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("build directory `{root}` does not exist, nothing to test");
            None
        }
        Err(err) => return Err(DiscoveryError::new(root, err)),
    };

    Ok(Executables {
        walker,
        pattern: pattern.clone(),
    })
}

/// A lazy iterator over discovered test executables.
///
/// Returned by [`discover_executables`].
#[derive(Debug)]
pub struct Executables {
    walker: Option<walkdir::IntoIter>,
    pattern: FilenamePattern,
}

impl Iterator for Executables {
    type Item = Utf8PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        let walker = self.walker.as_mut()?;
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping entry while walking build directory: {err}");
                    continue;
                }
            };

            // With follow_links, file_type describes the symlink target.
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if !self.pattern.is_match(file_name) {
                continue;
            }

            let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => path,
                Err(path) => {
                    tracing::warn!("skipping non-UTF-8 path `{}`", path.display());
                    continue;
                }
            };

            if is_executable(&path) {
                return Some(path);
            }
        }

        self.walker = None;
        None
    }
}

impl std::iter::FusedIterator for Executables {}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn is_executable(path: &Utf8Path) -> bool {
            use nix::unistd::{AccessFlags, access};

            access(path.as_std_path(), AccessFlags::X_OK).is_ok()
        }
    } else if #[cfg(windows)] {
        fn is_executable(path: &Utf8Path) -> bool {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
        }
    } else {
        compile_error!("unsupported target platform");
    }
}
