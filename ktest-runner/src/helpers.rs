// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for ktest-runner.

use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, process::ExitStatus, time::Duration};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "binary" if `count` is 1, otherwise "binaries".
    pub fn binaries_str(count: usize) -> &'static str {
        if count == 1 { "binary" } else { "binaries" }
    }

    /// Returns "case" if `count` is 1, otherwise "cases".
    pub fn cases_str(count: usize) -> &'static str {
        if count == 1 { "case" } else { "cases" }
    }

    /// Returns "variant" if `count` is 1, otherwise "variants".
    pub fn variants_str(count: usize) -> &'static str {
        if count == 1 { "variant" } else { "variants" }
    }
}

/// Returns `path` relative to `base` for display if it lies under `base`, otherwise `path`
/// unchanged.
pub(crate) fn display_path(path: &Utf8Path, base: Option<&Utf8Path>) -> Utf8PathBuf {
    base.and_then(|base| pathdiff::diff_utf8_paths(path, base))
        .filter(|rel| !rel.as_str().is_empty() && !rel.starts_with(".."))
        .unwrap_or_else(|| path.to_owned())
}

/// Describes how a test binary exited, for diagnostics.
pub(crate) fn display_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return match signal_str(signal) {
                Some(name) => format!("killed by signal {signal} (SIG{name})"),
                None => format!("killed by signal {signal}"),
            };
        }
    }

    "exited with an unknown status".to_owned()
}

#[cfg(unix)]
fn signal_str(signal: i32) -> Option<&'static str> {
    // These signal numbers are the same on at least Linux, macOS and FreeBSD.
    match signal {
        1 => Some("HUP"),
        2 => Some("INT"),
        3 => Some("QUIT"),
        4 => Some("ILL"),
        5 => Some("TRAP"),
        6 => Some("ABRT"),
        8 => Some("FPE"),
        9 => Some("KILL"),
        11 => Some("SEGV"),
        13 => Some("PIPE"),
        14 => Some("ALRM"),
        15 => Some("TERM"),
        _ => None,
    }
}

/// Displays an error along with its sources, separated by `: `.
pub(crate) struct DisplayErrorChain<'a, E: ?Sized>(pub(crate) &'a E);

impl<E: std::error::Error + ?Sized> fmt::Display for DisplayErrorChain<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FormattedDuration(pub(crate) Duration);

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.0.as_secs_f64();
        if duration > 60.0 {
            write!(f, "{}m {:.2}s", duration as u32 / 60, duration % 60.0)
        } else {
            write!(f, "{duration:.2}s")
        }
    }
}
