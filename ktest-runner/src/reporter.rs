// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering run results.
//!
//! The [`Reporter`] makes independent, read-only passes over the same collection of
//! [`Test`]s:
//!
//! * a table of every test case across every binary, sorted so that failures come last;
//! * a drill-down of the binaries that did not exit cleanly, with the annotations their
//!   cases carried;
//! * the raw standard error of every binary that wrote any, which is where sanitizer
//!   runtimes report.

use crate::{
    errors::WriteReportError,
    helpers::{FormattedDuration, display_path, plural},
    protocol::{CaseStatus, TestCase},
    runner::{RunResults, Test, TestStatus},
};
use camino::{Utf8Path, Utf8PathBuf};
use owo_colors::{OwoColorize, Style};
use std::{io::Write, time::Duration};
use unicode_width::UnicodeWidthStr;

/// Column separator in the case table.
const COLUMN_GAP: &str = "  ";

/// Indentation step for the drill-down.
const INDENT: &str = "    ";

/// Styles used when writing reports.
#[derive(Clone, Debug, Default)]
pub struct Styles {
    is_colorized: bool,
    pass: Style,
    fail: Style,
    ignore: Style,
    count: Style,
    header: Style,
    location: Style,
    banner: Style,
}

impl Styles {
    /// Enables colors.
    pub fn colorize(&mut self) {
        self.is_colorized = true;
        self.pass = Style::new().green();
        self.fail = Style::new().red();
        self.ignore = Style::new().blue();
        self.count = Style::new().bold();
        self.header = Style::new().bold();
        self.location = Style::new().bold();
        self.banner = Style::new().reversed();
    }

    /// Returns true if [`Self::colorize`] was called.
    pub fn is_colorized(&self) -> bool {
        self.is_colorized
    }

    fn status(&self, status: CaseStatus) -> Style {
        match status {
            CaseStatus::Ignore => self.ignore,
            CaseStatus::Pass => self.pass,
            CaseStatus::Fail => self.fail,
        }
    }
}

/// Counts across a set of tests.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of binaries that were run.
    pub binaries: usize,

    /// The number of binaries with status [`TestStatus::Terminated`].
    pub terminated: usize,

    /// The number of binaries with status [`TestStatus::Unknown`].
    pub unknown: usize,

    /// The number of binaries that wrote to standard error.
    pub with_sanitizer_output: usize,

    /// The number of passing cases.
    pub passed: usize,

    /// The number of failing cases.
    pub failed: usize,

    /// The number of ignored cases.
    pub ignored: usize,
}

impl RunStats {
    /// Tallies `tests`.
    pub fn new(tests: &[Test]) -> Self {
        let mut stats = Self {
            binaries: tests.len(),
            ..Self::default()
        };
        for test in tests {
            match test.status {
                TestStatus::Ok => {}
                TestStatus::Terminated => stats.terminated += 1,
                TestStatus::Unknown => stats.unknown += 1,
            }
            if !test.sanitizer_output.is_empty() {
                stats.with_sanitizer_output += 1;
            }
            for case in &test.cases {
                match case.status {
                    CaseStatus::Ignore => stats.ignored += 1,
                    CaseStatus::Pass => stats.passed += 1,
                    CaseStatus::Fail => stats.failed += 1,
                }
            }
        }
        stats
    }

    /// The total number of cases.
    pub fn cases(&self) -> usize {
        self.passed + self.failed + self.ignored
    }

    /// Returns true if any case failed or any binary did not exit cleanly.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.terminated > 0 || self.unknown > 0
    }
}

/// Writes reports about a set of tests.
#[derive(Clone, Debug)]
pub struct Reporter {
    styles: Styles,
    base_dir: Option<Utf8PathBuf>,
}

impl Reporter {
    /// Creates a new reporter.
    ///
    /// Absolute locations under `base_dir` are shown relative to it.
    pub fn new(styles: Styles, base_dir: Option<Utf8PathBuf>) -> Self {
        Self { styles, base_dir }
    }

    /// Writes the line that introduces a sanitizer variant's report.
    pub fn write_variant_banner(
        &self,
        variant: &str,
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        writeln!(
            writer,
            "{}",
            format_args!("Running sanitizers for {variant}").style(self.styles.banner)
        )?;
        Ok(())
    }

    /// Writes every pass, followed by the summary line.
    pub fn write_report(
        &self,
        results: &RunResults,
        writer: &mut dyn Write,
    ) -> Result<RunStats, WriteReportError> {
        let tests = results.tests();
        let stats = RunStats::new(tests);

        self.write_case_table(tests, writer)?;
        self.write_terminated(tests, writer)?;
        self.write_sanitizer_output(tests, writer)?;
        self.write_summary(&stats, Some(results.elapsed()), writer)?;
        writer.flush()?;

        Ok(stats)
    }

    /// Writes one row per test case across all `tests`.
    ///
    /// Rows are ordered by status (ignored, passed, failed) and then by location. Rows with
    /// equal keys keep the order in which they were reported.
    pub fn write_case_table(
        &self,
        tests: &[Test],
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        let mut rows: Vec<CaseRow<'_>> = tests
            .iter()
            .flat_map(|test| {
                let location = self.display_location(test);
                test.cases.iter().map(move |case| CaseRow {
                    position: format!("{location}:{}", case.line),
                    location: location.clone(),
                    case,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.case.status.rank(), &a.location).cmp(&(b.case.status.rank(), &b.location))
        });

        let status_width = column_width(rows.iter().map(|row| row.case.status.as_str()));
        let position_width = column_width(rows.iter().map(|row| row.position.as_str()));
        let name_width = column_width(rows.iter().map(|row| row.case.name.as_str()));

        for row in &rows {
            let status = row.case.status;
            write_padded(
                writer,
                status.as_str(),
                self.styles.status(status),
                status_width,
            )?;
            write!(writer, "{COLUMN_GAP}")?;
            write_padded(writer, &row.position, Style::new(), position_width)?;
            write!(writer, "{COLUMN_GAP}")?;

            match row.case.message.as_deref() {
                Some(message) => {
                    write_padded(writer, &row.case.name, Style::new(), name_width)?;
                    writeln!(writer, "{COLUMN_GAP}{message}")?;
                }
                None => writeln!(writer, "{}", row.case.name)?,
            }
        }

        Ok(())
    }

    /// Writes the binaries that did not exit cleanly, with their cases and annotations.
    ///
    /// A binary is listed if it has at least one case or carries a diagnostic.
    pub fn write_terminated(
        &self,
        tests: &[Test],
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        let mut terminated = tests
            .iter()
            .filter(|test| !test.status.is_ok())
            .filter(|test| !test.cases.is_empty() || test.diagnostic.is_some())
            .peekable();
        if terminated.peek().is_none() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(writer, "{}", "Terminated tests:".style(self.styles.header))?;
        for test in terminated {
            write!(
                writer,
                "{}",
                self.display_location(test).style(self.styles.location)
            )?;
            match test.describe_outcome() {
                Some(outcome) => writeln!(writer, " ({outcome})")?,
                None => writeln!(writer)?,
            }
            for case in &test.cases {
                self.write_drill_down_case(case, writer)?;
            }
        }

        Ok(())
    }

    fn write_drill_down_case(
        &self,
        case: &TestCase,
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        writeln!(
            writer,
            "{INDENT}{}",
            format_args!("{}:{}", case.name, case.line).style(self.styles.status(case.status))
        )?;
        for info in &case.additional_info {
            writeln!(writer, "{INDENT}{INDENT}{}: {}", info.location, info.message)?;
        }
        Ok(())
    }

    /// Writes the raw standard error of every binary that produced any.
    pub fn write_sanitizer_output(
        &self,
        tests: &[Test],
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        let mut with_output = tests
            .iter()
            .filter(|test| !test.sanitizer_output.is_empty())
            .peekable();
        if with_output.peek().is_none() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(writer, "{}", "Sanitizer output:".style(self.styles.header))?;
        for test in with_output {
            writeln!(
                writer,
                "{}",
                self.display_location(test).style(self.styles.location)
            )?;
            writer.write_all(&test.sanitizer_output)?;
            if !test.sanitizer_output.ends_with(b"\n") {
                writeln!(writer)?;
            }
        }

        Ok(())
    }

    /// Writes a one-line summary of `stats`.
    pub fn write_summary(
        &self,
        stats: &RunStats,
        elapsed: Option<Duration>,
        writer: &mut dyn Write,
    ) -> Result<(), WriteReportError> {
        writeln!(writer)?;
        write!(writer, "{}", "Summary".style(self.styles.header))?;
        if let Some(elapsed) = elapsed {
            write!(writer, " [{:>8}]", FormattedDuration(elapsed))?;
        }

        let count = self.styles.count;
        write!(
            writer,
            " {} {} run, {} {}: {} {}, {} {}, {} {}",
            stats.binaries.style(count),
            plural::binaries_str(stats.binaries),
            stats.cases().style(count),
            plural::cases_str(stats.cases()),
            stats.passed.style(count),
            "passed".style(self.styles.pass),
            stats.failed.style(count),
            "failed".style(self.styles.fail),
            stats.ignored.style(count),
            "ignored".style(self.styles.ignore),
        )?;
        if stats.terminated > 0 {
            write!(
                writer,
                ", {} {} {}",
                stats.terminated.style(count),
                plural::binaries_str(stats.terminated),
                "terminated".style(self.styles.fail),
            )?;
        }
        if stats.unknown > 0 {
            write!(
                writer,
                ", {} {} with unknown status",
                stats.unknown.style(count),
                plural::binaries_str(stats.unknown),
            )?;
        }
        writeln!(writer)?;

        Ok(())
    }

    fn display_location(&self, test: &Test) -> String {
        display_path(
            Utf8Path::new(test.display_location()),
            self.base_dir.as_deref(),
        )
        .into_string()
    }
}

struct CaseRow<'a> {
    location: String,
    position: String,
    case: &'a TestCase,
}

fn column_width<'a>(cells: impl Iterator<Item = &'a str>) -> usize {
    cells.map(UnicodeWidthStr::width).max().unwrap_or(0)
}

/// Writes `text` styled, followed by enough spaces to fill `width` columns.
fn write_padded(
    writer: &mut dyn Write,
    text: &str,
    style: Style,
    width: usize,
) -> std::io::Result<()> {
    let padding = width.saturating_sub(text.width());
    write!(writer, "{}{:padding$}", text.style(style), "")
}
