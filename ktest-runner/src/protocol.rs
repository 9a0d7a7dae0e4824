// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parser for the line-oriented log protocol spoken by test binaries.
//!
//! Every protocol line has the shape:
//!
//! ```text
//! LOCATION:LINE:FIELD:FIELD[:MESSAGE]
//! ```
//!
//! One of the two fields is a status keyword (`IGNORE`, `PASS`, `FAIL` or `INFO`) and the
//! other is the name of the check. Both `a.c:10:PASS:check_a` and the test framework's
//! native `a.c:10:check_a:PASS` are understood; if both fields happen to be keywords, the
//! first one is the status.
//!
//! `INFO` lines are annotations for the case that follows them. `IGNORE`, `PASS` and `FAIL`
//! lines terminate the current case. Anything else on standard output is noise from the
//! test framework and is skipped.

use crate::errors::DecodeError;
use regex::Regex;
use std::{fmt, iter::FusedIterator, str::Lines, sync::LazyLock};

static LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // The location is matched lazily so that drive prefixes like `C:\src\a.c` are kept
    // intact, and so that colons inside the message never shift the other fields.
    Regex::new(
        r"^(?P<location>.+?):(?P<line>\d+):(?P<first>[^:]*):(?P<second>[^:]*)(?::\s*(?P<message>.*))?$",
    )
    .expect("protocol regex is valid")
});

/// The status of a single test case.
///
/// The declaration order is the report order: ignored cases first, failures last.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CaseStatus {
    /// The case was skipped by the test binary.
    Ignore,

    /// The case passed.
    Pass,

    /// The case failed.
    Fail,
}

impl CaseStatus {
    /// Returns the rank used to order cases in the report.
    pub fn rank(self) -> u8 {
        match self {
            Self::Ignore => 0,
            Self::Pass => 1,
            Self::Fail => 2,
        }
    }

    /// Returns the human-readable text for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "IGNORE",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a protocol line means to the parser.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineKind {
    /// The line terminates a case with the given status.
    Terminal(CaseStatus),

    /// The line annotates the case that follows it.
    Info,
}

impl LineKind {
    fn from_keyword(field: &str) -> Option<Self> {
        match field {
            "IGNORE" => Some(Self::Terminal(CaseStatus::Ignore)),
            "PASS" => Some(Self::Terminal(CaseStatus::Pass)),
            "FAIL" => Some(Self::Terminal(CaseStatus::Fail)),
            "INFO" => Some(Self::Info),
            _ => None,
        }
    }
}

/// A single line of standard output that conforms to the log protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProtocolLine<'a> {
    /// The source file that emitted the line.
    pub location: &'a str,

    /// The source line that emitted the line.
    pub line: u32,

    /// The name of the check.
    pub name: &'a str,

    /// Whether the line terminates a case or annotates one.
    pub kind: LineKind,

    /// The free-text message, if any.
    pub message: Option<&'a str>,
}

impl<'a> ProtocolLine<'a> {
    /// Parses a single line, returning `None` if it does not follow the protocol.
    pub fn parse(input: &'a str) -> Option<Self> {
        let captures = LINE_REGEX.captures(input)?;
        let location = captures.name("location")?.as_str();
        // Line numbers that overflow are not something a real test binary emits.
        let line = captures.name("line")?.as_str().parse().ok()?;
        let first = captures.name("first")?.as_str().trim();
        let second = captures.name("second")?.as_str().trim();

        let (kind, name) = match LineKind::from_keyword(first) {
            Some(kind) => (kind, second),
            None => (LineKind::from_keyword(second)?, first),
        };

        let message = captures
            .name("message")
            .map(|m| m.as_str())
            .filter(|m| !m.is_empty());

        Some(Self {
            location,
            line,
            name,
            kind,
            message,
        })
    }

    /// Returns `LOCATION:LINE` for this line.
    pub fn source_position(&self) -> String {
        format!("{}:{}", self.location, self.line)
    }
}

/// An informational annotation attached to a test case.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdditionalInfo {
    /// `LOCATION:LINE` of the annotation.
    pub location: String,

    /// The annotation text.
    pub message: String,
}

/// One asserted check inside a test binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    /// The source line of the assertion.
    pub line: u32,

    /// The name of the check.
    pub name: String,

    /// The outcome of the check.
    pub status: CaseStatus,

    /// Free-text detail, usually present for failures and ignored cases.
    pub message: Option<String>,

    /// Annotations emitted before the case's terminal line, in emission order.
    pub additional_info: Vec<AdditionalInfo>,
}

/// The accumulator state between protocol lines.
#[derive(Debug, Default)]
enum ParseState {
    /// The previous case was emitted (or nothing has been seen yet).
    #[default]
    Emitted,

    /// Annotations are waiting for their terminal line.
    Accumulating { info: Vec<AdditionalInfo> },
}

impl ParseState {
    /// Feeds one protocol line through the state machine.
    fn step(self, line: ProtocolLine<'_>) -> (Self, Option<TestCase>) {
        let mut info = self.into_info();
        match line.kind {
            LineKind::Info => {
                info.push(AdditionalInfo {
                    location: line.source_position(),
                    message: line.message.unwrap_or(line.name).to_owned(),
                });
                (Self::Accumulating { info }, None)
            }
            LineKind::Terminal(status) => {
                let case = TestCase {
                    line: line.line,
                    name: line.name.to_owned(),
                    status,
                    message: line.message.map(|m| m.to_owned()),
                    additional_info: info,
                };
                (Self::Emitted, Some(case))
            }
        }
    }

    fn into_info(self) -> Vec<AdditionalInfo> {
        match self {
            Self::Emitted => Vec::new(),
            Self::Accumulating { info } => info,
        }
    }
}

/// A lazy, single-pass iterator over the test cases in a blob of standard output.
///
/// Returned by [`parse_cases`]. Collect it if more than one pass is needed.
#[derive(Debug)]
pub struct Cases<'a> {
    lines: Lines<'a>,
    state: ParseState,
}

impl Iterator for Cases<'_> {
    type Item = TestCase;

    fn next(&mut self) -> Option<Self::Item> {
        for raw in self.lines.by_ref() {
            let Some(line) = ProtocolLine::parse(raw) else {
                continue;
            };
            let (state, case) = std::mem::take(&mut self.state).step(line);
            self.state = state;
            if case.is_some() {
                return case;
            }
        }

        if let ParseState::Accumulating { info } = std::mem::take(&mut self.state) {
            tracing::debug!(
                "dropping {} annotation(s) not followed by a terminal line",
                info.len()
            );
        }
        None
    }
}

impl FusedIterator for Cases<'_> {}

/// Parses test cases out of a test binary's standard output.
pub fn parse_cases(stdout: &str) -> Cases<'_> {
    Cases {
        lines: stdout.lines(),
        state: ParseState::Emitted,
    }
}

/// Returns the location of the first protocol line in `stdout`, if any.
pub fn first_location(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .find_map(ProtocolLine::parse)
        .map(|line| line.location)
}

/// Decodes raw standard output as UTF-8.
///
/// Undecodable bytes are an error rather than being replaced.
pub fn decode_output(stdout: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(stdout).map_err(DecodeError::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use swrite::{SWrite, swriteln};
    use test_case::test_case;

    #[test_case(
        "a.c:10:PASS:check_a",
        "a.c", 10, "check_a", LineKind::Terminal(CaseStatus::Pass), None
        ; "keyword first"
    )]
    #[test_case(
        "a.c:10:check_a:PASS",
        "a.c", 10, "check_a", LineKind::Terminal(CaseStatus::Pass), None
        ; "keyword second"
    )]
    #[test_case(
        "b.c:5:FAIL:check_b:boom",
        "b.c", 5, "check_b", LineKind::Terminal(CaseStatus::Fail), Some("boom")
        ; "fail with message"
    )]
    #[test_case(
        "tests/b.c:77:test_alloc:FAIL: Expected 1 Was 2",
        "tests/b.c", 77, "test_alloc", LineKind::Terminal(CaseStatus::Fail), Some("Expected 1 Was 2")
        ; "native order with message"
    )]
    #[test_case(
        "b.c:5:FAIL:check_b:boom: at x:y:z",
        "b.c", 5, "check_b", LineKind::Terminal(CaseStatus::Fail), Some("boom: at x:y:z")
        ; "message keeps colons"
    )]
    #[test_case(
        "b.c:5:FAIL:check_b:  padded  ",
        "b.c", 5, "check_b", LineKind::Terminal(CaseStatus::Fail), Some("padded  ")
        ; "message keeps trailing whitespace"
    )]
    #[test_case(
        "b.c:5:INFO:42:note",
        "b.c", 5, "42", LineKind::Info, Some("note")
        ; "info"
    )]
    #[test_case(
        "c.c:3:test_skip:IGNORE:not on this arch",
        "c.c", 3, "test_skip", LineKind::Terminal(CaseStatus::Ignore), Some("not on this arch")
        ; "ignore"
    )]
    #[test_case(
        r"C:\src\kernel\a.c:12:PASS:check_win",
        r"C:\src\kernel\a.c", 12, "check_win", LineKind::Terminal(CaseStatus::Pass), None
        ; "drive letter"
    )]
    #[test_case(
        "a.c:10:FAIL:check_a:",
        "a.c", 10, "check_a", LineKind::Terminal(CaseStatus::Fail), None
        ; "empty message"
    )]
    #[test_case(
        "a.c:10:PASS:FAIL",
        "a.c", 10, "FAIL", LineKind::Terminal(CaseStatus::Pass), None
        ; "both keywords picks first"
    )]
    fn parse_line(
        input: &str,
        location: &str,
        line: u32,
        name: &str,
        kind: LineKind,
        message: Option<&str>,
    ) {
        let parsed = ProtocolLine::parse(input).expect("line parses");
        assert_eq!(
            parsed,
            ProtocolLine {
                location,
                line,
                name,
                kind,
                message,
            }
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("-----------------------" ; "separator")]
    #[test_case("3 Tests 1 Failures 0 Ignored" ; "summary")]
    #[test_case("LOG: Level: I. Function: kmalloc:42. Message: hi" ; "log line")]
    #[test_case("a.c:10:PASS" ; "missing name field")]
    #[test_case("a.c:x:PASS:check" ; "non-numeric line")]
    #[test_case("a.c:10:pass:check" ; "lowercase keyword")]
    #[test_case("a.c:10:check:OK" ; "unknown keyword")]
    #[test_case("a.c:99999999999:PASS:check" ; "line overflow")]
    fn parse_line_rejects(input: &str) {
        assert_eq!(ProtocolLine::parse(input), None);
    }

    #[test]
    fn info_lines_attach_to_following_case() {
        let stdout = indoc! {"
            Unity test run 1 of 1
            a.c:3:INFO:first:alloc 1
            a.c:4:test_one:INFO: alloc 2
            a.c:5:test_one:PASS
            a.c:9:test_two:FAIL: nope
            a.c:11:INFO:x:only for three
            a.c:12:test_three:IGNORE
            -----------------------
            3 Tests 1 Failures 1 Ignored
        "};

        let cases: Vec<_> = parse_cases(stdout).collect();
        assert_eq!(
            cases,
            vec![
                TestCase {
                    line: 5,
                    name: "test_one".to_owned(),
                    status: CaseStatus::Pass,
                    message: None,
                    additional_info: vec![
                        AdditionalInfo {
                            location: "a.c:3".to_owned(),
                            message: "alloc 1".to_owned(),
                        },
                        AdditionalInfo {
                            location: "a.c:4".to_owned(),
                            message: "alloc 2".to_owned(),
                        },
                    ],
                },
                TestCase {
                    line: 9,
                    name: "test_two".to_owned(),
                    status: CaseStatus::Fail,
                    message: Some("nope".to_owned()),
                    additional_info: vec![],
                },
                TestCase {
                    line: 12,
                    name: "test_three".to_owned(),
                    status: CaseStatus::Ignore,
                    message: None,
                    additional_info: vec![AdditionalInfo {
                        location: "a.c:11".to_owned(),
                        message: "only for three".to_owned(),
                    }],
                },
            ]
        );
    }

    #[test]
    fn info_counts_match_preceding_lines() {
        // Case i is preceded by i INFO lines.
        let mut stdout = String::new();
        for i in 0..6 {
            for j in 0..i {
                swriteln!(stdout, "t.c:{j}:INFO:n:note {i}.{j}");
                stdout.push_str("noise between annotations\n");
            }
            swriteln!(stdout, "t.c:{}:PASS:case_{i}", 100 + i);
        }

        let cases: Vec<_> = parse_cases(&stdout).collect();
        assert_eq!(cases.len(), 6);
        for (i, case) in cases.iter().enumerate() {
            assert_eq!(case.name, format!("case_{i}"));
            assert_eq!(case.additional_info.len(), i, "for case {i}");
        }
    }

    #[test]
    fn trailing_annotations_are_dropped() {
        let stdout = "a.c:1:PASS:one\na.c:2:INFO:x:dangling\n";
        let mut cases = parse_cases(stdout);
        assert_eq!(cases.next().map(|c| c.name), Some("one".to_owned()));
        assert_eq!(cases.next(), None);
        assert_eq!(cases.next(), None);
    }

    #[test]
    fn no_protocol_lines() {
        assert_eq!(parse_cases("hello\nworld\n").count(), 0);
        assert_eq!(parse_cases("").count(), 0);
        assert_eq!(first_location("hello\n"), None);
    }

    #[test]
    fn first_location_skips_noise() {
        let stdout = "banner\nsrc/x.c:4:INFO:a:b\nsrc/y.c:5:PASS:c\n";
        assert_eq!(first_location(stdout), Some("src/x.c"));
    }

    #[test]
    fn crlf_line_endings() {
        let cases: Vec<_> = parse_cases("a.c:1:FAIL:one:bad\r\na.c:2:PASS:two\r\n").collect();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].message.as_deref(), Some("bad"));
        assert_eq!(cases[1].name, "two");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        assert_eq!(decode_output(b"a.c:1:PASS:x\n"), Ok("a.c:1:PASS:x\n"));
        let err = decode_output(&[b'a', 0xc3, 0x28]).unwrap_err();
        assert_eq!(err.valid_up_to(), 1);
    }

    #[test]
    fn status_rank_order() {
        let mut statuses = vec![CaseStatus::Fail, CaseStatus::Ignore, CaseStatus::Pass];
        statuses.sort_by_key(|s| s.rank());
        assert_eq!(
            statuses,
            vec![CaseStatus::Ignore, CaseStatus::Pass, CaseStatus::Fail]
        );
    }
}
