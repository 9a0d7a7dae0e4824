// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use ktest_runner::{
    config::KtestConfig,
    protocol::{AdditionalInfo, CaseStatus},
    reporter::RunStats,
    runner::TestStatus,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn three_binaries(tree: &FixtureTree) {
    tree.printing_script("build/tests/a_tests", &["a.c:10:PASS:check_a"], 0);
    tree.printing_script(
        "build/tests/b_tests",
        &["b.c:5:INFO:42:note", "b.c:5:FAIL:check_b:boom"],
        0,
    );
    tree.printing_script("build/tests/c_tests", &[], 1);
}

#[test]
fn run_and_report() -> Result<()> {
    let tree = FixtureTree::new();
    three_binaries(&tree);

    let paths = tree.discover("build");
    ensure!(paths.len() == 3, "expected 3 binaries, found {paths:?}");

    let results = runner(None).execute(paths);
    let stats = RunStats::new(results.tests());
    assert_eq!(stats.cases(), 2);
    assert_eq!(stats.terminated, 1);

    let a = find_test(&results, "a_tests");
    assert_eq!(a.status, TestStatus::Ok);
    assert_eq!(a.source_file.as_deref(), Some("a.c"));
    assert_eq!(a.cases.len(), 1);
    assert_eq!(a.cases[0].name, "check_a");
    assert_eq!(a.cases[0].status, CaseStatus::Pass);
    assert_eq!(a.cases[0].message, None);

    let b = find_test(&results, "b_tests");
    assert_eq!(b.status, TestStatus::Ok);
    assert_eq!(b.cases.len(), 1);
    assert_eq!(b.cases[0].status, CaseStatus::Fail);
    assert_eq!(b.cases[0].message.as_deref(), Some("boom"));
    assert_eq!(
        b.cases[0].additional_info,
        vec![AdditionalInfo {
            location: "b.c:5".to_owned(),
            message: "note".to_owned(),
        }]
    );

    let c = find_test(&results, "c_tests");
    assert_eq!(c.status, TestStatus::Terminated);
    assert!(c.cases.is_empty());
    assert_eq!(c.source_file, None);
    assert_eq!(c.describe_outcome().as_deref(), Some("exited with code 1"));

    let reporter = plain_reporter(tree.root());
    let mut out = Vec::new();
    reporter.write_case_table(results.tests(), &mut out)?;
    assert_eq!(
        String::from_utf8(out)?,
        indoc! {"
            PASS  a.c:10  check_a
            FAIL  b.c:5   check_b  boom
        "}
    );

    // c_tests has neither cases nor a diagnostic, so it is only counted in the summary.
    let mut out = Vec::new();
    reporter.write_terminated(results.tests(), &mut out)?;
    assert_eq!(String::from_utf8(out)?, "");

    let mut out = Vec::new();
    reporter.write_summary(&stats, None, &mut out)?;
    assert_eq!(
        String::from_utf8(out)?,
        "\nSummary 3 binaries run, 2 cases: 1 passed, 1 failed, 0 ignored, \
         1 binary terminated\n"
    );

    Ok(())
}

#[test]
fn killed_binary() -> Result<()> {
    let tree = FixtureTree::new();
    let killed = tree.script("build/killed_tests", "kill -9 $$");
    let exit_137 = tree.script("build/oom_tests", "exit 137");

    let results = runner(None).execute([killed, exit_137]);
    let [killed, exit_137] = results.tests() else {
        panic!("expected two tests, got {:?}", results.tests());
    };

    assert_eq!(killed.status, TestStatus::Terminated);
    assert!(killed.cases.is_empty());
    assert_eq!(
        killed.describe_outcome().as_deref(),
        Some("killed by signal 9 (SIGKILL)")
    );

    assert_eq!(exit_137.status, TestStatus::Terminated);
    assert!(exit_137.cases.is_empty());
    assert_eq!(
        exit_137.describe_outcome().as_deref(),
        Some("exited with code 137")
    );

    Ok(())
}

#[test]
fn crash_after_cases_is_drilled_down() -> Result<()> {
    let tree = FixtureTree::new();
    tree.script(
        "build/tests/d_tests",
        indoc! {r#"
            echo "d.c:3:PASS:first"
            echo "d.c:8:INFO:8:about to dereference"
            echo "d.c:9:check_second:FAIL:got 3"
            echo "d.c:12:INFO:12:never finished"
            exit 2
        "#},
    );

    let results = runner(None).execute(tree.discover("build"));
    let d = find_test(&results, "d_tests");
    assert_eq!(d.status, TestStatus::Terminated);
    assert_eq!(d.cases.len(), 2);

    let mut out = Vec::new();
    plain_reporter(tree.root()).write_terminated(results.tests(), &mut out)?;
    assert_eq!(
        String::from_utf8(out)?,
        indoc! {"

            Terminated tests:
            d.c (exited with code 2)
                first:3
                check_second:9
                    d.c:8: about to dereference
        "}
    );

    Ok(())
}

#[test]
fn spawn_failure_is_isolated() -> Result<()> {
    let tree = FixtureTree::new();
    let good = tree.printing_script("build/a_tests", &["a.c:1:PASS:ok"], 0);
    let missing = tree.root().join("build/gone_tests");

    let results = runner(None).execute([missing.clone(), good]);
    assert_eq!(results.tests().len(), 2);

    let gone = &results.tests()[0];
    assert_eq!(gone.exec_path, missing);
    assert_eq!(gone.status, TestStatus::Terminated);
    let diagnostic = gone.diagnostic.as_deref().unwrap_or_default();
    ensure!(
        diagnostic.starts_with("failed to spawn: "),
        "unexpected diagnostic: {diagnostic}"
    );

    assert_eq!(results.tests()[1].status, TestStatus::Ok);
    assert_eq!(results.tests()[1].cases.len(), 1);

    Ok(())
}

#[test]
fn timeout_terminates() -> Result<()> {
    let tree = FixtureTree::new();
    let slow = tree.script(
        "build/slow_tests",
        indoc! {r#"
            echo "slow.c:1:PASS:before_sleep"
            exec sleep 30
        "#},
    );

    let results = runner(Some(Duration::from_millis(200))).execute([slow]);
    let slow = &results.tests()[0];
    assert_eq!(slow.status, TestStatus::Terminated);
    assert_eq!(slow.diagnostic.as_deref(), Some("timed out after 200ms"));
    // Output written before the timeout is kept.
    assert_eq!(slow.cases.len(), 1);
    ensure!(
        results.elapsed() < Duration::from_secs(10),
        "run took {:?}",
        results.elapsed()
    );

    Ok(())
}

#[test]
fn sanitizer_output_and_environment() -> Result<()> {
    let tree = FixtureTree::new();
    tree.script(
        "build/noisy_tests",
        indoc! {r#"
            echo "n.c:1:PASS:fine"
            printf 'ASAN_OPTIONS=%s\n' "$ASAN_OPTIONS" >&2
            printf 'KTEST=%s\n' "$KTEST" >&2
            exit 0
        "#},
    );
    tree.printing_script("build/quiet_tests", &[], 3);

    let results = runner(None).execute(tree.discover("build"));
    let noisy = find_test(&results, "noisy_tests");
    assert_eq!(noisy.status, TestStatus::Ok);

    let asan_options = KtestConfig::default_config()
        .sanitizers()
        .env()
        .get("ASAN_OPTIONS")
        .expect("default config sets ASAN_OPTIONS")
        .to_owned();
    let expected_stderr = format!("ASAN_OPTIONS={asan_options}\nKTEST=1\n");
    assert_eq!(std::str::from_utf8(&noisy.sanitizer_output)?, expected_stderr);

    let mut out = Vec::new();
    plain_reporter(tree.root()).write_sanitizer_output(results.tests(), &mut out)?;
    assert_eq!(
        String::from_utf8(out)?,
        format!("\nSanitizer output:\nn.c\n{expected_stderr}")
    );

    Ok(())
}

#[test]
fn undecodable_stdout() -> Result<()> {
    let tree = FixtureTree::new();
    let bad = tree.script("build/bad_tests", r"printf 'a.c:1:PASS:x\n\377\n'");

    let results = runner(None).execute([bad]);
    let bad = &results.tests()[0];
    assert_eq!(bad.status, TestStatus::Terminated);
    assert!(bad.cases.is_empty());
    assert_eq!(
        bad.diagnostic.as_deref(),
        Some("standard output is not valid UTF-8 (valid up to byte 13)")
    );

    Ok(())
}
