// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use ktest_runner::{
    discovery::{DEFAULT_PATTERN, FilenamePattern},
    errors::BuildError,
    sanitizer::{CommandBuildTrigger, SanitizerOrchestrator, VariantResult, find_variants},
};
use pretty_assertions::assert_eq;

#[test]
fn variants_run_in_order_and_build_failures_are_skipped() -> Result<()> {
    let tree = FixtureTree::new();
    let build_dir = tree.root().join("build");

    // Variant declarations.
    std::fs::create_dir_all(tree.root().join("sanitizers"))?;
    for name in [
        "tests_san_asan.cmake",
        "tests_san_broken.cmake",
        "tests_san_ubsan.cmake",
    ] {
        std::fs::write(tree.root().join("sanitizers").join(name), "")?;
    }

    // Prebuilt variant trees. The build command below only checks the variant name.
    tree.printing_script(
        "build/tests_san_asan/tests/lib/slist_tests",
        &["slist.c:4:PASS:push_front"],
        0,
    );
    tree.script(
        "build/tests_san_ubsan/tests/lib/slist_tests",
        r#"echo "slist.c:9:PASS:pop_back"; echo "slist.c:12: runtime error: signed integer overflow" >&2"#,
    );

    let variants = find_variants(&tree.root().join("sanitizers"))?;
    assert_eq!(
        variants.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["asan", "broken", "ubsan"]
    );

    let pattern = FilenamePattern::new(DEFAULT_PATTERN)?;
    let runner = runner(None);
    let reporter = plain_reporter(&build_dir);
    let trigger = CommandBuildTrigger::new("sh -c 'test {variant} != broken'")?;
    let orchestrator =
        SanitizerOrchestrator::new(&build_dir, &pattern, &runner, &reporter, &trigger);

    let mut out = Vec::new();
    let outcomes = orchestrator.run(variants.iter().map(String::as_str), &mut out)?;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].variant, "asan");
    assert_eq!(outcomes[0].stats().map(|s| s.passed), Some(1));
    assert_eq!(outcomes[1].variant, "broken");
    assert!(
        matches!(
            &outcomes[1].result,
            VariantResult::BuildFailed(BuildError::Failed {
                exit_code: Some(1),
                ..
            })
        ),
        "unexpected result: {:?}",
        outcomes[1].result
    );
    assert_eq!(outcomes[2].variant, "ubsan");
    let ubsan = outcomes[2].stats().expect("ubsan ran");
    assert_eq!(ubsan.passed, 1);
    assert_eq!(ubsan.with_sanitizer_output, 1);

    let out = String::from_utf8(out)?;
    let asan_at = out.find("Running sanitizers for asan").expect("asan banner");
    let broken_at = out.find("Running sanitizers for broken").expect("broken banner");
    let ubsan_at = out.find("Running sanitizers for ubsan").expect("ubsan banner");
    assert!(asan_at < broken_at && broken_at < ubsan_at);

    // The asan report is complete before the broken variant starts.
    let asan_report = &out[asan_at..broken_at];
    assert!(asan_report.contains("PASS  slist.c:4  push_front"));
    assert!(asan_report.contains("Summary"));

    // Nothing is reported for the broken variant.
    assert!(!out[broken_at..ubsan_at].contains("Summary"));

    let ubsan_report = &out[ubsan_at..];
    assert!(ubsan_report.contains("Sanitizer output:"));
    assert!(ubsan_report.contains("slist.c:12: runtime error: signed integer overflow"));

    Ok(())
}

#[test]
fn missing_variant_tree_is_an_empty_run() -> Result<()> {
    let tree = FixtureTree::new();
    let build_dir = tree.root().join("build");

    let pattern = FilenamePattern::new(DEFAULT_PATTERN)?;
    let runner = runner(None);
    let reporter = plain_reporter(&build_dir);
    let trigger = ktest_runner::sanitizer::NoopBuildTrigger;
    let orchestrator =
        SanitizerOrchestrator::new(&build_dir, &pattern, &runner, &reporter, &trigger);

    let mut out = Vec::new();
    let outcomes = orchestrator.run(["msan"], &mut out)?;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].stats().map(|s| s.binaries), Some(0));

    Ok(())
}
