// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests under sanitizer build variants.
//!
//! A variant is a separately built copy of the test binaries, instrumented with one or
//! more sanitizers. Variants are declared by entries named `tests_san_<name>` in a
//! configuration directory, and each variant's binaries live in `tests_san_<name>` under
//! the build directory.
//!
//! For every variant, the [`SanitizerOrchestrator`] triggers a build, then discovers, runs
//! and reports that variant's binaries. A variant that fails to build is skipped. Reports
//! for earlier variants have already been written by then and are unaffected.

use crate::{
    discovery::{FilenamePattern, discover_executables},
    errors::{
        BuildCommandParseError, BuildError, DiscoveryError, SanitizerError, WriteReportError,
    },
    helpers::{DisplayErrorChain, plural},
    reporter::{Reporter, RunStats},
    runner::TestRunner,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{collections::BTreeSet, io, io::Write};

/// The prefix shared by variant definitions and variant build trees.
pub const TESTS_PREFIX: &str = "tests_san_";

/// The placeholder replaced by the variant name in a build command.
pub const VARIANT_PLACEHOLDER: &str = "{variant}";

/// Returns the names of the variants declared in `dir`.
///
/// An entry named `tests_san_asan` or `tests_san_asan.cmake` declares the variant `asan`.
/// A missing directory declares no variants.
pub fn find_variants(dir: &Utf8Path) -> Result<BTreeSet<String>, SanitizerError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("variants directory `{dir}` does not exist");
            return Ok(BTreeSet::new());
        }
        Err(err) => return Err(SanitizerError::new(dir, err)),
    };

    let mut variants = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| SanitizerError::new(dir, err))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            tracing::warn!(
                "skipping non-UTF-8 entry `{}` in `{dir}`",
                file_name.to_string_lossy()
            );
            continue;
        };
        if let Some(variant) = variant_name(file_name) {
            variants.insert(variant.to_owned());
        }
    }
    Ok(variants)
}

fn variant_name(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_prefix(TESTS_PREFIX)?;
    let name = match rest.split_once('.') {
        Some((stem, _)) => stem,
        None => rest,
    };
    (!name.is_empty()).then_some(name)
}

/// Returns the directory holding the binaries of `variant`.
pub fn variant_dir(build_dir: &Utf8Path, variant: &str) -> Utf8PathBuf {
    build_dir.join(format!("{TESTS_PREFIX}{variant}"))
}

/// Builds sanitizer variants.
pub trait BuildTrigger {
    /// Builds `variant`, returning once its binaries are in place.
    fn build(&self, variant: &str) -> Result<(), BuildError>;
}

/// A [`BuildTrigger`] for variants that are already built.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopBuildTrigger;

impl BuildTrigger for NoopBuildTrigger {
    fn build(&self, variant: &str) -> Result<(), BuildError> {
        tracing::debug!("no build command configured, assuming `{variant}` is built");
        Ok(())
    }
}

/// A [`BuildTrigger`] that runs an external command.
///
/// Every occurrence of `{variant}` in the command's words is replaced with the variant name.
/// The command's standard output is redirected to standard error, so that reports remain
/// the only thing written to standard output.
#[derive(Clone, Debug)]
pub struct CommandBuildTrigger {
    argv: Vec<String>,
}

impl CommandBuildTrigger {
    /// Parses `command` with shell quoting rules.
    pub fn new(command: &str) -> Result<Self, BuildCommandParseError> {
        let argv =
            shell_words::split(command).map_err(|err| BuildCommandParseError::ShellWords {
                command: command.to_owned(),
                err,
            })?;
        if argv.is_empty() {
            return Err(BuildCommandParseError::Empty);
        }
        Ok(Self { argv })
    }

    /// Returns the command line for `variant`.
    pub fn argv_for(&self, variant: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|word| word.replace(VARIANT_PLACEHOLDER, variant))
            .collect()
    }
}

impl BuildTrigger for CommandBuildTrigger {
    fn build(&self, variant: &str) -> Result<(), BuildError> {
        let argv = self.argv_for(variant);
        let command = shell_words::join(&argv);
        tracing::info!("building variant `{variant}`: {command}");

        let (program, args) = argv.split_first().expect("argv is non-empty");
        let output = duct::cmd(program, args)
            .stdout_to_stderr()
            .unchecked()
            .run()
            .map_err(|err| BuildError::Exec {
                command: command.clone(),
                err,
            })?;
        if !output.status.success() {
            return Err(BuildError::Failed {
                command,
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }
}

/// What happened to one variant.
#[derive(Debug)]
pub struct VariantOutcome {
    /// The variant name.
    pub variant: String,

    /// The result of the variant's run.
    pub result: VariantResult,
}

/// The result of a variant's run.
#[derive(Debug)]
#[non_exhaustive]
pub enum VariantResult {
    /// The variant was built, run and reported.
    Completed(RunStats),

    /// The build failed, so nothing was run.
    BuildFailed(BuildError),

    /// The variant's build tree could not be read.
    DiscoveryFailed(DiscoveryError),
}

impl VariantOutcome {
    /// Returns true if the variant was built and run.
    pub fn is_completed(&self) -> bool {
        matches!(self.result, VariantResult::Completed(_))
    }

    /// Returns the run statistics, if the variant ran.
    pub fn stats(&self) -> Option<&RunStats> {
        match &self.result {
            VariantResult::Completed(stats) => Some(stats),
            VariantResult::BuildFailed(_) | VariantResult::DiscoveryFailed(_) => None,
        }
    }
}

/// Runs the discover, run and report pipeline once per sanitizer variant.
pub struct SanitizerOrchestrator<'a> {
    build_dir: &'a Utf8Path,
    pattern: &'a FilenamePattern,
    runner: &'a TestRunner,
    reporter: &'a Reporter,
    trigger: &'a dyn BuildTrigger,
}

impl<'a> SanitizerOrchestrator<'a> {
    /// Creates a new orchestrator.
    pub fn new(
        build_dir: &'a Utf8Path,
        pattern: &'a FilenamePattern,
        runner: &'a TestRunner,
        reporter: &'a Reporter,
        trigger: &'a dyn BuildTrigger,
    ) -> Self {
        Self {
            build_dir,
            pattern,
            runner,
            reporter,
            trigger,
        }
    }

    /// Runs every variant in order, writing one report per variant that builds.
    ///
    /// Only errors writing to `writer` stop the loop.
    pub fn run<'v>(
        &self,
        variants: impl IntoIterator<Item = &'v str>,
        writer: &mut dyn Write,
    ) -> Result<Vec<VariantOutcome>, WriteReportError> {
        let mut outcomes = Vec::new();
        for variant in variants {
            let result = self.run_variant(variant, writer)?;
            outcomes.push(VariantOutcome {
                variant: variant.to_owned(),
                result,
            });
        }

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        tracing::debug!(
            "{completed}/{} sanitizer {} completed",
            outcomes.len(),
            plural::variants_str(outcomes.len()),
        );
        Ok(outcomes)
    }

    fn run_variant(
        &self,
        variant: &str,
        writer: &mut dyn Write,
    ) -> Result<VariantResult, WriteReportError> {
        self.reporter.write_variant_banner(variant, writer)?;
        // The banner must precede any build output on the terminal.
        writer.flush()?;

        if let Err(err) = self.trigger.build(variant) {
            tracing::error!("skipping variant `{variant}`: {}", DisplayErrorChain(&err));
            return Ok(VariantResult::BuildFailed(err));
        }

        let tree = variant_dir(self.build_dir, variant);
        let executables = match discover_executables(&tree, self.pattern) {
            Ok(executables) => executables,
            Err(err) => {
                tracing::error!("skipping variant `{variant}`: {}", DisplayErrorChain(&err));
                return Ok(VariantResult::DiscoveryFailed(err));
            }
        };

        let results = self.runner.execute(executables);
        let stats = self.reporter.write_report(&results, writer)?;
        Ok(VariantResult::Completed(stats))
    }
}
