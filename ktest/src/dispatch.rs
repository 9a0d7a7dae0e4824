// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level application and command routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::Utf8PathBuf;
use clap::{Args, Subcommand};
use itertools::Itertools;
use ktest_runner::{
    config::{KtestConfig, TestThreads},
    discovery::{DEFAULT_PATTERN, FilenamePattern, discover_executables},
    exit_codes::KtestExitCode,
    helpers::plural,
    reporter::Reporter,
    runner::{TestRunner, TestRunnerBuilder},
    sanitizer::{
        BuildTrigger, CommandBuildTrigger, NoopBuildTrigger, SanitizerOrchestrator,
        find_variants,
    },
};
use std::time::Duration;

/// Runs native test binaries and reports the test cases they print.
#[derive(Debug, clap::Parser)]
#[command(
    name = "ktest",
    version,
    styles = crate::output::clap_styles(),
    max_term_width = 100,
)]
pub struct KtestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl KtestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::Run(opts) => opts.exec(output, output_writer),
            Command::Sanitizers(opts) => opts.exec(output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover, run and report the test binaries in a build directory.
    Run(RunOpts),
    /// Build every sanitizer variant and run its test binaries.
    ///
    /// Variants are declared by entries named `tests_san_<name>` in the variants directory
    /// (by default the build directory). The binaries of each variant are expected in
    /// `<build-dir>/tests_san_<name>`.
    ///
    /// If every variant fails to build, ktest exits with code 101 even without
    /// --fail-on-error, since nothing was tested.
    Sanitizers(SanitizersOpts),
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Directory that contains the test binaries
    #[arg(short = 'd', long, value_name = "DIR", default_value = "./build")]
    build_dir: Utf8PathBuf,

    /// Filename pattern of test binaries
    #[arg(short = 'p', long, value_name = "GLOB", default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// Config file [default: .config/ktest.toml if present]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[clap(flatten)]
    runner_opts: RunnerOpts,
}

/// Options that override the `[run]` section of the config.
#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of test binaries to run simultaneously [default: num-cpus]
    #[arg(
        long,
        short = 'j',
        visible_alias = "jobs",
        value_name = "N",
        env = "KTEST_TEST_THREADS",
        allow_negative_numbers = true
    )]
    test_threads: Option<TestThreads>,

    /// Kill test binaries that run longer than this, e.g. "30s" or "2m"
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Exit with a non-zero code if any case fails or any binary terminates abnormally
    #[arg(long)]
    fail_on_error: bool,
}

/// Settings resolved from the config file and the command line.
struct BaseApp {
    cwd: Utf8PathBuf,
    build_dir: Utf8PathBuf,
    pattern: FilenamePattern,
    config: KtestConfig,
    fail_on_error: bool,
    runner: TestRunner,
    reporter: Reporter,
}

impl BaseApp {
    fn new(common: CommonOpts, output: OutputContext) -> Result<Self> {
        let cwd = current_dir()?;
        let config = KtestConfig::from_sources(&cwd, common.config_file.as_deref())?;
        let pattern = FilenamePattern::new(&common.pattern)?;

        let run = config.run();
        let test_threads = common
            .runner_opts
            .test_threads
            .unwrap_or_else(|| run.test_threads());
        let timeout = common.runner_opts.timeout.or_else(|| run.timeout());
        let fail_on_error = common.runner_opts.fail_on_error || run.fail_on_error();

        let runner = TestRunnerBuilder::default()
            .set_test_threads(test_threads)
            .set_timeout(timeout)
            .set_sanitizer_env(config.sanitizers().env().clone())
            .build()?;
        tracing::debug!(
            "running up to {} test {} at once",
            runner.test_threads(),
            plural::binaries_str(runner.test_threads()),
        );

        let reporter = Reporter::new(output.stdout_styles(), Some(cwd.clone()));

        Ok(Self {
            cwd,
            build_dir: common.build_dir,
            pattern,
            config,
            fail_on_error,
            runner,
            reporter,
        })
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    common: CommonOpts,
}

impl RunOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let app = BaseApp::new(self.common, output)?;

        let executables = discover_executables(&app.build_dir, &app.pattern)?;
        let results = app.runner.execute(executables);
        if results.tests().is_empty() {
            tracing::warn!(
                "no test binaries matching `{}` found in `{}`",
                app.pattern.as_str(),
                app.build_dir,
            );
        }

        let mut writer = output_writer.stdout_writer();
        let stats = app.reporter.write_report(&results, &mut writer)?;

        if app.fail_on_error && stats.has_failures() {
            return Err(ExpectedError::TestRunFailed);
        }
        Ok(KtestExitCode::OK)
    }
}

#[derive(Debug, Args)]
struct SanitizersOpts {
    #[clap(flatten)]
    common: CommonOpts,

    /// Directory that declares the sanitizer variants [default: the build directory]
    #[arg(long, value_name = "DIR")]
    variants_dir: Option<Utf8PathBuf>,

    /// Command that builds one variant, with `{variant}` standing for its name
    #[arg(long, value_name = "COMMAND")]
    build_command: Option<String>,
}

impl SanitizersOpts {
    fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let Self {
            common,
            variants_dir,
            build_command,
        } = self;
        let app = BaseApp::new(common, output)?;
        let sanitizers = app.config.sanitizers();

        let variants_dir = variants_dir
            .or_else(|| sanitizers.variants_dir().map(|dir| app.cwd.join(dir)))
            .unwrap_or_else(|| app.build_dir.clone());
        let variants = find_variants(&variants_dir)?;
        if variants.is_empty() {
            tracing::warn!("no sanitizer variants declared in `{variants_dir}`");
            return Ok(KtestExitCode::OK);
        }
        tracing::info!(
            "found {} sanitizer {}: {}",
            variants.len(),
            plural::variants_str(variants.len()),
            variants.iter().join(", "),
        );

        let build_command = build_command
            .as_deref()
            .or_else(|| sanitizers.build_command());
        let trigger: Box<dyn BuildTrigger> = match build_command {
            Some(command) => Box::new(CommandBuildTrigger::new(command)?),
            None => Box::new(NoopBuildTrigger),
        };

        let orchestrator = SanitizerOrchestrator::new(
            &app.build_dir,
            &app.pattern,
            &app.runner,
            &app.reporter,
            trigger.as_ref(),
        );
        let mut writer = output_writer.stdout_writer();
        let outcomes = orchestrator.run(variants.iter().map(String::as_str), &mut writer)?;

        if outcomes.iter().all(|outcome| !outcome.is_completed()) {
            return Err(ExpectedError::AllVariantsFailed {
                variants: outcomes.into_iter().map(|outcome| outcome.variant).collect(),
            });
        }

        let failed = outcomes
            .iter()
            .any(|outcome| outcome.stats().is_none_or(|stats| stats.has_failures()));
        if app.fail_on_error && failed {
            return Err(ExpectedError::TestRunFailed);
        }
        Ok(KtestExitCode::OK)
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::CurrentDirNotUtf8 {
        path: err.into_path_buf(),
    })
}
