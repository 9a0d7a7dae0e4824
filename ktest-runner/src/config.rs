// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ktest configuration.
//!
//! Configuration is layered: the built-in defaults from `default-config.toml` come first,
//! followed by an optional user file (`.config/ktest.toml` under the working directory, or
//! an explicit path). Command-line flags are applied on top by the caller.

use crate::errors::{ConfigParseError, TestThreadsParseError};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::{cmp::Ordering, collections::BTreeSet, fmt, str::FromStr, time::Duration};

/// Overall ktest configuration.
#[derive(Clone, Debug)]
pub struct KtestConfig {
    run: RunConfig,
    sanitizers: SanitizersConfig,
}

impl KtestConfig {
    /// The default location of the config within the working directory.
    pub const CONFIG_PATH: &'static str = ".config/ktest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User-provided config is layered on top of this.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file` if provided, otherwise from
    /// [`Self::CONFIG_PATH`] under `cwd` if that file exists.
    ///
    /// Unknown keys are logged as warnings and otherwise ignored.
    pub fn from_sources(
        cwd: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let config_file = match config_file {
            Some(file) => Some(file.to_owned()),
            None => {
                let file = cwd.join(Self::CONFIG_PATH);
                file.is_file().then_some(file)
            }
        };

        let mut builder = Self::make_default_config();
        if let Some(file) = &config_file {
            tracing::debug!("reading ktest config from `{file}`");
            builder = builder.add_source(File::new(file.as_str(), FileFormat::Toml));
        }

        Self::build_and_deserialize(builder, config_file.as_deref())
    }

    /// Returns the built-in default configuration.
    pub fn default_config() -> Self {
        Self::build_and_deserialize(Self::make_default_config(), None)
            .expect("default config is always valid")
    }

    /// Returns the settings of the `[run]` section.
    pub fn run(&self) -> &RunConfig {
        &self.run
    }

    /// Returns the settings of the `[sanitizers]` section.
    pub fn sanitizers(&self) -> &SanitizersConfig {
        &self.sanitizers
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize(
        builder: ConfigBuilder<DefaultState>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let config = builder
            .build()
            .map_err(|err| ConfigParseError::new(config_file, err))?;

        let mut unknown = BTreeSet::new();
        let deserialized: KtestConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .map_err(|err| ConfigParseError::new(config_file, err))?;

        if !unknown.is_empty() {
            let source = match config_file {
                Some(file) => format!("`{file}`"),
                None => "the default config".to_owned(),
            };
            tracing::warn!(
                "ignoring unknown configuration keys in {source}: {}",
                unknown.iter().join(", ")
            );
        }

        Ok(deserialized.into_config())
    }
}

/// Settings that control how test binaries are run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    test_threads: TestThreads,
    timeout: Option<Duration>,
    fail_on_error: bool,
}

impl RunConfig {
    /// The number of test binaries to run simultaneously.
    pub fn test_threads(&self) -> TestThreads {
        self.test_threads
    }

    /// The wall-clock limit for a single test binary, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether failures should be reflected in the process exit code.
    pub fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }
}

/// Settings for sanitizer runs.
#[derive(Clone, Debug)]
pub struct SanitizersConfig {
    variants_dir: Option<Utf8PathBuf>,
    build_command: Option<String>,
    env: SanitizerEnv,
}

impl SanitizersConfig {
    /// The directory scanned for variant definitions, if it differs from the build directory.
    pub fn variants_dir(&self) -> Option<&Utf8Path> {
        self.variants_dir.as_deref()
    }

    /// The command template used to build a variant.
    pub fn build_command(&self) -> Option<&str> {
        self.build_command.as_deref()
    }

    /// The environment applied to every test binary.
    pub fn env(&self) -> &SanitizerEnv {
        &self.env
    }
}

/// Environment variables that configure the sanitizer runtimes of a test binary.
///
/// The environment is fixed once the config is loaded and is applied to every child
/// process in addition to the inherited environment. Variable names are normalized to
/// upper case.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SanitizerEnv {
    vars: IndexMap<String, String>,
}

impl SanitizerEnv {
    /// Creates a new environment from name-value pairs. Later names override earlier ones.
    pub fn new<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(name, value)| (name.as_ref().to_ascii_uppercase(), value.into()))
                .collect(),
        }
    }

    /// Returns the value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Iterates over the variables in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns true if no variables are set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub(crate) fn apply(&self, command: &mut std::process::Command) {
        command.envs(self.vars.iter());
    }
}

/// Type for the test-threads config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run with a specified number of concurrent test binaries.
    Count(usize),

    /// Run as many test binaries at once as there are logical CPUs.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of test threads computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<isize>() {
            Err(_) | Ok(0) => Err(TestThreadsParseError::new(s)),
            Ok(j) if j < 0 => Ok(TestThreads::Count(
                (get_num_cpus() as isize + j).max(1) as usize,
            )),
            Ok(j) => Ok(TestThreads::Count(j as usize)),
        }
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a non-zero integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(TestThreads::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // TOML integers are i64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => Ok(TestThreads::Count(v as usize)),
                    Ordering::Less => Ok(TestThreads::Count(
                        (get_num_cpus() as i64 + v).max(1) as usize,
                    )),
                    Ordering::Equal => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match i64::try_from(v) {
                    Ok(v) => self.visit_i64(v),
                    Err(_) => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|err| {
            tracing::warn!("unable to determine the number of CPUs, assuming 1: {err}");
            1
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct KtestConfigDeserialize {
    run: RunConfigDeserialize,
    sanitizers: SanitizersConfigDeserialize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunConfigDeserialize {
    test_threads: TestThreads,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    fail_on_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SanitizersConfigDeserialize {
    #[serde(default)]
    variants_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    build_command: Option<String>,
    #[serde(default)]
    env: IndexMap<String, String>,
}

impl KtestConfigDeserialize {
    fn into_config(self) -> KtestConfig {
        let Self { run, sanitizers } = self;
        KtestConfig {
            run: RunConfig {
                test_threads: run.test_threads,
                timeout: run.timeout,
                fail_on_error: run.fail_on_error,
            },
            sanitizers: SanitizersConfig {
                variants_dir: sanitizers.variants_dir,
                build_command: sanitizers.build_command,
                env: SanitizerEnv::new(sanitizers.env),
            },
        }
    }
}
