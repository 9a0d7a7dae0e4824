// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use ktest_runner::{
    config::{KtestConfig, TestThreads},
    discovery::{DEFAULT_PATTERN, FilenamePattern, discover_executables},
    reporter::{Reporter, Styles},
    runner::{RunResults, Test, TestRunner, TestRunnerBuilder},
};
use std::{fs, os::unix::fs::PermissionsExt, time::Duration};

/// A temporary build tree populated with shell-script test binaries.
pub(crate) struct FixtureTree {
    dir: Utf8TempDir,
}

impl FixtureTree {
    pub(crate) fn new() -> Self {
        Self {
            dir: camino_tempfile::tempdir().expect("tempdir created"),
        }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Writes an executable script at `rel_path` that runs `body` under `/bin/sh`.
    pub(crate) fn script(&self, rel_path: &str, body: &str) -> Utf8PathBuf {
        let path = self.root().join(rel_path);
        fs::create_dir_all(path.parent().expect("path has a parent")).unwrap();
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Writes a script that prints `stdout` and exits with `exit_code`.
    pub(crate) fn printing_script(
        &self,
        rel_path: &str,
        stdout: &[&str],
        exit_code: i32,
    ) -> Utf8PathBuf {
        let mut body = String::new();
        for line in stdout {
            body.push_str("printf '%s\\n' '");
            body.push_str(line);
            body.push_str("'\n");
        }
        body.push_str("exit ");
        body.push_str(&exit_code.to_string());
        self.script(rel_path, &body)
    }

    /// Discovers test binaries under `rel_dir` with the default pattern.
    pub(crate) fn discover(&self, rel_dir: &str) -> Vec<Utf8PathBuf> {
        let pattern = FilenamePattern::new(DEFAULT_PATTERN).unwrap();
        let mut found: Vec<_> = discover_executables(&self.root().join(rel_dir), &pattern)
            .expect("build tree is readable")
            .collect();
        found.sort();
        found
    }
}

pub(crate) fn runner(timeout: Option<Duration>) -> TestRunner {
    let config = KtestConfig::default_config();
    TestRunnerBuilder::default()
        .set_test_threads(TestThreads::Count(4))
        .set_timeout(timeout)
        .set_sanitizer_env(config.sanitizers().env().clone())
        .build()
        .expect("runner built")
}

pub(crate) fn plain_reporter(base_dir: &Utf8Path) -> Reporter {
    Reporter::new(Styles::default(), Some(base_dir.to_owned()))
}

pub(crate) fn find_test<'a>(results: &'a RunResults, file_name: &str) -> &'a Test {
    results
        .tests()
        .iter()
        .find(|test| test.exec_path.file_name() == Some(file_name))
        .unwrap_or_else(|| panic!("test `{file_name}` was run"))
}
