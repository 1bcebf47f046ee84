// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of the line-oriented output stream of an install and test run.
//!
//! The stream is a sequence of newline-terminated lines. A handful of control lines switch the
//! parser between [`StreamMode`]s; within each mode a small set of line matchers extracts events.
//! Events update an [`InstallLedger`] and a [`TestLedger`].

use crate::{
    errors::{PackageListWriteError, StreamReadError},
    helpers::{plural, strip_newline},
    status::TestLedger,
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::{
    collections::BTreeMap,
    fmt,
    io::{BufRead, Write},
    sync::LazyLock,
};
use tracing::{debug, info, warn};

static BEGIN_PROCESSING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^BEGIN processing:\s*(?P<package>[a-zA-Z0-9.-]+)").unwrap());
static TESTING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<marker>BEGIN|END) testing:\s*(?P<package>[a-zA-Z0-9.-]+)").unwrap()
});
static TEST_TIME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^TEST_TIME:\s*(?P<package>[a-zA-Z0-9.-]+) (?P<time>[0-9.-]+)").unwrap()
});
static INSTALL_STATUS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<package>[a-zA-Z0-9.-]+):\s*(?P<status>OK|FAILED)").unwrap()
});

/// The parser's mode register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum StreamMode {
    /// No control line has been seen yet, or the install status block has ended.
    #[default]
    Idle,

    /// Packages are being installed. Output is collected per package for diagnostics.
    Installing,

    /// The per-package install status block is being read.
    ReadingInstallStatus,

    /// Package tests are running.
    Testing,
}

impl StreamMode {
    /// Returns the mode after `control`, or `None` if `control` doesn't apply in this mode and the
    /// line should be treated as ordinary output.
    ///
    /// The three `BEGIN` control lines apply in every mode. `END install status` only ends the
    /// install status block.
    pub fn after(self, control: ControlLine) -> Option<StreamMode> {
        match (self, control) {
            (_, ControlLine::BeginInstallation) => Some(StreamMode::Installing),
            (_, ControlLine::BeginInstallStatus) => Some(StreamMode::ReadingInstallStatus),
            (_, ControlLine::BeginTests) => Some(StreamMode::Testing),
            (StreamMode::ReadingInstallStatus, ControlLine::EndInstallStatus) => {
                Some(StreamMode::Idle)
            }
            (
                StreamMode::Idle | StreamMode::Installing | StreamMode::Testing,
                ControlLine::EndInstallStatus,
            ) => None,
        }
    }
}

/// A line that switches the parser's mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlLine {
    /// `BEGIN package installation`
    BeginInstallation,

    /// `BEGIN install status`
    BeginInstallStatus,

    /// `END install status`
    EndInstallStatus,

    /// `BEGIN package tests`
    BeginTests,
}

impl ControlLine {
    /// Recognizes a control line. `line` must not have a trailing newline.
    pub fn parse(line: &str) -> Option<Self> {
        match line {
            "BEGIN package installation" => Some(ControlLine::BeginInstallation),
            "BEGIN install status" => Some(ControlLine::BeginInstallStatus),
            "END install status" => Some(ControlLine::EndInstallStatus),
            "BEGIN package tests" => Some(ControlLine::BeginTests),
            _ => None,
        }
    }
}

/// What a single line of the stream meant.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The parser switched modes.
    ModeChanged(StreamMode),

    /// Installation of a package began.
    InstallStarted {
        /// The package being installed.
        package: String,
    },

    /// A line was appended to the install log of the package being installed.
    InstallOutput,

    /// The install status of a package was reported.
    InstallStatus {
        /// The package.
        package: String,

        /// True if the install succeeded.
        succeeded: bool,
    },

    /// Tests for a package started.
    TestingStarted {
        /// The package.
        package: String,
    },

    /// Tests for a package finished. Its output directory has been scanned.
    TestingFinished {
        /// The package.
        package: String,
    },

    /// The time a package's tests took was reported.
    TestTime {
        /// The package.
        package: String,

        /// The time as written in the stream.
        time: String,
    },

    /// The line had no meaning in the current mode.
    Ignored,
}

/// Install outcomes per package, plus the output each install produced.
#[derive(Clone, Debug, Default)]
pub struct InstallLedger {
    outcomes: BTreeMap<String, bool>,
    install_logs: BTreeMap<String, String>,
}

impl InstallLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the install outcome of `package`. A later report for the same package wins.
    pub fn record(&mut self, package: &str, succeeded: bool) {
        self.outcomes.insert(package.to_owned(), succeeded);
    }

    /// Iterates over packages and their outcomes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.outcomes
            .iter()
            .map(|(package, succeeded)| (package.as_str(), *succeeded))
    }

    /// Returns the packages that installed successfully, in name order.
    ///
    /// These are the packages the reference run is given.
    pub fn succeeded(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter()
            .filter_map(|(package, succeeded)| succeeded.then_some(package))
    }

    /// Returns the packages that failed to install, in name order.
    pub fn failed(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter()
            .filter_map(|(package, succeeded)| (!succeeded).then_some(package))
    }

    /// Returns true if any package failed to install.
    pub fn any_failed(&self) -> bool {
        self.outcomes.values().any(|succeeded| !succeeded)
    }

    /// Returns true if exactly one package was installed and it failed.
    ///
    /// There is nothing to compare in that case, so the reference run is skipped.
    pub fn is_single_failure(&self) -> bool {
        self.outcomes.len() == 1 && self.any_failed()
    }

    /// Returns the output collected while `package` was installed.
    pub fn install_log(&self, package: &str) -> Option<&str> {
        self.install_logs.get(package).map(String::as_str)
    }

    /// Returns the number of packages with a reported outcome.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true if no outcome was reported.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns the outcomes as a map, for serialization.
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.outcomes.clone()
    }

    /// Writes the successfully installed packages to `path`, one per line.
    pub fn write_package_list(&self, path: &Utf8Path) -> Result<(), PackageListWriteError> {
        let mut contents = String::new();
        for package in self.succeeded() {
            contents.push_str(package);
            contents.push('\n');
        }
        AtomicFile::new(path, AllowOverwrite)
            .write(|f| f.write_all(contents.as_bytes()))
            .map_err(|error| PackageListWriteError::new(path, error))?;
        debug!("wrote package list to {path}");
        Ok(())
    }

    fn start_install_log(&mut self, package: &str) {
        self.install_logs.insert(package.to_owned(), String::new());
    }

    fn append_install_log(&mut self, package: &str, line: &str) {
        if let Some(log) = self.install_logs.get_mut(package) {
            log.push_str(line);
        }
    }
}

/// Consumes the output stream of an install and test run one line at a time.
#[derive(Debug)]
pub struct StreamEventParser {
    under_test_root: Utf8PathBuf,
    mode: StreamMode,
    current_install: Option<String>,
    install: InstallLedger,
    tests: TestLedger,
}

impl StreamEventParser {
    /// Creates a parser. Package output directories are looked up under `under_test_root`.
    pub fn new(under_test_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            under_test_root: under_test_root.into(),
            mode: StreamMode::Idle,
            current_install: None,
            install: InstallLedger::new(),
            tests: TestLedger::new(),
        }
    }

    /// Returns the current mode.
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Returns the install outcomes seen so far.
    pub fn install_ledger(&self) -> &InstallLedger {
        &self.install
    }

    /// Returns the test records built so far.
    pub fn test_ledger(&self) -> &TestLedger {
        &self.tests
    }

    /// Consumes the parser, returning the install outcomes and test records.
    pub fn into_parts(self) -> (InstallLedger, TestLedger) {
        (self.install, self.tests)
    }

    /// Reads `reader` to the end, consuming every line. Invalid UTF-8 is replaced.
    pub fn consume_reader(
        &mut self,
        mut reader: impl BufRead,
        source_name: &str,
    ) -> Result<(), StreamReadError> {
        let mut buf = Vec::new();
        let mut line_count = 0_usize;
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| StreamReadError::new(source_name, err))?;
            if read == 0 {
                break;
            }
            self.consume_line(&String::from_utf8_lossy(&buf));
            line_count += 1;
        }
        debug!(
            "consumed {line_count} lines from {source_name}, saw {} {}",
            self.tests.len(),
            plural::packages_str(self.tests.len()),
        );
        Ok(())
    }

    /// Consumes one line of output. `line` may include its trailing newline.
    pub fn consume_line(&mut self, line: &str) -> StreamEvent {
        let stripped = strip_newline(line);
        info!("subprocess output: {stripped}");

        if let Some(mode) = ControlLine::parse(stripped).and_then(|control| self.mode.after(control))
        {
            self.mode = mode;
            return StreamEvent::ModeChanged(mode);
        }

        match self.mode {
            StreamMode::Idle => StreamEvent::Ignored,
            StreamMode::Installing => self.consume_install_line(line),
            StreamMode::ReadingInstallStatus => self.consume_install_status_line(stripped),
            StreamMode::Testing => self.consume_test_line(stripped),
        }
    }

    fn consume_install_line(&mut self, line: &str) -> StreamEvent {
        let mut event = StreamEvent::Ignored;
        if let Some(captures) = BEGIN_PROCESSING_REGEX.captures(line) {
            let package = &captures["package"];
            self.install.start_install_log(package);
            self.current_install = Some(package.to_owned());
            event = StreamEvent::InstallStarted {
                package: package.to_owned(),
            };
        }
        if let Some(package) = &self.current_install {
            self.install.append_install_log(package, line);
            if event == StreamEvent::Ignored {
                event = StreamEvent::InstallOutput;
            }
        }
        event
    }

    fn consume_install_status_line(&mut self, line: &str) -> StreamEvent {
        let Some(captures) = INSTALL_STATUS_REGEX.captures(line) else {
            return StreamEvent::Ignored;
        };
        let package = &captures["package"];
        let succeeded = &captures["status"] == "OK";
        self.install.record(package, succeeded);
        if !succeeded {
            if let Some(log) = self.install.install_log(package) {
                info!("{package}: install failed\n{log}");
            }
        }
        StreamEvent::InstallStatus {
            package: package.to_owned(),
            succeeded,
        }
    }

    fn consume_test_line(&mut self, line: &str) -> StreamEvent {
        if let Some(captures) = TESTING_REGEX.captures(line) {
            let package = captures["package"].to_owned();
            if &captures["marker"] == "END" {
                let package_dir = self.under_test_root.join(&package);
                self.tests.discover(&package, &package_dir);
                return StreamEvent::TestingFinished { package };
            }
            return StreamEvent::TestingStarted { package };
        }

        if let Some(captures) = TEST_TIME_REGEX.captures(line) {
            let package = &captures["package"];
            let time = &captures["time"];
            self.record_test_time(package, time);
            return StreamEvent::TestTime {
                package: package.to_owned(),
                time: time.to_owned(),
            };
        }

        StreamEvent::Ignored
    }

    fn record_test_time(&mut self, package: &str, time: &str) {
        let seconds: f64 = match time.parse() {
            Ok(seconds) => seconds,
            Err(_) => {
                warn!("{package}: ignoring unparsable test time `{time}`");
                return;
            }
        };
        let record = self.tests.get_or_create(package);
        if !record.set_elapsed_seconds(seconds) {
            warn!(
                "{package}: ignoring test time {time} (package status is {})",
                record.status()
            );
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamMode::Idle => "idle",
            StreamMode::Installing => "installing",
            StreamMode::ReadingInstallStatus => "reading install status",
            StreamMode::Testing => "testing",
        };
        f.write_str(name)
    }
}
