// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The package and test file status model.
//!
//! Every package and every test output file carries a [`TestStatus`]: a [`TestStatusKind`]
//! together with an elapsed time. Statuses start out as [`TestStatusKind::Unknown`] and only
//! move forward through [`TestStatusKind::apply`]. `Failed` and `Indeterminate` are terminal.
//!
//! File statuses are changed through their owning [`PackageTestRecord`], which forwards the same
//! incoming status to the package's aggregate status.

use crate::errors::StatusTransitionError;
use camino::{Utf8Path, Utf8PathBuf};
use pkgtest_metadata::{PackageSummary, TestFileSummary, TestStatusSummary};
use std::{collections::BTreeMap, fmt};
use tracing::debug;

/// Elapsed time reserved for indeterminate statuses.
pub const INDETERMINATE_ELAPSED: f64 = -1.0;

/// The status of a package or of a test output file.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum TestStatusKind {
    /// No verdict yet. This is the only legal initial status.
    #[default]
    Unknown,

    /// Ran to completion and agreed with the reference.
    Ok,

    /// Crashed, or disagreed with the reference.
    Failed,

    /// Could not be judged, typically because the reference itself failed.
    Indeterminate,
}

impl TestStatusKind {
    /// Computes the status that results from applying `incoming` to `self`.
    ///
    /// | current       | `Ok`    | `Failed` | `Indeterminate` |
    /// |---------------|---------|----------|-----------------|
    /// | Unknown       | Ok      | Failed   | Indeterminate   |
    /// | Ok            | Ok      | Failed   | Indeterminate   |
    /// | Failed        | illegal | Failed   | illegal         |
    /// | Indeterminate | illegal | illegal  | Indeterminate   |
    ///
    /// Transitioning back to `Unknown` is always illegal.
    pub fn apply(self, incoming: TestStatusKind) -> Result<TestStatusKind, StatusTransitionError> {
        use TestStatusKind::*;

        match (self, incoming) {
            (Unknown | Ok, Ok | Failed | Indeterminate)
            | (Failed, Failed)
            | (Indeterminate, Indeterminate) => std::result::Result::Ok(incoming),
            _ => Err(StatusTransitionError {
                current: self,
                incoming,
            }),
        }
    }

    /// Returns true if no other status can be reached from this one.
    pub fn is_terminal(self) -> bool {
        matches!(self, TestStatusKind::Failed | TestStatusKind::Indeterminate)
    }

    /// Returns the upper-case name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        self.to_summary().as_str()
    }

    /// Converts this status into its serializable form.
    pub fn to_summary(self) -> TestStatusSummary {
        match self {
            TestStatusKind::Unknown => TestStatusSummary::Unknown,
            TestStatusKind::Ok => TestStatusSummary::Ok,
            TestStatusKind::Failed => TestStatusSummary::Failed,
            TestStatusKind::Indeterminate => TestStatusSummary::Indeterminate,
        }
    }
}

impl fmt::Display for TestStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status together with the time the tests took.
///
/// The elapsed time is -1.0 if and only if the status is indeterminate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TestStatus {
    kind: TestStatusKind,
    elapsed_seconds: f64,
}

impl Default for TestStatus {
    fn default() -> Self {
        Self {
            kind: TestStatusKind::Unknown,
            elapsed_seconds: 0.0,
        }
    }
}

impl TestStatus {
    fn with_kind(kind: TestStatusKind) -> Self {
        let mut status = Self::default();
        status.kind = kind;
        if kind == TestStatusKind::Indeterminate {
            status.elapsed_seconds = INDETERMINATE_ELAPSED;
        }
        status
    }

    /// Returns the current status.
    pub fn kind(&self) -> TestStatusKind {
        self.kind
    }

    /// Returns the elapsed time in seconds, or -1.0 if indeterminate.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Applies `incoming` according to [`TestStatusKind::apply`].
    pub fn transition(&mut self, incoming: TestStatusKind) -> Result<(), StatusTransitionError> {
        self.kind = self.kind.apply(incoming)?;
        if self.kind == TestStatusKind::Indeterminate {
            self.elapsed_seconds = INDETERMINATE_ELAPSED;
        }
        Ok(())
    }

    /// Records the elapsed time.
    ///
    /// Ignored for indeterminate statuses and for negative or non-finite times, since -1.0 is
    /// reserved to mean indeterminate. Returns true if the time was recorded.
    pub fn set_elapsed_seconds(&mut self, seconds: f64) -> bool {
        if self.kind == TestStatusKind::Indeterminate || !seconds.is_finite() || seconds < 0.0 {
            return false;
        }
        self.elapsed_seconds = seconds;
        true
    }
}

/// Passed, skipped and failed test counts for a test output file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TestReport {
    /// Number of tests that passed.
    pub passed: i64,

    /// Number of tests that were skipped.
    pub skipped: i64,

    /// Number of tests that failed.
    pub failed: i64,
}

impl TestReport {
    /// Counts that have not been computed yet.
    pub const NOT_COMPUTED: Self = Self::new(-1, -1, -1);

    /// Creates a new report.
    pub const fn new(passed: i64, skipped: i64, failed: i64) -> Self {
        Self {
            passed,
            skipped,
            failed,
        }
    }

    /// Returns the number of tests that were executed, or `None` if the sum overflows.
    pub fn total(&self) -> Option<i64> {
        self.passed
            .checked_add(self.skipped)?
            .checked_add(self.failed)
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.passed, self.skipped, self.failed)
    }
}

/// How a discovered test output file ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputOutcome {
    /// The test file ran to completion. Its content has not been verified yet.
    Completed,

    /// The run left a `.fail` marker for the test file.
    Crashed,
}

/// One test output file of a package.
#[derive(Clone, Debug)]
pub struct TestFileRecord {
    relative_path: String,
    absolute_path: Utf8PathBuf,
    status: TestStatus,
    report: TestReport,
}

impl TestFileRecord {
    /// Creates a record for a freshly discovered output file.
    ///
    /// A completed file is provisionally `Ok` and counted as one skipped test until it has been
    /// compared. A crashed file is `Failed` with one failed test.
    pub fn new(
        relative_path: impl Into<String>,
        absolute_path: impl Into<Utf8PathBuf>,
        outcome: OutputOutcome,
    ) -> Self {
        let (kind, report) = match outcome {
            OutputOutcome::Completed => (TestStatusKind::Ok, TestReport::new(0, 1, 0)),
            OutputOutcome::Crashed => (TestStatusKind::Failed, TestReport::new(0, 0, 1)),
        };
        Self {
            relative_path: relative_path.into(),
            absolute_path: absolute_path.into(),
            status: TestStatus::with_kind(kind),
            report,
        }
    }

    /// Returns the path relative to the package's output directory.
    ///
    /// For crashed files this is the name without the `.fail` extension.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Returns the location of the file on disk.
    pub fn absolute_path(&self) -> &Utf8Path {
        &self.absolute_path
    }

    /// Returns the file's status.
    pub fn status(&self) -> TestStatusKind {
        self.status.kind()
    }

    /// Returns the file's elapsed time, or -1.0 if indeterminate.
    pub fn elapsed_seconds(&self) -> f64 {
        self.status.elapsed_seconds()
    }

    /// Returns the file's test counts.
    pub fn report(&self) -> TestReport {
        self.report
    }

    /// Replaces the file's test counts.
    pub fn set_report(&mut self, report: TestReport) {
        self.report = report;
    }

    /// Returns the serializable form of this record.
    pub fn to_summary(&self) -> TestFileSummary {
        TestFileSummary {
            status: self.status().to_summary(),
            passed: self.report.passed,
            skipped: self.report.skipped,
            failed: self.report.failed,
        }
    }
}

/// All test output files of one package, plus the package's aggregate status.
#[derive(Clone, Debug, Default)]
pub struct PackageTestRecord {
    status: TestStatus,
    files: BTreeMap<String, TestFileRecord>,
}

impl PackageTestRecord {
    /// Creates an empty record with `Unknown` status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the package's aggregate status.
    pub fn status(&self) -> TestStatusKind {
        self.status.kind()
    }

    /// Returns the package's elapsed time, or -1.0 if indeterminate.
    pub fn elapsed_seconds(&self) -> f64 {
        self.status.elapsed_seconds()
    }

    /// Records the time the package's tests took. See [`TestStatus::set_elapsed_seconds`].
    pub fn set_elapsed_seconds(&mut self, seconds: f64) -> bool {
        self.status.set_elapsed_seconds(seconds)
    }

    /// Returns the package's test output files, ordered by relative path.
    pub fn files(&self) -> &BTreeMap<String, TestFileRecord> {
        &self.files
    }

    /// Returns the file record at `relative_path`, if any.
    pub fn file(&self, relative_path: &str) -> Option<&TestFileRecord> {
        self.files.get(relative_path)
    }

    /// Returns a mutable reference to the file record at `relative_path`, for updating its report.
    pub fn file_mut(&mut self, relative_path: &str) -> Option<&mut TestFileRecord> {
        self.files.get_mut(relative_path)
    }

    /// Returns the crashed files of this package.
    pub fn crashed_files(&self) -> impl Iterator<Item = &TestFileRecord> + '_ {
        self.files
            .values()
            .filter(|file| file.status() == TestStatusKind::Failed)
    }

    /// Adds a discovered file, replacing any earlier record at the same relative path.
    pub fn insert_file(&mut self, file: TestFileRecord) {
        self.files.insert(file.relative_path.clone(), file);
    }

    /// Escalates the package's aggregate status.
    ///
    /// Once the package is `Failed` or `Indeterminate` its verdict is settled: a different
    /// incoming status is recorded in the debug log and otherwise dropped, so this never attempts
    /// an illegal transition.
    pub fn escalate(&mut self, incoming: TestStatusKind) -> Result<(), StatusTransitionError> {
        let current = self.status.kind();
        if current.is_terminal() && current != incoming {
            debug!("package status stays {current} (not applying {incoming})");
            return Ok(());
        }
        self.status.transition(incoming)
    }

    /// Sets the status of the file at `relative_path`, then escalates the package status with the
    /// same incoming value.
    ///
    /// The file-level transition is strict: an illegal file transition is returned as an error
    /// and leaves both the file and the package untouched. Setting the status of a file that
    /// doesn't exist is a no-op.
    pub fn set_file_status(
        &mut self,
        relative_path: &str,
        incoming: TestStatusKind,
    ) -> Result<(), StatusTransitionError> {
        let Some(file) = self.files.get_mut(relative_path) else {
            return Ok(());
        };
        file.status.transition(incoming)?;
        self.escalate(incoming)
    }

    /// Promotes an `Unknown` package to `Ok`. Any other status is left alone.
    pub fn promote_unknown(&mut self) -> Result<(), StatusTransitionError> {
        if self.status.kind() == TestStatusKind::Unknown {
            self.status.transition(TestStatusKind::Ok)?;
        }
        Ok(())
    }

    /// Returns the serializable form of this record.
    pub fn to_summary(&self) -> PackageSummary {
        PackageSummary {
            status: self.status().to_summary(),
            elapsed_seconds: self.elapsed_seconds(),
            files: self
                .files
                .iter()
                .map(|(path, file)| (path.clone(), file.to_summary()))
                .collect(),
        }
    }
}

/// Per-package test records for one interpreter, keyed by package name.
#[derive(Clone, Debug, Default)]
pub struct TestLedger {
    packages: BTreeMap<String, PackageTestRecord>,
}

impl TestLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `package`, creating it on first reference.
    pub fn get_or_create(&mut self, package: &str) -> &mut PackageTestRecord {
        self.packages.entry(package.to_owned()).or_default()
    }

    /// Returns the record for `package`, if any.
    pub fn get(&self, package: &str) -> Option<&PackageTestRecord> {
        self.packages.get(package)
    }

    /// Returns a mutable reference to the record for `package`, if any.
    pub fn get_mut(&mut self, package: &str) -> Option<&mut PackageTestRecord> {
        self.packages.get_mut(package)
    }

    /// Returns true if a record exists for `package`.
    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }

    /// Iterates over packages in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageTestRecord)> + '_ {
        self.packages
            .iter()
            .map(|(name, record)| (name.as_str(), record))
    }

    /// Returns the package names in order.
    pub fn package_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.packages.keys().map(String::as_str)
    }

    /// Returns the number of packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns true if there are no packages.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Returns true if any package's status is not `Ok`.
    pub fn any_not_ok(&self) -> bool {
        self.packages
            .values()
            .any(|record| record.status() != TestStatusKind::Ok)
    }
}
