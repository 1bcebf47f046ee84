// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciliation of the interpreter under test's outputs against the reference outputs.
//!
//! The reference run is authoritative: every package and file it produced is looked up in the
//! outputs under test. Per file, the engine either reads framework summaries on both sides and
//! compares the number of tests executed, or falls back to a [`LineComparator`]. The results drive
//! the status model in [`crate::status`], and are finally persisted by [`crate::report`].

use crate::{
    compare::{CompareInput, ComparisonVerdict, FilterSelector, LineComparator},
    config::{PkgtestConfig, RuntimeRole},
    errors::{FrameworkParseError, ReconcileError, StatusTransitionError},
    framework::{FrameworkDetection, detect_summary},
    helpers::{FileContents, plural, read_lines},
    report::write_reports,
    status::{PackageTestRecord, TestFileRecord, TestLedger, TestReport, TestStatusKind},
    stream::InstallLedger,
};
use camino::Utf8Path;
use itertools::Itertools;
use pkgtest_metadata::ReconcileSummary;
use tracing::{debug, info, warn};

/// Reconciles test outputs of the interpreter under test against the reference outputs.
pub struct ReconciliationEngine<'a> {
    config: &'a PkgtestConfig,
    comparator: &'a dyn LineComparator,
    filters: &'a dyn FilterSelector,
}

impl<'a> ReconciliationEngine<'a> {
    /// Creates a new engine.
    pub fn new(
        config: &'a PkgtestConfig,
        comparator: &'a dyn LineComparator,
        filters: &'a dyn FilterSelector,
    ) -> Self {
        Self {
            config,
            comparator,
            filters,
        }
    }

    /// Discovers the reference outputs of every package in `under_test`.
    pub fn discover_reference(&self, under_test: &TestLedger) -> TestLedger {
        let mut reference = TestLedger::new();
        for package in under_test.package_names() {
            reference.discover(
                package,
                &self.config.package_dir(RuntimeRole::Reference, package),
            );
        }
        reference
    }

    /// Discovers the reference outputs of `under_test`'s packages, then reconciles and persists
    /// reports for every package the reference run produced.
    pub fn run(&self, under_test: &mut TestLedger) -> Result<(), ReconcileError> {
        let reference = self.discover_reference(under_test);
        self.reconcile(under_test, &reference)
    }

    /// Reconciles `under_test` against `reference`, writing reports for every package in
    /// `reference`.
    ///
    /// Packages under test that the reference run didn't produce are left alone.
    pub fn reconcile(
        &self,
        under_test: &mut TestLedger,
        reference: &TestLedger,
    ) -> Result<(), ReconcileError> {
        debug!(
            "reconciling {} {}",
            reference.len(),
            plural::packages_str(reference.len()),
        );
        for (package, reference_record) in reference.iter() {
            info!("BEGIN checking {package}");
            let record = under_test.get_or_create(package);
            self.reconcile_package(package, record, reference_record)
                .map_err(|err| ReconcileError::invariant_violation(package, err))?;

            let package_dir = self.config.package_dir(RuntimeRole::UnderTest, package);
            if package_dir.is_dir() {
                write_reports(&package_dir, record).map_err(|err| ReconcileError::ReportWrite {
                    package: package.to_owned(),
                    err,
                })?;
            } else {
                warn!("{package}: no output directory at {package_dir}, not writing reports");
            }
            info!("END checking {package}");
        }
        Ok(())
    }

    fn reconcile_package(
        &self,
        package: &str,
        record: &mut PackageTestRecord,
        reference: &PackageTestRecord,
    ) -> Result<(), StatusTransitionError> {
        let count = reference.files().len();
        debug!("{package}: checking {count} {}", plural::files_str(count));

        // A crash on the reference side usually means a missing system dependency. It doesn't
        // fail the package on its own.
        let reference_crashed: Vec<_> = reference.crashed_files().collect();
        if !reference_crashed.is_empty() {
            info!(
                "{package}: reference test had .fail outputs: {}\n{}",
                reference_crashed.iter().map(|f| f.absolute_path()).join(", "),
                reference_crashed
                    .iter()
                    .map(|f| FileContents::read(f.absolute_path()))
                    .join(""),
            );
        }

        let crashed: Vec<_> = record.crashed_files().collect();
        if !crashed.is_empty() {
            info!(
                "{package}: test under test had .fail outputs: {}\n{}",
                crashed.iter().map(|f| f.absolute_path()).join(", "),
                crashed
                    .iter()
                    .map(|f| FileContents::read(f.absolute_path()))
                    .join(""),
            );
            record.escalate(TestStatusKind::Failed)?;
        }

        for (relative_path, reference_file) in reference.files() {
            let Some(file) = record.file(relative_path) else {
                info!("{package}: missing output file: {relative_path}");
                record.escalate(TestStatusKind::Failed)?;
                continue;
            };

            if reference_file.status() == TestStatusKind::Failed {
                if file.status() == TestStatusKind::Failed {
                    debug!("{package}: {relative_path} failed on both sides");
                } else {
                    record.set_file_status(relative_path, TestStatusKind::Indeterminate)?;
                }
                continue;
            }

            // A crash marker is already a verdict.
            if file.status() == TestStatusKind::Failed {
                continue;
            }

            let (kind, report) = self.compare_file(package, relative_path, file, reference_file);
            if let Some(file) = record.file_mut(relative_path) {
                file.set_report(report);
            }
            record.set_file_status(relative_path, kind)?;
        }

        for relative_path in outputs_without_reference(record, reference) {
            info!("{package}: no reference output for {relative_path}");
        }

        record.promote_unknown()
    }

    fn compare_file(
        &self,
        package: &str,
        relative_path: &str,
        file: &TestFileRecord,
        reference_file: &TestFileRecord,
    ) -> (TestStatusKind, TestReport) {
        let candidate_path = file.absolute_path();
        let reference_path = reference_file.absolute_path();
        let candidate_lines = read_lines(candidate_path);
        let reference_lines = read_lines(reference_path);
        let file_name = Utf8Path::new(relative_path)
            .file_name()
            .unwrap_or(relative_path);

        let summary_verdict = match detect_summary(file_name, &candidate_lines) {
            FrameworkDetection::NotDetected => None,
            FrameworkDetection::Detected { framework, result } => {
                match detect_summary(file_name, &reference_lines).report() {
                    Some(reference_report) => Some(compare_summaries(result, reference_report)),
                    None => {
                        info!(
                            "{package}: no usable {framework} summary in reference output \
                             {relative_path}, comparing lines instead"
                        );
                        None
                    }
                }
            }
        };

        let (kind, report, mismatch) = match summary_verdict {
            Some(verdict) => verdict,
            None => {
                let filters = self.filters.select_filters(package);
                let comparison = self.comparator.compare(&CompareInput {
                    reference_lines: &reference_lines,
                    candidate_lines: &candidate_lines,
                    reference_path,
                    candidate_path,
                    filters: &filters,
                    dump_preprocessed: self.config.dump_preprocessed(),
                });
                let report = TestReport::new(comparison.passed, 0, comparison.failed);
                match comparison.verdict {
                    ComparisonVerdict::Malformed => {
                        info!("{package}: content malformed: {relative_path}");
                        // Nothing is known about the tests in there: count the file as one skip.
                        (TestStatusKind::Indeterminate, TestReport::new(0, 1, 0), true)
                    }
                    ComparisonVerdict::Mismatch => {
                        info!("{package}: output mismatch: {relative_path}");
                        info!("    output mismatch file: {candidate_path}");
                        info!("    output mismatch file: {reference_path}");
                        (TestStatusKind::Failed, report, true)
                    }
                    ComparisonVerdict::Match => (TestStatusKind::Ok, report, false),
                }
            }
        };

        if mismatch && self.config.log_mismatched_output() {
            info!(
                "{}{}",
                FileContents::from_lines(reference_path, &reference_lines),
                FileContents::from_lines(candidate_path, &candidate_lines),
            );
        }
        (kind, report)
    }
}

/// Returns the outputs under test that have no reference counterpart, in path order.
///
/// These are never compared. Their status stays what discovery recorded.
fn outputs_without_reference<'a>(
    record: &'a PackageTestRecord,
    reference: &PackageTestRecord,
) -> Vec<&'a str> {
    record
        .files()
        .keys()
        .filter(|relative_path| reference.file(relative_path).is_none())
        .map(String::as_str)
        .collect()
}

/// Compares the framework summary under test with the reference summary by the total number of
/// tests executed. Returns the verdict, the counts to report, and whether the outputs should be
/// logged.
fn compare_summaries(
    candidate: Result<TestReport, FrameworkParseError>,
    reference: TestReport,
) -> (TestStatusKind, TestReport, bool) {
    // Counts under test can't be trusted: charge everything the reference ran as failed.
    let penalty = TestReport::new(
        0,
        reference.skipped,
        reference.passed.saturating_add(reference.failed),
    );

    let candidate = match candidate {
        Ok(candidate) => candidate,
        Err(error) => {
            info!("interpreter under test reported invalid numbers of executed tests: {error}");
            return (TestStatusKind::Failed, penalty, true);
        }
    };

    let (Some(total), Some(reference_total)) = (candidate.total(), reference.total()) else {
        info!(
            "number of executed tests out of range: under test = {candidate} vs. \
             reference = {reference}"
        );
        return (TestStatusKind::Failed, penalty, true);
    };
    if total == reference_total {
        return (TestStatusKind::Ok, candidate, false);
    }

    info!(
        "different number of tests executed: under test = {total} vs. reference = {reference_total}"
    );
    if total > reference_total {
        (TestStatusKind::Failed, penalty, true)
    } else {
        // Tests that didn't run count as failures.
        let report = TestReport::new(
            candidate.passed,
            candidate.skipped,
            candidate
                .failed
                .saturating_add(reference_total.saturating_sub(total)),
        );
        (TestStatusKind::Failed, report, true)
    }
}

/// Builds the serializable summary of a run.
pub fn summarize(install: Option<&InstallLedger>, tests: &TestLedger) -> ReconcileSummary {
    ReconcileSummary {
        install_status: install.map(InstallLedger::to_map).unwrap_or_default(),
        packages: tests
            .iter()
            .map(|(package, record)| (package.to_owned(), record.to_summary()))
            .collect(),
    }
}

/// Logs the final status of every package.
pub fn log_test_status(tests: &TestLedger) {
    info!("Test Status");
    for (package, record) in tests.iter() {
        info!("{package}: {}", record.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{LineComparison, NoFilters};
    use camino_tempfile::{Utf8TempDir, tempdir};
    use camino_tempfile_ext::prelude::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    const PACKAGE: &str = "pkg";

    /// A comparator that always returns the same result.
    struct FixedComparator {
        result: LineComparison,
        calls: Cell<usize>,
    }

    impl FixedComparator {
        fn new(code: i32, passed: i64, failed: i64) -> Self {
            Self {
                result: LineComparison::from_result_code(code, passed, failed),
                calls: Cell::new(0),
            }
        }
    }

    impl LineComparator for FixedComparator {
        fn compare(&self, _input: &CompareInput<'_>) -> LineComparison {
            self.calls.set(self.calls.get() + 1);
            self.result
        }
    }

    struct Fixture {
        temp: Utf8TempDir,
        config: PkgtestConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let config = PkgtestConfig::default_config(temp.path());
            Self { temp, config }
        }

        fn under_test(&self, path: &str, contents: &str) -> &Self {
            self.temp
                .child(format!("test.fastr/{PACKAGE}/{path}"))
                .write_str(contents)
                .unwrap();
            self
        }

        fn reference(&self, path: &str, contents: &str) -> &Self {
            self.temp
                .child(format!("test.gnur/{PACKAGE}/{path}"))
                .write_str(contents)
                .unwrap();
            self
        }

        fn run(&self, comparator: &dyn LineComparator) -> TestLedger {
            let mut ledger = TestLedger::new();
            ledger.discover(
                PACKAGE,
                &self.config.package_dir(RuntimeRole::UnderTest, PACKAGE),
            );
            ReconciliationEngine::new(&self.config, comparator, &NoFilters)
                .run(&mut ledger)
                .unwrap();
            ledger
        }
    }

    fn file_result(ledger: &TestLedger, path: &str) -> (TestStatusKind, TestReport) {
        let file = ledger.get(PACKAGE).unwrap().file(path).unwrap();
        (file.status(), file.report())
    }

    fn package_status(ledger: &TestLedger) -> TestStatusKind {
        ledger.get(PACKAGE).unwrap().status()
    }

    fn testthat(fail: i64, skip: i64, pass: i64) -> String {
        format!("> test_check(\"pkg\")\n[ FAIL {fail} | WARN 0 | SKIP {skip} | PASS {pass} ]\n")
    }

    #[test]
    fn equal_totals_keep_counts_under_test() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/testthat.Rout", &testthat(1, 1, 8))
            .reference("tests/testthat.Rout", &testthat(2, 1, 7));
        let comparator = FixedComparator::new(0, 0, 0);

        let ledger = fixture.run(&comparator);
        assert_eq!(
            file_result(&ledger, "tests/testthat.Rout"),
            (TestStatusKind::Ok, TestReport::new(8, 1, 1))
        );
        assert_eq!(package_status(&ledger), TestStatusKind::Ok);
        assert_eq!(comparator.calls.get(), 0);
    }

    #[test]
    fn shortfall_counts_as_failures() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/testthat.Rout", &testthat(1, 1, 5))
            .reference("tests/testthat.Rout", &testthat(2, 1, 7));

        let ledger = fixture.run(&FixedComparator::new(0, 0, 0));
        assert_eq!(
            file_result(&ledger, "tests/testthat.Rout"),
            (TestStatusKind::Failed, TestReport::new(5, 1, 4))
        );
        assert_eq!(package_status(&ledger), TestStatusKind::Failed);
    }

    #[test]
    fn surplus_is_penalized_with_reference_counts() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/testthat.Rout", &testthat(0, 1, 12))
            .reference("tests/testthat.Rout", &testthat(2, 1, 7));

        let ledger = fixture.run(&FixedComparator::new(0, 0, 0));
        assert_eq!(
            file_result(&ledger, "tests/testthat.Rout"),
            (TestStatusKind::Failed, TestReport::new(0, 1, 9))
        );
    }

    #[test]
    fn unparsable_summary_under_test_is_penalized() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/testthat.Rout", "Error: test_check failed\n")
            .reference("tests/testthat.Rout", &testthat(2, 1, 7));

        let ledger = fixture.run(&FixedComparator::new(0, 0, 0));
        assert_eq!(
            file_result(&ledger, "tests/testthat.Rout"),
            (TestStatusKind::Failed, TestReport::new(0, 1, 9))
        );
    }

    #[test]
    fn unusable_reference_summary_falls_back_to_line_comparison() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/testthat.Rout", &testthat(0, 0, 3))
            .reference("tests/testthat.Rout", "no summary here\n");
        let comparator = FixedComparator::new(0, 4, 0);

        let ledger = fixture.run(&comparator);
        assert_eq!(comparator.calls.get(), 1);
        assert_eq!(
            file_result(&ledger, "tests/testthat.Rout"),
            (TestStatusKind::Ok, TestReport::new(4, 0, 0))
        );
    }

    #[test]
    fn crash_marker_under_test_fails_package_without_comparison() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout.fail", "Error: segfault\n")
            .under_test("tests/b.Rout", "> 1\n")
            .reference("tests/a.Rout", "> 1\n")
            .reference("tests/b.Rout", "> 1\n");
        let comparator = FixedComparator::new(0, 1, 0);

        let ledger = fixture.run(&comparator);
        assert_eq!(package_status(&ledger), TestStatusKind::Failed);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout"),
            (TestStatusKind::Failed, TestReport::new(0, 0, 1))
        );
        assert_eq!(
            file_result(&ledger, "tests/b.Rout"),
            (TestStatusKind::Ok, TestReport::new(1, 0, 0))
        );
        assert_eq!(comparator.calls.get(), 1);
    }

    #[test]
    fn missing_output_under_test_fails_package() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "> 1\n")
            .reference("tests/a.Rout", "> 1\n")
            .reference("tests/b.Rout", "> 2\n");

        let ledger = fixture.run(&FixedComparator::new(0, 1, 0));
        assert_eq!(package_status(&ledger), TestStatusKind::Failed);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout"),
            (TestStatusKind::Ok, TestReport::new(1, 0, 0))
        );
    }

    #[test]
    fn reference_crash_makes_file_indeterminate() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "> 1\n")
            .reference("tests/a.Rout.fail", "Error: missing libxml2\n");

        let ledger = fixture.run(&FixedComparator::new(0, 1, 0));
        let record = ledger.get(PACKAGE).unwrap();
        assert_eq!(record.status(), TestStatusKind::Indeterminate);
        assert_eq!(record.elapsed_seconds(), -1.0);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout"),
            (TestStatusKind::Indeterminate, TestReport::new(0, 1, 0))
        );
    }

    #[test]
    fn crash_on_both_sides_stays_failed() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout.fail", "Error\n")
            .reference("tests/a.Rout.fail", "Error\n");

        let ledger = fixture.run(&FixedComparator::new(0, 1, 0));
        assert_eq!(package_status(&ledger), TestStatusKind::Failed);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout").0,
            TestStatusKind::Failed
        );
    }

    #[test]
    fn malformed_comparison_is_indeterminate() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "garbage\n")
            .reference("tests/a.Rout", "garbage\n");

        let ledger = fixture.run(&FixedComparator::new(-1, 0, 0));
        assert_eq!(package_status(&ledger), TestStatusKind::Indeterminate);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout"),
            (TestStatusKind::Indeterminate, TestReport::new(0, 1, 0))
        );
    }

    #[test]
    fn mismatch_fails_file_and_package() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "> 1\n[1] 2\n")
            .reference("tests/a.Rout", "> 1\n[1] 1\n");

        let ledger = fixture.run(&FixedComparator::new(1, 3, 2));
        assert_eq!(package_status(&ledger), TestStatusKind::Failed);
        assert_eq!(
            file_result(&ledger, "tests/a.Rout"),
            (TestStatusKind::Failed, TestReport::new(3, 0, 2))
        );
    }

    #[test]
    fn package_without_reference_stays_unknown() {
        let fixture = Fixture::new();
        fixture.under_test("tests/a.Rout", "> 1\n");

        let ledger = fixture.run(&FixedComparator::new(0, 1, 0));
        assert_eq!(package_status(&ledger), TestStatusKind::Unknown);
        assert!(ledger.any_not_ok());
        assert!(
            !fixture
                .config
                .package_dir(RuntimeRole::UnderTest, PACKAGE)
                .join(crate::report::TESTFILE_STATUS_FILE_NAME)
                .exists()
        );
    }

    #[test]
    fn outputs_without_reference_are_listed_but_not_compared() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "> 1\n[1] 1\n")
            .under_test("tests/extra.Rout", "> 2\n[1] 2\n")
            .reference("tests/a.Rout", "> 1\n[1] 1\n");
        let comparator = FixedComparator::new(0, 1, 0);

        let ledger = fixture.run(&comparator);
        assert_eq!(comparator.calls.get(), 1);
        assert_eq!(
            file_result(&ledger, "tests/extra.Rout"),
            (TestStatusKind::Ok, TestReport::new(0, 1, 0))
        );
        assert_eq!(package_status(&ledger), TestStatusKind::Ok);

        let mut reference = TestLedger::new();
        reference.discover(
            PACKAGE,
            &fixture.config.package_dir(RuntimeRole::Reference, PACKAGE),
        );
        assert_eq!(
            outputs_without_reference(
                ledger.get(PACKAGE).unwrap(),
                reference.get(PACKAGE).unwrap()
            ),
            vec!["tests/extra.Rout"]
        );
    }

    #[test]
    fn overflowing_summary_under_test_is_penalized() {
        let line = "[ FAIL 9223372036854775807 | WARN 0 | SKIP 0 | PASS 9223372036854775807 ]";
        let FrameworkDetection::Detected { result, .. } =
            detect_summary("testthat.Rout", &[line.to_owned()])
        else {
            panic!("testthat summary should be detected");
        };
        assert!(result.is_err());

        assert_eq!(
            compare_summaries(result, TestReport::new(1, 0, 0)),
            (TestStatusKind::Failed, TestReport::new(0, 0, 1), true)
        );
    }

    #[test]
    fn out_of_range_totals_are_penalized() {
        let candidate = TestReport::new(i64::MAX, 0, 1);
        assert_eq!(
            compare_summaries(Ok(candidate), TestReport::new(2, 1, 3)),
            (TestStatusKind::Failed, TestReport::new(0, 1, 5), true)
        );
    }

    #[test]
    fn summary_reflects_ledgers() {
        let fixture = Fixture::new();
        fixture
            .under_test("tests/a.Rout", "> 1\n")
            .reference("tests/a.Rout", "> 1\n");
        let ledger = fixture.run(&FixedComparator::new(0, 1, 0));

        let mut install = InstallLedger::new();
        install.record(PACKAGE, true);
        let summary = summarize(Some(&install), &ledger);
        assert!(!summary.install_failed());
        assert!(!summary.test_failed());
        assert_eq!(summary.packages[PACKAGE].files["tests/a.Rout"].passed, 1);
    }
}
