// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests: stream parsing, discovery, reconciliation and reports on a real directory
//! tree.

use camino_tempfile::{Utf8TempDir, tempdir};
use camino_tempfile_ext::prelude::*;
use indoc::indoc;
use pkgtest_runner::{
    compare::{NoFilters, StatementComparator},
    config::{PkgtestConfig, RuntimeRole},
    reconcile::{ReconciliationEngine, summarize},
    report::{TEST_TIME_FILE_NAME, TESTFILE_STATUS_FILE_NAME},
    status::{TestLedger, TestStatusKind},
    stream::{InstallLedger, StreamEventParser},
};
use pretty_assertions::assert_eq;
use std::fs;

const RUN_LOG: &str = indoc! {"
    BEGIN package installation
    BEGIN processing: digest
    * installing *source* package 'digest' ...
    BEGIN processing: broken
    ERROR: compilation failed for package 'broken'
    BEGIN install status
    digest: OK
    broken: FAILED
    END install status
    BEGIN package tests
    BEGIN testing: digest
    TEST_TIME: digest 4.5
    END testing: digest
    BEGIN testing: shapes
    TEST_TIME: shapes 2.0
    END testing: shapes
"};

struct Workspace {
    temp: Utf8TempDir,
    config: PkgtestConfig,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let config = PkgtestConfig::default_config(temp.path());
        Self { temp, config }
    }

    fn write(&self, path: &str, contents: &str) {
        self.temp.child(path).write_str(contents).unwrap();
    }

    fn read(&self, path: &str) -> String {
        fs::read_to_string(self.temp.path().join(path)).unwrap()
    }

    fn parse_log(&self) -> (InstallLedger, TestLedger) {
        let mut parser = StreamEventParser::new(self.config.output_root(RuntimeRole::UnderTest));
        parser.consume_reader(RUN_LOG.as_bytes(), "run.log").unwrap();
        parser.into_parts()
    }

    fn reconcile(&self, tests: &mut TestLedger) {
        ReconciliationEngine::new(&self.config, &StatementComparator, &NoFilters)
            .run(tests)
            .unwrap();
    }

    fn populate(&self) {
        // digest: a statement-level test that matches, and a testthat run short of three tests.
        self.write(
            "test.fastr/digest/tests/basic.Rout",
            indoc! {"
                R version 4.0.3
                > library(digest)
                > digest('a', algo = 'md5', serialize = FALSE)
                [1] \"0cc175b9c0f1b6a831c399e269772661\"
                > proc.time()
                   user  system elapsed
                  0.210   0.030   0.250
            "},
        );
        self.write(
            "test.gnur/digest/tests/basic.Rout",
            indoc! {"
                R version 4.0.3 (2020-10-10)
                > library(digest)
                > digest('a', algo = 'md5', serialize = FALSE)
                [1] \"0cc175b9c0f1b6a831c399e269772661\"
                > proc.time()
                   user  system elapsed
                  0.140   0.010   0.160
            "},
        );
        self.write(
            "test.fastr/digest/tests/testthat.Rout",
            "> test_check(\"digest\")\n[ FAIL 0 | WARN 0 | SKIP 1 | PASS 6 ]\n",
        );
        self.write(
            "test.gnur/digest/tests/testthat.Rout",
            "> test_check(\"digest\")\n[ FAIL 0 | WARN 1 | SKIP 1 | PASS 9 ]\n",
        );

        // shapes: one file crashed under test.
        self.write("test.fastr/shapes/tests/area.Rout.fail", "Error: unimplemented\n");
        self.write("test.gnur/shapes/tests/area.Rout", "> area(1)\n[1] 3.14\n");
    }
}

#[test]
fn full_pipeline() {
    let workspace = Workspace::new();
    workspace.populate();

    let (install, mut tests) = workspace.parse_log();
    assert!(!install.is_single_failure());
    assert_eq!(install.failed().collect::<Vec<_>>(), vec!["broken"]);
    assert_eq!(tests.package_names().collect::<Vec<_>>(), vec!["digest", "shapes"]);

    workspace.reconcile(&mut tests);

    let digest = tests.get("digest").unwrap();
    assert_eq!(digest.status(), TestStatusKind::Failed);
    assert_eq!(digest.elapsed_seconds(), 4.5);
    assert_eq!(
        workspace.read(&format!("test.fastr/digest/{TESTFILE_STATUS_FILE_NAME}")),
        indoc! {"
            # <file path> <tests passed> <tests skipped> <tests failed>
            tests/basic.Rout 3 0 0 0.0
            tests/testthat.Rout 6 1 3 0.0
        "}
    );
    assert_eq!(
        workspace.read(&format!("test.fastr/digest/{TEST_TIME_FILE_NAME}")),
        "4.5"
    );

    let shapes = tests.get("shapes").unwrap();
    assert_eq!(shapes.status(), TestStatusKind::Failed);
    assert_eq!(
        workspace.read(&format!("test.fastr/shapes/{TESTFILE_STATUS_FILE_NAME}")),
        indoc! {"
            # <file path> <tests passed> <tests skipped> <tests failed>
            tests/area.Rout.fail 0 0 1 0.0
        "}
    );

    let summary = summarize(Some(&install), &tests);
    assert!(summary.install_failed());
    assert!(summary.test_failed());

    // Nothing is written into the reference tree.
    assert!(
        !workspace
            .temp
            .path()
            .join("test.gnur/digest")
            .join(TESTFILE_STATUS_FILE_NAME)
            .exists()
    );
}

#[test]
fn reference_crash_makes_package_indeterminate() {
    let workspace = Workspace::new();
    workspace.write("test.fastr/xml2/tests/read.Rout", "> read_xml('<a/>')\n{xml_document}\n");
    workspace.write("test.gnur/xml2/tests/read.Rout.fail", "Error: libxml2 not found\n");

    let mut tests = TestLedger::new();
    tests.discover(
        "xml2",
        &workspace.config.package_dir(RuntimeRole::UnderTest, "xml2"),
    );
    workspace.reconcile(&mut tests);

    let record = tests.get("xml2").unwrap();
    assert_eq!(record.status(), TestStatusKind::Indeterminate);
    assert_eq!(
        workspace.read(&format!("test.fastr/xml2/{TESTFILE_STATUS_FILE_NAME}")),
        indoc! {"
            # <file path> <tests passed> <tests skipped> <tests failed>
            tests/read.Rout 0 1 0 -1.0
        "}
    );
    assert_eq!(
        workspace.read(&format!("test.fastr/xml2/{TEST_TIME_FILE_NAME}")),
        "-1.0"
    );
}

#[test]
fn reports_are_stable_across_runs() {
    let workspace = Workspace::new();
    workspace.populate();
    let status_path = format!("test.fastr/digest/{TESTFILE_STATUS_FILE_NAME}");

    let (_, mut first) = workspace.parse_log();
    workspace.reconcile(&mut first);
    let first_report = workspace.read(&status_path);

    // Reports from the first run must not be picked up as test outputs.
    let (_, mut second) = workspace.parse_log();
    workspace.reconcile(&mut second);
    assert_eq!(workspace.read(&status_path), first_report);
    assert_eq!(
        second.get("digest").unwrap().files().len(),
        first.get("digest").unwrap().files().len()
    );
}

#[test]
fn package_list_lists_successful_installs() {
    let workspace = Workspace::new();
    let (install, _) = workspace.parse_log();
    let path = workspace.temp.path().join("installed.txt");
    install.write_package_list(&path).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "digest\n");
}
