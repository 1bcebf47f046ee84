// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted per-package reports: `testfile_status` and `test_time`.

use crate::{
    discovery::FAIL_EXTENSION,
    errors::ReportWriteError,
    status::{PackageTestRecord, TestStatusKind},
};
use atomicwrites::{AllowOverwrite, AtomicFile};
use camino::Utf8Path;
use std::{fmt, io::Write};
use swrite::{SWrite, swrite};
use tracing::{debug, info};

/// Name of the per-file report written into each package's output directory.
pub const TESTFILE_STATUS_FILE_NAME: &str = "testfile_status";

/// Name of the file holding a package's elapsed time.
pub const TEST_TIME_FILE_NAME: &str = "test_time";

/// First line of every `testfile_status` report.
pub const TESTFILE_STATUS_HEADER: &str =
    "# <file path> <tests passed> <tests skipped> <tests failed>";

/// Formats seconds so that values always carry a decimal point (`0.0`, `-1.0`, `12.5`).
#[derive(Copy, Clone, Debug)]
pub struct FormattedSeconds(pub f64);

impl fmt::Display for FormattedSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Renders the `testfile_status` report of a package whose outputs live in `package_dir`.
///
/// Each line is `path passed skipped failed elapsed`. A file that doesn't exist on disk is
/// reported under its `.fail` sibling if it has failed and the sibling exists, and is otherwise
/// left out.
///
/// Counts are written as stored, whatever the file's status. An indeterminate file keeps the
/// counts reconciliation assigned to it (`0 1 0` for malformed output) and is not folded into
/// `passed 0 skipped+failed`.
pub fn render_testfile_status(package_dir: &Utf8Path, record: &PackageTestRecord) -> String {
    let mut out = String::new();
    out.push_str(TESTFILE_STATUS_HEADER);
    out.push('\n');

    for (relative_path, file) in record.files() {
        debug!("generating testfile_status for {relative_path}");
        let output_file = package_dir.join(relative_path);
        let reported_path = if output_file.exists() {
            relative_path.clone()
        } else if file.status() == TestStatusKind::Failed {
            let fail_path = format!("{relative_path}.{FAIL_EXTENSION}");
            let fail_file = package_dir.join(&fail_path);
            if !fail_file.exists() {
                info!("file {output_file} or {fail_file} does not exist");
                continue;
            }
            fail_path
        } else {
            info!("file {output_file} does not exist");
            continue;
        };

        let report = file.report();
        swrite!(
            out,
            "{reported_path} {} {} {} {}\n",
            report.passed,
            report.skipped,
            report.failed,
            FormattedSeconds(file.elapsed_seconds()),
        );
    }
    out
}

/// Writes `testfile_status` and `test_time` into `package_dir`.
pub fn write_reports(
    package_dir: &Utf8Path,
    record: &PackageTestRecord,
) -> Result<(), ReportWriteError> {
    let status_path = package_dir.join(TESTFILE_STATUS_FILE_NAME);
    let contents = render_testfile_status(package_dir, record);
    AtomicFile::new(&status_path, AllowOverwrite)
        .write(|f| f.write_all(contents.as_bytes()))
        .map_err(|error| ReportWriteError::new(&status_path, error))?;

    let time_path = package_dir.join(TEST_TIME_FILE_NAME);
    let elapsed = FormattedSeconds(record.elapsed_seconds()).to_string();
    AtomicFile::new(&time_path, AllowOverwrite)
        .write(|f| f.write_all(elapsed.as_bytes()))
        .map_err(|error| ReportWriteError::new(&time_path, error))?;

    Ok(())
}
