// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery of test output files in a package's output directory.

use crate::status::{OutputOutcome, PackageTestRecord, TestFileRecord, TestLedger};
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extension of a completed test output file.
pub const ROUT_EXTENSION: &str = "Rout";

/// Extension of the marker a run leaves behind when a test file died with a fatal error.
pub const FAIL_EXTENSION: &str = "fail";

/// File names inside a package's output directory that are never test outputs.
const IGNORED_FILE_NAMES: &[&str] = &["test_time", "testfile_status"];

impl TestLedger {
    /// Scans `package_dir` and records every test output file under `package`.
    ///
    /// If `package_dir` does not exist, nothing is recorded and no package record is created.
    pub fn discover(&mut self, package: &str, package_dir: &Utf8Path) {
        if !package_dir.is_dir() {
            debug!("no test output directory for {package} at {package_dir}");
            return;
        }
        let record = self.get_or_create(package);
        discover_outputs(package_dir, record);
    }
}

/// Adds every `.Rout` and `.fail` file under `package_dir` to `record`.
///
/// A `.fail` file is recorded under its name with the extension stripped and seeds a `Failed`
/// status. If both `x.Rout` and `x.Rout.fail` exist, the crash marker wins.
pub fn discover_outputs(package_dir: &Utf8Path, record: &mut PackageTestRecord) {
    let walker = WalkDir::new(package_dir)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("skipping unreadable entry under {package_dir}: {error}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(path) => path,
            Err(path) => {
                warn!("skipping non-UTF-8 path {}", path.display());
                continue;
            }
        };

        let Some((relative_path, outcome)) = classify_output(package_dir, &path) else {
            continue;
        };
        if outcome == OutputOutcome::Completed
            && record
                .file(&relative_path)
                .is_some_and(|file| file.absolute_path() != path)
        {
            // A crash marker for the same test file was already recorded.
            continue;
        }
        debug!("discovered {relative_path} ({outcome:?})");
        record.insert_file(TestFileRecord::new(relative_path, path, outcome));
    }
}

/// Returns the logical relative path and outcome of an output file, or `None` if the file is not
/// a test output.
fn classify_output(package_dir: &Utf8Path, path: &Utf8Path) -> Option<(String, OutputOutcome)> {
    let file_name = path.file_name()?;
    if IGNORED_FILE_NAMES.contains(&file_name) {
        return None;
    }

    let (logical_path, outcome) = match path.extension()? {
        ROUT_EXTENSION => (path.to_path_buf(), OutputOutcome::Completed),
        FAIL_EXTENSION => (path.with_extension(""), OutputOutcome::Crashed),
        _ => return None,
    };

    let relative = logical_path.strip_prefix(package_dir).ok()?;
    Some((to_forward_slashes(relative), outcome))
}

fn to_forward_slashes(path: &Utf8Path) -> String {
    path.components()
        .map(|component| component.as_str())
        .join("/")
}

/// Returns the names of the package output directories directly under `output_root`, sorted.
///
/// A missing or unreadable root yields no packages.
pub fn list_packages(output_root: &Utf8Path) -> Vec<String> {
    if !output_root.is_dir() {
        debug!("no output root at {output_root}");
        return Vec::new();
    }

    WalkDir::new(output_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_dir() => entry.file_name().to_str().map(str::to_owned),
            Ok(_) => None,
            Err(error) => {
                warn!("skipping unreadable entry under {output_root}: {error}");
                None
            }
        })
        .collect()
}
