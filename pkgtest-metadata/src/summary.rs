// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// The reconciled status of a package or a single test output file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatusSummary {
    /// No verdict was reached.
    Unknown,

    /// The output agreed with the reference interpreter.
    Ok,

    /// The output disagreed with the reference, or the interpreter under test crashed.
    Failed,

    /// The reference interpreter itself failed, or the output could not be compared.
    Indeterminate,
}

impl TestStatusSummary {
    /// Returns the upper-case name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Ok => "OK",
            Self::Failed => "FAILED",
            Self::Indeterminate => "INDETERMINATE",
        }
    }
}

impl fmt::Display for TestStatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root summary of a reconciliation run.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ReconcileSummary {
    /// Install outcome per package, if the install stream was observed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub install_status: BTreeMap<String, bool>,

    /// Reconciled test status per package.
    pub packages: BTreeMap<String, PackageSummary>,
}

impl ReconcileSummary {
    /// Returns true if any recorded install failed.
    pub fn install_failed(&self) -> bool {
        self.install_status.values().any(|ok| !ok)
    }

    /// Returns true if any package's status is not `OK`.
    pub fn test_failed(&self) -> bool {
        self.packages
            .values()
            .any(|package| package.status != TestStatusSummary::Ok)
    }

    /// Serializes this summary as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Summary of a single package.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PackageSummary {
    /// The package's aggregate status.
    pub status: TestStatusSummary,

    /// Time the package's tests took, or -1.0 if the status is indeterminate.
    pub elapsed_seconds: f64,

    /// Per-file results, keyed by path relative to the package's output directory.
    pub files: BTreeMap<String, TestFileSummary>,
}

/// Summary of a single test output file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TestFileSummary {
    /// The file's status.
    pub status: TestStatusSummary,

    /// Number of tests that passed.
    pub passed: i64,

    /// Number of tests that were skipped.
    pub skipped: i64,

    /// Number of tests that failed.
    pub failed: i64,
}
