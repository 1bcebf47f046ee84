// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Detection and parsing of unit-test framework summaries in test output files.
//!
//! Two frameworks are recognized:
//!
//! * **testthat**, by the output file's name (`testthat.Rout`). Both the current bracketed summary
//!   (`[ FAIL 1 | WARN 0 | SKIP 2 | PASS 30 ]`) and the legacy `testthat results` block are
//!   understood.
//! * **RUnit**, by a `RUNIT TEST PROTOCOL` header anywhere in the output.
//!
//! A framework that is detected but whose summary can't be parsed is reported as a
//! [`FrameworkParseError`] inside [`FrameworkDetection::Detected`]; it is never a hard error.

use crate::{errors::FrameworkParseError, status::TestReport};
use regex::Regex;
use std::{fmt, sync::LazyLock};
use tracing::{debug, info};

/// Name of the output file that testthat-based test suites produce.
pub const TESTTHAT_OUTPUT_FILE_NAME: &str = "testthat.Rout";

const TESTTHAT_LEGACY_HEADER: &str = "testthat results";
const RUNIT_PROTOCOL_HEADER: &str = "RUNIT TEST PROTOCOL";

static TESTTHAT_SUMMARY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[\s+FAIL\s+(?P<fail>\d+)\s+\|\s+WARN\s+(?P<warn>\d+)\s+\|\s+SKIP\s+(?P<skip>\d+)\s+\|\s+PASS\s+(?P<pass>\d+)\s+\]",
    )
    .unwrap()
});

/// A unit-test framework whose summary can be read directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Framework {
    /// The testthat framework.
    Testthat,

    /// The RUnit framework.
    Runit,
}

impl Framework {
    /// Returns the framework's name as it is usually written.
    pub fn name(self) -> &'static str {
        match self {
            Framework::Testthat => "testthat",
            Framework::Runit => "RUnit",
        }
    }

    /// Parses this framework's summary out of `lines`.
    ///
    /// Every count in a successfully parsed summary is non-negative, and so is their total.
    pub fn parse_summary(self, lines: &[String]) -> Result<TestReport, FrameworkParseError> {
        let report = match self {
            Framework::Testthat => parse_testthat(lines)?,
            Framework::Runit => parse_runit(lines)?,
        };
        if report.total().is_none() {
            return Err(FrameworkParseError::new(
                self,
                format!("total of counts {report} is out of range"),
            ));
        }
        Ok(report)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The result of running framework detection on one output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameworkDetection {
    /// No known framework was found. The file should be compared line by line.
    NotDetected,

    /// A framework was found.
    Detected {
        /// The framework that was found.
        framework: Framework,

        /// The parsed summary, or the reason it couldn't be parsed.
        result: Result<TestReport, FrameworkParseError>,
    },
}

impl FrameworkDetection {
    /// Returns true if a framework was found, whether or not its summary parsed.
    pub fn is_detected(&self) -> bool {
        matches!(self, FrameworkDetection::Detected { .. })
    }

    /// Returns the parsed summary if a framework was found and parsed successfully.
    pub fn report(&self) -> Option<TestReport> {
        match self {
            FrameworkDetection::Detected {
                result: Ok(report), ..
            } => Some(*report),
            _ => None,
        }
    }
}

/// Detects a framework summary in an output file named `file_name` with content `lines`.
pub fn detect_summary(file_name: &str, lines: &[String]) -> FrameworkDetection {
    debug!("detecting output type of {file_name}");

    let framework = if file_name == TESTTHAT_OUTPUT_FILE_NAME {
        Framework::Testthat
    } else if lines.iter().any(|line| line.contains(RUNIT_PROTOCOL_HEADER)) {
        Framework::Runit
    } else {
        return FrameworkDetection::NotDetected;
    };

    info!("detected {framework} summary in {file_name}");
    let result = framework.parse_summary(lines);
    if let Err(error) = &result {
        info!("error parsing test framework summary: {error}");
    }
    FrameworkDetection::Detected { framework, result }
}

fn parse_testthat(lines: &[String]) -> Result<TestReport, FrameworkParseError> {
    for line in lines {
        if let Some(captures) = TESTTHAT_SUMMARY_REGEX.captures(line) {
            let count = |name: &str| parse_count(Framework::Testthat, &captures[name]);
            return Ok(TestReport::new(
                count("pass")?,
                count("skip")?,
                count("fail")?,
            ));
        }
    }
    parse_legacy_testthat(lines)
}

/// Parses the summary that testthat versions before 3.0.1 print.
///
/// The line after the `testthat results` header is either `OK: n SKIPPED: n FAILED: n` or
/// `[ OK: n | SKIPPED: n | WARNINGS: n | FAILED: n ]`.
fn parse_legacy_testthat(lines: &[String]) -> Result<TestReport, FrameworkParseError> {
    let error = |message: String| FrameworkParseError::new(Framework::Testthat, message);

    let header_idx = lines
        .iter()
        .position(|line| line.contains(TESTTHAT_LEGACY_HEADER))
        .ok_or_else(|| error(format!("no summary found and no `{TESTTHAT_LEGACY_HEADER}` line")))?;
    let result_line = lines
        .get(header_idx + 1)
        .ok_or_else(|| error(format!("no status line after summary header at line {}", header_idx + 1)))?;

    if result_line.starts_with("OK") {
        let (Some(skipped_idx), Some(failed_idx)) =
            (result_line.find("SKIPPED"), result_line.find("FAILED"))
        else {
            return Err(error(format!("could not parse status line `{result_line}`")));
        };
        if skipped_idx > failed_idx {
            return Err(error(format!("could not parse status line `{result_line}`")));
        }
        Ok(TestReport::new(
            parse_legacy_part(&result_line[..skipped_idx])?,
            parse_legacy_part(&result_line[skipped_idx..failed_idx])?,
            parse_legacy_part(&result_line[failed_idx..])?,
        ))
    } else if result_line.starts_with('[') {
        let inner = result_line
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| error(format!("unterminated status line `{result_line}`")))?;
        let parts: Vec<&str> = inner.split('|').collect();
        let [ok, skipped, _warnings, failed] = parts.as_slice() else {
            return Err(error(format!(
                "expected 4 parts in status line, found {}: `{result_line}`",
                parts.len()
            )));
        };
        Ok(TestReport::new(
            parse_legacy_part(ok)?,
            parse_legacy_part(skipped)?,
            parse_legacy_part(failed)?,
        ))
    } else {
        Err(error(format!(
            "could not parse status line `{result_line}` at line {}",
            header_idx + 2
        )))
    }
}

/// Parses a `KEY: value` part of a legacy testthat status line.
fn parse_legacy_part(part: &str) -> Result<i64, FrameworkParseError> {
    const KEYS: &[&str] = &["OK", "SKIPPED", "WARNINGS", "FAILED"];

    let pieces: Vec<&str> = part.split(':').map(str::trim).collect();
    let [key, value] = pieces.as_slice() else {
        return Err(FrameworkParseError::new(
            Framework::Testthat,
            format!("could not parse status part `{}`", part.trim()),
        ));
    };
    if !KEYS.contains(key) {
        return Err(FrameworkParseError::new(
            Framework::Testthat,
            format!("unknown key `{key}` in status part"),
        ));
    }
    parse_count(Framework::Testthat, value)
}

fn parse_runit(lines: &[String]) -> Result<TestReport, FrameworkParseError> {
    let header_idx = lines
        .iter()
        .position(|line| line.contains(RUNIT_PROTOCOL_HEADER))
        .ok_or_else(|| {
            FrameworkParseError::new(
                Framework::Runit,
                format!("line `{RUNIT_PROTOCOL_HEADER}` not contained"),
            )
        })?;

    let mut total = None;
    let mut failed: i64 = 0;
    for line in &lines[header_idx..] {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.contains("Number of test functions") {
            total = Some(parse_count(Framework::Runit, value)?);
        } else if key.contains("Number of errors") || key.contains("Number of failures") {
            failed = failed
                .checked_add(parse_count(Framework::Runit, value)?)
                .ok_or_else(|| {
                    FrameworkParseError::new(Framework::Runit, "number of failures out of range")
                })?;
        }
    }

    let total = total.ok_or_else(|| {
        FrameworkParseError::new(Framework::Runit, "no `Number of test functions` line")
    })?;
    if failed > total {
        return Err(FrameworkParseError::new(
            Framework::Runit,
            format!("{failed} errors and failures in {total} test functions"),
        ));
    }
    Ok(TestReport::new(total - failed, 0, failed))
}

fn parse_count(framework: Framework, value: &str) -> Result<i64, FrameworkParseError> {
    let value = value.trim();
    value
        .parse::<u64>()
        .ok()
        .and_then(|count| i64::try_from(count).ok())
        .ok_or_else(|| {
            FrameworkParseError::new(framework, format!("expected a count, found `{value}`"))
        })
}
