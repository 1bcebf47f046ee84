// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-level comparison of test outputs and the replacement filters applied before it.
//!
//! Reconciliation talks to these through the [`LineComparator`] and [`FilterSelector`] traits.
//! [`StatementComparator`] and [`FilterFile`] are the implementations the `pkgtest` binary uses.

use crate::{errors::FilterConfigError, helpers::read_lines};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;
use std::{borrow::Cow, fmt, fs};
use tracing::{debug, warn};

/// A text replacement applied to every line of both outputs before they are compared.
#[derive(Clone, Debug)]
pub enum ReplacementFilter {
    /// Replaces every occurrence of a literal string.
    Replace {
        /// The string to look for.
        from: String,

        /// The replacement.
        to: String,
    },

    /// Replaces every match of a regular expression. `to` may refer to capture groups.
    Regex {
        /// The pattern to look for.
        from: Regex,

        /// The replacement.
        to: String,
    },
}

impl ReplacementFilter {
    /// Applies the filter to a single line.
    pub fn apply<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match self {
            ReplacementFilter::Replace { from, to } => {
                if !from.is_empty() && line.contains(from.as_str()) {
                    Cow::Owned(line.replace(from.as_str(), to))
                } else {
                    Cow::Borrowed(line)
                }
            }
            ReplacementFilter::Regex { from, to } => from.replace_all(line, to.as_str()),
        }
    }
}

/// Chooses the replacement filters that apply to a package.
pub trait FilterSelector {
    /// Returns the filters for `package`, in the order they should be applied.
    fn select_filters(&self, package: &str) -> Vec<ReplacementFilter>;
}

/// A [`FilterSelector`] that never selects any filters.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFilters;

impl FilterSelector for NoFilters {
    fn select_filters(&self, _package: &str) -> Vec<ReplacementFilter> {
        Vec::new()
    }
}

/// Filters loaded from a TOML filter file.
///
/// ```toml
/// [[filter]]
/// packages = ["*"]
/// action = "replace"
/// from = "<environment>"
/// to = "<env>"
///
/// [[filter]]
/// packages = ["digest"]
/// action = "regex"
/// from = "0x[0-9a-f]+"
/// to = "<addr>"
/// ```
#[derive(Clone, Debug, Default)]
pub struct FilterFile {
    entries: Vec<FilterEntry>,
}

#[derive(Clone, Debug)]
struct FilterEntry {
    packages: Vec<String>,
    filter: ReplacementFilter,
}

impl FilterEntry {
    fn matches(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == "*" || p == package)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeserializedFilterFile {
    #[serde(default)]
    filter: Vec<DeserializedFilter>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DeserializedFilter {
    packages: Vec<String>,
    action: FilterAction,
    from: String,
    #[serde(default)]
    to: String,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum FilterAction {
    Replace,
    Regex,
}

impl FilterFile {
    /// Reads and parses the filter file at `path`.
    pub fn from_path(path: &Utf8Path) -> Result<Self, FilterConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| FilterConfigError::Read {
            path: path.to_owned(),
            err,
        })?;
        Self::parse(path, &contents)
    }

    /// Parses filter file `contents`. `path` is only used for error messages.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, FilterConfigError> {
        let deserialized: DeserializedFilterFile =
            toml::from_str(contents).map_err(|err| FilterConfigError::Parse {
                path: path.to_owned(),
                err,
            })?;

        let entries = deserialized
            .filter
            .into_iter()
            .enumerate()
            .map(|(index, filter)| {
                let replacement = match filter.action {
                    FilterAction::Replace => ReplacementFilter::Replace {
                        from: filter.from,
                        to: filter.to,
                    },
                    FilterAction::Regex => ReplacementFilter::Regex {
                        from: Regex::new(&filter.from).map_err(|err| {
                            FilterConfigError::InvalidRegex {
                                path: path.to_owned(),
                                index,
                                err,
                            }
                        })?,
                        to: filter.to,
                    },
                };
                Ok(FilterEntry {
                    packages: filter.packages,
                    filter: replacement,
                })
            })
            .collect::<Result<Vec<_>, FilterConfigError>>()?;

        debug!("loaded {} filters from {path}", entries.len());
        Ok(Self { entries })
    }

    /// Returns the number of filters in the file.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the file has no filters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FilterSelector for FilterFile {
    fn select_filters(&self, package: &str) -> Vec<ReplacementFilter> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(package))
            .map(|entry| entry.filter.clone())
            .collect()
    }
}

/// The verdict of a line comparison.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ComparisonVerdict {
    /// The reference output couldn't be interpreted.
    Malformed,

    /// The outputs agree.
    Match,

    /// The outputs disagree.
    Mismatch,
}

/// The result of comparing two outputs line by line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LineComparison {
    /// The overall verdict.
    pub verdict: ComparisonVerdict,

    /// The number of units that agreed.
    pub passed: i64,

    /// The number of units that disagreed.
    pub failed: i64,
}

impl LineComparison {
    /// Builds a comparison from a numeric result code: -1 is malformed, 0 is a match and anything
    /// else is a mismatch.
    pub fn from_result_code(code: i32, passed: i64, failed: i64) -> Self {
        let verdict = match code {
            -1 => ComparisonVerdict::Malformed,
            0 => ComparisonVerdict::Match,
            _ => ComparisonVerdict::Mismatch,
        };
        Self {
            verdict,
            passed,
            failed,
        }
    }

    /// Returns the numeric result code for this comparison.
    pub fn result_code(&self) -> i32 {
        match self.verdict {
            ComparisonVerdict::Malformed => -1,
            ComparisonVerdict::Match => 0,
            ComparisonVerdict::Mismatch => 1,
        }
    }
}

impl fmt::Display for LineComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.result_code(), self.passed, self.failed)
    }
}

/// Everything a [`LineComparator`] is given for one pair of files.
#[derive(Clone, Copy, Debug)]
pub struct CompareInput<'a> {
    /// The reference output, one entry per line.
    pub reference_lines: &'a [String],

    /// The output under test, one entry per line.
    pub candidate_lines: &'a [String],

    /// Where the reference output was read from.
    pub reference_path: &'a Utf8Path,

    /// Where the output under test was read from.
    pub candidate_path: &'a Utf8Path,

    /// Filters to apply to both sides first.
    pub filters: &'a [ReplacementFilter],

    /// Whether to write the filtered text next to each input.
    pub dump_preprocessed: bool,
}

/// Compares the reference output of a test file with the output under test.
pub trait LineComparator {
    /// Compares the two sides of `input`.
    fn compare(&self, input: &CompareInput<'_>) -> LineComparison;
}

/// Reads two output files and compares them with `comparator`.
///
/// Unreadable files are compared as if they were empty.
pub fn compare_files(
    comparator: &dyn LineComparator,
    reference_path: &Utf8Path,
    candidate_path: &Utf8Path,
    filters: &[ReplacementFilter],
    dump_preprocessed: bool,
) -> LineComparison {
    let reference_lines = read_lines(reference_path);
    let candidate_lines = read_lines(candidate_path);
    comparator.compare(&CompareInput {
        reference_lines: &reference_lines,
        candidate_lines: &candidate_lines,
        reference_path,
        candidate_path,
        filters,
        dump_preprocessed,
    })
}

/// A [`LineComparator`] that treats every top-level statement as one test.
///
/// Output is split into blocks at prompt lines (lines starting with `> `). Text before the first
/// prompt is ignored. Blocks are compared pairwise after trailing whitespace and blank lines are
/// dropped. Blocks the output under test is missing, or has in excess, count as failures.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatementComparator;

const PROMPT: &str = "> ";

/// Statements whose output legitimately differs between runs.
const UNCOMPARED_STATEMENTS: &[&str] = &["proc.time()"];

/// Extension of the filtered copy written when `dump_preprocessed` is set.
pub const PREPROCESSED_EXTENSION: &str = "preprocessed";

impl LineComparator for StatementComparator {
    fn compare(&self, input: &CompareInput<'_>) -> LineComparison {
        let reference = preprocess(input.reference_lines, input.filters);
        let candidate = preprocess(input.candidate_lines, input.filters);

        if input.dump_preprocessed {
            dump_preprocessed(input.reference_path, &reference);
            dump_preprocessed(input.candidate_path, &candidate);
        }

        let has_content = reference.iter().any(|line| !line.trim().is_empty());
        let reference_blocks = split_statements(&reference);
        if has_content && reference_blocks.is_empty() {
            debug!("no statements in {}", input.reference_path);
            return LineComparison::from_result_code(-1, 0, 0);
        }
        let candidate_blocks = split_statements(&candidate);

        let mut passed = 0;
        let mut failed = 0;
        let len = reference_blocks.len().max(candidate_blocks.len());
        for i in 0..len {
            match (reference_blocks.get(i), candidate_blocks.get(i)) {
                (Some(expected), Some(actual)) if expected == actual => passed += 1,
                (Some(expected), Some(_)) if is_uncompared(expected) => passed += 1,
                _ => failed += 1,
            }
        }

        let verdict = if failed == 0 {
            ComparisonVerdict::Match
        } else {
            ComparisonVerdict::Mismatch
        };
        LineComparison {
            verdict,
            passed,
            failed,
        }
    }
}

fn preprocess(lines: &[String], filters: &[ReplacementFilter]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            filters
                .iter()
                .fold(line.clone(), |acc, filter| filter.apply(&acc).into_owned())
        })
        .collect()
}

fn dump_preprocessed(path: &Utf8Path, lines: &[String]) {
    let dump_path = Utf8PathBuf::from(format!("{path}.{PREPROCESSED_EXTENSION}"));
    if let Err(error) = fs::write(&dump_path, lines.concat()) {
        warn!("failed to write {dump_path}: {error}");
    }
}

/// Splits output into statement blocks. Each block starts with its prompt line.
fn split_statements(lines: &[String]) -> Vec<Vec<&str>> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    for line in lines {
        let line = line.trim_end();
        if line.starts_with(PROMPT) {
            blocks.push(vec![line]);
        } else if let Some(block) = blocks.last_mut() {
            if !line.is_empty() {
                block.push(line);
            }
        }
    }
    blocks
}

fn is_uncompared(block: &[&str]) -> bool {
    block.first().is_some_and(|prompt| {
        let statement = prompt[PROMPT.len()..].trim();
        UNCOMPARED_STATEMENTS.contains(&statement)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn lines(text: &str) -> Vec<String> {
        text.split_inclusive('\n').map(str::to_owned).collect()
    }

    fn compare(reference: &str, candidate: &str, filters: &[ReplacementFilter]) -> LineComparison {
        let reference = lines(reference);
        let candidate = lines(candidate);
        StatementComparator.compare(&CompareInput {
            reference_lines: &reference,
            candidate_lines: &candidate,
            reference_path: Utf8Path::new("ref/a.Rout"),
            candidate_path: Utf8Path::new("cand/a.Rout"),
            filters,
            dump_preprocessed: false,
        })
    }

    const REFERENCE: &str = indoc! {"
        R version 4.0.3 (2020-10-10)
        Type 'q()' to quit R.

        > x <- 1:3
        > sum(x)
        [1] 6
        > proc.time()
           user  system elapsed
          0.152   0.030   0.175
    "};

    #[test]
    fn identical_statements_match() {
        let candidate = indoc! {"
            FastR version 3.6.1
            > x <- 1:3
            > sum(x)
            [1] 6

            > proc.time()
               user  system elapsed
              1.000   0.100   2.000
        "};
        assert_eq!(
            compare(REFERENCE, candidate, &[]),
            LineComparison::from_result_code(0, 3, 0)
        );
    }

    #[test]
    fn differing_and_missing_statements_fail() {
        let candidate = indoc! {"
            > x <- 1:3
            > sum(x)
            [1] 7
        "};
        let result = compare(REFERENCE, candidate, &[]);
        assert_eq!(result.verdict, ComparisonVerdict::Mismatch);
        assert_eq!((result.passed, result.failed), (1, 2));
        assert_eq!(result.result_code(), 1);
    }

    #[test]
    fn reference_without_statements_is_malformed() {
        let result = compare("Error: could not start\n", "> 1\n[1] 1\n", &[]);
        assert_eq!(result.verdict, ComparisonVerdict::Malformed);
        assert_eq!(result.to_string(), "-1 0 0");
    }

    #[test]
    fn blank_outputs_match_with_no_tests() {
        assert_eq!(
            compare("\n", "", &[]),
            LineComparison::from_result_code(0, 0, 0)
        );
    }

    #[test]
    fn filters_apply_to_both_sides() {
        let filters = [ReplacementFilter::Regex {
            from: Regex::new("<environment: 0x[0-9a-f]+>").unwrap(),
            to: "<environment>".to_owned(),
        }];
        let reference = "> f\n<environment: 0x55d5c8a3>\n";
        let candidate = "> f\n<environment: 0x1f>\n";
        assert_eq!(
            compare(reference, candidate, &filters).verdict,
            ComparisonVerdict::Match
        );
        assert_eq!(
            compare(reference, candidate, &[]).verdict,
            ComparisonVerdict::Mismatch
        );
    }

    #[test_case(-1, ComparisonVerdict::Malformed; "malformed")]
    #[test_case(0, ComparisonVerdict::Match; "match")]
    #[test_case(1, ComparisonVerdict::Mismatch; "mismatch")]
    #[test_case(42, ComparisonVerdict::Mismatch; "any nonzero code")]
    fn result_codes(code: i32, verdict: ComparisonVerdict) {
        assert_eq!(LineComparison::from_result_code(code, 0, 0).verdict, verdict);
    }

    #[test]
    fn filter_file_selects_by_package_in_file_order() {
        let contents = indoc! {r#"
            [[filter]]
            packages = ["*"]
            action = "replace"
            from = "FastR"
            to = "R"

            [[filter]]
            packages = ["digest", "rlang"]
            action = "regex"
            from = "0x[0-9a-f]+"
            to = "<addr>"
        "#};
        let file = FilterFile::parse(Utf8Path::new("filters.toml"), contents).unwrap();
        assert_eq!(file.len(), 2);

        let applied = |package: &str| {
            file.select_filters(package)
                .iter()
                .fold("FastR at 0xdead".to_owned(), |acc, filter| {
                    filter.apply(&acc).into_owned()
                })
        };
        assert_eq!(applied("digest"), "R at <addr>");
        assert_eq!(applied("other"), "R at 0xdead");
    }

    #[test]
    fn filter_file_rejects_invalid_regex() {
        let contents = indoc! {r#"
            [[filter]]
            packages = ["*"]
            action = "regex"
            from = "("
        "#};
        let error = FilterFile::parse(Utf8Path::new("filters.toml"), contents).unwrap_err();
        assert!(
            matches!(error, FilterConfigError::InvalidRegex { index: 0, .. }),
            "unexpected error: {error:?}"
        );
    }

    #[test]
    fn filter_file_rejects_unknown_action() {
        let contents = indoc! {r#"
            [[filter]]
            packages = ["*"]
            action = "delete"
            from = "x"
        "#};
        let error = FilterFile::parse(Utf8Path::new("filters.toml"), contents).unwrap_err();
        assert!(matches!(error, FilterConfigError::Parse { .. }));
    }

    #[test]
    fn compare_files_dumps_preprocessed_text() {
        let temp = camino_tempfile::tempdir().unwrap();
        let reference = temp.path().join("ref.Rout");
        let candidate = temp.path().join("cand.Rout");
        std::fs::write(&reference, "> Sys.getenv('R_HOME')\n[1] \"/usr/lib/R\"\n").unwrap();
        std::fs::write(&candidate, "> Sys.getenv('R_HOME')\n[1] \"/opt/fastr\"\n").unwrap();
        let filters = [ReplacementFilter::Replace {
            from: "/opt/fastr".to_owned(),
            to: "/usr/lib/R".to_owned(),
        }];

        let result = compare_files(&StatementComparator, &reference, &candidate, &filters, true);
        assert_eq!(result.to_string(), "0 1 0");
        assert_eq!(
            std::fs::read_to_string(temp.path().join("cand.Rout.preprocessed")).unwrap(),
            "> Sys.getenv('R_HOME')\n[1] \"/usr/lib/R\"\n"
        );
    }
}
