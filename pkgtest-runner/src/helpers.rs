// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for pkgtest-runner.

use camino::Utf8Path;
use std::{fmt, fs};
use tracing::warn;

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "file" if `count` is 1, otherwise "files".
    pub(crate) fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }

    /// Returns "package" if `count` is 1, otherwise "packages".
    pub(crate) fn packages_str(count: usize) -> &'static str {
        if count == 1 { "package" } else { "packages" }
    }
}

/// Strips one trailing `\n` (and a `\r` before it) from `line`.
pub(crate) fn strip_newline(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Reads a test output file as a list of lines, keeping line terminators.
///
/// Invalid UTF-8 is replaced. A file that can't be read is logged and treated as empty.
pub(crate) fn read_lines(path: &Utf8Path) -> Vec<String> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .split_inclusive('\n')
            .map(str::to_owned)
            .collect(),
        Err(error) => {
            warn!("could not read {path}, treating it as empty: {error}");
            Vec::new()
        }
    }
}

/// Displays the content of a file in a framed block for diagnostic dumps.
pub(crate) struct FileContents<'a> {
    path: &'a Utf8Path,
    lines: Option<Vec<String>>,
}

impl<'a> FileContents<'a> {
    /// Reads `path` eagerly. If it can't be read, the block says so instead.
    pub(crate) fn read(path: &'a Utf8Path) -> Self {
        let lines = fs::read(path).ok().map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .split_inclusive('\n')
                .map(str::to_owned)
                .collect()
        });
        Self { path, lines }
    }

    /// Frames lines that have already been read.
    pub(crate) fn from_lines(path: &'a Utf8Path, lines: &[String]) -> Self {
        Self {
            path,
            lines: Some(lines.to_vec()),
        }
    }
}

impl fmt::Display for FileContents<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lines {
            Some(lines) => {
                write!(f, "\n{}\n########\n", self.path)?;
                for line in lines {
                    f.write_str(line)?;
                }
                f.write_str("########")
            }
            None => write!(f, "Could not read the contents of {}", self.path),
        }
    }
}
