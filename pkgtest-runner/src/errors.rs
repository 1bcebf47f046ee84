// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by pkgtest.

use crate::{framework::Framework, status::TestStatusKind};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::io;
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse pkgtest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// A framework summary was detected in an output file but could not be parsed.
///
/// This is a recoverable condition: the caller logs it and falls back to line comparison, or
/// penalizes the interpreter under test if the reference summary could be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to parse {framework} summary: {message}")]
pub struct FrameworkParseError {
    framework: Framework,
    message: String,
}

impl FrameworkParseError {
    pub(crate) fn new(framework: Framework, message: impl Into<String>) -> Self {
        Self {
            framework,
            message: message.into(),
        }
    }

    /// Returns the framework whose summary failed to parse.
    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Returns a description of what went wrong.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An illegal test status transition was attempted.
///
/// Reconciliation never attempts one of these on purpose, so seeing this error indicates a bug.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("transition from {current} to {incoming} is not allowed")]
pub struct StatusTransitionError {
    /// The status before the transition.
    pub current: TestStatusKind,

    /// The status that was requested.
    pub incoming: TestStatusKind,
}

/// An error that occurred while persisting a package's reports.
#[derive(Debug, Error)]
#[error("failed to write `{path}`")]
pub struct ReportWriteError {
    path: Utf8PathBuf,
    #[source]
    error: atomicwrites::Error<io::Error>,
}

impl ReportWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: atomicwrites::Error<io::Error>) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// Returns the path that could not be written.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// A fatal error that aborted reconciliation.
///
/// Data conditions such as missing or malformed output files are absorbed into the status model
/// and never surface here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// An illegal status transition was attempted for a package.
    #[error("invariant violated while reconciling package `{package}`")]
    InvariantViolation {
        /// The package being reconciled.
        package: String,

        /// The underlying transition error.
        #[source]
        err: StatusTransitionError,
    },

    /// A report could not be written.
    #[error("failed to persist reports for package `{package}`")]
    ReportWrite {
        /// The package whose reports were being written.
        package: String,

        /// The underlying write error.
        #[source]
        err: ReportWriteError,
    },
}

impl ReconcileError {
    pub(crate) fn invariant_violation(package: &str, err: StatusTransitionError) -> Self {
        Self::InvariantViolation {
            package: package.to_owned(),
            err,
        }
    }
}

/// An error that occurred while reading or parsing a replacement filter file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilterConfigError {
    /// The filter file could not be read.
    #[error("failed to read filter file `{path}`")]
    Read {
        /// The filter file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The filter file is not valid TOML or does not match the expected schema.
    #[error("failed to parse filter file `{path}`")]
    Parse {
        /// The filter file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: toml::de::Error,
    },

    /// A regex filter did not compile.
    #[error("invalid regex in filter #{index} of `{path}`")]
    InvalidRegex {
        /// The filter file.
        path: Utf8PathBuf,

        /// The zero-based position of the filter in the file.
        index: usize,

        /// The underlying error.
        #[source]
        err: regex::Error,
    },
}

/// An error that occurred while reading the subprocess output stream.
#[derive(Debug, Error)]
#[error("failed to read subprocess output from {source_name}")]
pub struct StreamReadError {
    source_name: String,
    #[source]
    err: io::Error,
}

impl StreamReadError {
    pub(crate) fn new(source_name: impl Into<String>, err: io::Error) -> Self {
        Self {
            source_name: source_name.into(),
            err,
        }
    }
}

/// An error that occurred while writing the package file list for the reference run.
#[derive(Debug, Error)]
#[error("failed to write package file list `{path}`")]
pub struct PackageListWriteError {
    path: Utf8PathBuf,
    #[source]
    error: atomicwrites::Error<io::Error>,
}

impl PackageListWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: atomicwrites::Error<io::Error>) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}
