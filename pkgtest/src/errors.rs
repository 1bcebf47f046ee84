// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use pkgtest_metadata::PkgtestExitCode;
use pkgtest_runner::errors::*;
use std::{error::Error, io};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholder messages. Errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An error that pkgtest knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("filter file error")]
    FilterConfigError {
        #[from]
        err: FilterConfigError,
    },
    #[error("failed to open log")]
    LogOpenError {
        path: Utf8PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("stream read error")]
    StreamReadError {
        #[from]
        err: StreamReadError,
    },
    #[error("input file not found")]
    InputNotFound { path: Utf8PathBuf },
    #[error("reconciliation failed")]
    ReconcileError {
        #[from]
        err: ReconcileError,
    },
    #[error("failed to write package file list")]
    PackageListWriteError {
        #[from]
        err: PackageListWriteError,
    },
    #[error("failed to serialize summary")]
    SummarySerializeError {
        #[source]
        err: serde_json::Error,
    },
    #[error("failed to write to stdout")]
    WriteOutputError {
        #[source]
        err: io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn log_open_error(path: impl Into<Utf8PathBuf>, err: io::Error) -> Self {
        Self::LogOpenError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::ConfigParseError { .. }
            | Self::FilterConfigError { .. }
            | Self::LogOpenError { .. }
            | Self::InputNotFound { .. } => PkgtestExitCode::SETUP_ERROR,
            Self::StreamReadError { .. } => PkgtestExitCode::STREAM_READ_ERROR,
            Self::ReconcileError { err } => match err {
                ReconcileError::InvariantViolation { .. } => PkgtestExitCode::INVARIANT_VIOLATION,
                _ => PkgtestExitCode::WRITE_OUTPUT_ERROR,
            },
            Self::PackageListWriteError { .. }
            | Self::SummarySerializeError { .. }
            | Self::WriteOutputError { .. } => PkgtestExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse pkgtest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::FilterConfigError { err } => {
                error!("{err}");
                err.source()
            }
            Self::LogOpenError { path, err } => {
                error!("failed to open log `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::StreamReadError { err } => {
                error!("{err}");
                err.source()
            }
            Self::InputNotFound { path } => {
                error!("input file `{}` not found", path.style(styles.bold));
                None
            }
            Self::ReconcileError { err } => {
                match err {
                    ReconcileError::InvariantViolation { .. } => {
                        error!("{err}\n(this is a bug in pkgtest, please report it)");
                    }
                    _ => error!("{err}"),
                }
                err.source()
            }
            Self::PackageListWriteError { err } => {
                error!("{err}");
                err.source()
            }
            Self::SummarySerializeError { err } => {
                error!("failed to serialize reconciliation summary");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("failed to write to stdout");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_error_class() {
        let not_found = ExpectedError::InputNotFound {
            path: "missing.Rout".into(),
        };
        assert_eq!(not_found.process_exit_code(), PkgtestExitCode::SETUP_ERROR);

        let write = ExpectedError::WriteOutputError {
            err: io::Error::other("broken pipe"),
        };
        assert_eq!(write.process_exit_code(), PkgtestExitCode::WRITE_OUTPUT_ERROR);

        let open = ExpectedError::log_open_error("run.log", io::Error::other("denied"));
        assert_eq!(open.process_exit_code(), PkgtestExitCode::SETUP_ERROR);
    }
}
