// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line interface for pkgtest.
//!
//! pkgtest cross-validates the package test runs of an interpreter under test against those of a
//! reference interpreter. The core logic lives in the `pkgtest-runner` crate; this crate parses
//! arguments, sets up logging and maps errors to documented exit codes.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
