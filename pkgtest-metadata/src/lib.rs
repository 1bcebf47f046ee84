// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the machine-readable output of `pkgtest`.
//!
//! `pkgtest` reconciles the package test output of an interpreter under test against a reference
//! interpreter. This crate documents the exit codes the tool produces and the JSON form of a
//! reconciliation summary, so that CI tooling can consume results without scraping logs.

mod exit_codes;
mod summary;

pub use exit_codes::*;
pub use summary::*;
