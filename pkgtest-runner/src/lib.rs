// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for pkgtest, which cross-validates the package test runs of an interpreter
//! under test against those of a trusted reference interpreter.
//!
//! The basic flow of operations is:
//!
//! 1. [`stream::StreamEventParser`] consumes the interleaved install and test log of the run
//!    under test, producing an [`stream::InstallLedger`] and a [`status::TestLedger`].
//! 2. [`reconcile::ReconciliationEngine`] discovers the reference outputs, compares them with the
//!    outputs under test and settles every package's status.
//! 3. [`report`] persists per-package `testfile_status` and `test_time` files.

pub mod compare;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod framework;
mod helpers;
pub mod reconcile;
pub mod report;
pub mod status;
pub mod stream;
