// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pkgtest_metadata::{PkgtestExitCode, ReconcileSummary};
use pkgtest_runner::{
    compare::{
        ComparisonVerdict, FilterFile, FilterSelector, NoFilters, StatementComparator,
        compare_files,
    },
    config::{ConfigOverrides, PkgtestConfig, RuntimeRole},
    discovery::list_packages,
    reconcile::{ReconciliationEngine, log_test_status, summarize},
    status::TestLedger,
    stream::{InstallLedger, StreamEventParser},
};
use std::{
    fs::File,
    io::{self, BufReader, Write},
};
use tracing::{info, warn};

/// Cross-validates package test runs of an interpreter under test against a reference
/// interpreter.
///
/// Reads the install and test log of a run, compares every test output file with the reference
/// run's output, and writes per-package `testfile_status` and `test_time` reports.
#[derive(Debug, Parser)]
#[command(version, max_term_width = 100)]
pub struct PkgtestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl PkgtestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self) -> Result<i32> {
        let config = self.config_opts.make_config()?;

        match self.command {
            Command::Ingest {
                log,
                pkg_filelist,
                message_format,
            } => {
                let (install, _) = ingest(&config, log.as_deref(), pkg_filelist.as_deref())?;
                match message_format {
                    MessageFormat::Human => {
                        let mut stdout = io::stdout().lock();
                        for (package, succeeded) in install.iter() {
                            let status = if succeeded { "OK" } else { "FAILED" };
                            writeln!(stdout, "{package}: {status}")
                                .map_err(|err| ExpectedError::WriteOutputError { err })?;
                        }
                    }
                    MessageFormat::Json => {
                        write_summary(&summarize(Some(&install), &TestLedger::new()))?;
                    }
                }
                Ok(PkgtestExitCode::from_verdict(install.any_failed(), false))
            }
            Command::Check {
                packages,
                message_format,
            } => {
                let packages = if packages.is_empty() {
                    list_packages(&config.output_root(RuntimeRole::UnderTest))
                } else {
                    packages
                };

                let mut tests = TestLedger::new();
                for package in &packages {
                    let package_dir = config.package_dir(RuntimeRole::UnderTest, package);
                    if package_dir.is_dir() {
                        tests.discover(package, &package_dir);
                    } else {
                        // Still reconciled, so that missing outputs count against the package.
                        warn!("{package}: no test outputs at {package_dir}");
                        tests.get_or_create(package);
                    }
                }

                reconcile(&config, &mut tests)?;
                finish(None, &tests, message_format)
            }
            Command::Run {
                log,
                pkg_filelist,
                message_format,
            } => {
                let (install, mut tests) =
                    ingest(&config, log.as_deref(), pkg_filelist.as_deref())?;
                if install.is_single_failure() {
                    info!("the only package failed to install, not checking test outputs");
                } else {
                    reconcile(&config, &mut tests)?;
                }
                finish(Some(&install), &tests, message_format)
            }
            Command::Cmp {
                reference,
                candidate,
                package,
            } => {
                for path in [&reference, &candidate] {
                    if !path.is_file() {
                        return Err(ExpectedError::InputNotFound { path: path.clone() });
                    }
                }
                let filters = load_filters(&config)?
                    .select_filters(package.as_deref().unwrap_or_default());
                let result = compare_files(
                    &StatementComparator,
                    &reference,
                    &candidate,
                    &filters,
                    config.dump_preprocessed(),
                );
                writeln!(io::stdout().lock(), "{result}")
                    .map_err(|err| ExpectedError::WriteOutputError { err })?;

                let mismatch = result.verdict != ComparisonVerdict::Match;
                Ok(PkgtestExitCode::from_verdict(false, mismatch))
            }
        }
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Config options")]
struct ConfigOpts {
    /// Directory that output roots and the filter file are resolved against
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        default_value = ".",
        env = "PKGTEST_BASE_DIR"
    )]
    base_dir: Utf8PathBuf,

    /// Config file [default: base-dir/.config/pkgtest.toml]
    #[arg(long, global = true, value_name = "PATH", env = "PKGTEST_CONFIG_FILE")]
    config_file: Option<Utf8PathBuf>,

    /// Output root of the interpreter under test
    #[arg(long, global = true, value_name = "DIR", env = "PKGTEST_UNDER_TEST_DIR")]
    under_test_dir: Option<Utf8PathBuf>,

    /// Output root of the reference interpreter
    #[arg(long, global = true, value_name = "DIR", env = "PKGTEST_REFERENCE_DIR")]
    reference_dir: Option<Utf8PathBuf>,

    /// Replacement filters applied before outputs are compared line by line
    #[arg(long, global = true, value_name = "PATH", env = "PKGTEST_FILTER_FILE")]
    filter_file: Option<Utf8PathBuf>,

    /// Write the filtered text of compared outputs next to them as `<file>.preprocessed`
    #[arg(long, global = true)]
    dump_preprocessed: bool,
}

impl ConfigOpts {
    fn make_config(&self) -> Result<PkgtestConfig> {
        let config = PkgtestConfig::from_sources(self.base_dir.clone(), self.config_file.as_deref())?;
        Ok(config.apply_overrides(&ConfigOverrides {
            under_test_dir: self.under_test_dir.clone(),
            reference_dir: self.reference_dir.clone(),
            filter_file: self.filter_file.clone(),
            dump_preprocessed: self.dump_preprocessed,
        }))
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a captured install and test log and print install outcomes
    Ingest {
        /// Log to read [default: standard input]
        #[arg(value_name = "LOG")]
        log: Option<Utf8PathBuf>,

        /// Write the packages that installed successfully to this file, one per line
        #[arg(long, value_name = "PATH")]
        pkg_filelist: Option<Utf8PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t)]
        message_format: MessageFormat,
    },

    /// Reconcile existing output trees and write per-package reports
    Check {
        /// Packages to check [default: every package under the under-test output root]
        #[arg(value_name = "PACKAGE")]
        packages: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t)]
        message_format: MessageFormat,
    },

    /// Ingest a log, then reconcile the packages it tested
    Run {
        /// Log to read [default: standard input]
        #[arg(value_name = "LOG")]
        log: Option<Utf8PathBuf>,

        /// Write the packages that installed successfully to this file, one per line
        #[arg(long, value_name = "PATH")]
        pkg_filelist: Option<Utf8PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t)]
        message_format: MessageFormat,
    },

    /// Compare two output files line by line and print `result passed failed`
    Cmp {
        /// Output of the reference interpreter
        reference: Utf8PathBuf,

        /// Output of the interpreter under test
        candidate: Utf8PathBuf,

        /// Package whose replacement filters apply
        #[arg(long, value_name = "PACKAGE")]
        package: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// Human-readable output on stderr
    #[default]
    Human,

    /// A JSON summary on stdout
    Json,
}

fn ingest(
    config: &PkgtestConfig,
    log: Option<&Utf8Path>,
    pkg_filelist: Option<&Utf8Path>,
) -> Result<(InstallLedger, TestLedger)> {
    let mut parser = StreamEventParser::new(config.output_root(RuntimeRole::UnderTest));
    match log {
        Some(path) => {
            let file = File::open(path).map_err(|err| ExpectedError::log_open_error(path, err))?;
            parser.consume_reader(BufReader::new(file), path.as_str())?;
        }
        None => parser.consume_reader(io::stdin().lock(), "<stdin>")?,
    }
    let (install, tests) = parser.into_parts();

    if let Some(path) = pkg_filelist {
        install.write_package_list(path)?;
    }
    Ok((install, tests))
}

fn load_filters(config: &PkgtestConfig) -> Result<Box<dyn FilterSelector>> {
    match config.filter_file() {
        Some(path) => {
            let filters = FilterFile::from_path(&path)?;
            info!("loaded {} replacement filters from {path}", filters.len());
            Ok(Box::new(filters))
        }
        None => Ok(Box::new(NoFilters)),
    }
}

fn reconcile(config: &PkgtestConfig, tests: &mut TestLedger) -> Result<()> {
    let filters = load_filters(config)?;
    ReconciliationEngine::new(config, &StatementComparator, filters.as_ref()).run(tests)?;
    log_test_status(tests);
    Ok(())
}

fn finish(
    install: Option<&InstallLedger>,
    tests: &TestLedger,
    message_format: MessageFormat,
) -> Result<i32> {
    let summary = summarize(install, tests);
    if message_format == MessageFormat::Json {
        write_summary(&summary)?;
    }
    Ok(PkgtestExitCode::from_verdict(
        summary.install_failed(),
        summary.test_failed(),
    ))
}

fn write_summary(summary: &ReconcileSummary) -> Result<()> {
    let json = summary
        .to_json_pretty()
        .map_err(|err| ExpectedError::SummarySerializeError { err })?;
    writeln!(io::stdout().lock(), "{json}").map_err(|err| ExpectedError::WriteOutputError { err })
}
