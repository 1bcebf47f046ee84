// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for pkgtest.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::fmt;

/// One of the two interpreters whose outputs are reconciled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RuntimeRole {
    /// The interpreter whose correctness is being validated.
    UnderTest,

    /// The trusted interpreter whose output defines expected behavior.
    Reference,
}

impl RuntimeRole {
    /// Returns a short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            RuntimeRole::UnderTest => "under test",
            RuntimeRole::Reference => "reference",
        }
    }
}

impl fmt::Display for RuntimeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Overall configuration for pkgtest.
///
/// This is an immutable value: it is built once from the config sources, then passed to
/// [`ReconciliationEngine`](crate::reconcile::ReconciliationEngine) and friends.
#[derive(Clone, Debug)]
pub struct PkgtestConfig {
    base_dir: Utf8PathBuf,
    under_test_dir: Utf8PathBuf,
    reference_dir: Utf8PathBuf,
    filter_file: Option<Utf8PathBuf>,
    dump_preprocessed: bool,
    log_mismatched_output: bool,
}

impl PkgtestConfig {
    /// The default location of the config within the base directory: `.config/pkgtest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/pkgtest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// User configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file`, or if not specified from `.config/pkgtest.toml` in
    /// `base_dir` if it exists.
    ///
    /// If neither is present, uses the default config options.
    pub fn from_sources(
        base_dir: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let base_dir = base_dir.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = base_dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let deserialized = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        Ok(deserialized.into_config(base_dir))
    }

    /// Returns the default config, rooted at `base_dir`.
    pub fn default_config(base_dir: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");
        let deserialized: PkgtestConfigDeserialize =
            serde_path_to_error::deserialize(config).expect("default config is always valid");
        deserialized.into_config(base_dir.into())
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<PkgtestConfigDeserialize, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))
    }

    /// Applies command-line overrides on top of the configured values.
    pub fn apply_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(dir) = &overrides.under_test_dir {
            self.under_test_dir = dir.clone();
        }
        if let Some(dir) = &overrides.reference_dir {
            self.reference_dir = dir.clone();
        }
        if let Some(file) = &overrides.filter_file {
            self.filter_file = Some(file.clone());
        }
        if overrides.dump_preprocessed {
            self.dump_preprocessed = true;
        }
        self
    }

    /// Returns the root of the output tree of `role`.
    pub fn output_root(&self, role: RuntimeRole) -> Utf8PathBuf {
        let dir = match role {
            RuntimeRole::UnderTest => &self.under_test_dir,
            RuntimeRole::Reference => &self.reference_dir,
        };
        self.base_dir.join(dir)
    }

    /// Returns the output directory of `package` for `role`.
    pub fn package_dir(&self, role: RuntimeRole, package: &str) -> Utf8PathBuf {
        self.output_root(role).join(package)
    }

    /// Returns the replacement filter file, if one is configured.
    pub fn filter_file(&self) -> Option<Utf8PathBuf> {
        self.filter_file.as_ref().map(|file| self.base_dir.join(file))
    }

    /// Returns true if filtered outputs should be written next to the compared files.
    pub fn dump_preprocessed(&self) -> bool {
        self.dump_preprocessed
    }

    /// Returns true if both outputs should be logged when they don't agree.
    pub fn log_mismatched_output(&self) -> bool {
        self.log_mismatched_output
    }
}

/// Values that take precedence over every config source, typically from the command line.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Overrides `under-test-dir`.
    pub under_test_dir: Option<Utf8PathBuf>,

    /// Overrides `reference-dir`.
    pub reference_dir: Option<Utf8PathBuf>,

    /// Overrides `filter-file`.
    pub filter_file: Option<Utf8PathBuf>,

    /// Forces `dump-preprocessed` on.
    pub dump_preprocessed: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PkgtestConfigDeserialize {
    under_test_dir: Utf8PathBuf,
    reference_dir: Utf8PathBuf,
    #[serde(default)]
    filter_file: Option<Utf8PathBuf>,
    dump_preprocessed: bool,
    log_mismatched_output: bool,
}

impl PkgtestConfigDeserialize {
    fn into_config(self, base_dir: Utf8PathBuf) -> PkgtestConfig {
        PkgtestConfig {
            base_dir,
            under_test_dir: self.under_test_dir,
            reference_dir: self.reference_dir,
            filter_file: self.filter_file,
            dump_preprocessed: self.dump_preprocessed,
            log_mismatched_output: self.log_mismatched_output,
        }
    }
}
