// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Style, style};
use std::fmt;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Events logged with this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "pkgtest::no_heading";

/// Environment variable holding the log filter, in `tracing_subscriber::filter::Targets` syntax.
const LOG_ENV: &str = "PKGTEST_LOG";

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "PKGTEST_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "PKGTEST_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts { verbose, color } = self;

        color.init_logger(verbose);

        OutputContext { color }
    }
}

/// How output is rendered for this invocation.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns general stderr styles for the current output context.
    pub fn stderr_styles(&self) -> StderrStyles {
        let mut styles = StderrStyles::default();

        if self.color.should_colorize(supports_color::Stream::Stderr) {
            styles.colorize();
        }

        styles
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

static INIT_LOGGER: std::sync::Once = std::sync::Once::new();

impl Color {
    fn init_logger(self, verbose: bool) {
        let log_styles = LogStyles {
            colorize: self.should_colorize(supports_color::Stream::Stderr),
        };

        INIT_LOGGER.call_once(|| {
            let default_level = if verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            let (targets, invalid) = parse_log_filter(std::env::var_os(LOG_ENV), default_level);

            let layer = tracing_subscriber::fmt::layer()
                .event_format(SimpleFormatter { styles: log_styles })
                .with_writer(std::io::stderr)
                .with_filter(targets);

            tracing_subscriber::registry().with(layer).init();

            if let Some(invalid) = invalid {
                tracing::warn!("ignoring invalid {LOG_ENV} value `{invalid}`");
            }
        });
    }

    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Parses the log filter environment variable.
///
/// An empty or missing value selects `default_level`. An unparsable value also falls back to
/// `default_level` and is returned so the caller can report it once logging is set up.
fn parse_log_filter(
    value: Option<std::ffi::OsString>,
    default_level: LevelFilter,
) -> (Targets, Option<String>) {
    let default = || Targets::new().with_default(default_level);
    let value = match value.map(|value| value.into_string()) {
        None => return (default(), None),
        Some(Ok(value)) if value.is_empty() => return (default(), None),
        Some(Ok(value)) => value,
        Some(Err(value)) => return (default(), Some(value.to_string_lossy().into_owned())),
    };

    match value.parse::<Targets>() {
        Ok(targets) => (targets, None),
        Err(_) => (default(), Some(value)),
    }
}

struct SimpleFormatter {
    styles: LogStyles,
}

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        if metadata.target() != NO_HEADING_TARGET {
            let (label, style) = self.styles.heading(*metadata.level());
            write!(writer, "{}: ", label.style(style))?;
        }

        let mut visitor = MessageVisitor {
            writer: &mut writer,
            error: None,
        };

        event.record(&mut visitor);

        if let Some(error) = visitor.error {
            return Err(error);
        }

        writeln!(writer)
    }
}

static MESSAGE_FIELD: &str = "message";

struct MessageVisitor<'writer, 'a> {
    writer: &'a mut format::Writer<'writer>,
    error: Option<fmt::Error>,
}

impl Visit for MessageVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == MESSAGE_FIELD {
            if let Err(error) = write!(self.writer, "{value:?}") {
                self.error = Some(error);
            }
        }
    }
}

/// Styles for the level prefix of log lines.
#[derive(Copy, Clone, Debug, Default)]
struct LogStyles {
    colorize: bool,
}

impl LogStyles {
    fn heading(self, level: Level) -> (&'static str, Style) {
        let (label, colored) = match level {
            Level::ERROR => ("error", style().red().bold()),
            Level::WARN => ("warning", style().yellow().bold()),
            Level::INFO => ("info", style().bold()),
            Level::DEBUG => ("debug", style().bold()),
            Level::TRACE => ("trace", style().dimmed()),
        };
        (label, if self.colorize { colored } else { style() })
    }
}

/// Styles for error output on stderr.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
}

impl StderrStyles {
    fn colorize(&mut self) {
        self.bold = style().bold();
    }
}
