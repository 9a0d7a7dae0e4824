// Copyright (c) The ktest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum, builder::styling};
use ktest_runner::reporter::Styles;
use owo_colors::{OwoColorize, Style, style};
use std::{
    fmt::{self, Write as _},
    io::{BufWriter, Write},
    sync::Once,
};
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

/// The environment variable that controls log filtering.
pub(crate) const LOG_ENV: &str = "KTEST_LOG";

/// Events with this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "ktest::no_heading";

/// Help output colors: green headings, cyan flags, red errors.
pub(crate) const fn clap_styles() -> styling::Styles {
    use styling::{AnsiColor, Effects};

    let heading = AnsiColor::Green.on_default().effects(Effects::BOLD);
    let flag = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    styling::Styles::styled()
        .header(heading)
        .usage(heading)
        .literal(flag)
        .placeholder(AnsiColor::Cyan.on_default())
        .error(AnsiColor::Red.on_default().effects(Effects::BOLD))
        .valid(flag)
        .invalid(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
}

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "CARGO_TERM_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    /// Installs the stderr logger and returns the resolved color settings.
    pub(crate) fn init(self) -> OutputContext {
        let output = OutputContext { color: self.color };
        init_logger(output.stderr_styles());
        output
    }
}

/// Color settings for a ktest invocation.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns styles for logs and errors on standard error.
    pub fn stderr_styles(&self) -> StderrStyles {
        if self.color.should_colorize(supports_color::Stream::Stderr) {
            StderrStyles::colorized()
        } else {
            StderrStyles::default()
        }
    }

    /// Returns report styles for standard output.
    pub(crate) fn stdout_styles(&self) -> Styles {
        let mut styles = Styles::default();
        if self.color.should_colorize(supports_color::Stream::Stdout) {
            styles.colorize();
        }
        styles
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Styles for everything ktest writes to standard error.
#[derive(Copy, Clone, Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    error: Style,
    warning: Style,
    dimmed: Style,
}

impl StderrStyles {
    fn colorized() -> Self {
        Self {
            bold: style().bold(),
            error: style().red().bold(),
            warning: style().yellow().bold(),
            dimmed: style().dimmed(),
        }
    }

    fn level_heading(&self, level: Level) -> (&'static str, Style) {
        match level {
            Level::ERROR => ("error", self.error),
            Level::WARN => ("warning", self.warning),
            Level::INFO => ("info", self.bold),
            Level::DEBUG => ("debug", self.bold),
            Level::TRACE => ("trace", self.dimmed),
        }
    }
}

static INIT_LOGGER: Once = Once::new();

/// Installs the global subscriber once per process.
///
/// `KTEST_LOG` takes `tracing` target directives; an empty or unparseable value means
/// `info`.
fn init_logger(styles: StderrStyles) {
    INIT_LOGGER.call_once(|| {
        let directives = std::env::var(LOG_ENV).unwrap_or_default();
        let parsed = (!directives.is_empty()).then(|| directives.parse::<Targets>());
        let targets = match &parsed {
            Some(Ok(targets)) => targets.clone(),
            Some(Err(_)) | None => Targets::new().with_default(LevelFilter::INFO),
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(HeadingFormatter { styles })
            .with_writer(std::io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(layer).init();

        if let Some(Err(err)) = parsed {
            tracing::warn!("ignoring invalid {LOG_ENV} value `{directives}`: {err}");
        }
    });
}

/// Prints `<level>: <message>` and nothing else: no timestamps, targets or spans.
struct HeadingFormatter {
    styles: StderrStyles,
}

impl<S, N> FormatEvent<S, N> for HeadingFormatter
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
            let (heading, style) = self.styles.level_heading(*metadata.level());
            write!(writer, "{}: ", heading.style(style))?;
        }

        let mut message = MessageText::default();
        event.record(&mut message);
        writeln!(writer, "{}", message.0)
    }
}

/// Collects the `message` field of an event. Other fields are dropped.
#[derive(Default)]
struct MessageText(String);

impl Visit for MessageText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            // Writing to a String cannot fail.
            let _ = write!(self.0, "{value:?}");
        }
    }
}

/// Where report output goes: the process's stdout, or a buffer in tests.
#[derive(Default)]
pub enum OutputWriter {
    /// Write to standard output.
    #[default]
    Normal,

    /// Capture standard output.
    #[cfg(test)]
    Test {
        /// Captured standard output.
        stdout: Vec<u8>,
    },
}

impl OutputWriter {
    pub(crate) fn stdout_writer(&mut self) -> Box<dyn Write + '_> {
        match self {
            Self::Normal => Box::new(BufWriter::new(std::io::stdout().lock())),
            #[cfg(test)]
            Self::Test { stdout } => Box::new(stdout),
        }
    }
}
