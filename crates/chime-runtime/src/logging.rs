//! `tracing` subscriber setup.
//!
//! [`init_from_config`] is what [`ChimeRuntime`](crate::ChimeRuntime) calls
//! at build time. Embedders that want a different layout can install their
//! own subscriber first, or drive [`LoggingBuilder`] by hand:
//!
//! ```rust,ignore
//! use chime_runtime::logging::{FmtSpan, LoggingBuilder};
//!
//! LoggingBuilder::new()
//!     .directive("chime_core=debug")
//!     .spans(FmtSpan::CLOSE)
//!     .init();
//! ```

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

const DEFAULT_LOG_FILE: &str = "chime.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the subscriber described by `config`, unless one already exists.
pub fn init_from_config(config: &LoggingConfig) {
    LoggingBuilder::from_config(config).init();
}

fn fmt_span(events: &SpanEventConfig) -> FmtSpan {
    [
        (events.new, FmtSpan::NEW),
        (events.enter, FmtSpan::ENTER),
        (events.exit, FmtSpan::EXIT),
        (events.close, FmtSpan::CLOSE),
    ]
    .into_iter()
    .filter(|(on, _)| *on)
    .fold(FmtSpan::NONE, |acc, (_, flag)| acc | flag)
}

#[derive(Debug)]
pub struct LoggingBuilder {
    level: Level,
    directives: Vec<String>,
    spans: FmtSpan,
    format: LogFormat,
    output: LogOutput,
    file_path: Option<PathBuf>,
    target: bool,
    thread_ids: bool,
    location: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            level: Level::INFO,
            directives: Vec::new(),
            spans: FmtSpan::NONE,
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            target: true,
            thread_ids: false,
            location: false,
        }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        // Sorted so the filter is stable across runs.
        let mut overrides: Vec<_> = config.filters.iter().collect();
        overrides.sort_unstable_by_key(|&(module, _)| module);

        Self {
            level: config.level.to_tracing_level(),
            directives: overrides
                .into_iter()
                .map(|(module, level)| format!("{module}={level}"))
                .collect(),
            spans: fmt_span(&config.span_events),
            format: config.format,
            output: config.output,
            file_path: config.file_path.clone(),
            thread_ids: config.thread_ids,
            location: config.file_location,
            ..Self::new()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Adds an `EnvFilter` directive such as `chime_runtime=debug`.
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn spans(mut self, spans: FmtSpan) -> Self {
        self.spans = spans;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.thread_ids = enabled;
        self
    }

    /// Source file and line on every record.
    pub fn with_file_location(mut self, enabled: bool) -> Self {
        self.location = enabled;
        self
    }

    pub fn file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// `RUST_LOG` wins over the configured level; directives apply on top.
    fn filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()));
        self.directives
            .iter()
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(base, |filter, directive| filter.add_directive(directive))
    }

    /// Returns the writer and whether a file output fell back to stdout.
    fn writer(&self) -> (BoxMakeWriter, bool) {
        match (self.output, &self.file_path) {
            (LogOutput::Stdout, _) => (BoxMakeWriter::new(std::io::stdout), false),
            (LogOutput::Stderr, _) => (BoxMakeWriter::new(std::io::stderr), false),
            (LogOutput::File, Some(path)) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let name = path
                    .file_name()
                    .map_or_else(|| DEFAULT_LOG_FILE.into(), |name| name.to_os_string());
                let appender = tracing_appender::rolling::never(dir, name);
                (BoxMakeWriter::new(appender), false)
            }
            (LogOutput::File, None) => (BoxMakeWriter::new(std::io::stdout), true),
        }
    }

    fn layer(&self, writer: BoxMakeWriter) -> BoxedLayer {
        let base = fmt::layer()
            .with_writer(writer)
            .with_span_events(self.spans.clone())
            .with_target(self.target)
            .with_thread_ids(self.thread_ids)
            .with_file(self.location)
            .with_line_number(self.location);
        match self.format {
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Full => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            #[cfg(feature = "json-log")]
            LogFormat::Json => base.json().boxed(),
        }
    }

    /// Installs the subscriber. A subscriber that is already installed wins.
    pub fn init(self) {
        let _ = self.try_init();
    }

    pub fn try_init(self) -> Result<(), TryInitError> {
        let (writer, fell_back) = self.writer();
        tracing_subscriber::registry()
            .with(self.layer(writer))
            .with(self.filter())
            .try_init()?;
        if fell_back {
            tracing::warn!("logging.output is `file` without a file_path; writing to stdout");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn overrides_become_sorted_directives() {
        let mut config = LoggingConfig {
            level: LogLevel::Warn,
            file_location: true,
            ..Default::default()
        };
        config.filters.insert("chime_runtime".into(), LogLevel::Trace);
        config.filters.insert("chime_core".into(), LogLevel::Debug);

        let builder = LoggingBuilder::from_config(&config);
        assert_eq!(builder.level, Level::WARN);
        assert_eq!(
            builder.directives,
            vec!["chime_core=debug", "chime_runtime=trace"]
        );
        assert!(builder.location);
        assert!(builder.target);
    }

    #[test]
    fn span_config_selects_fmt_flags() {
        assert_eq!(fmt_span(&SpanEventConfig::default()), FmtSpan::NONE);

        let lifecycle = SpanEventConfig {
            new: true,
            close: true,
            ..Default::default()
        };
        assert_eq!(fmt_span(&lifecycle), FmtSpan::NEW | FmtSpan::CLOSE);

        let all = SpanEventConfig {
            new: true,
            enter: true,
            exit: true,
            close: true,
        };
        assert_eq!(fmt_span(&all), FmtSpan::FULL);
    }

    #[test]
    fn file_output_without_path_falls_back() {
        let (_, fell_back) = LoggingBuilder::new().output(LogOutput::File).writer();
        assert!(fell_back);

        let (_, fell_back) = LoggingBuilder::new()
            .output(LogOutput::File)
            .file_path(std::env::temp_dir().join("chime-test.log"))
            .writer();
        assert!(!fell_back);
    }

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        let _ = LoggingBuilder::new().with_level(Level::ERROR).try_init();
        assert!(LoggingBuilder::new().with_level(Level::ERROR).try_init().is_err());
    }
}
