//! Pluggable log output
//!
//! The engine never talks to the global `log` facade implicitly. Each
//! [`Config`](crate::Config) carries a [`Logger`] holding a level threshold
//! and an optional sink. Records below the threshold are dropped before
//! their message is formatted.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Emit a record through a [`Logger`] if its level passes the threshold
///
/// ```ignore
/// ws_log!(self.config.logger, Level::Debug, "frame received ({} bytes)", len);
/// ```
macro_rules! ws_log {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::logging::Logger = &$logger;
        let level: ::log::Level = $level;
        if logger.enabled(level) {
            logger.emit(
                &::log::Record::builder()
                    .args(format_args!($($arg)+))
                    .level(level)
                    .target(module_path!())
                    .module_path_static(Some(module_path!()))
                    .file_static(Some(file!()))
                    .line(Some(line!()))
                    .build(),
            );
        }
    }};
}

/// Level threshold plus destination for engine log records
#[derive(Clone)]
pub struct Logger {
    level: LevelFilter,
    sink: Option<Arc<dyn Log>>,
}

impl Logger {
    /// Logger writing records at or above `level` to standard error
    pub fn new(level: LevelFilter) -> Self {
        Self { level, sink: None }
    }

    /// Logger that drops everything
    pub fn disabled() -> Self {
        Self::new(LevelFilter::Off)
    }

    /// Route records to `sink` instead of standard error
    pub fn with_sink(mut self, sink: Arc<dyn Log>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Change the level threshold
    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level;
    }

    /// Current level threshold
    #[inline]
    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Whether a record at `level` would be emitted
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    /// Hand a record to the sink, or to standard error if none is set
    pub fn emit(&self, record: &Record<'_>) {
        match &self.sink {
            Some(sink) => sink.log(record),
            None => StderrSink.log(record),
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("sink", &self.sink.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Writes `file:line module(): message` lines to standard error
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl Log for StderrSink {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        // Nowhere to report a failed diagnostic write.
        let _ = write_line(&mut io::stderr().lock(), record);
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn write_line<W: Write>(out: &mut W, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        out,
        "{}:{} {}(): {}",
        record.file().unwrap_or("?"),
        record.line().unwrap_or(0),
        record.module_path().unwrap_or("?"),
        record.args()
    )
}

/// Forwards records to the process-wide `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl Log for FacadeSink {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}
