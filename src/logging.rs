// Diagnostic sink setup
//
// env_logger does the formatting and writing. On top of it sits a thin
// wrapper that applies an explicit severity set, so "warn + error only"
// and "debug but not trace" are both expressible. Installed exactly once.

use env_logger::{fmt::Formatter, Builder, Target};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Set of enabled severities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeverityMask(u8);

impl SeverityMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1_1111);

    const fn bit(level: Level) -> u8 {
        match level {
            Level::Trace => 1 << 0,
            Level::Debug => 1 << 1,
            Level::Info => 1 << 2,
            Level::Warn => 1 << 3,
            Level::Error => 1 << 4,
        }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        names.iter().fold(Self::NONE, |mask, name| {
            match name.as_ref().to_lowercase().as_str() {
                "trace" => mask.with(Level::Trace),
                "debug" => mask.with(Level::Debug),
                "info" => mask.with(Level::Info),
                "warn" | "warning" => mask.with(Level::Warn),
                "error" => mask.with(Level::Error),
                "all" => Self::ALL,
                _ => mask,
            }
        })
    }

    pub const fn with(self, level: Level) -> Self {
        Self(self.0 | Self::bit(level))
    }

    pub const fn contains(self, level: Level) -> bool {
        self.0 & Self::bit(level) != 0
    }

    /// Most verbose enabled level, used as the global `log` ceiling
    pub fn max_level(self) -> LevelFilter {
        [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error]
            .into_iter()
            .find(|&level| self.contains(level))
            .map_or(LevelFilter::Off, |level| level.to_level_filter())
    }
}

struct MaskedLogger {
    inner: env_logger::Logger,
    mask: SeverityMask,
}

impl Log for MaskedLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.mask.contains(metadata.level()) && self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// `(file:line) LEVEL target > message`
fn format_record(buf: &mut Formatter, record: &Record<'_>) -> io::Result<()> {
    let source = match (record.file(), record.line()) {
        (Some(file), Some(line)) => format!("({}:{})", file, line),
        (Some(file), None) => format!("({})", file),
        _ => String::from("(?)"),
    };
    let style = buf.default_level_style(record.level());

    writeln!(
        buf,
        "{} {style}{:<5}{style:#} {} > {}",
        source,
        record.level(),
        record.target(),
        record.args(),
        style = style,
    )
}

/// `env_filter` takes `RUST_LOG` syntax and narrows the mask further;
/// without one the mask alone decides.
fn build(target: LogTarget, mask: SeverityMask, env_filter: Option<&str>) -> Result<MaskedLogger> {
    let mut builder = Builder::new();
    match env_filter {
        Some(filter) => {
            builder.parse_filters(filter);
        }
        None => {
            builder.filter_level(mask.max_level());
        }
    }
    builder.format(format_record);

    match target {
        LogTarget::Stdout => {
            builder.target(Target::Stdout);
        }
        LogTarget::Stderr => {
            builder.target(Target::Stderr);
        }
        LogTarget::File(path) => {
            let file = File::create(path)?;
            builder.target(Target::Pipe(Box::new(file)));
        }
    }

    Ok(MaskedLogger {
        inner: builder.build(),
        mask,
    })
}

/// Install the process-wide logger. Must run before anything logs, and
/// only once.
pub fn init(target: LogTarget, mask: SeverityMask) -> Result<()> {
    let env_filter = std::env::var("RUST_LOG").ok();
    let logger = build(target, mask, env_filter.as_deref())?;

    log::set_boxed_logger(Box::new(logger)).map_err(|_| Error::LoggerAlreadyInitialized)?;
    log::set_max_level(mask.max_level());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(level: Level) -> Metadata<'static> {
        Metadata::builder().level(level).target("trigon").build()
    }

    #[test]
    fn mask_from_names() {
        let mask = SeverityMask::from_names(&["Debug", "warning", "bogus"]);
        assert!(mask.contains(Level::Debug));
        assert!(mask.contains(Level::Warn));
        assert!(!mask.contains(Level::Info));
        assert!(!mask.contains(Level::Trace));
    }

    #[test]
    fn max_level_is_most_verbose_enabled() {
        assert_eq!(SeverityMask::NONE.max_level(), LevelFilter::Off);
        assert_eq!(SeverityMask::ALL.max_level(), LevelFilter::Trace);
        let mask = SeverityMask::NONE.with(Level::Error).with(Level::Info);
        assert_eq!(mask.max_level(), LevelFilter::Info);
        assert_eq!(SeverityMask::NONE.with(Level::Error).max_level(), LevelFilter::Error);
        assert_eq!(SeverityMask::from_names(&["all"]), SeverityMask::ALL);
    }

    #[test]
    fn masked_levels_are_dropped_even_below_ceiling() {
        // debug enabled, info disabled: a hole in the middle of the range
        let mask = SeverityMask::NONE.with(Level::Debug).with(Level::Error);
        let logger = build(LogTarget::Stderr, mask, None).unwrap();

        assert!(logger.enabled(&metadata(Level::Debug)));
        assert!(logger.enabled(&metadata(Level::Error)));
        assert!(!logger.enabled(&metadata(Level::Info)));
        assert!(!logger.enabled(&metadata(Level::Trace)));
    }

    #[test]
    fn rust_log_narrows_the_mask() {
        let mask = SeverityMask::NONE
            .with(Level::Info)
            .with(Level::Warn)
            .with(Level::Error);
        let logger = build(LogTarget::Stderr, mask, Some("warn")).unwrap();

        assert!(!logger.enabled(&metadata(Level::Info)));
        assert!(logger.enabled(&metadata(Level::Warn)));
        assert!(logger.enabled(&metadata(Level::Error)));
    }

    #[test]
    fn rust_log_cannot_enable_masked_levels() {
        let mask = SeverityMask::NONE.with(Level::Error);
        let logger = build(LogTarget::Stderr, mask, Some("trace")).unwrap();

        assert!(!logger.enabled(&metadata(Level::Debug)));
        assert!(logger.enabled(&metadata(Level::Error)));
    }

    #[test]
    fn second_init_is_rejected() {
        // Empty mask: the installed logger stays silent for the other tests
        let mask = SeverityMask::NONE;
        let _ = init(LogTarget::Stderr, mask);
        assert!(matches!(
            init(LogTarget::Stderr, mask),
            Err(Error::LoggerAlreadyInitialized)
        ));
    }
}
