//! Logging setup.
//!
//! A compact single-line format: local timestamp, level, target, message.

use std::io;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Line formatter shared by every sink.
pub struct SieveFormatter;

impl<S, N> FormatEvent<S, N> for SieveFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Local::now();
        write!(writer, "[{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"))?;

        match *event.metadata().level() {
            Level::TRACE => write!(writer, "TRACE")?,
            Level::DEBUG => write!(writer, "DEBUG")?,
            Level::INFO => write!(writer, "INFO ")?,
            Level::WARN => write!(writer, "WARN ")?,
            Level::ERROR => write!(writer, "ERROR")?,
        }
        write!(writer, "] {}: ", event.metadata().target())?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the global subscriber. Called once, before the engine starts.
pub fn init_logging(level: Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .event_format(SieveFormatter)
        .finish();

    // A second init (tests, embedding) is not an error worth dying for.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Map a config string to a level, falling back to the given default.
pub fn parse_level(s: &str, default: Level) -> Level {
    s.parse::<Level>().unwrap_or(default)
}
