// Log output for the media server's plugin runner
//
// In plugin mode stdout carries only the JSON result. Log lines go to stderr
// framed as `\x01<level>\x02<message>` so the server can attribute levels.

use std::fmt::{self, Write as _};
use std::io::Write as _;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "stash_organizer=info";
const START: char = '\x01';
const SEP: char = '\x02';

fn level_code(level: Level) -> char {
    match level {
        Level::TRACE => 't',
        Level::DEBUG => 'd',
        Level::INFO => 'i',
        Level::WARN => 'w',
        Level::ERROR => 'e',
    }
}

/// Frame `message` for the plugin log protocol, one framed line per input line
pub fn plugin_lines(level: Level, message: &str) -> String {
    let code = level_code(level);
    let mut out = String::new();
    let mut lines = message.lines().peekable();
    if lines.peek().is_none() {
        let _ = writeln!(out, "{START}{code}{SEP}");
    }
    for line in lines {
        let _ = writeln!(out, "{START}{code}{SEP}{line}");
    }
    out
}

/// Progress line for the plugin runner, clamped to [0, 1]
pub fn progress_line(value: f64) -> String {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    format!("{START}p{SEP}{value}\n")
}

/// Report task progress to the plugin runner
pub fn progress(value: f64) {
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(progress_line(value).as_bytes());
    let _ = stderr.flush();
}

/// Event formatter speaking the plugin log protocol
pub struct PluginLogFormat;

impl<S, N> FormatEvent<S, N> for PluginLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut message = String::new();
        ctx.format_fields(Writer::new(&mut message), event)?;
        writer.write_str(&plugin_lines(*event.metadata().level(), &message))
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Tracing for plugin mode: framed lines on stderr
pub fn init_plugin() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(PluginLogFormat)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Tracing for the standalone tools: regular fmt output on stderr
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
