//! A [`tracing_subscriber::Layer`] that writes events in `logfmt`
//! (`key=value key2=value2`) form, the wire format the archive's ops
//! tooling greps for. Not a full-featured logfmt encoder: it special-cases
//! the fields the rest of the workspace actually emits (`message`, numeric
//! and string fields) and falls back to `{:?}` for anything else.

use observability_deps::tracing::{Event, Level, Subscriber};
use std::fmt::{self, Write as _};
use std::io::{self, Write as _};
use tracing_subscriber::{
    layer::Context,
    registry::LookupSpan,
    Layer,
};

/// Tracing-subscriber layer that writes `logfmt`-formatted lines to stderr.
#[derive(Debug, Default)]
pub struct LogFmtLayer {
    with_target: bool,
}

impl LogFmtLayer {
    /// Create a new layer with default settings.
    pub fn new() -> Self {
        Self { with_target: true }
    }

    /// Toggle whether the emitting module path is included as `target=`.
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }
}

impl<S> Layer<S> for LogFmtLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        let _ = write!(line, "level={}", level_str(*event.metadata().level()));
        if self.with_target {
            let _ = write!(line, " target={}", Quoted(event.metadata().target()));
        }

        let mut visitor = FieldVisitor { line: &mut line };
        event.record(&mut visitor);

        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{line}");
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

struct FieldVisitor<'a> {
    line: &'a mut String,
}

impl<'a> observability_deps::tracing::field::Visit for FieldVisitor<'a> {
    fn record_debug(&mut self, field: &observability_deps::tracing::field::Field, value: &dyn fmt::Debug) {
        let _ = write!(self.line, " {}={:?}", field.name(), value);
    }

    fn record_str(&mut self, field: &observability_deps::tracing::field::Field, value: &str) {
        let _ = write!(self.line, " {}={}", field.name(), Quoted(value));
    }
}

/// Quote a value if it contains whitespace or `=`, as logfmt requires.
struct Quoted<'a>(&'a str);

impl<'a> fmt::Display for Quoted<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.chars().any(|c| c.is_whitespace() || c == '=' || c == '"') {
            write!(f, "{:?}", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use observability_deps::tracing::info;
    use tracing_subscriber::prelude::*;

    #[test]
    fn emits_without_panicking() {
        let subscriber = tracing_subscriber::registry().with(LogFmtLayer::new());
        observability_deps::tracing::subscriber::with_default(subscriber, || {
            info!(first_block = 10, last_block = 20, "ingest stride scheduled");
        });
    }
}
