//! Provides a [`tracing_subscriber::Layer`] ([`PlainFormattingLayer`]) that writes events as
//! plain-text lines in a fixed `<time> [<level>] <message>` column layout.

use std::{fmt, io::Write};

use time::{format_description::BorrowedFormatItem, macros::format_description};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, fmt::MakeWriter, layer::Context};

const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// A [`tracing_subscriber::Layer`] that formats each event as a single plain-text line.
///
/// The layout is `<time> [<level>] <message>`, with the level tag right-aligned inside the
/// brackets. Messages spanning multiple lines have their continuation lines indented to align
/// under the start of the first line, so multi-line bodies read as one visual block.
///
/// It requires a [`MakeWriter`] to determine the output destination; level filtering is left to
/// a per-layer filter applied by the caller.
#[derive(Debug)]
pub struct PlainFormattingLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    dst_writer: W,
}

impl<W> PlainFormattingLayer<W>
where
    W: for<'a> MakeWriter<'a> + 'static,
{
    /// Creates a new [`PlainFormattingLayer`] writing to the given destination.
    pub fn new(dst_writer: W) -> Self {
        Self { dst_writer }
    }

    /// Write the rendered line with a single `write_all` call to avoid fragmentation of log
    /// lines under concurrent emission.
    fn flush(&self, line: &str) -> Result<(), std::io::Error> {
        self.dst_writer.make_writer().write_all(line.as_bytes())
    }
}

impl<S, W> Layer<S> for PlainFormattingLayer<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        // Fall back to the event's target when no message field was recorded.
        let message = visitor
            .message
            .unwrap_or_else(|| event.metadata().target().to_string());

        let line = render_line(*event.metadata().level(), &message);
        let _ = self.flush(&line);
    }
}

/// Renders one log line, including the trailing newline.
///
/// Continuation lines of a multi-line message are indented to the column where the first line's
/// message body starts.
pub(crate) fn render_line(level: Level, message: &str) -> String {
    let time = time::UtcDateTime::now()
        .format(TIME_FORMAT)
        .unwrap_or_default();

    // Width 5 fits the widest level names (TRACE/DEBUG/ERROR); shorter tags are right-aligned.
    let header = format!("{time} [{level:>5}] ");
    let indent = " ".repeat(header.chars().count());

    let mut out = String::with_capacity(header.len() + message.len() + 1);
    out.push_str(&header);

    let mut body_lines = message.split('\n');
    if let Some(first) = body_lines.next() {
        out.push_str(first);
    }
    for continuation in body_lines {
        out.push('\n');
        out.push_str(&indent);
        out.push_str(continuation);
    }
    out.push('\n');
    out
}

/// Captures the `message` field of an event.
#[derive(Debug, Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" && self.message.is_none() {
            self.message = Some(format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_tags_are_right_aligned_in_brackets() {
        assert!(render_line(Level::TRACE, "x").contains("[TRACE]"));
        assert!(render_line(Level::DEBUG, "x").contains("[DEBUG]"));
        assert!(render_line(Level::INFO, "x").contains("[ INFO]"));
        assert!(render_line(Level::WARN, "x").contains("[ WARN]"));
        assert!(render_line(Level::ERROR, "x").contains("[ERROR]"));
    }

    #[test]
    fn lines_end_with_a_newline() {
        assert!(render_line(Level::ERROR, "boom").ends_with('\n'));
    }

    #[test]
    fn multi_line_messages_indent_continuations() {
        let rendered = render_line(Level::INFO, "first\nsecond\nthird");
        let mut lines = rendered.lines();

        let first = lines.next().unwrap();
        let column = first.find("] ").unwrap() + 2;
        assert!(first.ends_with("first"));

        for (line, body) in lines.zip(["second", "third"]) {
            assert!(line.starts_with(&" ".repeat(column)));
            assert!(line.ends_with(body));
            assert_eq!(line.len(), column + body.len());
        }
    }

    #[test]
    fn empty_message_renders_header_only() {
        let rendered = render_line(Level::INFO, "");
        assert!(rendered.trim_end_matches('\n').ends_with("] "));
    }
}
