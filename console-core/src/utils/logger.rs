use chrono::Local;
use nu_ansi_term::{Color, Style};
use std::fmt;
use std::path::Path;
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
    EnvFilter, Layer,
};

/// Target used for one-line-per-task results.
pub const TASK_RESULT_TARGET: &str = "task_result";

/// Installs the global subscriber: a daily-rolling file under `log_dir` and a
/// compact colored terminal stream.
///
/// The terminal shows task results plus warnings; `verbose` adds the
/// informational lines. `RUST_LOG` overrides the terminal filter. The returned
/// guard must be kept alive for the file writer to flush.
pub fn setup_logger(log_dir: impl AsRef<Path>, verbose: bool) -> Option<WorkerGuard> {
    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "console.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Secrets never reach these layers; the file is an audit trail of every run.
    let file_filter = tracing_subscriber::filter::Targets::new()
        .with_target(TASK_RESULT_TARGET, Level::INFO)
        .with_target("sqlx", Level::WARN)
        .with_default(Level::INFO);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    let default_console = if verbose {
        "info,sqlx=warn,task_result=info"
    } else {
        "warn,task_result=info"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_console));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(TerminalFormatter)
        .with_filter(console_filter);

    let installed = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    installed.ok().map(|_| guard)
}

// --- Formatters ---

struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

fn message_of(event: &Event<'_>) -> String {
    let mut visitor = MessageVisitor {
        message: String::new(),
    };
    event.record(&mut visitor);
    visitor.message
}

pub struct TerminalFormatter;

impl<S, N> FormatEvent<S, N> for TerminalFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let msg = message_of(event);
        let time = Style::new().dimmed().paint(Local::now().format("%H:%M:%S").to_string());

        if event.metadata().target() == TASK_RESULT_TARGET {
            let colored = if msg.contains("Success") {
                let green = Style::new().fg(Color::LightGreen).bold();
                msg.replacen("Success", &green.paint("Success").to_string(), 1)
            } else if msg.contains("Failed") {
                let red = Style::new().fg(Color::LightRed).bold();
                msg.replacen("Failed", &red.paint("Failed").to_string(), 1)
            } else {
                msg
            };
            return writeln!(writer, "{} {}", time, colored);
        }

        let level = *event.metadata().level();
        let tag = match level {
            Level::ERROR => Color::Red.bold().paint("ERROR"),
            Level::WARN => Color::Yellow.bold().paint("WARN "),
            Level::INFO => Color::Cyan.paint("INFO "),
            _ => Style::new().dimmed().paint("DEBUG"),
        };
        writeln!(writer, "{} {} {}", time, tag, msg)
    }
}

pub struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let meta = event.metadata();
        writeln!(
            writer,
            "{} [{}] {}: {}",
            timestamp,
            meta.level(),
            meta.target(),
            message_of(event)
        )
    }
}
