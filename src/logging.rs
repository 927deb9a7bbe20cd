//! Logger construction

use slog::{o, Drain, Logger};

/// Logger writing full-format records to stdout through an async drain
pub fn terminal_logger() -> Logger {
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// Logger that drops every record
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
