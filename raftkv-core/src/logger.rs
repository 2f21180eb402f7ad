//! Root logger construction.
//!
//! The node's stdout is the wire transport for the JSON-line protocol,
//! so every log line here goes to stderr -- mixing a log line into
//! stdout would corrupt the message stream for whatever is reading it.

use slog::{Drain, Logger};

pub fn get_root_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
